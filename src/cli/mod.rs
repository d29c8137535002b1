//! 命令行接口模块
//!
//! 提供CLI参数解析和命令处理功能

pub mod args;
pub mod commands;

pub use args::{Args, Commands, LogLevel, OutputFormat};
pub use commands::{dispatch, CheckConfigCommand, Command, DumpStateCommand, RunCommand};
