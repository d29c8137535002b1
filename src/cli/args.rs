//! 命令行参数定义
//!
//! 使用clap定义应用程序的命令行接口

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// GSLB Director - 健康追踪与负载均衡解析核心
#[derive(Parser, Debug, Clone)]
#[command(
    name = "gslb-director",
    version = crate::VERSION,
    about = crate::APP_DESCRIPTION,
    long_about = None
)]
pub struct Args {
    /// 配置文件路径
    #[arg(
        short,
        long,
        value_name = "FILE",
        help = "配置文件路径",
        default_value = "gslb.toml",
        env = "GSLB_DIRECTOR_CONFIG"
    )]
    pub config: PathBuf,

    /// 日志级别
    #[arg(
        short,
        long,
        value_enum,
        default_value = "info",
        help = "日志级别",
        env = "GSLB_DIRECTOR_LOG_LEVEL"
    )]
    pub log_level: LogLevel,

    /// 是否使用JSON格式日志
    #[arg(long, help = "使用JSON格式日志", env = "GSLB_DIRECTOR_LOG_JSON")]
    pub log_json: bool,

    /// 子命令
    #[command(subcommand)]
    pub command: Commands,
}

/// 日志级别枚举
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq)]
pub enum LogLevel {
    /// 调试级别
    Debug,
    /// 信息级别
    Info,
    /// 警告级别
    Warn,
    /// 错误级别
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Debug => write!(f, "debug"),
            LogLevel::Info => write!(f, "info"),
            LogLevel::Warn => write!(f, "warn"),
            LogLevel::Error => write!(f, "error"),
        }
    }
}

/// 输出格式枚举
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq)]
pub enum OutputFormat {
    /// 文本格式
    Text,
    /// JSON格式
    Json,
}

/// 子命令定义
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// 启动健康追踪与状态发布
    Run,

    /// 验证配置文件并退出
    CheckConfig,

    /// 转储最近发布的状态快照
    DumpState {
        /// 输出格式
        #[arg(short, long, value_enum, default_value = "text", help = "输出格式")]
        format: OutputFormat,
    },

    /// 对最近发布的快照执行一次解析查询
    Resolve {
        /// 池名称
        #[arg(value_name = "POOL", help = "池名称")]
        pool: String,

        /// 客户端地址，用于拓扑匹配
        #[arg(long, value_name = "ADDR", help = "客户端地址")]
        client: Option<String>,

        /// 本次查询的地址数上限
        #[arg(long, value_name = "COUNT", help = "返回地址数上限")]
        max: Option<usize>,
    },

    /// 显示版本信息
    Version {
        /// 输出格式
        #[arg(short, long, value_enum, default_value = "text", help = "输出格式")]
        format: OutputFormat,
    },
}
