//! 配置管理模块
//!
//! 提供池、成员、监控器与拓扑的配置定义、加载和验证功能

pub mod loader;
pub mod types;

pub use loader::{ConfigLoader, TomlConfigLoader};
pub use types::{
    validate_config, Config, Fallback, ForcedStatus, GlobalConfig, LbMethod, MemberConfig,
    MonitorBase, MonitorConfig, PoolConfig, TopologyFill, MAX_ADDRS_CEILING, MAX_MEMBER_WEIGHT,
};
