//! GSLB Director - DNS全局负载均衡核心
//!
//! 这是一个用Rust编写的GSLB核心，持续探测分布式服务端点的健康
//! 状态，并据此为DNS查询选择可用地址，支持：
//! - TCP连接、TCP内容匹配与HTTP/S三种探测策略
//! - 亚秒级调度与弹性探测工作池
//! - 抖动控制的健康状态机（慢判DOWN，快恢复）
//! - 快照发布与跨进程的解析器消费
//! - 加权轮询、拓扑亲和与主备故障转移三种分发方法

pub mod cli;
pub mod config;
pub mod error;
pub mod logging;
pub mod monitor;
pub mod publish;
pub mod resolver;
pub mod scheduler;
pub mod state;
pub mod topology;
pub mod worker;

// 重新导出主要类型
pub use config::{Config, GlobalConfig, MemberConfig, MonitorConfig, PoolConfig};
pub use error::GslbError;
pub use resolver::{QueryContext, Resolution, Resolver};
pub use scheduler::HealthTracker;
pub use state::{HealthStatus, HealthTable, StateSnapshot};

/// 应用程序版本信息
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// 应用程序名称
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");

/// 应用程序描述
pub const APP_DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");
