//! 错误处理模块
//!
//! 定义应用程序的统一错误类型

use thiserror::Error;

/// GSLB Director 应用程序的主要错误类型
#[derive(Error, Debug)]
pub enum GslbError {
    /// 配置相关错误
    #[error("配置错误: {0}")]
    Config(#[from] ConfigError),

    /// 状态发布相关错误
    #[error("状态发布错误: {0}")]
    Publish(#[from] PublishError),

    /// 解析相关错误
    #[error("解析错误: {0}")]
    Resolve(#[from] ResolveError),

    /// 调度器相关错误
    #[error("调度器错误: {0}")]
    Scheduler(String),

    /// IO错误
    #[error("IO错误: {0}")]
    Io(#[from] std::io::Error),

    /// JSON序列化/反序列化错误
    #[error("JSON错误: {0}")]
    Json(#[from] serde_json::Error),

    /// 其他错误
    #[error("其他错误: {0}")]
    Other(#[from] anyhow::Error),
}

/// 配置错误类型
#[derive(Error, Debug)]
pub enum ConfigError {
    /// 配置文件解析错误
    #[error("配置文件解析失败: {0}")]
    ParseError(String),

    /// 配置验证错误
    #[error("配置验证失败: {0}")]
    ValidationError(String),

    /// 配置文件不存在
    #[error("配置文件不存在: {path}")]
    FileNotFound { path: String },

    /// 环境变量替换错误
    #[error("环境变量替换失败: {var}")]
    EnvVarError { var: String },
}

/// 状态发布错误类型
#[derive(Error, Debug)]
pub enum PublishError {
    /// 共享存储不可达或写入被拒绝
    #[error("快照存储不可用: {0}")]
    StoreUnavailable(String),

    /// 快照序列化失败
    #[error("快照序列化失败: {0}")]
    SerializeError(#[from] serde_json::Error),

    /// 存储IO错误
    #[error("快照存储IO失败: {0}")]
    Io(#[from] std::io::Error),
}

/// 解析错误类型
///
/// 调用方错误（未知池、非法地址）与健康驱动的回退（refuse/nodata）必须
/// 严格区分，后者不是错误而是 `Resolution` 的正常取值。
#[derive(Error, Debug)]
pub enum ResolveError {
    /// 查询了配置中不存在的池
    #[error("未知的池: {pool}")]
    UnknownPool { pool: String },

    /// 客户端地址无法解析
    #[error("无效的客户端地址: {addr}")]
    InvalidClientAddr { addr: String },
}

/// 结果类型别名
pub type Result<T> = std::result::Result<T, GslbError>;
