//! 日志系统模块
//!
//! 基于tracing的结构化日志初始化，支持级别过滤与JSON格式输出

use std::sync::{Mutex, OnceLock};
use tracing_subscriber::{fmt, prelude::*, registry, EnvFilter};

/// 日志配置结构
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// 日志级别（error/warn/info/debug/trace）
    pub level: String,
    /// 是否使用JSON格式
    pub json_format: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
        }
    }
}

/// 全局初始化状态，进程内只初始化一次
static LOGGING_STATE: OnceLock<Mutex<Option<Result<(), String>>>> = OnceLock::new();

/// 初始化日志系统
///
/// 线程安全的单次初始化，重复调用返回首次初始化的结果；
/// 同时桥接log宏到tracing，统一两套生态的输出。
///
/// # 参数
/// * `config` - 日志配置
///
/// # 返回
/// * `anyhow::Result<()>` - 初始化结果
pub fn setup_logging(config: &LogConfig) -> anyhow::Result<()> {
    let state = LOGGING_STATE.get_or_init(|| Mutex::new(None));
    let mut guard = state.lock().unwrap_or_else(|e| e.into_inner());

    if let Some(previous) = guard.as_ref() {
        return previous
            .clone()
            .map_err(|e| anyhow::anyhow!("日志系统之前初始化失败: {}", e));
    }

    let result = perform_initialization(config);
    *guard = Some(result.as_ref().map(|_| ()).map_err(|e| e.to_string()));
    result
}

fn perform_initialization(config: &LogConfig) -> anyhow::Result<()> {
    // log宏到tracing的桥接
    tracing_log::LogTracer::init()
        .map_err(|e| anyhow::anyhow!("LogTracer初始化失败: {}", e))?;

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| anyhow::anyhow!("日志级别无效: {}", e))?;

    let result = if config.json_format {
        let fmt_layer = fmt::layer()
            .json()
            .with_timer(fmt::time::ChronoUtc::rfc_3339());
        registry().with(env_filter).with(fmt_layer).try_init()
    } else {
        let fmt_layer = fmt::layer()
            .with_timer(fmt::time::ChronoUtc::rfc_3339())
            .with_ansi(true);
        registry().with(env_filter).with(fmt_layer).try_init()
    };

    result.map_err(|e| anyhow::anyhow!("tracing subscriber初始化失败: {}", e))?;
    tracing::info!("日志系统初始化完成");
    Ok(())
}
