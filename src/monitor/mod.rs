//! 健康探测器模块
//!
//! 提供封闭的三种探测策略：TCP连接、TCP内容匹配、HTTP/S状态码。
//! 探测失败永远以 `ProbeOutcome` 数据形式返回，不会作为错误越过探测边界。

pub mod http;
pub mod tcp;

use crate::config::MonitorConfig;
use crate::error::{ConfigError, Result};
use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

pub use http::HttpMonitor;
pub use tcp::TcpMonitor;

/// 单次探测的结果
#[derive(Debug, Clone)]
pub struct ProbeOutcome {
    /// 探测是否通过
    pub success: bool,
    /// 结果原因，用于诊断与日志
    pub reason: String,
    /// 探测耗时
    pub latency: Duration,
}

impl ProbeOutcome {
    /// 构造成功结果
    pub fn pass(latency: Duration) -> Self {
        Self {
            success: true,
            reason: "monitor passed".to_string(),
            latency,
        }
    }

    /// 构造失败结果
    pub fn fail(reason: impl Into<String>, latency: Duration) -> Self {
        Self {
            success: false,
            reason: reason.into(),
            latency,
        }
    }
}

/// 探测器trait，定义探测接口
///
/// 实现必须无共享可变状态，可以被并发、重复调用；
/// 任何网络错误或超时都转化为失败的 `ProbeOutcome`。
#[async_trait]
pub trait Monitor: Send + Sync {
    /// 对目标地址执行一次探测
    ///
    /// # 参数
    /// * `target` - 目标地址与端口
    ///
    /// # 返回
    /// * `ProbeOutcome` - 探测结果，不超过监控器配置的超时返回
    async fn probe(&self, target: SocketAddr) -> ProbeOutcome;

    /// 探测器类型名
    fn kind(&self) -> &'static str;
}

/// 按配置的监控器类型构建探测器（封闭派发，无插件机制）
///
/// # 参数
/// * `config` - 监控器配置，参数范围已在加载时校验
///
/// # 返回
/// * `Result<Arc<dyn Monitor>>` - 探测器实例
pub fn build_monitor(config: &MonitorConfig) -> Result<Arc<dyn Monitor>> {
    let timeout = config.timeout();

    match config {
        MonitorConfig::Tcp { .. } => Ok(Arc::new(TcpMonitor::connect_only(timeout))),
        MonitorConfig::TcpContent { send, match_re, .. } => {
            let monitor = TcpMonitor::with_content(timeout, send.clone(), match_re).map_err(
                |e| ConfigError::ValidationError(format!("匹配正则无效: {}", e)),
            )?;
            Ok(Arc::new(monitor))
        }
        MonitorConfig::Http {
            use_ssl,
            hostname,
            url_path,
            expected_codes,
            ..
        } => {
            let monitor = HttpMonitor::new(
                timeout,
                *use_ssl,
                hostname.clone(),
                url_path.clone(),
                expected_codes.clone(),
            )
            .map_err(|e| ConfigError::ValidationError(format!("HTTP探测器构建失败: {}", e)))?;
            Ok(Arc::new(monitor))
        }
    }
}
