//! HTTP/S探测器实现
//!
//! 对目标地址发起GET请求，按状态码集合判定健康，支持TLS与SNI

use crate::monitor::{Monitor, ProbeOutcome};
use async_trait::async_trait;
use reqwest::Client;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::time::timeout;

/// HTTP/S探测器实现
pub struct HttpMonitor {
    /// 不带hostname时使用的共享客户端
    client: Client,
    /// 单次探测的总超时
    probe_timeout: Duration,
    /// 是否使用TLS
    use_ssl: bool,
    /// Host头/SNI值
    hostname: Option<String>,
    /// 请求路径
    url_path: String,
    /// 允许的状态码集合
    expected_codes: Vec<u16>,
}

impl HttpMonitor {
    /// 创建新的HTTP探测器
    ///
    /// # 参数
    /// * `probe_timeout` - 单次探测的总超时
    /// * `use_ssl` - 是否使用TLS
    /// * `hostname` - Host头/SNI值，可选
    /// * `url_path` - 请求路径
    /// * `expected_codes` - 允许的状态码集合
    ///
    /// # 返回
    /// * `Result<Self, reqwest::Error>` - 探测器实例
    pub fn new(
        probe_timeout: Duration,
        use_ssl: bool,
        hostname: Option<String>,
        url_path: String,
        expected_codes: Vec<u16>,
    ) -> Result<Self, reqwest::Error> {
        let client = Self::build_client(probe_timeout, None)?;

        let url_path = if url_path.starts_with('/') {
            url_path
        } else {
            format!("/{}", url_path)
        };

        Ok(Self {
            client,
            probe_timeout,
            use_ssl,
            hostname,
            url_path,
            expected_codes,
        })
    }

    /// 构建reqwest客户端
    ///
    /// 健康探测直连成员IP，证书通常不覆盖该IP，因此不校验证书；
    /// 设置了hostname时通过resolve覆盖把SNI/Host指向目标地址。
    fn build_client(
        probe_timeout: Duration,
        resolve: Option<(&str, SocketAddr)>,
    ) -> Result<Client, reqwest::Error> {
        let mut builder = Client::builder()
            .timeout(probe_timeout)
            .danger_accept_invalid_certs(true)
            .user_agent(format!("{}/{}", crate::APP_NAME, crate::VERSION));

        if let Some((hostname, addr)) = resolve {
            builder = builder.resolve(hostname, addr);
        }

        builder.build()
    }

    /// 目标的探测URL
    fn probe_url(&self, target: SocketAddr) -> String {
        let scheme = if self.use_ssl { "https" } else { "http" };
        match &self.hostname {
            Some(hostname) => format!(
                "{}://{}:{}{}",
                scheme,
                hostname,
                target.port(),
                self.url_path
            ),
            None => format!("{}://{}{}", scheme, target, self.url_path),
        }
    }

    /// 执行一次GET并按状态码判定
    async fn run(&self, target: SocketAddr) -> ProbeOutcome {
        let start = Instant::now();
        let url = self.probe_url(target);

        // hostname存在时需要针对目标地址做resolve覆盖，逐次构建客户端
        let response = match &self.hostname {
            Some(hostname) => {
                let client = match Self::build_client(self.probe_timeout, Some((hostname, target)))
                {
                    Ok(client) => client,
                    Err(e) => {
                        return ProbeOutcome::fail(
                            format!("HTTP客户端构建失败: {}", e),
                            start.elapsed(),
                        )
                    }
                };
                client.get(&url).send().await
            }
            None => self.client.get(&url).send().await,
        };

        match response {
            Ok(response) => {
                let status = response.status().as_u16();
                if self.expected_codes.contains(&status) {
                    ProbeOutcome::pass(start.elapsed())
                } else {
                    ProbeOutcome::fail(
                        format!("HTTP状态码不在允许集合内: {}", status),
                        start.elapsed(),
                    )
                }
            }
            Err(e) => ProbeOutcome::fail(Self::format_request_error(&e), start.elapsed()),
        }
    }

    /// 归一化请求错误文本，便于日志与诊断
    fn format_request_error(error: &reqwest::Error) -> String {
        if error.is_timeout() {
            "请求超时".to_string()
        } else if error.is_connect() {
            "连接失败".to_string()
        } else {
            let error_str = error.to_string();
            if error_str.contains("certificate")
                || error_str.contains("tls")
                || error_str.contains("ssl")
            {
                "TLS握手失败".to_string()
            } else {
                format!("请求失败: {}", error_str)
            }
        }
    }
}

#[async_trait]
impl Monitor for HttpMonitor {
    async fn probe(&self, target: SocketAddr) -> ProbeOutcome {
        let start = Instant::now();

        // 外层再兜一道超时，保证探测边界不被慢响应拖住
        match timeout(self.probe_timeout, self.run(target)).await {
            Ok(outcome) => outcome,
            Err(_) => ProbeOutcome::fail("探测超时", start.elapsed()),
        }
    }

    fn kind(&self) -> &'static str {
        "http"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn monitor_for(codes: Vec<u16>) -> HttpMonitor {
        HttpMonitor::new(
            Duration::from_secs(2),
            false,
            None,
            "/healthz".to_string(),
            codes,
        )
        .unwrap()
    }

    fn server_addr(server: &mockito::ServerGuard) -> SocketAddr {
        server.host_with_port().parse().unwrap()
    }

    #[tokio::test]
    async fn test_http_status_in_expected_set() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/healthz")
            .with_status(200)
            .create_async()
            .await;

        let monitor = monitor_for(vec![200, 204]);
        let outcome = monitor.probe(server_addr(&server)).await;
        assert!(outcome.success);
    }

    #[tokio::test]
    async fn test_http_status_not_expected() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/healthz")
            .with_status(503)
            .create_async()
            .await;

        let monitor = monitor_for(vec![200]);
        let outcome = monitor.probe(server_addr(&server)).await;
        assert!(!outcome.success);
        assert!(outcome.reason.contains("503"));
    }

    #[tokio::test]
    async fn test_http_non_200_can_be_allowed() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/healthz")
            .with_status(301)
            .create_async()
            .await;

        let monitor = monitor_for(vec![301]);
        let outcome = monitor.probe(server_addr(&server)).await;
        assert!(outcome.success);
    }

    #[tokio::test]
    async fn test_http_connect_failure_is_failure() {
        // 无监听者的端口
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let monitor = monitor_for(vec![200]);
        let outcome = monitor.probe(addr).await;
        assert!(!outcome.success);
    }

    #[test]
    fn test_probe_url_formats() {
        let monitor = HttpMonitor::new(
            Duration::from_secs(1),
            false,
            None,
            "healthz".to_string(),
            vec![200],
        )
        .unwrap();
        // 路径自动补前导斜杠
        let addr: SocketAddr = "10.0.0.1:8080".parse().unwrap();
        assert_eq!(monitor.probe_url(addr), "http://10.0.0.1:8080/healthz");

        let monitor = HttpMonitor::new(
            Duration::from_secs(1),
            true,
            Some("www.example.com".to_string()),
            "/".to_string(),
            vec![200],
        )
        .unwrap();
        assert_eq!(
            monitor.probe_url(addr),
            "https://www.example.com:8080/"
        );
    }
}
