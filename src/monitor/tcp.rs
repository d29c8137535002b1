//! TCP探测器实现
//!
//! 提供TCP连接探测与可选的发送/内容匹配探测

use crate::monitor::{Monitor, ProbeOutcome};
use async_trait::async_trait;
use regex::Regex;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

/// 从响应中读取并参与匹配的最大字节数
pub const MAX_RESPONSE_BYTES: usize = 512;

/// TCP探测器实现
///
/// 无内容匹配时连接成功即通过；配置了匹配正则时，连接后（可选）发送
/// 字节串，读取至多 [`MAX_RESPONSE_BYTES`] 字节并搜索正则。
pub struct TcpMonitor {
    /// 单次探测的总超时
    probe_timeout: Duration,
    /// 连接后发送的字节串
    send_bytes: Option<Vec<u8>>,
    /// 预编译的匹配正则（大小写不敏感）
    match_re: Option<Regex>,
}

impl TcpMonitor {
    /// 创建纯连接探测器
    pub fn connect_only(probe_timeout: Duration) -> Self {
        Self {
            probe_timeout,
            send_bytes: None,
            match_re: None,
        }
    }

    /// 创建内容匹配探测器
    ///
    /// # 参数
    /// * `probe_timeout` - 单次探测的总超时
    /// * `send` - 连接后发送的文本，可选
    /// * `match_re` - 在响应中搜索的正则
    ///
    /// # 返回
    /// * `Result<Self, regex::Error>` - 探测器实例，正则非法时返回错误
    pub fn with_content(
        probe_timeout: Duration,
        send: Option<String>,
        match_re: &str,
    ) -> Result<Self, regex::Error> {
        let compiled = regex::RegexBuilder::new(match_re)
            .case_insensitive(true)
            .build()?;

        Ok(Self {
            probe_timeout,
            send_bytes: send.map(|s| s.into_bytes()),
            match_re: Some(compiled),
        })
    }

    /// 执行探测主体，任何IO错误直接上抛由调用方转成失败结果
    async fn run(&self, target: SocketAddr) -> Result<ProbeOutcome, std::io::Error> {
        let start = Instant::now();

        let mut stream = TcpStream::connect(target).await?;

        if let Some(send_bytes) = &self.send_bytes {
            stream.write_all(send_bytes).await?;
        }

        // 无匹配要求时连接（及发送）成功即通过
        let Some(match_re) = &self.match_re else {
            return Ok(ProbeOutcome::pass(start.elapsed()));
        };

        let mut buf = vec![0u8; MAX_RESPONSE_BYTES];
        let mut filled = 0usize;

        // 读到足够字节、对端关闭或超时为止
        while filled < MAX_RESPONSE_BYTES {
            let n = stream.read(&mut buf[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;

            let text = String::from_utf8_lossy(&buf[..filled]);
            if match_re.is_match(&text) {
                return Ok(ProbeOutcome::pass(start.elapsed()));
            }
        }

        Ok(ProbeOutcome::fail(
            "failed to match the regexp",
            start.elapsed(),
        ))
    }
}

#[async_trait]
impl Monitor for TcpMonitor {
    async fn probe(&self, target: SocketAddr) -> ProbeOutcome {
        let start = Instant::now();

        match timeout(self.probe_timeout, self.run(target)).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => ProbeOutcome::fail(format!("连接失败: {}", e), start.elapsed()),
            Err(_) => ProbeOutcome::fail("探测超时", start.elapsed()),
        }
    }

    fn kind(&self) -> &'static str {
        if self.match_re.is_some() {
            "tcp_content"
        } else {
            "tcp"
        }
    }
}
