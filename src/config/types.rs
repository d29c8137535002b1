//! 配置数据结构定义
//!
//! 定义池、成员、监控器与拓扑的配置结构体和验证逻辑

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::IpAddr;
use std::time::Duration;

/// 池/成员/区域名称的最大长度
pub const MAX_NAME_LEN: usize = 256;
/// 成员权重上限
pub const MAX_MEMBER_WEIGHT: u32 = 99;
/// 单次应答返回地址数量的硬上限
pub const MAX_ADDRS_CEILING: usize = 1024;
/// 监控间隔允许范围（秒）
pub const MIN_INTERVAL_SECS: u64 = 1;
pub const MAX_INTERVAL_SECS: u64 = 3600;
/// 监控超时允许范围（秒）
pub const MIN_TIMEOUT_SECS: f64 = 0.1;
pub const MAX_TIMEOUT_SECS: f64 = 5.0;
/// 监控重试次数上限
pub const MAX_RETRIES: u32 = 5;
/// TCP内容匹配正则的最大长度
pub const MAX_MATCH_RE_LEN: usize = 128;
/// TCP发送串的最大长度
pub const MAX_SEND_LEN: usize = 256;
/// HTTP路径的最大长度
pub const MAX_URL_PATH_LEN: usize = 256;

/// 主配置结构，包含全局配置、池列表和拓扑映射
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// 全局配置项
    #[serde(default)]
    pub global: GlobalConfig,
    /// 池配置列表
    pub pools: Vec<PoolConfig>,
    /// 拓扑配置：区域 -> CIDR 列表
    #[serde(default)]
    pub topology: HashMap<String, Vec<String>>,
}

/// 全局配置结构
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GlobalConfig {
    /// 调度器tick间隔（毫秒，亚秒级）
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    /// 工作池最小并发数
    #[serde(default = "default_min_workers")]
    pub min_workers: usize,
    /// 工作池最大并发数
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    /// 探测任务队列容量
    #[serde(default = "default_job_queue_capacity")]
    pub job_queue_capacity: usize,
    /// 任务提交的有界等待时间（毫秒），超过则延后到下一tick
    #[serde(default = "default_submit_wait_ms")]
    pub submit_wait_ms: u64,
    /// 多余worker的空闲回收时间（秒）
    #[serde(default = "default_worker_idle_timeout")]
    pub worker_idle_timeout_secs: u64,
    /// 状态发布周期（秒）
    #[serde(default = "default_publish_interval")]
    pub publish_interval_seconds: u64,
    /// 解析器快照同步周期（秒）
    #[serde(default = "default_sync_interval")]
    pub snapshot_sync_interval_seconds: u64,
    /// 快照文件路径（文件存储后端）
    #[serde(default = "default_snapshot_path")]
    pub snapshot_path: String,
    /// 拓扑匹配结果小于max_addrs时的补齐策略
    #[serde(default)]
    pub topology_fill: TopologyFill,
    /// 日志级别
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval_ms(),
            min_workers: default_min_workers(),
            max_workers: default_max_workers(),
            job_queue_capacity: default_job_queue_capacity(),
            submit_wait_ms: default_submit_wait_ms(),
            worker_idle_timeout_secs: default_worker_idle_timeout(),
            publish_interval_seconds: default_publish_interval(),
            snapshot_sync_interval_seconds: default_sync_interval(),
            snapshot_path: default_snapshot_path(),
            topology_fill: TopologyFill::default(),
            log_level: default_log_level(),
        }
    }
}

/// 拓扑匹配表不足max_addrs时的补齐策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TopologyFill {
    /// 只返回区域内成员（默认，与上游分发行为一致）
    #[default]
    RegionOnly,
    /// 不足时从默认轮转表中补齐未选中的地址
    FillRemaining,
}

/// 负载均衡方法
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LbMethod {
    /// 加权轮询
    Wrr,
    /// 拓扑加权轮询
    Twrr,
    /// 故障转移组（主备顺序）
    Fogroup,
}

impl std::fmt::Display for LbMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LbMethod::Wrr => write!(f, "wrr"),
            LbMethod::Twrr => write!(f, "twrr"),
            LbMethod::Fogroup => write!(f, "fogroup"),
        }
    }
}

/// 池内所有成员DOWN时的回退策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Fallback {
    /// 忽略健康状态，在全部配置成员间分发
    #[default]
    Any,
    /// 拒绝查询
    Refuse,
    /// 返回显式的空成功应答
    Nodata,
}

/// 强制状态覆盖
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForcedStatus {
    /// 强制UP，不探测
    Up,
    /// 强制DOWN，不探测
    Down,
}

/// 池配置结构
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// 池名称
    pub name: String,
    /// 负载均衡方法
    pub lb_method: LbMethod,
    /// 回退策略
    #[serde(default)]
    pub fallback: Fallback,
    /// 单次应答最多返回的地址数
    #[serde(default = "default_max_addrs")]
    pub max_addrs_returned: usize,
    /// 监控器配置（每个池恰好一个）
    pub monitor: MonitorConfig,
    /// 成员列表，顺序即fogroup的主备顺序
    pub members: Vec<MemberConfig>,
}

/// 成员配置结构
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemberConfig {
    /// 返回给客户端的地址
    pub ip: IpAddr,
    /// 探测地址，不设置时与ip相同
    pub check_ip: Option<IpAddr>,
    /// 成员名称
    pub name: String,
    /// 权重，0表示禁用
    #[serde(default = "default_weight")]
    pub weight: u32,
    /// 拓扑区域标签
    pub region: Option<String>,
    /// 强制状态，设置后该成员不参与探测
    pub forced: Option<ForcedStatus>,
}

impl MemberConfig {
    /// 实际的探测地址
    pub fn probe_ip(&self) -> IpAddr {
        self.check_ip.unwrap_or(self.ip)
    }
}

/// 监控器公共参数
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MonitorBase {
    /// 探测间隔（秒）
    #[serde(default = "default_monitor_interval")]
    pub interval_secs: u64,
    /// 探测超时（秒，支持亚秒）
    #[serde(default = "default_monitor_timeout")]
    pub timeout_secs: f64,
    /// 判定DOWN前允许的重试次数
    #[serde(default = "default_monitor_retries")]
    pub retries: u32,
}

impl Default for MonitorBase {
    fn default() -> Self {
        Self {
            interval_secs: default_monitor_interval(),
            timeout_secs: default_monitor_timeout(),
            retries: default_monitor_retries(),
        }
    }
}

/// 监控器配置，封闭的三种探测策略
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MonitorConfig {
    /// TCP连接探测：timeout内完成连接即成功
    Tcp {
        /// 目标端口
        port: u16,
        #[serde(flatten, default)]
        base: MonitorBase,
    },
    /// TCP内容探测：可选发送字节串，读取响应并匹配正则
    TcpContent {
        /// 目标端口
        port: u16,
        /// 连接后发送的文本
        send: Option<String>,
        /// 在响应中搜索的正则（大小写不敏感）
        match_re: String,
        #[serde(flatten, default)]
        base: MonitorBase,
    },
    /// HTTP/S状态码探测
    Http {
        /// 是否使用TLS
        #[serde(default)]
        use_ssl: bool,
        /// Host头/SNI值
        hostname: Option<String>,
        /// 请求路径
        #[serde(default = "default_url_path")]
        url_path: String,
        /// 端口，缺省为80（TLS时443）
        port: Option<u16>,
        /// 允许的状态码集合
        #[serde(default = "default_expected_codes")]
        expected_codes: Vec<u16>,
        #[serde(flatten, default)]
        base: MonitorBase,
    },
}

impl MonitorConfig {
    /// 监控器公共参数
    pub fn base(&self) -> &MonitorBase {
        match self {
            MonitorConfig::Tcp { base, .. } => base,
            MonitorConfig::TcpContent { base, .. } => base,
            MonitorConfig::Http { base, .. } => base,
        }
    }

    /// 探测间隔
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.base().interval_secs)
    }

    /// 探测超时
    pub fn timeout(&self) -> Duration {
        Duration::from_secs_f64(self.base().timeout_secs)
    }

    /// 重试次数
    pub fn retries(&self) -> u32 {
        self.base().retries
    }

    /// 实际探测端口，HTTP缺省为80/443
    pub fn port(&self) -> u16 {
        match self {
            MonitorConfig::Tcp { port, .. } => *port,
            MonitorConfig::TcpContent { port, .. } => *port,
            MonitorConfig::Http { port, use_ssl, .. } => {
                port.unwrap_or(if *use_ssl { 443 } else { 80 })
            }
        }
    }

    /// 监控器类型名，用于日志与快照
    pub fn kind_name(&self) -> &'static str {
        match self {
            MonitorConfig::Tcp { .. } => "tcp",
            MonitorConfig::TcpContent { .. } => "tcp_content",
            MonitorConfig::Http { .. } => "http",
        }
    }
}

// 默认值函数
fn default_tick_interval_ms() -> u64 {
    200
}
fn default_min_workers() -> usize {
    2
}
fn default_max_workers() -> usize {
    50
}
fn default_job_queue_capacity() -> usize {
    1024
}
fn default_submit_wait_ms() -> u64 {
    50
}
fn default_worker_idle_timeout() -> u64 {
    10
}
fn default_publish_interval() -> u64 {
    1
}
fn default_sync_interval() -> u64 {
    1
}
fn default_snapshot_path() -> String {
    "gslb_state.json".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_max_addrs() -> usize {
    1
}
fn default_weight() -> u32 {
    1
}
fn default_monitor_interval() -> u64 {
    10
}
fn default_monitor_timeout() -> f64 {
    1.0
}
fn default_monitor_retries() -> u32 {
    2
}
fn default_url_path() -> String {
    "/".to_string()
}
fn default_expected_codes() -> Vec<u16> {
    vec![200]
}

/// 验证监控器参数范围
fn validate_monitor(pool_name: &str, monitor: &MonitorConfig) -> Result<(), String> {
    let base = monitor.base();

    if !(MIN_INTERVAL_SECS..=MAX_INTERVAL_SECS).contains(&base.interval_secs) {
        return Err(format!(
            "池 {} 的探测间隔 {} 必须在 {}-{} 秒之间",
            pool_name, base.interval_secs, MIN_INTERVAL_SECS, MAX_INTERVAL_SECS
        ));
    }

    // 取反写法使NaN也落入拒绝分支，超时值随后会进入Duration::from_secs_f64
    if !(base.timeout_secs >= MIN_TIMEOUT_SECS && base.timeout_secs <= MAX_TIMEOUT_SECS) {
        return Err(format!(
            "池 {} 的探测超时 {} 必须在 {}-{} 秒之间",
            pool_name, base.timeout_secs, MIN_TIMEOUT_SECS, MAX_TIMEOUT_SECS
        ));
    }

    if base.retries > MAX_RETRIES {
        return Err(format!(
            "池 {} 的重试次数 {} 不能超过 {}",
            pool_name, base.retries, MAX_RETRIES
        ));
    }

    match monitor {
        MonitorConfig::Tcp { port, .. } | MonitorConfig::TcpContent { port, .. } => {
            if *port == 0 {
                return Err(format!("池 {} 的探测端口不能为0", pool_name));
            }
        }
        MonitorConfig::Http { port: Some(p), .. } if *p == 0 => {
            return Err(format!("池 {} 的探测端口不能为0", pool_name));
        }
        _ => {}
    }

    if let MonitorConfig::TcpContent { send, match_re, .. } = monitor {
        if match_re.is_empty() || match_re.len() > MAX_MATCH_RE_LEN {
            return Err(format!(
                "池 {} 的匹配正则长度必须在 1-{} 之间",
                pool_name, MAX_MATCH_RE_LEN
            ));
        }
        if let Err(e) = regex::RegexBuilder::new(match_re).case_insensitive(true).build() {
            return Err(format!("池 {} 的匹配正则无效: {}", pool_name, e));
        }
        if let Some(send) = send {
            if send.len() > MAX_SEND_LEN {
                return Err(format!(
                    "池 {} 的发送串长度不能超过 {}",
                    pool_name, MAX_SEND_LEN
                ));
            }
        }
    }

    if let MonitorConfig::Http {
        url_path,
        hostname,
        expected_codes,
        ..
    } = monitor
    {
        if url_path.len() > MAX_URL_PATH_LEN {
            return Err(format!(
                "池 {} 的URL路径长度不能超过 {}",
                pool_name, MAX_URL_PATH_LEN
            ));
        }
        if let Some(hostname) = hostname {
            if hostname.is_empty() || hostname.len() > MAX_NAME_LEN {
                return Err(format!(
                    "池 {} 的hostname长度必须在 1-{} 之间",
                    pool_name, MAX_NAME_LEN
                ));
            }
        }
        if expected_codes.is_empty() {
            return Err(format!("池 {} 必须指定期望的状态码", pool_name));
        }
        for &code in expected_codes {
            if !(100..=599).contains(&code) {
                return Err(format!("池 {} 的状态码 {} 无效", pool_name, code));
            }
        }
    }

    Ok(())
}

/// 配置验证函数
///
/// 启动前全量校验；任何一项失败都阻止追踪器启动。
///
/// # 参数
/// * `config` - 要验证的配置
///
/// # 返回
/// * `Result<(), String>` - 验证结果，错误时返回错误信息
pub fn validate_config(config: &Config) -> Result<(), String> {
    // 验证全局配置
    if config.global.tick_interval_ms == 0 || config.global.tick_interval_ms >= 1000 {
        return Err("调度器tick间隔必须在 1-999 毫秒之间".to_string());
    }

    if config.global.min_workers == 0 {
        return Err("工作池最小并发数不能为0".to_string());
    }

    if config.global.max_workers < config.global.min_workers {
        return Err("工作池最大并发数不能小于最小并发数".to_string());
    }

    if config.global.job_queue_capacity == 0 {
        return Err("探测任务队列容量不能为0".to_string());
    }

    if config.global.publish_interval_seconds == 0 {
        return Err("状态发布周期不能为0".to_string());
    }

    // 验证日志级别
    if config.global.log_level.parse::<log::LevelFilter>().is_err() {
        return Err(format!(
            "无效的日志级别: {}，支持的级别: off/error/warn/info/debug/trace",
            config.global.log_level
        ));
    }

    // 验证拓扑配置
    for (region, networks) in &config.topology {
        if region == "_default" {
            return Err("区域名称不能使用保留字 _default".to_string());
        }
        if region.is_empty() || region.len() > MAX_NAME_LEN {
            return Err(format!("区域名称 {} 长度必须在 1-{} 之间", region, MAX_NAME_LEN));
        }
        for net in networks {
            if crate::topology::parse_cidr(net).is_none() {
                return Err(format!("区域 {} 的网段 {} 不是有效的CIDR", region, net));
            }
        }
    }

    // 验证池配置
    if config.pools.is_empty() {
        return Err("至少需要配置一个池".to_string());
    }

    let mut seen_pools = std::collections::HashSet::new();
    for pool in &config.pools {
        if pool.name.trim().is_empty() || pool.name.len() > MAX_NAME_LEN {
            return Err(format!("池名称长度必须在 1-{} 之间", MAX_NAME_LEN));
        }

        if !seen_pools.insert(pool.name.as_str()) {
            return Err(format!("池 {} 重复定义", pool.name));
        }

        if !(1..=MAX_ADDRS_CEILING).contains(&pool.max_addrs_returned) {
            return Err(format!(
                "池 {} 的max_addrs_returned {} 必须在 1-{} 之间",
                pool.name, pool.max_addrs_returned, MAX_ADDRS_CEILING
            ));
        }

        validate_monitor(&pool.name, &pool.monitor)?;

        if pool.members.is_empty() {
            return Err(format!("池 {} 必须包含至少一个成员", pool.name));
        }

        let mut seen_ips = std::collections::HashSet::new();
        for member in &pool.members {
            if member.name.trim().is_empty() || member.name.len() > MAX_NAME_LEN {
                return Err(format!(
                    "池 {} 的成员名称长度必须在 1-{} 之间",
                    pool.name, MAX_NAME_LEN
                ));
            }

            if !seen_ips.insert(member.ip) {
                return Err(format!("池 {} 中成员地址 {} 重复", pool.name, member.ip));
            }

            if member.weight > MAX_MEMBER_WEIGHT {
                return Err(format!(
                    "池 {} 的成员 {} 权重 {} 不能超过 {}",
                    pool.name, member.name, member.weight, MAX_MEMBER_WEIGHT
                ));
            }

            if let Some(region) = &member.region {
                if region.is_empty() || region.len() > MAX_NAME_LEN {
                    return Err(format!(
                        "池 {} 的成员 {} 区域标签长度必须在 1-{} 之间",
                        pool.name, member.name, MAX_NAME_LEN
                    ));
                }
            }

            // twrr要求每个成员可以确定区域：显式标签或可由拓扑映射推导
            if pool.lb_method == LbMethod::Twrr && member.region.is_none() {
                let resolvable = config.topology.iter().any(|(_, networks)| {
                    networks.iter().any(|net| {
                        crate::topology::parse_cidr(net)
                            .map(|(addr, prefix)| crate::topology::ip_in_network(member.ip, addr, prefix))
                            .unwrap_or(false)
                    })
                });
                if !resolvable {
                    return Err(format!(
                        "池 {} 使用twrr但无法确定成员 {}({}) 的区域",
                        pool.name, member.name, member.ip
                    ));
                }
            }
        }
    }

    Ok(())
}
