//! 健康状态表实现
//!
//! 系统中唯一被多个角色并发访问的可变结构：调度器写入探测结果，
//! 发布器与诊断接口读取。锁按成员拆分，键集合加载后不再变化。

use crate::config::{Config, ForcedStatus, MemberConfig, PoolConfig};
use crate::monitor::ProbeOutcome;
use crate::state::{HealthStatus, MemberSnapshot, PoolSnapshot, StateSnapshot};
use crate::topology::TopologyMap;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// 单个成员的可变健康状态
#[derive(Debug)]
struct MemberHealth {
    /// 当前状态
    status: HealthStatus,
    /// 强制状态覆盖，设置后不参与探测
    forced: Option<ForcedStatus>,
    /// 判定DOWN前剩余的重试次数
    retries_left: u32,
    /// 连续失败计数
    consecutive_failures: u32,
    /// 连续成功计数
    consecutive_successes: u32,
    /// 最近一次探测完成时间
    last_check: Option<DateTime<Utc>>,
    /// 最近一次探测的结果原因
    last_reason: Option<String>,
    /// 最近一次探测耗时（毫秒）
    last_latency_ms: Option<u64>,
    /// 是否有探测在途（同一成员至多一个）
    in_flight: bool,
    /// 最近一次探测发起时间，用于判定是否到期
    last_probe_issued: Option<Instant>,
}

/// 池内单个成员条目：不可变配置 + 按成员加锁的健康状态
struct MemberEntry {
    config: MemberConfig,
    /// 生效的区域标签（显式配置优先，否则由拓扑映射推导）
    region: Option<String>,
    health: RwLock<MemberHealth>,
}

/// 单个池条目
struct PoolEntry {
    config: PoolConfig,
    members: Vec<MemberEntry>,
    /// 上次记录的池状态，用于池级状态变更日志
    last_status: Mutex<Option<bool>>,
}

/// 到期探测的票据
///
/// 由 [`HealthTable::due_probes`] 签发，签发即置位在途标记；
/// 提交失败时必须用 [`HealthTable::defer_probe`] 归还。
#[derive(Debug, Clone)]
pub struct ProbeTicket {
    /// 池名称
    pub pool: String,
    /// 成员地址（返回给客户端的地址，作为表内键）
    pub member_ip: IpAddr,
    /// 探测目标（探测地址 + 监控端口）
    pub target: SocketAddr,
    /// 签发前的发起时间，归还时恢复
    prev_issued: Option<Instant>,
}

/// 诊断用的成员状态转储
#[derive(Debug, Clone, Serialize)]
pub struct MemberDump {
    /// 池名称
    pub pool: String,
    /// 成员地址
    pub ip: IpAddr,
    /// 成员名称
    pub name: String,
    /// 当前状态
    pub status: HealthStatus,
    /// 是否强制状态
    pub forced: bool,
    /// 剩余重试次数
    pub retries_left: u32,
    /// 连续失败计数
    pub consecutive_failures: u32,
    /// 连续成功计数
    pub consecutive_successes: u32,
    /// 最近一次探测完成时间
    pub last_check: Option<DateTime<Utc>>,
    /// 最近一次探测结果原因
    pub last_reason: Option<String>,
    /// 最近一次探测耗时（毫秒）
    pub last_latency_ms: Option<u64>,
}

/// 健康状态表
///
/// (池, 成员地址) 到健康状态的映射，覆盖全部配置池；
/// 每个配置成员自始至终恰好对应一个条目。
pub struct HealthTable {
    pools: HashMap<String, PoolEntry>,
    /// 自上次发布以来是否发生过状态变更
    changed: AtomicBool,
}

impl HealthTable {
    /// 从配置构建健康状态表
    ///
    /// 强制状态成员的状态在此固定；其余成员初始为Unknown，
    /// 剩余重试次数初始化为所属池监控器的retries。
    ///
    /// # 参数
    /// * `config` - 已验证的配置
    /// * `topology` - 拓扑映射，用于推导twrr成员的区域
    ///
    /// # 返回
    /// * `Self` - 健康状态表实例
    pub fn new(config: &Config, topology: &TopologyMap) -> Self {
        let mut pools = HashMap::new();

        for pool_config in &config.pools {
            let retries = pool_config.monitor.retries();
            let mut members = Vec::with_capacity(pool_config.members.len());

            for member_config in &pool_config.members {
                let region = member_config
                    .region
                    .clone()
                    .or_else(|| topology.get_region(member_config.ip).map(String::from));

                let (status, forced) = match member_config.forced {
                    Some(ForcedStatus::Up) => (HealthStatus::Up, Some(ForcedStatus::Up)),
                    Some(ForcedStatus::Down) => (HealthStatus::Down, Some(ForcedStatus::Down)),
                    None => (HealthStatus::Unknown, None),
                };

                members.push(MemberEntry {
                    config: member_config.clone(),
                    region,
                    health: RwLock::new(MemberHealth {
                        status,
                        forced,
                        retries_left: retries,
                        consecutive_failures: 0,
                        consecutive_successes: 0,
                        last_check: None,
                        last_reason: forced.map(|f| match f {
                            ForcedStatus::Up => "forced UP".to_string(),
                            ForcedStatus::Down => "forced DOWN".to_string(),
                        }),
                        last_latency_ms: None,
                        in_flight: false,
                        last_probe_issued: None,
                    }),
                });
            }

            pools.insert(
                pool_config.name.clone(),
                PoolEntry {
                    config: pool_config.clone(),
                    members,
                    last_status: Mutex::new(None),
                },
            );
        }

        Self {
            pools,
            // 初始置位，保证启动后第一轮发布
            changed: AtomicBool::new(true),
        }
    }

    /// 池数量
    pub fn pool_count(&self) -> usize {
        self.pools.len()
    }

    /// 成员总数
    pub fn member_count(&self) -> usize {
        self.pools.values().map(|p| p.members.len()).sum()
    }

    /// 扫描全表，签发所有到期成员的探测票据
    ///
    /// 到期条件：非强制状态、无在途探测、且从未探测过或距上次发起
    /// 已超过监控间隔。签发时置位在途标记并更新发起时间，保证同一
    /// 成员至多一个在途探测。
    pub async fn due_probes(&self) -> Vec<ProbeTicket> {
        let now = Instant::now();
        let mut tickets = Vec::new();

        for (pool_name, pool) in &self.pools {
            let interval = pool.config.monitor.interval();
            let port = pool.config.monitor.port();

            for member in &pool.members {
                let mut health = member.health.write().await;

                if health.forced.is_some() || health.in_flight {
                    continue;
                }

                let due = match health.last_probe_issued {
                    Some(issued) => now.duration_since(issued) >= interval,
                    None => true,
                };
                if !due {
                    continue;
                }

                let prev_issued = health.last_probe_issued;
                health.in_flight = true;
                health.last_probe_issued = Some(now);

                tickets.push(ProbeTicket {
                    pool: pool_name.clone(),
                    member_ip: member.config.ip,
                    target: SocketAddr::new(member.config.probe_ip(), port),
                    prev_issued,
                });
            }
        }

        tickets
    }

    /// 归还未能提交的票据：清除在途标记并恢复发起时间，
    /// 使该成员在下一tick重新到期
    pub async fn defer_probe(&self, ticket: &ProbeTicket) {
        if let Some(member) = self.member(&ticket.pool, ticket.member_ip) {
            let mut health = member.health.write().await;
            health.in_flight = false;
            health.last_probe_issued = ticket.prev_issued;
        }
    }

    /// 应用一次探测结果，驱动抖动控制状态机
    ///
    /// 状态机：UP/Unknown在连续失败耗尽 `retries + 1` 次后转DOWN；
    /// DOWN在单次成功后立即转UP（不对称：慢判DOWN，快恢复）。
    /// 强制状态成员不参与状态机。
    pub async fn apply_probe(&self, pool_name: &str, member_ip: IpAddr, outcome: &ProbeOutcome) {
        let Some(pool) = self.pools.get(pool_name) else {
            warn!("收到未知池的探测结果: {}", pool_name);
            return;
        };
        let Some(member) = pool
            .members
            .iter()
            .find(|m| m.config.ip == member_ip)
        else {
            warn!("收到未知成员的探测结果: {}/{}", pool_name, member_ip);
            return;
        };

        let retries = pool.config.monitor.retries();
        let mut transition = None;

        {
            let mut health = member.health.write().await;
            health.in_flight = false;
            health.last_check = Some(Utc::now());
            health.last_reason = Some(outcome.reason.clone());
            health.last_latency_ms = Some(outcome.latency.as_millis() as u64);

            // 强制状态成员不应被探测到；防御性忽略
            if health.forced.is_some() {
                return;
            }

            if outcome.success {
                health.consecutive_successes += 1;
                health.consecutive_failures = 0;
                // 成功即恢复重试预算
                health.retries_left = retries;

                if health.status != HealthStatus::Up {
                    health.status = HealthStatus::Up;
                    transition = Some(HealthStatus::Up);
                }
            } else {
                health.consecutive_failures += 1;
                health.consecutive_successes = 0;

                match health.status {
                    // 已经DOWN，无需变更
                    HealthStatus::Down => {}
                    HealthStatus::Up | HealthStatus::Unknown => {
                        if health.retries_left > 0 {
                            health.retries_left -= 1;
                        } else {
                            health.status = HealthStatus::Down;
                            transition = Some(HealthStatus::Down);
                        }
                    }
                }
            }
        }

        if let Some(new_status) = transition {
            self.changed.store(true, Ordering::Release);
            info!(
                "成员状态变更: 池 {} 成员 {}({}) 转为 {}，原因: {}",
                pool_name, member_ip, member.config.name, new_status, outcome.reason
            );
            self.log_pool_status_change(pool_name, pool).await;
        } else {
            debug!(
                "探测完成: 池 {} 成员 {} 结果 {}",
                pool_name,
                member_ip,
                if outcome.success { "通过" } else { "失败" }
            );
        }
    }

    /// 管理接口：设置或清除成员的强制状态覆盖
    ///
    /// 设置强制状态后该成员不再参与探测；清除后恢复为Unknown并
    /// 重新进入探测调度。
    ///
    /// # 返回
    /// * `Result<(), String>` - 池或成员不存在时返回错误信息
    pub async fn force_status(
        &self,
        pool_name: &str,
        member_ip: IpAddr,
        forced: Option<ForcedStatus>,
    ) -> Result<(), String> {
        let pool = self
            .pools
            .get(pool_name)
            .ok_or_else(|| format!("未知的池: {}", pool_name))?;
        let member = pool
            .members
            .iter()
            .find(|m| m.config.ip == member_ip)
            .ok_or_else(|| format!("池 {} 中没有成员 {}", pool_name, member_ip))?;

        let retries = pool.config.monitor.retries();

        {
            let mut health = member.health.write().await;
            health.forced = forced;
            match forced {
                Some(ForcedStatus::Up) => {
                    health.status = HealthStatus::Up;
                    health.last_reason = Some("forced UP".to_string());
                }
                Some(ForcedStatus::Down) => {
                    health.status = HealthStatus::Down;
                    health.last_reason = Some("forced DOWN".to_string());
                }
                None => {
                    health.status = HealthStatus::Unknown;
                    health.retries_left = retries;
                    health.consecutive_failures = 0;
                    health.consecutive_successes = 0;
                    health.last_probe_issued = None;
                    health.last_reason = Some("forced status cleared".to_string());
                }
            }
        }

        self.changed.store(true, Ordering::Release);
        info!(
            "强制状态变更: 池 {} 成员 {} 设置为 {:?}",
            pool_name, member_ip, forced
        );
        self.log_pool_status_change(pool_name, pool).await;
        Ok(())
    }

    /// 取出并清除状态变更标记，由发布器轮询
    pub fn take_changed(&self) -> bool {
        self.changed.swap(false, Ordering::AcqRel)
    }

    /// 池状态：任一权重大于0的成员UP即为true
    pub async fn pool_status(&self, pool_name: &str) -> Option<bool> {
        let pool = self.pools.get(pool_name)?;
        Some(Self::compute_pool_status(pool).await)
    }

    async fn compute_pool_status(pool: &PoolEntry) -> bool {
        for member in &pool.members {
            if member.config.weight == 0 {
                continue;
            }
            if member.health.read().await.status.is_healthy() {
                return true;
            }
        }
        false
    }

    /// 池状态变更时产生一条日志
    async fn log_pool_status_change(&self, pool_name: &str, pool: &PoolEntry) {
        let status = Self::compute_pool_status(pool).await;
        let mut last = pool.last_status.lock().unwrap_or_else(|e| e.into_inner());
        if *last != Some(status) {
            info!(
                "池状态变更: 池 {} 转为 {}",
                pool_name,
                if status { "UP" } else { "DOWN" }
            );
            *last = Some(status);
        }
    }

    /// 构建当前状态的不可变快照
    pub async fn snapshot(&self) -> StateSnapshot {
        let mut pools = HashMap::with_capacity(self.pools.len());

        for (pool_name, pool) in &self.pools {
            let mut members = Vec::with_capacity(pool.members.len());

            for member in &pool.members {
                let health = member.health.read().await;
                members.push(MemberSnapshot {
                    ip: member.config.ip,
                    name: member.config.name.clone(),
                    weight: member.config.weight,
                    region: member.region.clone(),
                    status: health.status,
                    forced: health.forced.is_some(),
                });
            }

            pools.insert(
                pool_name.clone(),
                PoolSnapshot {
                    status: Self::compute_pool_status(pool).await,
                    lb_method: pool.config.lb_method,
                    fallback: pool.config.fallback,
                    max_addrs_returned: pool.config.max_addrs_returned,
                    members,
                },
            );
        }

        StateSnapshot {
            timestamp: Utc::now(),
            pools,
        }
    }

    /// 诊断接口：转储全表状态
    pub async fn dump(&self) -> Vec<MemberDump> {
        let mut dumps = Vec::with_capacity(self.member_count());

        for (pool_name, pool) in &self.pools {
            for member in &pool.members {
                let health = member.health.read().await;
                dumps.push(MemberDump {
                    pool: pool_name.clone(),
                    ip: member.config.ip,
                    name: member.config.name.clone(),
                    status: health.status,
                    forced: health.forced.is_some(),
                    retries_left: health.retries_left,
                    consecutive_failures: health.consecutive_failures,
                    consecutive_successes: health.consecutive_successes,
                    last_check: health.last_check,
                    last_reason: health.last_reason.clone(),
                    last_latency_ms: health.last_latency_ms,
                });
            }
        }

        dumps.sort_by(|a, b| (a.pool.as_str(), a.ip).cmp(&(b.pool.as_str(), b.ip)));
        dumps
    }

    fn member(&self, pool_name: &str, member_ip: IpAddr) -> Option<&MemberEntry> {
        self.pools
            .get(pool_name)?
            .members
            .iter()
            .find(|m| m.config.ip == member_ip)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Fallback, GlobalConfig, LbMethod, MemberConfig, MonitorBase, MonitorConfig};
    use std::time::Duration;

    fn member(ip: &str, name: &str, weight: u32, forced: Option<ForcedStatus>) -> MemberConfig {
        MemberConfig {
            ip: ip.parse().unwrap(),
            check_ip: None,
            name: name.to_string(),
            weight,
            region: None,
            forced,
        }
    }

    fn table_with_retries(retries: u32) -> HealthTable {
        let config = Config {
            global: GlobalConfig::default(),
            pools: vec![PoolConfig {
                name: "myapp".to_string(),
                lb_method: LbMethod::Wrr,
                fallback: Fallback::Any,
                max_addrs_returned: 2,
                monitor: MonitorConfig::Tcp {
                    port: 80,
                    base: MonitorBase {
                        interval_secs: 10,
                        timeout_secs: 1.0,
                        retries,
                    },
                },
                members: vec![
                    member("10.0.0.1", "web1", 1, None),
                    member("10.0.0.2", "web2", 1, Some(ForcedStatus::Down)),
                ],
            }],
            topology: Default::default(),
        };
        HealthTable::new(&config, &TopologyMap::default())
    }

    fn ok() -> ProbeOutcome {
        ProbeOutcome::pass(Duration::from_millis(5))
    }

    fn failed() -> ProbeOutcome {
        ProbeOutcome::fail("connection refused", Duration::from_millis(5))
    }

    async fn status_of(table: &HealthTable, ip: &str) -> HealthStatus {
        let dump = table.dump().await;
        dump.iter()
            .find(|d| d.ip == ip.parse::<IpAddr>().unwrap())
            .unwrap()
            .status
    }

    #[tokio::test]
    async fn test_flap_control_down_after_retries_plus_one() {
        // retries=2：前两次失败只扣减预算，第三次失败转DOWN
        let table = table_with_retries(2);
        let ip: IpAddr = "10.0.0.1".parse().unwrap();

        table.apply_probe("myapp", ip, &failed()).await;
        assert_eq!(status_of(&table, "10.0.0.1").await, HealthStatus::Unknown);

        table.apply_probe("myapp", ip, &failed()).await;
        assert_eq!(status_of(&table, "10.0.0.1").await, HealthStatus::Unknown);

        table.apply_probe("myapp", ip, &failed()).await;
        assert_eq!(status_of(&table, "10.0.0.1").await, HealthStatus::Down);
    }

    #[tokio::test]
    async fn test_flap_control_single_success_recovers() {
        let table = table_with_retries(0);
        let ip: IpAddr = "10.0.0.1".parse().unwrap();

        table.apply_probe("myapp", ip, &failed()).await;
        assert_eq!(status_of(&table, "10.0.0.1").await, HealthStatus::Down);

        // DOWN状态下单次成功立即恢复UP
        table.apply_probe("myapp", ip, &ok()).await;
        assert_eq!(status_of(&table, "10.0.0.1").await, HealthStatus::Up);
    }

    #[tokio::test]
    async fn test_flap_control_success_resets_budget() {
        // retries=2：两次失败后一次成功，重试预算应完全恢复
        let table = table_with_retries(2);
        let ip: IpAddr = "10.0.0.1".parse().unwrap();

        table.apply_probe("myapp", ip, &failed()).await;
        table.apply_probe("myapp", ip, &failed()).await;
        table.apply_probe("myapp", ip, &ok()).await;
        assert_eq!(status_of(&table, "10.0.0.1").await, HealthStatus::Up);

        // 再次需要完整的 retries+1 次连续失败才DOWN
        table.apply_probe("myapp", ip, &failed()).await;
        table.apply_probe("myapp", ip, &failed()).await;
        assert_eq!(status_of(&table, "10.0.0.1").await, HealthStatus::Up);
        table.apply_probe("myapp", ip, &failed()).await;
        assert_eq!(status_of(&table, "10.0.0.1").await, HealthStatus::Down);
    }

    #[tokio::test]
    async fn test_forced_member_never_scheduled_nor_transitions() {
        let table = table_with_retries(0);
        let forced_ip: IpAddr = "10.0.0.2".parse().unwrap();

        // 强制成员不出现在到期列表中
        let tickets = table.due_probes().await;
        assert!(tickets.iter().all(|t| t.member_ip != forced_ip));

        // 即使收到探测结果也不变更状态
        table.apply_probe("myapp", forced_ip, &ok()).await;
        assert_eq!(status_of(&table, "10.0.0.2").await, HealthStatus::Down);
    }

    #[tokio::test]
    async fn test_at_most_one_in_flight() {
        let table = table_with_retries(0);

        let first = table.due_probes().await;
        assert_eq!(first.len(), 1);

        // 在途期间再次扫描不会重复签发
        let second = table.due_probes().await;
        assert!(second.is_empty());

        // 结果应用后恢复可调度（间隔判定仍然生效）
        table
            .apply_probe("myapp", first[0].member_ip, &ok())
            .await;
        let third = table.due_probes().await;
        assert!(third.is_empty());
    }

    #[tokio::test]
    async fn test_defer_probe_reschedules_next_tick() {
        let table = table_with_retries(0);

        let tickets = table.due_probes().await;
        assert_eq!(tickets.len(), 1);

        // 提交失败归还票据后，下一次扫描立即重新到期
        table.defer_probe(&tickets[0]).await;
        let again = table.due_probes().await;
        assert_eq!(again.len(), 1);
        assert_eq!(again[0].member_ip, tickets[0].member_ip);
    }

    #[tokio::test]
    async fn test_pool_status_aggregation() {
        let table = table_with_retries(0);
        let ip: IpAddr = "10.0.0.1".parse().unwrap();

        // 初始Unknown：池DOWN
        assert_eq!(table.pool_status("myapp").await, Some(false));

        table.apply_probe("myapp", ip, &ok()).await;
        assert_eq!(table.pool_status("myapp").await, Some(true));

        table.apply_probe("myapp", ip, &failed()).await;
        assert_eq!(table.pool_status("myapp").await, Some(false));

        assert_eq!(table.pool_status("nonexistent").await, None);
    }

    #[tokio::test]
    async fn test_changed_flag() {
        let table = table_with_retries(0);
        let ip: IpAddr = "10.0.0.1".parse().unwrap();

        // 初始置位保证首轮发布
        assert!(table.take_changed());
        assert!(!table.take_changed());

        // 无状态变更的探测不置位
        table.apply_probe("myapp", ip, &failed()).await;
        assert!(table.take_changed());
        table.apply_probe("myapp", ip, &failed()).await;
        assert!(!table.take_changed());
    }

    #[tokio::test]
    async fn test_force_status_override() {
        let table = table_with_retries(0);
        let ip: IpAddr = "10.0.0.1".parse().unwrap();

        table
            .force_status("myapp", ip, Some(ForcedStatus::Up))
            .await
            .unwrap();
        assert_eq!(status_of(&table, "10.0.0.1").await, HealthStatus::Up);

        // 强制期间不参与调度
        assert!(table.due_probes().await.is_empty());

        // 清除后恢复Unknown并重新进入调度
        table.force_status("myapp", ip, None).await.unwrap();
        assert_eq!(status_of(&table, "10.0.0.1").await, HealthStatus::Unknown);
        assert_eq!(table.due_probes().await.len(), 1);

        assert!(table
            .force_status("unknown", ip, Some(ForcedStatus::Up))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_snapshot_contents() {
        let table = table_with_retries(0);
        let ip: IpAddr = "10.0.0.1".parse().unwrap();
        table.apply_probe("myapp", ip, &ok()).await;

        let snapshot = table.snapshot().await;
        let pool = &snapshot.pools["myapp"];
        assert!(pool.status);
        assert_eq!(pool.lb_method, LbMethod::Wrr);
        assert_eq!(pool.max_addrs_returned, 2);
        assert_eq!(pool.members.len(), 2);
        // 成员顺序与配置一致
        assert_eq!(pool.members[0].name, "web1");
        assert_eq!(pool.members[0].status, HealthStatus::Up);
        assert!(pool.members[1].forced);
    }

    #[tokio::test]
    async fn test_every_member_has_exactly_one_entry() {
        let table = table_with_retries(0);
        assert_eq!(table.pool_count(), 1);
        assert_eq!(table.member_count(), 2);
        assert_eq!(table.dump().await.len(), 2);
    }
}
