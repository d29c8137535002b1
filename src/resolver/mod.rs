//! 负载均衡解析模块
//!
//! 消费发布的健康快照，按池的负载均衡方法与回退策略为每次查询
//! 选出至多max_addrs个地址。与调度进程无直接关系，可运行在独立
//! 进程或主机上，只依赖共享的快照存储。

pub mod dist;

use crate::config::{Config, Fallback, LbMethod, TopologyFill};
use crate::error::ResolveError;
use crate::publish::SnapshotStore;
use crate::state::{HealthStatus, MemberSnapshot, PoolSnapshot, StateSnapshot};
use crate::topology::TopologyMap;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

pub use dist::{DistTable, DistTables};

/// 结果长度的硬上限，与配置校验的上界一致
pub const MAX_ADDRS_CEILING: usize = crate::config::MAX_ADDRS_CEILING;

/// 一次查询的上下文
#[derive(Debug, Clone, Default)]
pub struct QueryContext {
    /// 发起查询的客户端地址，用于拓扑匹配
    pub client_addr: Option<IpAddr>,
    /// 本次查询请求的地址数上限，未指定时用池配置
    pub requested_max: Option<usize>,
}

impl QueryContext {
    /// 从文本形式的客户端地址构建
    ///
    /// # 返回
    /// * `Result<Self, ResolveError>` - 地址无法解析时返回错误
    pub fn from_client_addr(addr: &str) -> Result<Self, ResolveError> {
        let client_addr = addr
            .parse()
            .map_err(|_| ResolveError::InvalidClientAddr {
                addr: addr.to_string(),
            })?;
        Ok(Self {
            client_addr: Some(client_addr),
            requested_max: None,
        })
    }
}

/// 一次查询的结果
///
/// 健康驱动的回退（Refused/NoData）是正常取值，不是错误；
/// 只有调用方错误（未知池、非法地址）才以 `ResolveError` 返回。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// 有序地址列表，长度不超过max_addrs
    Answer(Vec<IpAddr>),
    /// 显式的空成功应答
    NoData,
    /// 拒绝本次查询
    Refused,
}

/// 单个池的运行时状态：快照数据 + 轮转分发表
struct PoolRuntime {
    lb_method: LbMethod,
    fallback: Fallback,
    max_addrs: usize,
    /// 成员快照，配置顺序（fogroup的主备顺序）
    members: Vec<MemberSnapshot>,
    /// 仅含UP成员的分发表
    up: DistTables,
    /// 含全部成员的分发表，回退any时使用
    all: DistTables,
}

impl PoolRuntime {
    fn from_snapshot(snapshot: &PoolSnapshot) -> Self {
        Self {
            lb_method: snapshot.lb_method,
            fallback: snapshot.fallback,
            max_addrs: snapshot.max_addrs_returned,
            up: DistTables::build(&snapshot.members, true),
            all: DistTables::build(&snapshot.members, false),
            members: snapshot.members.clone(),
        }
    }

    fn has_healthy_member(&self) -> bool {
        self.members
            .iter()
            .any(|m| m.weight > 0 && m.status.is_healthy())
    }
}

/// 解析器内部状态，整体在互斥锁下更新
struct ResolverState {
    /// 当前快照的时间戳，用于判断是否需要重建分发表
    snapshot_ts: Option<DateTime<Utc>>,
    /// 上次尝试同步的时间，用于限频
    last_sync: Option<Instant>,
    pools: HashMap<String, PoolRuntime>,
}

/// 负载均衡解析器
pub struct Resolver {
    store: Arc<dyn SnapshotStore>,
    topology: TopologyMap,
    topology_fill: TopologyFill,
    sync_interval: Duration,
    state: Mutex<ResolverState>,
}

impl Resolver {
    /// 创建解析器
    ///
    /// 初始状态从配置构建，所有成员为Unknown（等同全DOWN，触发
    /// 回退策略），直到首次从存储同步到快照。
    ///
    /// # 参数
    /// * `config` - 已验证的配置
    /// * `store` - 发布器写入的快照存储
    ///
    /// # 返回
    /// * `Result<Self>` - 拓扑配置非法时返回配置错误
    pub fn new(config: &Config, store: Arc<dyn SnapshotStore>) -> crate::error::Result<Self> {
        let topology = TopologyMap::from_config(&config.topology)
            .map_err(crate::error::ConfigError::ValidationError)?;

        let mut pools = HashMap::with_capacity(config.pools.len());
        for pool in &config.pools {
            let members: Vec<MemberSnapshot> = pool
                .members
                .iter()
                .map(|m| MemberSnapshot {
                    ip: m.ip,
                    name: m.name.clone(),
                    weight: m.weight,
                    region: m
                        .region
                        .clone()
                        .or_else(|| topology.get_region(m.ip).map(String::from)),
                    status: match m.forced {
                        Some(crate::config::ForcedStatus::Up) => HealthStatus::Up,
                        Some(crate::config::ForcedStatus::Down) => HealthStatus::Down,
                        None => HealthStatus::Unknown,
                    },
                    forced: m.forced.is_some(),
                })
                .collect();

            pools.insert(
                pool.name.clone(),
                PoolRuntime::from_snapshot(&PoolSnapshot {
                    status: false,
                    lb_method: pool.lb_method,
                    fallback: pool.fallback,
                    max_addrs_returned: pool.max_addrs_returned,
                    members,
                }),
            );
        }

        Ok(Self {
            store,
            topology,
            topology_fill: config.global.topology_fill,
            sync_interval: Duration::from_secs(config.global.snapshot_sync_interval_seconds),
            state: Mutex::new(ResolverState {
                snapshot_ts: None,
                last_sync: None,
                pools,
            }),
        })
    }

    /// 解析一次查询
    ///
    /// # 参数
    /// * `pool_name` - 池名称
    /// * `ctx` - 查询上下文
    ///
    /// # 返回
    /// * `Result<Resolution, ResolveError>` - 查询结果；未知池返回错误
    pub async fn resolve(
        &self,
        pool_name: &str,
        ctx: &QueryContext,
    ) -> Result<Resolution, ResolveError> {
        self.maybe_sync().await;

        let mut state = self.state.lock().await;
        let pool = state
            .pools
            .get_mut(pool_name)
            .ok_or_else(|| ResolveError::UnknownPool {
                pool: pool_name.to_string(),
            })?;

        let max = pool
            .max_addrs
            .min(ctx.requested_max.unwrap_or(usize::MAX))
            .min(MAX_ADDRS_CEILING);

        if pool.has_healthy_member() {
            return Ok(Self::answer_healthy(
                pool,
                ctx,
                max,
                &self.topology,
                self.topology_fill,
            ));
        }

        // 回退策略仅在池内零成员UP时生效
        match pool.fallback {
            Fallback::Any => Ok(Self::answer_as_if_up(
                pool,
                ctx,
                max,
                &self.topology,
                self.topology_fill,
            )),
            Fallback::Refuse => Ok(Resolution::Refused),
            Fallback::Nodata => Ok(Resolution::NoData),
        }
    }

    /// 正常路径：在UP成员间按方法分发
    fn answer_healthy(
        pool: &mut PoolRuntime,
        ctx: &QueryContext,
        max: usize,
        topology: &TopologyMap,
        fill: TopologyFill,
    ) -> Resolution {
        match pool.lb_method {
            LbMethod::Wrr => Resolution::Answer(pool.up.default_table.take(max, &[])),
            LbMethod::Twrr => {
                let addrs = Self::topology_answer(&mut pool.up, ctx, max, topology, fill);
                Resolution::Answer(addrs)
            }
            LbMethod::Fogroup => {
                // 主备顺序下第一个UP成员，单地址
                let first = pool
                    .members
                    .iter()
                    .find(|m| m.weight > 0 && m.status.is_healthy());
                match first {
                    Some(member) => Resolution::Answer(vec![member.ip]),
                    None => Resolution::Answer(Vec::new()),
                }
            }
        }
    }

    /// 回退any：无视健康状态，按同样的方法在全部成员间分发
    fn answer_as_if_up(
        pool: &mut PoolRuntime,
        ctx: &QueryContext,
        max: usize,
        topology: &TopologyMap,
        fill: TopologyFill,
    ) -> Resolution {
        match pool.lb_method {
            LbMethod::Wrr => Resolution::Answer(pool.all.default_table.take(max, &[])),
            LbMethod::Twrr => {
                let addrs = Self::topology_answer(&mut pool.all, ctx, max, topology, fill);
                Resolution::Answer(addrs)
            }
            LbMethod::Fogroup => {
                let first = pool.members.iter().find(|m| m.weight > 0);
                match first {
                    Some(member) => Resolution::Answer(vec![member.ip]),
                    None => Resolution::Answer(Vec::new()),
                }
            }
        }
    }

    /// 拓扑分发：客户端区域命中时优先区域表，否则退回默认表
    fn topology_answer(
        tables: &mut DistTables,
        ctx: &QueryContext,
        max: usize,
        topology: &TopologyMap,
        fill: TopologyFill,
    ) -> Vec<IpAddr> {
        let region = ctx
            .client_addr
            .and_then(|addr| topology.get_region(addr))
            .map(String::from);

        let Some(region_table) = region
            .as_deref()
            .and_then(|r| tables.regions.get_mut(r))
        else {
            return tables.default_table.take(max, &[]);
        };

        let mut addrs = region_table.take(max, &[]);
        if fill == TopologyFill::FillRemaining && addrs.len() < max {
            let extra = tables.default_table.take(max - addrs.len(), &addrs);
            addrs.extend(extra);
        }
        addrs
    }

    /// 按限频从存储同步快照，时间戳变化时重建分发表
    ///
    /// 存储不可达或尚无快照时继续以最后已知状态应答，查询永远
    /// 不会单纯因为存储不可用而失败。存储读取在状态锁外进行，
    /// 慢存储不会拖住并发查询；限频窗口内的其他查询直接跳过同步。
    async fn maybe_sync(&self) {
        {
            let mut state = self.state.lock().await;
            let now = Instant::now();
            if let Some(last) = state.last_sync {
                if now.duration_since(last) < self.sync_interval {
                    return;
                }
            }
            // 失败也计入限频，避免每次查询都打到不可用的存储
            state.last_sync = Some(now);
        }

        let snapshot = match self.store.load().await {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => {
                debug!("存储中尚无快照，继续使用当前状态");
                return;
            }
            Err(e) => {
                warn!("快照同步失败，继续使用最后已知状态: {}", e);
                return;
            }
        };

        let mut state = self.state.lock().await;
        if state.snapshot_ts == Some(snapshot.timestamp) {
            return;
        }
        self.apply_snapshot(&mut state, snapshot);
    }

    /// 用新快照整体重建池运行时状态（轮转游标重置）
    fn apply_snapshot(&self, state: &mut ResolverState, snapshot: StateSnapshot) {
        debug!(
            "应用新快照: 时间戳 {}，共 {} 个池",
            snapshot.timestamp,
            snapshot.pools.len()
        );
        state.snapshot_ts = Some(snapshot.timestamp);
        state.pools = snapshot
            .pools
            .iter()
            .map(|(name, pool)| (name.clone(), PoolRuntime::from_snapshot(pool)))
            .collect();
    }

    /// 立即同步一次快照，供启动预热与测试使用
    pub async fn sync_now(&self) {
        {
            let mut state = self.state.lock().await;
            state.last_sync = None;
        }
        self.maybe_sync().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        ForcedStatus, GlobalConfig, MemberConfig, MonitorBase, MonitorConfig, PoolConfig,
    };
    use crate::error::PublishError;
    use crate::publish::MemoryStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn member(ip: &str, weight: u32, region: Option<&str>) -> MemberConfig {
        MemberConfig {
            ip: ip.parse().unwrap(),
            check_ip: None,
            name: format!("m-{}", ip),
            weight,
            region: region.map(String::from),
            forced: None,
        }
    }

    fn config(lb_method: LbMethod, fallback: Fallback, members: Vec<MemberConfig>) -> Config {
        Config {
            global: GlobalConfig {
                snapshot_sync_interval_seconds: 0,
                ..GlobalConfig::default()
            },
            pools: vec![PoolConfig {
                name: "myapp".to_string(),
                lb_method,
                fallback,
                max_addrs_returned: 2,
                monitor: MonitorConfig::Tcp {
                    port: 80,
                    base: MonitorBase::default(),
                },
                members,
            }],
            topology: Default::default(),
        }
    }

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    /// 构建快照：(ip, weight, region, status)
    fn snapshot_with(
        lb_method: LbMethod,
        fallback: Fallback,
        max_addrs: usize,
        members: &[(&str, u32, Option<&str>, HealthStatus)],
    ) -> StateSnapshot {
        let members = members
            .iter()
            .map(|(ip, weight, region, status)| MemberSnapshot {
                ip: ip.parse().unwrap(),
                name: format!("m-{}", ip),
                weight: *weight,
                region: region.map(String::from),
                status: *status,
                forced: false,
            })
            .collect();
        let mut pools = HashMap::new();
        pools.insert(
            "myapp".to_string(),
            PoolSnapshot {
                status: true,
                lb_method,
                fallback,
                max_addrs_returned: max_addrs,
                members,
            },
        );
        StateSnapshot {
            timestamp: Utc::now(),
            pools,
        }
    }

    async fn resolver_with(config: &Config, snapshot: Option<StateSnapshot>) -> Resolver {
        let store = Arc::new(MemoryStore::new());
        if let Some(snapshot) = snapshot {
            store.publish(&snapshot).await.unwrap();
        }
        let resolver = Resolver::new(config, store as Arc<dyn SnapshotStore>).unwrap();
        resolver.sync_now().await;
        resolver
    }

    #[tokio::test]
    async fn test_unknown_pool_is_caller_error() {
        let config = config(LbMethod::Wrr, Fallback::Refuse, vec![member("10.0.0.1", 1, None)]);
        let resolver = resolver_with(&config, None).await;

        let result = resolver.resolve("nope", &QueryContext::default()).await;
        assert!(matches!(result, Err(ResolveError::UnknownPool { .. })));
    }

    #[tokio::test]
    async fn test_no_snapshot_behaves_as_all_down() {
        // 存储为空：成员Unknown，回退refuse生效
        let config = config(LbMethod::Wrr, Fallback::Refuse, vec![member("10.0.0.1", 1, None)]);
        let resolver = resolver_with(&config, None).await;

        let result = resolver
            .resolve("myapp", &QueryContext::default())
            .await
            .unwrap();
        assert_eq!(result, Resolution::Refused);
    }

    #[tokio::test]
    async fn test_wrr_proportional_rotation() {
        let config = config(
            LbMethod::Wrr,
            Fallback::Any,
            vec![member("10.0.0.1", 2, None), member("10.0.0.2", 1, None)],
        );
        let snapshot = snapshot_with(
            LbMethod::Wrr,
            Fallback::Any,
            1,
            &[
                ("10.0.0.1", 2, None, HealthStatus::Up),
                ("10.0.0.2", 1, None, HealthStatus::Up),
            ],
        );
        let resolver = resolver_with(&config, Some(snapshot)).await;

        let mut picks = Vec::new();
        for _ in 0..6 {
            let Resolution::Answer(addrs) = resolver
                .resolve("myapp", &QueryContext::default())
                .await
                .unwrap()
            else {
                panic!("应返回地址列表");
            };
            picks.push(addrs[0]);
        }
        // 确定性轮转，比例等于权重
        assert_eq!(
            picks,
            vec![
                ip("10.0.0.1"),
                ip("10.0.0.1"),
                ip("10.0.0.2"),
                ip("10.0.0.1"),
                ip("10.0.0.1"),
                ip("10.0.0.2"),
            ]
        );
    }

    #[tokio::test]
    async fn test_down_member_excluded() {
        let config = config(
            LbMethod::Wrr,
            Fallback::Any,
            vec![member("10.0.0.1", 1, None), member("10.0.0.2", 1, None)],
        );
        let snapshot = snapshot_with(
            LbMethod::Wrr,
            Fallback::Any,
            2,
            &[
                ("10.0.0.1", 1, None, HealthStatus::Up),
                ("10.0.0.2", 1, None, HealthStatus::Down),
            ],
        );
        let resolver = resolver_with(&config, Some(snapshot)).await;

        let result = resolver
            .resolve("myapp", &QueryContext::default())
            .await
            .unwrap();
        assert_eq!(result, Resolution::Answer(vec![ip("10.0.0.1")]));
    }

    #[tokio::test]
    async fn test_all_down_fallback_scenarios() {
        let down_members = [
            ("10.0.0.1", 1, None, HealthStatus::Down),
            ("10.0.0.2", 1, None, HealthStatus::Down),
            ("10.0.0.3", 1, None, HealthStatus::Down),
        ];

        // any：如同全员健康般返回恰好max_addrs个地址
        let cfg = config(LbMethod::Wrr, Fallback::Any, vec![member("10.0.0.1", 1, None)]);
        let resolver = resolver_with(
            &cfg,
            Some(snapshot_with(LbMethod::Wrr, Fallback::Any, 2, &down_members)),
        )
        .await;
        let Resolution::Answer(addrs) = resolver
            .resolve("myapp", &QueryContext::default())
            .await
            .unwrap()
        else {
            panic!("any回退应返回地址列表");
        };
        assert_eq!(addrs.len(), 2);

        // refuse：拒绝查询
        let resolver = resolver_with(
            &cfg,
            Some(snapshot_with(LbMethod::Wrr, Fallback::Refuse, 2, &down_members)),
        )
        .await;
        assert_eq!(
            resolver
                .resolve("myapp", &QueryContext::default())
                .await
                .unwrap(),
            Resolution::Refused
        );

        // nodata：显式空成功
        let resolver = resolver_with(
            &cfg,
            Some(snapshot_with(LbMethod::Wrr, Fallback::Nodata, 2, &down_members)),
        )
        .await;
        assert_eq!(
            resolver
                .resolve("myapp", &QueryContext::default())
                .await
                .unwrap(),
            Resolution::NoData
        );
    }

    #[tokio::test]
    async fn test_fogroup_returns_first_up_only() {
        let cfg = config(LbMethod::Fogroup, Fallback::Any, vec![member("10.0.0.1", 1, None)]);
        let snapshot = snapshot_with(
            LbMethod::Fogroup,
            Fallback::Any,
            2,
            &[
                ("10.0.0.1", 1, None, HealthStatus::Down),
                ("10.0.0.2", 1, None, HealthStatus::Up),
                ("10.0.0.3", 1, None, HealthStatus::Up),
            ],
        );
        let resolver = resolver_with(&cfg, Some(snapshot)).await;

        // 主DOWN则切到第一个UP的备，且无视max_addrs只返回单地址
        let result = resolver
            .resolve("myapp", &QueryContext::default())
            .await
            .unwrap();
        assert_eq!(result, Resolution::Answer(vec![ip("10.0.0.2")]));
    }

    #[tokio::test]
    async fn test_twrr_prefers_client_region() {
        let mut cfg = config(
            LbMethod::Twrr,
            Fallback::Any,
            vec![
                member("10.0.0.1", 1, Some("dc1")),
                member("10.0.0.2", 1, Some("dc2")),
            ],
        );
        cfg.topology
            .insert("dc1".to_string(), vec!["192.168.1.0/24".to_string()]);

        let snapshot = snapshot_with(
            LbMethod::Twrr,
            Fallback::Any,
            2,
            &[
                ("10.0.0.1", 1, Some("dc1"), HealthStatus::Up),
                ("10.0.0.2", 1, Some("dc2"), HealthStatus::Up),
            ],
        );
        let resolver = resolver_with(&cfg, Some(snapshot)).await;

        // 区域命中：只返回区域内成员（默认region_only补齐策略）
        let ctx = QueryContext {
            client_addr: Some(ip("192.168.1.50")),
            requested_max: None,
        };
        assert_eq!(
            resolver.resolve("myapp", &ctx).await.unwrap(),
            Resolution::Answer(vec![ip("10.0.0.1")])
        );

        // 区域未命中：退回全量加权轮询
        let ctx = QueryContext {
            client_addr: Some(ip("203.0.113.1")),
            requested_max: None,
        };
        let Resolution::Answer(addrs) = resolver.resolve("myapp", &ctx).await.unwrap() else {
            panic!("应返回地址列表");
        };
        assert_eq!(addrs.len(), 2);
    }

    #[tokio::test]
    async fn test_twrr_fill_remaining() {
        let mut cfg = config(
            LbMethod::Twrr,
            Fallback::Any,
            vec![
                member("10.0.0.1", 1, Some("dc1")),
                member("10.0.0.2", 1, Some("dc2")),
            ],
        );
        cfg.global.topology_fill = TopologyFill::FillRemaining;
        cfg.topology
            .insert("dc1".to_string(), vec!["192.168.1.0/24".to_string()]);

        let snapshot = snapshot_with(
            LbMethod::Twrr,
            Fallback::Any,
            2,
            &[
                ("10.0.0.1", 1, Some("dc1"), HealthStatus::Up),
                ("10.0.0.2", 1, Some("dc2"), HealthStatus::Up),
            ],
        );
        let resolver = resolver_with(&cfg, Some(snapshot)).await;

        // 区域内不足max_addrs时从默认表补齐，区域成员保持在前
        let ctx = QueryContext {
            client_addr: Some(ip("192.168.1.50")),
            requested_max: None,
        };
        let Resolution::Answer(addrs) = resolver.resolve("myapp", &ctx).await.unwrap() else {
            panic!("应返回地址列表");
        };
        assert_eq!(addrs[0], ip("10.0.0.1"));
        assert_eq!(addrs.len(), 2);
        assert!(addrs.contains(&ip("10.0.0.2")));
    }

    #[tokio::test]
    async fn test_requested_max_truncates() {
        let cfg = config(
            LbMethod::Wrr,
            Fallback::Any,
            vec![member("10.0.0.1", 1, None)],
        );
        let snapshot = snapshot_with(
            LbMethod::Wrr,
            Fallback::Any,
            4,
            &[
                ("10.0.0.1", 1, None, HealthStatus::Up),
                ("10.0.0.2", 1, None, HealthStatus::Up),
                ("10.0.0.3", 1, None, HealthStatus::Up),
            ],
        );
        let resolver = resolver_with(&cfg, Some(snapshot)).await;

        let ctx = QueryContext {
            client_addr: None,
            requested_max: Some(1),
        };
        let Resolution::Answer(addrs) = resolver.resolve("myapp", &ctx).await.unwrap() else {
            panic!("应返回地址列表");
        };
        assert_eq!(addrs.len(), 1);
    }

    #[tokio::test]
    async fn test_forced_up_member_serves() {
        // 配置中的强制UP成员在无快照时也可应答
        let mut members = vec![member("10.0.0.1", 1, None)];
        members[0].forced = Some(ForcedStatus::Up);
        let cfg = config(LbMethod::Wrr, Fallback::Refuse, members);
        let resolver = resolver_with(&cfg, None).await;

        let result = resolver
            .resolve("myapp", &QueryContext::default())
            .await
            .unwrap();
        assert_eq!(result, Resolution::Answer(vec![ip("10.0.0.1")]));
    }

    #[tokio::test]
    async fn test_stale_store_serves_last_known() {
        let cfg = config(LbMethod::Wrr, Fallback::Refuse, vec![member("10.0.0.1", 1, None)]);
        let store = Arc::new(MemoryStore::new());
        store
            .publish(&snapshot_with(
                LbMethod::Wrr,
                Fallback::Refuse,
                2,
                &[("10.0.0.1", 1, None, HealthStatus::Up)],
            ))
            .await
            .unwrap();

        let resolver = Resolver::new(&cfg, store as Arc<dyn SnapshotStore>).unwrap();
        resolver.sync_now().await;

        // 同步过一次之后，即使存储之后无更新也继续以最后已知状态应答
        let result = resolver
            .resolve("myapp", &QueryContext::default())
            .await
            .unwrap();
        assert_eq!(result, Resolution::Answer(vec![ip("10.0.0.1")]));
    }

    /// 首次load返回快照，之后一律报存储不可用
    struct FailingStore {
        snapshot: StateSnapshot,
        served: AtomicBool,
    }

    #[async_trait]
    impl SnapshotStore for FailingStore {
        async fn publish(&self, _snapshot: &StateSnapshot) -> Result<(), PublishError> {
            Err(PublishError::StoreUnavailable("只读测试存储".to_string()))
        }

        async fn load(&self) -> Result<Option<StateSnapshot>, PublishError> {
            if self.served.swap(true, Ordering::SeqCst) {
                Err(PublishError::StoreUnavailable("存储连接中断".to_string()))
            } else {
                Ok(Some(self.snapshot.clone()))
            }
        }
    }

    #[tokio::test]
    async fn test_unreachable_store_serves_last_known() {
        let cfg = config(LbMethod::Wrr, Fallback::Refuse, vec![member("10.0.0.1", 1, None)]);
        let store = Arc::new(FailingStore {
            snapshot: snapshot_with(
                LbMethod::Wrr,
                Fallback::Refuse,
                2,
                &[("10.0.0.1", 1, None, HealthStatus::Up)],
            ),
            served: AtomicBool::new(false),
        });
        let resolver = Resolver::new(&cfg, store as Arc<dyn SnapshotStore>).unwrap();
        resolver.sync_now().await;

        // 存储此后每次load都报错，查询仍以最后已知快照应答且不返回错误
        for _ in 0..3 {
            resolver.sync_now().await;
            let result = resolver
                .resolve("myapp", &QueryContext::default())
                .await
                .unwrap();
            assert_eq!(result, Resolution::Answer(vec![ip("10.0.0.1")]));
        }
    }

    /// 每次load都长时间阻塞的慢存储
    struct SlowStore;

    #[async_trait]
    impl SnapshotStore for SlowStore {
        async fn publish(&self, _snapshot: &StateSnapshot) -> Result<(), PublishError> {
            Ok(())
        }

        async fn load(&self) -> Result<Option<StateSnapshot>, PublishError> {
            tokio::time::sleep(Duration::from_secs(2)).await;
            Ok(None)
        }
    }

    #[tokio::test]
    async fn test_slow_store_does_not_block_queries() {
        let mut cfg = config(LbMethod::Wrr, Fallback::Nodata, vec![member("10.0.0.1", 1, None)]);
        cfg.global.snapshot_sync_interval_seconds = 60;
        let resolver = Arc::new(
            Resolver::new(&cfg, Arc::new(SlowStore) as Arc<dyn SnapshotStore>).unwrap(),
        );

        // 后台查询触发一次慢同步
        let bg = {
            let resolver = Arc::clone(&resolver);
            tokio::spawn(async move {
                let _ = resolver.resolve("myapp", &QueryContext::default()).await;
            })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;

        // 同步在途期间并发查询在限频窗口内直接应答，不等待存储
        let result = tokio::time::timeout(
            Duration::from_millis(500),
            resolver.resolve("myapp", &QueryContext::default()),
        )
        .await
        .expect("查询不应被慢存储拖住")
        .unwrap();
        assert_eq!(result, Resolution::NoData);

        bg.abort();
    }

    #[tokio::test]
    async fn test_invalid_client_addr() {
        assert!(matches!(
            QueryContext::from_client_addr("not-an-ip"),
            Err(ResolveError::InvalidClientAddr { .. })
        ));
        assert!(QueryContext::from_client_addr("192.168.1.1").is_ok());
    }
}
