//! 状态发布模块
//!
//! 周期性地把健康状态表的快照整体写入共享存储。仅在状态发生
//! 变更时发布；发布失败记录日志并在下一周期重试，不影响探测。

pub mod store;

use crate::state::HealthTable;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

pub use store::{FileStore, MemoryStore, SnapshotStore};

/// 状态发布器
pub struct StatePublisher {
    table: Arc<HealthTable>,
    store: Arc<dyn SnapshotStore>,
    interval: Duration,
}

impl StatePublisher {
    /// 创建发布器
    ///
    /// # 参数
    /// * `table` - 共享的健康状态表
    /// * `store` - 快照存储
    /// * `interval` - 发布检查周期
    pub fn new(table: Arc<HealthTable>, store: Arc<dyn SnapshotStore>, interval: Duration) -> Self {
        Self {
            table,
            store,
            interval,
        }
    }

    /// 发布主循环
    ///
    /// 每个周期检查变更标记；有待发布内容（新变更或上次失败的
    /// 重试）时生成快照并写入存储。收到关停信号后做最后一次发布。
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!("状态发布器已启动: 周期 {:?}", self.interval);
        let mut ticker = tokio::time::interval(self.interval);
        let mut pending = false;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if self.table.take_changed() {
                        pending = true;
                    }
                    if pending && self.publish_once().await {
                        pending = false;
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        // 关停前把最新状态落盘
        if self.table.take_changed() || pending {
            self.publish_once().await;
        }
        info!("状态发布器已停止");
    }

    /// 执行一次发布，返回是否成功
    async fn publish_once(&self) -> bool {
        let snapshot = self.table.snapshot().await;
        match self.store.publish(&snapshot).await {
            Ok(()) => {
                debug!(
                    "状态快照已发布: {} 个池，时间戳 {}",
                    snapshot.pools.len(),
                    snapshot.timestamp
                );
                true
            }
            Err(e) => {
                // 下一周期重试
                warn!("状态快照发布失败，将重试: {}", e);
                false
            }
        }
    }
}
