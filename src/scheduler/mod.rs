//! 健康探测调度器
//!
//! 亚秒级tick驱动的单循环：每个tick先回收已完成的探测结果，
//! 再扫描到期成员并派发任务。派发失败的成员顺延到下一tick，
//! 调度循环本身从不执行探测、从不阻塞等待。

use crate::config::Config;
use crate::error::Result;
use crate::monitor::{build_monitor, Monitor};
use crate::state::HealthTable;
use crate::worker::{ProbeJob, ProbeResult, WorkerPool};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// 调度器运行状态，用于诊断输出
#[derive(Debug, Clone, serde::Serialize)]
pub struct TrackerStatus {
    /// 活跃工作协程数
    pub active_workers: usize,
    /// 队列中等待的任务数
    pub queued_jobs: usize,
    /// 池数量
    pub pools: usize,
    /// 成员总数
    pub members: usize,
}

/// 健康探测调度器
pub struct HealthTracker {
    table: Arc<HealthTable>,
    /// 池名称 -> 该池的探测器（每个池恰好一个监控器）
    monitors: HashMap<String, Arc<dyn Monitor>>,
    tick_interval: Duration,
    worker_pool: WorkerPool,
    result_rx: mpsc::Receiver<ProbeResult>,
}

impl HealthTracker {
    /// 创建调度器：为每个池构建探测器并启动工作池
    ///
    /// # 参数
    /// * `config` - 已验证的配置
    /// * `table` - 共享的健康状态表
    ///
    /// # 返回
    /// * `Result<Self>` - 调度器实例，探测器构建失败时返回错误
    pub fn new(config: &Config, table: Arc<HealthTable>) -> Result<Self> {
        let mut monitors = HashMap::with_capacity(config.pools.len());
        for pool in &config.pools {
            let monitor = build_monitor(&pool.monitor)?;
            debug!(
                "池 {} 使用 {} 探测器，间隔 {:?}",
                pool.name,
                pool.monitor.kind_name(),
                pool.monitor.interval()
            );
            monitors.insert(pool.name.clone(), monitor);
        }

        let (worker_pool, result_rx) = WorkerPool::new(&config.global);

        Ok(Self {
            table,
            monitors,
            tick_interval: Duration::from_millis(config.global.tick_interval_ms),
            worker_pool,
            result_rx,
        })
    }

    /// 当前运行状态
    pub fn status(&self) -> TrackerStatus {
        TrackerStatus {
            active_workers: self.worker_pool.active_workers(),
            queued_jobs: self.worker_pool.queued_jobs(),
            pools: self.table.pool_count(),
            members: self.table.member_count(),
        }
    }

    /// 调度主循环，收到关停信号后回收在途结果并退出
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "调度器已启动: tick间隔 {:?}，共 {} 个池 {} 个成员",
            self.tick_interval,
            self.table.pool_count(),
            self.table.member_count()
        );

        let mut ticker = tokio::time::interval(self.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.collect_results().await;
                    self.dispatch_due().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        // 关停：不再派发，回收已完成的结果
        self.collect_results().await;
        self.worker_pool.shutdown();
        info!("调度器已停止");
    }

    /// 回收完成通道中所有已就绪的探测结果
    async fn collect_results(&mut self) {
        while let Ok(result) = self.result_rx.try_recv() {
            self.table
                .apply_probe(&result.pool, result.member_ip, &result.outcome)
                .await;
        }
    }

    /// 扫描到期成员并派发探测任务
    async fn dispatch_due(&self) {
        let tickets = self.table.due_probes().await;
        if tickets.is_empty() {
            return;
        }
        debug!("本tick到期成员数: {}", tickets.len());

        for ticket in tickets {
            let Some(monitor) = self.monitors.get(&ticket.pool) else {
                // 表与监控器映射同源于配置，不应出现
                warn!("池 {} 没有对应的探测器", ticket.pool);
                self.table.defer_probe(&ticket).await;
                continue;
            };

            let job = ProbeJob {
                pool: ticket.pool.clone(),
                member_ip: ticket.member_ip,
                target: ticket.target,
                monitor: Arc::clone(monitor),
            };

            if !self.worker_pool.submit(job).await {
                // 队列饱和，归还票据顺延到下一tick
                self.table.defer_probe(&ticket).await;
            }
        }
    }
}
