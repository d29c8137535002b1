//! 弹性探测工作池
//!
//! 有界任务队列 + 可伸缩的工作协程集合。队列积压时扩容到上限，
//! 空闲超时后缩容到下限；探测结果经完成通道送回调度器。

use crate::config::GlobalConfig;
use crate::monitor::{Monitor, ProbeOutcome};
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// 一次待执行的探测任务
pub struct ProbeJob {
    /// 池名称
    pub pool: String,
    /// 成员地址（表内键）
    pub member_ip: IpAddr,
    /// 探测目标
    pub target: SocketAddr,
    /// 所属池的探测器
    pub monitor: Arc<dyn Monitor>,
}

/// 一次已完成的探测结果
pub struct ProbeResult {
    /// 池名称
    pub pool: String,
    /// 成员地址
    pub member_ip: IpAddr,
    /// 探测结果
    pub outcome: ProbeOutcome,
}

/// 工作协程共享的运行时状态
struct PoolShared {
    /// 任务队列消费端，多个工作协程竞争取用
    job_rx: Mutex<mpsc::Receiver<ProbeJob>>,
    /// 完成通道发送端
    result_tx: mpsc::Sender<ProbeResult>,
    /// 当前活跃工作协程数
    active: AtomicUsize,
    /// 最小并发数，缩容下界
    min_workers: usize,
    /// 空闲多久后允许缩容
    idle_timeout: Duration,
}

/// 弹性探测工作池
pub struct WorkerPool {
    job_tx: mpsc::Sender<ProbeJob>,
    shared: Arc<PoolShared>,
    max_workers: usize,
    /// 提交时的最大等待时间，超过即由调用方顺延任务
    submit_wait: Duration,
    queue_capacity: usize,
}

impl WorkerPool {
    /// 创建工作池并启动最小数量的工作协程
    ///
    /// # 参数
    /// * `config` - 全局配置，提供并发上下限、队列容量与等待参数
    ///
    /// # 返回
    /// * `(Self, mpsc::Receiver<ProbeResult>)` - 工作池与完成通道接收端
    pub fn new(config: &GlobalConfig) -> (Self, mpsc::Receiver<ProbeResult>) {
        let (job_tx, job_rx) = mpsc::channel(config.job_queue_capacity);
        // 完成通道容量与任务队列对齐，结果不会多于在途任务
        let (result_tx, result_rx) = mpsc::channel(config.job_queue_capacity);

        let shared = Arc::new(PoolShared {
            job_rx: Mutex::new(job_rx),
            result_tx,
            active: AtomicUsize::new(0),
            min_workers: config.min_workers,
            idle_timeout: Duration::from_secs(config.worker_idle_timeout_secs),
        });

        let pool = Self {
            job_tx,
            shared: Arc::clone(&shared),
            max_workers: config.max_workers,
            submit_wait: Duration::from_millis(config.submit_wait_ms),
            queue_capacity: config.job_queue_capacity,
        };

        for _ in 0..config.min_workers {
            pool.spawn_worker();
        }
        info!(
            "工作池已启动: 最小并发 {} 最大并发 {} 队列容量 {}",
            config.min_workers, config.max_workers, config.job_queue_capacity
        );

        (pool, result_rx)
    }

    /// 提交一个探测任务
    ///
    /// 队列满时最多等待submit_wait；仍无法入队则返回false，
    /// 由调用方顺延该成员到下一tick，保证调度循环不被阻塞。
    pub async fn submit(&self, job: ProbeJob) -> bool {
        self.scale_up_if_backlogged();

        match timeout(self.submit_wait, self.job_tx.send(job)).await {
            Ok(Ok(())) => true,
            Ok(Err(_)) => {
                warn!("任务队列已关闭，探测任务被丢弃");
                false
            }
            Err(_) => {
                debug!("任务队列饱和，探测任务顺延到下一tick");
                false
            }
        }
    }

    /// 当前活跃工作协程数
    pub fn active_workers(&self) -> usize {
        self.shared.active.load(Ordering::Acquire)
    }

    /// 当前队列中等待的任务数
    pub fn queued_jobs(&self) -> usize {
        self.queue_capacity - self.job_tx.capacity()
    }

    /// 队列积压超过活跃协程数且未达上限时扩容一个工作协程
    fn scale_up_if_backlogged(&self) {
        let active = self.shared.active.load(Ordering::Acquire);
        if active < self.max_workers && self.queued_jobs() > active {
            self.spawn_worker();
            debug!("工作池扩容: 活跃协程 {} -> {}", active, active + 1);
        }
    }

    fn spawn_worker(&self) {
        let shared = Arc::clone(&self.shared);
        shared.active.fetch_add(1, Ordering::AcqRel);
        tokio::spawn(worker_loop(shared));
    }

    /// 关闭工作池：不再接收新任务，工作协程在排空队列后退出
    pub fn shutdown(self) {
        drop(self.job_tx);
        info!("工作池已关闭");
    }
}

/// 单个工作协程的主循环
///
/// 从共享队列取任务并执行探测；空闲超时且活跃数高于下限时退出。
async fn worker_loop(shared: Arc<PoolShared>) {
    loop {
        let job = {
            let mut job_rx = shared.job_rx.lock().await;
            match timeout(shared.idle_timeout, job_rx.recv()).await {
                Ok(Some(job)) => job,
                // 队列已关闭
                Ok(None) => break,
                Err(_) => {
                    // 空闲超时：高于下限则缩容退出
                    let active = shared.active.load(Ordering::Acquire);
                    if active > shared.min_workers {
                        debug!("工作池缩容: 活跃协程 {} -> {}", active, active - 1);
                        break;
                    }
                    continue;
                }
            }
        };

        let outcome = job.monitor.probe(job.target).await;
        let result = ProbeResult {
            pool: job.pool,
            member_ip: job.member_ip,
            outcome,
        };

        // 调度器退出后发送失败，此时工作协程也应退出
        if shared.result_tx.send(result).await.is_err() {
            break;
        }
    }

    shared.active.fetch_sub(1, Ordering::AcqRel);
}
