//! 命令处理逻辑
//!
//! 实现各种CLI命令的处理逻辑

use crate::cli::args::{Args, Commands, OutputFormat};
use crate::config::{Config, ConfigLoader, TomlConfigLoader};
use crate::error::{ConfigError, Result};
use crate::publish::{FileStore, SnapshotStore, StatePublisher};
use crate::resolver::{QueryContext, Resolution, Resolver};
use crate::scheduler::HealthTracker;
use crate::state::HealthTable;
use crate::topology::TopologyMap;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::info;

/// 命令处理器trait
#[async_trait]
pub trait Command: Send + Sync {
    /// 执行命令
    async fn execute(&self, args: &Args) -> Result<()>;
}

/// 加载并验证配置文件
async fn load_config(args: &Args) -> Result<Config> {
    let loader = TomlConfigLoader::new(true);
    loader.load_from_file(&args.config).await
}

/// 版本命令
pub struct VersionCommand;

#[async_trait]
impl Command for VersionCommand {
    async fn execute(&self, args: &Args) -> Result<()> {
        if let Commands::Version { format } = &args.command {
            match format {
                OutputFormat::Json => {
                    let version_info = serde_json::json!({
                        "name": crate::APP_NAME,
                        "version": crate::VERSION,
                        "description": crate::APP_DESCRIPTION
                    });
                    println!("{}", serde_json::to_string_pretty(&version_info)?);
                }
                OutputFormat::Text => {
                    println!("{} v{}", crate::APP_NAME, crate::VERSION);
                    println!("{}", crate::APP_DESCRIPTION);
                }
            }
        }
        Ok(())
    }
}

/// 配置验证命令
pub struct CheckConfigCommand;

#[async_trait]
impl Command for CheckConfigCommand {
    async fn execute(&self, args: &Args) -> Result<()> {
        let config = load_config(args).await?;
        let member_count: usize = config.pools.iter().map(|p| p.members.len()).sum();
        println!(
            "配置有效: {} 个池，{} 个成员，{} 个拓扑区域",
            config.pools.len(),
            member_count,
            config.topology.len()
        );
        Ok(())
    }
}

/// 启动命令：健康追踪 + 状态发布，直到收到退出信号
pub struct RunCommand;

#[async_trait]
impl Command for RunCommand {
    async fn execute(&self, args: &Args) -> Result<()> {
        let config = load_config(args).await?;
        let topology = TopologyMap::from_config(&config.topology)
            .map_err(ConfigError::ValidationError)?;

        let table = Arc::new(HealthTable::new(&config, &topology));
        let tracker = HealthTracker::new(&config, Arc::clone(&table))?;
        let store: Arc<dyn SnapshotStore> =
            Arc::new(FileStore::new(&config.global.snapshot_path));
        let publisher = StatePublisher::new(
            Arc::clone(&table),
            store,
            Duration::from_secs(config.global.publish_interval_seconds),
        );

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let tracker_handle = tokio::spawn(tracker.run(shutdown_rx.clone()));
        let publisher_handle = tokio::spawn(publisher.run(shutdown_rx));

        info!(
            "{} v{} 已启动，快照路径: {}",
            crate::APP_NAME,
            crate::VERSION,
            config.global.snapshot_path
        );

        tokio::signal::ctrl_c().await?;
        info!("收到退出信号，开始关停");

        // 接收端已随任务退出时忽略发送错误
        let _ = shutdown_tx.send(true);
        let _ = futures::future::join_all([tracker_handle, publisher_handle]).await;
        Ok(())
    }
}

/// 状态转储命令
pub struct DumpStateCommand;

#[async_trait]
impl Command for DumpStateCommand {
    async fn execute(&self, args: &Args) -> Result<()> {
        if let Commands::DumpState { format } = &args.command {
            let config = load_config(args).await?;
            let store = FileStore::new(&config.global.snapshot_path);

            let Some(snapshot) = store.load().await.map_err(crate::error::GslbError::from)?
            else {
                println!("存储中尚无快照: {}", config.global.snapshot_path);
                return Ok(());
            };

            match format {
                OutputFormat::Json => {
                    println!("{}", snapshot.to_json()?);
                }
                OutputFormat::Text => {
                    println!("快照时间: {}", snapshot.timestamp);
                    let mut pool_names: Vec<_> = snapshot.pools.keys().collect();
                    pool_names.sort();
                    for name in pool_names {
                        let pool = &snapshot.pools[name];
                        println!(
                            "池 {} [{}] 状态: {}",
                            name,
                            pool.lb_method,
                            if pool.status { "UP" } else { "DOWN" }
                        );
                        for member in &pool.members {
                            println!(
                                "  {} {} 权重 {} 区域 {} 状态 {}{}",
                                member.name,
                                member.ip,
                                member.weight,
                                member.region.as_deref().unwrap_or("-"),
                                member.status,
                                if member.forced { " (forced)" } else { "" }
                            );
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

/// 一次性解析查询命令
pub struct ResolveCommand;

#[async_trait]
impl Command for ResolveCommand {
    async fn execute(&self, args: &Args) -> Result<()> {
        if let Commands::Resolve { pool, client, max } = &args.command {
            let config = load_config(args).await?;
            let store: Arc<dyn SnapshotStore> =
                Arc::new(FileStore::new(&config.global.snapshot_path));
            let resolver = Resolver::new(&config, store)?;
            resolver.sync_now().await;

            let mut ctx = match client {
                Some(addr) => QueryContext::from_client_addr(addr)
                    .map_err(crate::error::GslbError::from)?,
                None => QueryContext::default(),
            };
            ctx.requested_max = *max;

            match resolver
                .resolve(pool, &ctx)
                .await
                .map_err(crate::error::GslbError::from)?
            {
                Resolution::Answer(addrs) => {
                    for addr in addrs {
                        println!("{}", addr);
                    }
                }
                Resolution::NoData => println!("NODATA"),
                Resolution::Refused => println!("REFUSED"),
            }
        }
        Ok(())
    }
}

/// 按子命令分发到对应的处理器
pub async fn dispatch(args: &Args) -> Result<()> {
    let command: Box<dyn Command> = match &args.command {
        Commands::Run => Box::new(RunCommand),
        Commands::CheckConfig => Box::new(CheckConfigCommand),
        Commands::DumpState { .. } => Box::new(DumpStateCommand),
        Commands::Resolve { .. } => Box::new(ResolveCommand),
        Commands::Version { .. } => Box::new(VersionCommand),
    };
    command.execute(args).await
}
