//! GSLB Director 主程序入口
//!
//! 健康追踪与负载均衡解析核心

use anyhow::{Context, Result};
use clap::Parser;
use gslb_director::cli::{self, Args};
use gslb_director::logging::{setup_logging, LogConfig};
use tracing::error;

#[tokio::main]
async fn main() -> Result<()> {
    // 解析命令行参数
    let args = Args::parse();

    // 初始化日志系统
    let log_config = LogConfig {
        level: args.log_level.to_string(),
        json_format: args.log_json,
    };
    setup_logging(&log_config).context("初始化日志系统失败")?;

    // 执行命令
    if let Err(e) = cli::dispatch(&args).await {
        error!("命令执行失败: {}", e);
        std::process::exit(1);
    }

    Ok(())
}
