//! 健康状态数据结构
//!
//! 定义成员健康状态、健康状态表与可发布的不可变快照

pub mod table;

use crate::config::{Fallback, LbMethod};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::IpAddr;

pub use table::{HealthTable, MemberDump, ProbeTicket};

/// 健康状态枚举
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// 成员正常
    Up,
    /// 成员异常
    Down,
    /// 尚未探测过（新成员或无快照）
    Unknown,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Up => write!(f, "UP"),
            HealthStatus::Down => write!(f, "DOWN"),
            HealthStatus::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

impl HealthStatus {
    /// 判断状态是否为健康
    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthStatus::Up)
    }
}

/// 池内单个成员的快照
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemberSnapshot {
    /// 返回给客户端的地址
    pub ip: IpAddr,
    /// 成员名称
    pub name: String,
    /// 权重，0表示禁用
    pub weight: u32,
    /// 生效的区域标签（显式配置或由拓扑推导）
    pub region: Option<String>,
    /// 当前健康状态
    pub status: HealthStatus,
    /// 是否为强制状态成员
    pub forced: bool,
}

/// 单个池的快照
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolSnapshot {
    /// 池状态：任一权重大于0的成员UP即为true
    pub status: bool,
    /// 负载均衡方法
    pub lb_method: LbMethod,
    /// 回退策略
    pub fallback: Fallback,
    /// 单次应答最多返回的地址数
    pub max_addrs_returned: usize,
    /// 成员列表，顺序与配置一致（fogroup的主备顺序）
    pub members: Vec<MemberSnapshot>,
}

/// 健康状态表的不可变时点快照
///
/// 由发布器序列化后写入共享存储，解析器实例据此构建分发表；
/// 每次发布都是整体覆盖，消费方用timestamp判断是否有更新。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateSnapshot {
    /// 快照生成时间
    pub timestamp: DateTime<Utc>,
    /// 池名称 -> 池快照
    pub pools: HashMap<String, PoolSnapshot>,
}

impl StateSnapshot {
    /// 转换为JSON字符串
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// 从JSON字符串创建
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}
