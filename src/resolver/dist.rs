//! 分发表实现
//!
//! 把池成员按权重展开成轮转列表并维护游标。每张表从快照构建后
//! 只读，游标是唯一可变状态；相同快照与游标下的取数完全确定。

use crate::state::MemberSnapshot;
use std::collections::HashMap;
use std::net::IpAddr;

/// 单张轮转分发表
///
/// 成员地址按配置顺序重复权重次数展开；游标从0开始，
/// 每次取数后前进实际扫描的条目数。
#[derive(Debug, Clone)]
pub struct DistTable {
    entries: Vec<IpAddr>,
    cursor: usize,
}

impl DistTable {
    /// 按配置顺序从成员列表构建，权重为0的成员不进入表
    pub fn build<'a>(members: impl Iterator<Item = &'a MemberSnapshot>) -> Self {
        let mut entries = Vec::new();
        for member in members {
            for _ in 0..member.weight {
                entries.push(member.ip);
            }
        }
        Self { entries, cursor: 0 }
    }

    /// 表是否为空
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 表长度（权重展开后的条目数）
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// 从游标处取至多max个互不重复且不在exclude中的地址
    ///
    /// 最多扫描一整圈；游标前进实际扫描的条目数，使连续查询
    /// 按权重比例轮转各成员。
    pub fn take(&mut self, max: usize, exclude: &[IpAddr]) -> Vec<IpAddr> {
        if self.entries.is_empty() || max == 0 {
            return Vec::new();
        }

        let mut picked = Vec::new();
        let mut scanned = 0usize;

        while scanned < self.entries.len() && picked.len() < max {
            let ip = self.entries[(self.cursor + scanned) % self.entries.len()];
            scanned += 1;
            if !picked.contains(&ip) && !exclude.contains(&ip) {
                picked.push(ip);
            }
        }

        self.cursor = (self.cursor + scanned) % self.entries.len();
        picked
    }
}

/// 一个池的整组分发表：`_default` 全量表 + 按区域分组的表
#[derive(Debug, Clone)]
pub struct DistTables {
    /// 全量表，无区域偏好或区域未命中时使用
    pub default_table: DistTable,
    /// 区域标签 -> 仅含该区域成员的表
    pub regions: HashMap<String, DistTable>,
}

impl DistTables {
    /// 从成员列表构建
    ///
    /// # 参数
    /// * `members` - 池成员快照，配置顺序
    /// * `healthy_only` - true时只纳入UP成员，false时纳入全部成员
    pub fn build(members: &[MemberSnapshot], healthy_only: bool) -> Self {
        let eligible = |m: &&MemberSnapshot| !healthy_only || m.status.is_healthy();

        let default_table = DistTable::build(members.iter().filter(eligible));

        let mut regions: HashMap<String, DistTable> = HashMap::new();
        let mut region_names: Vec<&str> = members
            .iter()
            .filter_map(|m| m.region.as_deref())
            .collect();
        region_names.sort_unstable();
        region_names.dedup();

        for region in region_names {
            let table = DistTable::build(
                members
                    .iter()
                    .filter(eligible)
                    .filter(|m| m.region.as_deref() == Some(region)),
            );
            if !table.is_empty() {
                regions.insert(region.to_string(), table);
            }
        }

        Self {
            default_table,
            regions,
        }
    }
}
