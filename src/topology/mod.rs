//! 拓扑映射模块
//!
//! 提供客户端网段到区域标签的映射，加载后只读，用于解析时的就近选择

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// 单条拓扑规则
#[derive(Debug, Clone)]
struct TopologyRule {
    /// 网络地址
    network: IpAddr,
    /// 前缀长度
    prefix_len: u8,
    /// 区域标签
    region: String,
}

/// 拓扑映射表
///
/// 规则按前缀长度降序排列，查找返回最精确（最长前缀）的匹配区域。
/// 加载后不再变更，读取无需同步。
#[derive(Debug, Clone, Default)]
pub struct TopologyMap {
    rules: Vec<TopologyRule>,
}

impl TopologyMap {
    /// 从配置构建拓扑映射
    ///
    /// # 参数
    /// * `config` - 区域 -> CIDR列表 的映射
    ///
    /// # 返回
    /// * `Result<Self, String>` - 映射表，CIDR非法时返回错误信息
    pub fn from_config(config: &HashMap<String, Vec<String>>) -> Result<Self, String> {
        let mut rules = Vec::new();

        for (region, networks) in config {
            if region == "_default" {
                return Err("区域名称不能使用保留字 _default".to_string());
            }

            for net_str in networks {
                let (network, prefix_len) = parse_cidr(net_str)
                    .ok_or_else(|| format!("区域 {} 的网段 {} 不是有效的CIDR", region, net_str))?;

                rules.push(TopologyRule {
                    network,
                    prefix_len,
                    region: region.clone(),
                });
            }
        }

        // 前缀长的规则优先，保证最长前缀匹配
        rules.sort_by(|a, b| b.prefix_len.cmp(&a.prefix_len));

        Ok(Self { rules })
    }

    /// 查找客户端地址所属的区域
    ///
    /// # 参数
    /// * `ip` - 客户端地址
    ///
    /// # 返回
    /// * `Option<&str>` - 最长前缀匹配的区域标签，无匹配时为None
    pub fn get_region(&self, ip: IpAddr) -> Option<&str> {
        self.rules
            .iter()
            .find(|rule| ip_in_network(ip, rule.network, rule.prefix_len))
            .map(|rule| rule.region.as_str())
    }

    /// 规则数量
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// 解析CIDR表示（如 "192.168.1.0/24" 或 "2001:db8::/32"）
///
/// # 返回
/// * `Option<(IpAddr, u8)>` - (网络地址, 前缀长度)，非法时为None
pub fn parse_cidr(pattern: &str) -> Option<(IpAddr, u8)> {
    let (network_str, prefix_str) = pattern.split_once('/')?;

    let network_addr = network_str.parse::<IpAddr>().ok()?;
    let prefix_len = prefix_str.parse::<u8>().ok()?;

    let max_prefix = match network_addr {
        IpAddr::V4(_) => 32,
        IpAddr::V6(_) => 128,
    };

    if prefix_len <= max_prefix {
        Some((network_addr, prefix_len))
    } else {
        None
    }
}

/// 判断地址是否落在网段内，协议版本不同视为不匹配
pub fn ip_in_network(ip: IpAddr, network: IpAddr, prefix_len: u8) -> bool {
    match (ip, network) {
        (IpAddr::V4(ip_v4), IpAddr::V4(net_v4)) => ipv4_in_network(ip_v4, net_v4, prefix_len),
        (IpAddr::V6(ip_v6), IpAddr::V6(net_v6)) => ipv6_in_network(ip_v6, net_v6, prefix_len),
        _ => false,
    }
}

/// IPv4位掩码比较
fn ipv4_in_network(ip: Ipv4Addr, network: Ipv4Addr, prefix_len: u8) -> bool {
    if prefix_len > 32 {
        return false;
    }
    if prefix_len == 0 {
        return true;
    }

    let mask = !((1u64 << (32 - prefix_len)) - 1) as u32;
    (u32::from(ip) & mask) == (u32::from(network) & mask)
}

/// IPv6位掩码比较
fn ipv6_in_network(ip: Ipv6Addr, network: Ipv6Addr, prefix_len: u8) -> bool {
    if prefix_len > 128 {
        return false;
    }
    if prefix_len == 0 {
        return true;
    }

    let mask = if prefix_len == 128 {
        u128::MAX
    } else {
        !((1u128 << (128 - prefix_len)) - 1)
    };
    (u128::from(ip) & mask) == (u128::from(network) & mask)
}
