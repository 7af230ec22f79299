//! 设备表
//!
//! 以 IP 地址为键保存最近收到心跳的设备。淘汰在 `list_alive` 时顺带完成，
//! 不需要单独的定时任务；界面每 ~1.5s 轮询一次即可保证列表足够新鲜。

use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, Instant};

use super::{PEER_TTL, PeerRecord};

/// 线程安全的设备表
#[derive(Debug)]
pub struct PeerRegistry {
    ttl: Duration,
    peers: Mutex<HashMap<IpAddr, PeerRecord>>,
}

impl Default for PeerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::with_ttl(PEER_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            ttl,
            peers: Mutex::new(HashMap::new()),
        }
    }

    /// 插入或刷新设备
    pub fn upsert(&self, name: &str, address: IpAddr, port: u16) {
        self.upsert_at(name, address, port, Instant::now());
    }

    pub fn upsert_at(&self, name: &str, address: IpAddr, port: u16, now: Instant) {
        let record = PeerRecord {
            display_name: name.to_string(),
            address,
            port,
            last_seen_at: now,
        };
        self.peers.lock().insert(address, record);
    }

    /// 淘汰过期设备后返回在线列表，按名称（忽略大小写）排序
    pub fn list_alive(&self) -> Vec<PeerRecord> {
        self.list_alive_at(Instant::now())
    }

    pub fn list_alive_at(&self, now: Instant) -> Vec<PeerRecord> {
        let mut alive: Vec<PeerRecord> = {
            let mut peers = self.peers.lock();
            peers.retain(|_, p| now.saturating_duration_since(p.last_seen_at) <= self.ttl);
            peers.values().cloned().collect()
        };
        alive.sort_by_cached_key(|p| p.display_name.to_lowercase());
        alive
    }

    /// 按名称（忽略大小写）、IP 或 `IP:端口` 查找在线设备
    pub fn find(&self, query: &str) -> Option<PeerRecord> {
        let query = query.trim();
        let alive = self.list_alive();
        if let Ok(addr) = query.parse::<SocketAddr>() {
            return alive.into_iter().find(|p| p.socket_addr() == addr);
        }
        if let Ok(ip) = query.parse::<IpAddr>() {
            return alive.into_iter().find(|p| p.address == ip);
        }
        alive
            .into_iter()
            .find(|p| p.display_name.eq_ignore_ascii_case(query))
    }

    pub fn len(&self) -> usize {
        self.peers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
