//! 局域网发现模块
//!
//! 包含:
//! - UDP 广播心跳 (`alive` 报文) 的编解码
//! - 带 TTL 淘汰的线程安全设备表
//! - 周期广播与监听的发现信标
//!
//! 报文格式（JSON，无结尾分隔符）:
//!
//! ```text
//! {"t":"alive","name":"Yow-laptop","ip":"192.168.1.20","port":50555}
//! ```

pub mod beacon;
pub mod registry;

pub use beacon::{BeaconConfig, BeaconHandle, DiscoveryBeacon, LocalIdentity};
pub use registry::PeerRegistry;

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, Instant};

use crate::config::DEFAULT_TRANSFER_PORT;

/// 心跳广播间隔
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(2);
/// 设备最长静默时间，超过即视为离线
pub const PEER_TTL: Duration = Duration::from_secs(7);
/// 接收循环的轮询上限
pub const RECV_POLL_TIMEOUT: Duration = Duration::from_secs(1);
/// 单个发现报文的最大长度
pub const MAX_DATAGRAM_LEN: usize = 4096;

const ALIVE: &str = "alive";

#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed announcement: {0}")]
    Malformed(String),

    #[error("Unexpected message type: {0}")]
    UnexpectedType(String),
}

/// 发现广播报文
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Announcement {
    #[serde(rename = "t")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

impl Announcement {
    /// 创建 alive 心跳报文
    pub fn alive(name: &str, ip: IpAddr, port: u16) -> Self {
        Self {
            kind: ALIVE.to_string(),
            name: Some(name.to_string()),
            ip: Some(ip.to_string()),
            port: Some(port),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        // 只含字符串和整数字段，序列化不会失败
        serde_json::to_vec(self).unwrap_or_default()
    }

    /// 解析 alive 报文，其他类型的报文返回错误
    pub fn decode(data: &[u8]) -> Result<Self, DiscoveryError> {
        let msg: Announcement =
            serde_json::from_slice(data).map_err(|e| DiscoveryError::Malformed(e.to_string()))?;
        if msg.kind != ALIVE {
            return Err(DiscoveryError::UnexpectedType(msg.kind));
        }
        Ok(msg)
    }

    /// 报文中的名称，缺省为 `Device`
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("Device")
    }

    /// 报文声明的地址，缺失或无法解析时回退到 UDP 来源地址
    pub fn address_or(&self, source: IpAddr) -> IpAddr {
        self.ip
            .as_deref()
            .and_then(|ip| ip.parse().ok())
            .unwrap_or(source)
    }

    pub fn transfer_port(&self) -> u16 {
        self.port.unwrap_or(DEFAULT_TRANSFER_PORT)
    }
}

/// 已发现的设备
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerRecord {
    pub display_name: String,
    pub address: IpAddr,
    pub port: u16,
    pub last_seen_at: Instant,
}

impl PeerRecord {
    /// 传输服务地址
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.address, self.port)
    }

    /// 历史记录中使用的描述 `name@ip`
    pub fn descriptor(&self) -> String {
        format!("{}@{}", self.display_name, self.address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alive_wire_format() {
        let msg = Announcement::alive("Yow-desk", "192.168.1.20".parse().unwrap(), 50555);
        let json: serde_json::Value = serde_json::from_slice(&msg.encode()).unwrap();
        assert_eq!(json["t"], "alive");
        assert_eq!(json["name"], "Yow-desk");
        assert_eq!(json["ip"], "192.168.1.20");
        assert_eq!(json["port"], 50555);
    }

    #[test]
    fn test_decode_defaults() {
        let msg = Announcement::decode(br#"{"t":"alive"}"#).unwrap();
        let source: IpAddr = "10.0.0.7".parse().unwrap();
        assert_eq!(msg.display_name(), "Device");
        assert_eq!(msg.address_or(source), source);
        assert_eq!(msg.transfer_port(), DEFAULT_TRANSFER_PORT);
    }

    #[test]
    fn test_decode_bad_ip_falls_back_to_source() {
        let msg = Announcement::decode(br#"{"t":"alive","ip":"not-an-ip","port":7}"#).unwrap();
        let source: IpAddr = "10.0.0.7".parse().unwrap();
        assert_eq!(msg.address_or(source), source);
        assert_eq!(msg.transfer_port(), 7);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(
            Announcement::decode(b"\xff\x00garbage"),
            Err(DiscoveryError::Malformed(_))
        ));
        assert!(matches!(
            Announcement::decode(br#"{"t":"offer"}"#),
            Err(DiscoveryError::UnexpectedType(_))
        ));
        assert!(Announcement::decode(br#"{"name":"x"}"#).is_err());
    }
}
