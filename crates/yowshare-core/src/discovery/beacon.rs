//! 发现信标
//!
//! 两个松耦合的循环共享同一身份：
//! - 发送循环：每 [`HEARTBEAT_INTERVAL`] 向子网广播一次 `alive` 报文
//! - 接收循环：监听发现端口，把其他设备写入 [`PeerRegistry`]
//!
//! 所有错误都只记录日志：丢失的心跳会在下一次广播时自愈。

use log::{debug, info, trace, warn};

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::{
    Announcement, DiscoveryError, HEARTBEAT_INTERVAL, MAX_DATAGRAM_LEN, PeerRegistry,
    RECV_POLL_TIMEOUT,
};
use crate::config::AppSettings;

/// 本机在发现协议中的身份
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalIdentity {
    pub name: String,
    pub ip: IpAddr,
    /// 对外公布的传输端口
    pub port: u16,
}

impl LocalIdentity {
    pub fn new(name: impl Into<String>, ip: IpAddr, port: u16) -> Self {
        Self {
            name: name.into(),
            ip,
            port,
        }
    }

    /// 使用本机局域网地址创建身份，探测失败时回退到 127.0.0.1
    pub fn detect(name: impl Into<String>, port: u16) -> Self {
        let ip = local_ip_address::local_ip().unwrap_or_else(|e| {
            warn!("Failed to detect local IP: {}, using loopback", e);
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        });
        Self::new(name, ip, port)
    }

    /// 报文的名称、地址、端口是否与本机完全一致（广播回环）
    pub fn is_self(&self, msg: &Announcement) -> bool {
        msg.ip.as_deref().and_then(|ip| ip.parse::<IpAddr>().ok()) == Some(self.ip)
            && msg.transfer_port() == self.port
            && msg.name.as_deref() == Some(self.name.as_str())
    }

    fn announcement(&self) -> Announcement {
        Announcement::alive(&self.name, self.ip, self.port)
    }
}

/// 信标配置
#[derive(Debug, Clone)]
pub struct BeaconConfig {
    pub identity: LocalIdentity,
    /// 接收循环绑定的 UDP 端口
    pub listen_port: u16,
    /// 心跳发送目标
    pub broadcast_target: SocketAddr,
    pub heartbeat: Duration,
}

impl BeaconConfig {
    pub fn new(identity: LocalIdentity, discovery_port: u16) -> Self {
        Self {
            identity,
            listen_port: discovery_port,
            broadcast_target: SocketAddr::new(IpAddr::V4(Ipv4Addr::BROADCAST), discovery_port),
            heartbeat: HEARTBEAT_INTERVAL,
        }
    }

    pub fn from_settings(settings: &AppSettings) -> Self {
        let identity = LocalIdentity::detect(settings.device_name.clone(), settings.transfer_port);
        let mut config = Self::new(identity, settings.discovery_port);
        config.broadcast_target = SocketAddr::new(
            IpAddr::V4(settings.broadcast_address),
            settings.discovery_port,
        );
        config
    }
}

/// 发现信标
pub struct DiscoveryBeacon {
    config: BeaconConfig,
    registry: Arc<PeerRegistry>,
}

impl DiscoveryBeacon {
    pub fn new(config: BeaconConfig, registry: Arc<PeerRegistry>) -> Self {
        Self { config, registry }
    }

    pub fn identity(&self) -> &LocalIdentity {
        &self.config.identity
    }

    /// 处理一个发现报文
    ///
    /// 返回 `Ok(true)` 表示设备已写入设备表，`Ok(false)` 表示是本机回环。
    pub fn handle_datagram(&self, data: &[u8], source: SocketAddr) -> Result<bool, DiscoveryError> {
        let msg = Announcement::decode(data)?;
        if self.config.identity.is_self(&msg) {
            return Ok(false);
        }
        let address = msg.address_or(source.ip());
        self.registry
            .upsert(msg.display_name(), address, msg.transfer_port());
        trace!("Peer alive: {} ({})", msg.display_name(), address);
        Ok(true)
    }

    /// 启动发送与接收循环
    ///
    /// 任一套接字绑定失败只会关闭对应的循环，另一个继续工作。
    pub async fn start(self) -> BeaconHandle {
        let shutdown = CancellationToken::new();
        let beacon = Arc::new(self);
        let mut tasks = Vec::new();

        let listen_port = match UdpSocket::bind(("0.0.0.0", beacon.config.listen_port)).await {
            Ok(socket) => {
                let port = socket
                    .local_addr()
                    .map_or(beacon.config.listen_port, |a| a.port());
                info!("Discovery listening on UDP port {}", port);
                tasks.push(tokio::spawn(
                    beacon.clone().recv_loop(socket, shutdown.clone()),
                ));
                Some(port)
            }
            Err(e) => {
                warn!(
                    "Failed to bind discovery port {}: {}, peers will not be discovered",
                    beacon.config.listen_port, e
                );
                None
            }
        };

        match open_broadcast_socket().await {
            Ok(socket) => {
                tasks.push(tokio::spawn(
                    beacon.clone().send_loop(socket, shutdown.clone()),
                ));
            }
            Err(e) => {
                warn!("Failed to open broadcast socket: {}, this device stays hidden", e);
            }
        }

        BeaconHandle {
            shutdown,
            tasks,
            listen_port,
        }
    }

    async fn send_loop(self: Arc<Self>, socket: UdpSocket, shutdown: CancellationToken) {
        let frame = self.config.identity.announcement().encode();
        let target = self.config.broadcast_target;
        let mut ticker = time::interval(self.config.heartbeat);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        debug!(
            "Broadcasting heartbeat as '{}' to {} every {:?}",
            self.config.identity.name, target, self.config.heartbeat
        );

        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = socket.send_to(&frame, target).await {
                        debug!("Heartbeat send failed: {}", e);
                    }
                }
            }
        }
        debug!("Discovery send loop stopped");
    }

    async fn recv_loop(self: Arc<Self>, socket: UdpSocket, shutdown: CancellationToken) {
        let mut buf = vec![0u8; MAX_DATAGRAM_LEN];

        loop {
            let received = tokio::select! {
                () = shutdown.cancelled() => break,
                r = time::timeout(RECV_POLL_TIMEOUT, socket.recv_from(&mut buf)) => r,
            };

            match received {
                // 轮询超时，回到循环顶部检查停止信号
                Err(_) => {}
                Ok(Err(e)) => {
                    debug!("Discovery receive error: {}", e);
                    time::sleep(Duration::from_millis(100)).await;
                }
                Ok(Ok((n, source))) => {
                    if let Err(e) = self.handle_datagram(&buf[..n], source) {
                        trace!("Ignoring datagram from {}: {}", source, e);
                    }
                }
            }
        }
        debug!("Discovery receive loop stopped");
    }
}

async fn open_broadcast_socket() -> Result<UdpSocket, DiscoveryError> {
    let socket = UdpSocket::bind(("0.0.0.0", 0)).await?;
    socket.set_broadcast(true)?;
    Ok(socket)
}

/// 运行中的信标
///
/// 丢弃句柄也会发出停止信号，但只有 [`BeaconHandle::shutdown`] 会等待循环退出。
pub struct BeaconHandle {
    shutdown: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
    listen_port: Option<u16>,
}

impl BeaconHandle {
    /// 接收循环是否在运行（发现端口绑定成功）
    pub fn is_receiving(&self) -> bool {
        self.listen_port.is_some()
    }

    /// 接收循环实际绑定的端口（配置为 0 时由系统分配）
    pub fn listen_port(&self) -> Option<u16> {
        self.listen_port
    }

    pub async fn shutdown(mut self) {
        self.shutdown.cancel();
        for task in std::mem::take(&mut self.tasks) {
            let _ = task.await;
        }
    }
}

impl Drop for BeaconHandle {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
