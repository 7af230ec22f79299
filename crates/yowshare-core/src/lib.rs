//! YowShare Core Library
//!
//! 局域网设备发现与点对点文件传输的核心实现库
//!
//! # 模块
//!
//! - **discovery**: UDP 广播心跳与在线设备表
//! - **transfer**: TCP 文件传输（头部握手 + 原始字节流）
//! - **trust**: 发送者临时信任窗口
//! - **history**: 传输历史记录
//! - **workflow**: 组合以上模块的高层发送/接收流程
//! - **config**: 应用设置
//!
//! # 使用示例
//!
//! ## 发现设备
//!
//! ```ignore
//! use yowshare_core::{AppSettings, BeaconConfig, DiscoveryBeacon, PeerRegistry};
//!
//! let settings = AppSettings::load();
//! let registry = Arc::new(PeerRegistry::new());
//! let beacon = DiscoveryBeacon::new(BeaconConfig::from_settings(&settings), registry.clone())
//!     .start()
//!     .await;
//!
//! for peer in registry.list_alive() {
//!     println!("{} ({})", peer.display_name, peer.socket_addr());
//! }
//! beacon.shutdown().await;
//! ```
//!
//! ## 接收文件
//!
//! ```ignore
//! use yowshare_core::workflow::{ChannelSink, ReceiveEvent, ReceiveOptions, Receiver};
//!
//! let (sink, mut events) = ChannelSink::new(32);
//! let receiver = Receiver::new(ReceiveOptions::from_settings(&settings));
//! let handle = receiver.start(Arc::new(sink)).await?;
//!
//! while let Some(event) = events.recv().await {
//!     if let ReceiveEvent::Offer(pending) = event {
//!         pending.accept();
//!     }
//! }
//! ```
//!
//! ## 发送文件
//!
//! ```ignore
//! use yowshare_core::workflow::{SendOptions, Sender, SimpleSendCallback};
//!
//! let sender = Sender::new(SendOptions::from_settings(&settings));
//! let (callback, _progress) = SimpleSendCallback::new();
//! let report = sender
//!     .send_batch(peer.socket_addr(), &peer.display_name, &files, &cancel, &callback)
//!     .await?;
//! ```

pub mod config;
pub mod discovery;
pub mod history;
pub mod logging;
pub mod transfer;
pub mod trust;
pub mod workflow;

pub use config::AppSettings;

// Discovery re-exports
pub use discovery::{
    Announcement, BeaconConfig, BeaconHandle, DiscoveryBeacon, DiscoveryError, LocalIdentity,
    PeerRecord, PeerRegistry,
};

// Transfer re-exports
pub use transfer::{
    ListenerConfig, ListenerHandle, ReceivedFile, SendProgress, SentFile, TransferDecision,
    TransferError, TransferEventSink, TransferListener, TransferOffer, TransferSender,
};

pub use history::{Direction, HistoryStore, TransferRecord};
pub use logging::LogLevel;
pub use trust::TrustWindow;
