//! 文件传输模块
//!
//! 包含:
//! - 握手协议的编解码 (`offer` 头部 + `ACCEPT`/`REJECT` 应答)
//! - TCP 接收端 (每个连接一个任务)
//! - TCP 发送端 (单文件同步流程)
//! - 目标文件命名与冲突处理
//!
//! # 协议
//!
//! ```text
//! 发送端 -> {"t":"offer","sender":..,"filename":..,"size":N,"count":..,"index":..}\n
//! 接收端 -> ACCEPT\n | REJECT\n
//! 发送端 -> N 字节原始文件内容，然后关闭连接
//! ```

pub mod listener;
pub mod protocol;
pub mod sender;
pub mod storage;

pub use listener::{ListenerConfig, ListenerHandle, TransferListener};
pub use protocol::OfferHeader;
pub use sender::{SenderOptions, TransferSender};

use async_trait::async_trait;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// 分块读写大小
pub const CHUNK_SIZE: usize = 64 * 1024;
/// 发送端连接与等待应答的超时
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(8);
/// 头部行的最大长度
pub const MAX_HEADER_LEN: u64 = 64 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Receiver rejected the transfer")]
    Rejected,

    #[error("Transfer incomplete: received {received} of {expected} bytes, partial file kept at {}", path.display())]
    Incomplete {
        path: PathBuf,
        received: u64,
        expected: u64,
    },

    #[error("Transfer failed: {0}")]
    Failed(#[from] std::io::Error),

    #[error("Failed to bind {addr}: {source}")]
    BindFailed {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("Transfer cancelled")]
    Cancelled,
}

impl TransferError {
    pub(crate) fn timed_out(what: &str) -> Self {
        TransferError::Failed(std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            format!("{what} timed out"),
        ))
    }
}

/// 传输请求（由发送端创建，接收端从头部还原）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferOffer {
    pub sender_name: String,
    pub filename: String,
    pub total_bytes: u64,
    /// 批次中的序号，从 1 开始
    pub item_index: u32,
    pub item_count: u32,
}

/// 接收决定
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransferDecision {
    pub accepted: bool,
    /// 目标路径，`None` 表示下载目录下的同名文件
    pub destination: Option<PathBuf>,
    /// 接受后在信任窗口内自动接受该发送者
    pub trust_sender: bool,
}

impl TransferDecision {
    pub fn accept() -> Self {
        Self {
            accepted: true,
            ..Default::default()
        }
    }

    pub fn accept_and_trust() -> Self {
        Self {
            accepted: true,
            trust_sender: true,
            ..Default::default()
        }
    }

    pub fn accept_to(destination: PathBuf) -> Self {
        Self {
            accepted: true,
            destination: Some(destination),
            trust_sender: false,
        }
    }

    pub fn reject() -> Self {
        Self::default()
    }
}

/// 接收完成的文件
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedFile {
    pub offer: TransferOffer,
    pub path: PathBuf,
    pub peer: SocketAddr,
}

impl ReceivedFile {
    /// 历史记录中使用的描述 `sender@ip`
    pub fn peer_descriptor(&self) -> String {
        format!("{}@{}", self.offer.sender_name, self.peer.ip())
    }
}

/// 发送完成的文件
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentFile {
    pub offer: TransferOffer,
    pub path: PathBuf,
    pub peer: SocketAddr,
}

/// 发送进度
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendProgress {
    pub filename: String,
    pub bytes_sent: u64,
    pub total_bytes: u64,
    pub item_index: u32,
    pub item_count: u32,
}

/// 接收端事件回调
///
/// 每个被接受（或出错）的传输恰好触发一次 `on_complete` 或 `on_error`；
/// 被拒绝的请求两者都不触发。
#[async_trait]
pub trait TransferEventSink: Send + Sync {
    /// 收到传输请求，返回是否接受；可以无限期等待用户操作
    async fn on_offer(&self, offer: &TransferOffer, peer: SocketAddr) -> TransferDecision;

    /// 每写入一块后调用，不能长时间阻塞
    fn on_progress(&self, offer: &TransferOffer, received: u64, total: u64);

    /// 接收完成
    async fn on_complete(&self, file: &ReceivedFile);

    /// 接收失败
    async fn on_error(&self, offer: Option<&TransferOffer>, error: &TransferError);
}
