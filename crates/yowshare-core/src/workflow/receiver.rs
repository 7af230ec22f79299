//! 接收端工作流
//!
//! 高层 API 封装完整的接收流程:
//! 1. 按设置绑定传输端口
//! 2. 信任窗口 / 自动接受 命中时跳过用户确认
//! 3. 接收完成后写入历史记录
//! 4. 所有事件转发给调用方的 [`TransferEventSink`]

use async_trait::async_trait;
use log::warn;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

use crate::config::AppSettings;
use crate::history::{Direction, HistoryStore, TransferRecord};
use crate::transfer::{
    ListenerConfig, ListenerHandle, ReceivedFile, TransferDecision, TransferError,
    TransferEventSink, TransferListener, TransferOffer,
};
use crate::trust::TrustWindow;

/// 接收选项
#[derive(Debug, Clone)]
pub struct ReceiveOptions {
    pub listener: ListenerConfig,
    /// 是否自动接受所有请求
    pub auto_accept: bool,
    /// 历史记录存储，`None` 表示不记录
    pub history: Option<Arc<HistoryStore>>,
}

impl ReceiveOptions {
    pub fn from_settings(settings: &AppSettings) -> Self {
        Self {
            listener: ListenerConfig::from_settings(settings),
            auto_accept: settings.auto_accept,
            history: Some(Arc::new(HistoryStore::new(AppSettings::history_path()))),
        }
    }
}

/// 接收端工作流
pub struct Receiver {
    options: ReceiveOptions,
    trust: Arc<TrustWindow>,
}

impl Receiver {
    pub fn new(options: ReceiveOptions) -> Self {
        Self {
            options,
            trust: Arc::new(TrustWindow::new()),
        }
    }

    #[must_use]
    pub fn with_trust_window(mut self, trust: Arc<TrustWindow>) -> Self {
        self.trust = trust;
        self
    }

    pub fn trust_window(&self) -> &Arc<TrustWindow> {
        &self.trust
    }

    /// 开始接收，返回的句柄被丢弃或调用 `shutdown` 时停止
    pub async fn start(&self, sink: Arc<dyn TransferEventSink>) -> Result<ListenerHandle, TransferError> {
        let adapter = ReceiverSinkAdapter {
            inner: sink,
            auto_accept: self.options.auto_accept,
            history: self.options.history.clone(),
        };

        TransferListener::new(self.options.listener.clone(), Arc::new(adapter))
            .with_trust_window(self.trust.clone())
            .bind()
            .await
    }
}

/// 接收回调适配器
struct ReceiverSinkAdapter {
    inner: Arc<dyn TransferEventSink>,
    auto_accept: bool,
    history: Option<Arc<HistoryStore>>,
}

#[async_trait]
impl TransferEventSink for ReceiverSinkAdapter {
    async fn on_offer(&self, offer: &TransferOffer, peer: SocketAddr) -> TransferDecision {
        if self.auto_accept {
            return TransferDecision::accept();
        }
        self.inner.on_offer(offer, peer).await
    }

    fn on_progress(&self, offer: &TransferOffer, received: u64, total: u64) {
        self.inner.on_progress(offer, received, total);
    }

    async fn on_complete(&self, file: &ReceivedFile) {
        if let Some(history) = &self.history {
            let record =
                TransferRecord::now(Direction::Received, &file.offer.filename, file.peer_descriptor());
            if let Err(e) = history.clone().append_async(record).await {
                warn!("Failed to record history for '{}': {}", file.offer.filename, e);
            }
        }
        self.inner.on_complete(file).await;
    }

    async fn on_error(&self, offer: Option<&TransferOffer>, error: &TransferError) {
        self.inner.on_error(offer, error).await;
    }
}

/// 接收事件
#[derive(Debug)]
pub enum ReceiveEvent {
    /// 等待用户决定的请求
    Offer(PendingOffer),
    Progress {
        filename: String,
        received: u64,
        total: u64,
    },
    Complete(ReceivedFile),
    Error {
        offer: Option<TransferOffer>,
        message: String,
    },
}

/// 等待决定的传输请求
///
/// 丢弃而不调用任何方法等同于拒绝。
#[derive(Debug)]
pub struct PendingOffer {
    pub offer: TransferOffer,
    pub peer: SocketAddr,
    responder: oneshot::Sender<TransferDecision>,
}

impl PendingOffer {
    pub fn respond(self, decision: TransferDecision) {
        // 连接可能已经关闭
        let _ = self.responder.send(decision);
    }

    pub fn accept(self) {
        self.respond(TransferDecision::accept());
    }

    pub fn accept_and_trust(self) {
        self.respond(TransferDecision::accept_and_trust());
    }

    pub fn accept_to(self, destination: PathBuf) {
        self.respond(TransferDecision::accept_to(destination));
    }

    pub fn reject(self) {
        self.respond(TransferDecision::reject());
    }
}

/// 把事件送入 mpsc 通道的接收回调
///
/// 请求、完成和错误事件会等待通道有空位，进度事件在通道满时直接丢弃。
pub struct ChannelSink {
    tx: mpsc::Sender<ReceiveEvent>,
}

impl ChannelSink {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<ReceiveEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

#[async_trait]
impl TransferEventSink for ChannelSink {
    async fn on_offer(&self, offer: &TransferOffer, peer: SocketAddr) -> TransferDecision {
        let (responder, decision) = oneshot::channel();
        let pending = PendingOffer {
            offer: offer.clone(),
            peer,
            responder,
        };
        if self.tx.send(ReceiveEvent::Offer(pending)).await.is_err() {
            return TransferDecision::reject();
        }
        decision.await.unwrap_or_else(|_| TransferDecision::reject())
    }

    fn on_progress(&self, offer: &TransferOffer, received: u64, total: u64) {
        let _ = self.tx.try_send(ReceiveEvent::Progress {
            filename: offer.filename.clone(),
            received,
            total,
        });
    }

    async fn on_complete(&self, file: &ReceivedFile) {
        let _ = self.tx.send(ReceiveEvent::Complete(file.clone())).await;
    }

    async fn on_error(&self, offer: Option<&TransferOffer>, error: &TransferError) {
        let _ = self
            .tx
            .send(ReceiveEvent::Error {
                offer: offer.cloned(),
                message: error.to_string(),
            })
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn offer() -> TransferOffer {
        TransferOffer {
            sender_name: "Yow-phone".to_string(),
            filename: "a.txt".to_string(),
            total_bytes: 3,
            item_index: 1,
            item_count: 1,
        }
    }

    fn peer() -> SocketAddr {
        SocketAddr::from(([192, 168, 1, 5], 40000))
    }

    #[tokio::test]
    async fn test_channel_sink_forwards_decision() {
        let (sink, mut rx) = ChannelSink::new(4);
        let answer = tokio::spawn(async move {
            match rx.recv().await {
                Some(ReceiveEvent::Offer(pending)) => pending.accept_and_trust(),
                other => panic!("unexpected event {other:?}"),
            }
        });

        let decision = sink.on_offer(&offer(), peer()).await;
        answer.await.unwrap();
        assert_eq!(decision, TransferDecision::accept_and_trust());
    }

    #[tokio::test]
    async fn test_dropped_pending_offer_rejects() {
        let (sink, mut rx) = ChannelSink::new(4);
        let answer = tokio::spawn(async move {
            if let Some(ReceiveEvent::Offer(pending)) = rx.recv().await {
                drop(pending);
            }
        });

        let decision = sink.on_offer(&offer(), peer()).await;
        answer.await.unwrap();
        assert!(!decision.accepted);
    }

    #[tokio::test]
    async fn test_closed_channel_rejects() {
        let (sink, rx) = ChannelSink::new(1);
        drop(rx);
        assert_eq!(sink.on_offer(&offer(), peer()).await, TransferDecision::reject());
    }

    #[tokio::test]
    async fn test_progress_never_blocks() {
        let (sink, mut rx) = ChannelSink::new(1);
        sink.on_progress(&offer(), 1, 3);
        // 通道已满，这一条被丢弃
        sink.on_progress(&offer(), 2, 3);

        match rx.try_recv() {
            Ok(ReceiveEvent::Progress { received, .. }) => assert_eq!(received, 1),
            other => panic!("unexpected event {other:?}"),
        }
        assert!(rx.try_recv().is_err());
    }

    struct RejectAll;

    #[async_trait]
    impl TransferEventSink for RejectAll {
        async fn on_offer(&self, _offer: &TransferOffer, _peer: SocketAddr) -> TransferDecision {
            TransferDecision::reject()
        }
        fn on_progress(&self, _offer: &TransferOffer, _received: u64, _total: u64) {}
        async fn on_complete(&self, _file: &ReceivedFile) {}
        async fn on_error(&self, _offer: Option<&TransferOffer>, _error: &TransferError) {}
    }

    #[tokio::test]
    async fn test_adapter_auto_accept_and_history() {
        let dir = tempfile::tempdir().unwrap();
        let history = Arc::new(HistoryStore::new(dir.path().join("history.json")));

        let manual = ReceiverSinkAdapter {
            inner: Arc::new(RejectAll),
            auto_accept: false,
            history: Some(history.clone()),
        };
        assert!(!manual.on_offer(&offer(), peer()).await.accepted);

        let auto = ReceiverSinkAdapter {
            inner: Arc::new(RejectAll),
            auto_accept: true,
            history: Some(history.clone()),
        };
        assert!(auto.on_offer(&offer(), peer()).await.accepted);

        let file = ReceivedFile {
            offer: offer(),
            path: dir.path().join("a.txt"),
            peer: peer(),
        };
        auto.on_complete(&file).await;

        let records = history.load();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].direction, Direction::Received);
        assert_eq!(records[0].filename, "a.txt");
        assert_eq!(records[0].peer, "Yow-phone@192.168.1.5");
    }
}
