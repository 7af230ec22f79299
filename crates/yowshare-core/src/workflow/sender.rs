//! 发送端工作流
//!
//! 高层 API 封装批量发送:
//! 1. 按顺序逐个发送文件，序号从 1 开始
//! 2. 每个文件开始前检查取消令牌
//! 3. 发送成功后写入历史记录
//!
//! 第一个失败的文件会中止整个批次。

use async_trait::async_trait;
use log::{info, warn};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::AppSettings;
use crate::history::{Direction, HistoryStore, TransferRecord};
use crate::transfer::{SendProgress, SenderOptions, SentFile, TransferError, TransferSender};

/// 发送进度回调
#[async_trait]
pub trait SendProgressCallback: Send + Sync {
    /// 每发送一块调用一次，不能阻塞
    fn on_progress(&self, progress: &SendProgress);
    /// 单个文件发送完成
    async fn on_file_done(&self, _file: &SentFile) {}
}

/// 发送选项
#[derive(Debug, Clone)]
pub struct SendOptions {
    /// 发送者名称 (写入头部的 `sender`)
    pub sender_name: String,
    pub transfer: SenderOptions,
    /// 历史记录存储，`None` 表示不记录
    pub history: Option<Arc<HistoryStore>>,
}

impl SendOptions {
    pub fn from_settings(settings: &AppSettings) -> Self {
        Self {
            sender_name: settings.device_name.clone(),
            transfer: SenderOptions {
                connect_timeout: settings.handshake_timeout(),
                response_timeout: settings.handshake_timeout(),
                ..SenderOptions::default()
            },
            history: Some(Arc::new(HistoryStore::new(AppSettings::history_path()))),
        }
    }
}

/// 批量发送结果
#[derive(Debug, Default)]
pub struct BatchReport {
    /// 已发送完成的文件
    pub sent: Vec<SentFile>,
    /// 是否在发送完所有文件前被取消
    pub cancelled: bool,
}

/// 发送端工作流
pub struct Sender {
    transfer: TransferSender,
    history: Option<Arc<HistoryStore>>,
}

impl Sender {
    pub fn new(options: SendOptions) -> Self {
        Self {
            transfer: TransferSender::new(options.sender_name).with_options(options.transfer),
            history: options.history,
        }
    }

    pub fn sender_name(&self) -> &str {
        self.transfer.sender_name()
    }

    /// 按顺序发送文件到 `peer`
    ///
    /// `peer_name` 仅用于历史记录 (`name@ip`)。
    pub async fn send_batch<C: SendProgressCallback>(
        &self,
        peer: SocketAddr,
        peer_name: &str,
        files: &[PathBuf],
        cancel: &CancellationToken,
        callback: &C,
    ) -> Result<BatchReport, TransferError> {
        let count = u32::try_from(files.len()).unwrap_or(u32::MAX);
        let mut report = BatchReport::default();

        for (index, path) in (1..=count).zip(files) {
            if cancel.is_cancelled() {
                info!("Batch cancelled after {} of {} files", report.sent.len(), count);
                report.cancelled = true;
                break;
            }

            let sent = self
                .transfer
                .send_file(peer, path, index, count, |p| callback.on_progress(p))
                .await?;

            if let Some(history) = &self.history {
                let record = TransferRecord::now(
                    Direction::Sent,
                    &sent.offer.filename,
                    format!("{}@{}", peer_name, peer.ip()),
                );
                if let Err(e) = history.clone().append_async(record).await {
                    warn!("Failed to record history for '{}': {}", sent.offer.filename, e);
                }
            }

            callback.on_file_done(&sent).await;
            report.sent.push(sent);
        }

        Ok(report)
    }
}

/// 简化的发送回调实现
///
/// 进度事件在通道满时丢弃，完成事件会等待通道有空位。
pub struct SimpleSendCallback {
    tx: mpsc::Sender<SendEvent>,
}

#[derive(Debug, Clone)]
pub enum SendEvent {
    Progress(SendProgress),
    FileDone(SentFile),
}

impl SimpleSendCallback {
    pub fn new() -> (Self, mpsc::Receiver<SendEvent>) {
        let (tx, rx) = mpsc::channel(32);
        (Self { tx }, rx)
    }
}

#[async_trait]
impl SendProgressCallback for SimpleSendCallback {
    fn on_progress(&self, progress: &SendProgress) {
        let _ = self.tx.try_send(SendEvent::Progress(progress.clone()));
    }

    async fn on_file_done(&self, file: &SentFile) {
        let _ = self.tx.send(SendEvent::FileDone(file.clone())).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfer::TransferOffer;
    use std::time::Duration;

    fn sent_file() -> SentFile {
        SentFile {
            offer: TransferOffer {
                sender_name: "me".to_string(),
                filename: "a.bin".to_string(),
                total_bytes: 40,
                item_index: 1,
                item_count: 1,
            },
            path: PathBuf::from("a.bin"),
            peer: SocketAddr::from(([127, 0, 0, 1], 53318)),
        }
    }

    #[tokio::test]
    async fn test_file_done_survives_full_channel() {
        let (callback, mut rx) = SimpleSendCallback::new();
        let sent = sent_file();
        for i in 0..40 {
            callback.on_progress(&SendProgress {
                filename: "a.bin".to_string(),
                bytes_sent: i,
                total_bytes: 40,
                item_index: 1,
                item_count: 1,
            });
        }

        let drain = async {
            let mut progress = 0;
            while let Some(event) = rx.recv().await {
                match event {
                    SendEvent::Progress(_) => progress += 1,
                    SendEvent::FileDone(file) => return (progress, file),
                }
            }
            panic!("channel closed without a completion event");
        };

        let ((), (progress, file)) = tokio::time::timeout(
            Duration::from_secs(5),
            async { tokio::join!(callback.on_file_done(&sent), drain) },
        )
        .await
        .expect("completion event was not delivered");

        // 通道容量 32，多出的进度事件被丢弃
        assert_eq!(progress, 32);
        assert_eq!(file, sent);
    }

    #[tokio::test]
    async fn test_cancelled_before_first_file() {
        let sender = Sender::new(SendOptions {
            sender_name: "me".to_string(),
            transfer: SenderOptions::default(),
            history: None,
        });
        let cancel = CancellationToken::new();
        cancel.cancel();
        let (callback, _rx) = SimpleSendCallback::new();

        // 地址不可达也无所谓：取消检查在连接之前
        let report = sender
            .send_batch(
                SocketAddr::from(([127, 0, 0, 1], 9)),
                "peer",
                &[PathBuf::from("missing.bin")],
                &cancel,
                &callback,
            )
            .await
            .unwrap();

        assert!(report.cancelled);
        assert!(report.sent.is_empty());
    }

    #[tokio::test]
    async fn test_missing_file_aborts_batch() {
        let sender = Sender::new(SendOptions {
            sender_name: "me".to_string(),
            transfer: SenderOptions::default(),
            history: None,
        });
        let (callback, _rx) = SimpleSendCallback::new();
        let dir = tempfile::tempdir().unwrap();

        let result = sender
            .send_batch(
                SocketAddr::from(([127, 0, 0, 1], 9)),
                "peer",
                &[dir.path().join("missing.bin")],
                &CancellationToken::new(),
                &callback,
            )
            .await;

        assert!(matches!(result, Err(TransferError::Failed(_))));
    }
}
