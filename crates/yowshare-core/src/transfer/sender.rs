//! TCP 发送端
//!
//! 每次调用发送一个文件：连接 → 发送头部 → 等待应答 → 分块发送内容 → 关闭。
//! 批量发送的顺序与取消由调用方负责（见 `workflow::sender`）。

use log::{debug, info};

use std::io;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time;

use super::protocol::{OfferHeader, is_accept, sanitize_filename};
use super::{CHUNK_SIZE, HANDSHAKE_TIMEOUT, SendProgress, SentFile, TransferError, TransferOffer};

/// 应答行最长 `REJECT\r\n` 加少量余量
const MAX_RESPONSE_LEN: u64 = 16;

/// 发送选项
#[derive(Debug, Clone)]
pub struct SenderOptions {
    pub connect_timeout: Duration,
    /// 发送头部后等待 `ACCEPT`/`REJECT` 的时间
    pub response_timeout: Duration,
    /// 单块写入的超时
    pub io_timeout: Duration,
}

impl Default for SenderOptions {
    fn default() -> Self {
        Self {
            connect_timeout: HANDSHAKE_TIMEOUT,
            response_timeout: HANDSHAKE_TIMEOUT,
            io_timeout: Duration::from_secs(30),
        }
    }
}

/// 文件发送端
#[derive(Debug, Clone)]
pub struct TransferSender {
    sender_name: String,
    options: SenderOptions,
}

impl TransferSender {
    pub fn new(sender_name: impl Into<String>) -> Self {
        Self {
            sender_name: sender_name.into(),
            options: SenderOptions::default(),
        }
    }

    #[must_use]
    pub fn with_options(mut self, options: SenderOptions) -> Self {
        self.options = options;
        self
    }

    pub fn sender_name(&self) -> &str {
        &self.sender_name
    }

    /// 发送单个文件
    ///
    /// 对端拒绝返回 [`TransferError::Rejected`]，网络或文件错误返回
    /// [`TransferError::Failed`]。每发送一块调用一次 `on_progress`。
    pub async fn send_file<F>(
        &self,
        peer: SocketAddr,
        path: &Path,
        item_index: u32,
        item_count: u32,
        mut on_progress: F,
    ) -> Result<SentFile, TransferError>
    where
        F: FnMut(&SendProgress) + Send,
    {
        let metadata = tokio::fs::metadata(path).await?;
        if !metadata.is_file() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} is not a regular file", path.display()),
            )
            .into());
        }
        let total = metadata.len();
        let filename = sanitize_filename(
            &path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
        );
        let offer = TransferOffer {
            sender_name: self.sender_name.clone(),
            filename,
            total_bytes: total,
            item_index,
            item_count,
        };

        let mut file = File::open(path).await?;

        debug!("Connecting to {} for '{}'", peer, offer.filename);
        let stream = time::timeout(self.options.connect_timeout, TcpStream::connect(peer))
            .await
            .map_err(|_| TransferError::timed_out("connect"))??;
        let (read_half, mut writer) = stream.into_split();

        writer
            .write_all(&OfferHeader::from_offer(&offer).to_line())
            .await?;

        let mut reader = BufReader::new(read_half);
        let mut line = Vec::new();
        time::timeout(
            self.options.response_timeout,
            (&mut reader).take(MAX_RESPONSE_LEN).read_until(b'\n', &mut line),
        )
        .await
        .map_err(|_| TransferError::timed_out("waiting for receiver decision"))??;

        // 换行之前断开是网络问题，不是拒绝
        if line.last() != Some(&b'\n') {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "no response from receiver",
            )
            .into());
        }
        if !is_accept(&line) {
            info!("'{}' rejected by {}", offer.filename, peer);
            return Err(TransferError::Rejected);
        }

        info!(
            "Sending '{}' ({} bytes, {}/{}) to {}",
            offer.filename, total, item_index, item_count, peer
        );

        let mut progress = SendProgress {
            filename: offer.filename.clone(),
            bytes_sent: 0,
            total_bytes: total,
            item_index,
            item_count,
        };

        if total == 0 {
            on_progress(&progress);
        }

        let mut buf = vec![0u8; CHUNK_SIZE];
        while progress.bytes_sent < total {
            let want = usize::try_from(total - progress.bytes_sent)
                .map_or(CHUNK_SIZE, |r| r.min(CHUNK_SIZE));
            let n = file.read(&mut buf[..want]).await?;
            if n == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("{} shrank while sending", path.display()),
                )
                .into());
            }
            time::timeout(self.options.io_timeout, writer.write_all(&buf[..n]))
                .await
                .map_err(|_| TransferError::timed_out("body write"))??;
            progress.bytes_sent += n as u64;
            on_progress(&progress);
        }

        writer.shutdown().await?;
        debug!("Finished sending '{}' to {}", offer.filename, peer);

        Ok(SentFile {
            offer,
            path: path.to_path_buf(),
            peer,
        })
    }
}
