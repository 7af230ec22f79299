//! TCP 接收端
//!
//! 接受循环每次接受一个连接，并把它交给独立任务处理，
//! 多个发送端同时传输时互不阻塞。并发连接数由信号量限制。
//!
//! 每个连接的流程:
//! 1. 读取一行 JSON 头部
//! 2. 信任窗口命中则直接接受，否则等待 [`TransferEventSink::on_offer`]
//! 3. 回复 `ACCEPT` / `REJECT`
//! 4. 接受后按 64 KiB 分块写入，直到恰好收到 `size` 字节

use log::{debug, info, warn};

use std::io;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time;
use tokio_util::sync::CancellationToken;

use super::protocol::{ACCEPT_LINE, OfferHeader, REJECT_LINE};
use super::storage::{release_reservation, reserve_destination};
use super::{
    CHUNK_SIZE, MAX_HEADER_LEN, ReceivedFile, TransferDecision, TransferError,
    TransferEventSink, TransferOffer,
};
use crate::config::AppSettings;
use crate::trust::TrustWindow;

/// 接收端配置
#[derive(Debug, Clone)]
pub struct ListenerConfig {
    pub bind_addr: SocketAddr,
    /// 默认保存目录
    pub download_dir: PathBuf,
    /// 读取头部和文件内容时的空闲超时
    pub io_timeout: Duration,
    /// 同时处理的连接上限
    pub max_connections: usize,
}

impl ListenerConfig {
    pub fn new(bind_addr: SocketAddr, download_dir: PathBuf) -> Self {
        Self {
            bind_addr,
            download_dir,
            io_timeout: Duration::from_secs(30),
            max_connections: 16,
        }
    }

    pub fn from_settings(settings: &AppSettings) -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], settings.transfer_port)),
            download_dir: settings.download_dir.clone(),
            io_timeout: settings.io_timeout(),
            max_connections: settings.max_concurrent_receives,
        }
    }
}

/// 文件接收服务
pub struct TransferListener {
    config: ListenerConfig,
    sink: Arc<dyn TransferEventSink>,
    trust: Option<Arc<TrustWindow>>,
}

impl TransferListener {
    pub fn new(config: ListenerConfig, sink: Arc<dyn TransferEventSink>) -> Self {
        Self {
            config,
            sink,
            trust: None,
        }
    }

    /// 启用信任窗口：命中时跳过决定回调，接受时按需记录信任
    #[must_use]
    pub fn with_trust_window(mut self, trust: Arc<TrustWindow>) -> Self {
        self.trust = Some(trust);
        self
    }

    /// 绑定端口并启动接受循环
    ///
    /// 绑定失败返回 [`TransferError::BindFailed`]，调用方应放弃接收功能而不是重试。
    pub async fn bind(self) -> Result<ListenerHandle, TransferError> {
        let addr = self.config.bind_addr;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| TransferError::BindFailed { addr, source })?;
        let local_addr = listener.local_addr()?;
        info!("Transfer listener bound to {}", local_addr);

        let shutdown = CancellationToken::new();
        let permits = Arc::new(Semaphore::new(self.config.max_connections.max(1)));
        let ctx = Arc::new(ConnectionContext {
            sink: self.sink,
            trust: self.trust,
            download_dir: self.config.download_dir,
            io_timeout: self.config.io_timeout,
        });

        let task = tokio::spawn(accept_loop(listener, ctx, permits, shutdown.clone()));

        Ok(ListenerHandle {
            local_addr,
            shutdown,
            task: Some(task),
        })
    }
}

async fn accept_loop(
    listener: TcpListener,
    ctx: Arc<ConnectionContext>,
    permits: Arc<Semaphore>,
    shutdown: CancellationToken,
) {
    loop {
        let permit = tokio::select! {
            () = shutdown.cancelled() => break,
            permit = permits.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        let (stream, peer) = tokio::select! {
            () = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok(conn) => conn,
                Err(e) => {
                    warn!("Failed to accept connection: {}", e);
                    time::sleep(Duration::from_millis(100)).await;
                    continue;
                }
            },
        };

        debug!("Incoming connection from {}", peer);
        let ctx = ctx.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            ctx.serve(stream, peer, &shutdown).await;
            drop(permit);
        });
    }
    info!("Transfer listener stopped");
}

/// 所有连接共享的状态
struct ConnectionContext {
    sink: Arc<dyn TransferEventSink>,
    trust: Option<Arc<TrustWindow>>,
    download_dir: PathBuf,
    io_timeout: Duration,
}

impl ConnectionContext {
    async fn serve(&self, stream: TcpStream, peer: SocketAddr, shutdown: &CancellationToken) {
        let (read_half, mut writer) = stream.into_split();
        let mut reader = BufReader::with_capacity(CHUNK_SIZE, read_half);

        let offer = match self.read_offer(&mut reader, peer).await {
            Ok(offer) => offer,
            Err(e) => {
                warn!("Dropping connection from {}: {}", peer, e);
                self.sink.on_error(None, &e).await;
                return;
            }
        };

        debug!(
            "Offer from {} ({}): '{}' {} bytes, item {}/{}",
            offer.sender_name,
            peer,
            offer.filename,
            offer.total_bytes,
            offer.item_index,
            offer.item_count
        );

        match self
            .negotiate_and_receive(&offer, peer, &mut reader, &mut writer, shutdown)
            .await
        {
            Ok(Some(path)) => {
                info!("Received '{}' from {} -> {:?}", offer.filename, peer, path);
                let file = ReceivedFile { offer, path, peer };
                self.sink.on_complete(&file).await;
            }
            Ok(None) => {}
            Err(e) => {
                warn!("Receive of '{}' from {} failed: {}", offer.filename, peer, e);
                self.sink.on_error(Some(&offer), &e).await;
            }
        }
    }

    /// 读取并解析头部行，头部之后多读到的字节留在 `reader` 的缓冲区中
    async fn read_offer(
        &self,
        reader: &mut BufReader<OwnedReadHalf>,
        peer: SocketAddr,
    ) -> Result<TransferOffer, TransferError> {
        let mut line = Vec::new();
        let read = time::timeout(
            self.io_timeout,
            (&mut *reader).take(MAX_HEADER_LEN).read_until(b'\n', &mut line),
        )
        .await;

        match read {
            Err(_) => return Err(TransferError::Protocol("no header before timeout".into())),
            Ok(Err(e)) => {
                return Err(TransferError::Protocol(format!(
                    "connection lost before header: {e}"
                )));
            }
            Ok(Ok(_)) => {}
        }

        if line.last() != Some(&b'\n') {
            let reason = if line.len() as u64 >= MAX_HEADER_LEN {
                "header line too long"
            } else {
                "disconnected before header"
            };
            return Err(TransferError::Protocol(reason.into()));
        }

        Ok(OfferHeader::parse(&line)?.into_offer(peer.ip()))
    }

    async fn negotiate_and_receive(
        &self,
        offer: &TransferOffer,
        peer: SocketAddr,
        reader: &mut BufReader<OwnedReadHalf>,
        writer: &mut OwnedWriteHalf,
        shutdown: &CancellationToken,
    ) -> Result<Option<PathBuf>, TransferError> {
        let decision = self.decide(offer, peer, shutdown).await?;

        if !decision.accepted {
            info!("Rejected '{}' from {}", offer.filename, offer.sender_name);
            writer.write_all(REJECT_LINE).await?;
            let _ = writer.shutdown().await;
            return Ok(None);
        }

        if decision.trust_sender
            && let Some(trust) = &self.trust
        {
            trust.grant(&offer.sender_name);
            info!("Trusting '{}' for follow-up transfers", offer.sender_name);
        }

        // 在写入任何字节之前确定最终文件名
        let wanted = decision
            .destination
            .unwrap_or_else(|| self.download_dir.join(&offer.filename));
        let (path, file) = match reserve_destination(&wanted).await {
            Ok(reserved) => reserved,
            Err(e) => {
                let _ = writer.write_all(REJECT_LINE).await;
                return Err(e.into());
            }
        };

        if let Err(e) = writer.write_all(ACCEPT_LINE).await {
            release_reservation(file, &path).await;
            return Err(e.into());
        }
        self.receive_body(offer, reader, file, &path).await?;
        Ok(Some(path))
    }

    async fn decide(
        &self,
        offer: &TransferOffer,
        peer: SocketAddr,
        shutdown: &CancellationToken,
    ) -> Result<TransferDecision, TransferError> {
        if self
            .trust
            .as_ref()
            .is_some_and(|t| t.is_trusted(&offer.sender_name))
        {
            info!("Auto-accepting '{}' from trusted sender '{}'", offer.filename, offer.sender_name);
            return Ok(TransferDecision::accept());
        }

        tokio::select! {
            decision = self.sink.on_offer(offer, peer) => Ok(decision),
            () = shutdown.cancelled() => Err(TransferError::Cancelled),
        }
    }

    async fn receive_body(
        &self,
        offer: &TransferOffer,
        reader: &mut BufReader<OwnedReadHalf>,
        mut file: File,
        path: &Path,
    ) -> Result<(), TransferError> {
        let total = offer.total_bytes;
        let mut buf = vec![0u8; CHUNK_SIZE];
        let mut received: u64 = 0;

        if total == 0 {
            self.sink.on_progress(offer, 0, 0);
        }

        while received < total {
            let want = usize::try_from(total - received).map_or(CHUNK_SIZE, |r| r.min(CHUNK_SIZE));
            let read = time::timeout(self.io_timeout, reader.read(&mut buf[..want])).await;

            let n = match read {
                Ok(Ok(n)) => n,
                Ok(Err(e)) if is_disconnect(&e) => 0,
                Ok(Err(e)) => {
                    let _ = file.flush().await;
                    return Err(e.into());
                }
                Err(_) => {
                    let _ = file.flush().await;
                    return Err(TransferError::timed_out("body read"));
                }
            };

            if n == 0 {
                // 保留已收到的部分，由调用方决定是否删除
                file.flush().await?;
                return Err(TransferError::Incomplete {
                    path: path.to_path_buf(),
                    received,
                    expected: total,
                });
            }

            file.write_all(&buf[..n]).await?;
            received += n as u64;
            self.sink.on_progress(offer, received, total);
        }

        file.flush().await?;
        Ok(())
    }
}

fn is_disconnect(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::UnexpectedEof
    )
}

/// 运行中的接收服务
///
/// 停止时会释放所有等待用户决定的连接（结果为 [`TransferError::Cancelled`]），
/// 已经开始传输的连接继续运行直到完成或失败。
pub struct ListenerHandle {
    local_addr: SocketAddr,
    shutdown: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl ListenerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub async fn shutdown(mut self) {
        self.shutdown.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
