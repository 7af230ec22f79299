//! `send` 与 `peers` 子命令

use anyhow::{Result, bail};
use async_trait::async_trait;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use yowshare_core::transfer::{SendProgress, SentFile};
use yowshare_core::workflow::{SendOptions, SendProgressCallback, Sender};
use yowshare_core::{
    AppSettings, BeaconConfig, BeaconHandle, DiscoveryBeacon, PeerRecord, PeerRegistry,
    TransferError,
};

use crate::display::{format_size, percent, print_progress};

/// 设备列表刷新间隔
const REFRESH_INTERVAL: Duration = Duration::from_millis(1500);
const LOOKUP_POLL: Duration = Duration::from_millis(200);

async fn start_discovery(settings: &AppSettings) -> (Arc<PeerRegistry>, BeaconHandle) {
    let registry = Arc::new(PeerRegistry::new());
    let beacon = DiscoveryBeacon::new(BeaconConfig::from_settings(settings), registry.clone())
        .start()
        .await;
    if !beacon.is_receiving() {
        println!("⚠️  发现端口 {} 被占用，无法发现设备", settings.discovery_port);
    }
    (registry, beacon)
}

fn print_peers(peers: &[PeerRecord]) {
    if peers.is_empty() {
        println!("   未发现设备");
        return;
    }
    for (i, peer) in peers.iter().enumerate() {
        println!("   [{}] {} ({})", i, peer.display_name, peer.socket_addr());
    }
}

pub async fn peers(settings: AppSettings, wait: Option<u64>) -> Result<()> {
    let (registry, beacon) = start_discovery(&settings).await;
    println!("🔍 正在发现设备 (本机: '{}')...", settings.device_name);

    let deadline = wait.map(|secs| tokio::time::Instant::now() + Duration::from_secs(secs));
    let mut shown: Option<Vec<(String, SocketAddr)>> = None;
    let mut ticker = tokio::time::interval(REFRESH_INTERVAL);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = ticker.tick() => {}
        }

        let peers = registry.list_alive();
        let snapshot: Vec<_> = peers
            .iter()
            .map(|p| (p.display_name.clone(), p.socket_addr()))
            .collect();
        if shown.as_ref() != Some(&snapshot) {
            println!("📡 在线设备 ({}):", peers.len());
            print_peers(&peers);
            shown = Some(snapshot);
        }

        if deadline.is_some_and(|d| tokio::time::Instant::now() >= d) {
            break;
        }
    }

    beacon.shutdown().await;
    Ok(())
}

/// 目标设备
struct Target {
    name: String,
    addr: SocketAddr,
}

/// 解析 `--to`：`IP:端口`、`IP` 或设备名称（需要等待发现）
async fn resolve(
    query: &str,
    registry: &PeerRegistry,
    settings: &AppSettings,
    wait: Duration,
) -> Result<Target> {
    if let Ok(addr) = query.parse::<SocketAddr>() {
        let name = registry
            .find(query)
            .map_or_else(|| addr.ip().to_string(), |p| p.display_name);
        return Ok(Target { name, addr });
    }

    if let Ok(ip) = query.parse::<IpAddr>() {
        return Ok(match registry.find(query) {
            Some(peer) => Target {
                addr: peer.socket_addr(),
                name: peer.display_name,
            },
            None => Target {
                name: ip.to_string(),
                addr: SocketAddr::new(ip, settings.transfer_port),
            },
        });
    }

    let found = tokio::time::timeout(wait, async {
        loop {
            if let Some(peer) = registry.find(query) {
                return peer;
            }
            tokio::time::sleep(LOOKUP_POLL).await;
        }
    })
    .await;

    match found {
        Ok(peer) => Ok(Target {
            addr: peer.socket_addr(),
            name: peer.display_name,
        }),
        Err(_) => {
            println!("📡 在线设备:");
            print_peers(&registry.list_alive());
            bail!("{} 秒内未发现设备 '{}'", wait.as_secs(), query)
        }
    }
}

/// 在终端显示发送进度
struct ConsoleProgress {
    last_percent: AtomicU64,
}

#[async_trait]
impl SendProgressCallback for ConsoleProgress {
    fn on_progress(&self, progress: &SendProgress) {
        let pct = percent(progress.bytes_sent, progress.total_bytes);
        if self.last_percent.swap(pct, Ordering::Relaxed) != pct || progress.bytes_sent == 0 {
            let label = format!(
                "[{}/{}] {}",
                progress.item_index, progress.item_count, progress.filename
            );
            print_progress(&label, progress.bytes_sent, progress.total_bytes);
        }
    }

    async fn on_file_done(&self, file: &SentFile) {
        self.last_percent.store(u64::MAX, Ordering::Relaxed);
        println!();
        println!(
            "✅ 已发送 {} ({})",
            file.offer.filename,
            format_size(file.offer.total_bytes)
        );
    }
}

pub async fn send(settings: AppSettings, files: Vec<PathBuf>, to: String, wait: u64) -> Result<ExitCode> {
    for path in &files {
        if !path.is_file() {
            bail!("不是可读取的文件: {}", path.display());
        }
    }

    let (registry, beacon) = start_discovery(&settings).await;
    let target = match resolve(&to, &registry, &settings, Duration::from_secs(wait)).await {
        Ok(target) => target,
        Err(e) => {
            beacon.shutdown().await;
            return Err(e);
        }
    };

    println!(
        "📤 发送 {} 个文件到 {} ({})",
        files.len(),
        target.name,
        target.addr
    );

    let cancel = CancellationToken::new();
    let on_ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            println!();
            println!("⏹️  当前文件完成后停止");
            on_ctrl_c.cancel();
        }
    });

    let sender = Sender::new(SendOptions::from_settings(&settings));
    let progress = ConsoleProgress {
        last_percent: AtomicU64::new(u64::MAX),
    };
    let result = sender
        .send_batch(target.addr, &target.name, &files, &cancel, &progress)
        .await;
    beacon.shutdown().await;

    match result {
        Ok(report) if report.cancelled => {
            println!("⏹️  已取消，发送了 {}/{} 个文件", report.sent.len(), files.len());
            Ok(ExitCode::FAILURE)
        }
        Ok(report) => {
            println!("🎉 全部完成 ({} 个文件)", report.sent.len());
            Ok(ExitCode::SUCCESS)
        }
        Err(TransferError::Rejected) => {
            println!();
            println!("🚫 {} 拒绝了传输", target.name);
            Ok(ExitCode::FAILURE)
        }
        Err(e) => {
            println!();
            println!("❌ 发送失败: {}", e);
            Ok(ExitCode::FAILURE)
        }
    }
}
