//! `receive` 子命令
//!
//! 同时运行发现信标和传输监听，在终端逐个询问传入的请求。

use anyhow::{Context, Result};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use yowshare_core::workflow::{ChannelSink, PendingOffer, ReceiveEvent, ReceiveOptions, Receiver};
use yowshare_core::{AppSettings, BeaconConfig, DiscoveryBeacon, PeerRegistry};

use crate::display::{format_size, percent, print_progress};

pub async fn run(mut settings: AppSettings, output: Option<PathBuf>, auto_accept: bool) -> Result<()> {
    if let Some(dir) = output {
        settings.download_dir = dir;
    }
    settings.auto_accept |= auto_accept;

    let (sink, mut events) = ChannelSink::new(64);
    let receiver = Receiver::new(ReceiveOptions::from_settings(&settings));
    let listener = receiver
        .start(Arc::new(sink))
        .await
        .context("无法启动文件接收服务")?;

    let beacon = DiscoveryBeacon::new(
        BeaconConfig::from_settings(&settings),
        Arc::new(PeerRegistry::new()),
    )
    .start()
    .await;

    println!(
        "📥 接收模式: '{}' (端口 {})",
        settings.device_name,
        listener.local_addr().port()
    );
    println!("   保存到: {}", settings.download_dir.display());
    if settings.auto_accept {
        println!("   自动接受所有文件");
    }
    println!("   按 Ctrl+C 退出");

    let mut answers = spawn_stdin_reader();
    let mut last_percent: Option<(String, u64)> = None;

    loop {
        let event = tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };

        match event {
            ReceiveEvent::Offer(pending) => {
                if !ask(pending, &mut answers).await {
                    break;
                }
            }
            ReceiveEvent::Progress {
                filename,
                received,
                total,
            } => {
                let pct = percent(received, total);
                if last_percent.as_ref() != Some(&(filename.clone(), pct)) {
                    print_progress(&filename, received, total);
                    last_percent = Some((filename, pct));
                }
            }
            ReceiveEvent::Complete(file) => {
                println!();
                println!(
                    "✅ 已接收 {} ← {} ({})",
                    file.path.display(),
                    file.offer.sender_name,
                    format_size(file.offer.total_bytes)
                );
                last_percent = None;
            }
            ReceiveEvent::Error { offer, message } => {
                println!();
                match offer {
                    Some(offer) => println!("❌ 接收 {} 失败: {}", offer.filename, message),
                    None => println!("❌ 连接出错: {}", message),
                }
                last_percent = None;
            }
        }
    }

    println!();
    println!("⏹️  停止接收...");
    listener.shutdown().await;
    beacon.shutdown().await;
    Ok(())
}

/// 询问用户是否接受，返回 `false` 表示用户按下了 Ctrl+C
async fn ask(pending: PendingOffer, answers: &mut mpsc::Receiver<String>) -> bool {
    let offer = &pending.offer;
    println!();
    println!(
        "📨 {} ({}) 想发送 '{}' ({}) [{}/{}]",
        offer.sender_name,
        pending.peer.ip(),
        offer.filename,
        format_size(offer.total_bytes),
        offer.item_index,
        offer.item_count
    );
    print!("   接受? [y]es / [n]o / [t]rust 2 min: ");
    let _ = std::io::stdout().flush();

    let answer = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            pending.reject();
            return false;
        }
        answer = answers.recv() => answer.unwrap_or_default(),
    };

    match answer.trim().to_lowercase().as_str() {
        "y" | "yes" => pending.accept(),
        "t" | "trust" => {
            println!("   两分钟内自动接受 {} 的文件", offer.sender_name);
            pending.accept_and_trust();
        }
        _ => {
            println!("   已拒绝");
            pending.reject();
        }
    }
    true
}

/// 在独立线程中按行读取标准输入
///
/// 阻塞的读取不能放在运行时里，否则退出时会一直等待输入。
fn spawn_stdin_reader() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(8);
    std::thread::spawn(move || {
        for line in std::io::stdin().lines() {
            let Ok(line) = line else { break };
            if tx.blocking_send(line).is_err() {
                break;
            }
        }
    });
    rx
}
