//! YowShare CLI
//!
//! 局域网文件传输命令行工具

mod display;
mod receive;
mod send;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;
use yowshare_core::{AppSettings, HistoryStore, LogLevel};

use crate::display::format_age;

#[derive(Parser)]
#[command(name = "yowshare", version, about = "YowShare - 局域网文件传输工具")]
struct Cli {
    /// 日志级别 (trace, debug, info, warn, error)，优先于 RUST_LOG
    #[arg(long, global = true)]
    log_level: Option<LogLevel>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 接收文件
    Receive {
        /// 保存目录 (默认: 设置中的下载目录)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// 不询问，自动接受所有文件
        #[arg(long)]
        auto_accept: bool,
    },
    /// 列出在线设备
    Peers {
        /// 发现时长 (秒)，不指定则持续刷新直到 Ctrl+C
        #[arg(short, long)]
        wait: Option<u64>,
    },
    /// 发送文件
    Send {
        /// 要发送的文件
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// 目标设备：名称、IP 或 IP:端口
        #[arg(short, long)]
        to: String,
        /// 按名称查找设备时最多等待的秒数
        #[arg(short, long, default_value = "5")]
        wait: u64,
    },
    /// 查看传输历史
    History {
        /// 清空历史记录
        #[arg(long)]
        clear: bool,
    },
    /// 查看或修改设置
    Config {
        /// 设置设备名称
        #[arg(long)]
        name: Option<String>,
        /// 设置下载目录
        #[arg(long)]
        download_dir: Option<PathBuf>,
    },
}

fn init_logging(flag: Option<LogLevel>, configured: LogLevel) {
    // 桥接 log crate（yowshare-core 使用）到 tracing
    let _ = tracing_log::LogTracer::init();

    let filter = match flag {
        Some(level) => EnvFilter::new(level.filter_directive()),
        None => EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(configured.filter_directive())),
    };

    // 日志写到 stderr，stdout 留给提示与进度
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let settings = AppSettings::load();
    init_logging(cli.log_level, settings.log_level);

    tracing::debug!("Settings loaded from {:?}", AppSettings::config_path());

    match cli.command {
        Commands::Receive {
            output,
            auto_accept,
        } => receive::run(settings, output, auto_accept).await?,
        Commands::Peers { wait } => send::peers(settings, wait).await?,
        Commands::Send { files, to, wait } => {
            return send::send(settings, files, to, wait).await;
        }
        Commands::History { clear } => history(clear)?,
        Commands::Config { name, download_dir } => config(settings, name, download_dir)?,
    }

    Ok(ExitCode::SUCCESS)
}

fn history(clear: bool) -> Result<()> {
    let store = HistoryStore::new(AppSettings::history_path());

    if clear {
        store.clear().context("无法清空历史记录")?;
        println!("🗑️  历史记录已清空");
        return Ok(());
    }

    let records = store.load();
    if records.is_empty() {
        println!("   暂无传输记录");
        return Ok(());
    }
    for record in &records {
        println!(
            "   {:<10} {} {} ({})",
            format_age(record.timestamp),
            record.direction.label(),
            record.filename,
            record.peer
        );
    }
    Ok(())
}

fn config(mut settings: AppSettings, name: Option<String>, download_dir: Option<PathBuf>) -> Result<()> {
    if name.is_some() || download_dir.is_some() {
        // 只写回文件中的值，环境变量覆盖不落盘
        let mut stored = AppSettings::load_from(&AppSettings::config_path());
        if let Some(name) = name {
            stored.device_name.clone_from(&name);
            settings.device_name = name;
        }
        if let Some(dir) = download_dir {
            stored.download_dir.clone_from(&dir);
            settings.download_dir = dir;
        }
        stored.save().context("无法保存设置")?;
        println!("✅ 设置已保存");
    }

    println!("⚙️  设置 ({})", AppSettings::config_path().display());
    println!("   设备名称:   {}", settings.device_name);
    println!("   下载目录:   {}", settings.download_dir.display());
    println!("   发现端口:   {} (UDP)", settings.discovery_port);
    println!("   传输端口:   {} (TCP)", settings.transfer_port);
    println!("   广播地址:   {}", settings.broadcast_address);
    println!("   自动接受:   {}", if settings.auto_accept { "是" } else { "否" });
    println!("   日志级别:   {}", settings.log_level);
    println!("   历史记录:   {}", AppSettings::history_path().display());
    Ok(())
}
