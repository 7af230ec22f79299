//! 应用配置和持久化
//!
//! 提供设备名称、端口、下载目录等设置的存储和读取。
//!
//! 读取顺序：默认值 → `settings.toml` → 环境变量
//! (`YOWSHARE_DEVICE_NAME`, `YOWSHARE_DISCOVERY_PORT`,
//! `YOWSHARE_TRANSFER_PORT`, `YOWSHARE_DOWNLOAD_DIR`)。

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::logging::LogLevel;

/// 默认发现端口 (UDP)
pub const DEFAULT_DISCOVERY_PORT: u16 = 50554;
/// 默认传输端口 (TCP)
pub const DEFAULT_TRANSFER_PORT: u16 = 50555;

/// 应用设置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    /// 设备名称（在发现广播中显示）
    pub device_name: String,
    /// 发现广播端口
    pub discovery_port: u16,
    /// 文件传输监听端口
    pub transfer_port: u16,
    /// 广播目标地址
    pub broadcast_address: Ipv4Addr,
    /// 下载目录
    pub download_dir: PathBuf,
    /// 是否自动接受传输
    pub auto_accept: bool,
    /// 发送端握手超时（连接与等待 ACCEPT/REJECT）
    pub handshake_timeout_secs: u64,
    /// 接收端读取空闲超时
    pub io_timeout_secs: u64,
    /// 同时处理的入站连接上限
    pub max_concurrent_receives: usize,
    /// 日志级别
    pub log_level: LogLevel,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            device_name: get_default_device_name(),
            discovery_port: DEFAULT_DISCOVERY_PORT,
            transfer_port: DEFAULT_TRANSFER_PORT,
            broadcast_address: Ipv4Addr::BROADCAST,
            download_dir: dirs::download_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("YowShare"),
            auto_accept: false,
            handshake_timeout_secs: 8,
            io_timeout_secs: 30,
            max_concurrent_receives: 16,
            log_level: LogLevel::Info,
        }
    }
}

impl AppSettings {
    /// 获取配置文件路径
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("yowshare")
            .join("settings.toml")
    }

    /// 获取传输历史文件路径
    pub fn history_path() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("yowshare")
            .join("history.json")
    }

    /// 加载设置（文件不存在则使用默认值），并应用环境变量覆盖
    pub fn load() -> Self {
        let mut settings = Self::load_from(&Self::config_path());
        settings.apply_overrides(|key| std::env::var(key).ok());
        settings
    }

    /// 从指定路径加载设置，读取或解析失败时回退到默认值
    pub fn load_from(path: &Path) -> Self {
        if path.exists() {
            match fs::read_to_string(path) {
                Ok(content) => match toml::from_str(&content) {
                    Ok(settings) => {
                        debug!("Loaded settings from {:?}", path);
                        return settings;
                    }
                    Err(e) => {
                        warn!("Failed to parse settings: {}, using defaults", e);
                    }
                },
                Err(e) => {
                    warn!("Failed to read settings file: {}, using defaults", e);
                }
            }
        }
        Self::default()
    }

    /// 保存设置
    pub fn save(&self) -> anyhow::Result<()> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        debug!("Saved settings to {:?}", path);
        Ok(())
    }

    /// 应用环境变量覆盖，无法解析的值会被忽略
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(name) = lookup("YOWSHARE_DEVICE_NAME") {
            let name = name.trim();
            if !name.is_empty() {
                self.device_name = name.to_string();
            }
        }
        if let Some(port) = lookup("YOWSHARE_DISCOVERY_PORT").and_then(|s| s.parse().ok()) {
            self.discovery_port = port;
        }
        if let Some(port) = lookup("YOWSHARE_TRANSFER_PORT").and_then(|s| s.parse().ok()) {
            self.transfer_port = port;
        }
        if let Some(dir) = lookup("YOWSHARE_DOWNLOAD_DIR") {
            self.download_dir = PathBuf::from(dir);
        }
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_secs(self.io_timeout_secs)
    }
}

/// 获取默认设备名称（基于主机名）
fn get_default_device_name() -> String {
    hostname::get()
        .map(|h| format!("Yow-{}", h.to_string_lossy()))
        .unwrap_or_else(|_| "YowDevice".to_string())
}
