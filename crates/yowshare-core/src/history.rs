//! 传输历史
//!
//! JSON 数组，最新的记录在最前，最多保留 [`HISTORY_LIMIT`] 条。
//!
//! ```json
//! [{"ts": 1700000000, "type": "received", "file": "a.txt", "peer": "Yow-phone@192.168.1.5"}]
//! ```

use log::{debug, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

pub const HISTORY_LIMIT: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Sent,
    Received,
}

impl Direction {
    /// 列表中显示的短标签
    pub fn label(&self) -> &'static str {
        match self {
            Direction::Sent => "SENT",
            Direction::Received => "RECV",
        }
    }
}

/// 一条传输记录
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRecord {
    /// Unix 时间戳（秒）
    #[serde(rename = "ts")]
    pub timestamp: u64,
    #[serde(rename = "type")]
    pub direction: Direction,
    #[serde(rename = "file")]
    pub filename: String,
    /// `name@ip`
    pub peer: String,
}

impl TransferRecord {
    pub fn now(direction: Direction, filename: impl Into<String>, peer: impl Into<String>) -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        Self {
            timestamp,
            direction,
            filename: filename.into(),
            peer: peer.into(),
        }
    }
}

/// 基于文件的历史存储
#[derive(Debug)]
pub struct HistoryStore {
    path: PathBuf,
    // 串行化同一进程内的读-改-写
    lock: Mutex<()>,
}

impl HistoryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 读取全部记录，文件不存在或损坏时返回空列表
    pub fn load(&self) -> Vec<TransferRecord> {
        let _guard = self.lock.lock();
        self.read()
    }

    /// 在最前面插入一条记录，超出上限的旧记录被丢弃
    pub fn append(&self, record: TransferRecord) -> anyhow::Result<()> {
        let _guard = self.lock.lock();
        let mut records = self.read();
        records.insert(0, record);
        records.truncate(HISTORY_LIMIT);
        self.write(&records)
    }

    /// [`append`](Self::append) 的异步版本，文件读写放到阻塞线程池
    pub async fn append_async(self: Arc<Self>, record: TransferRecord) -> anyhow::Result<()> {
        tokio::task::spawn_blocking(move || self.append(record)).await?
    }

    pub fn clear(&self) -> anyhow::Result<()> {
        let _guard = self.lock.lock();
        self.write(&[])
    }

    fn read(&self) -> Vec<TransferRecord> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(_) => return Vec::new(),
        };
        serde_json::from_str(&content).unwrap_or_else(|e| {
            warn!("Ignoring unreadable history {:?}: {}", self.path, e);
            Vec::new()
        })
    }

    fn write(&self, records: &[TransferRecord]) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, serde_json::to_string_pretty(records)?)?;
        debug!("Wrote {} history records to {:?}", records.len(), self.path);
        Ok(())
    }
}
