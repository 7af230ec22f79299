//! 目标文件命名
//!
//! 目标已存在时在扩展名前追加当前 Unix 时间戳 (`a.txt` → `a_1700000000.txt`)，
//! 同一秒内再次冲突则继续追加序号 (`a_1700000000_1.txt`)。
//! 文件以 create-new 方式创建，并发的接收任务不会得到同一个文件名。

use log::debug;

use std::io;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::fs::{File, OpenOptions, create_dir_all};

const MAX_ATTEMPTS: u32 = 10_000;

/// 为接收文件占用一个不冲突的路径，返回实际路径与已创建的空文件
pub async fn reserve_destination(wanted: &Path) -> io::Result<(PathBuf, File)> {
    if let Some(parent) = wanted.parent().filter(|p| !p.as_os_str().is_empty()) {
        create_dir_all(parent).await?;
    }

    match create_new(wanted).await {
        Ok(file) => return Ok((wanted.to_path_buf(), file)),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
        Err(e) => return Err(e),
    }

    let stamp = unix_now();
    for attempt in 0..MAX_ATTEMPTS {
        let candidate = disambiguated(wanted, stamp, attempt);
        match create_new(&candidate).await {
            Ok(file) => {
                debug!("{:?} exists, saving as {:?}", wanted, candidate);
                return Ok((candidate, file));
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
            Err(e) => return Err(e),
        }
    }

    Err(io::Error::new(
        io::ErrorKind::AlreadyExists,
        format!("no free file name for {}", wanted.display()),
    ))
}

/// 放弃一个已占用但还没写入内容的路径
pub async fn release_reservation(file: File, path: &Path) {
    drop(file);
    if let Err(e) = tokio::fs::remove_file(path).await {
        debug!("Failed to remove unused {:?}: {}", path, e);
    }
}

/// `dir/stem.ext` → `dir/stem_<stamp>.ext`，`attempt > 0` 时再追加 `_<attempt>`
pub fn disambiguated(path: &Path, stamp: u64, attempt: u32) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let mut name = if attempt == 0 {
        format!("{stem}_{stamp}")
    } else {
        format!("{stem}_{stamp}_{attempt}")
    };
    if let Some(ext) = path.extension() {
        name.push('.');
        name.push_str(&ext.to_string_lossy());
    }
    path.with_file_name(name)
}

async fn create_new(path: &Path) -> io::Result<File> {
    OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}
