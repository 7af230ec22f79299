//! 终端输出辅助

use std::io::Write;
use std::time::{SystemTime, UNIX_EPOCH};

/// 以人类可读的单位显示字节数
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["KB", "MB", "GB", "TB"];
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.1} {}", UNITS[unit])
}

/// 距离 Unix 时间戳过了多久
pub fn format_age(ts: u64) -> String {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default();
    let secs = now.saturating_sub(ts);
    match secs {
        0..60 => "刚刚".to_string(),
        60..3600 => format!("{} 分钟前", secs / 60),
        3600..86_400 => format!("{} 小时前", secs / 3600),
        _ => format!("{} 天前", secs / 86_400),
    }
}

pub fn percent(done: u64, total: u64) -> u64 {
    if total == 0 { 100 } else { done * 100 / total }
}

/// 在同一行刷新进度
pub fn print_progress(label: &str, done: u64, total: u64) {
    print!(
        "\r   {label}: {:>3}% ({}/{})",
        percent(done, total),
        format_size(done),
        format_size(total)
    );
    let _ = std::io::stdout().flush();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(0), "0 B");
        assert_eq!(format_size(1023), "1023 B");
        assert_eq!(format_size(1536), "1.5 KB");
        assert_eq!(format_size(5 * 1024 * 1024), "5.0 MB");
    }

    #[test]
    fn test_percent() {
        assert_eq!(percent(0, 0), 100);
        assert_eq!(percent(50, 200), 25);
        assert_eq!(percent(200, 200), 100);
    }
}
