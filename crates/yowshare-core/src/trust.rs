//! 临时信任窗口
//!
//! 用户接受传输时可以选择在两分钟内自动接受同一发送者的后续请求。
//! 过期条目只在检查时被忽略，不会主动清理（数量很少）。

use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// 信任持续时间
pub const TRUST_DURATION: Duration = Duration::from_secs(120);

/// 单个发送者的信任记录
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrustGrant {
    pub sender_key: String,
    pub expires_at: Instant,
}

#[derive(Debug)]
pub struct TrustWindow {
    duration: Duration,
    grants: Mutex<HashMap<String, TrustGrant>>,
}

impl Default for TrustWindow {
    fn default() -> Self {
        Self::new()
    }
}

impl TrustWindow {
    pub fn new() -> Self {
        Self::with_duration(TRUST_DURATION)
    }

    pub fn with_duration(duration: Duration) -> Self {
        Self {
            duration,
            grants: Mutex::new(HashMap::new()),
        }
    }

    pub fn grant(&self, sender_key: &str) -> TrustGrant {
        self.grant_at(sender_key, Instant::now())
    }

    pub fn grant_at(&self, sender_key: &str, now: Instant) -> TrustGrant {
        let grant = TrustGrant {
            sender_key: sender_key.to_string(),
            expires_at: now + self.duration,
        };
        self.grants
            .lock()
            .insert(sender_key.to_string(), grant.clone());
        grant
    }

    pub fn is_trusted(&self, sender_key: &str) -> bool {
        self.is_trusted_at(sender_key, Instant::now())
    }

    pub fn is_trusted_at(&self, sender_key: &str, now: Instant) -> bool {
        self.grants
            .lock()
            .get(sender_key)
            .is_some_and(|g| g.expires_at > now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trust_expires_after_two_minutes() {
        let trust = TrustWindow::new();
        let t0 = Instant::now();
        trust.grant_at("Yow-phone", t0);

        assert!(trust.is_trusted_at("Yow-phone", t0 + Duration::from_secs(119)));
        assert!(!trust.is_trusted_at("Yow-phone", t0 + Duration::from_secs(121)));
    }

    #[test]
    fn test_trust_is_per_sender() {
        let trust = TrustWindow::new();
        trust.grant("Yow-phone");

        assert!(trust.is_trusted("Yow-phone"));
        assert!(!trust.is_trusted("Yow-tablet"));
    }

    #[test]
    fn test_regrant_extends() {
        let trust = TrustWindow::new();
        let t0 = Instant::now();
        trust.grant_at("a", t0);
        let grant = trust.grant_at("a", t0 + Duration::from_secs(100));

        assert_eq!(grant.expires_at, t0 + Duration::from_secs(220));
        assert!(trust.is_trusted_at("a", t0 + Duration::from_secs(200)));
    }
}
