//! 传输握手消息格式
//!
//! - 头部: 单行 JSON，以 `\n` 结尾
//! - 应答: `ACCEPT\n` 或 `REJECT\n`（纯 ASCII）

use serde::{Deserialize, Serialize};
use std::net::IpAddr;

use super::{TransferError, TransferOffer};

pub const ACCEPT: &str = "ACCEPT";
pub const REJECT: &str = "REJECT";
pub const ACCEPT_LINE: &[u8] = b"ACCEPT\n";
pub const REJECT_LINE: &[u8] = b"REJECT\n";

const OFFER: &str = "offer";
const DEFAULT_FILENAME: &str = "file.bin";

/// 传输头部（线上格式）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfferHeader {
    #[serde(rename = "t")]
    pub kind: String,
    #[serde(default)]
    pub sender: Option<String>,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub size: u64,
    #[serde(default = "default_one")]
    pub count: u32,
    #[serde(default = "default_one")]
    pub index: u32,
}

fn default_one() -> u32 {
    1
}

impl OfferHeader {
    pub fn from_offer(offer: &TransferOffer) -> Self {
        Self {
            kind: OFFER.to_string(),
            sender: Some(offer.sender_name.clone()),
            filename: Some(offer.filename.clone()),
            size: offer.total_bytes,
            count: offer.item_count,
            index: offer.item_index,
        }
    }

    /// 编码为以换行结尾的头部行
    pub fn to_line(&self) -> Vec<u8> {
        let mut line = serde_json::to_vec(self).unwrap_or_default();
        line.push(b'\n');
        line
    }

    /// 解析头部行（可带或不带结尾换行）
    pub fn parse(line: &[u8]) -> Result<Self, TransferError> {
        let line = line.strip_suffix(b"\n").unwrap_or(line);
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        let header: OfferHeader = serde_json::from_slice(line)
            .map_err(|e| TransferError::Protocol(format!("invalid header: {e}")))?;
        if header.kind != OFFER {
            return Err(TransferError::Protocol(format!(
                "unexpected message type: {}",
                header.kind
            )));
        }
        Ok(header)
    }

    /// 还原传输请求，缺失的发送者名称用对端 IP 代替
    pub fn into_offer(self, peer_ip: IpAddr) -> TransferOffer {
        let sender_name = self
            .sender
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| peer_ip.to_string());
        TransferOffer {
            sender_name,
            filename: sanitize_filename(self.filename.as_deref().unwrap_or_default()),
            total_bytes: self.size,
            item_index: self.index,
            item_count: self.count,
        }
    }
}

/// 只保留文件名的最后一段，防止写出下载目录
pub fn sanitize_filename(name: &str) -> String {
    let base = name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim();
    if base.is_empty() || base == "." || base == ".." {
        DEFAULT_FILENAME.to_string()
    } else {
        base.to_string()
    }
}

/// 解析应答行，只有完全等于 `ACCEPT` 才表示接受
pub fn is_accept(line: &[u8]) -> bool {
    std::str::from_utf8(line).is_ok_and(|s| s.trim() == ACCEPT)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn offer() -> TransferOffer {
        TransferOffer {
            sender_name: "Yow-laptop".to_string(),
            filename: "photo.jpg".to_string(),
            total_bytes: 1234,
            item_index: 2,
            item_count: 3,
        }
    }

    #[test]
    fn test_header_wire_format() {
        let line = OfferHeader::from_offer(&offer()).to_line();
        assert_eq!(line.last(), Some(&b'\n'));
        assert_eq!(line.iter().filter(|&&b| b == b'\n').count(), 1);

        let text = std::str::from_utf8(&line).unwrap();
        assert!(text.starts_with(r#"{"t":"offer","sender":"Yow-laptop","filename":"photo.jpg""#));
        assert!(text.contains(r#""size":1234"#));
        assert!(text.contains(r#""count":3,"index":2"#));
    }

    #[test]
    fn test_parse_restores_offer() {
        let line = OfferHeader::from_offer(&offer()).to_line();
        let parsed = OfferHeader::parse(&line).unwrap();
        assert_eq!(parsed.into_offer("10.0.0.1".parse().unwrap()), offer());
    }

    #[test]
    fn test_parse_defaults() {
        let header = OfferHeader::parse(br#"{"t":"offer"}"#).unwrap();
        let offer = header.into_offer("10.0.0.1".parse().unwrap());
        assert_eq!(offer.sender_name, "10.0.0.1");
        assert_eq!(offer.filename, "file.bin");
        assert_eq!(offer.total_bytes, 0);
        assert_eq!((offer.item_index, offer.item_count), (1, 1));
    }

    #[test]
    fn test_parse_rejects_bad_headers() {
        assert!(matches!(
            OfferHeader::parse(b"hello\n"),
            Err(TransferError::Protocol(_))
        ));
        assert!(matches!(
            OfferHeader::parse(br#"{"t":"alive","name":"x"}"#),
            Err(TransferError::Protocol(_))
        ));
        assert!(OfferHeader::parse(br#"{"t":"offer","size":-5}"#).is_err());
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("a.txt"), "a.txt");
        assert_eq!(sanitize_filename("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_filename("C:\\Users\\me\\doc.pdf"), "doc.pdf");
        assert_eq!(sanitize_filename("dir/"), "file.bin");
        assert_eq!(sanitize_filename(".."), "file.bin");
        assert_eq!(sanitize_filename(""), "file.bin");
    }

    #[test]
    fn test_decision_token() {
        assert!(is_accept(b"ACCEPT\n"));
        assert!(is_accept(b"ACCEPT\r\n"));
        assert!(!is_accept(b"REJECT\n"));
        assert!(!is_accept(b"accept\n"));
        assert!(!is_accept(b"ACCEPTED\n"));
    }
}
