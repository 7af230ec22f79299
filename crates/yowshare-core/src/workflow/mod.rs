//! 工作流模块
//!
//! 提供高层 API 封装完整的发送/接收流程

pub mod receiver;
pub mod sender;

pub use receiver::{ChannelSink, PendingOffer, ReceiveEvent, ReceiveOptions, Receiver};
pub use sender::{
    BatchReport, SendEvent, SendOptions, SendProgressCallback, Sender, SimpleSendCallback,
};
