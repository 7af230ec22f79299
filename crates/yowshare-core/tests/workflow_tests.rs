//! 集成测试 - 发送/接收工作流
//!
//! 接收端使用 `ChannelSink` 逐个回应请求，发送端批量发送，双方都写入历史记录。

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use yowshare_core::workflow::{
    ChannelSink, ReceiveEvent, ReceiveOptions, Receiver, SendEvent, SendOptions, Sender,
    SimpleSendCallback,
};
use yowshare_core::{Direction, HistoryStore, ListenerConfig, ReceivedFile, TransferError};
use yowshare_core::transfer::SenderOptions;

const WAIT: Duration = Duration::from_secs(10);

fn receive_options(download_dir: &Path, history: Arc<HistoryStore>) -> ReceiveOptions {
    ReceiveOptions {
        listener: ListenerConfig::new("127.0.0.1:0".parse().unwrap(), download_dir.to_path_buf()),
        auto_accept: false,
        history: Some(history),
    }
}

fn send_options(history: Arc<HistoryStore>) -> SendOptions {
    SendOptions {
        sender_name: "Yow-laptop".to_string(),
        transfer: SenderOptions::default(),
        history: Some(history),
    }
}

/// 按文件名决定：`skip` 开头的文件被拒绝，其他接受并信任
async fn answer_offers(mut events: mpsc::Receiver<ReceiveEvent>, done: mpsc::UnboundedSender<ReceivedFile>) {
    while let Some(event) = events.recv().await {
        match event {
            ReceiveEvent::Offer(pending) if pending.offer.filename.starts_with("skip") => {
                pending.reject();
            }
            ReceiveEvent::Offer(pending) => pending.accept_and_trust(),
            ReceiveEvent::Complete(file) => {
                let _ = done.send(file);
            }
            ReceiveEvent::Progress { .. } | ReceiveEvent::Error { .. } => {}
        }
    }
}

#[tokio::test]
async fn test_batch_send_records_history_on_both_sides() {
    let src = tempfile::tempdir().unwrap();
    let dst = tempfile::tempdir().unwrap();
    let state = tempfile::tempdir().unwrap();
    let recv_history = Arc::new(HistoryStore::new(state.path().join("recv.json")));
    let send_history = Arc::new(HistoryStore::new(state.path().join("send.json")));

    let (sink, events) = ChannelSink::new(32);
    let receiver = Receiver::new(receive_options(dst.path(), recv_history.clone()));
    let handle = receiver.start(Arc::new(sink)).await.unwrap();
    let (done_tx, mut done) = mpsc::unbounded_channel();
    tokio::spawn(answer_offers(events, done_tx));

    let files: Vec<_> = ["one.txt", "two.txt", "three.txt"]
        .iter()
        .map(|name| {
            let path = src.path().join(name);
            std::fs::write(&path, name.as_bytes()).unwrap();
            path
        })
        .collect();

    let sender = Sender::new(send_options(send_history.clone()));
    let (callback, mut progress) = SimpleSendCallback::new();
    let report = sender
        .send_batch(
            handle.local_addr(),
            "Yow-desk",
            &files,
            &CancellationToken::new(),
            &callback,
        )
        .await
        .unwrap();

    assert!(!report.cancelled);
    assert_eq!(report.sent.len(), 3);
    let indices: Vec<_> = report.sent.iter().map(|s| s.offer.item_index).collect();
    assert_eq!(indices, vec![1, 2, 3]);
    assert!(report.sent.iter().all(|s| s.offer.item_count == 3));

    for _ in 0..3 {
        tokio::time::timeout(WAIT, done.recv()).await.unwrap().unwrap();
    }
    // 第一个文件选择了信任，后续请求不再经过通道
    assert!(receiver.trust_window().is_trusted("Yow-laptop"));

    let received = recv_history.load();
    assert_eq!(received.len(), 3);
    assert!(received.iter().all(|r| r.direction == Direction::Received));
    assert!(received.iter().all(|r| r.peer == "Yow-laptop@127.0.0.1"));

    let sent = send_history.load();
    let names: Vec<_> = sent.iter().map(|r| r.filename.as_str()).collect();
    // 最新的在最前
    assert_eq!(names, vec!["three.txt", "two.txt", "one.txt"]);
    assert!(sent.iter().all(|r| r.peer == "Yow-desk@127.0.0.1"));

    let mut finished = 0;
    while let Ok(event) = progress.try_recv() {
        if let SendEvent::FileDone(_) = event {
            finished += 1;
        }
    }
    assert_eq!(finished, 3);

    handle.shutdown().await;
}

#[tokio::test]
async fn test_rejection_aborts_batch() {
    let src = tempfile::tempdir().unwrap();
    let dst = tempfile::tempdir().unwrap();
    let state = tempfile::tempdir().unwrap();
    let recv_history = Arc::new(HistoryStore::new(state.path().join("recv.json")));
    let send_history = Arc::new(HistoryStore::new(state.path().join("send.json")));

    let (sink, events) = ChannelSink::new(32);
    let receiver = Receiver::new(receive_options(dst.path(), recv_history.clone()));
    let handle = receiver.start(Arc::new(sink)).await.unwrap();
    let (done_tx, _done) = mpsc::unbounded_channel();
    tokio::spawn(answer_offers(events, done_tx));

    let skipped = src.path().join("skip-me.txt");
    std::fs::write(&skipped, b"no").unwrap();
    let never = src.path().join("after.txt");
    std::fs::write(&never, b"never sent").unwrap();

    let sender = Sender::new(send_options(send_history.clone()));
    let (callback, _progress) = SimpleSendCallback::new();
    let result = sender
        .send_batch(
            handle.local_addr(),
            "Yow-desk",
            &[skipped, never],
            &CancellationToken::new(),
            &callback,
        )
        .await;

    assert!(matches!(result, Err(TransferError::Rejected)));
    assert!(send_history.load().is_empty());
    assert!(recv_history.load().is_empty());
    assert_eq!(std::fs::read_dir(dst.path()).unwrap().count(), 0);

    handle.shutdown().await;
}

#[tokio::test]
async fn test_auto_accept_bypasses_channel() {
    let src = tempfile::tempdir().unwrap();
    let dst = tempfile::tempdir().unwrap();
    let state = tempfile::tempdir().unwrap();
    let history = Arc::new(HistoryStore::new(state.path().join("history.json")));

    let (sink, mut events) = ChannelSink::new(32);
    let mut options = receive_options(dst.path(), history.clone());
    options.auto_accept = true;
    let handle = Receiver::new(options).start(Arc::new(sink)).await.unwrap();

    let path = src.path().join("auto.txt");
    std::fs::write(&path, b"auto").unwrap();
    let sender = Sender::new(SendOptions {
        history: None,
        ..send_options(history.clone())
    });
    let (callback, _progress) = SimpleSendCallback::new();
    sender
        .send_batch(handle.local_addr(), "Yow-desk", &[path], &CancellationToken::new(), &callback)
        .await
        .unwrap();

    let completed = tokio::time::timeout(WAIT, async {
        loop {
            match events.recv().await {
                Some(ReceiveEvent::Complete(file)) => return file,
                Some(ReceiveEvent::Offer(_)) => panic!("auto-accept should not ask"),
                Some(_) => {}
                None => panic!("channel closed"),
            }
        }
    })
    .await
    .unwrap();

    assert_eq!(std::fs::read(&completed.path).unwrap(), b"auto");
    assert_eq!(history.load().len(), 1);

    handle.shutdown().await;
}
