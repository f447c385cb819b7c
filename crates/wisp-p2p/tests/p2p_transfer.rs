mod support;

use std::sync::Arc;
use std::time::Duration;

use support::{HubPeer, InMemoryHub};
use wisp_p2p::{
    receiver, sender, CancelledBy, MemorySink, MemorySource, NoopReceiverEvents,
    NoopSenderEvents, ReceiveOptions, ReceiverEvents, ReceiverHandle, ReceiverState,
    SendOptions, SenderEvents, SenderHandle, SenderState,
};

const CODE: &str = "ABCD-1234";

#[tokio::test]
async fn round_trip_delivers_exact_bytes_in_order() {
    let hub = Arc::new(InMemoryHub::default());
    let sender_peer = HubPeer::new(hub.clone());
    let receiver_peer = HubPeer::new(hub);

    let payload: Vec<u8> = (0..300 * 1024).map(|i| (i % 251) as u8).collect();
    let file = Arc::new(MemorySource::new(payload.clone()));
    let sink = Arc::new(MemorySink::new());

    sender_peer.listen(CODE).await.unwrap();

    let send_opts = SendOptions {
        chunk_size: 16 * 1024,
        ..Default::default()
    };
    let send_handle = SenderHandle::new();
    let send_task = tokio::spawn({
        let send_handle = send_handle.clone();
        async move {
            sender::send(
                sender_peer,
                file,
                "photo.bin".to_string(),
                send_opts,
                Arc::new(NoopSenderEvents),
                send_handle,
            )
            .await
        }
    });

    let recv_handle = ReceiverHandle::new(true);
    let recv_task = tokio::spawn({
        let sink = sink.clone();
        let recv_handle = recv_handle.clone();
        async move {
            receiver::receive(
                receiver_peer,
                CODE,
                sink,
                ReceiveOptions::default(),
                Arc::new(NoopReceiverEvents),
                recv_handle,
            )
            .await
        }
    });

    let (send_result, recv_result) = tokio::join!(send_task, recv_task);
    let send_outcome = send_result.unwrap().unwrap();
    let recv_outcome = recv_result.unwrap().unwrap();

    assert_eq!(send_outcome.total_bytes, payload.len() as u64);
    assert_eq!(recv_outcome.total_bytes, payload.len() as u64);
    assert_eq!(recv_outcome.name, "photo.bin");
    assert_eq!(sink.snapshot().await, payload);

    assert_eq!(send_handle.status().await, SenderState::Completed);
    assert_eq!(recv_handle.status().await, ReceiverState::Completed);
}

struct RecordingEvents {
    cancelled: std::sync::Mutex<Option<(CancelledBy, Option<String>)>>,
}

impl SenderEvents for RecordingEvents {
    fn on_cancel(&self, by: CancelledBy, reason: Option<String>) {
        *self.cancelled.lock().unwrap() = Some((by, reason));
    }
}

impl ReceiverEvents for RecordingEvents {}

#[tokio::test]
async fn receiver_cancellation_propagates_to_sender() {
    let hub = Arc::new(InMemoryHub::default());
    let sender_peer = HubPeer::new(hub.clone());
    let receiver_peer = HubPeer::new(hub);

    let payload: Vec<u8> = vec![7u8; 4 * 1024 * 1024];
    let file = Arc::new(MemorySource::new(payload));
    let sink = Arc::new(MemorySink::new());

    sender_peer.listen(CODE).await.unwrap();

    let sender_events = Arc::new(RecordingEvents {
        cancelled: std::sync::Mutex::new(None),
    });
    let send_opts = SendOptions {
        chunk_size: 8 * 1024,
        max_unacked_chunks: 4,
        ..Default::default()
    };

    let send_handle = SenderHandle::new();
    let send_events = sender_events.clone();
    let send_task = tokio::spawn({
        let send_handle = send_handle.clone();
        async move {
            sender::send(
                sender_peer,
                file,
                "big.bin".to_string(),
                send_opts,
                send_events,
                send_handle,
            )
            .await
        }
    });

    let recv_handle = ReceiverHandle::new(true);
    let recv_task = tokio::spawn({
        let recv_handle = recv_handle.clone();
        async move {
            receiver::receive(
                receiver_peer,
                CODE,
                sink,
                ReceiveOptions::default(),
                Arc::new(NoopReceiverEvents),
                recv_handle,
            )
            .await
        }
    });

    // Let the transfer get underway, then cancel from the receiver side.
    tokio::time::sleep(Duration::from_millis(20)).await;
    recv_handle.cancel();

    let send_result = send_task.await.unwrap();
    let recv_result = recv_task.await.unwrap();

    assert!(send_result.is_err());
    assert!(recv_result.is_err());
    assert_eq!(recv_handle.status().await, ReceiverState::Cancelled);

    let recorded = sender_events.cancelled.lock().unwrap().clone();
    assert_eq!(recorded.map(|(by, _)| by), Some(CancelledBy::RemoteSide));
}
