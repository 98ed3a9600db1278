//! Zero-capacity hand-off between the producer and consumer loops.
//!
//! tokio has no rendezvous channel, so each item travels with a oneshot ack
//! over a channel of capacity one. `send` resolves only once the receiver
//! has taken the item out of `recv`.

use tokio::sync::{mpsc, oneshot};

#[derive(Debug, thiserror::Error)]
#[error("hand-off receiver was dropped")]
pub struct HandoffClosed;

pub struct HandoffSender<T> {
    tx: mpsc::Sender<(T, oneshot::Sender<()>)>,
}

pub struct HandoffReceiver<T> {
    rx: mpsc::Receiver<(T, oneshot::Sender<()>)>,
}

pub fn handoff<T>() -> (HandoffSender<T>, HandoffReceiver<T>) {
    let (tx, rx) = mpsc::channel(1);
    (HandoffSender { tx }, HandoffReceiver { rx })
}

impl<T> HandoffSender<T> {
    /// Wait until the receiver takes `item`.
    ///
    /// Fails if the receiver is dropped before or while the item is pending;
    /// the item is dropped with it.
    pub async fn send(&self, item: T) -> Result<(), HandoffClosed> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.tx
            .send((item, ack_tx))
            .await
            .map_err(|_| HandoffClosed)?;
        ack_rx.await.map_err(|_| HandoffClosed)
    }
}

impl<T> HandoffReceiver<T> {
    /// Next item, `None` once the sender is dropped.
    pub async fn recv(&mut self) -> Option<T> {
        let (item, ack) = self.rx.recv().await?;
        // The sender may have given up on cancellation; the item is still ours.
        let _ = ack.send(());
        Some(item)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_send_waits_for_receiver() {
        let (tx, mut rx) = handoff::<u32>();

        let sender = tokio::spawn(async move {
            tx.send(1).await.unwrap();
            tx.send(2).await.unwrap();
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!sender.is_finished(), "send must not complete before recv");

        assert_eq!(rx.recv().await, Some(1));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!sender.is_finished(), "second send waits for second recv");

        assert_eq!(rx.recv().await, Some(2));
        timeout(Duration::from_secs(1), sender)
            .await
            .expect("sender should finish once both items are taken")
            .unwrap();
    }

    #[tokio::test]
    async fn test_recv_returns_none_when_sender_dropped() {
        let (tx, mut rx) = handoff::<u32>();
        drop(tx);
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn test_send_fails_when_receiver_dropped() {
        let (tx, rx) = handoff::<u32>();
        drop(rx);
        assert!(tx.send(7).await.is_err());
    }

    #[tokio::test]
    async fn test_pending_send_fails_when_receiver_dropped() {
        let (tx, rx) = handoff::<u32>();
        let sender = tokio::spawn(async move { tx.send(7).await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(rx);

        let result = timeout(Duration::from_secs(1), sender)
            .await
            .expect("pending send should resolve")
            .unwrap();
        assert!(result.is_err());
    }
}
