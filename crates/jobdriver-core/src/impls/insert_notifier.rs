//! Insert notifications - 新しいジョブの到着をドライバに知らせる
//!
//! A hint only. Signals may be coalesced or lost; drivers still poll.

use tokio::sync::watch;

/// Sender side, held by the store. Cloning shares the channel.
#[derive(Debug, Clone)]
pub struct InsertNotifier {
    tx: watch::Sender<u64>,
}

impl Default for InsertNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl InsertNotifier {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(0);
        Self { tx }
    }

    /// Wake every subscriber. Never blocks, never fails.
    pub fn notify(&self) {
        self.tx.send_modify(|seq| *seq = seq.wrapping_add(1));
    }

    pub fn subscribe(&self) -> InsertSignal {
        InsertSignal {
            rx: self.tx.subscribe(),
        }
    }
}

/// Receiver side, one per waiting slot.
#[derive(Debug, Clone)]
pub struct InsertSignal {
    rx: watch::Receiver<u64>,
}

impl InsertSignal {
    /// Resolves after the next insert. Pending forever if the store is gone,
    /// so always race it against a poll timer.
    pub async fn changed(&mut self) {
        if self.rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn subscriber_wakes_on_notify() {
        let notifier = InsertNotifier::new();
        let mut signal = notifier.subscribe();

        notifier.notify();
        tokio::time::timeout(Duration::from_secs(1), signal.changed())
            .await
            .expect("signal should fire");
    }

    #[tokio::test]
    async fn bursts_coalesce_into_one_wakeup() {
        let notifier = InsertNotifier::new();
        let mut signal = notifier.subscribe();

        notifier.notify();
        notifier.notify();
        signal.changed().await;

        let second = tokio::time::timeout(Duration::from_millis(20), signal.changed()).await;
        assert!(second.is_err());
    }

    #[tokio::test]
    async fn notify_without_subscribers_is_fine() {
        InsertNotifier::new().notify();
    }
}
