// Copyright 2019-2024 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::sync::Arc;

use blocks::Tipset;
use parking_lot::Mutex;
use tracing::{error, warn};

use super::Error;

/// Topic used to publish new heads.
pub const HEAD_CHANGE_TOPIC: &str = "headchange";

/// Capacity of each subscriber's head-change channel.
const SUBSCRIBER_CHANNEL_SIZE: usize = 16;

/// Queue depth above which a subscriber is warned about as slow.
const SLOW_SUBSCRIBER_WATERMARK: usize = 5;

/// Change to the head tipset observed by subscribers. `Current` is only
/// ever delivered as the snapshot batch a channel subscriber receives on
/// subscription.
#[derive(Clone, Debug, PartialEq)]
pub enum HeadChange {
    Current(Arc<Tipset>),
    Apply(Arc<Tipset>),
    Revert(Arc<Tipset>),
}

/// A callback that gets called upon reorgs with the reverted and applied
/// tipsets, both oldest-first. Returning [`Error::NotifeeDone`] removes the
/// callback from the registry; any other error is logged and the callback
/// stays registered.
pub type ReorgNotifee = Box<dyn FnMut(&[Arc<Tipset>], &[Arc<Tipset>]) -> Result<(), Error> + Send>;

/// Fan-out point for head changes, fed exclusively by the reorg worker
/// task. Two subscription styles hang off it: bounded channels receiving
/// `Vec<HeadChange>` batches, and synchronous notifee callbacks run in
/// registration order before the channels are served.
#[derive(Default)]
pub struct HeadChangePublisher {
    subscribers: Mutex<Vec<flume::Sender<Vec<HeadChange>>>>,
    notifees: Mutex<Vec<ReorgNotifee>>,
}

impl HeadChangePublisher {
    pub fn new() -> Self {
        Default::default()
    }

    /// Registers a channel subscriber and returns its receive half. The
    /// snapshot batch, when non-empty, is guaranteed to arrive before any
    /// reorg batch published afterwards.
    pub fn subscribe(&self, snapshot: Vec<HeadChange>) -> flume::Receiver<Vec<HeadChange>> {
        let (tx, rx) = flume::bounded(SUBSCRIBER_CHANNEL_SIZE);
        let mut subscribers = self.subscribers.lock();
        if !snapshot.is_empty() {
            // Fresh bounded channel, the send cannot fail.
            let _ = tx.try_send(snapshot);
        }
        subscribers.push(tx);
        rx
    }

    /// Registers a callback run on every subsequent reorg.
    pub fn register_notifee(&self, notifee: ReorgNotifee) {
        self.notifees.lock().push(notifee);
    }

    /// Delivers one reorg to every notifee and every channel subscriber:
    /// within the batch all reverts precede all applies, both oldest-first.
    pub async fn publish(&self, dropped: &[Arc<Tipset>], added: &[Arc<Tipset>]) {
        self.run_notifees(dropped, added);

        let batch: Vec<HeadChange> = dropped
            .iter()
            .cloned()
            .map(HeadChange::Revert)
            .chain(added.iter().cloned().map(HeadChange::Apply))
            .collect();
        self.send_to_subscribers(batch).await;
    }

    fn run_notifees(&self, dropped: &[Arc<Tipset>], added: &[Arc<Tipset>]) {
        let mut notifees = self.notifees.lock();
        let mut i = 0;
        while i < notifees.len() {
            match (notifees[i])(dropped, added) {
                Ok(()) => i += 1,
                Err(Error::NotifeeDone) => {
                    notifees.remove(i);
                }
                Err(e) => {
                    error!("head change func errored (BAD): {}", e);
                    i += 1;
                }
            }
        }
    }

    async fn send_to_subscribers(&self, batch: Vec<HeadChange>) {
        // Snapshot the senders so the registry lock is not held across the
        // sends, which may block on slow subscribers.
        let senders: Vec<_> = self.subscribers.lock().clone();
        let mut disconnected = false;
        for tx in &senders {
            if tx.len() > SLOW_SUBSCRIBER_WATERMARK {
                warn!(
                    "{} sub is slow, has {} buffered entries",
                    HEAD_CHANGE_TOPIC,
                    tx.len()
                );
            }
            if tx.send_async(batch.clone()).await.is_err() {
                disconnected = true;
            }
        }
        if disconnected {
            self.subscribers.lock().retain(|tx| !tx.is_disconnected());
        }
    }

    /// Closes every subscriber channel and drops all notifees; receive
    /// loops observe the disconnect, drain what is buffered and terminate.
    pub fn shutdown(&self) {
        self.subscribers.lock().clear();
        self.notifees.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::tests::genesis_tipset;
    use db::MemoryDB;

    #[tokio::test]
    async fn notifee_done_is_removed() {
        let db = MemoryDB::default();
        let ts = genesis_tipset(&db);
        let publisher = HeadChangePublisher::new();

        let (count_tx, count_rx) = flume::unbounded();
        publisher.register_notifee(Box::new(move |_, added| {
            count_tx.send(added.len()).unwrap();
            Err(Error::NotifeeDone)
        }));

        publisher.publish(&[], &[ts.clone()]).await;
        publisher.publish(&[], &[ts]).await;
        // The notifee saw the first reorg only.
        assert_eq!(count_rx.drain().collect::<Vec<_>>(), vec![1]);
    }

    #[tokio::test]
    async fn erroring_notifee_stays_registered() {
        let db = MemoryDB::default();
        let ts = genesis_tipset(&db);
        let publisher = HeadChangePublisher::new();

        let (count_tx, count_rx) = flume::unbounded();
        publisher.register_notifee(Box::new(move |_, _| {
            count_tx.send(()).unwrap();
            Err(Error::Other("boom".to_string()))
        }));

        publisher.publish(&[], &[ts.clone()]).await;
        publisher.publish(&[], &[ts]).await;
        assert_eq!(count_rx.drain().count(), 2);
    }

    #[tokio::test]
    async fn notifees_run_in_registration_order() {
        let db = MemoryDB::default();
        let ts = genesis_tipset(&db);
        let publisher = HeadChangePublisher::new();

        let (order_tx, order_rx) = flume::unbounded();
        for id in 0..3 {
            let order_tx = order_tx.clone();
            publisher.register_notifee(Box::new(move |_, _| {
                order_tx.send(id).unwrap();
                Ok(())
            }));
        }

        publisher.publish(&[], &[ts]).await;
        assert_eq!(order_rx.drain().collect::<Vec<_>>(), vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn snapshot_precedes_published_batches() {
        let db = MemoryDB::default();
        let ts = genesis_tipset(&db);
        let publisher = HeadChangePublisher::new();

        let rx = publisher.subscribe(vec![HeadChange::Current(ts.clone())]);
        publisher.publish(&[], &[ts.clone()]).await;

        assert_eq!(
            rx.recv_async().await.unwrap(),
            vec![HeadChange::Current(ts.clone())]
        );
        assert_eq!(
            rx.recv_async().await.unwrap(),
            vec![HeadChange::Apply(ts)]
        );
    }

    #[tokio::test]
    async fn shutdown_closes_subscriber_channels() {
        let publisher = HeadChangePublisher::new();
        let rx = publisher.subscribe(vec![]);
        publisher.shutdown();
        assert!(rx.recv_async().await.is_err());
    }
}
