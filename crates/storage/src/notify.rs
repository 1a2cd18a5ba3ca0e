//! Process-wide change broadcast.

use std::collections::BTreeSet;

use futures::Stream;
use shared::{domain::CollectionKey, protocol::ChangeEvent};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::warn;

pub const DEFAULT_EVENT_BUFFER: usize = 256;

#[derive(Clone)]
pub struct ChangeNotifier {
    tx: broadcast::Sender<ChangeEvent>,
}

impl Default for ChangeNotifier {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER)
    }
}

impl ChangeNotifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Returns the number of subscribers the event reached.
    pub fn publish(&self, event: ChangeEvent) -> usize {
        self.tx.send(event).unwrap_or(0)
    }

    /// An empty key set subscribes to every collection.
    pub fn subscribe(&self, keys: impl IntoIterator<Item = CollectionKey>) -> Subscription {
        let mut interest: BTreeSet<CollectionKey> = keys.into_iter().collect();
        if interest.is_empty() {
            interest.extend(CollectionKey::ALL);
        }
        Subscription {
            rx: self.tx.subscribe(),
            interest,
        }
    }

    pub fn subscribe_all(&self) -> Subscription {
        self.subscribe(CollectionKey::ALL)
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

pub struct Subscription {
    rx: broadcast::Receiver<ChangeEvent>,
    interest: BTreeSet<CollectionKey>,
}

impl Subscription {
    pub fn interest(&self) -> &BTreeSet<CollectionKey> {
        &self.interest
    }

    /// Waits for the next event touching a key of interest, narrowed to those keys.
    ///
    /// A lagged receiver gets one event naming every key of interest so it
    /// refetches instead of missing a change. Returns `None` once every
    /// notifier handle is dropped.
    pub async fn recv(&mut self) -> Option<ChangeEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => {
                    let keys: BTreeSet<CollectionKey> =
                        event.keys.intersection(&self.interest).copied().collect();
                    if !keys.is_empty() {
                        return Some(ChangeEvent { keys });
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "change subscriber lagged; forcing full refetch");
                    return Some(ChangeEvent {
                        keys: self.interest.clone(),
                    });
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    pub fn into_stream(self) -> impl Stream<Item = ChangeEvent> + Send + 'static {
        futures::stream::unfold(self, |mut sub| async move {
            let event = sub.recv().await?;
            Some((event, sub))
        })
    }
}
