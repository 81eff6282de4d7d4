use crate::sse::models::{ResultSnapshot, Topic};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};
use uuid::Uuid;

pub const DEFAULT_SUBSCRIBER_CAPACITY: usize = 64;

struct Subscriber {
    tx: mpsc::Sender<Arc<ResultSnapshot>>,
    last_version: i64,
}

type TopicMap = HashMap<Uuid, HashMap<u64, Subscriber>>;

struct Hub {
    topics: Mutex<TopicMap>,
    next_id: AtomicU64,
    capacity: usize,
}

impl Hub {
    fn topics(&self) -> MutexGuard<'_, TopicMap> {
        self.topics.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn remove(&self, poll_id: Uuid, id: u64) -> bool {
        let mut topics = self.topics();
        let Some(subscribers) = topics.get_mut(&poll_id) else {
            return false;
        };
        let removed = subscribers.remove(&id).is_some();
        if subscribers.is_empty() {
            topics.remove(&poll_id);
        }
        removed
    }
}

/// Topic keyed fan-out of result snapshots.
///
/// Publishing never blocks: a subscriber whose buffer is full misses that
/// snapshot, a subscriber whose receiver is gone is dropped. Each subscriber
/// only ever receives snapshots with increasing versions.
#[derive(Clone)]
pub struct LiveUpdates {
    hub: Arc<Hub>,
}

impl Default for LiveUpdates {
    fn default() -> Self {
        Self::new(DEFAULT_SUBSCRIBER_CAPACITY)
    }
}

impl LiveUpdates {
    pub fn new(capacity: usize) -> Self {
        Self {
            hub: Arc::new(Hub {
                topics: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                capacity: capacity.max(1),
            }),
        }
    }

    pub fn subscribe(&self, poll_id: Uuid) -> Subscription {
        let id = self.hub.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.hub.capacity);
        self.hub.topics().entry(poll_id).or_default().insert(
            id,
            Subscriber {
                tx,
                last_version: i64::MIN,
            },
        );
        debug!("subscriber {} joined {}", id, Topic(poll_id));

        Subscription {
            topic: Topic(poll_id),
            id,
            floor: i64::MIN,
            rx,
            hub: Arc::downgrade(&self.hub),
        }
    }

    pub fn unsubscribe(&self, poll_id: Uuid, subscriber_id: u64) -> bool {
        let removed = self.hub.remove(poll_id, subscriber_id);
        if removed {
            debug!("subscriber {} left {}", subscriber_id, Topic(poll_id));
        }
        removed
    }

    /// Delivers the snapshot to every current subscriber of its poll and
    /// returns how many received it.
    pub fn publish(&self, snapshot: ResultSnapshot) -> usize {
        let topic = Topic(snapshot.poll_id);
        let version = snapshot.version;
        let snapshot = Arc::new(snapshot);

        let mut topics = self.hub.topics();
        let Some(subscribers) = topics.get_mut(&snapshot.poll_id) else {
            debug!("no subscribers on {}", topic);
            return 0;
        };

        let mut delivered = 0;
        subscribers.retain(|id, subscriber| {
            if version <= subscriber.last_version {
                debug!("stale snapshot v{} skipped for subscriber {}", version, id);
                return true;
            }
            match subscriber.tx.try_send(snapshot.clone()) {
                Ok(()) => {
                    subscriber.last_version = version;
                    delivered += 1;
                    true
                }
                Err(TrySendError::Full(_)) => {
                    warn!("subscriber {} on {} is lagging, snapshot dropped", id, topic);
                    true
                }
                Err(TrySendError::Closed(_)) => {
                    debug!("subscriber {} on {} disconnected", id, topic);
                    false
                }
            }
        });
        if subscribers.is_empty() {
            topics.remove(&snapshot.poll_id);
        }

        debug!("published v{} to {} subscriber(s) on {}", version, delivered, topic);
        delivered
    }

    pub fn subscriber_count(&self, poll_id: Uuid) -> usize {
        self.hub.topics().get(&poll_id).map_or(0, HashMap::len)
    }

    pub fn topic_count(&self) -> usize {
        self.hub.topics().len()
    }

    /// Drops every subscriber; their streams see the end of the channel.
    pub fn close_all(&self) {
        let closed: usize = self.hub.topics().drain().map(|(_, subs)| subs.len()).sum();
        debug!("closed {} live subscriber(s)", closed);
    }
}

/// A viewer's interest in one poll. Dropping it unsubscribes.
pub struct Subscription {
    topic: Topic,
    id: u64,
    floor: i64,
    rx: mpsc::Receiver<Arc<ResultSnapshot>>,
    hub: Weak<Hub>,
}

impl Subscription {
    pub fn topic(&self) -> Topic {
        self.topic
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Skip anything not newer than `version`, e.g. the state already sent
    /// as the initial snapshot.
    pub fn seen(&mut self, version: i64) {
        self.floor = self.floor.max(version);
    }

    pub async fn recv(&mut self) -> Option<Arc<ResultSnapshot>> {
        loop {
            let snapshot = self.rx.recv().await?;
            if snapshot.version > self.floor {
                self.floor = snapshot.version;
                return Some(snapshot);
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(hub) = self.hub.upgrade() {
            hub.remove(self.topic.0, self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn snapshot(poll_id: Uuid, version: i64) -> ResultSnapshot {
        ResultSnapshot {
            poll_id,
            topic: Topic(poll_id).to_string(),
            results: Vec::new(),
            total_votes: version,
            unique_voters: version,
            version,
            published_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn fan_out_is_scoped_to_the_poll() {
        let live = LiveUpdates::default();
        let poll_a = Uuid::new_v4();
        let poll_b = Uuid::new_v4();
        let mut a1 = live.subscribe(poll_a);
        let mut a2 = live.subscribe(poll_a);
        let mut b = live.subscribe(poll_b);

        assert_eq!(live.publish(snapshot(poll_a, 1)), 2);
        assert_eq!(a1.recv().await.unwrap().version, 1);
        assert_eq!(a2.recv().await.unwrap().version, 1);

        live.publish(snapshot(poll_b, 7));
        assert_eq!(b.recv().await.unwrap().poll_id, poll_b);
    }

    #[tokio::test]
    async fn older_snapshots_never_follow_newer_ones() {
        let live = LiveUpdates::default();
        let poll = Uuid::new_v4();
        let mut sub = live.subscribe(poll);

        assert_eq!(live.publish(snapshot(poll, 3)), 1);
        assert_eq!(live.publish(snapshot(poll, 2)), 0);
        assert_eq!(live.publish(snapshot(poll, 4)), 1);

        assert_eq!(sub.recv().await.unwrap().version, 3);
        assert_eq!(sub.recv().await.unwrap().version, 4);
    }

    #[tokio::test]
    async fn seen_floor_filters_initial_state() {
        let live = LiveUpdates::default();
        let poll = Uuid::new_v4();
        let mut sub = live.subscribe(poll);
        live.publish(snapshot(poll, 5));
        live.publish(snapshot(poll, 6));
        sub.seen(5);
        assert_eq!(sub.recv().await.unwrap().version, 6);
    }

    #[tokio::test]
    async fn dropped_subscriptions_are_removed() {
        let live = LiveUpdates::default();
        let poll = Uuid::new_v4();
        let sub = live.subscribe(poll);
        let other = live.subscribe(poll);
        assert_eq!(live.subscriber_count(poll), 2);

        drop(sub);
        assert_eq!(live.subscriber_count(poll), 1);
        assert!(live.unsubscribe(poll, other.id()));
        assert_eq!(live.topic_count(), 0);
        assert_eq!(live.publish(snapshot(poll, 1)), 0);
    }

    #[tokio::test]
    async fn close_all_ends_streams() {
        let live = LiveUpdates::default();
        let poll = Uuid::new_v4();
        let mut sub = live.subscribe(poll);
        live.close_all();
        assert!(sub.recv().await.is_none());
        assert_eq!(live.topic_count(), 0);
    }

    #[test]
    fn full_buffers_drop_without_blocking() {
        let live = LiveUpdates::new(1);
        let poll = Uuid::new_v4();
        let _sub = live.subscribe(poll);
        assert_eq!(live.publish(snapshot(poll, 1)), 1);
        assert_eq!(live.publish(snapshot(poll, 2)), 0);
        assert_eq!(live.subscriber_count(poll), 1);
    }

    #[test]
    fn topic_names_follow_poll_prefix() {
        let id = Uuid::nil();
        assert_eq!(
            Topic(id).to_string(),
            "poll-00000000-0000-0000-0000-000000000000"
        );
    }
}
