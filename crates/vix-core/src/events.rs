//! In-process publish/subscribe.
//!
//! Subscribers register for a [`Topic`] (or for everything) and are called on
//! the publisher's thread after every bus lock has been released, so handlers
//! may publish or subscribe themselves. A failing or panicking handler is
//! logged and skipped; the remaining handlers still run.

use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, RwLock};
use tracing::{error, trace};

use vix_db::ProviderKind;

use crate::connection::{ConnectionId, ConnectionState, InstanceError};
use crate::migration::{JobId, MigrationState};

// ============================================================================
// Topic
// ============================================================================

/// Event topics with stable string names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Topic {
    ConnectionOpened,
    ConnectionClosed,
    ConnectionStateChanged,
    ConnectionRenamed,
    ActiveConnectionChanged,
    ActiveCollectionChanged,
    CollectionsUpdated,
    ProfilesChanged,
    MigrationStarted,
    MigrationProgress,
    MigrationFinished,
    TaskFinished,
}

impl Topic {
    /// Get the topic name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::ConnectionOpened => "connection.opened",
            Topic::ConnectionClosed => "connection.closed",
            Topic::ConnectionStateChanged => "connection.stateChanged",
            Topic::ConnectionRenamed => "connection.renamed",
            Topic::ActiveConnectionChanged => "connection.activeChanged",
            Topic::ActiveCollectionChanged => "connection.activeCollectionChanged",
            Topic::CollectionsUpdated => "connection.collectionsUpdated",
            Topic::ProfilesChanged => "profiles.changed",
            Topic::MigrationStarted => "migration.started",
            Topic::MigrationProgress => "migration.progress",
            Topic::MigrationFinished => "migration.finished",
            Topic::TaskFinished => "worker.taskFinished",
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Event
// ============================================================================

/// What happened to the profile store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProfileChange {
    Created,
    Updated,
    Deleted,
    Imported,
}

/// An event published on the bus.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Event {
    ConnectionOpened {
        id: ConnectionId,
        name: String,
        provider: ProviderKind,
    },
    ConnectionClosed {
        id: ConnectionId,
    },
    ConnectionStateChanged {
        id: ConnectionId,
        from: ConnectionState,
        to: ConnectionState,
        error: Option<InstanceError>,
    },
    ConnectionRenamed {
        id: ConnectionId,
        name: String,
    },
    ActiveConnectionChanged {
        previous: Option<ConnectionId>,
        current: Option<ConnectionId>,
    },
    ActiveCollectionChanged {
        id: ConnectionId,
        collection: Option<String>,
        stale: bool,
    },
    CollectionsUpdated {
        id: ConnectionId,
        collections: Vec<String>,
    },
    ProfilesChanged {
        profile_id: Option<String>,
        change: ProfileChange,
    },
    MigrationStarted {
        job: JobId,
    },
    MigrationProgress {
        job: JobId,
        batch: u64,
        items_read: u64,
        items_copied: u64,
        items_failed: u64,
    },
    MigrationFinished {
        job: JobId,
        state: MigrationState,
    },
    TaskFinished {
        task: String,
        panicked: bool,
    },
}

impl Event {
    /// The topic this event is published under.
    pub fn topic(&self) -> Topic {
        match self {
            Event::ConnectionOpened { .. } => Topic::ConnectionOpened,
            Event::ConnectionClosed { .. } => Topic::ConnectionClosed,
            Event::ConnectionStateChanged { .. } => Topic::ConnectionStateChanged,
            Event::ConnectionRenamed { .. } => Topic::ConnectionRenamed,
            Event::ActiveConnectionChanged { .. } => Topic::ActiveConnectionChanged,
            Event::ActiveCollectionChanged { .. } => Topic::ActiveCollectionChanged,
            Event::CollectionsUpdated { .. } => Topic::CollectionsUpdated,
            Event::ProfilesChanged { .. } => Topic::ProfilesChanged,
            Event::MigrationStarted { .. } => Topic::MigrationStarted,
            Event::MigrationProgress { .. } => Topic::MigrationProgress,
            Event::MigrationFinished { .. } => Topic::MigrationFinished,
            Event::TaskFinished { .. } => Topic::TaskFinished,
        }
    }
}

// ============================================================================
// EventBus
// ============================================================================

/// Handle returned by `subscribe*`, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Outcome of one `publish` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Handlers that returned `Ok`.
    pub delivered: usize,
    /// Handlers that returned `Err` or panicked.
    pub failed: usize,
}

type Handler = Arc<dyn Fn(&Event) -> anyhow::Result<()> + Send + Sync>;

struct Subscriber {
    id: SubscriptionId,
    topics: Option<HashSet<Topic>>,
    handler: Handler,
}

impl Subscriber {
    fn wants(&self, topic: Topic) -> bool {
        self.topics.as_ref().map_or(true, |t| t.contains(&topic))
    }
}

struct ChannelSubscriber {
    id: SubscriptionId,
    topics: Option<HashSet<Topic>>,
    sender: Sender<Event>,
}

#[derive(Default)]
struct BusInner {
    handlers: RwLock<Vec<Subscriber>>,
    channels: RwLock<Vec<ChannelSubscriber>>,
    next_id: AtomicU64,
}

/// Typed publish/subscribe bus. Cloning yields another handle to the same bus.
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

impl EventBus {
    /// Create an empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&self) -> SubscriptionId {
        SubscriptionId(self.inner.next_id.fetch_add(1, Ordering::Relaxed))
    }

    fn add_handler(&self, topics: Option<HashSet<Topic>>, handler: Handler) -> SubscriptionId {
        let id = self.next_id();
        match self.inner.handlers.write() {
            Ok(mut handlers) => handlers.push(Subscriber {
                id,
                topics,
                handler,
            }),
            Err(e) => error!("Event bus lock poisoned, subscription dropped: {}", e),
        }
        id
    }

    /// Call `handler` for every event of `topic`.
    pub fn subscribe<F>(&self, topic: Topic, handler: F) -> SubscriptionId
    where
        F: Fn(&Event) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.add_handler(Some(HashSet::from([topic])), Arc::new(handler))
    }

    /// Call `handler` for every event.
    pub fn subscribe_all<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&Event) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.add_handler(None, Arc::new(handler))
    }

    /// Receive events of the given topics (all topics when empty) on a channel.
    ///
    /// The subscription ends when the receiver is dropped.
    pub fn subscribe_channel(&self, topics: &[Topic]) -> (SubscriptionId, Receiver<Event>) {
        let (sender, receiver) = mpsc::channel();
        let id = self.next_id();
        let topics = if topics.is_empty() {
            None
        } else {
            Some(topics.iter().copied().collect())
        };
        match self.inner.channels.write() {
            Ok(mut channels) => channels.push(ChannelSubscriber { id, topics, sender }),
            Err(e) => error!("Event bus lock poisoned, subscription dropped: {}", e),
        }
        (id, receiver)
    }

    /// Remove a subscription. Returns `false` if it was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut removed = false;
        if let Ok(mut handlers) = self.inner.handlers.write() {
            let before = handlers.len();
            handlers.retain(|s| s.id != id);
            removed |= handlers.len() != before;
        }
        if let Ok(mut channels) = self.inner.channels.write() {
            let before = channels.len();
            channels.retain(|s| s.id != id);
            removed |= channels.len() != before;
        }
        removed
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        let handlers = self.inner.handlers.read().map(|h| h.len()).unwrap_or(0);
        let channels = self.inner.channels.read().map(|c| c.len()).unwrap_or(0);
        handlers + channels
    }

    /// Deliver an event to every interested subscriber.
    pub fn publish(&self, event: Event) -> DeliveryReport {
        let topic = event.topic();
        trace!("publish {}", topic);

        // Snapshot under the lock, call outside it.
        let handlers: Vec<(SubscriptionId, Handler)> = match self.inner.handlers.read() {
            Ok(list) => list
                .iter()
                .filter(|s| s.wants(topic))
                .map(|s| (s.id, Arc::clone(&s.handler)))
                .collect(),
            Err(e) => {
                error!("Event bus lock poisoned, event {} dropped: {}", topic, e);
                return DeliveryReport::default();
            }
        };

        let mut report = DeliveryReport::default();
        for (id, handler) in handlers {
            match catch_unwind(AssertUnwindSafe(|| handler(&event))) {
                Ok(Ok(())) => report.delivered += 1,
                Ok(Err(e)) => {
                    error!("Subscriber {:?} failed on {}: {:#}", id, topic, e);
                    report.failed += 1;
                }
                Err(_) => {
                    error!("Subscriber {:?} panicked on {}", id, topic);
                    report.failed += 1;
                }
            }
        }

        if let Ok(mut channels) = self.inner.channels.write() {
            channels.retain(|c| {
                if c.topics.as_ref().is_some_and(|t| !t.contains(&topic)) {
                    return true;
                }
                match c.sender.send(event.clone()) {
                    Ok(()) => {
                        report.delivered += 1;
                        true
                    }
                    // Receiver gone.
                    Err(_) => false,
                }
            });
        }

        report
    }
}
