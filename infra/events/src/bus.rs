use crate::error::EventBusError;
use fxhash::FxHashMap;
use parking_lot::RwLock;
use std::any::{Any, TypeId};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::trace;

/// A safe default for channel buffers.
/// 128 is usually enough for lifecycle events on a single node.
const DEFAULT_CAPACITY: usize = 128;
const MIN_CAPACITY: usize = 1;

/// Supported channel kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    /// Broadcast (fan-out) semantics.
    Broadcast { capacity: usize },
    /// MPSC (queue) semantics with a single receiver.
    Mpsc { capacity: usize },
}

/// Marker trait for types that can be sent across the [`EventBus`].
///
/// Any type that is `Send + Sync + 'static` automatically implements this trait.
pub trait Event: Any + Send + Sync + 'static {}
impl<T: Any + Send + Sync + 'static> Event for T {}

#[derive(Debug)]
struct ChannelState {
    kind: ChannelKind,
    sender: Box<dyn Any + Send + Sync>,
}

#[derive(Debug)]
struct MpscChannel<T> {
    sender: mpsc::Sender<Arc<T>>,
    receiver: Option<mpsc::Receiver<Arc<T>>>,
}

/// A thread-safe event bus with per-type channels.
#[derive(Debug, Clone, Default)]
pub struct EventBus {
    channels: Arc<RwLock<FxHashMap<TypeId, ChannelState>>>,
}

impl EventBus {
    /// Creates a new, empty `EventBus`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes to an event of type `T` using broadcast with default capacity.
    ///
    /// # Errors
    /// Returns [`EventBusError::ChannelKindMismatch`] if a different channel kind
    /// was already registered for `T`.
    pub fn subscribe<T: Event>(&self) -> Result<broadcast::Receiver<Arc<T>>, EventBusError> {
        self.subscribe_with_capacity::<T>(DEFAULT_CAPACITY)
    }

    /// Subscribes to an event of type `T` with a specific broadcast buffer capacity.
    ///
    /// # Errors
    /// Returns [`EventBusError::ChannelKindMismatch`] if a different channel kind
    /// was already registered for `T`, or [`EventBusError::InvalidCapacity`] if
    /// `capacity` is zero.
    pub fn subscribe_with_capacity<T: Event>(
        &self,
        capacity: usize,
    ) -> Result<broadcast::Receiver<Arc<T>>, EventBusError> {
        let capacity = validate_capacity(capacity)?;
        let sender = self.broadcast_sender::<T>(capacity)?;
        Ok(sender.subscribe())
    }

    /// Takes the receiving end of a bounded MPSC channel (queue semantics).
    ///
    /// # Errors
    /// Returns [`EventBusError::ChannelKindMismatch`] if a different channel kind
    /// was already registered for `T` or the receiver was already taken, and
    /// [`EventBusError::InvalidCapacity`] if `capacity` is zero.
    pub fn subscribe_mpsc<T: Event>(
        &self,
        capacity: usize,
    ) -> Result<mpsc::Receiver<Arc<T>>, EventBusError> {
        let capacity = validate_capacity(capacity)?;
        let mut channels = self.channels.write();
        let id = TypeId::of::<T>();

        if let Some(state) = channels.get_mut(&id) {
            return match state.kind {
                ChannelKind::Mpsc { .. } => {
                    let chan = state.sender.downcast_mut::<MpscChannel<T>>().ok_or_else(|| {
                        type_mismatch::<T>()
                    })?;
                    chan.receiver.take().ok_or_else(|| EventBusError::ChannelKindMismatch {
                        message: "MPSC receiver already taken".into(),
                        context: Some(std::any::type_name::<T>().into()),
                    })
                },
                other => Err(kind_mismatch::<T>(ChannelKind::Mpsc { capacity }, other)),
            };
        }

        trace!(event = std::any::type_name::<T>(), capacity, "Initializing new mpsc channel");
        let (tx, rx) = mpsc::channel::<Arc<T>>(capacity);
        channels.insert(id, ChannelState {
            kind: ChannelKind::Mpsc { capacity },
            sender: Box::new(MpscChannel { sender: tx, receiver: None }),
        });
        Ok(rx)
    }

    /// Publishes a shared event instance via broadcast.
    ///
    /// Returns the number of subscribers that received the event; zero when nobody
    /// is listening (the event is dropped, not an error).
    ///
    /// # Errors
    /// Returns [`EventBusError::ChannelKindMismatch`] if a different channel kind
    /// was already registered for `T`.
    pub fn publish<T: Event>(&self, event: T) -> Result<usize, EventBusError> {
        self.publish_arc(Arc::new(event))
    }

    /// Publishes a shared event instance via broadcast without re-wrapping.
    ///
    /// # Errors
    /// Returns [`EventBusError::ChannelKindMismatch`] if a different channel kind
    /// was already registered for `T`.
    pub fn publish_arc<T: Event>(&self, event: Arc<T>) -> Result<usize, EventBusError> {
        let sender = self.broadcast_sender::<T>(DEFAULT_CAPACITY)?;

        sender.send(event).map_or_else(
            |_| {
                trace!(event = std::any::type_name::<T>(), "Event dropped: no active subscribers");
                Ok(0)
            },
            |count| {
                trace!(event = std::any::type_name::<T>(), count, "Event dispatched");
                Ok(count)
            },
        )
    }

    /// Publishes to a bounded MPSC channel (queue semantics), without blocking.
    ///
    /// # Errors
    /// Returns [`EventBusError::ChannelKindMismatch`] if a different channel kind
    /// was already registered for `T`, or [`EventBusError::ChannelFull`] if full.
    pub fn publish_mpsc<T: Event>(&self, event: T) -> Result<(), EventBusError> {
        let sender = {
            let mut channels = self.channels.write();
            let id = TypeId::of::<T>();

            match channels.get_mut(&id) {
                Some(state) => match state.kind {
                    ChannelKind::Mpsc { .. } => state
                        .sender
                        .downcast_mut::<MpscChannel<T>>()
                        .map(|chan| chan.sender.clone())
                        .ok_or_else(type_mismatch::<T>)?,
                    other => {
                        return Err(kind_mismatch::<T>(
                            ChannelKind::Mpsc { capacity: DEFAULT_CAPACITY },
                            other,
                        ));
                    },
                },
                None => {
                    trace!(
                        event = std::any::type_name::<T>(),
                        capacity = DEFAULT_CAPACITY,
                        "Initializing new mpsc channel"
                    );
                    let (tx, rx) = mpsc::channel::<Arc<T>>(DEFAULT_CAPACITY);
                    channels.insert(id, ChannelState {
                        kind: ChannelKind::Mpsc { capacity: DEFAULT_CAPACITY },
                        sender: Box::new(MpscChannel { sender: tx.clone(), receiver: Some(rx) }),
                    });
                    tx
                },
            }
        };

        sender.try_send(Arc::new(event)).map_err(|e| EventBusError::ChannelFull {
            message: e.to_string().into(),
            context: Some(std::any::type_name::<T>().into()),
        })
    }

    /// Gracefully shuts down the bus by dropping all underlying channels.
    ///
    /// Returns the number of event channels that were closed.
    #[must_use]
    pub fn shutdown(&self) -> usize {
        let mut channels = self.channels.write();
        let count = channels.len();
        channels.clear();
        count
    }

    fn broadcast_sender<T: Event>(
        &self,
        capacity: usize,
    ) -> Result<broadcast::Sender<Arc<T>>, EventBusError> {
        let id = TypeId::of::<T>();

        {
            let channels = self.channels.read();
            if let Some(state) = channels.get(&id) {
                return match state.kind {
                    ChannelKind::Broadcast { .. } => state
                        .sender
                        .downcast_ref::<broadcast::Sender<Arc<T>>>()
                        .cloned()
                        .ok_or_else(type_mismatch::<T>),
                    other => {
                        Err(kind_mismatch::<T>(ChannelKind::Broadcast { capacity }, other))
                    },
                };
            }
        }

        let mut channels = self.channels.write();
        let state = channels.entry(id).or_insert_with(|| {
            trace!(
                event = std::any::type_name::<T>(),
                capacity,
                "Initializing new broadcast channel"
            );
            let (tx, _) = broadcast::channel::<Arc<T>>(capacity);
            ChannelState { kind: ChannelKind::Broadcast { capacity }, sender: Box::new(tx) }
        });

        match state.kind {
            ChannelKind::Broadcast { .. } => state
                .sender
                .downcast_ref::<broadcast::Sender<Arc<T>>>()
                .cloned()
                .ok_or_else(type_mismatch::<T>),
            other => Err(kind_mismatch::<T>(ChannelKind::Broadcast { capacity }, other)),
        }
    }
}

fn type_mismatch<T>() -> EventBusError {
    EventBusError::TypeMismatch {
        message: std::any::type_name::<T>().into(),
        context: Some("Unexpected event type".into()),
    }
}

fn kind_mismatch<T>(expected: ChannelKind, found: ChannelKind) -> EventBusError {
    EventBusError::ChannelKindMismatch {
        message: format!("Expected {expected:?} but found {found:?} for {}", std::any::type_name::<T>())
            .into(),
        context: None,
    }
}

fn validate_capacity(capacity: usize) -> Result<usize, EventBusError> {
    if capacity < MIN_CAPACITY {
        return Err(EventBusError::InvalidCapacity {
            message: format!("capacity must be >= {MIN_CAPACITY}").into(),
            context: None,
        });
    }
    Ok(capacity)
}
