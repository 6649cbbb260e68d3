//! A typed, thread-safe event bus.
//!
//! Channels are indexed by the event's [`TypeId`](std::any::TypeId). Two kinds are
//! supported:
//!
//! * **Broadcast** (fan-out): every subscriber sees every event. Used for session
//!   lifecycle and audit events.
//! * **MPSC** (queue): exactly one consumer drains a bounded queue. Used where
//!   backpressure matters, e.g. feeding a recorder.
//!
//! ## Example
//! ```rust
//! use shellcn_event_bus::{EventBus, EventReceiverExt};
//!
//! #[derive(Clone, Debug, PartialEq)]
//! struct SessionClosed(String);
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), shellcn_event_bus::EventBusError> {
//! let bus = EventBus::new();
//! let mut rx = bus.subscribe::<SessionClosed>()?;
//! bus.publish(SessionClosed("s1".into()))?;
//! assert_eq!(rx.recv().await.unwrap().0, "s1");
//! # Ok(())
//! # }
//! ```

mod bus;
mod error;
mod receiver;

pub use bus::{ChannelKind, Event, EventBus};
pub use error::{EventBusError, EventBusErrorExt};
pub use receiver::EventReceiverExt;
