//! arena-broker: a first-fit/best-fit coalescing heap arena and a named
//! pub/sub account broker built on top of it.
//!
//! This library exposes two tightly coupled primitives for firmware and
//! other resource-constrained callers that want malloc-shaped memory
//! management and a lightweight publish/subscribe graph without pulling in a
//! general-purpose allocator or an OS message bus:
//!
//! - [`arena::HeapArena`] — an in-place, coalescing free-list allocator over
//!   a caller-supplied byte buffer.
//! - [`broker::AccountBroker`] — a named registry of accounts that publish to
//!   and subscribe from one another, with every account record, id string,
//!   subscription edge, and payload buffer carved out of a `HeapArena`.
//!
//! Both are ordinary values, not process-wide singletons: construct as many
//! arenas and brokers as the caller needs, each over its own buffer.

pub mod arena;
pub mod broker;
pub mod error;
pub mod logging;
pub mod pingpong;
pub mod sync;

pub use arena::HeapArena;
pub use broker::AccountBroker;
pub use broker::event::{EventCallback, EventKind, EventParam};
pub use error::ResultCode;
pub use sync::CriticalSection;
