//! Shared-memory ring transport for IDM frames.
//!
//! Delivers whole framed messages in order across a trust boundary
//! using a pair of single-producer/single-consumer rings in shared
//! memory plus an event-channel notifier per receiving zone. The rings
//! are lock-free: each has exactly one writer advancing `producer` and
//! one reader advancing `consumer`, fenced with acquire/release
//! ordering so a consumer never observes a counter increment before
//! the slot contents behind it.
//!
//! Two backends sit behind one [`Backend`] selection:
//!
//! - [`Backend::Shm`]: POSIX shared-memory segments keyed by the zone
//!   pair with a named semaphore per receiving zone. Used where the
//!   broker and tenants are ordinary processes (development, CI).
//! - [`Backend::Memory`]: heap segments shared through an in-process
//!   [`MemoryLink`], with condvar notifiers. Used by tests and
//!   single-process simulation.
//!
//! A hypervisor backend (grant-mapped pages plus an event channel) is
//! representable as a further variant supplying the same mapped-region
//! contract; upper layers never see which backend is in play.

mod connection;
mod error;
mod memory;
mod notify;
mod ring;
mod shm;

pub use connection::{Backend, Role, Transport};
pub use error::TransportError;
pub use memory::MemoryLink;
pub use ring::{RING_CAPACITY, SLOT_SIZE};
