//! Lock striping and a lock-free SPSC event ring.
//!
//! Two generic primitives, deliberately ignorant of what they carry:
//!
//! - [`StripePool`] hands out one of a fixed number of mutexes keyed by a
//!   byte-string hash. It exists to bound the number of locks a process
//!   holds regardless of how many distinct keys show up at runtime.
//! - [`EventRing`] is a fixed-capacity, single-producer/single-consumer
//!   ring buffer. The writer never blocks: once full, the oldest unread
//!   entries are silently overwritten. This is the right tradeoff for a
//!   buffer that exists purely to observe recent history, where losing the
//!   tail under reader starvation is preferable to blocking the writer.
//!
//! Neither type knows about clients, metrics, or HTTP; `ingestd` composes
//! them into that shape.

mod invariants;
mod ring;
mod stripe;

pub use ring::EventRing;
pub use stripe::StripePool;
