//! Durable FIFO queue of writes that could not be sent.
//!
//! Mutations persist in the `queue` namespace of the shared store and are
//! replayed one at a time, oldest first, once connectivity returns.

mod mutation;
mod mutation_queue;

pub use mutation::{
    DiscardReason, MutationSender, QueueConfig, QueueEvent, QueuedMutation, ReplayReport,
    SendVerdict,
};
pub use mutation_queue::MutationQueue;
