//! Synchronization engine: per-title merged views of local and remote state.

pub mod engine;
pub mod poller;
pub mod resolver;

pub use engine::{NoteSubscription, SyncEngine};
pub use poller::{Poller, PollerHandle};
pub use resolver::{resolve, Resolution, Source};
