//! notesync — client-side synchronization of named notes between a local
//! SQLite store and a remote shared service.
//!
//! Multiple independent clients may edit the same note concurrently; each
//! note carries a monotonically increasing version counter and conflicts are
//! resolved at whole-note granularity by version comparison. The [`sync`]
//! module is the core: per-title merged views, background polling, and the
//! conflict policy. [`store`] and [`remote`] are the local and network
//! collaborators it coordinates.

pub mod config;
pub mod error;
pub mod model;
pub mod remote;
pub mod store;
pub mod sync;

pub use config::SyncConfig;
pub use error::{ApiError, StoreError, SyncError};
pub use model::Note;
pub use remote::{HttpNoteApi, NoteApi};
pub use store::NoteStore;
pub use sync::{NoteSubscription, SyncEngine};
