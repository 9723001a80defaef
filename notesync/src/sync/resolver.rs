//! Conflict resolution between a local and a remote candidate for one title.
//!
//! Pure and total: no side effects, no clock reads. The merge step in the
//! engine calls this for every incoming update, which keeps the conflict
//! policy unit-testable in isolation from any concurrency plumbing.

use crate::model::Note;

/// Which side produced the winning note.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Local,
    Remote,
    /// Equal versions: no newer remote information, the local copy stands.
    Tie,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub note: Note,
    pub source: Source,
}

/// Pick the authoritative note between the two sides.
///
/// An absent side loses unconditionally. Otherwise the strictly greater
/// version wins, and equal versions resolve to the local note (a tie means
/// the remote told us nothing new). The comparison itself is symmetric:
/// swapping the arguments flips only the reported source, never which
/// version is chosen.
pub fn resolve(local: Option<&Note>, remote: Option<&Note>) -> Option<Resolution> {
    match (local, remote) {
        (None, None) => None,
        (Some(local), None) => Some(Resolution {
            note: local.clone(),
            source: Source::Local,
        }),
        (None, Some(remote)) => Some(Resolution {
            note: remote.clone(),
            source: Source::Remote,
        }),
        (Some(local), Some(remote)) => {
            let resolution = if remote.version > local.version {
                Resolution {
                    note: remote.clone(),
                    source: Source::Remote,
                }
            } else if local.version > remote.version {
                Resolution {
                    note: local.clone(),
                    source: Source::Local,
                }
            } else {
                Resolution {
                    note: local.clone(),
                    source: Source::Tie,
                }
            };
            Some(resolution)
        }
    }
}
