//! Change event types flowing through the pipeline

use std::path::PathBuf;
use std::time::{Duration, Instant};

/// Raw event kind as reported by a filesystem source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawEventKind {
    /// File created
    Created,
    /// File contents or metadata modified
    Modified,
    /// File deleted
    Deleted,
    /// File renamed (`old_path` -> `path`)
    Renamed,
}

/// A single unprocessed event from the raw source
#[derive(Debug, Clone)]
pub struct RawChangeEvent {
    /// Path that changed (the new path for renames)
    pub path: PathBuf,
    /// Type of change
    pub kind: RawEventKind,
    /// When the source observed the change
    pub timestamp: Instant,
    /// Previous path, only meaningful for renames
    pub old_path: Option<PathBuf>,
}

impl RawChangeEvent {
    /// Event stamped with the current instant
    pub fn new(path: impl Into<PathBuf>, kind: RawEventKind) -> Self {
        Self::at(path, kind, Instant::now())
    }

    /// Event stamped with an explicit instant
    pub fn at(path: impl Into<PathBuf>, kind: RawEventKind, timestamp: Instant) -> Self {
        Self {
            path: path.into(),
            kind,
            timestamp,
            old_path: None,
        }
    }

    /// Rename event from `old_path` to `new_path`
    pub fn renamed(old_path: impl Into<PathBuf>, new_path: impl Into<PathBuf>) -> Self {
        Self {
            path: new_path.into(),
            kind: RawEventKind::Renamed,
            timestamp: Instant::now(),
            old_path: Some(old_path.into()),
        }
    }
}

/// Net effect of a burst of events on one path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ChangeKind {
    Created,
    Modified,
    Deleted,
}

impl ChangeKind {
    /// Fold a newer event into the current net effect.
    ///
    /// Returns `None` when the two cancel out (a file created and removed
    /// before anyone looked at it).
    pub fn fold(self, newer: ChangeKind) -> Option<ChangeKind> {
        use ChangeKind::*;

        match (self, newer) {
            (Created, Deleted) => None,
            (Created, Created | Modified) => Some(Created),
            (Modified, Created | Modified) => Some(Modified),
            (Modified | Deleted, Deleted) => Some(Deleted),
            // Delete-then-recreate surfaces as a modification of the same path
            (Deleted, Created | Modified) => Some(Modified),
        }
    }

    /// Whether the worker needs to read the file
    pub fn needs_content(self) -> bool {
        !matches!(self, ChangeKind::Deleted)
    }
}

/// Per-path debounce state owned by the coalescer
#[derive(Debug, Clone)]
pub struct PendingChange {
    pub path: PathBuf,
    pub kind: ChangeKind,
    pub first_seen: Instant,
    pub ready_at: Instant,
    /// Number of times the max-delay ceiling cut the debounce short
    pub escalations: u32,
    pub old_path: Option<PathBuf>,
}

impl PendingChange {
    pub fn to_ready(&self) -> ReadyChange {
        ReadyChange {
            path: self.path.clone(),
            kind: self.kind,
            old_path: self.old_path.clone(),
        }
    }
}

/// A stabilized change waiting for a worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadyChange {
    pub path: PathBuf,
    pub kind: ChangeKind,
    pub old_path: Option<PathBuf>,
}

impl ReadyChange {
    pub fn new(path: impl Into<PathBuf>, kind: ChangeKind) -> Self {
        Self {
            path: path.into(),
            kind,
            old_path: None,
        }
    }
}

/// Outcome of processing one ready change
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum Outcome {
    Success,
    /// The file vanished before a worker got to it
    Skipped,
    Failure,
}

/// Result of processing one ready change, reported to the status tracker
#[derive(Debug, Clone)]
pub struct ProcessingResult {
    pub path: PathBuf,
    pub outcome: Outcome,
    pub error: Option<String>,
    pub duration: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;
    use ChangeKind::*;

    #[test]
    fn test_fold_table() {
        assert_eq!(Created.fold(Deleted), None);
        assert_eq!(Created.fold(Modified), Some(Created));
        assert_eq!(Modified.fold(Modified), Some(Modified));
        assert_eq!(Modified.fold(Deleted), Some(Deleted));
        assert_eq!(Deleted.fold(Created), Some(Modified));
    }

    #[test]
    fn test_fold_remaining_pairs() {
        assert_eq!(Created.fold(Created), Some(Created));
        assert_eq!(Modified.fold(Created), Some(Modified));
        assert_eq!(Deleted.fold(Modified), Some(Modified));
        assert_eq!(Deleted.fold(Deleted), Some(Deleted));
    }

    #[test]
    fn test_fold_is_left_to_right() {
        // create, modify, delete cancels out; modify, delete, create is a modification
        let net = Some(Created)
            .and_then(|k| k.fold(Modified))
            .and_then(|k| k.fold(Deleted));
        assert_eq!(net, None);

        let net = Some(Modified)
            .and_then(|k| k.fold(Deleted))
            .and_then(|k| k.fold(Created));
        assert_eq!(net, Some(Modified));
    }

    #[test]
    fn test_renamed_constructor_keeps_old_path() {
        let event = RawChangeEvent::renamed("a.txt", "b.txt");
        assert_eq!(event.kind, RawEventKind::Renamed);
        assert_eq!(event.path, PathBuf::from("b.txt"));
        assert_eq!(event.old_path, Some(PathBuf::from("a.txt")));
    }
}
