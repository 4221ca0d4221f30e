//! Native filesystem watching via `notify`
//!
//! Translates backend events into `RawChangeEvent`s and hands them to an
//! `EventSink` (normally the scheduler). No debouncing happens here.

use notify::event::{CreateKind, ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use pipeline::{EventSink, RawChangeEvent, RawEventKind};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum WatchError {
    #[error("{0} is not a directory")]
    NotADirectory(PathBuf),

    #[error("failed to watch {path}: {source}")]
    Backend {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },
}

/// Recursive watcher over one root; stops when dropped
pub struct FsWatcher {
    root: PathBuf,
    _watcher: RecommendedWatcher,
}

impl FsWatcher {
    /// Watch `root` recursively, forwarding every translated event to `sink`
    pub fn watch(root: impl Into<PathBuf>, sink: Arc<dyn EventSink>) -> Result<Self, WatchError> {
        let root = root.into();
        if !root.is_dir() {
            return Err(WatchError::NotADirectory(root));
        }

        let backend_err = |source| WatchError::Backend {
            path: root.clone(),
            source,
        };

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => {
                if event.need_rescan() {
                    warn!("Watcher backend dropped events; periodic reconciliation will catch up");
                }
                for raw in translate(&event) {
                    sink.ingest(raw);
                }
            }
            Err(e) => warn!(error = %e, paths = ?e.paths, "Watcher error"),
        })
        .map_err(backend_err)?;

        watcher
            .watch(&root, RecursiveMode::Recursive)
            .map_err(backend_err)?;

        info!(root = %root.display(), "Watching for changes");
        Ok(Self {
            root,
            _watcher: watcher,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

/// Map one backend event onto zero or more raw change events
pub fn translate(event: &Event) -> Vec<RawChangeEvent> {
    let per_path = |kind: RawEventKind| -> Vec<RawChangeEvent> {
        event
            .paths
            .iter()
            .map(|path| RawChangeEvent::new(path.clone(), kind))
            .collect()
    };
    let files_only = |kind: RawEventKind| -> Vec<RawChangeEvent> {
        event
            .paths
            .iter()
            .filter(|path| !path.is_dir())
            .map(|path| RawChangeEvent::new(path.clone(), kind))
            .collect()
    };

    match &event.kind {
        EventKind::Create(CreateKind::Folder) => Vec::new(),
        EventKind::Create(_) => files_only(RawEventKind::Created),

        EventKind::Modify(ModifyKind::Name(mode)) => match (mode, event.paths.as_slice()) {
            (RenameMode::Both, [_, to]) if to.is_dir() => {
                debug!(path = %to.display(), "Ignoring directory rename");
                Vec::new()
            }
            (RenameMode::Both, [from, to]) => vec![RawChangeEvent::renamed(from.clone(), to.clone())],
            (RenameMode::From, _) => per_path(RawEventKind::Deleted),
            (RenameMode::To, _) => files_only(RawEventKind::Created),
            // Unpaired rename: decide by what is on disk now
            _ => event
                .paths
                .iter()
                .filter(|path| !path.is_dir())
                .map(|path| {
                    let kind = if path.exists() {
                        RawEventKind::Created
                    } else {
                        RawEventKind::Deleted
                    };
                    RawChangeEvent::new(path.clone(), kind)
                })
                .collect(),
        },
        EventKind::Modify(_) => files_only(RawEventKind::Modified),

        EventKind::Remove(_) => per_path(RawEventKind::Deleted),

        EventKind::Access(_) | EventKind::Any | EventKind::Other => {
            debug!(kind = ?event.kind, "Ignoring event");
            Vec::new()
        }
    }
}
