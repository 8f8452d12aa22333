use chrono::{DateTime, Local};
use notify::event::{ModifyKind, RenameMode};
use notify::{EventKind, RecommendedWatcher, RecursiveMode};
use notify_debouncer_full::{new_debouncer, DebouncedEvent, Debouncer, RecommendedCache};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::{PipelineError, PipelineResult};

/// How long the debouncer waits for a burst of events to settle
const DEBOUNCE_WINDOW: Duration = Duration::from_millis(500);

/// A newly created file, handed from the watcher to the pipeline
#[derive(Debug, Clone)]
pub struct FileEvent {
    pub id: Uuid,
    pub path: PathBuf,
    pub detected_at: DateTime<Local>,
}

impl FileEvent {
    pub fn new(path: PathBuf) -> Self {
        Self {
            id: Uuid::new_v4(),
            path,
            detected_at: Local::now(),
        }
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default()
    }
}

/// Watches one folder and forwards file creations; dropping it stops the watch
pub struct FolderWatcher {
    _debouncer: Debouncer<RecommendedWatcher, RecommendedCache>,
    path: PathBuf,
}

impl FolderWatcher {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Start watching a directory, sending every new file into `sender`
pub fn start_watcher(path: &Path, sender: mpsc::Sender<FileEvent>) -> PipelineResult<FolderWatcher> {
    let canonical = path
        .canonicalize()
        .map_err(|e| PipelineError::Config(format!("cannot resolve {}: {}", path.display(), e)))?;

    if !canonical.is_dir() {
        return Err(PipelineError::Config(format!(
            "{} is not a directory",
            canonical.display()
        )));
    }

    let watched_folder = canonical.clone();

    let mut debouncer = new_debouncer(
        DEBOUNCE_WINDOW,
        None,
        move |result: Result<Vec<DebouncedEvent>, Vec<notify::Error>>| match result {
            Ok(events) => {
                for event in events {
                    handle_file_event(&sender, &event, &watched_folder);
                }
            }
            Err(errors) => {
                for error in errors {
                    tracing::error!("[Watcher] {:?}", error);
                }
            }
        },
    )?;

    debouncer.watch(&canonical, RecursiveMode::NonRecursive)?;

    tracing::info!("[Watcher] Watching {}", canonical.display());

    Ok(FolderWatcher {
        _debouncer: debouncer,
        path: canonical,
    })
}

/// Handle a debounced event
fn handle_file_event(sender: &mpsc::Sender<FileEvent>, event: &DebouncedEvent, watched_folder: &Path) {
    // Files moved in arrive as renames; for a paired rename only the
    // destination matters. Our own `-ss` renames are dropped by the pipeline.
    let paths = match event.kind {
        EventKind::Create(_) => &event.paths[..],
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => match event.paths.last() {
            Some(to) => std::slice::from_ref(to),
            None => return,
        },
        EventKind::Modify(ModifyKind::Name(RenameMode::To | RenameMode::Any)) => &event.paths[..],
        _ => return,
    };

    for path in paths {
        if !should_forward(path, watched_folder) {
            continue;
        }

        let file_event = FileEvent::new(path.clone());
        tracing::debug!("[Watcher] New file: {}", file_event.file_name());

        // Runs on the debouncer thread, outside the runtime
        if sender.blocking_send(file_event).is_err() {
            tracing::debug!("[Watcher] Pipeline closed, dropping {:?}", path);
            return;
        }
    }
}

/// Whether a created path should enter the pipeline
fn should_forward(path: &Path, watched_folder: &Path) -> bool {
    // Skip directories and symlinks
    let metadata = match std::fs::symlink_metadata(path) {
        Ok(m) => m,
        Err(_) => return false,
    };
    if !metadata.is_file() {
        return false;
    }

    // Non-recursive watch, but symlinked parents could still resolve elsewhere
    match path.canonicalize() {
        Ok(canonical) if canonical.starts_with(watched_folder) => {}
        Ok(_) => {
            tracing::warn!("[Watcher] Skipping file outside watched folder: {:?}", path);
            return false;
        }
        Err(_) => return false,
    }

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();

    // Skip hidden files, temp files, and partial writes
    !(file_name.is_empty()
        || file_name.starts_with('.')
        || file_name.ends_with(".tmp")
        || file_name.ends_with(".crdownload")
        || file_name.ends_with(".part")
        || file_name.ends_with(".download"))
}
