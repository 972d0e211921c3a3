use notify::event::{AccessKind, AccessMode};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::Path;

use super::ViewError;

fn is_change(kind: &EventKind) -> bool {
    match kind {
        EventKind::Access(AccessKind::Close(AccessMode::Write)) => true,
        EventKind::Access(_) => false,
        _ => true,
    }
}

/// Call `on_change` whenever `path` changes.
///
/// The parent directory is watched and events are filtered by file name, so
/// editors that save by replacing the file keep triggering. Watching stops
/// when the returned watcher is dropped.
pub(crate) fn watch<F>(path: &Path, on_change: F) -> Result<RecommendedWatcher, ViewError>
where
    F: Fn() + Send + 'static,
{
    let watch_err = |source| ViewError::Watch {
        path: path.to_path_buf(),
        source,
    };
    let absolute = std::fs::canonicalize(path).map_err(|source| ViewError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let dir = absolute
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| absolute.clone());
    let Some(file_name) = absolute.file_name().map(|n| n.to_os_string()) else {
        return Err(ViewError::Read {
            path: path.to_path_buf(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "not a file"),
        });
    };

    let shown = absolute.display().to_string();
    let mut watcher = RecommendedWatcher::new(
        move |res: notify::Result<Event>| match res {
            Ok(event) => {
                let ours = event
                    .paths
                    .iter()
                    .any(|p| p.file_name() == Some(file_name.as_os_str()));
                if ours && is_change(&event.kind) {
                    on_change();
                }
            }
            Err(e) => tracing::error!(view = %shown, error = %e, "View watch error"),
        },
        Config::default(),
    )
    .map_err(watch_err)?;

    watcher
        .watch(&dir, RecursiveMode::NonRecursive)
        .map_err(watch_err)?;
    tracing::debug!(view = %absolute.display(), "Watching view");
    Ok(watcher)
}
