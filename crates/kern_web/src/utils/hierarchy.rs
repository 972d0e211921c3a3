//! Layered file lookup.
//!
//! Instead of one fixed directory, an ordered list of prefix directories is
//! searched, so a site can override single files of a shared default tree.
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;

use crate::core::{Handler, Next, Request, Response};
use crate::error::{ResponseError, WebError};

#[derive(Debug, thiserror::Error)]
pub enum HierarchyError {
    #[error("hierarchy prefix {} is not a readable directory: {source}", .path.display())]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("hierarchy has no file {}", .suffix.display())]
    Missing { suffix: PathBuf },
}

impl ResponseError for HierarchyError {}

#[derive(Debug, Clone)]
pub struct Hierarchy {
    prefixes: Vec<PathBuf>,
}

impl Hierarchy {
    pub const DEFAULT_DIR: &'static str = "./default";

    /// Layers `prefixes` in order of priority with `default_dir` appended
    /// last. Every layer must be a readable directory.
    pub fn new<I, P, D>(prefixes: I, default_dir: D) -> Result<Self, HierarchyError>
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
        D: Into<PathBuf>,
    {
        let mut prefixes: Vec<PathBuf> = prefixes.into_iter().map(Into::into).collect();
        prefixes.push(default_dir.into());

        for prefix in &prefixes {
            std::fs::read_dir(prefix).map_err(|source| HierarchyError::Unreadable {
                path: prefix.clone(),
                source,
            })?;
        }
        tracing::debug!(layers = prefixes.len(), "Hierarchy ready");
        Ok(Self { prefixes })
    }

    pub fn prefixes(&self) -> &[PathBuf] {
        &self.prefixes
    }

    /// Whether `prefix/suffix` exists.
    pub fn exists<P: AsRef<Path>, S: AsRef<Path>>(&self, prefix: P, suffix: S) -> bool {
        prefix.as_ref().join(suffix).exists()
    }

    /// First existing `prefix/suffix`, searching the layers in order.
    pub fn lookup<S: AsRef<Path>>(&self, suffix: S) -> Option<PathBuf> {
        self.prefixes
            .iter()
            .map(|prefix| prefix.join(suffix.as_ref()))
            .find(|candidate| candidate.exists())
    }

    /// Like [`lookup`](Self::lookup) for files the application cannot run
    /// without; a miss is a configuration error.
    pub fn lookup_required<S: AsRef<Path>>(&self, suffix: S) -> Result<PathBuf, HierarchyError> {
        self.lookup(suffix.as_ref()).ok_or_else(|| HierarchyError::Missing {
            suffix: suffix.as_ref().to_path_buf(),
        })
    }

    /// Files of directory `suffix` merged over all layers. A file name found
    /// in an earlier layer hides the same name in later ones. `None` when no
    /// layer has the directory.
    pub fn lookup_directory<S: AsRef<Path>>(&self, suffix: S) -> Option<Vec<PathBuf>> {
        let mut seen = HashSet::new();
        let mut files = Vec::new();
        let mut found = false;

        for prefix in &self.prefixes {
            let dir = prefix.join(suffix.as_ref());
            let Ok(entries) = std::fs::read_dir(&dir) else {
                continue;
            };
            found = true;

            let mut names: Vec<_> = entries
                .filter_map(Result::ok)
                .filter(|e| e.file_type().map(|t| !t.is_dir()).unwrap_or(false))
                .map(|e| e.file_name())
                .collect();
            names.sort();

            for name in names {
                if seen.insert(name.clone()) {
                    files.push(dir.join(name));
                }
            }
        }
        found.then_some(files)
    }
}

/// Serves files below a route path, each looked up through a [`Hierarchy`].
pub struct HierarchyDir {
    hierarchy: Arc<Hierarchy>,
    dir: PathBuf,
}

impl HierarchyDir {
    /// Requests below the matched route path map to `dir/<rest>` inside
    /// every layer.
    pub fn new<D: AsRef<Path>>(hierarchy: Arc<Hierarchy>, dir: D) -> Self {
        Self {
            hierarchy,
            dir: super::sanitize(&dir.as_ref().to_string_lossy()),
        }
    }
}

#[async_trait]
impl Handler for HierarchyDir {
    async fn handle(
        &self,
        res: &mut Response,
        req: &mut Request,
        next: &mut Next,
    ) -> Result<(), WebError> {
        let rel = req.path().strip_prefix(next.route_path()).unwrap_or("");
        let suffix = self.dir.join(super::sanitize(rel));

        match self.hierarchy.lookup(&suffix) {
            Some(file) if file.is_file() => res.file(200, &file),
            _ => res.text(404, "Not Found"),
        }
        Ok(())
    }
}
