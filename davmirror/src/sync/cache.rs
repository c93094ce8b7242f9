use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};

use davmirror_core::{Entry, EntryKind, EntryState, account_root_path};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::paths::PathMapper;

/// Sidecar holding the last fetched listing body of a mirrored directory.
pub const SNAPSHOT_FILE_NAME: &str = ".snapshot";

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache I/O error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl CacheError {
    fn io(path: &Path, source: io::Error) -> Self {
        CacheError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CacheStore {
    mapper: PathMapper,
}

impl CacheStore {
    pub fn new(mapper: PathMapper) -> Self {
        Self { mapper }
    }

    pub fn local_path(&self, entry: &Entry) -> PathBuf {
        self.mapper.to_local_path(&entry.remote_path)
    }

    pub fn directory_for(&self, remote_dir: &str) -> PathBuf {
        self.mapper.to_local_path(remote_dir)
    }

    pub fn snapshot_path(local_dir: &Path) -> PathBuf {
        local_dir.join(SNAPSHOT_FILE_NAME)
    }

    pub async fn ensure_directory(&self, local_dir: &Path) -> Result<(), CacheError> {
        if tokio::fs::metadata(local_dir)
            .await
            .is_ok_and(|meta| meta.is_dir())
        {
            return Ok(());
        }
        info!(dir = %local_dir.display(), "creating local folder");
        tokio::fs::create_dir_all(local_dir)
            .await
            .map_err(|err| CacheError::io(local_dir, err))
    }

    /// Best effort: a cache that cannot be written must not hide a listing
    /// that was just fetched, so failures are only logged.
    pub async fn write_snapshot(&self, local_dir: &Path, body: &str) {
        let path = Self::snapshot_path(local_dir);
        match tokio::fs::write(&path, body).await {
            Ok(()) => debug!(path = %path.display(), "saved listing snapshot"),
            Err(err) => warn!(path = %path.display(), error = %err, "could not save listing snapshot"),
        }
    }

    /// `Ok(None)` when the directory was never listed online.
    pub async fn read_snapshot(&self, local_dir: &Path) -> Result<Option<String>, CacheError> {
        let path = Self::snapshot_path(local_dir);
        match tokio::fs::read_to_string(&path).await {
            Ok(body) => Ok(Some(body)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(CacheError::io(&path, err)),
        }
    }

    /// Appends a `LocalOnly` entry for every regular file directly inside
    /// `local_dir` that no entry maps to. Returns the number appended.
    pub async fn merge_local_only(
        &self,
        entries: &mut Vec<Entry>,
        local_dir: &Path,
    ) -> Result<usize, CacheError> {
        let names = match list_regular_files(local_dir).await {
            Ok(names) => names,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(err) => return Err(CacheError::io(local_dir, err)),
        };

        let mut known: HashSet<PathBuf> =
            entries.iter().map(|entry| self.local_path(entry)).collect();
        let mut added = 0;
        for name in names {
            let path = local_dir.join(&name);
            if known.contains(&path) {
                continue;
            }
            let Some(remote_path) = self.mapper.to_remote_path(&path) else {
                continue;
            };
            debug!(path = %path.display(), "found local-only file");
            entries.push(Entry::local_only(remote_path, name));
            known.insert(path);
            added += 1;
        }
        Ok(added)
    }

    pub async fn file_state(&self, entry: &Entry) -> EntryState {
        let present = tokio::fs::metadata(self.local_path(entry))
            .await
            .is_ok_and(|meta| meta.is_file());
        if present {
            EntryState::Synced
        } else {
            EntryState::Cloud
        }
    }

    /// Recomputes `Cloud`/`Synced` for remote file entries.
    pub async fn refresh_states(&self, entries: &mut [Entry]) {
        for entry in entries
            .iter_mut()
            .filter(|entry| entry.kind == EntryKind::File && entry.state != EntryState::LocalOnly)
        {
            entry.state = self.file_state(entry).await;
        }
    }

    /// Deletes the local copy of a file, or the local tree of a folder.
    pub async fn remove_local(&self, entry: &Entry) -> Result<(), CacheError> {
        let path = self.local_path(entry);
        let result = match entry.kind {
            EntryKind::File => tokio::fs::remove_file(&path).await,
            EntryKind::Folder => tokio::fs::remove_dir_all(&path).await,
        };
        match result {
            Ok(()) => {
                info!(path = %path.display(), "removed local copy");
                Ok(())
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(CacheError::io(&path, err)),
        }
    }

    /// Removes everything mirrored for `user_id`: downloads and snapshots.
    pub async fn purge_account(&self, user_id: &str) -> Result<(), CacheError> {
        let account_dir = self.mapper.to_local_path(&account_root_path(user_id));
        if account_dir == self.mapper.cache_root() {
            warn!("refusing to purge the whole cache root for an empty user id");
            return Ok(());
        }
        match tokio::fs::remove_dir_all(&account_dir).await {
            Ok(()) => {
                info!(dir = %account_dir.display(), "purged local mirror");
                Ok(())
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(CacheError::io(&account_dir, err)),
        }
    }
}

/// Names of regular files directly in `dir`, dotfiles excluded, sorted.
pub async fn list_regular_files(dir: &Path) -> io::Result<Vec<String>> {
    let mut names = Vec::new();
    let mut read_dir = tokio::fs::read_dir(dir).await?;
    while let Some(item) = read_dir.next_entry().await? {
        let name = item.file_name().to_string_lossy().into_owned();
        if name.starts_with('.') {
            continue;
        }
        // Follows symlinks, like stat(2).
        let Ok(meta) = tokio::fs::metadata(item.path()).await else {
            continue;
        };
        if meta.is_file() {
            names.push(name);
        }
    }
    names.sort();
    Ok(names)
}
