use std::path::{Component, Path, PathBuf};

use davmirror_core::{ACCOUNT_ROOT_MARKER, decode_segment};

/// Maps canonical remote paths onto the local cache tree and back.
///
/// `/remote.php/dav/files/alice/Docs/a.txt` maps to `<cache_root>/alice/Docs/a.txt`.
/// Input without the account-root marker is placed under the cache root as-is.
#[derive(Debug, Clone)]
pub struct PathMapper {
    cache_root: PathBuf,
}

impl PathMapper {
    pub fn new(cache_root: impl Into<PathBuf>) -> Self {
        Self {
            cache_root: cache_root.into(),
        }
    }

    pub fn cache_root(&self) -> &Path {
        &self.cache_root
    }

    pub fn to_local_path(&self, remote_path: &str) -> PathBuf {
        // Already mapped: local names are not percent-encoded, so only
        // normalise. This keeps the mapping idempotent.
        if let Ok(relative) = Path::new(remote_path).strip_prefix(&self.cache_root) {
            return self.join_normal(relative);
        }

        let decoded = decode_segment(remote_path);
        let relative = match decoded.find(ACCOUNT_ROOT_MARKER) {
            Some(idx) => &decoded[idx + ACCOUNT_ROOT_MARKER.len()..],
            None => decoded.as_str(),
        };
        self.join_normal(Path::new(relative))
    }

    /// Reverse mapping with percent-encoded segments; `None` outside the cache root.
    pub fn to_remote_path(&self, local_path: &Path) -> Option<String> {
        let relative = local_path.strip_prefix(&self.cache_root).ok()?;
        let mut remote = ACCOUNT_ROOT_MARKER.trim_end_matches('/').to_string();
        for component in relative.components() {
            if let Component::Normal(part) = component {
                remote.push('/');
                remote.push_str(&urlencoding::encode(&part.to_string_lossy()));
            }
        }
        Some(remote)
    }

    // `.` and `..` are dropped so the result stays inside the cache root.
    fn join_normal(&self, relative: &Path) -> PathBuf {
        let mut out = self.cache_root.clone();
        for component in relative.components() {
            if let Component::Normal(part) = component {
                out.push(part);
            }
        }
        out
    }
}
