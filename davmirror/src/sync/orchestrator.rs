use davmirror_core::{
    ACCOUNT_ROOT_MARKER, Credentials, DavError, Entry, EntryKind, EntryState, ErrorClass,
    ListingError, ProgressSink, parse_listing,
};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::cache::{CacheError, CacheStore};
use super::remote::{ConnectivityProbe, RemoteStore};
use crate::storage::{Session, SessionStore, StorageError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    LoggedOut,
    Online,
    Offline,
}

/// Message category an error belongs to, for whatever renders it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Connectivity,
    Credentials,
    NotFound,
    UnexpectedServer,
    LocalStorage,
    /// Refused before any I/O was attempted.
    Rejected,
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Remote(#[from] DavError),
    #[error("unreadable listing: {0}")]
    Listing(#[from] ListingError),
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error("session storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("not logged in")]
    NotLoggedIn,
    #[error("cannot reach the server")]
    NoConnectivity,
    #[error("working offline")]
    OfflineMode,
    #[error("the root folder is not available offline; log in again")]
    RootUnavailableOffline,
    #[error("{0} is not available offline")]
    FolderUnavailableOffline(String),
    #[error("no entry for {0} in the current listing")]
    UnknownEntry(String),
    #[error("the latest version of {0} is already downloaded")]
    AlreadySynced(String),
    #[error("{0} exists only locally")]
    NotRemote(String),
    #[error("{0} is a folder")]
    NotAFile(String),
    #[error("download path is not set")]
    MissingRemotePath,
}

impl SyncError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            SyncError::Remote(err) => match err.classification() {
                ErrorClass::Connectivity => ErrorCategory::Connectivity,
                ErrorClass::Credentials => ErrorCategory::Credentials,
                ErrorClass::NotFound => ErrorCategory::NotFound,
                ErrorClass::Server => ErrorCategory::UnexpectedServer,
                ErrorClass::LocalStorage => ErrorCategory::LocalStorage,
            },
            SyncError::Listing(_) => ErrorCategory::UnexpectedServer,
            SyncError::Cache(_)
            | SyncError::Storage(_)
            | SyncError::RootUnavailableOffline
            | SyncError::FolderUnavailableOffline(_) => ErrorCategory::LocalStorage,
            SyncError::NoConnectivity | SyncError::OfflineMode => ErrorCategory::Connectivity,
            SyncError::NotLoggedIn => ErrorCategory::Credentials,
            SyncError::UnknownEntry(_)
            | SyncError::AlreadySynced(_)
            | SyncError::NotRemote(_)
            | SyncError::NotAFile(_)
            | SyncError::MissingRemotePath => ErrorCategory::Rejected,
        }
    }

    /// The session was ended because of this error.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SyncError::RootUnavailableOffline)
    }
}

/// Owns the session, the online/offline mode and the visible entry list.
///
/// Entries are addressed by remote path; any navigation replaces the whole
/// list, so positions are not stable across calls.
pub struct SyncOrchestrator<R, P> {
    remote: R,
    probe: P,
    cache: CacheStore,
    sessions: SessionStore,
    session: Option<Session>,
    mode: Mode,
    entries: Vec<Entry>,
    current_path: Option<String>,
}

impl<R, P> SyncOrchestrator<R, P>
where
    R: RemoteStore,
    P: ConnectivityProbe,
{
    pub fn new(remote: R, probe: P, cache: CacheStore, sessions: SessionStore) -> Self {
        Self {
            remote,
            probe,
            cache,
            sessions,
            session: None,
            mode: Mode::LoggedOut,
            entries: Vec::new(),
            current_path: None,
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn is_logged_in(&self) -> bool {
        self.mode != Mode::LoggedOut
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn entry(&self, remote_path: &str) -> Option<&Entry> {
        self.entries
            .iter()
            .find(|entry| entry.remote_path == remote_path)
    }

    pub fn current_path(&self) -> Option<&str> {
        self.current_path.as_deref()
    }

    /// Logs in with fresh credentials by listing the account root. Nothing is
    /// stored unless that listing succeeds; there is no offline fallback here.
    pub async fn login(
        &mut self,
        account_url: &str,
        username: &str,
        password: &str,
    ) -> Result<&[Entry], SyncError> {
        let (base_url, user_id) = split_account_url(account_url, username);
        let mut session = Session::new(base_url, username, user_id, password);
        let root = session.account_root();
        let credentials = session.credentials()?;

        if !self.probe.is_network_reachable(credentials.base_url()).await {
            return Err(SyncError::NoConnectivity);
        }
        let body = self.remote.list_directory(&credentials, &root).await?;
        let entries = parse_listing(&body)?;

        session.start_folder = root.clone();
        if let Err(err) = self.sessions.save(&session) {
            warn!(error = %err, "could not persist session; it will not survive a restart");
        }
        info!(user = %session.username, server = %session.account_url, "logged in");
        self.session = Some(session);
        self.mode = Mode::Online;
        self.install_fetched(&root, &body, entries).await;
        Ok(&self.entries)
    }

    /// Restores the persisted session and opens its start folder. Returns
    /// `false` when nothing was persisted.
    pub async fn resume(&mut self) -> Result<bool, SyncError> {
        let Some(session) = self.sessions.load()? else {
            return Ok(false);
        };
        let root = session.account_root();
        let start = if session.start_folder.is_empty() {
            root.clone()
        } else {
            session.start_folder.clone()
        };
        self.mode = if session.work_offline {
            Mode::Offline
        } else {
            Mode::Online
        };
        debug!(user = %session.username, %start, mode = ?self.mode, "resuming session");
        self.session = Some(session);

        match self.resolve_listing(&start).await.map(|_| ()) {
            Ok(()) => Ok(true),
            Err(
                err @ (SyncError::FolderUnavailableOffline(_)
                | SyncError::Remote(DavError::NotFound(_))),
            ) if !same_folder(&start, &root) => {
                warn!(%start, error = %err, "start folder unavailable; opening the root folder");
                self.resolve_listing(&root).await?;
                Ok(true)
            }
            Err(err) => Err(err),
        }
    }

    /// Lists `path` from the server, or from its snapshot while offline.
    pub async fn resolve_listing(&mut self, path: &str) -> Result<&[Entry], SyncError> {
        match self.mode {
            Mode::LoggedOut => return Err(SyncError::NotLoggedIn),
            Mode::Online => self.resolve_online(path).await?,
            Mode::Offline => self.resolve_offline(path).await?,
        }
        Ok(&self.entries)
    }

    async fn resolve_online(&mut self, path: &str) -> Result<(), SyncError> {
        let credentials = self.credentials()?;
        if !self.probe.is_network_reachable(credentials.base_url()).await {
            warn!("cannot reach the server; switching to offline mode");
            self.mode = Mode::Offline;
            return self.resolve_offline(path).await;
        }

        match self.remote.list_directory(&credentials, path).await {
            Ok(body) => {
                let entries = parse_listing(&body)?;
                self.install_fetched(path, &body, entries).await;
                Ok(())
            }
            Err(err) if err.forces_offline() => {
                warn!(%path, error = %err, "listing failed; switching to offline mode");
                self.mode = Mode::Offline;
                self.resolve_offline(path).await
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn resolve_offline(&mut self, path: &str) -> Result<(), SyncError> {
        let is_root = self
            .session
            .as_ref()
            .is_some_and(|session| same_folder(path, &session.account_root()));
        let local_dir = self.cache.directory_for(path);

        let body = match self.cache.read_snapshot(&local_dir).await {
            Ok(Some(body)) => body,
            Ok(None) if is_root => {
                warn!(%path, "root folder has no offline copy; ending session");
                self.end_session().await;
                return Err(SyncError::RootUnavailableOffline);
            }
            Ok(None) => return Err(SyncError::FolderUnavailableOffline(path.to_string())),
            Err(err) if is_root => {
                warn!(%path, error = %err, "root folder snapshot unreadable; ending session");
                self.end_session().await;
                return Err(SyncError::RootUnavailableOffline);
            }
            Err(err) => return Err(err.into()),
        };

        let mut entries = parse_listing(&body)?;
        self.cache.refresh_states(&mut entries).await;
        if let Err(err) = self.cache.merge_local_only(&mut entries, &local_dir).await {
            warn!(error = %err, "could not scan local folder");
        }
        debug!(%path, entries = entries.len(), "served listing from cache");
        self.entries = entries;
        self.current_path = Some(path.to_string());
        Ok(())
    }

    async fn install_fetched(&mut self, path: &str, body: &str, mut entries: Vec<Entry>) {
        let local_dir = self.cache.directory_for(path);
        if let Err(err) = self.cache.ensure_directory(&local_dir).await {
            warn!(error = %err, "could not create local folder");
        }
        self.cache.refresh_states(&mut entries).await;
        if let Err(err) = self.cache.merge_local_only(&mut entries, &local_dir).await {
            warn!(error = %err, "could not scan local folder");
        }
        self.cache.write_snapshot(&local_dir, body).await;
        debug!(%path, entries = entries.len(), "listing fetched");

        self.entries = entries;
        self.current_path = Some(path.to_string());
        self.remember_start_folder(path);
    }

    /// Downloads the file at `remote_path` from the current listing.
    pub async fn download_item(
        &mut self,
        remote_path: &str,
        progress: &mut dyn ProgressSink,
    ) -> Result<EntryState, SyncError> {
        if remote_path.is_empty() {
            return Err(SyncError::MissingRemotePath);
        }
        let entry = self
            .entry(remote_path)
            .cloned()
            .ok_or_else(|| SyncError::UnknownEntry(remote_path.to_string()))?;
        if entry.kind == EntryKind::Folder {
            return Err(SyncError::NotAFile(remote_path.to_string()));
        }
        match entry.state {
            EntryState::Synced => return Err(SyncError::AlreadySynced(remote_path.to_string())),
            EntryState::LocalOnly => return Err(SyncError::NotRemote(remote_path.to_string())),
            EntryState::Cloud => {}
        }

        let credentials = self.credentials()?;
        if self.mode == Mode::Offline {
            return Err(SyncError::OfflineMode);
        }
        if !self.probe.is_network_reachable(credentials.base_url()).await {
            warn!("cannot reach the server; switching to offline mode");
            self.mode = Mode::Offline;
            return Err(SyncError::NoConnectivity);
        }

        let target = self.cache.local_path(&entry);
        info!(path = %remote_path, target = %target.display(), "starting download");
        match self
            .remote
            .download(&credentials, remote_path, &target, progress)
            .await
        {
            Ok(bytes) => {
                debug!(path = %remote_path, bytes, "download complete");
                if let Some(entry) = self
                    .entries
                    .iter_mut()
                    .find(|entry| entry.remote_path == remote_path)
                {
                    entry.state = EntryState::Synced;
                }
                Ok(EntryState::Synced)
            }
            Err(err) => {
                if err.forces_offline() {
                    warn!(path = %remote_path, error = %err, "download failed; switching to offline mode");
                    self.mode = Mode::Offline;
                }
                Err(err.into())
            }
        }
    }

    /// Deletes the local copy of an entry. Synced files go back to `Cloud`;
    /// local-only files leave the listing.
    pub async fn remove_local_copy(&mut self, remote_path: &str) -> Result<(), SyncError> {
        let entry = self
            .entry(remote_path)
            .cloned()
            .ok_or_else(|| SyncError::UnknownEntry(remote_path.to_string()))?;
        if entry.is_parent_link() {
            return Err(SyncError::NotAFile(remote_path.to_string()));
        }
        self.cache.remove_local(&entry).await?;

        match (entry.kind, entry.state) {
            (_, EntryState::LocalOnly) => {
                self.entries.retain(|item| item.remote_path != remote_path);
            }
            (EntryKind::File, _) => {
                if let Some(item) = self
                    .entries
                    .iter_mut()
                    .find(|item| item.remote_path == remote_path)
                {
                    item.state = EntryState::Cloud;
                }
            }
            (EntryKind::Folder, _) => {}
        }
        Ok(())
    }

    /// Leaves offline mode if the server can be reached.
    pub async fn request_online(&mut self) -> Result<(), SyncError> {
        let credentials = self.credentials()?;
        if !self.probe.is_network_reachable(credentials.base_url()).await {
            self.mode = Mode::Offline;
            return Err(SyncError::NoConnectivity);
        }
        self.mode = Mode::Online;
        self.remember_work_offline(false);
        info!("working online");
        Ok(())
    }

    pub fn go_offline(&mut self) -> Result<(), SyncError> {
        if self.session.is_none() {
            return Err(SyncError::NotLoggedIn);
        }
        self.mode = Mode::Offline;
        self.remember_work_offline(true);
        info!("working offline");
        Ok(())
    }

    /// Ends the session and forgets the stored credentials. With `purge`, the
    /// account's local mirror (downloads and snapshots) is deleted too.
    pub async fn logout(&mut self, purge: bool) -> Result<(), SyncError> {
        let user_id = match self.session.take() {
            Some(session) => Some(session.user_id),
            None => match self.sessions.stored_user_id() {
                Ok(user_id) => user_id,
                Err(err) => {
                    warn!(error = %err, "stored session unreadable; nothing to purge");
                    None
                }
            },
        };
        self.reset_state();
        self.sessions.clear()?;
        if purge && let Some(user_id) = user_id {
            self.cache.purge_account(&user_id).await?;
        }
        info!(purge, "logged out");
        Ok(())
    }

    async fn end_session(&mut self) {
        if let Err(err) = self.logout(false).await {
            warn!(error = %err, "could not clear stored session");
        }
    }

    fn reset_state(&mut self) {
        self.session = None;
        self.mode = Mode::LoggedOut;
        self.entries.clear();
        self.current_path = None;
    }

    fn credentials(&self) -> Result<Credentials, SyncError> {
        let session = self.session.as_ref().ok_or(SyncError::NotLoggedIn)?;
        Ok(session.credentials()?)
    }

    fn remember_start_folder(&mut self, path: &str) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if session.start_folder == path {
            return;
        }
        session.start_folder = path.to_string();
        if let Err(err) = self.sessions.update(session) {
            warn!(error = %err, "could not persist start folder");
        }
    }

    fn remember_work_offline(&mut self, work_offline: bool) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        session.work_offline = work_offline;
        if let Err(err) = self.sessions.update(session) {
            warn!(error = %err, "could not persist offline preference");
        }
    }
}

/// Splits a pasted WebDAV URL (`https://host/remote.php/dav/files/<id>/...`)
/// into the server base URL and the user id; other URLs use `username`.
pub fn split_account_url(account_url: &str, username: &str) -> (String, String) {
    let account_url = account_url.trim();
    match account_url.find(ACCOUNT_ROOT_MARKER) {
        Some(idx) => {
            let user_id = account_url[idx + ACCOUNT_ROOT_MARKER.len()..]
                .split('/')
                .next()
                .filter(|id| !id.is_empty())
                .unwrap_or(username);
            (account_url[..idx].to_string(), user_id.to_string())
        }
        None => (
            account_url.trim_end_matches('/').to_string(),
            username.to_string(),
        ),
    }
}

fn same_folder(a: &str, b: &str) -> bool {
    a.trim_end_matches('/') == b.trim_end_matches('/')
}

#[cfg(test)]
#[path = "orchestrator_tests.rs"]
mod tests;
