use super::*;
use crate::storage::SecretBackend;
use crate::sync::paths::PathMapper;
use davmirror_core::{NoProgress, StatusCode};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use tempfile::{TempDir, tempdir};
use url::Url;

const ROOT: &str = "/remote.php/dav/files/alice/";
const DOCS: &str = "/remote.php/dav/files/alice/Docs/";
const NOTES: &str = "/remote.php/dav/files/alice/Docs/notes.txt";

const ROOT_BODY: &str = "<d:multistatus>\
    <d:response><d:href>/remote.php/dav/files/alice/</d:href></d:response>\
    <d:response><d:href>/remote.php/dav/files/alice/Docs/</d:href>\
    <d:propstat><d:prop><d:getetag>\"d1\"</d:getetag></d:prop></d:propstat></d:response>\
    <d:response><d:href>/remote.php/dav/files/alice/readme.md</d:href>\
    <d:propstat><d:prop><oc:size>100</oc:size></d:prop></d:propstat></d:response>\
    </d:multistatus>";

const DOCS_BODY: &str = "<d:multistatus>\
    <d:response><d:href>/remote.php/dav/files/alice/Docs/</d:href></d:response>\
    <d:response><d:href>/remote.php/dav/files/alice/Docs/notes.txt</d:href>\
    <d:propstat><d:prop><d:getetag>\"abc\"</d:getetag><oc:size>2048</oc:size>\
    <d:getcontenttype>text/plain</d:getcontenttype></d:prop></d:propstat></d:response>\
    </d:multistatus>";

#[derive(Clone)]
enum Reply {
    Body(String),
    Unreachable,
    Status(u16),
}

impl Reply {
    fn body(body: &str) -> Self {
        Reply::Body(body.to_string())
    }

    fn into_result(self, path: &str) -> Result<String, DavError> {
        match self {
            Reply::Body(body) => Ok(body),
            Reply::Unreachable => Err(DavError::Unreachable(Box::new(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "connection refused",
            )))),
            Reply::Status(401) => Err(DavError::AuthFailed),
            Reply::Status(404) => Err(DavError::NotFound(path.to_string())),
            Reply::Status(code) => Err(DavError::Server {
                status: StatusCode::from_u16(code).unwrap(),
            }),
        }
    }
}

#[derive(Default)]
struct RemoteState {
    listings: RefCell<HashMap<String, Reply>>,
    downloads: RefCell<HashMap<String, Reply>>,
    calls: Cell<usize>,
}

#[derive(Clone, Default)]
struct FakeRemote {
    state: Rc<RemoteState>,
}

impl FakeRemote {
    fn list(&self, path: &str, reply: Reply) {
        self.state
            .listings
            .borrow_mut()
            .insert(path.to_string(), reply);
    }

    fn serve(&self, path: &str, reply: Reply) {
        self.state
            .downloads
            .borrow_mut()
            .insert(path.to_string(), reply);
    }

    fn calls(&self) -> usize {
        self.state.calls.get()
    }

    fn bump(&self) {
        self.state.calls.set(self.state.calls.get() + 1);
    }
}

impl RemoteStore for FakeRemote {
    async fn list_directory(
        &self,
        _credentials: &Credentials,
        path: &str,
    ) -> Result<String, DavError> {
        self.bump();
        let reply = self.state.listings.borrow().get(path).cloned();
        reply
            .unwrap_or(Reply::Status(404))
            .into_result(path)
    }

    async fn download(
        &self,
        _credentials: &Credentials,
        path: &str,
        target: &Path,
        progress: &mut dyn ProgressSink,
    ) -> Result<u64, DavError> {
        self.bump();
        let reply = self.state.downloads.borrow().get(path).cloned();
        let body = reply.unwrap_or(Reply::Status(404)).into_result(path)?;
        let total = body.len() as u64;
        progress.on_progress(0, total);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(target, body).await?;
        progress.on_progress(total, total);
        Ok(total)
    }
}

#[derive(Clone)]
struct FakeProbe {
    up: Rc<Cell<bool>>,
}

impl ConnectivityProbe for FakeProbe {
    async fn is_network_reachable(&self, _server: &Url) -> bool {
        self.up.get()
    }
}

struct Harness {
    orchestrator: SyncOrchestrator<FakeRemote, FakeProbe>,
    remote: FakeRemote,
    network: Rc<Cell<bool>>,
    dir: TempDir,
}

impl Harness {
    fn new() -> Self {
        let dir = tempdir().unwrap();
        let remote = FakeRemote::default();
        remote.list(ROOT, Reply::body(ROOT_BODY));
        remote.list(DOCS, Reply::body(DOCS_BODY));
        let network = Rc::new(Cell::new(true));
        let orchestrator = Self::build(dir.path(), &remote, &network);
        Self {
            orchestrator,
            remote,
            network,
            dir,
        }
    }

    fn build(
        root: &Path,
        remote: &FakeRemote,
        network: &Rc<Cell<bool>>,
    ) -> SyncOrchestrator<FakeRemote, FakeProbe> {
        SyncOrchestrator::new(
            remote.clone(),
            FakeProbe {
                up: network.clone(),
            },
            CacheStore::new(PathMapper::new(root.join("cache"))),
            SessionStore::new(root.join("cfg/session.json"), SecretBackend::File),
        )
    }

    /// A second orchestrator over the same cache and session file, as after a restart.
    fn restart(&self) -> SyncOrchestrator<FakeRemote, FakeProbe> {
        Self::build(self.dir.path(), &self.remote, &self.network)
    }

    fn cache_path(&self, relative: &str) -> PathBuf {
        self.dir.path().join("cache").join(relative)
    }

    fn stored(&self) -> Option<Session> {
        SessionStore::new(self.dir.path().join("cfg/session.json"), SecretBackend::File)
            .load()
            .unwrap()
    }

    async fn logged_in(mut self) -> Self {
        self.orchestrator
            .login("https://cloud.example", "alice", "pw")
            .await
            .unwrap();
        self
    }
}

fn titles(entries: &[Entry]) -> Vec<&str> {
    entries.iter().map(|entry| entry.title.as_str()).collect()
}

#[tokio::test]
async fn login_lists_account_root_and_persists_session() {
    let mut h = Harness::new();

    let entries = h
        .orchestrator
        .login("https://cloud.example/", "alice", "pw")
        .await
        .unwrap()
        .to_vec();

    assert_eq!(h.orchestrator.mode(), Mode::Online);
    assert_eq!(titles(&entries), ["Docs", "readme.md"]);
    assert!(entries.iter().all(|entry| !entry.is_parent_link()));
    assert_eq!(h.orchestrator.current_path(), Some(ROOT));
    assert!(h.cache_path("alice/.snapshot").is_file());

    let stored = h.stored().unwrap();
    assert_eq!(stored.account_url, "https://cloud.example");
    assert_eq!(stored.password, "pw");
    assert_eq!(stored.start_folder, ROOT);
    assert!(!stored.work_offline);
}

#[tokio::test]
async fn rejected_login_stays_logged_out() {
    let mut h = Harness::new();
    h.remote.list(ROOT, Reply::Status(401));

    let err = h
        .orchestrator
        .login("https://cloud.example", "alice", "wrong")
        .await
        .unwrap_err();

    assert_eq!(err.category(), ErrorCategory::Credentials);
    assert_eq!(h.orchestrator.mode(), Mode::LoggedOut);
    assert!(h.orchestrator.session().is_none());
    assert!(h.stored().is_none());
}

#[tokio::test]
async fn login_never_falls_back_to_offline() {
    let mut h = Harness::new();
    h.network.set(false);

    let err = h
        .orchestrator
        .login("https://cloud.example", "alice", "pw")
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::NoConnectivity));
    assert_eq!(h.remote.calls(), 0);
    assert_eq!(h.orchestrator.mode(), Mode::LoggedOut);

    h.network.set(true);
    h.remote.list(ROOT, Reply::Unreachable);
    let err = h
        .orchestrator
        .login("https://cloud.example", "alice", "pw")
        .await
        .unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Connectivity);
    assert_eq!(h.orchestrator.mode(), Mode::LoggedOut);
}

#[test]
fn pasted_webdav_url_is_split_into_server_and_user_id() {
    assert_eq!(
        split_account_url(
            "https://cloud.example/remote.php/dav/files/a1b2/Docs/",
            "alice"
        ),
        ("https://cloud.example".to_string(), "a1b2".to_string())
    );
    assert_eq!(
        split_account_url("https://cloud.example/nc/remote.php/dav/files/", "alice"),
        ("https://cloud.example/nc".to_string(), "alice".to_string())
    );
    assert_eq!(
        split_account_url(" https://cloud.example/ ", "alice"),
        ("https://cloud.example".to_string(), "alice".to_string())
    );
}

#[tokio::test]
async fn login_with_pasted_url_uses_embedded_user_id() {
    let mut h = Harness::new();
    h.remote.list(
        "/remote.php/dav/files/a1b2/",
        Reply::body("<d:response><d:href>/remote.php/dav/files/a1b2/</d:href></d:response>"),
    );

    h.orchestrator
        .login(
            "https://cloud.example/remote.php/dav/files/a1b2/",
            "alice",
            "pw",
        )
        .await
        .unwrap();

    let session = h.orchestrator.session().unwrap();
    assert_eq!(session.user_id, "a1b2");
    assert_eq!(session.account_url, "https://cloud.example");
    assert!(h.cache_path("a1b2/.snapshot").is_file());
}

#[tokio::test]
async fn subfolder_listing_starts_with_parent_link() {
    let mut h = Harness::new().logged_in().await;

    let entries = h.orchestrator.resolve_listing(DOCS).await.unwrap().to_vec();

    assert_eq!(entries.len(), 2);
    assert!(entries[0].is_parent_link());
    assert_eq!(entries[0].remote_path, ROOT);
    assert_eq!(entries[1].title, "notes.txt");
    assert_eq!(entries[1].size.as_ref().unwrap().label, "2.0 KB");
    assert_eq!(entries[1].state, EntryState::Cloud);
    assert_eq!(h.stored().unwrap().start_folder, DOCS);
    assert!(h.cache_path("alice/Docs/.snapshot").is_file());
}

#[tokio::test]
async fn listing_includes_local_only_files() {
    let mut h = Harness::new().logged_in().await;
    std::fs::create_dir_all(h.cache_path("alice/Docs")).unwrap();
    std::fs::write(h.cache_path("alice/Docs/notes.txt"), b"local").unwrap();
    std::fs::write(h.cache_path("alice/Docs/draft.txt"), b"draft").unwrap();

    let entries = h.orchestrator.resolve_listing(DOCS).await.unwrap().to_vec();

    assert_eq!(titles(&entries), ["..", "notes.txt", "draft.txt"]);
    assert_eq!(entries[1].state, EntryState::Synced);
    assert_eq!(entries[2].state, EntryState::LocalOnly);
    assert_eq!(entries[2].remote_path, format!("{DOCS}draft.txt"));
}

#[tokio::test]
async fn unreachable_server_switches_to_cached_listing() {
    let mut h = Harness::new().logged_in().await;
    let online = h.orchestrator.resolve_listing(DOCS).await.unwrap().to_vec();

    h.remote.list(DOCS, Reply::Unreachable);
    let offline = h.orchestrator.resolve_listing(DOCS).await.unwrap().to_vec();

    assert_eq!(h.orchestrator.mode(), Mode::Offline);
    assert_eq!(offline, online);
}

#[tokio::test]
async fn unexpected_status_switches_to_cached_listing() {
    let mut h = Harness::new().logged_in().await;
    h.orchestrator.resolve_listing(DOCS).await.unwrap();

    h.remote.list(ROOT, Reply::Status(503));
    let entries = h.orchestrator.resolve_listing(ROOT).await.unwrap().to_vec();

    assert_eq!(h.orchestrator.mode(), Mode::Offline);
    assert_eq!(titles(&entries), ["Docs", "readme.md"]);
}

#[tokio::test]
async fn failed_probe_switches_offline_without_remote_call() {
    let mut h = Harness::new().logged_in().await;
    let calls = h.remote.calls();
    h.network.set(false);

    h.orchestrator.resolve_listing(ROOT).await.unwrap();

    assert_eq!(h.orchestrator.mode(), Mode::Offline);
    assert_eq!(h.remote.calls(), calls);
}

#[tokio::test]
async fn offline_mode_is_sticky() {
    let mut h = Harness::new().logged_in().await;
    h.orchestrator.resolve_listing(DOCS).await.unwrap();
    h.remote.list(ROOT, Reply::Unreachable);
    h.orchestrator.resolve_listing(ROOT).await.unwrap();
    assert_eq!(h.orchestrator.mode(), Mode::Offline);

    // The server is back, but nothing asks for it until the user goes online.
    h.remote.list(ROOT, Reply::body(ROOT_BODY));
    let calls = h.remote.calls();
    h.orchestrator.resolve_listing(DOCS).await.unwrap();
    h.orchestrator.resolve_listing(ROOT).await.unwrap();

    assert_eq!(h.remote.calls(), calls);
    assert_eq!(h.orchestrator.mode(), Mode::Offline);
}

#[tokio::test]
async fn folder_never_listed_online_is_unavailable_offline() {
    let mut h = Harness::new().logged_in().await;
    h.orchestrator.go_offline().unwrap();
    let before = h.orchestrator.entries().to_vec();

    let missing = format!("{ROOT}Photos/");
    let err = h.orchestrator.resolve_listing(&missing).await.unwrap_err();

    assert!(matches!(err, SyncError::FolderUnavailableOffline(ref path) if *path == missing));
    assert!(!err.is_fatal());
    assert_eq!(h.orchestrator.entries(), before.as_slice());
    assert_eq!(h.orchestrator.current_path(), Some(ROOT));
    assert_eq!(h.orchestrator.mode(), Mode::Offline);
}

#[tokio::test]
async fn downgrade_to_folder_without_snapshot_keeps_listing() {
    let mut h = Harness::new().logged_in().await;
    let before = h.orchestrator.entries().to_vec();
    let unlisted = format!("{ROOT}Photos/");
    h.remote.list(&unlisted, Reply::Unreachable);

    let err = h.orchestrator.resolve_listing(&unlisted).await.unwrap_err();

    assert!(matches!(err, SyncError::FolderUnavailableOffline(ref path) if *path == unlisted));
    assert!(!err.is_fatal());
    assert_eq!(h.orchestrator.mode(), Mode::Offline);
    assert_eq!(h.orchestrator.entries(), before.as_slice());
    assert_eq!(h.orchestrator.current_path(), Some(ROOT));
    assert!(h.stored().is_some());
}

#[tokio::test]
async fn missing_root_snapshot_offline_ends_session() {
    let mut h = Harness::new().logged_in().await;
    std::fs::remove_file(h.cache_path("alice/.snapshot")).unwrap();
    h.orchestrator.go_offline().unwrap();

    let err = h.orchestrator.resolve_listing(ROOT).await.unwrap_err();

    assert!(matches!(err, SyncError::RootUnavailableOffline));
    assert!(err.is_fatal());
    assert_eq!(h.orchestrator.mode(), Mode::LoggedOut);
    assert!(h.orchestrator.entries().is_empty());
    assert!(h.stored().is_none());
}

#[tokio::test]
async fn rejected_credentials_keep_mode_and_entries() {
    let mut h = Harness::new().logged_in().await;
    h.remote.list(DOCS, Reply::Status(401));

    let err = h.orchestrator.resolve_listing(DOCS).await.unwrap_err();

    assert_eq!(err.category(), ErrorCategory::Credentials);
    assert_eq!(h.orchestrator.mode(), Mode::Online);
    assert_eq!(h.orchestrator.current_path(), Some(ROOT));
}

#[tokio::test]
async fn missing_remote_folder_is_reported_online() {
    let mut h = Harness::new().logged_in().await;

    let err = h
        .orchestrator
        .resolve_listing(&format!("{ROOT}Gone/"))
        .await
        .unwrap_err();

    assert_eq!(err.category(), ErrorCategory::NotFound);
    assert_eq!(h.orchestrator.mode(), Mode::Online);
}

#[tokio::test]
async fn unparseable_listing_keeps_previous_entries() {
    let mut h = Harness::new().logged_in().await;
    h.remote.list(DOCS, Reply::body("<html>maintenance</html>"));

    let err = h.orchestrator.resolve_listing(DOCS).await.unwrap_err();

    assert!(matches!(err, SyncError::Listing(ListingError::NoBlocks)));
    assert_eq!(titles(h.orchestrator.entries()), ["Docs", "readme.md"]);
    assert!(!h.cache_path("alice/Docs/.snapshot").exists());
}

#[tokio::test]
async fn download_marks_entry_synced_and_reports_progress() {
    let mut h = Harness::new().logged_in().await;
    h.orchestrator.resolve_listing(DOCS).await.unwrap();
    h.remote.serve(NOTES, Reply::body("hello notes"));

    let mut seen = Vec::new();
    let mut progress = |done: u64, total: u64| seen.push((done, total));
    let state = h
        .orchestrator
        .download_item(NOTES, &mut progress)
        .await
        .unwrap();

    assert_eq!(state, EntryState::Synced);
    assert_eq!(h.orchestrator.entry(NOTES).unwrap().state, EntryState::Synced);
    assert_eq!(
        std::fs::read_to_string(h.cache_path("alice/Docs/notes.txt")).unwrap(),
        "hello notes"
    );
    assert_eq!(seen.first(), Some(&(0, 11)));
    assert_eq!(seen.last(), Some(&(11, 11)));

    // Still synced when the folder is served from cache.
    h.orchestrator.go_offline().unwrap();
    h.orchestrator.resolve_listing(DOCS).await.unwrap();
    assert_eq!(h.orchestrator.entry(NOTES).unwrap().state, EntryState::Synced);
}

#[tokio::test]
async fn synced_entry_is_not_downloaded_again() {
    let mut h = Harness::new().logged_in().await;
    std::fs::create_dir_all(h.cache_path("alice/Docs")).unwrap();
    std::fs::write(h.cache_path("alice/Docs/notes.txt"), b"cached").unwrap();
    h.orchestrator.resolve_listing(DOCS).await.unwrap();
    let calls = h.remote.calls();

    let err = h
        .orchestrator
        .download_item(NOTES, &mut NoProgress)
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::AlreadySynced(_)));
    assert_eq!(h.remote.calls(), calls);
}

#[tokio::test]
async fn download_without_network_goes_offline() {
    let mut h = Harness::new().logged_in().await;
    h.orchestrator.resolve_listing(DOCS).await.unwrap();
    let calls = h.remote.calls();
    h.network.set(false);

    let err = h
        .orchestrator
        .download_item(NOTES, &mut NoProgress)
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::NoConnectivity));
    assert_eq!(h.orchestrator.mode(), Mode::Offline);
    assert_eq!(h.remote.calls(), calls);
    assert_eq!(h.orchestrator.entry(NOTES).unwrap().state, EntryState::Cloud);

    let err = h
        .orchestrator
        .download_item(NOTES, &mut NoProgress)
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::OfflineMode));
}

#[tokio::test]
async fn failed_download_leaves_entry_in_cloud() {
    let mut h = Harness::new().logged_in().await;
    h.orchestrator.resolve_listing(DOCS).await.unwrap();
    h.remote.serve(NOTES, Reply::Status(502));

    let err = h
        .orchestrator
        .download_item(NOTES, &mut NoProgress)
        .await
        .unwrap_err();

    assert_eq!(err.category(), ErrorCategory::UnexpectedServer);
    assert_eq!(h.orchestrator.mode(), Mode::Offline);
    assert_eq!(h.orchestrator.entry(NOTES).unwrap().state, EntryState::Cloud);
    assert!(!h.cache_path("alice/Docs/notes.txt").exists());
}

#[tokio::test]
async fn download_rejects_entries_that_are_not_remote_files() {
    let mut h = Harness::new().logged_in().await;
    std::fs::write(h.cache_path("alice/scratch.txt"), b"mine").unwrap();
    h.orchestrator.resolve_listing(ROOT).await.unwrap();
    let calls = h.remote.calls();

    let cases = [
        ("", "missing"),
        (DOCS, "folder"),
        ("/remote.php/dav/files/alice/scratch.txt", "local"),
        ("/remote.php/dav/files/alice/nope.txt", "unknown"),
    ];
    for (path, case) in cases {
        let err = h
            .orchestrator
            .download_item(path, &mut NoProgress)
            .await
            .unwrap_err();
        let expected = match case {
            "missing" => matches!(err, SyncError::MissingRemotePath),
            "folder" => matches!(err, SyncError::NotAFile(_)),
            "local" => matches!(err, SyncError::NotRemote(_)),
            _ => matches!(err, SyncError::UnknownEntry(_)),
        };
        assert!(expected, "{case}: {err:?}");
        assert_eq!(err.category(), ErrorCategory::Rejected);
    }
    assert_eq!(h.remote.calls(), calls);
}

#[tokio::test]
async fn switching_online_requires_network() {
    let mut h = Harness::new().logged_in().await;
    h.orchestrator.go_offline().unwrap();
    assert!(h.stored().unwrap().work_offline);

    h.network.set(false);
    assert!(matches!(
        h.orchestrator.request_online().await,
        Err(SyncError::NoConnectivity)
    ));
    assert_eq!(h.orchestrator.mode(), Mode::Offline);

    h.network.set(true);
    h.orchestrator.request_online().await.unwrap();
    assert_eq!(h.orchestrator.mode(), Mode::Online);
    assert!(!h.stored().unwrap().work_offline);
}

#[tokio::test]
async fn operations_require_login() {
    let mut h = Harness::new();

    assert!(matches!(
        h.orchestrator.resolve_listing(ROOT).await,
        Err(SyncError::NotLoggedIn)
    ));
    assert!(matches!(h.orchestrator.go_offline(), Err(SyncError::NotLoggedIn)));
    assert!(matches!(
        h.orchestrator.request_online().await,
        Err(SyncError::NotLoggedIn)
    ));
    assert_eq!(h.remote.calls(), 0);
}

#[tokio::test]
async fn removing_local_copy_returns_file_to_cloud() {
    let mut h = Harness::new().logged_in().await;
    std::fs::create_dir_all(h.cache_path("alice/Docs")).unwrap();
    std::fs::write(h.cache_path("alice/Docs/notes.txt"), b"cached").unwrap();
    std::fs::write(h.cache_path("alice/Docs/draft.txt"), b"draft").unwrap();
    h.orchestrator.resolve_listing(DOCS).await.unwrap();

    h.orchestrator.remove_local_copy(NOTES).await.unwrap();
    assert_eq!(h.orchestrator.entry(NOTES).unwrap().state, EntryState::Cloud);
    assert!(!h.cache_path("alice/Docs/notes.txt").exists());

    let draft = format!("{DOCS}draft.txt");
    h.orchestrator.remove_local_copy(&draft).await.unwrap();
    assert!(h.orchestrator.entry(&draft).is_none());
    assert!(!h.cache_path("alice/Docs/draft.txt").exists());

    assert!(matches!(
        h.orchestrator.remove_local_copy(ROOT).await,
        Err(SyncError::NotAFile(_))
    ));
}

#[tokio::test]
async fn logout_keeps_or_purges_mirror() {
    let mut h = Harness::new().logged_in().await;
    h.orchestrator.logout(false).await.unwrap();

    assert_eq!(h.orchestrator.mode(), Mode::LoggedOut);
    assert!(h.stored().is_none());
    assert!(h.cache_path("alice/.snapshot").is_file());

    let mut h = h.logged_in().await;
    h.orchestrator.logout(true).await.unwrap();
    assert!(!h.cache_path("alice").exists());
    assert!(h.cache_path("").exists());
}

#[tokio::test]
async fn logout_purge_works_from_stored_session_alone() {
    let h = Harness::new().logged_in().await;
    let mut fresh = h.restart();

    fresh.logout(true).await.unwrap();

    assert!(!h.cache_path("alice").exists());
    assert!(h.stored().is_none());
}

#[tokio::test]
async fn logout_clears_malformed_session_file() {
    let h = Harness::new().logged_in().await;
    let session_file = h.dir.path().join("cfg/session.json");
    std::fs::write(&session_file, "{not json").unwrap();

    let mut fresh = h.restart();
    assert!(matches!(fresh.resume().await, Err(SyncError::Storage(_))));

    fresh.logout(true).await.unwrap();

    assert!(!session_file.exists());
    assert_eq!(fresh.mode(), Mode::LoggedOut);
    assert!(!fresh.resume().await.unwrap());
    // The account is unknown, so its mirror is left alone.
    assert!(h.cache_path("alice/.snapshot").is_file());
}

#[tokio::test]
async fn resume_reopens_last_folder() {
    let mut h = Harness::new().logged_in().await;
    h.orchestrator.resolve_listing(DOCS).await.unwrap();

    let mut resumed = h.restart();
    assert!(resumed.resume().await.unwrap());

    assert_eq!(resumed.mode(), Mode::Online);
    assert_eq!(resumed.current_path(), Some(DOCS));
    assert_eq!(resumed.entries(), h.orchestrator.entries());
}

#[tokio::test]
async fn resume_honours_work_offline_preference() {
    let mut h = Harness::new().logged_in().await;
    h.orchestrator.resolve_listing(DOCS).await.unwrap();
    h.orchestrator.go_offline().unwrap();
    let calls = h.remote.calls();

    let mut resumed = h.restart();
    assert!(resumed.resume().await.unwrap());

    assert_eq!(resumed.mode(), Mode::Offline);
    assert_eq!(resumed.current_path(), Some(DOCS));
    assert_eq!(h.remote.calls(), calls);
}

#[tokio::test]
async fn resume_falls_back_to_root_when_start_folder_is_gone() {
    let mut h = Harness::new().logged_in().await;
    h.orchestrator.resolve_listing(DOCS).await.unwrap();
    h.remote.list(DOCS, Reply::Status(404));

    let mut resumed = h.restart();
    assert!(resumed.resume().await.unwrap());

    assert_eq!(resumed.current_path(), Some(ROOT));
    assert_eq!(h.stored().unwrap().start_folder, ROOT);
}

#[tokio::test]
async fn resume_without_stored_session_does_nothing() {
    let mut h = Harness::new();
    assert!(!h.orchestrator.resume().await.unwrap());
    assert_eq!(h.orchestrator.mode(), Mode::LoggedOut);
    assert_eq!(h.remote.calls(), 0);
}
