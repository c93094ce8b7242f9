use anyhow::Context;
use clap::{Parser, Subcommand};
use davmirror::config::AppConfig;
use davmirror::storage::SessionStore;
use davmirror::sync::{
    CacheStore, ConnectivityProbe, Mode, PathMapper, SyncOrchestrator, TcpProbe,
};
use davmirror_core::{
    ACCOUNT_ROOT_MARKER, DavClient, Entry, EntryKind, EntryState, SERVER_PATH_MARKER,
    decode_segment, parent_path,
};
use tracing_subscriber::EnvFilter;
use url::Url;

type Orchestrator = SyncOrchestrator<DavClient, CliProbe>;

#[derive(Debug, Parser)]
#[command(name = "davmirror", version)]
#[command(about = "Browse a Nextcloud WebDAV tree and keep an offline mirror of it")]
struct Cli {
    /// Debug logging (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Do not contact the server; serve listings from the local mirror
    #[arg(long, global = true)]
    offline: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, PartialEq, Eq, Subcommand)]
enum Command {
    /// Log in and list the account root
    Login {
        /// Server URL, or a WebDAV URL containing /remote.php/dav/files/<user>/
        url: String,
        username: String,
    },
    /// List a folder (default: the last opened one)
    Ls { path: Option<String> },
    /// Download a file into the local mirror
    Get { path: String },
    /// Delete the local copy of a file or folder
    RmLocal { path: String },
    /// Leave offline mode
    Online,
    /// Stop contacting the server until `online`
    Offline,
    /// Forget the stored session
    Logout {
        /// Also delete the account's local mirror
        #[arg(long)]
        purge: bool,
    },
    /// Show the stored session
    Status,
}

/// `--offline` swaps in a probe that always reports the network as down.
enum CliProbe {
    Tcp(TcpProbe),
    Disabled,
}

impl ConnectivityProbe for CliProbe {
    async fn is_network_reachable(&self, server: &Url) -> bool {
        match self {
            CliProbe::Tcp(probe) => probe.is_network_reachable(server).await,
            CliProbe::Disabled => false,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = AppConfig::from_env()?;
    let sessions = SessionStore::new(config.session_path(), config.secret_backend);

    let client = DavClient::with_timeout(config.request_timeout)
        .context("failed to build HTTP client")?;
    let probe = if cli.offline {
        CliProbe::Disabled
    } else {
        CliProbe::Tcp(TcpProbe::new(config.probe_timeout))
    };
    let cache = CacheStore::new(PathMapper::new(&config.cache_root));
    let mut orchestrator = SyncOrchestrator::new(client, probe, cache, sessions);

    match cli.command {
        Command::Login { url, username } => {
            let password = read_password(&username)?;
            let entries = orchestrator
                .login(&url, &username, &password)
                .await
                .context("login failed")?;
            print_entries(entries);
        }
        Command::Ls { path } => {
            resume(&mut orchestrator).await?;
            if let Some(path) = path {
                let target = folder_path(&orchestrator, &path)?;
                orchestrator.resolve_listing(&target).await?;
            }
            print_listing(&orchestrator);
        }
        Command::Get { path } => {
            resume(&mut orchestrator).await?;
            let remote_path = locate(&mut orchestrator, &path).await?;
            let mut progress = |done: u64, total: u64| {
                if total > 0 {
                    eprint!("\r{:>3}%", done * 100 / total);
                }
            };
            orchestrator
                .download_item(&remote_path, &mut progress)
                .await?;
            eprintln!();
            if let Some(entry) = orchestrator.entry(&remote_path) {
                println!("{}", orchestrator.cache().local_path(entry).display());
            }
        }
        Command::RmLocal { path } => {
            resume(&mut orchestrator).await?;
            let remote_path = locate(&mut orchestrator, &path).await?;
            orchestrator.remove_local_copy(&remote_path).await?;
            println!("removed local copy of {}", decode_segment(&remote_path));
        }
        Command::Online => {
            resume(&mut orchestrator).await?;
            orchestrator.request_online().await?;
            println!("working online");
        }
        Command::Offline => {
            resume(&mut orchestrator).await?;
            orchestrator.go_offline()?;
            println!("working offline");
        }
        Command::Logout { purge } => {
            orchestrator.logout(purge).await?;
            println!("logged out");
        }
        Command::Status => {
            let sessions = SessionStore::new(config.session_path(), config.secret_backend);
            print_status(&config, &sessions)?;
        }
    }
    Ok(())
}

fn init_tracing(verbose: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if verbose { "debug" } else { "warn" }));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

async fn resume(orchestrator: &mut Orchestrator) -> anyhow::Result<()> {
    if !orchestrator.resume().await? {
        anyhow::bail!("not logged in; run `davmirror login <url> <username>` first");
    }
    Ok(())
}

fn read_password(username: &str) -> anyhow::Result<String> {
    password_from(std::env::var("DAVMIRROR_PASSWORD").ok(), || {
        rpassword::prompt_password(format!("password for {username}: "))
    })
}

/// `DAVMIRROR_PASSWORD` wins; otherwise the terminal is asked with echo off.
fn password_from<F>(env_value: Option<String>, prompt: F) -> anyhow::Result<String>
where
    F: FnOnce() -> std::io::Result<String>,
{
    match env_value {
        Some(password) => Ok(password),
        None => prompt().context("failed to read password"),
    }
}

/// Resolves user input to a remote path: full `/remote.php/...` paths are
/// used as given, anything else is relative to the account root.
fn remote_path_for(account_root: &str, input: &str) -> String {
    if input.starts_with(SERVER_PATH_MARKER) {
        return input.to_string();
    }
    let relative = input.trim_start_matches('/');
    let encoded: Vec<String> = relative
        .split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect();
    format!("{account_root}{}", encoded.join("/"))
}

fn account_root(orchestrator: &Orchestrator) -> anyhow::Result<String> {
    orchestrator
        .session()
        .map(|session| session.account_root())
        .context("not logged in")
}

fn folder_path(orchestrator: &Orchestrator, input: &str) -> anyhow::Result<String> {
    let mut path = remote_path_for(&account_root(orchestrator)?, input);
    if !path.ends_with('/') {
        path.push('/');
    }
    Ok(path)
}

/// Lists the parent folder of `input` and returns the listed entry's path.
async fn locate(orchestrator: &mut Orchestrator, input: &str) -> anyhow::Result<String> {
    let wanted = remote_path_for(&account_root(orchestrator)?, input);
    let parent = parent_path(&wanted)
        .filter(|parent| parent.len() > ACCOUNT_ROOT_MARKER.len())
        .with_context(|| format!("{input} is not inside the account"))?;
    let entries = orchestrator.resolve_listing(&parent).await?;

    let wanted = decode_segment(wanted.trim_end_matches('/'));
    entries
        .iter()
        .find(|entry| {
            !entry.is_parent_link()
                && decode_segment(entry.remote_path.trim_end_matches('/')) == wanted
        })
        .map(|entry| entry.remote_path.clone())
        .with_context(|| format!("{input} is not in the listing of {}", decode_segment(&parent)))
}

fn print_listing(orchestrator: &Orchestrator) {
    let mode = match orchestrator.mode() {
        Mode::Online => "online",
        Mode::Offline => "offline",
        Mode::LoggedOut => "logged out",
    };
    if let Some(path) = orchestrator.current_path() {
        println!("{} ({mode})", decode_segment(path));
    }
    print_entries(orchestrator.entries());
}

fn print_entries(entries: &[Entry]) {
    for entry in entries {
        println!("{}", format_entry(entry));
    }
}

fn format_entry(entry: &Entry) -> String {
    let marker = match (entry.kind, entry.state) {
        (EntryKind::Folder, _) => "dir",
        (_, EntryState::Cloud) => "cloud",
        (_, EntryState::Synced) => "local",
        (_, EntryState::LocalOnly) => "local-only",
    };
    let size = entry
        .size
        .as_ref()
        .map(|size| size.label.as_str())
        .unwrap_or("");
    let star = if entry.favorite { "*" } else { " " };
    let suffix = if entry.is_folder() && !entry.is_parent_link() {
        "/"
    } else {
        ""
    };
    format!("{marker:<10} {size:>9} {star} {}{suffix}", entry.title)
}

fn print_status(config: &AppConfig, sessions: &SessionStore) -> anyhow::Result<()> {
    match sessions.load().context("failed to read stored session")? {
        Some(session) => {
            println!("user:         {}", session.username);
            println!("server:       {}", session.account_url);
            println!("start folder: {}", decode_segment(&session.start_folder));
            println!(
                "mode:         {}",
                if session.work_offline {
                    "offline"
                } else {
                    "online"
                }
            );
        }
        None => println!("not logged in"),
    }
    println!("mirror:       {}", config.cache_root.display());
    Ok(())
}
