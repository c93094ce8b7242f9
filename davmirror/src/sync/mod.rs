pub mod cache;
pub mod orchestrator;
pub mod paths;
pub mod remote;

pub use cache::{CacheError, CacheStore};
pub use orchestrator::{ErrorCategory, Mode, SyncError, SyncOrchestrator};
pub use paths::PathMapper;
pub use remote::{ConnectivityProbe, RemoteStore, TcpProbe};
