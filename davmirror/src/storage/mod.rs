mod session_store;

pub use session_store::{SecretBackend, Session, SessionStore, StorageError};
