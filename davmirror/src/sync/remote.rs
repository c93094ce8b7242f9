//! Seams between the orchestrator and the outside world. The orchestrator is
//! generic over these so every mode transition can be driven by fakes.

use std::path::Path;
use std::time::Duration;

use davmirror_core::{Credentials, DavClient, DavError, ProgressSink};
use tokio::net::TcpStream;
use tracing::debug;
use url::Url;

#[allow(async_fn_in_trait)]
pub trait RemoteStore {
    async fn list_directory(&self, credentials: &Credentials, path: &str)
    -> Result<String, DavError>;

    async fn download(
        &self,
        credentials: &Credentials,
        path: &str,
        target: &Path,
        progress: &mut dyn ProgressSink,
    ) -> Result<u64, DavError>;
}

impl RemoteStore for DavClient {
    async fn list_directory(
        &self,
        credentials: &Credentials,
        path: &str,
    ) -> Result<String, DavError> {
        DavClient::list_directory(self, credentials, path).await
    }

    async fn download(
        &self,
        credentials: &Credentials,
        path: &str,
        target: &Path,
        progress: &mut dyn ProgressSink,
    ) -> Result<u64, DavError> {
        self.download_to_path(credentials, path, target, progress)
            .await
    }
}

#[allow(async_fn_in_trait)]
pub trait ConnectivityProbe {
    async fn is_network_reachable(&self, server: &Url) -> bool;
}

/// Treats the network as reachable when a TCP connection to the server's
/// host and port opens within the timeout.
#[derive(Debug, Clone, Copy)]
pub struct TcpProbe {
    timeout: Duration,
}

impl TcpProbe {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl ConnectivityProbe for TcpProbe {
    async fn is_network_reachable(&self, server: &Url) -> bool {
        let (Some(host), Some(port)) = (server.host_str(), server.port_or_known_default()) else {
            return false;
        };
        let reachable = matches!(
            tokio::time::timeout(self.timeout, TcpStream::connect((host, port))).await,
            Ok(Ok(_))
        );
        debug!(host, port, reachable, "connectivity probe");
        reachable
    }
}
