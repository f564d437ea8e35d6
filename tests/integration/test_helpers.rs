// tests/integration/test_helpers.rs

//! Test helpers: boot a real `minicdn` server, in front of a mocked origin,
//! on an ephemeral TCP port.

use minicdn::control::master::MasterControl;
use minicdn::core::cache::ContentCache;
use minicdn::core::lifecycle::Lifecycle;
use minicdn::core::log_sink::LogSink;
use minicdn::core::origin::OriginFetcher;
use minicdn::core::peers::PeerPool;
use minicdn::server::{AppContext, RoleContext, router};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use url::Url;

/// A running `minicdn` node plus the mocked origin it fetches from.
pub struct TestServer {
    pub addr: SocketAddr,
    pub peers: Arc<PeerPool>,
    pub mock_origin: mockito::ServerGuard,
}

impl TestServer {
    /// Spawns a master node with an empty roster (itself only).
    pub async fn spawn_master(cachedir: &Path) -> Self {
        Self::spawn(cachedir, RoleKind::Master, vec![]).await
    }

    /// Spawns a slave node whose roster already contains the given peers
    /// (in addition to itself), without going through a real control-channel
    /// login.
    pub async fn spawn_slave(cachedir: &Path, extra_peers: Vec<String>) -> Self {
        Self::spawn(cachedir, RoleKind::Slave, extra_peers).await
    }

    async fn spawn(cachedir: &Path, kind: RoleKind, extra_peers: Vec<String>) -> Self {
        let mock_origin = mockito::Server::new_async().await;
        let mirror = Url::parse(&mock_origin.url()).unwrap();
        let fetcher = Arc::new(OriginFetcher::new(mirror, cachedir.to_path_buf()));
        let cache = Arc::new(ContentCache::new(fetcher));
        let lifecycle = Arc::new(Lifecycle::new());
        let log_sink = Arc::new(LogSink::open(None).unwrap());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let peers = Arc::new(PeerPool::new(format!("http://{addr}")));
        if !extra_peers.is_empty() {
            let mut roster = vec![peers.self_name().to_string()];
            roster.extend(extra_peers);
            peers.set_peers(roster);
        }

        let role = match kind {
            RoleKind::Master => {
                let control = Arc::new(MasterControl::new(peers.clone(), mock_origin.url(), log_sink.clone()));
                RoleContext::Master { control }
            }
            RoleKind::Slave => {
                let (log_sender, _log_rx) = minicdn::control::slave::LogSender::channel(10);
                RoleContext::Slave { log_sender }
            }
        };

        let ctx = Arc::new(AppContext {
            peers: peers.clone(),
            cache,
            lifecycle,
            log_sink,
            role,
        });
        let app = router(ctx).into_make_service_with_connect_info::<SocketAddr>();
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Self { addr, peers, mock_origin }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }
}

enum RoleKind {
    Master,
    Slave,
}

/// An HTTP client that does not auto-follow redirects, so tests can assert
/// on a 302's status and `Location` header directly.
pub fn no_redirect_client() -> reqwest::Client {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .unwrap()
}
