//! Entry point: loads configuration, wires up the role-specific services,
//! and serves HTTP until a shutdown signal drains in-flight requests.

use anyhow::{Context, Result};
use minicdn::config::{Config, Role};
use minicdn::control::master::MasterControl;
use minicdn::control::slave;
use minicdn::core::cache::ContentCache;
use minicdn::core::lifecycle::Lifecycle;
use minicdn::core::log_sink::LogSink;
use minicdn::core::origin::OriginFetcher;
use minicdn::core::peers::PeerPool;
use minicdn::server::{AppContext, RoleContext, router};
use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal::unix::{SignalKind, signal};
use tracing::{error, info};
use url::Url;

#[tokio::main]
async fn main() -> Result<()> {
    let exit_code = run_app().await?;
    std::process::exit(exit_code);
}

async fn run_app() -> Result<i32> {
    let args: Vec<String> = env::args().collect();

    let config_path = args
        .iter()
        .position(|arg| arg == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str())
        .unwrap_or("config.toml");

    let mut config = match Config::from_file(config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration from \"{config_path}\": {e}");
            return Ok(1);
        }
    };

    if let Some(port_index) = args.iter().position(|arg| arg == "--port") {
        let Some(port_str) = args.get(port_index + 1) else {
            eprintln!("--port flag requires a value");
            return Ok(1);
        };
        let Ok(port) = port_str.parse::<u16>() else {
            eprintln!("Invalid port number: {port_str}");
            return Ok(1);
        };
        let host = config
            .listen_addr
            .rsplit_once(':')
            .map(|(host, _)| host)
            .unwrap_or("0.0.0.0");
        config.listen_addr = format!("{host}:{port}");
    }

    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| config.log_level.clone());
    tracing_subscriber::fmt().with_env_filter(log_level).compact().with_ansi(true).init();

    match serve(config).await {
        Ok(code) => Ok(code),
        Err(e) => {
            error!("fatal error: {e}");
            Ok(1)
        }
    }
}

async fn serve(config: Config) -> Result<i32> {
    let lifecycle = Arc::new(Lifecycle::new());
    let log_sink = Arc::new(LogSink::open(config.logfile.as_deref()).context("opening access log sink")?);
    let listen_addr: SocketAddr = config.listen_addr.parse().context("parsing listen_addr")?;

    let role = match config.role {
        Role::Master => {
            let mirror = config.mirror.clone().expect("validated at config load");
            let self_name = format!("http://{}:{}", listen_addr.ip(), listen_addr.port());
            let peers = Arc::new(PeerPool::new(self_name));
            let fetcher = Arc::new(OriginFetcher::new(
                Url::parse(&mirror).context("parsing mirror URL")?,
                PathBuf::from(&config.cachedir),
            ));
            let cache = Arc::new(ContentCache::new(fetcher));
            let control = Arc::new(MasterControl::new(peers.clone(), mirror, log_sink.clone()));
            info!(listen_addr = %config.listen_addr, mirror = %control.mirror, "starting master");
            (peers, cache, RoleContext::Master { control })
        }
        Role::Slave => {
            let peers = Arc::new(PeerPool::new(format!(
                "http://{}:{}",
                listen_addr.ip(),
                listen_addr.port()
            )));
            let (registration, log_sender) =
                slave::connect(&config.master_addr.clone().expect("validated at config load"), &config.token, listen_addr.port(), peers.clone())
                    .await
                    .context("registering with master")?;
            let fetcher = Arc::new(OriginFetcher::new(
                Url::parse(&registration.mirror).context("parsing mirror URL from login reply")?,
                PathBuf::from(&config.cachedir),
            ));
            let cache = Arc::new(ContentCache::new(fetcher));
            info!(listen_addr = %config.listen_addr, master_addr = %config.master_addr.as_deref().unwrap_or(""), self_name = %registration.self_name, "starting slave");
            (peers, cache, RoleContext::Slave { log_sender })
        }
    };

    let (peers, cache, role_ctx) = role;
    let ctx = Arc::new(AppContext {
        peers,
        cache,
        lifecycle: lifecycle.clone(),
        log_sink,
        role: role_ctx,
    });

    let app = router(ctx).into_make_service_with_connect_info::<SocketAddr>();
    let listener = tokio::net::TcpListener::bind(listen_addr).await.context("binding listen_addr")?;

    let server = tokio::spawn(async move { axum::serve(listener, app).await });

    let exit_code = wait_for_shutdown(lifecycle).await;
    server.abort();
    Ok(exit_code)
}

/// Blocks until SIGINT/SIGTERM, then drains in-flight requests (warm close).
/// A second signal while draining triggers an immediate cold close.
async fn wait_for_shutdown(lifecycle: Arc<Lifecycle>) -> i32 {
    let Ok(mut sigint) = signal(SignalKind::interrupt()) else {
        bail_signal()
    };
    let Ok(mut sigterm) = signal(SignalKind::terminate()) else {
        bail_signal()
    };

    tokio::select! {
        _ = sigint.recv() => {},
        _ = sigterm.recv() => {},
    }
    info!("shutdown signal received, draining in-flight requests");

    let warm_close = tokio::spawn({
        let lifecycle = lifecycle.clone();
        async move {
            lifecycle.close().await;
        }
    });

    tokio::select! {
        _ = warm_close => {
            info!("drained cleanly, exiting");
            0
        }
        _ = sigint.recv() => {
            error!("second signal received while draining, cold close");
            1
        }
        _ = sigterm.recv() => {
            error!("second signal received while draining, cold close");
            1
        }
    }
}

fn bail_signal() -> ! {
    eprintln!("failed to install signal handler");
    std::process::exit(1);
}
