//! HTTP surface (C7 plus the ambient `/_log` and `/metrics` routes): glue
//! between the peer pool, the content cache, and the client-facing response.

use crate::control::master::MasterControl;
use crate::control::slave::LogSender;
use crate::core::access_log::AccessRecord;
use crate::core::cache::ContentCache;
use crate::core::errors::CdnError;
use crate::core::lifecycle::Lifecycle;
use crate::core::log_sink::LogSink;
use crate::core::metrics;
use crate::core::peers::PeerPool;
use axum::body::Body;
use axum::Router;
use axum::extract::{ConnectInfo, FromRef, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode, Uri, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::io::ReaderStream;
use tracing::warn;

/// Role-specific pieces the file handler needs. A slave carries a
/// [`LogSender`] for shipping access records upstream; a master does not
/// (its own access log is written directly by the control channel).
pub enum RoleContext {
    Master { control: Arc<MasterControl> },
    Slave { log_sender: LogSender },
}

impl RoleContext {
    fn is_master(&self) -> bool {
        matches!(self, RoleContext::Master { .. })
    }
}

/// Everything a request handler needs, threaded through as `axum` state.
pub struct AppContext {
    pub peers: Arc<PeerPool>,
    pub cache: Arc<ContentCache>,
    pub lifecycle: Arc<Lifecycle>,
    pub log_sink: Arc<LogSink>,
    pub role: RoleContext,
}

/// Newtype wrapper so `MasterControlState` (a local type) can carry the
/// orphan-rule-required local type for the `FromRef` impl below; `Arc` is
/// foreign and not fundamental, so `FromRef` cannot be implemented directly
/// for `Arc<MasterControl>`.
#[derive(Clone)]
pub struct MasterControlState(pub Arc<MasterControl>);

/// Lets the `/_ws` handler extract `State<MasterControlState>` directly from
/// the shared `Arc<AppContext>` state, without threading a second state type
/// through the router.
impl FromRef<Arc<AppContext>> for MasterControlState {
    fn from_ref(ctx: &Arc<AppContext>) -> Self {
        match &ctx.role {
            RoleContext::Master { control } => MasterControlState(control.clone()),
            RoleContext::Slave { .. } => unreachable!("/_ws is only routed on a master"),
        }
    }
}

pub fn router(ctx: Arc<AppContext>) -> Router {
    let mut router = Router::new()
        .route("/_log", get(log_route))
        .route("/metrics", get(metrics_route))
        .fallback(get(file_handler));

    if matches!(ctx.role, RoleContext::Master { .. }) {
        router = router.route("/_ws", get(crate::control::master::upgrade));
    }

    router.with_state(ctx)
}

async fn metrics_route() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], metrics::gather())
}

async fn log_route(State(ctx): State<Arc<AppContext>>) -> Response {
    match ctx.log_sink.file_path() {
        Some(path) => match tokio::fs::File::open(path).await {
            Ok(file) => {
                let stream = ReaderStream::new(file);
                Body::from_stream(stream).into_response()
            }
            Err(e) => {
                warn!("failed to open access log file: {e}");
                StatusCode::NOT_FOUND.into_response()
            }
        },
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn file_handler(
    State(ctx): State<Arc<AppContext>>,
    ConnectInfo(remote_addr): ConnectInfo<SocketAddr>,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    let _guard = ctx.lifecycle.enter();
    metrics::REQUESTS_TOTAL.inc();

    let key = uri.path().to_string();

    if ctx.role.is_master()
        && let Some(other) = ctx.peers.peek_peer()
    {
        let location = match uri.query() {
            Some(q) => format!("{}{}?{}", other.trim_end_matches('/'), key, q),
            None => format!("{}{}", other.trim_end_matches('/'), key),
        };
        return (
            StatusCode::FOUND,
            [(header::LOCATION, location)],
        )
            .into_response();
    }

    // Per the remote-owner-routing rule: only the consistent-hash owner for
    // `key` fetches from origin. Everyone else proxies through the owner's
    // HTTP surface instead of refetching, so the cluster fetches each key
    // from origin at most once.
    let fetch = match ctx.peers.owner(key.as_bytes()) {
        Some(owner) if owner != ctx.peers.self_name() => ctx.cache.get_via_peer(&key, &owner).await,
        _ => ctx.cache.get(&key).await,
    };
    let envelope = match fetch {
        Ok(envelope) => envelope,
        Err(e) => return reflect_fetch_error(e),
    };

    let mut response_headers = HeaderMap::new();
    for (name, value) in &envelope.headers {
        if let (Ok(name), Ok(value)) = (HeaderName::try_from(name.as_str()), HeaderValue::try_from(value.as_str())) {
            response_headers.append(name, value);
        }
    }
    if !response_headers.contains_key(header::LAST_MODIFIED) {
        let now = httpdate::fmt_http_date(std::time::SystemTime::now());
        if let Ok(value) = HeaderValue::try_from(now) {
            response_headers.insert(header::LAST_MODIFIED, value);
        }
    }

    let user_agent = headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();
    let raw_data = headers.get("x-minicdn-data").and_then(|v| v.to_str().ok());
    let raw_type = headers.get("x-minicdn-type").and_then(|v| v.to_str().ok());

    if let RoleContext::Slave { log_sender } = &ctx.role {
        let record = AccessRecord::new(remote_addr.to_string(), key.clone(), true, user_agent, raw_data, raw_type);
        log_sender.enqueue(record);
    }

    let body = match &envelope.body {
        crate::core::envelope::EnvelopeBody::Inline(bytes) => Body::from(bytes.clone()),
        crate::core::envelope::EnvelopeBody::File(path) => match tokio::fs::File::open(path).await {
            Ok(file) => Body::from_stream(ReaderStream::new(file)),
            Err(e) => {
                warn!("failed to open cached file {path}: {e}");
                return (StatusCode::INTERNAL_SERVER_ERROR, CdnError::OpenFailed(e.to_string()).to_string())
                    .into_response();
            }
        },
    };

    let mut response = Response::new(body);
    *response.headers_mut() = response_headers;
    response
}

fn reflect_fetch_error(err: CdnError) -> Response {
    if let Some((code, body)) = err.http_status() {
        let status = StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        return (status, body).into_response();
    }
    (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response()
}
