use crate::api::{self, ApiResult};
use crate::config;
use crate::cookies::SessionStore;
use crate::fetch::Fetcher;
use crate::limit::RateLimiter;
use crate::workers::WorkerPool;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::runtime::Handle;
use tokio::signal::unix::SignalKind;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Clone)]
pub struct AppState {
    pub sessions: Arc<SessionStore>,
    pub limiter: Arc<RateLimiter>,
    pub workers: Arc<WorkerPool>,
    pub fetcher: Arc<Fetcher>,
}

impl AppState {
    pub fn new() -> ApiResult<Self> {
        Ok(AppState {
            sessions: Arc::new(SessionStore::new()),
            limiter: Arc::new(RateLimiter::new(config::get().max_requests_per_min)),
            workers: Arc::new(WorkerPool::new()),
            fetcher: Arc::new(Fetcher::new()?),
        })
    }
}

/// Initializes logging using [`tracing_subscriber`].
pub fn enable_tracing() {
    let filter = match EnvFilter::try_new(&config::get().log_filter) {
        Ok(filter) => filter,
        Err(err) => {
            warn!("Log filter is invalid. Some or all directives may be ignored. Details:\n{err}");
            EnvFilter::new("info")
        }
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

pub async fn run(state: AppState) -> std::io::Result<()> {
    let shutdown_state = state.clone();
    let app = api::routes(state);

    let address = SocketAddr::new(config::get().host, config::get().port);
    let listener = TcpListener::bind(address).await?;
    info!("dataserver running on {} threads", Handle::current().metrics().num_workers());
    debug!("listening on {}", listener.local_addr()?);
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal(shutdown_state))
        .await
}

/// Waits for SIGINT/SIGTERM, then reports what dies with the process: the
/// in-memory session jars and rate-limit windows are not persisted, so the
/// drain log is the only trace of them.
async fn shutdown_signal(state: AppState) {
    let interrupt = async {
        tokio::signal::ctrl_c()
            .await
            .expect("SIGINT listener must be installable");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(SignalKind::terminate())
            .expect("SIGTERM listener must be installable")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = interrupt => {},
        () = terminate => {},
    }
    info!(
        "Stopping dataserver, discarding {} session cookie jars and rate windows for {} clients",
        state.sessions.session_count(),
        state.limiter.tracked_clients(),
    );
}
