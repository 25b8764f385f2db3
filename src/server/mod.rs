use crate::cache::{self, CacheStore};
use crate::config::Config;
use crate::coordinator::{Coordinator, CoordinatorSettings};
use crate::locks::{self, LockRegistry};
use crate::resolver::{CommandResolver, Resolver};
use crate::scheduler::PriorityScheduler;
use crate::streaming::{self, StreamProxy};
use anyhow::{Context, Result};
use axum::{
    http::{header, Method},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::task::JoinHandle;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

mod error;
pub mod routes;

pub use error::AppError;

/// Shared application context
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<Config>,
    pub coordinator: Arc<Coordinator>,
    pub scheduler: Arc<PriorityScheduler>,
    pub proxy: Arc<StreamProxy>,
}

impl AppContext {
    /// Wire the cache, lock registry, coordinator, scheduler and proxy around `resolver`.
    pub fn new(config: Config, resolver: Arc<dyn Resolver>) -> Result<Self> {
        let cache = Arc::new(CacheStore::new(&config.cache));
        let locks = LockRegistry::from_config(&config.locks);
        let coordinator = Arc::new(Coordinator::new(
            resolver,
            cache,
            locks,
            CoordinatorSettings::from_config(&config),
        ));
        let proxy = StreamProxy::new(Arc::clone(&coordinator), &config.proxy)
            .context("Failed to create stream proxy")?;
        let scheduler = PriorityScheduler::from_config(&config.scheduler);

        Ok(Self {
            config: Arc::new(config),
            coordinator,
            scheduler: Arc::new(scheduler),
            proxy: Arc::new(proxy),
        })
    }

    /// Start the scheduler workers and the cache and lock sweepers.
    pub fn start_background_tasks(&self) -> Vec<JoinHandle<()>> {
        self.scheduler.start();

        vec![
            cache::start_sweep_task(
                Arc::clone(self.coordinator.cache()),
                Duration::from_secs(self.config.cache.sweep_interval_secs.max(1)),
            ),
            locks::start_sweep_task(
                self.coordinator.locks().clone(),
                Duration::from_secs(self.config.locks.sweep_interval_secs.max(1)),
            ),
        ]
    }
}

/// Create the Axum router with all routes
pub fn create_router(ctx: AppContext) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::HEAD, Method::OPTIONS])
        .allow_headers([header::RANGE, header::CONTENT_TYPE])
        .expose_headers([
            header::CONTENT_RANGE,
            header::CONTENT_LENGTH,
            header::ACCEPT_RANGES,
        ]);

    Router::new()
        .merge(routes::api_routes())
        .nest("/stream", streaming::stream_router())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}

/// Start the HTTP server backed by the configured extractor command
pub async fn start_server(config: Config) -> Result<()> {
    let resolver = Arc::new(CommandResolver::new(&config.resolver));
    start_server_with_resolver(config, resolver).await
}

/// Start the HTTP server with a caller-supplied resolver
pub async fn start_server_with_resolver(config: Config, resolver: Arc<dyn Resolver>) -> Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("Invalid server address")?;

    let ctx = AppContext::new(config, resolver)?;
    let sweepers = ctx.start_background_tasks();
    let scheduler = Arc::clone(&ctx.scheduler);

    let app = create_router(ctx);

    tracing::info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    scheduler.shutdown().await;
    for sweeper in sweepers {
        sweeper.abort();
    }

    tracing::info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => {}
            Err(e) => {
                tracing::error!("Failed to install Ctrl+C handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
