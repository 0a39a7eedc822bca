use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::{
    Router, middleware,
    routing::{delete, get},
};
use gateproxy_auth::{
    DirectoryConfig, GraphQlKeyFetcher, KeyDirectory, TokenVerifier, VerifierConfig,
};
use gateproxy_cache::{KeywordClassifier, RequestClassifier, ResponseCache, create_store};
use tokio::task::JoinHandle;
use tower_http::{limit::RequestBodyLimitLayer, trace::TraceLayer};
use url::Url;

use crate::config::{AppConfig, AuthConfig};
use crate::cors::cors_layer;
use crate::middleware::{GATEWAY_PREFIX, http_metrics};
use crate::proxy::Upstream;
use crate::{handlers, pipeline};

/// Everything a request handler needs. Built once at startup.
pub struct GatewayState {
    pub verifier: TokenVerifier,
    pub upstream: Upstream,
    pub cache: Option<Arc<ResponseCache>>,
    pub classifier: Arc<dyn RequestClassifier>,
    pub auth: AuthConfig,
    pub body_limit: usize,
}

pub type AppState = Arc<GatewayState>;

pub fn build_app(state: AppState, cfg: &AppConfig) -> Router {
    let body_limit = cfg.server.body_limit_bytes;

    let mut gateway = Router::new()
        .route("/healthz", get(handlers::healthz))
        .route("/metrics", get(handlers::metrics_text))
        .route("/cache/stats", get(handlers::cache_stats));
    if cfg.cache.admin_clear {
        gateway = gateway.route("/cache", delete(handlers::cache_clear));
    }
    // Unknown gateway paths are never proxied
    let gateway = gateway.fallback(handlers::not_found);

    Router::new()
        .nest(GATEWAY_PREFIX, gateway)
        // Everything else is proxied
        .fallback(pipeline::proxy_handler)
        .with_state(state)
        // Middleware stack (order: metrics -> cors -> trace -> body limit)
        .layer(middleware::from_fn(http_metrics))
        .layer(cors_layer(&cfg.cors))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &axum::http::Request<_>| {
                    tracing::info_span!(
                        "http.request",
                        http.method = %req.method(),
                        http.target = %req.uri(),
                        http.status_code = tracing::field::Empty,
                    )
                })
                .on_response(
                    |res: &axum::http::Response<_>,
                     latency: Duration,
                     span: &tracing::Span| {
                        span.record(
                            "http.status_code",
                            tracing::field::display(res.status().as_u16()),
                        );
                        tracing::info!(
                            http.status = %res.status().as_u16(),
                            elapsed_ms = %latency.as_millis(),
                            "request handled"
                        );
                    },
                ),
        )
        .layer(RequestBodyLimitLayer::new(body_limit))
}

pub struct ServerBuilder {
    addr: SocketAddr,
    config: AppConfig,
    classifier: Arc<dyn RequestClassifier>,
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerBuilder {
    pub fn new() -> Self {
        let cfg = AppConfig::default();
        Self {
            addr: cfg.addr(),
            config: cfg,
            classifier: Arc::new(KeywordClassifier),
        }
    }

    pub fn with_config(mut self, cfg: AppConfig) -> Self {
        self.addr = cfg.addr();
        self.config = cfg;
        self
    }

    /// Replaces the keyword heuristic that decides which payloads are reads.
    pub fn with_classifier(mut self, classifier: Arc<dyn RequestClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    /// Connects to the key authority and the cache backend.
    ///
    /// Fails if the initial key set cannot be fetched; an unreachable Redis
    /// only degrades to the local cache.
    pub async fn build(self) -> anyhow::Result<GatewayServer> {
        let cfg = self.config;
        let upstream = Upstream::new(&cfg.upstream).context("invalid upstream configuration")?;

        let authority = Url::parse(&cfg.keys.authority_url).context("invalid keys.authority_url")?;
        let fetcher = GraphQlKeyFetcher::new(authority, cfg.keys.fetch_timeout)?;
        tracing::info!(authority = %fetcher.endpoint(), "Loading signing keys");
        let directory = KeyDirectory::connect(
            Arc::new(fetcher),
            DirectoryConfig::new()
                .with_fetch_timeout(cfg.keys.fetch_timeout)
                .with_min_poll_interval(cfg.keys.min_poll_interval),
        )
        .await
        .context("failed to load signing keys from the key authority")?;
        let poller = directory.spawn_background_polling(cfg.keys.poll_interval);

        let verifier = TokenVerifier::new(
            directory,
            VerifierConfig::default().with_clock_skew(cfg.auth.clock_skew),
        );

        let cache = if cfg.cache.enabled {
            let store =
                create_store(cfg.cache.backend, &cfg.redis, cfg.cache.sweep_interval).await;
            tracing::info!(
                backend = store.name(),
                namespace = %cfg.cache.namespace,
                ttl = ?cfg.cache.ttl,
                "Response cache enabled"
            );
            Some(Arc::new(ResponseCache::new(
                store,
                cfg.cache.namespace.clone(),
                cfg.cache.ttl,
            )))
        } else {
            tracing::info!("Response cache disabled");
            None
        };

        let state = Arc::new(GatewayState {
            verifier,
            upstream,
            cache,
            classifier: self.classifier,
            auth: cfg.auth.clone(),
            body_limit: cfg.server.body_limit_bytes,
        });
        let app = build_app(state.clone(), &cfg);

        Ok(GatewayServer {
            addr: self.addr,
            shutdown_grace: cfg.server.shutdown_grace,
            app,
            state,
            poller,
        })
    }
}

pub struct GatewayServer {
    addr: SocketAddr,
    shutdown_grace: Duration,
    app: Router,
    state: AppState,
    poller: JoinHandle<()>,
}

impl GatewayServer {
    pub fn router(&self) -> Router {
        self.app.clone()
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        tracing::info!("listening on {}", self.addr);

        let (signalled_tx, signalled_rx) = tokio::sync::oneshot::channel::<()>();
        let serve = axum::serve(
            listener,
            self.app
                .clone()
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            let _ = signalled_tx.send(());
        });

        let grace = self.shutdown_grace;
        let grace_elapsed = async move {
            match signalled_rx.await {
                Ok(()) => tokio::time::sleep(grace).await,
                Err(_) => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            result = serve.into_future() => result?,
            () = grace_elapsed => {
                tracing::warn!(grace = ?grace, "Shutdown grace period elapsed, dropping open connections");
            }
        }

        self.shutdown().await;
        Ok(())
    }

    /// Stops key polling and releases the cache backend.
    pub async fn shutdown(self) {
        self.poller.abort();
        if let Some(cache) = &self.state.cache {
            cache.close().await;
        }
        tracing::info!("gateway stopped");
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    tracing::info!("shutdown signal received");
}
