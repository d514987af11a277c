//! Bootstrap: wire the store, projects, executor, supervisor, notifier,
//! OAuth server, and HTTP router together, then serve until shutdown.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::http::header;
use axum::middleware::from_fn_with_state;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use chrono::Utc;
use tracing::{info, warn};

use herald_auth::{OAuthServer, SqliteAuthStore};
use herald_executor::ClaudeExecutor;
use herald_notify::{Event, Hub, McpNotifier, Notifier};
use herald_store::{SqliteStore, Store, TaskEventRecord};
use herald_task::{Manager, ManagerConfig, NotifyFn};
use herald_types::{Config, HeraldError};

use crate::middleware::{
    bearer_auth, client_rate_limit, ip_rate_limit, security_headers, BearerState, RateLimitState,
    RateLimiter,
};
use crate::project::ProjectManager;
use crate::rpc::{get_mcp, post_mcp, McpServer, SessionRegistry};
use crate::tools::{self, Deps};
use crate::tunnel::NgrokTunnel;

/// Everything assembled at startup. Exposed for integration tests.
pub struct ServerDeps {
    pub store: Arc<dyn Store>,
    pub manager: Arc<Manager>,
    pub projects: Arc<ProjectManager>,
    pub oauth: Arc<OAuthServer>,
    pub mcp: Arc<McpServer>,
    pub public_url: String,
}

/// Run the Herald server until SIGTERM/SIGINT.
pub async fn run(mut cfg: Config, version: &str) -> Result<(), HeraldError> {
    let addr = format!("{}:{}", cfg.server.host, cfg.server.port);

    // Tunnel first: its public URL becomes the OAuth issuer.
    let mut tunnel = None;
    if cfg.tunnel.enabled {
        if cfg.tunnel.provider == "ngrok" {
            match NgrokTunnel::start(&addr, &cfg.tunnel.auth_token, &cfg.tunnel.domain).await {
                Ok(t) => {
                    cfg.server.public_url = t.public_url().to_string();
                    tunnel = Some(t);
                }
                Err(e) => {
                    warn!(error = %e, "failed to start tunnel, continuing with local server only");
                }
            }
        } else {
            warn!(provider = %cfg.tunnel.provider, "unknown tunnel provider, ignoring");
        }
    }

    let deps = build(&cfg, version)?;
    print_banner(&cfg, version, &deps);

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(deps.oauth.clone().run_cleanup_loop(shutdown_rx.clone()));

    let router = build_router(&cfg, &deps);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| HeraldError::Server(format!("binding {addr}: {e}")))?;
    info!(addr = %addr, "herald is ready");

    // Signals close the tunnel first, then trigger graceful shutdown.
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("shutting down");
        if let Some(tunnel) = tunnel {
            tunnel.close().await;
        }
        let _ = shutdown_tx.send(true);
    });

    let mut shutdown = shutdown_rx;
    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        let _ = shutdown.wait_for(|&stop| stop).await;
    })
    .await
    .map_err(|e| HeraldError::Server(format!("http server: {e}")))
}

/// Assemble the component graph (no network side effects).
pub fn build(cfg: &Config, version: &str) -> Result<ServerDeps, HeraldError> {
    let db_path = PathBuf::from(&cfg.database.path);
    let store: Arc<dyn Store> =
        Arc::new(SqliteStore::open(&db_path, cfg.database.retention_days)?);
    info!(path = %db_path.display(), "database opened");

    let projects = Arc::new(ProjectManager::from_config(&cfg.projects));
    projects.validate()?;

    let executor = Arc::new(ClaudeExecutor {
        claude_path: cfg.execution.claude_path.clone(),
        work_dir: PathBuf::from(&cfg.execution.work_dir),
        env: cfg.execution.env.clone(),
    });

    let manager = Arc::new(Manager::new(
        executor,
        ManagerConfig {
            max_concurrent: cfg.execution.max_concurrent,
            max_task_duration: Duration::from_secs(cfg.execution.max_timeout_minutes * 60),
            max_output_size: cfg.execution.max_output_size,
        },
    ));

    let sessions = Arc::new(SessionRegistry::new());
    let notifier = Arc::new(McpNotifier::new(sessions.clone(), Duration::from_secs(3)));
    let hub = Arc::new(Hub::new(vec![notifier as Arc<dyn Notifier>]));

    // Every supervisor event is persisted for get_logs and pushed to the
    // originating session; lifecycle transitions also refresh the durable
    // task record.
    let event_store = store.clone();
    let event_hub = hub.clone();
    let event_manager = manager.clone();
    let notify: NotifyFn = Arc::new(move |event| {
        if let Err(e) = event_store.add_event(&TaskEventRecord {
            id: 0,
            task_id: event.task_id.clone(),
            event_type: event.event_type.clone(),
            message: event.message.clone(),
            created_at: Utc::now(),
        }) {
            warn!(task_id = %event.task_id, error = %e, "failed to persist task event");
        }

        if event.event_type != "task.progress" {
            if let Ok(task) = event_manager.get(&event.task_id) {
                let record = crate::tools::record_from_snapshot(&task.snapshot());
                if let Err(e) = event_store.update_task(&record) {
                    warn!(task_id = %event.task_id, error = %e, "failed to update task record");
                }
            }
        }

        event_hub.notify(&Event {
            event_type: event.event_type,
            task_id: event.task_id,
            project: event.project,
            message: event.message,
            mcp_session_id: event.mcp_session_id,
        });
    });
    manager.set_notify_fn(notify);

    let public_url = if cfg.server.public_url.is_empty() {
        format!("http://{}:{}", cfg.server.host, cfg.server.port)
    } else {
        cfg.server.public_url.clone()
    };

    let oauth = Arc::new(OAuthServer::new(
        &cfg.auth,
        &public_url,
        Arc::new(SqliteAuthStore::new(store.clone())),
    ));

    let tool_deps = Arc::new(Deps {
        manager: manager.clone(),
        projects: projects.clone(),
        store: store.clone(),
        execution: cfg.execution.clone(),
    });
    let mcp = Arc::new(McpServer::new(tools::registry(tool_deps), sessions, version));

    Ok(ServerDeps {
        store,
        manager,
        projects,
        oauth,
        mcp,
        public_url,
    })
}

/// Assemble the HTTP router with auth and rate-limit middleware.
pub fn build_router(cfg: &Config, deps: &ServerDeps) -> Router {
    let ip_limiter = RateLimitState {
        limiter: Arc::new(RateLimiter::new(10 * 60, 5)),
    };
    let client_limiter = RateLimitState {
        limiter: Arc::new(RateLimiter::new(
            cfg.rate_limit.requests_per_minute,
            cfg.rate_limit.burst,
        )),
    };
    let bearer_state = BearerState {
        oauth: deps.oauth.clone(),
        resource_metadata_url: format!("{}/.well-known/oauth-protected-resource", deps.public_url),
    };

    let oauth_router = herald_auth::oauth_routes(deps.oauth.clone())
        .layer(from_fn_with_state(ip_limiter, ip_rate_limit));

    let mcp_router = Router::new()
        .route("/mcp", axum::routing::post(post_mcp).get(get_mcp))
        .with_state(deps.mcp.clone())
        .layer(from_fn_with_state(bearer_state, bearer_auth))
        .layer(from_fn_with_state(client_limiter, client_rate_limit));

    Router::new()
        .merge(herald_auth::protected_resource_routes(deps.oauth.clone()))
        .merge(oauth_router)
        .merge(mcp_router)
        .route("/health", get(health))
        .route("/favicon.ico", get(favicon))
        .route("/favicon.svg", get(favicon))
        .layer(axum::middleware::from_fn(security_headers))
}

async fn health() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "application/json")],
        r#"{"status":"ok"}"#,
    )
}

/// Herald favicon -- yellow-green tilted rounded square with a dark "H".
const FAVICON_SVG: &str = r##"<svg xmlns="http://www.w3.org/2000/svg" viewBox="0 0 512 512">
<g transform="rotate(-3 256 256)">
<rect x="18" y="18" width="476" height="476" rx="95" fill="#c8ff00"/>
<g fill="#0a0a0f">
  <rect x="142" y="120" width="56" height="272" rx="8"/>
  <rect x="314" y="120" width="56" height="272" rx="8"/>
  <path d="M190 232 L322 220 L322 272 L190 284 Z"/>
</g>
</g>
</svg>"##;

async fn favicon() -> impl IntoResponse {
    (
        [
            (header::CONTENT_TYPE, "image/svg+xml"),
            (header::CACHE_CONTROL, "public, max-age=86400"),
        ],
        FAVICON_SVG,
    )
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(_) => {
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

/// Startup summary with the OAuth credentials the Custom Connector needs.
fn print_banner(cfg: &Config, version: &str, deps: &ServerDeps) {
    eprintln!();
    eprintln!("  Herald {version}");
    eprintln!();
    eprintln!("  Server:          {}:{}", cfg.server.host, cfg.server.port);
    if !cfg.server.public_url.is_empty() {
        eprintln!("  Public URL:      {}", cfg.server.public_url);
    }
    eprintln!("  Database:        {}", cfg.database.path);
    eprintln!("  Max concurrent:  {}", cfg.execution.max_concurrent);

    let names: Vec<&str> = deps.projects.list().iter().map(|p| p.name.as_str()).collect();
    if names.is_empty() {
        eprintln!("  Projects:        (none)");
    } else {
        eprintln!("  Projects:        {}", names.join(", "));
    }

    eprintln!();
    eprintln!("  Custom Connector (OAuth 2.1):");
    eprintln!("    Client ID:     {}", cfg.auth.client_id);
    eprintln!("    Client Secret: {}", cfg.auth.client_secret);
    if cfg.auth.redirect_uris.is_empty() {
        eprintln!("    Redirect URIs: (none -- auth will fail! configure auth.redirect_uris)");
    } else {
        for (i, uri) in cfg.auth.redirect_uris.iter().enumerate() {
            if i == 0 {
                eprintln!("    Redirect URIs: {uri}");
            } else {
                eprintln!("                   {uri}");
            }
        }
    }
    eprintln!();
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_config(dir: &TempDir) -> Config {
        let mut cfg = Config::default();
        cfg.database.path = dir
            .path()
            .join("herald.db")
            .to_string_lossy()
            .into_owned();
        cfg.execution.work_dir = dir.path().join("work").to_string_lossy().into_owned();
        cfg.execution.claude_path = "/nonexistent/claude-test-binary".into();
        cfg.auth.client_secret = "test-secret".into();
        cfg.auth.redirect_uris = vec!["https://callback.test/cb".into()];
        cfg
    }

    #[tokio::test]
    async fn build_wires_the_component_graph() {
        let dir = TempDir::new().unwrap();
        let cfg = test_config(&dir);

        let deps = build(&cfg, "0.0-test").unwrap();
        assert_eq!(deps.public_url, "http://127.0.0.1:8420");
        assert_eq!(deps.manager.running_count(), 0);

        // The router assembles without panicking.
        let _router = build_router(&cfg, &deps);
    }

    #[tokio::test]
    async fn events_are_persisted_through_the_notify_wiring() {
        let dir = TempDir::new().unwrap();
        let cfg = test_config(&dir);
        let deps = build(&cfg, "0.0-test").unwrap();

        let task = deps.manager.create(herald_task::TaskSpec {
            project: "api".into(),
            prompt: "p".into(),
            timeout_minutes: 30,
            ..Default::default()
        });
        // Admission succeeds; the worker fails fast on the missing
        // claude binary, emitting events through the callback.
        deps.manager.start(&task, Default::default()).unwrap();
        let mut done = task.done();
        let _ = tokio::time::timeout(
            Duration::from_secs(5),
            done.wait_for(|&done| done),
        )
        .await;

        let events = deps.store.list_events(&task.id, 0).unwrap();
        assert!(
            events.iter().any(|e| e.event_type == "task.started"),
            "expected a persisted task.started event, got {events:?}"
        );
    }
}
