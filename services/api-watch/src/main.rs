//! api-watch
//!
//! Keeps a session against the backend API and polls configured endpoints:
//! 1. `login <email>` exchanges email + `API_WATCH_PASSWORD` for a token pair
//! 2. `run` polls each `[[poll]]` target with adaptive backoff, refreshing
//!    the access token on 401 and backing off on 429/5xx
//! 3. `logout` revokes the refresh token and clears the stored session
//!
//! SIGUSR1 pauses polling, SIGUSR2 resumes it, SIGINT/SIGTERM shut down.

mod config;
mod metrics;
mod status;

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use api_client::{ApiClient, DispatchError};
use poller::{Poller, PollerHandle};
use session_auth::{FileSessionStore, ME_PATH, RefreshCoordinator, RefreshState};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use transport::{ReqwestTransport, Transport};

use crate::config::{Config, PollTarget};
use crate::status::StatusState;

/// How long the status server gets to finish in-flight scrapes on shutdown
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

const USAGE: &str = "usage: api-watch [--config PATH] [run | login <email> | logout]";

#[derive(Debug, PartialEq)]
enum Command {
    Run,
    Login { email: String },
    Logout,
}

#[derive(Debug, PartialEq)]
struct Cli {
    config: Option<String>,
    command: Command,
}

/// Simple flag parsing: `--config PATH` anywhere, then a subcommand.
fn parse_args(args: &[String]) -> Result<Cli> {
    let mut config = None;
    let mut positional = Vec::new();

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        if arg == "--config" {
            let path = iter.next().context("--config requires a path")?;
            config = Some(path.clone());
        } else {
            positional.push(arg.as_str());
        }
    }

    let command = match positional.as_slice() {
        [] | ["run"] => Command::Run,
        ["login", email] => Command::Login {
            email: email.to_string(),
        },
        ["logout"] => Command::Logout,
        _ => anyhow::bail!("{USAGE}"),
    };

    Ok(Cli { config, command })
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and LOG_LEVEL / RUST_LOG support
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let cli = parse_args(&args)?;

    let config_path = Config::resolve_path(cli.config.as_deref());
    info!(path = %config_path.display(), "loading configuration");

    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    info!(
        base_url = %config.api.base_url,
        pollers = config.poll.len(),
        headers = config.headers.len(),
        "configuration loaded"
    );

    let transport: Arc<dyn Transport> = Arc::new(
        ReqwestTransport::new(reqwest::Client::new(), config.api.base_url.clone())
            .with_timeout(Duration::from_secs(config.api.timeout_secs))
            .with_headers(&config.headers),
    );

    let store = FileSessionStore::load(config.session.path.clone())
        .await
        .with_context(|| {
            format!(
                "failed to load session from {}",
                config.session.path.display()
            )
        })?;
    let auth = RefreshCoordinator::load(Arc::clone(&transport), Arc::new(store))
        .await
        .context("failed to initialise session")?;

    match cli.command {
        Command::Login { email } => login(&config, transport, auth, &email).await,
        Command::Logout => {
            auth.logout().await.context("logout failed")?;
            Ok(())
        }
        Command::Run => run(config, transport, auth).await,
    }
}

/// Log in and confirm the new session against `/auth/me`.
async fn login(
    config: &Config,
    transport: Arc<dyn Transport>,
    auth: RefreshCoordinator,
    email: &str,
) -> Result<()> {
    let password = config::login_password()?;
    auth.login(email, password.expose())
        .await
        .context("login failed")?;

    let client = ApiClient::new(transport, auth, config.retry.clone());
    let me = client
        .get(ME_PATH)
        .await
        .context("logged in, but the session could not be verified")?;
    let user = me
        .body
        .get("email")
        .and_then(|v| v.as_str())
        .unwrap_or(email);
    info!(user, "session stored");
    Ok(())
}

async fn run(config: Config, transport: Arc<dyn Transport>, auth: RefreshCoordinator) -> Result<()> {
    if !auth.is_authenticated().await {
        anyhow::bail!("no stored session, run `api-watch login <email>` first");
    }

    // Install Prometheus metrics recorder before any metrics are emitted
    let prometheus = metrics::install_recorder()?;

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    tokio::spawn(metrics::forward_events(events_rx));

    let client =
        ApiClient::new(transport, auth.clone(), config.retry.clone()).with_events(events_tx);

    let pollers: Arc<Vec<PollerHandle>> = Arc::new(
        config
            .poll
            .iter()
            .map(|target| spawn_poller(&client, target))
            .collect(),
    );
    info!(pollers = pollers.len(), "polling started");

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let status_server = match config.status.listen_addr {
        Some(addr) => {
            let listener = TcpListener::bind(addr)
                .await
                .with_context(|| format!("failed to bind status server to {addr}"))?;
            info!(addr = %addr, "status server listening");

            let state = StatusState {
                auth: auth.clone(),
                pollers: Arc::clone(&pollers),
                prometheus,
                started_at: Instant::now(),
            };
            Some(tokio::spawn(status::serve(listener, state, async move {
                let _ = shutdown_rx.await;
            })))
        }
        None => None,
    };

    let mut session = auth.subscribe();
    let mut visibility = VisibilitySignals::install()?;
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            changed = session.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = *session.borrow_and_update();
                if state == RefreshState::Failed {
                    warn!("session expired, stopping pollers; run `api-watch login <email>` to resume");
                    set_all(&pollers, |handle| handle.set_enabled(false));
                }
            }
            visible = visibility.recv() => {
                info!(visible, "polling visibility changed");
                set_all(&pollers, |handle| handle.set_visible(visible));
            }
        }
    }

    let _ = shutdown_tx.send(());

    if let Some(server) = status_server {
        match tokio::time::timeout(DRAIN_TIMEOUT, server).await {
            Ok(Ok(Ok(()))) => info!("status server stopped"),
            Ok(Ok(Err(e))) => error!(error = %e, "status server error during shutdown"),
            Ok(Err(e)) => error!(error = %e, "status server task panicked"),
            Err(_) => warn!(
                drain_timeout_secs = DRAIN_TIMEOUT.as_secs(),
                "drain timeout exceeded, forcing shutdown"
            ),
        }
    }

    info!("shutdown complete");
    Ok(())
}

fn set_all(pollers: &[PollerHandle], apply: impl Fn(&PollerHandle)) {
    for handle in pollers {
        apply(handle);
    }
}

/// Poll `target.path` through the resilient client.
fn spawn_poller(client: &ApiClient, target: &PollTarget) -> PollerHandle {
    let client = client.clone();
    let name = target.name.clone();
    let path = target.path.clone();

    Poller::new(target.name.clone(), target.interval.clone()).spawn(true, move || {
        let client = client.clone();
        let name = name.clone();
        let path = path.clone();
        async move {
            let result = client.get(&path).await;
            metrics::record_poll(&name, result.is_ok());
            let response = result?;
            debug!(target_name = %name, status = %response.status, "poll succeeded");
            Ok::<(), DispatchError>(())
        }
    })
}

/// SIGUSR1 hides (pauses) polling, SIGUSR2 shows (resumes) it.
#[cfg(unix)]
struct VisibilitySignals {
    hide: tokio::signal::unix::Signal,
    show: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl VisibilitySignals {
    fn install() -> Result<Self> {
        use tokio::signal::unix::{SignalKind, signal};
        Ok(Self {
            hide: signal(SignalKind::user_defined1()).context("failed to install SIGUSR1 handler")?,
            show: signal(SignalKind::user_defined2()).context("failed to install SIGUSR2 handler")?,
        })
    }

    /// Next requested visibility.
    async fn recv(&mut self) -> bool {
        tokio::select! {
            _ = self.hide.recv() => false,
            _ = self.show.recv() => true,
        }
    }
}

#[cfg(not(unix))]
struct VisibilitySignals;

#[cfg(not(unix))]
impl VisibilitySignals {
    fn install() -> Result<Self> {
        Ok(Self)
    }

    async fn recv(&mut self) -> bool {
        std::future::pending().await
    }
}

/// Wait for SIGTERM or SIGINT for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Json;
    use axum::extract::State;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::{get, post};
    use poller::PollConfig;
    use resilience::RetryPolicy;
    use serde_json::{Value, json};
    use session_auth::{CredentialPair, MemorySessionStore, SessionStore};
    use std::sync::Mutex;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parse_defaults_to_run() {
        let cli = parse_args(&[]).unwrap();
        assert_eq!(
            cli,
            Cli {
                config: None,
                command: Command::Run
            }
        );
    }

    #[test]
    fn parse_login_with_config() {
        let cli = parse_args(&args(&["--config", "/etc/api-watch.toml", "login", "ada@example.com"]))
            .unwrap();
        assert_eq!(cli.config.as_deref(), Some("/etc/api-watch.toml"));
        assert_eq!(
            cli.command,
            Command::Login {
                email: "ada@example.com".into()
            }
        );
    }

    #[test]
    fn parse_config_after_subcommand() {
        let cli = parse_args(&args(&["logout", "--config", "x.toml"])).unwrap();
        assert_eq!(cli.command, Command::Logout);
        assert_eq!(cli.config.as_deref(), Some("x.toml"));
    }

    #[test]
    fn parse_rejects_bad_usage() {
        assert!(parse_args(&args(&["login"])).is_err());
        assert!(parse_args(&args(&["frobnicate"])).is_err());
        assert!(parse_args(&args(&["--config"])).is_err());
    }

    /// Backend that only accepts `at_2`, and hands it out on refresh.
    #[derive(Clone, Default)]
    struct Backend {
        bearers: Arc<Mutex<Vec<String>>>,
        refreshes: Arc<Mutex<u32>>,
    }

    async fn start_backend() -> (String, Backend) {
        let backend = Backend::default();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let app = axum::Router::new()
            .route(
                "/api/v1/documents",
                get(|State(backend): State<Backend>, headers: HeaderMap| async move {
                    let bearer = headers
                        .get("authorization")
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or("")
                        .to_string();
                    backend.bearers.lock().unwrap().push(bearer.clone());
                    if bearer == "Bearer at_2" {
                        (StatusCode::OK, Json(json!([{"id": 1, "title": "notes.pdf"}])))
                    } else {
                        (
                            StatusCode::UNAUTHORIZED,
                            Json(json!({"detail": "Could not validate credentials"})),
                        )
                    }
                }),
            )
            .route(
                "/api/v1/auth/refresh",
                post(|State(backend): State<Backend>, Json(body): Json<Value>| async move {
                    assert_eq!(body["refresh_token"], "rt_1");
                    *backend.refreshes.lock().unwrap() += 1;
                    Json(json!({"access_token": "at_2", "token_type": "bearer"}))
                }),
            )
            .with_state(backend.clone());

        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        (format!("http://{addr}/api/v1"), backend)
    }

    #[tokio::test]
    async fn poller_refreshes_expired_token_and_recovers() {
        let (base_url, backend) = start_backend().await;
        let transport: Arc<dyn Transport> =
            Arc::new(ReqwestTransport::new(reqwest::Client::new(), base_url));
        let store = Arc::new(MemorySessionStore::new(CredentialPair::new("at_1", "rt_1")));
        let auth = RefreshCoordinator::load(Arc::clone(&transport), store.clone())
            .await
            .unwrap();
        let client = ApiClient::new(transport, auth, RetryPolicy::default());

        let target = PollTarget {
            name: "documents".into(),
            path: "/documents".into(),
            interval: PollConfig::new(Duration::from_millis(50)),
        };
        let handle = spawn_poller(&client, &target);

        let deadline = Instant::now() + Duration::from_secs(5);
        while handle.snapshot().await.runs < 2 {
            assert!(Instant::now() < deadline, "poller never completed two runs");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let snapshot = handle.snapshot().await;
        assert_eq!(snapshot.consecutive_errors, 0);
        assert_eq!(*backend.refreshes.lock().unwrap(), 1);

        let bearers = backend.bearers.lock().unwrap().clone();
        assert_eq!(bearers[0], "Bearer at_1");
        assert!(bearers[1..].iter().all(|b| b == "Bearer at_2"));

        let stored = store.get().await.unwrap();
        assert!(stored.access.unwrap().matches("at_2"));
        handle.stop();
    }
}
