use comfortcloud_sync::auth::{self, LoginFlow, TokenManager};
use comfortcloud_sync::client::{self, ApiClient};
use comfortcloud_sync::config::{self, Config};
use comfortcloud_sync::services::poller::{self, PollerSettings};
use comfortcloud_sync::services::session::AccountSession;
use comfortcloud_sync::storage::FileTokenStore;
use log::{error, info, warn};
use std::path::PathBuf;
use std::time::Duration;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(20);
const READ_TIMEOUT: Duration = Duration::from_secs(30);

pub fn run() -> Result<(), String> {
    // 1) Load config
    let cfg = Config::from_env()?;
    info!(
        "Config loaded (poll_interval={}s, token_store={}, backoff_base={}s, max_poll_failures={})",
        cfg.poll_interval.as_secs(),
        cfg.token_store_path.display(),
        cfg.poll_backoff_base.as_secs(),
        cfg.max_poll_failures
    );

    // Redirects stay manual: the login flow reads Location headers itself.
    let agent = ureq::AgentBuilder::new()
        .redirects(0)
        .timeout_connect(CONNECT_TIMEOUT)
        .timeout_read(READ_TIMEOUT)
        .build();

    // 2) Resolve the app version to present
    let app_version = match &cfg.app_version {
        Some(version) => version.clone(),
        None => match auth::fetch_app_version(&agent, auth::APP_BRAIN_URL) {
            Ok(version) => {
                info!("Using published app version {}", version);
                version
            }
            Err(e) => {
                warn!(
                    "App version lookup failed ({}), falling back to {}",
                    e,
                    auth::DEFAULT_APP_VERSION
                );
                auth::DEFAULT_APP_VERSION.to_string()
            }
        },
    };

    // 3) Token store + authentication
    let store = FileTokenStore::open(&cfg.token_store_path)?;
    let flow = LoginFlow::new(
        agent.clone(),
        auth::BASE_PATH_AUTH,
        client::BASE_PATH_ACC,
        &app_version,
        &cfg.username,
        &cfg.password,
    );
    let tokens = TokenManager::new(Box::new(store), Box::new(flow));

    // 4) API client + session
    let api = ApiClient::new(agent, client::BASE_PATH_ACC, &app_version, tokens);
    let mut session = AccountSession::new(api);

    // 5) Poll loop (steady cadence)
    let settings = PollerSettings {
        interval: cfg.poll_interval,
        backoff_base: cfg.poll_backoff_base,
        max_consecutive_failures: cfg.max_poll_failures,
    };
    info!("Starting poll loop: interval={}s", settings.interval.as_secs());
    poller::run_loop(&mut session, &settings).map_err(|e| format!("poll loop terminated: {}", e))
}

fn configure_env_from_cli() -> Result<Option<PathBuf>, String> {
    let mut args = std::env::args_os();
    args.next(); // skip program name

    let mut env_file: Option<PathBuf> = None;
    while let Some(arg) = args.next() {
        match arg.to_str() {
            Some("--env-file") => {
                if env_file.is_some() {
                    return Err("`--env-file` provided more than once".to_string());
                }
                let value = args
                    .next()
                    .ok_or_else(|| "`--env-file` requires a path argument".to_string())?;
                env_file = Some(PathBuf::from(value));
            }
            Some(s) if s.starts_with("--env-file=") => {
                if env_file.is_some() {
                    return Err("`--env-file` provided more than once".to_string());
                }
                let path = &s["--env-file=".len()..];
                if path.is_empty() {
                    return Err("`--env-file` requires a path argument".to_string());
                }
                env_file = Some(PathBuf::from(path));
            }
            Some(other) => return Err(format!("unrecognised argument: {}", other)),
            None => return Err("argument contains invalid UTF-8".to_string()),
        }
    }

    if let Some(path) = env_file {
        if !path.is_file() {
            return Err(format!("env file not found: {}", path.display()));
        }
        config::load_env_file(&path)?;
        Ok(Some(path))
    } else {
        let default_path = PathBuf::from(".env");
        if default_path.is_file() {
            config::load_env_file(&default_path)?;
            Ok(Some(default_path))
        } else {
            Ok(None)
        }
    }
}

fn main() {
    let loaded_env = match configure_env_from_cli() {
        Ok(path) => path,
        Err(err) => {
            eprintln!("fatal: {}", err);
            std::process::exit(1);
        }
    };

    // Init logging after environment so RUST_LOG from .env is respected.
    let default_filter = env_logger::Env::default().default_filter_or("info");
    env_logger::Builder::from_env(default_filter)
        .format_timestamp_secs()
        .init();

    if let Some(path) = loaded_env.as_ref() {
        info!("Environment loaded from env file: {}", path.display());
    }

    info!(
        "comfortcloud-sync {} (git {}) starting",
        env!("CARGO_PKG_VERSION"),
        env!("BUILD_TIME_GIT_HASH")
    );
    if let Err(e) = run() {
        error!("fatal: {}", e);
        std::process::exit(1);
    }
}
