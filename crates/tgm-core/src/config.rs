use std::{
    env, fs, io,
    net::SocketAddr,
    path::{Path, PathBuf},
    time::Duration,
};

use tracing::{info, warn};

use crate::{
    dispatch::{DispatchConfig, TaskTimeouts},
    retry::{with_retry, RetryError, RetryPolicy},
    store::lock_path_for,
    Error, Result,
};

/// Typed process configuration, read from the environment.
#[derive(Clone, Debug)]
pub struct Config {
    // Rules
    pub rules_path: PathBuf,
    pub reload_interval: Duration,
    /// Owner attribution used when the rule file has no `user_id`.
    pub user_id: Option<String>,

    // Backend
    pub api_url: String,

    // Transport / credentials
    pub telegram_bot_token: Option<String>,
    pub session_path: PathBuf,
    pub session_retry: RetryPolicy,

    // Dispatch
    pub dispatch: DispatchConfig,
    pub timeouts: TaskTimeouts,
    pub lookup_timeout: Duration,
    pub identity_ttl: Duration,

    // Log store
    pub log_store_path: PathBuf,
    pub store_retry: RetryPolicy,

    // Control endpoint
    pub control_addr: SocketAddr,
}

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));

        let control_addr = env_str("CONTROL_ADDR")
            .and_then(non_empty)
            .unwrap_or_else(|| "0.0.0.0:8888".to_string());
        let control_addr: SocketAddr = control_addr
            .trim()
            .parse()
            .map_err(|e| Error::Config(format!("invalid CONTROL_ADDR {control_addr:?}: {e}")))?;

        let api_url = env_str("API_URL")
            .and_then(non_empty)
            .unwrap_or_else(|| "http://api:3000".to_string())
            .trim_end_matches('/')
            .to_string();

        let defaults = TaskTimeouts::default();
        let timeouts = TaskTimeouts {
            persist: env_millis("STORE_TIMEOUT_MS").unwrap_or(defaults.persist),
            notify: env_millis("NOTIFY_TIMEOUT_MS").unwrap_or(defaults.notify),
            alert: env_millis("ALERT_TIMEOUT_MS").unwrap_or(defaults.alert),
            ai: env_millis("AI_TIMEOUT_MS").unwrap_or(defaults.ai),
            reply: env_millis("REPLY_TIMEOUT_MS").unwrap_or(defaults.reply),
        };

        let dispatch_defaults = DispatchConfig::default();
        let dispatch = DispatchConfig {
            queue_capacity: env_usize("QUEUE_CAPACITY")
                .filter(|n| *n > 0)
                .unwrap_or(dispatch_defaults.queue_capacity),
            ai_concurrency: env_usize("AI_CONCURRENCY")
                .filter(|n| *n > 0)
                .unwrap_or(dispatch_defaults.ai_concurrency),
            alert_concurrency: env_usize("ALERT_CONCURRENCY")
                .filter(|n| *n > 0)
                .unwrap_or(dispatch_defaults.alert_concurrency),
        };

        Ok(Self {
            rules_path: env_path("CONFIG_PATH").unwrap_or_else(|| PathBuf::from("/app/config.json")),
            reload_interval: env_secs_f64("CONFIG_RELOAD_INTERVAL")
                .unwrap_or(Duration::from_secs(300)),
            user_id: env_str("USER_ID").and_then(non_empty),
            api_url,
            telegram_bot_token: env_str("TELEGRAM_BOT_TOKEN").and_then(non_empty),
            session_path: env_path("SESSION_PATH")
                .unwrap_or_else(|| PathBuf::from("/tmp/session_volume/bot_token")),
            session_retry: RetryPolicy {
                max_attempts: env_u32("SESSION_RETRY_ATTEMPTS").unwrap_or(3),
                base_delay: env_millis("SESSION_RETRY_BASE_MS").unwrap_or(Duration::from_secs(2)),
            },
            dispatch,
            timeouts,
            lookup_timeout: env_millis("LOOKUP_TIMEOUT_MS").unwrap_or(Duration::from_secs(5)),
            identity_ttl: env_u64("IDENTITY_CACHE_TTL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(Duration::from_secs(3600)),
            log_store_path: env_path("LOG_STORE_PATH")
                .unwrap_or_else(|| PathBuf::from("/app/data/logs.jsonl")),
            store_retry: RetryPolicy {
                max_attempts: env_u32("STORE_RETRY_ATTEMPTS").unwrap_or(3),
                base_delay: env_millis("STORE_RETRY_BASE_MS").unwrap_or(Duration::from_millis(200)),
            },
            control_addr,
        })
    }

    /// Bot token from the environment, else from the provisioned token file.
    ///
    /// The file is only read while the provisioning flow does not hold its
    /// `<path>.lock`; a lock that outlasts the retry policy, a missing file or
    /// an empty token all map to [`Error::Unauthorized`].
    pub async fn load_bot_token(&self) -> Result<String> {
        if let Some(token) = &self.telegram_bot_token {
            return Ok(token.clone());
        }

        let path = self.session_path.clone();
        let res = with_retry(self.session_retry, Error::is_resource_busy, || {
            let path = path.clone();
            async move {
                tokio::task::spawn_blocking(move || read_token_file(&path))
                    .await
                    .map_err(|e| Error::External(format!("credential read task failed: {e}")))?
            }
        })
        .await;

        match res {
            Ok(token) => {
                info!(path = %self.session_path.display(), "loaded bot token from credential store");
                Ok(token)
            }
            Err(RetryError::Exhausted { attempts, last }) => {
                warn!(attempts, error = %last, "credential store stayed locked");
                Err(Error::Unauthorized(format!(
                    "credential store {} still locked after {attempts} attempts; re-provision credentials",
                    self.session_path.display()
                )))
            }
            Err(RetryError::Fatal(e)) => Err(e),
        }
    }
}

fn read_token_file(path: &Path) -> Result<String> {
    let lock = lock_path_for(path);
    if lock.exists() {
        return Err(Error::ResourceBusy {
            resource: lock.display().to_string(),
        });
    }

    let contents = match fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(Error::Unauthorized(format!(
                "no credentials at {}; provision the bot token first",
                path.display()
            )))
        }
        Err(e) => return Err(Error::Io(e)),
    };

    non_empty(contents.trim().to_string()).ok_or_else(|| {
        Error::Unauthorized(format!("credential file {} is empty", path.display()))
    })
}

fn env_str(key: &str) -> Option<String> {
    env::var(key).ok()
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() || env::var_os(key).is_some() {
            continue;
        }

        let mut val = v.trim();
        if val.len() >= 2
            && ((val.starts_with('"') && val.ends_with('"'))
                || (val.starts_with('\'') && val.ends_with('\'')))
        {
            val = &val[1..val.len() - 1];
        }

        env::set_var(key, val);
    }
}

fn env_u64(key: &str) -> Option<u64> {
    env_str(key).and_then(|s| s.trim().parse::<u64>().ok())
}

fn env_u32(key: &str) -> Option<u32> {
    env_str(key).and_then(|s| s.trim().parse::<u32>().ok())
}

fn env_usize(key: &str) -> Option<usize> {
    env_str(key).and_then(|s| s.trim().parse::<usize>().ok())
}

fn env_millis(key: &str) -> Option<Duration> {
    env_u64(key).map(Duration::from_millis)
}

/// Seconds as a float; non-finite or non-positive values are ignored.
fn env_secs_f64(key: &str) -> Option<Duration> {
    env_str(key)
        .and_then(|s| s.trim().parse::<f64>().ok())
        .filter(|f| f.is_finite() && *f > 0.0)
        .map(Duration::from_secs_f64)
}

fn env_path(key: &str) -> Option<PathBuf> {
    env_str(key).and_then(non_empty).map(PathBuf::from)
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}
