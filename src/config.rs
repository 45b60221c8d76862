//! Configuration and the mode machine.
//!
//! The gateway is driven entirely by environment variables. Three base modes
//! select which subsystems are live, with orthogonal toggles layered on top:
//!
//! | Mode    | dedup/ring | queue+worker          | spool writes     | replay                |
//! |---------|------------|-----------------------|------------------|-----------------------|
//! | `ECHO`  | off        | off                   | off              | off                   |
//! | `STORE` | on         | off                   | off              | off                   |
//! | `FULL`  | on         | iff `EXTERNAL_SYNC`   | iff `JSONL_*`    | iff `REPLAY_ENABLED`  |
//!
//! `JSONL_ALWAYS` spools every accepted `/ingest` event; `JSONL_FALLBACK`
//! spools only when the webhook path failed. The toggles compose.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;

/// Base operating mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OpsMode {
    /// Accept and acknowledge only; nothing is stored or forwarded.
    Echo,
    /// Duplicate window and summary ring only.
    Store,
    /// The full durable pipeline, subject to the toggles.
    Full,
}

impl OpsMode {
    fn parse(s: &str) -> Self {
        match s.trim().to_ascii_uppercase().as_str() {
            "ECHO" => OpsMode::Echo,
            "STORE" => OpsMode::Store,
            _ => OpsMode::Full,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OpsMode::Echo => "ECHO",
            OpsMode::Store => "STORE",
            OpsMode::Full => "FULL",
        }
    }
}

/// Which spool stages the replay worker re-submits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReplayMode {
    /// Only records written because the webhook path failed.
    FallbackOnly,
    /// Both `jsonl.fallback` and `jsonl.always` records.
    All,
}

impl ReplayMode {
    fn parse(s: &str) -> Self {
        match s.trim().to_ascii_uppercase().as_str() {
            "ALL" => ReplayMode::All,
            _ => ReplayMode::FallbackOnly,
        }
    }
}

/// Forward queue and queue-worker settings.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Maximum queued items before drop-oldest kicks in.
    pub limit: usize,
    /// Interval between queue worker ticks.
    pub worker_interval: Duration,
    /// Maximum items drained per tick.
    pub batch_size: usize,
    /// Retries before an item is dropped as failed.
    pub max_retry: u32,
    /// Base for exponential backoff: `base * 2^(retry-1)`.
    pub backoff_base_ms: i64,
}

/// Spreadsheet batch sink settings.
#[derive(Debug, Clone)]
pub struct SheetsConfig {
    pub sheet_id: Option<String>,
    pub sheet_name: String,
    /// Base64-encoded service-account JSON, if supplied that way.
    pub credentials_b64: Option<String>,
    /// Raw service-account JSON.
    pub credentials_json: Option<String>,
}

/// Webhook sink settings.
#[derive(Debug, Clone)]
pub struct WebhookConfig {
    pub url: Option<String>,
    pub secret: Option<String>,
    pub timeout: Duration,
}

/// JSONL spool settings.
#[derive(Debug, Clone)]
pub struct SpoolConfig {
    pub dir: PathBuf,
    pub file: String,
    pub max_bytes: u64,
    pub tail_max_bytes: u64,
    /// Spool every accepted `/ingest` event.
    pub always: bool,
    /// Spool only when the webhook path failed.
    pub fallback: bool,
}

impl SpoolConfig {
    /// Path of the active spool file.
    pub fn path(&self) -> PathBuf {
        self.dir.join(&self.file)
    }
}

/// Replay worker settings.
#[derive(Debug, Clone)]
pub struct ReplayConfig {
    pub enabled: bool,
    pub interval: Duration,
    pub batch_size: usize,
    pub max_bytes_per_tick: u64,
    pub mode: ReplayMode,
    pub state_file: String,
}

/// Complete gateway configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub listen_addr: SocketAddr,
    pub ops_mode: OpsMode,
    pub external_sync: bool,
    pub json_limit_bytes: usize,
    pub dedupe_window_ms: i64,
    pub store_limit: usize,
    pub queue: QueueConfig,
    pub sheets: SheetsConfig,
    pub webhook: WebhookConfig,
    pub spool: SpoolConfig,
    pub replay: ReplayConfig,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 3000)),
            ops_mode: OpsMode::Full,
            external_sync: false,
            json_limit_bytes: 2 * 1024 * 1024,
            dedupe_window_ms: 2000,
            store_limit: 200,
            queue: QueueConfig {
                limit: 500,
                worker_interval: Duration::from_millis(1500),
                batch_size: 5,
                max_retry: 5,
                backoff_base_ms: 2000,
            },
            sheets: SheetsConfig {
                sheet_id: None,
                sheet_name: "events".to_string(),
                credentials_b64: None,
                credentials_json: None,
            },
            webhook: WebhookConfig {
                url: None,
                secret: None,
                timeout: Duration::from_millis(2500),
            },
            spool: SpoolConfig {
                dir: PathBuf::from("/var/data"),
                file: "ingest_fallback.jsonl".to_string(),
                max_bytes: 104_857_600,
                tail_max_bytes: 2_097_152,
                always: false,
                fallback: false,
            },
            replay: ReplayConfig {
                enabled: false,
                interval: Duration::from_millis(3000),
                batch_size: 10,
                max_bytes_per_tick: 1_048_576,
                mode: ReplayMode::FallbackOnly,
                state_file: "replay_state.json".to_string(),
            },
        }
    }
}

impl Config {
    /// Loads configuration from environment variables with defaults.
    pub fn from_env() -> Self {
        let defaults = Config::default();

        let port = env_parse("PORT").unwrap_or(3000u16);

        Config {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], port)),
            ops_mode: std::env::var("OPS_MODE")
                .map(|s| OpsMode::parse(&s))
                .unwrap_or(OpsMode::Full),
            external_sync: env_toggle("EXTERNAL_SYNC"),
            json_limit_bytes: std::env::var("JSON_LIMIT")
                .ok()
                .and_then(|s| parse_size_limit(&s))
                .unwrap_or(defaults.json_limit_bytes),
            dedupe_window_ms: env_parse("DEDUPE_WINDOW_MS").unwrap_or(2000),
            store_limit: env_parse("STORE_LIMIT").unwrap_or(200),
            queue: QueueConfig {
                limit: env_parse("QUEUE_LIMIT").unwrap_or(500),
                worker_interval: Duration::from_millis(
                    env_parse("WORKER_INTERVAL_MS").unwrap_or(1500),
                ),
                batch_size: env_parse("WORKER_BATCH_SIZE").unwrap_or(5),
                max_retry: env_parse("WORKER_MAX_RETRY").unwrap_or(5),
                backoff_base_ms: env_parse("WORKER_BACKOFF_BASE_MS").unwrap_or(2000),
            },
            sheets: SheetsConfig {
                sheet_id: std::env::var("SHEET_ID").ok(),
                sheet_name: std::env::var("EVENTS_SHEET_NAME")
                    .unwrap_or_else(|_| "events".to_string()),
                credentials_b64: std::env::var("GOOGLE_SERVICE_ACCOUNT_JSON_B64").ok(),
                credentials_json: std::env::var("GOOGLE_SERVICE_ACCOUNT_JSON").ok(),
            },
            webhook: WebhookConfig {
                url: std::env::var("GAS_WEBAPP_URL").ok(),
                secret: std::env::var("ITPLAYLAB_SECRET").ok(),
                timeout: Duration::from_millis(env_parse("GAS_TIMEOUT_MS").unwrap_or(2500)),
            },
            spool: SpoolConfig {
                dir: std::env::var("JSONL_DIR")
                    .map(PathBuf::from)
                    .unwrap_or_else(|_| PathBuf::from("/var/data")),
                file: std::env::var("JSONL_FILE")
                    .unwrap_or_else(|_| "ingest_fallback.jsonl".to_string()),
                max_bytes: env_parse("JSONL_MAX_BYTES").unwrap_or(104_857_600),
                tail_max_bytes: env_parse("JSONL_TAIL_MAX_BYTES").unwrap_or(2_097_152),
                always: env_toggle("JSONL_ALWAYS"),
                fallback: env_toggle("JSONL_FALLBACK"),
            },
            replay: ReplayConfig {
                enabled: env_toggle("REPLAY_ENABLED"),
                interval: Duration::from_millis(env_parse("REPLAY_INTERVAL_MS").unwrap_or(3000)),
                batch_size: env_parse("REPLAY_BATCH_SIZE").unwrap_or(10),
                max_bytes_per_tick: env_parse("REPLAY_MAX_BYTES_PER_TICK").unwrap_or(1_048_576),
                mode: std::env::var("REPLAY_MODE")
                    .map(|s| ReplayMode::parse(&s))
                    .unwrap_or(ReplayMode::FallbackOnly),
                state_file: std::env::var("REPLAY_STATE_FILE")
                    .unwrap_or_else(|_| "replay_state.json".to_string()),
            },
        }
    }

    // ─── Mode machine ───

    /// Duplicate window is live (any mode but ECHO).
    pub fn dedupe_enabled(&self) -> bool {
        self.ops_mode != OpsMode::Echo
    }

    /// Summary ring is live (any mode but ECHO).
    pub fn store_enabled(&self) -> bool {
        self.ops_mode != OpsMode::Echo
    }

    /// Forwarding paths (queue enqueue, webhook POST) are live.
    pub fn forwarding_enabled(&self) -> bool {
        self.ops_mode == OpsMode::Full
    }

    /// The queue worker may run.
    pub fn sync_worker_armed(&self) -> bool {
        self.ops_mode == OpsMode::Full && self.external_sync
    }

    /// Spool writes are live.
    pub fn spool_enabled(&self) -> bool {
        self.ops_mode == OpsMode::Full && (self.spool.always || self.spool.fallback)
    }

    /// The replay worker may run.
    pub fn replay_armed(&self) -> bool {
        self.spool_enabled() && self.replay.enabled
    }

    /// Absolute path of the replay state file, beside the spool.
    pub fn replay_state_path(&self) -> PathBuf {
        self.spool.dir.join(&self.replay.state_file)
    }
}

/// Reads `ON`/`OFF` toggles; anything but `ON` (case-insensitive) is off.
fn env_toggle(var: &str) -> bool {
    std::env::var(var)
        .map(|s| s.trim().eq_ignore_ascii_case("ON"))
        .unwrap_or(false)
}

fn env_parse<T: std::str::FromStr>(var: &str) -> Option<T> {
    std::env::var(var).ok().and_then(|s| s.trim().parse().ok())
}

/// Parses a body-size limit such as `2mb`, `512kb`, `1gb`, or plain bytes.
fn parse_size_limit(s: &str) -> Option<usize> {
    let s = s.trim().to_ascii_lowercase();
    let (digits, multiplier) = if let Some(rest) = s.strip_suffix("gb") {
        (rest, 1024 * 1024 * 1024)
    } else if let Some(rest) = s.strip_suffix("mb") {
        (rest, 1024 * 1024)
    } else if let Some(rest) = s.strip_suffix("kb") {
        (rest, 1024)
    } else if let Some(rest) = s.strip_suffix('b') {
        (rest, 1)
    } else {
        (s.as_str(), 1)
    };
    digits.trim().parse::<usize>().ok().map(|n| n * multiplier)
}
