use std::path::PathBuf;

/// Daemon configuration loaded from environment variables.
///
/// Per-deployment settings and secrets come from the environment (a
/// `.env` file is honoured); device and rule definitions live in the
/// JSON file named by `DEFINITIONS_PATH`.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    /// WebSocket endpoint of the device broker.
    pub broker_ws_url: String,
    /// Path to the device/rule definitions file.
    pub definitions_path: PathBuf,
    /// Append-only JSON-lines reading history; `None` disables history.
    pub readings_path: Option<PathBuf>,
    /// Webhook that receives every alarm, in addition to per-rule channels.
    pub global_webhook_url: Option<String>,
    /// Relay endpoint that turns alarm payloads into outgoing mail.
    pub email_relay_url: Option<String>,
    /// Seconds between definition reloads (default: `30`).
    pub rule_refresh_secs: u64,
}

impl DaemonConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var              | Default            |
    /// |----------------------|--------------------|
    /// | `BROKER_WS_URL`      | -- (required)      |
    /// | `DEFINITIONS_PATH`   | `poolsense.json`   |
    /// | `READINGS_PATH`      | unset (no history) |
    /// | `GLOBAL_WEBHOOK_URL` | unset              |
    /// | `EMAIL_RELAY_URL`    | unset              |
    /// | `RULE_REFRESH_SECS`  | `30`               |
    pub fn from_env() -> Self {
        let broker_ws_url =
            std::env::var("BROKER_WS_URL").expect("BROKER_WS_URL must be set in the environment");

        let definitions_path: PathBuf = std::env::var("DEFINITIONS_PATH")
            .unwrap_or_else(|_| "poolsense.json".into())
            .into();

        let readings_path = std::env::var("READINGS_PATH").ok().map(PathBuf::from);
        let global_webhook_url = std::env::var("GLOBAL_WEBHOOK_URL").ok();
        let email_relay_url = std::env::var("EMAIL_RELAY_URL").ok();

        let rule_refresh_secs: u64 = std::env::var("RULE_REFRESH_SECS")
            .unwrap_or_else(|_| "30".into())
            .parse()
            .expect("RULE_REFRESH_SECS must be a valid u64");

        Self {
            broker_ws_url,
            definitions_path,
            readings_path,
            global_webhook_url,
            email_relay_url,
            rule_refresh_secs,
        }
    }
}
