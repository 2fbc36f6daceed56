use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{
    errors::Error, messaging::outbox::DEFAULT_OUTBOX_CAPACITY, model::types::PermissionMode,
    Result,
};

pub const DEFAULT_ASSISTANT_NAME: &str = "Andy";
pub const DEFAULT_THREAD_MAP_CAPACITY: usize = 10_000;

/// Typed configuration, read from the environment (and `.env`).
#[derive(Clone, Debug)]
pub struct Config {
    // Identity
    pub assistant_name: String,

    // Storage
    pub data_dir: PathBuf,
    pub groups_file: PathBuf,

    // Channels
    pub slack_bot_token: Option<String>,
    pub slack_app_token: Option<String>,
    pub telegram_bot_token: Option<String>,

    // Transcription
    pub openai_api_key: Option<String>,

    // Agent (Claude CLI)
    pub claude_cli_path: PathBuf,
    pub claude_model: Option<String>,
    pub claude_config_dir: Option<PathBuf>,
    pub claude_permission_mode: PermissionMode,
    pub agent_timeout: Duration,

    // Adapter limits
    pub download_timeout: Duration,
    pub request_timeout: Duration,
    pub outbox_capacity: usize,
    pub outbox_retry_interval: Duration,
    pub thread_map_capacity: usize,
}

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from an arbitrary key lookup (the environment in production).
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get_non_empty = |key: &str| get(key).and_then(non_empty);
        let get_u64 = |key: &str| get(key).and_then(|s| s.trim().parse::<u64>().ok());
        let get_usize = |key: &str| get(key).and_then(|s| s.trim().parse::<usize>().ok());

        let assistant_name =
            get_non_empty("ASSISTANT_NAME").unwrap_or_else(|| DEFAULT_ASSISTANT_NAME.to_string());

        let data_dir = get_non_empty("DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("./data"));
        let groups_file = get_non_empty("GROUPS_FILE")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("registered_groups.json"));

        let slack_bot_token = get_non_empty("SLACK_BOT_TOKEN");
        let slack_app_token = get_non_empty("SLACK_APP_TOKEN");
        let telegram_bot_token = get_non_empty("TELEGRAM_BOT_TOKEN");

        if slack_bot_token.is_some() != slack_app_token.is_some() {
            return Err(Error::Config(
                "SLACK_BOT_TOKEN and SLACK_APP_TOKEN must be set together".to_string(),
            ));
        }
        if slack_bot_token.is_none() && telegram_bot_token.is_none() {
            return Err(Error::Config(
                "no channel configured: set SLACK_BOT_TOKEN/SLACK_APP_TOKEN or TELEGRAM_BOT_TOKEN"
                    .to_string(),
            ));
        }

        let openai_api_key = get_non_empty("OPENAI_API_KEY");

        let claude_cli_path = get_non_empty("CLAUDE_CLI_PATH")
            .map(PathBuf::from)
            .or_else(|| which_in_path("claude"))
            .unwrap_or_else(|| PathBuf::from("/usr/local/bin/claude"));
        let claude_model = get_non_empty("CLAUDE_MODEL");
        let claude_config_dir = get_non_empty("CLAUDE_CONFIG_DIR").map(PathBuf::from);
        let claude_permission_mode = match get_non_empty("CLAUDE_PERMISSION_MODE") {
            Some(raw) => PermissionMode::parse(&raw).ok_or_else(|| {
                Error::Config(format!("unknown CLAUDE_PERMISSION_MODE: {raw}"))
            })?,
            None => PermissionMode::BypassPermissions,
        };
        let agent_timeout = Duration::from_millis(get_u64("AGENT_TIMEOUT_MS").unwrap_or(300_000));

        let download_timeout =
            Duration::from_millis(get_u64("DOWNLOAD_TIMEOUT_MS").unwrap_or(60_000));
        let request_timeout =
            Duration::from_millis(get_u64("REQUEST_TIMEOUT_MS").unwrap_or(30_000).max(1));
        let outbox_retry_interval =
            Duration::from_millis(get_u64("OUTBOX_RETRY_MS").unwrap_or(15_000).max(1));
        let outbox_capacity = get_usize("OUTBOX_CAPACITY")
            .unwrap_or(DEFAULT_OUTBOX_CAPACITY)
            .max(1);
        let thread_map_capacity = get_usize("THREAD_MAP_CAPACITY")
            .unwrap_or(DEFAULT_THREAD_MAP_CAPACITY)
            .max(1);

        Ok(Self {
            assistant_name,
            data_dir,
            groups_file,
            slack_bot_token,
            slack_app_token,
            telegram_bot_token,
            openai_api_key,
            claude_cli_path,
            claude_model,
            claude_config_dir,
            claude_permission_mode,
            agent_timeout,
            download_timeout,
            request_timeout,
            outbox_capacity,
            outbox_retry_interval,
            thread_map_capacity,
        })
    }

    /// Host directory holding one attachment directory per group folder.
    pub fn ipc_dir(&self) -> PathBuf {
        self.data_dir.join("ipc")
    }

    /// Host directory holding one agent working directory per group folder.
    pub fn groups_dir(&self) -> PathBuf {
        self.data_dir.join("groups")
    }

    pub fn slack_enabled(&self) -> bool {
        self.slack_bot_token.is_some() && self.slack_app_token.is_some()
    }

    pub fn telegram_enabled(&self) -> bool {
        self.telegram_bot_token.is_some()
    }
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
        if key.is_empty() {
            continue;
        }
        if env::var_os(key).is_some() {
            continue; // do not override existing env
        }

        env::set_var(key, unquote(v.trim()));
    }
}

fn unquote(val: &str) -> &str {
    let quoted = val.len() >= 2
        && ((val.starts_with('"') && val.ends_with('"'))
            || (val.starts_with('\'') && val.ends_with('\'')));
    if quoted {
        &val[1..val.len() - 1]
    } else {
        val
    }
}

fn which_in_path(binary: &str) -> Option<PathBuf> {
    let path = env::var_os("PATH")?;
    env::split_paths(&path)
        .map(|dir| dir.join(binary))
        .find(|candidate| is_executable_file(candidate))
}

fn is_executable_file(p: &Path) -> bool {
    if !p.is_file() {
        return false;
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Ok(md) = fs::metadata(p) {
            return (md.permissions().mode() & 0o111) != 0;
        }
    }
    true
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn slack_only_config_uses_defaults() {
        let cfg = Config::from_lookup(lookup(&[
            ("SLACK_BOT_TOKEN", "xoxb-1"),
            ("SLACK_APP_TOKEN", "xapp-1"),
            ("DATA_DIR", "/srv/relay"),
        ]))
        .unwrap();

        assert!(cfg.slack_enabled());
        assert!(!cfg.telegram_enabled());
        assert_eq!(cfg.assistant_name, DEFAULT_ASSISTANT_NAME);
        assert_eq!(cfg.groups_file, PathBuf::from("/srv/relay/registered_groups.json"));
        assert_eq!(cfg.ipc_dir(), PathBuf::from("/srv/relay/ipc"));
        assert_eq!(cfg.outbox_capacity, DEFAULT_OUTBOX_CAPACITY);
        assert_eq!(cfg.download_timeout, Duration::from_secs(60));
        assert_eq!(cfg.request_timeout, Duration::from_secs(30));
        assert_eq!(cfg.outbox_retry_interval, Duration::from_secs(15));
        assert_eq!(cfg.claude_permission_mode, PermissionMode::BypassPermissions);
    }

    #[test]
    fn permission_mode_is_configurable() {
        let cfg = Config::from_lookup(lookup(&[
            ("TELEGRAM_BOT_TOKEN", "123:abc"),
            ("CLAUDE_PERMISSION_MODE", "acceptEdits"),
        ]))
        .unwrap();
        assert_eq!(cfg.claude_permission_mode, PermissionMode::AcceptEdits);

        let err = Config::from_lookup(lookup(&[
            ("TELEGRAM_BOT_TOKEN", "123:abc"),
            ("CLAUDE_PERMISSION_MODE", "yolo"),
        ]))
        .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn requires_a_channel() {
        let err = Config::from_lookup(lookup(&[("OPENAI_API_KEY", "sk")])).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn slack_tokens_come_in_pairs() {
        let err = Config::from_lookup(lookup(&[("SLACK_BOT_TOKEN", "xoxb-1")])).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn parses_overrides() {
        let cfg = Config::from_lookup(lookup(&[
            ("TELEGRAM_BOT_TOKEN", "123:abc"),
            ("ASSISTANT_NAME", "Nova"),
            ("OUTBOX_CAPACITY", "5"),
            ("THREAD_MAP_CAPACITY", "0"),
            ("AGENT_TIMEOUT_MS", "1500"),
        ]))
        .unwrap();
        assert_eq!(cfg.assistant_name, "Nova");
        assert_eq!(cfg.outbox_capacity, 5);
        assert_eq!(cfg.thread_map_capacity, 1);
        assert_eq!(cfg.agent_timeout, Duration::from_millis(1500));
    }

    #[test]
    fn strips_quotes() {
        assert_eq!(unquote("\"x\""), "x");
        assert_eq!(unquote("'y'"), "y");
        assert_eq!(unquote("z"), "z");
    }
}
