use std::path::PathBuf;

/// Agent session reference (used for resume).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SessionRef(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PermissionMode {
    Default,
    AcceptEdits,
    BypassPermissions,
    Plan,
}

impl PermissionMode {
    /// Parse the CLI spelling (`default`, `acceptEdits`, `bypassPermissions`, `plan`).
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "default" => Some(PermissionMode::Default),
            "acceptEdits" => Some(PermissionMode::AcceptEdits),
            "bypassPermissions" => Some(PermissionMode::BypassPermissions),
            "plan" => Some(PermissionMode::Plan),
            _ => None,
        }
    }

    pub fn as_claude_cli_flag(self) -> &'static str {
        match self {
            PermissionMode::Default => "default",
            PermissionMode::AcceptEdits => "acceptEdits",
            PermissionMode::BypassPermissions => "bypassPermissions",
            PermissionMode::Plan => "plan",
        }
    }
}

#[derive(Clone, Debug)]
pub struct ClaudeCliConfig {
    pub claude_path: PathBuf,
    pub model: Option<String>,
    pub permission_mode: PermissionMode,
    pub dangerously_skip_permissions: bool,
    pub config_dir: Option<PathBuf>,
}

/// A single agent turn: one transcript in, one reply out.
#[derive(Clone, Debug)]
pub struct RunRequest {
    pub prompt: String,
    pub cwd: PathBuf,
    pub append_system_prompt: Option<String>,
    pub resume: Option<SessionRef>,
}

#[derive(Clone, Debug, Default)]
pub struct RunResult {
    pub session: Option<SessionRef>,
    pub is_error: bool,
    pub text: String,
}
