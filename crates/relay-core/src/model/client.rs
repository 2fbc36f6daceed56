use std::path::PathBuf;

use async_trait::async_trait;

use crate::Result;

use super::types::*;

/// A concrete CLI invocation (used by the `claude` runner).
#[derive(Clone, Debug)]
pub struct CliInvocation {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    pub env: Vec<(String, String)>,
}

/// Prompt adapter for Claude CLI.
#[derive(Clone, Debug)]
pub struct ClaudeCliPromptAdapter {
    pub cfg: ClaudeCliConfig,
}

impl ClaudeCliPromptAdapter {
    /// Build `claude` CLI args for one non-interactive turn.
    pub fn build_invocation(&self, req: &RunRequest) -> CliInvocation {
        let mut args: Vec<String> = vec![
            "-p".to_string(),
            "--output-format".to_string(),
            "stream-json".to_string(),
            "--verbose".to_string(),
            "--permission-mode".to_string(),
            self.cfg.permission_mode.as_claude_cli_flag().to_string(),
        ];
        if self.cfg.dangerously_skip_permissions {
            args.push("--dangerously-skip-permissions".to_string());
        }

        if let Some(model) = &self.cfg.model {
            args.push("--model".to_string());
            args.push(model.clone());
        }

        if let Some(sys) = &req.append_system_prompt {
            args.push("--append-system-prompt".to_string());
            args.push(sys.clone());
        }

        if let Some(session) = &req.resume {
            args.push("--resume".to_string());
            args.push(session.0.clone());
        }

        // Prompt as the final positional argument.
        args.push(req.prompt.clone());

        let mut env = Vec::new();
        if let Some(dir) = &self.cfg.config_dir {
            env.push(("CLAUDE_CONFIG_DIR".to_string(), dir.display().to_string()));
        }

        CliInvocation {
            program: self.cfg.claude_path.clone(),
            args,
            cwd: req.cwd.clone(),
            env,
        }
    }
}

/// Agent backend used by the orchestrator.
#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn run(&self, req: RunRequest) -> Result<RunResult>;
}
