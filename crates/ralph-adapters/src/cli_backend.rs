//! Catalog of known coding-agent CLI backends and how to build their command
//! lines. Headless-only: Ralph-TUI's `run`/`resume` commands never launch an
//! interactive agent session, so there is exactly one command-line shape per
//! backend (unlike a TUI-capable orchestrator, which needs an interactive
//! variant of each).

use std::fmt;

/// How a backend expects the prompt to be delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptMode {
    /// Pass the prompt as a command-line argument (optionally after a flag).
    Arg,
    /// Write the prompt to the child's stdin.
    Stdin,
}

#[derive(Debug, Clone)]
pub struct UnknownBackendError(pub String);

impl fmt::Display for UnknownBackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown agent backend: {}", self.0)
    }
}

impl std::error::Error for UnknownBackendError {}

/// A CLI backend: the base command and headless-mode flags for one coding
/// agent. Engine-injected flags (model, extra) are appended by the caller,
/// never by `CliBackend` itself, so flag ordering (§4.2: engine flags last)
/// is enforced at one call site.
#[derive(Debug, Clone)]
pub struct CliBackend {
    pub name: &'static str,
    pub command: String,
    pub base_args: Vec<String>,
    pub prompt_mode: PromptMode,
    pub prompt_flag: Option<String>,
}

impl CliBackend {
    pub fn claude() -> Self {
        Self {
            name: "claude",
            command: "claude".into(),
            base_args: vec![
                "--dangerously-skip-permissions".into(),
                "--verbose".into(),
                "--output-format".into(),
                "stream-json".into(),
            ],
            prompt_mode: PromptMode::Arg,
            prompt_flag: Some("-p".into()),
        }
    }

    pub fn kiro() -> Self {
        Self {
            name: "kiro",
            command: "kiro-cli".into(),
            base_args: vec![
                "chat".into(),
                "--no-interactive".into(),
                "--trust-all-tools".into(),
            ],
            prompt_mode: PromptMode::Arg,
            prompt_flag: None,
        }
    }

    pub fn gemini() -> Self {
        Self {
            name: "gemini",
            command: "gemini".into(),
            base_args: vec!["--yolo".into()],
            prompt_mode: PromptMode::Arg,
            prompt_flag: Some("-p".into()),
        }
    }

    pub fn codex() -> Self {
        Self {
            name: "codex",
            command: "codex".into(),
            base_args: vec!["exec".into(), "--full-auto".into()],
            prompt_mode: PromptMode::Arg,
            prompt_flag: None,
        }
    }

    pub fn amp() -> Self {
        Self {
            name: "amp",
            command: "amp".into(),
            base_args: vec!["--dangerously-allow-all".into()],
            prompt_mode: PromptMode::Arg,
            prompt_flag: Some("-x".into()),
        }
    }

    pub fn copilot() -> Self {
        Self {
            name: "copilot",
            command: "copilot".into(),
            base_args: vec!["--allow-all-tools".into()],
            prompt_mode: PromptMode::Arg,
            prompt_flag: Some("-p".into()),
        }
    }

    pub fn opencode() -> Self {
        Self {
            name: "opencode",
            command: "opencode".into(),
            base_args: vec!["run".into()],
            prompt_mode: PromptMode::Arg,
            prompt_flag: None,
        }
    }

    /// A user-supplied backend: arbitrary command, arbitrary flags.
    pub fn custom(command: String, base_args: Vec<String>, prompt_mode: PromptMode, prompt_flag: Option<String>) -> Self {
        Self {
            name: "custom",
            command,
            base_args,
            prompt_mode,
            prompt_flag,
        }
    }

    /// Resolves a backend by name. `custom` is not resolvable this way since
    /// it needs a command; use `custom()` directly.
    pub fn from_name(name: &str) -> Result<Self, UnknownBackendError> {
        match name {
            "claude" => Ok(Self::claude()),
            "kiro" => Ok(Self::kiro()),
            "gemini" => Ok(Self::gemini()),
            "codex" => Ok(Self::codex()),
            "amp" => Ok(Self::amp()),
            "copilot" => Ok(Self::copilot()),
            "opencode" => Ok(Self::opencode()),
            other => Err(UnknownBackendError(other.to_string())),
        }
    }

    /// Builds `(command, args, stdin_payload)` for one invocation. `args`
    /// does NOT yet include engine-injected flags (model, extra_flags); the
    /// caller appends those last, per the flag-ordering rule in §4.2.
    pub fn build_command(&self, prompt: &str) -> (String, Vec<String>, Option<String>) {
        let mut args = self.base_args.clone();
        match self.prompt_mode {
            PromptMode::Arg => {
                if let Some(flag) = &self.prompt_flag {
                    args.push(flag.clone());
                }
                args.push(prompt.to_string());
                (self.command.clone(), args, None)
            }
            PromptMode::Stdin => (self.command.clone(), args, Some(prompt.to_string())),
        }
    }
}
