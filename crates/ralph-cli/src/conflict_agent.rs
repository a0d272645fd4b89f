//! Bridges the synchronous `ConflictAgent` contract onto the async
//! `AgentAdapter` used everywhere else, so the same coding-agent process the
//! Iteration Engine drives can also be asked to merge a conflicted file.

use ralph_core::conflict_resolver::{ConflictAgent, ConflictAgentResponse};
use ralph_core::{AgentAdapter, AgentInvocation};
use std::path::PathBuf;
use std::time::Duration;

/// A CLI agent has no notion of confidence; a clean exit is treated as a
/// usable (if not certain) merge, comfortably above the default 0.7
/// threshold but still rejectable by a stricter config.
const ASSUMED_CONFIDENCE: f64 = 0.75;

pub struct BlockingConflictAgent<'a> {
    inner: &'a dyn AgentAdapter,
    cwd: PathBuf,
}

impl<'a> BlockingConflictAgent<'a> {
    pub fn new(inner: &'a dyn AgentAdapter, cwd: PathBuf) -> Self {
        Self { inner, cwd }
    }
}

impl<'a> ConflictAgent for BlockingConflictAgent<'a> {
    fn resolve(&self, prompt: &str, timeout: Duration) -> Result<ConflictAgentResponse, String> {
        let invocation = AgentInvocation {
            prompt: prompt.to_string(),
            cwd: self.cwd.clone(),
            timeout,
            max_output_bytes: 256 * 1024,
            extra_flags: Vec::new(),
            model: None,
        };
        let result = tokio::task::block_in_place(|| {
            tokio::runtime::Handle::current().block_on(self.inner.invoke(invocation))
        });
        if result.exit_code != Some(0) {
            return Err(format!("conflict agent exited with {:?}", result.exit_code));
        }
        Ok(ConflictAgentResponse {
            content: result.stdout,
            confidence: ASSUMED_CONFIDENCE,
        })
    }
}
