//! Concrete `AgentAdapter` implementations: the catalog of known coding-agent
//! CLI backends (§4.2) and the process-spawning adapter that actually runs
//! them, streams their output, and maps the result to the `ralph-core`
//! contract.

pub mod cli_backend;
pub mod process_adapter;

pub use cli_backend::{CliBackend, PromptMode, UnknownBackendError};
pub use process_adapter::ProcessAgentAdapter;
