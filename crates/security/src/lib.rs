//! Security module for lorekeep: command gating, path containment and
//! per-agent workspaces.
//!
//! Provides:
//! - **Command gate**: deny-list validation and scrubbed, time-boxed execution
//! - **Path validation**: containment of file access to a workspace root
//! - **Workspaces**: isolated scratch directories owned by one agent

pub mod command;
pub mod path;
pub mod workspace;

pub use command::{CommandGate, CommandOutcome, DEFAULT_TIMEOUT_SECS, MAX_TIMEOUT_SECS};
pub use path::{validate_in_workspace, PathValidationError};
pub use workspace::{WorkspaceFile, Workspace};
