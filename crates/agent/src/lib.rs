//! The agent execution core.
//!
//! An agent is one [`ToolCallingLoop`] run bound to a role:
//!
//! 1. **Ask** the model with the full conversation and the role's tool surface
//! 2. **Intercept** report-style tools through the role's [`RoleHook`]
//! 3. **Dispatch** everything else through the agent's own dispatcher
//! 4. **Append** one tool-results turn and check the [`LoopDetector`]
//!
//! The run ends when the model stops asking for tools, when the detector
//! reports repetition, or when the turn budget runs out.

pub mod engine;
pub mod hooks;
pub mod loop_detection;

pub use engine::{LoopRequest, ToolCallingLoop};
pub use hooks::{CoordinatorHook, ExplorerHook, Intercept, NoHook, RoleHook, StructurerHook, WriterHook};
pub use loop_detection::{LoopDetector, fingerprint, normalize_command};
