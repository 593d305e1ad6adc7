//! Workspace-bound tools: downloads, shell commands, file reads, listings
//! and package installs. Each handler holds the workspace of the agent it was built for.

use async_trait::async_trait;
use lorekeep_core::error::ToolError;
use lorekeep_core::tool::{required_str, ToolHandler, ToolOutput};
use lorekeep_security::{CommandGate, Workspace};
use regex_lite::Regex;
use serde_json::Value;
use std::sync::Arc;

use crate::download::{DownloadFile, FileSource};
use crate::registry::HandlerRegistry;

/// Numeric limits shared by the sandbox tools.
#[derive(Debug, Clone, Copy)]
pub struct SandboxLimits {
    pub default_timeout_secs: u64,
    pub install_timeout_secs: u64,
    pub output_char_cap: usize,
    pub read_char_cap: usize,
}

impl Default for SandboxLimits {
    fn default() -> Self {
        Self {
            default_timeout_secs: 60,
            install_timeout_secs: 120,
            output_char_cap: 10_000,
            read_char_cap: 50_000,
        }
    }
}

/// Register `download_file`, `run_command`, `read_local_file`,
/// `list_workspace` and `install_package`, all bound to `workspace`.
pub fn register_sandbox_tools(
    registry: &mut HandlerRegistry,
    workspace: Arc<Workspace>,
    gate: Arc<CommandGate>,
    limits: SandboxLimits,
    downloads: Option<FileSource>,
) {
    registry.register("download_file", DownloadFile::new(workspace.clone(), downloads));
    registry.register(
        "run_command",
        RunCommand {
            workspace: workspace.clone(),
            gate: gate.clone(),
            limits,
        },
    );
    registry.register(
        "read_local_file",
        ReadLocalFile {
            workspace: workspace.clone(),
            limits,
        },
    );
    registry.register(
        "list_workspace",
        ListWorkspace {
            workspace: workspace.clone(),
        },
    );
    registry.register(
        "install_package",
        InstallPackage {
            workspace,
            gate,
            limits,
        },
    );
}

fn truncate(text: &str, cap: usize) -> String {
    if text.chars().count() <= cap {
        return text.to_string();
    }
    let head: String = text.chars().take(cap).collect();
    format!("{head}\n... (truncated)")
}

pub struct RunCommand {
    workspace: Arc<Workspace>,
    gate: Arc<CommandGate>,
    limits: SandboxLimits,
}

#[async_trait]
impl ToolHandler for RunCommand {
    async fn call(&self, input: Value) -> Result<ToolOutput, ToolError> {
        let command = required_str(&input, "command")?;
        let timeout = input
            .get("timeout")
            .and_then(Value::as_u64)
            .unwrap_or(self.limits.default_timeout_secs);

        let outcome = self.gate.execute(command, self.workspace.root(), timeout).await;
        // -1: blocked, timed out or failed to launch
        if outcome.return_code == -1 && !outcome.success {
            return Err(ToolError::failed("run_command", outcome.stderr));
        }

        let mut output = outcome.stdout.clone();
        if !outcome.stderr.is_empty() {
            output.push_str(&format!("\n[stderr] {}", outcome.stderr));
        }
        if !outcome.success {
            output = format!("[exit code {}] {output}", outcome.return_code);
        }
        let output = truncate(&output, self.limits.output_char_cap);
        let output = output.trim();
        Ok(if output.is_empty() { "(no output)".into() } else { output.into() })
    }
}

pub struct ReadLocalFile {
    workspace: Arc<Workspace>,
    limits: SandboxLimits,
}

#[async_trait]
impl ToolHandler for ReadLocalFile {
    async fn call(&self, input: Value) -> Result<ToolOutput, ToolError> {
        let filepath = required_str(&input, "filepath")?;
        let max_chars = input
            .get("max_chars")
            .and_then(Value::as_u64)
            .map(|n| n as usize)
            .unwrap_or(self.limits.read_char_cap);

        self.workspace
            .resolve(filepath)
            .map_err(|_| ToolError::SandboxViolation("Filepath is outside the workspace".into()))?;
        let text = self
            .workspace
            .read_text(filepath, max_chars)
            .map_err(|e| ToolError::failed("read_local_file", e.to_string()))?;
        Ok(text.into())
    }
}

pub struct ListWorkspace {
    workspace: Arc<Workspace>,
}

#[async_trait]
impl ToolHandler for ListWorkspace {
    async fn call(&self, _input: Value) -> Result<ToolOutput, ToolError> {
        let files = self.workspace.list_files();
        if files.is_empty() {
            return Ok("Workspace is empty.".into());
        }
        let listing: Vec<Value> = files
            .iter()
            .map(|f| {
                serde_json::json!({
                    "path": f.path,
                    "size_bytes": f.size_bytes,
                    "mime_type": f.mime_type,
                })
            })
            .collect();
        let text = serde_json::to_string_pretty(&listing).map_err(|e| ToolError::failed("list_workspace", e.to_string()))?;
        Ok(ToolOutput::text(text).with_data(Value::from(files.len())))
    }
}

pub struct InstallPackage {
    workspace: Arc<Workspace>,
    gate: Arc<CommandGate>,
    limits: SandboxLimits,
}

fn package_pattern() -> Option<Regex> {
    Regex::new(r"^[A-Za-z0-9._\-\[\]=<>!~,]+$").ok()
}

#[async_trait]
impl ToolHandler for InstallPackage {
    async fn call(&self, input: Value) -> Result<ToolOutput, ToolError> {
        let package = required_str(&input, "package")?.trim();
        let valid = package_pattern().is_some_and(|re| re.is_match(package));
        if !valid {
            return Err(ToolError::InvalidArguments(format!("Invalid package specifier: '{package}'")));
        }

        let outcome = self
            .gate
            .execute(
                &format!("uv pip install --system {package}"),
                self.workspace.root(),
                self.limits.install_timeout_secs,
            )
            .await;
        if outcome.success {
            Ok(format!("Successfully installed {package}").into())
        } else {
            Err(ToolError::failed(
                "install_package",
                format!("Failed to install {package}: {}", outcome.stderr.trim()),
            ))
        }
    }
}
