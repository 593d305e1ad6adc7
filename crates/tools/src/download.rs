//! `download_file`: pull a Drive file through the external integration and
//! stage it in the agent's workspace, where `run_command`, `read_local_file`
//! and `extract_content` can reach it.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use lorekeep_core::error::ToolError;
use lorekeep_core::tool::{ExternalToolProvider, ToolHandler, ToolOutput, optional_str, required_str};
use lorekeep_security::Workspace;
use lorekeep_security::workspace::detect_mime;
use serde_json::{Value, json};
use tracing::debug;

/// Integration tool that returns a Drive file's content.
pub const DRIVE_DOWNLOAD_TOOL: &str = "GOOGLEDRIVE_DOWNLOAD_FILE";

/// Where downloads come from: the external integration, acting as one user.
#[derive(Clone)]
pub struct FileSource {
    pub provider: Arc<dyn ExternalToolProvider>,
    pub user_id: String,
}

pub struct DownloadFile {
    workspace: Arc<Workspace>,
    source: Option<FileSource>,
    client: reqwest::Client,
}

impl DownloadFile {
    pub fn new(workspace: Arc<Workspace>, source: Option<FileSource>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            workspace,
            source,
            client,
        }
    }

    async fn fetch(&self, source: &FileSource, file_id: &str) -> Result<(Vec<u8>, Option<String>), ToolError> {
        let execution = source
            .provider
            .execute(&source.user_id, DRIVE_DOWNLOAD_TOOL, json!({ "file_id": file_id }))
            .await?;
        if !execution.successful {
            let reason = execution.error.unwrap_or_else(|| "unknown error".into());
            return Err(ToolError::failed("download_file", format!("Download of {file_id} failed: {reason}")));
        }

        // some integrations nest the payload one level down
        let payload = execution
            .data
            .get("downloaded_file_content")
            .filter(|v| v.is_object())
            .unwrap_or(&execution.data);
        let name = ["name", "file_name", "filename"]
            .iter()
            .find_map(|k| payload.get(*k).and_then(Value::as_str))
            .map(str::to_string);

        if let Some(encoded) = ["content", "file_content"]
            .iter()
            .find_map(|k| payload.get(*k).and_then(Value::as_str))
        {
            let bytes = STANDARD
                .decode(encoded.trim())
                .map_err(|e| ToolError::failed("download_file", format!("Invalid file content: {e}")))?;
            return Ok((bytes, name));
        }

        if let Some(url) = ["s3url", "url", "download_url"]
            .iter()
            .find_map(|k| payload.get(*k).and_then(Value::as_str))
        {
            let response = self
                .client
                .get(url)
                .send()
                .await
                .and_then(|r| r.error_for_status())
                .map_err(|e| ToolError::failed("download_file", format!("Fetching {file_id} failed: {e}")))?;
            let bytes = response
                .bytes()
                .await
                .map_err(|e| ToolError::failed("download_file", format!("Reading {file_id} failed: {e}")))?;
            return Ok((bytes.to_vec(), name));
        }

        Err(ToolError::failed("download_file", format!("No file content returned for {file_id}")))
    }
}

#[async_trait]
impl ToolHandler for DownloadFile {
    async fn call(&self, input: Value) -> Result<ToolOutput, ToolError> {
        let file_id = required_str(&input, "file_id")?.trim();
        let Some(source) = &self.source else {
            return Err(ToolError::failed("download_file", "No external integration is configured for downloads"));
        };

        let (bytes, remote_name) = self.fetch(source, file_id).await?;
        let requested = optional_str(&input, "filename").map(str::to_string);
        let filename = requested
            .or(remote_name)
            .as_deref()
            .and_then(|n| Path::new(n).file_name())
            .and_then(|n| n.to_str())
            .unwrap_or(file_id)
            .to_string();

        let staged = self
            .workspace
            .stage_file(&filename, &bytes)
            .map_err(|e| ToolError::failed("download_file", e.to_string()))?;
        let mime_type = detect_mime(&staged);
        debug!(file_id, file = %filename, bytes = bytes.len(), "Downloaded file into workspace");

        let summary = json!({
            "path": filename,
            "filename": filename,
            "size_bytes": bytes.len(),
            "mime_type": mime_type,
        });
        Ok(ToolOutput::text(summary.to_string()).with_data(summary))
    }
}
