//! Tool schemas offered to each agent role.

use lorekeep_core::provider::ToolDefinition;
use serde_json::{json, Value};

fn tool(name: &str, description: &str, properties: Value, required: &[&str]) -> ToolDefinition {
    ToolDefinition {
        name: name.into(),
        description: description.into(),
        parameters: json!({
            "type": "object",
            "properties": properties,
            "required": required,
        }),
    }
}

pub fn report_metrics() -> ToolDefinition {
    tool(
        "report_metrics",
        "Report what you found in this data source. Call this once when exploration is done.",
        json!({
            "summary": {"type": "string", "description": "Plain-language summary of the source"},
            "metrics": {
                "type": "object",
                "description": "Counts and lists, e.g. total_files, file_types, date_range, files",
            },
        }),
        &["summary"],
    )
}

pub fn check_forum() -> ToolDefinition {
    tool(
        "check_forum",
        "Search the agent forum for relevant past experiences",
        json!({
            "query": {"type": "string", "description": "Full-text search query"},
            "source_type": {"type": "string", "description": "Filter by source (gmail, drive, sheets)"},
            "phase": {"type": "string", "description": "Filter by phase (explore, structure, verify, use)"},
            "file_type": {"type": "string", "description": "Filter by file type (spreadsheet, pdf, email, document)"},
        }),
        &["query"],
    )
}

pub fn write_to_forum() -> ToolDefinition {
    tool(
        "write_to_forum",
        "Write a new entry to the agent forum sharing a discovery or solution",
        json!({
            "title": {"type": "string", "description": "Entry title"},
            "category": {"type": "string", "description": "Category (e.g. 'gmail', 'drive', 'sheets', 'general')"},
            "content": {"type": "string", "description": "Entry content"},
            "tags": {"type": "array", "items": {"type": "string"}, "description": "Tags"},
            "source_type": {"type": "string", "description": "Source type (gmail, drive, sheets)"},
            "phase": {"type": "string", "description": "Pipeline phase (explore, structure, verify, use)"},
            "file_type": {"type": "string", "description": "File type (spreadsheet, pdf, email, document)"},
        }),
        &["title", "category", "content"],
    )
}

/// Explorer tools. Source-specific tools come from the external integration.
pub fn explorer_tools() -> Vec<ToolDefinition> {
    vec![report_metrics(), check_forum(), write_to_forum()]
}

pub fn sandbox_tools() -> Vec<ToolDefinition> {
    vec![
        tool(
            "download_file",
            "Download a file from Google Drive into your workspace for processing",
            json!({
                "file_id": {"type": "string", "description": "Google Drive file ID"},
                "filename": {"type": "string", "description": "Filename to save as (defaults to the Drive filename)"},
            }),
            &["file_id"],
        ),
        tool(
            "run_command",
            "Run a shell command inside your private workspace. Pipes and redirects work. \
             Destructive or sandbox-escaping commands are refused.",
            json!({
                "command": {"type": "string", "description": "The shell command to execute"},
                "timeout": {"type": "integer", "description": "Seconds before the command is killed (default 60, max 300)"},
            }),
            &["command"],
        ),
        tool(
            "read_local_file",
            "Read a text file from your workspace",
            json!({
                "filepath": {"type": "string", "description": "Path relative to the workspace"},
                "max_chars": {"type": "integer", "description": "Maximum characters to return (default 50000)"},
            }),
            &["filepath"],
        ),
        tool(
            "list_workspace",
            "List files in your workspace with sizes and MIME types",
            json!({}),
            &[],
        ),
        tool(
            "install_package",
            "Install a Python package for use by run_command",
            json!({
                "package": {"type": "string", "description": "Package specifier, e.g. openpyxl or pandas==2.2"},
            }),
            &["package"],
        ),
    ]
}

fn contradiction_properties() -> Value {
    json!({
        "description": {"type": "string", "description": "What disagrees"},
        "source_a": {"type": "string"},
        "source_b": {"type": "string"},
        "value_a": {"type": "string"},
        "value_b": {"type": "string"},
    })
}

const CONTRADICTION_REQUIRED: &[&str] = &["description", "source_a", "source_b", "value_a", "value_b"];

pub fn structurer_tools() -> Vec<ToolDefinition> {
    vec![
        tool(
            "extract_content",
            "Extract content from a workspace file (PDF, image, spreadsheet) with a multimodal model",
            json!({
                "file_id": {"type": "string", "description": "File name or id as listed in the workspace"},
                "extraction_prompt": {"type": "string", "description": "What to extract from the file"},
            }),
            &["file_id", "extraction_prompt"],
        ),
        tool(
            "classify_relevance",
            "Classify how relevant a piece of content is to the business knowledge base",
            json!({
                "content": {"type": "string"},
                "context": {"type": "string", "description": "Business context"},
            }),
            &["content", "context"],
        ),
        tool(
            "add_contradiction",
            "Record a contradiction between two sources for human review",
            contradiction_properties(),
            CONTRADICTION_REQUIRED,
        ),
        tool(
            "message_master",
            "Send a note to the coordinating agent",
            json!({"message": {"type": "string"}}),
            &["message"],
        ),
        check_forum(),
        write_to_forum(),
    ]
}

pub fn define_knowledge_tree() -> ToolDefinition {
    tool(
        "define_knowledge_tree",
        "Define the knowledge tree. Parents must be listed before their children.",
        json!({
            "nodes": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "name": {"type": "string"},
                        "type": {"type": "string", "enum": ["domain", "skill", "entry_group"]},
                        "parent_name": {"type": "string", "description": "Name of the parent node; omit for roots"},
                        "readme": {"type": "string"},
                        "order": {"type": "integer"},
                    },
                    "required": ["name", "type"],
                },
            },
        }),
        &["nodes"],
    )
}

pub fn generate_questionnaire() -> ToolDefinition {
    tool(
        "generate_questionnaire",
        "Create a multiple-choice questionnaire resolving open contradictions",
        json!({
            "title": {"type": "string"},
            "questions": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "text": {"type": "string"},
                        "options": {"type": "array", "items": {"type": "string"}},
                        "contradiction_id": {"type": "string"},
                    },
                    "required": ["text", "options"],
                },
            },
        }),
        &["title", "questions"],
    )
}

pub fn knowledge_writer_tools() -> Vec<ToolDefinition> {
    vec![
        tool(
            "write_knowledge_entry",
            "Write one knowledge entry under a tree node",
            json!({
                "tree_node_id": {"type": "string"},
                "title": {"type": "string"},
                "content": {"type": "string"},
                "source_ref": {"type": "string", "description": "Where this came from"},
                "confidence": {"type": "number", "minimum": 0, "maximum": 1},
            }),
            &["tree_node_id", "title", "content", "confidence"],
        ),
        tool(
            "flag_contradiction",
            "Flag a contradiction discovered while writing entries",
            contradiction_properties(),
            CONTRADICTION_REQUIRED,
        ),
    ]
}
