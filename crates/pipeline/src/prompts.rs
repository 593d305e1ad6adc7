//! System instructions and opening messages for each agent role.

use lorekeep_core::pipeline::{DataSource, PipelineState, TreeNode};
use lorekeep_core::provider::ToolDefinition;
use lorekeep_core::report::Contradiction;
use serde_json::Value;

/// A system prompt plus the first user message.
#[derive(Debug, Clone)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

pub fn explorer(source: &DataSource) -> Prompt {
    let kind = &source.source_type;
    let label = &source.label;
    Prompt {
        system: format!(
            "You are an explorer agent investigating a {kind} data source labeled \"{label}\".\n\
             Your goal is to discover what data is available, understand its structure, and report metrics.\n\
             List the files you find under metrics.files so they can be processed later.\n\
             You have a private workspace: use download_file to pull Drive files into it, then inspect them with run_command.\n\
             Be thorough but efficient. Use the tools to explore, then call report_metrics with your findings."
        ),
        user: format!("Explore the {kind} source '{label}' and report what you find."),
    }
}

pub fn knowledge_tree(state: &PipelineState) -> Prompt {
    let details: String = state
        .reports
        .iter()
        .map(|r| {
            format!(
                "\n--- {} ({}) ---\nMetrics: {}\nFindings: {}\n",
                r.agent_name,
                r.source_type,
                pretty(&r.metrics),
                pretty(&r.findings),
            )
        })
        .collect();
    Prompt {
        system: "You are the master orchestration agent for building a company knowledge base.\n\
                 Based on the exploration reports below, design a knowledge tree structure.\n\
                 Use the define_knowledge_tree tool to create the tree.\n\
                 The tree should have domain nodes (top level), skill nodes (categories), \
                 and entry_group nodes (leaf groups for actual entries).\n\
                 Make the tree comprehensive but not overly deep (max 3 levels).\n\
                 Base the structure on what was actually discovered in the data."
            .into(),
        user: format!(
            "Design a knowledge tree for this client based on exploration results.\n\n\
             Pipeline state:\n{}\n\nDetailed reports:\n{details}\n\n\
             Use define_knowledge_tree to create the tree structure.",
            state.summary()
        ),
    }
}

pub fn structurer(batch: &[Value], surface: &[ToolDefinition]) -> Prompt {
    let tool_list: String = surface.iter().map(|t| format!("  - {}\n", t.name)).collect();
    Prompt {
        system: format!(
            "You are a structurer agent responsible for extracting and classifying content \
             from business data sources (emails, files, spreadsheets).\n\n\
             ## Available Tools\n{tool_list}\n\
             ## Workflow\n\
             For each resource in your batch:\n\
             1. Fetch/read its content using the available tools\n\
             2. Classify its relevance using classify_relevance\n\
             3. If you find contradicting information between sources, report with add_contradiction\n\
             4. Share important discoveries on the forum\n\
             5. When done processing all resources, send a summary to the master via message_master\n\n\
             ## Rules\n\
             - Only use the tools listed above. They are the complete set available to you.\n\
             - Do NOT install SDK packages or look for credentials.\n\
             - Integration tools (GMAIL_, GOOGLEDRIVE_, GOOGLESHEETS_) are pre-authenticated; call them directly."
        ),
        user: format!(
            "Process the following {} resources, extract their content, classify relevance, \
             and report any contradictions you find.\n\nResources:\n{}",
            batch.len(),
            pretty(&batch),
        ),
    }
}

pub fn questionnaire(contradictions: &[Contradiction]) -> Prompt {
    Prompt {
        system: "You are the master orchestration agent. You need to generate a verification questionnaire \
                 for a human reviewer to resolve contradictions found in the company data.\n\
                 Use the generate_questionnaire tool to create a set of multiple-choice questions.\n\
                 Each question should clearly present the contradiction and offer options for resolution.\n\
                 Set contradiction_id on every question that resolves a contradiction with an id.\n\
                 Include an option for 'I don't know' or 'Both are correct in different contexts' when appropriate."
            .into(),
        user: format!(
            "Generate a verification questionnaire for the following {} contradictions.\n\n\
             Contradictions:\n{}\n\nUse generate_questionnaire to create the questions.",
            contradictions.len(),
            pretty(&contradictions),
        ),
    }
}

pub fn knowledge_writer(nodes: &[TreeNode], accumulated_knowledge: &str) -> Prompt {
    Prompt {
        system: "You are a knowledge writer agent responsible for populating a knowledge base.\n\
                 You have verified tree nodes and accumulated knowledge from previous pipeline phases.\n\
                 Your tools:\n\
                 - write_knowledge_entry: Write a knowledge entry to a specific tree node\n\
                 - flag_contradiction: Flag contradictions found during writing\n\n\
                 For each tree node, generate appropriate knowledge entries based on the accumulated data.\n\
                 Each entry should have:\n\
                 - tree_node_id: The ID of the tree node to attach to\n\
                 - title: A clear, descriptive title\n\
                 - content: Detailed, structured content\n\
                 - source_ref: Reference to the original data source (if known)\n\
                 - confidence: A score from 0 to 1 indicating confidence in the information\n\n\
                 Write entries that are factual, well-structured, and useful for business decision-making.\n\
                 If you encounter contradictory information, flag it with flag_contradiction.\n\
                 Process all tree nodes systematically."
            .into(),
        user: format!(
            "Write knowledge entries for the following tree nodes. Use the accumulated knowledge \
             from the explore and structure phases to generate entries.\n\n\
             Tree nodes:\n{}\n\nAccumulated knowledge:\n{accumulated_knowledge}",
            pretty(&nodes),
        ),
    }
}

fn pretty<T: serde::Serialize + ?Sized>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_default()
}
