//! `lorekeep run` — Run the whole pipeline for one client.

use anyhow::Context;
use lorekeep_config::AppConfig;
use lorekeep_core::pipeline::DataSource;

use super::services;

/// A `--source type:label` argument.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceArg {
    pub source_type: String,
    pub label: String,
}

/// Parse `type:label`. A bare `type` is its own label.
pub fn parse_source(raw: &str) -> Result<SourceArg, String> {
    let (kind, label) = raw.split_once(':').unwrap_or((raw, raw));
    let kind = kind.trim();
    if kind.is_empty() {
        return Err(format!("'{raw}' has no source type (expected type:label)"));
    }
    let label = label.trim();
    Ok(SourceArg {
        source_type: kind.to_lowercase(),
        label: if label.is_empty() { kind } else { label }.to_string(),
    })
}

pub async fn run(config: AppConfig, client_id: &str, sources: Vec<SourceArg>) -> anyhow::Result<()> {
    let services = services::build(&config)?;

    let sources: Vec<DataSource> = if sources.is_empty() {
        services.resolve_sources(client_id).await
    } else {
        sources
            .into_iter()
            .enumerate()
            .map(|(i, s)| DataSource::new(format!("cli-{}", i + 1), s.source_type, s.label))
            .collect()
    };

    println!("lorekeep pipeline for {client_id}");
    for source in &sources {
        println!("   {:<10} {}", source.source_type, source.label);
    }

    let outcome = services
        .orchestrator(client_id)
        .run(sources)
        .await
        .with_context(|| format!("pipeline failed for client {client_id}"))?;

    println!();
    println!("   Reports:              {}", outcome.reports);
    println!("   Tree nodes:           {}", outcome.tree_nodes);
    println!("   Open contradictions:  {}", outcome.open_contradictions);
    println!("   Entries written:      {}", outcome.entries_written);
    Ok(())
}
