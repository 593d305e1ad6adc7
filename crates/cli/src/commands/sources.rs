//! `lorekeep sources` — List a client's data sources.

use lorekeep_config::AppConfig;
use lorekeep_core::Backend;

use super::services;

pub async fn run(config: AppConfig, client_id: &str) -> anyhow::Result<()> {
    let backend = services::backend(&config)?;
    let sources = backend.data_sources(client_id).await;

    if sources.is_empty() {
        println!("No data sources registered for {client_id}. A run would use the defaults:");
        for source in &config.pipeline.default_sources {
            println!("   {:<10} {}", source.source_type, source.label);
        }
        return Ok(());
    }

    println!("Data sources for {client_id}:");
    for source in &sources {
        println!("   {:<10} {:<24} ({})", source.source_type, source.label, source.id);
    }
    Ok(())
}
