//! `lorekeep serve` — Start the HTTP gateway.

use lorekeep_config::AppConfig;

use super::services;

pub async fn run(mut config: AppConfig, host: Option<String>, port: Option<u16>) -> anyhow::Result<()> {
    if let Some(host) = host {
        config.gateway.host = host;
    }
    if let Some(port) = port {
        config.gateway.port = port;
    }

    let services = services::build(&config)?;

    println!("lorekeep gateway");
    println!("   Listening: {}:{}", config.gateway.host, config.gateway.port);
    println!(
        "   Auth:      {}",
        if config.gateway.auth_token.is_some() { "bearer token" } else { "none" }
    );

    lorekeep_gateway::serve(services, &config.gateway).await?;
    Ok(())
}
