//! `lorekeep config` — Show the effective configuration.

use lorekeep_config::AppConfig;

pub fn show(config: &AppConfig) -> anyhow::Result<()> {
    let path = std::env::var("LOREKEEP_CONFIG")
        .map(std::path::PathBuf::from)
        .unwrap_or_else(|_| AppConfig::config_dir().join("config.toml"));
    println!("Config file: {}{}", path.display(), if path.exists() { "" } else { " (not found, using defaults)" });
    println!();
    println!("   Model:          {} ({})", config.model.model, config.model.provider);
    println!("   Extractor:      {}", config.extractor.model);
    println!(
        "   Backend:        {}",
        if config.backend.url.is_empty() { "<not set>" } else { config.backend.url.as_str() }
    );
    println!(
        "   External tools: {}",
        if config.external_tools.is_active() { "active" } else { "inactive" }
    );
    println!("   Gateway:        {}:{}", config.gateway.host, config.gateway.port);
    println!("   Workspaces:     {}", config.sandbox.workspace_root().display());
    println!();
    println!("{config:#?}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_shows() {
        assert!(show(&AppConfig::default()).is_ok());
    }

    #[test]
    fn debug_output_redacts_secrets() {
        let mut config = AppConfig::default();
        config.model.api_key = Some("sk-ant-very-secret".into());
        config.gateway.auth_token = Some("gateway-secret".into());
        let shown = format!("{config:#?}");
        assert!(!shown.contains("sk-ant-very-secret"));
        assert!(!shown.contains("gateway-secret"));
    }
}
