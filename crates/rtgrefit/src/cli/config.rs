//! `rtgrefit config` - print the effective configuration.

use anyhow::Result;
use rtgrefit_sync::SyncConfig;

pub fn run(config: &SyncConfig, json: bool) -> Result<()> {
    if json {
        let value = serde_json::json!({
            "config_path": config.config_path().display().to_string(),
            "logs_dir": config.logs_dir().display().to_string(),
            "cache_dir": config.cache_dir().display().to_string(),
            "config": config,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    println!("# {}", config.config_path().display());
    print!("{}", config.to_toml()?);
    Ok(())
}
