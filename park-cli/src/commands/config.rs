//! Config command - show or save the effective configuration.

use std::path::Path;

use console::style;

use park_core::config::ConfigHandle;
use park_core::error::{ParkError, ParkResult};

use crate::OutputFormat;

pub async fn run(
    config: ConfigHandle,
    path: &Path,
    save: bool,
    format: OutputFormat,
) -> ParkResult<()> {
    let cfg = config.snapshot().await;

    match format {
        OutputFormat::Json => super::print_json(&cfg),
        OutputFormat::Text => {
            let rendered = toml::to_string_pretty(&cfg)
                .map_err(|e| ParkError::Serialization(e.to_string()))?;
            println!("{}", style(format!("# {}", path.display())).dim());
            println!("{rendered}");
        }
    }

    if save {
        config.save_to(path).await?;
        if format == OutputFormat::Text {
            println!("  {} Config saved to {}", style("OK").green(), path.display());
        }
    }
    Ok(())
}
