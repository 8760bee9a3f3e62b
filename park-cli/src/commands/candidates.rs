//! Candidates command - list endpoint candidates without probing them.

use park_core::config::ConfigHandle;
use park_core::error::ParkResult;
use park_stream::candidate_urls;

use crate::OutputFormat;

pub async fn run(config: ConfigHandle, format: OutputFormat) -> ParkResult<()> {
    let urls = candidate_urls(&config.read().await.server);

    match format {
        OutputFormat::Json => super::print_json(&urls),
        OutputFormat::Text => {
            if urls.is_empty() {
                println!("No candidate endpoints. Check server.base_url in the config.");
            }
            for (i, url) in urls.iter().enumerate() {
                println!("  {:>2}. {url}", i + 1);
            }
        }
    }
    Ok(())
}
