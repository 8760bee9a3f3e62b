//! Diagnose command - probe every candidate WebSocket address.

use console::style;

use park_core::config::ConfigHandle;
use park_core::error::ParkResult;
use park_stream::EndpointResolver;

use crate::OutputFormat;

pub async fn run(config: ConfigHandle, format: OutputFormat) -> ParkResult<()> {
    let cfg = config.snapshot().await;
    let resolver = EndpointResolver::new(&cfg);

    if format == OutputFormat::Text {
        println!("{}", style("Diagnose: WebSocket endpoints").bold().underlined());
        println!(
            "  Probing {} candidate(s), {}ms each...",
            resolver.candidates().len(),
            resolver.probe_timeout().as_millis()
        );
        println!();
    }

    let report = resolver.diagnose().await;

    match format {
        OutputFormat::Json => super::print_json(&report),
        OutputFormat::Text => {
            let mut table = super::new_table(vec!["#", "Address", "Result", "Time", "Error"]);
            for (i, result) in report.results.iter().enumerate() {
                let outcome = if result.success {
                    style("ok").green().to_string()
                } else if result.timed_out {
                    style("timeout").yellow().to_string()
                } else {
                    style("refused").red().to_string()
                };
                table.add_row(vec![
                    (i + 1).to_string(),
                    result.url.clone(),
                    outcome,
                    format!("{}ms", result.duration_ms),
                    super::truncate(result.error.as_deref().unwrap_or(""), 60),
                ]);
            }
            println!("{table}");
            println!(
                "\n  {} reachable, {} failed, {} total",
                style(report.successful).green().bold(),
                style(report.failed).red(),
                report.total
            );
            println!();
            for recommendation in &report.recommendations {
                println!("  {} {recommendation}", style("->").cyan());
            }
        }
    }

    Ok(())
}
