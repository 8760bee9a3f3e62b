//! Watch command - stream vehicle events to the terminal.

use chrono::Local;
use console::style;
use serde_json::json;

use park_core::config::{AppConfig, ConfigHandle};
use park_core::error::{ParkError, ParkResult};
use park_stream::{ConnectionManager, ConnectionState, StreamEvent, Topic, VehicleEvent};

use crate::OutputFormat;

/// Run the watch command.
pub async fn run(
    config: ConfigHandle,
    url: Option<String>,
    limit: usize,
    format: OutputFormat,
) -> ParkResult<()> {
    if let Some(url) = url {
        let url = AppConfig::sanitize_base_url(&url);
        if url.is_empty() {
            return Err(ParkError::MissingConfig("backend url".into()));
        }
        config.write().await.server.base_url = url;
    }
    let cfg = config.snapshot().await;

    let manager = ConnectionManager::new(&cfg);
    let (_subscriptions, mut events) = manager.bus().forward_to_channel(&Topic::ALL);
    let text = format == OutputFormat::Text;

    if text {
        println!(
            "{} Resolving endpoint for {} ({} candidate(s))...",
            style("[1/2]").bold().dim(),
            cfg.server.base_url,
            manager.candidates().len()
        );
    }

    if let Err(e) = manager.connect().await {
        if manager.state() == ConnectionState::Failed {
            if text {
                println!("  {} {e}", style("FAIL").red().bold());
                println!("  Run `parkstream diagnose` for a per-address report.");
            }
            return Err(e);
        }
        if text {
            println!("  {} {e} (retrying)", style("WARN").yellow().bold());
        }
    }

    if text {
        println!(
            "{} Listening for vehicle events... (Ctrl+C to stop)",
            style("[2/2]").bold().dim(),
        );
        println!();
    }

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                match format {
                    OutputFormat::Text => print_event_text(&event),
                    OutputFormat::Json => println!("{}", event_json(&event)),
                }
                if matches!(event.error(), Some(ParkError::ReconnectExhausted { .. })) {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                if text {
                    println!("\n  Disconnecting...");
                }
                manager.disconnect().await;
                break;
            }
        }
    }

    let records = manager.latest_records(limit);
    let status = manager.connection_status().await;
    match format {
        OutputFormat::Json => {
            let records: Vec<&VehicleEvent> = records.iter().map(|r| r.as_ref()).collect();
            let summary = json!({
                "status": status,
                "records": records,
            });
            super::print_json(&summary);
        }
        OutputFormat::Text => {
            println!();
            if records.is_empty() {
                println!("No vehicle records received.");
            } else {
                print_records_table(&records);
            }
            println!(
                "\nState: {}  Records kept: {}",
                style(status.state).bold(),
                status.record_count
            );
        }
    }

    Ok(())
}

fn print_event_text(event: &StreamEvent) {
    match event {
        StreamEvent::CarIn(v) => print_vehicle(style("[in] ").green().bold().to_string(), v),
        StreamEvent::CarOut(v) => print_vehicle(style("[out]").yellow().bold().to_string(), v),
        // Already shown as in/out.
        StreamEvent::RecordAdded(_) => {}
        StreamEvent::Connected {
            endpoint: Some(endpoint),
            ..
        } => println!("  {} Connected to {endpoint}", style("OK").green().bold()),
        StreamEvent::Connected { ack, .. } => {
            let content = ack
                .as_ref()
                .and_then(|a| a.get("content"))
                .and_then(|c| c.as_str())
                .unwrap_or("acknowledged");
            println!("  {} Handshake: {content}", style("OK").green());
        }
        StreamEvent::Disconnected { reason } => {
            println!("  {} Disconnected: {reason}", style("WARN").yellow().bold())
        }
        StreamEvent::Error(e) => println!(
            "  {} {} {e}",
            style("ERR").red().bold(),
            style(format!("[{}]", e.kind())).dim()
        ),
        StreamEvent::Heartbeat(_) => println!("  {}", style("heartbeat").dim()),
        StreamEvent::Message(body) => println!("  {} {body}", style("[message]").cyan()),
    }
}

fn print_vehicle(tag: String, v: &VehicleEvent) {
    println!(
        "  {tag} {}  {}  {}  {}  {}",
        style(v.plate_or_placeholder()).bold(),
        v.channel,
        v.vehicle_kind,
        v.vip_label,
        v.occurred_at.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S")
    );
}

/// JSON line for one event: `{"topic": ..., "payload": ...}`.
fn event_json(event: &StreamEvent) -> serde_json::Value {
    let payload = match event {
        StreamEvent::CarIn(v) | StreamEvent::CarOut(v) | StreamEvent::RecordAdded(v) => {
            serde_json::to_value(v.as_ref()).unwrap_or_default()
        }
        StreamEvent::Connected { endpoint, ack } => json!({ "endpoint": endpoint, "ack": ack }),
        StreamEvent::Disconnected { reason } => json!({ "reason": reason }),
        StreamEvent::Error(e) => json!({ "kind": e.kind(), "message": e.to_string() }),
        StreamEvent::Heartbeat(body) | StreamEvent::Message(body) => body.clone(),
    };
    json!({ "topic": event.topic().as_str(), "payload": payload })
}

fn print_records_table(records: &[std::sync::Arc<VehicleEvent>]) {
    let mut table = super::new_table(vec![
        "#", "Plate", "Direction", "Kind", "Channel", "VIP", "Yard", "Time",
    ]);
    for record in records {
        table.add_row(vec![
            record.id.to_string(),
            record.plate_or_placeholder().to_string(),
            record.direction.to_string(),
            record.vehicle_kind.to_string(),
            super::truncate(&record.channel, 20),
            super::truncate(&record.vip_label, 12),
            record.yard_code.clone(),
            record
                .occurred_at
                .with_timezone(&Local)
                .format("%Y-%m-%d %H:%M:%S")
                .to_string(),
        ]);
    }
    println!("{table}");
}
