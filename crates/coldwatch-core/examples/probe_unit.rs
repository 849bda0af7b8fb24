//! Example: Probing a Unit
//!
//! This example probes one refrigeration controller the same way the
//! monitor does, then prints the interpreted status.
//!
//! Run with: `cargo run --example probe_unit -- <ADDRESS> [API_KEY]`

use std::env;
use std::sync::Arc;

use coldwatch_core::{DEFAULT_REQUEST_TIMEOUT, HttpTransport, UnitProber, interpret};
use coldwatch_types::UnitRecord;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let args: Vec<String> = env::args().collect();
    let Some(address) = args.get(1) else {
        eprintln!("Usage: {} <ADDRESS> [API_KEY]", args[0]);
        eprintln!();
        eprintln!("Example:");
        eprintln!("  {} 10.0.0.5 my-api-key", args[0]);
        std::process::exit(1);
    };
    let api_key = args.get(2).cloned().unwrap_or_default();

    let unit = UnitRecord::new(1, address.clone(), address.clone(), api_key);
    let prober = UnitProber::new(Arc::new(HttpTransport::new(DEFAULT_REQUEST_TIMEOUT)?));

    println!("Probing {}...", address);
    let outcome = prober.probe(&unit).await;

    println!();
    println!("Reachable:   {}", outcome.reachable);
    println!("Endpoint:    {}", outcome.endpoint_tried);
    if let Some(code) = outcome.http_status {
        println!("HTTP status: {}", code);
    }

    match interpret(&outcome) {
        Some(status) => {
            println!(
                "Mode:        {}",
                status.operating_mode.as_deref().unwrap_or("unknown")
            );
            for (name, value) in &status.sensors {
                println!("  {:<14} {:.1}", name, value);
            }
            if status.alarm_active {
                println!(
                    "Alarm:       {}",
                    status.alarm_description.as_deref().unwrap_or("active")
                );
            }
        }
        None => {
            println!(
                "Diagnostic:  {}",
                outcome.raw_body.as_deref().unwrap_or("no response")
            );
        }
    }

    Ok(())
}
