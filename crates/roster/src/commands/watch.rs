//! Watch command handler: stream monitor notifications to the terminal.

use std::time::Duration;

use roster_core::MonitorEvent;

use crate::cli::{GlobalOpts, WatchArgs};
use crate::engine::Engine;
use crate::error::CliError;

pub async fn handle(engine: &Engine, args: WatchArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let mut events = engine.monitor.events();
    engine.monitor.start().await?;

    if !global.quiet {
        let summary = engine.monitor.summary();
        eprintln!(
            "Watching {} accounts ({} online). Ctrl-C to stop.",
            summary.total, summary.online
        );
    }

    let deadline = args
        .duration_secs
        .map(|secs| tokio::time::Instant::now() + Duration::from_secs(secs));

    loop {
        let timeout = deadline.map_or(Duration::from_secs(3600), |d| {
            d.saturating_duration_since(tokio::time::Instant::now())
        });
        if deadline.is_some() && timeout.is_zero() {
            break;
        }

        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = tokio::time::sleep(timeout), if deadline.is_some() => break,
            event = events.recv() => {
                match event {
                    Ok(event) => print_event(engine, &event),
                    Err(_) => break,
                }
            }
        }
    }

    engine.monitor.stop().await;
    Ok(())
}

fn print_event(engine: &Engine, event: &MonitorEvent) {
    match event {
        MonitorEvent::StatusChanged { account_id } => {
            if let Some(status) = engine.monitor.store().get(account_id) {
                println!(
                    "{account_id}  {}  {}",
                    status.cookie_status,
                    status.nickname().unwrap_or("-")
                );
            } else {
                println!("{account_id}  (no cache entry)");
            }
        }
        MonitorEvent::AccountsExpired { names } => {
            println!("EXPIRED: {}", names.join(", "));
        }
        MonitorEvent::AccountRemoved { account_id } => {
            println!("{account_id}  removed (gone from cloud)");
        }
    }
}
