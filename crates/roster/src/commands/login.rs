//! Login (onboarding) command handler.
//!
//! Drives one onboarding session from the terminal: print each slot's
//! QR URL or shareable link, then follow push-driven progress until
//! every slot is terminal, the wait budget runs out, or Ctrl-C.

use std::time::Duration;

use roster_core::{CreateConfig, CreateItem, CreateState, LoginMethod, LoginWay, OnboardStep};

use crate::cli::{GlobalOpts, LoginArgs, LoginMethodArg, LoginWayArg};
use crate::engine::Engine;
use crate::error::CliError;

pub async fn handle(engine: &Engine, args: LoginArgs, global: &GlobalOpts) -> Result<(), CliError> {
    if args.count == 0 {
        return Err(CliError::Validation {
            field: "count".into(),
            reason: "at least one account is required".into(),
        });
    }

    let config = CreateConfig {
        login_method: match args.method {
            LoginMethodArg::Channels => LoginMethod::ChannelsHelper,
            LoginMethodArg::Shop => LoginMethod::ShopHelper,
        },
        login_way: match args.way {
            LoginWayArg::Qr => LoginWay::QrCode,
            LoginWayArg::Link => LoginWay::PermanentLink,
        },
        group_id: Some(args.group.clone()),
        remark: None,
        proxy: None,
    };

    let session = engine.onboarding();
    session.update_config(0, config.clone()).await?;
    for _ in 1..args.count {
        session.add_account(config.clone()).await?;
    }

    session.go_next().await?;
    print_login_material(&session.items().await, global);

    // Follow progress until done, timeout, or Ctrl-C.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(args.wait_secs);
    let mut last_states: Vec<CreateState> = Vec::new();

    loop {
        let items = session.items().await;
        report_transitions(&items, &mut last_states, global);

        if session.step() == OnboardStep::Done {
            break;
        }
        if tokio::time::Instant::now() >= deadline {
            if !global.quiet {
                eprintln!("Wait budget exhausted, abandoning pending slots");
            }
            session.force_complete().await;
            break;
        }

        tokio::select! {
            _ = tokio::time::sleep(Duration::from_millis(500)) => {}
            _ = tokio::signal::ctrl_c() => {
                if !global.quiet {
                    eprintln!("Interrupted, abandoning pending slots");
                }
                session.force_complete().await;
                break;
            }
        }
    }

    let success = session.success_count().await;
    let failed = session.failed_count().await;
    if failed > 0 {
        let cleaned = session.cleanup_unused_links().await;
        tracing::debug!(cleaned, "cloud placeholders cleaned up");
    }
    session.close().await;

    if !global.quiet {
        eprintln!("Onboarding finished: {success} succeeded, {failed} failed");
    }
    for item in session.items().await {
        if item.state == CreateState::Failed {
            if let Some(error) = &item.error {
                eprintln!("  slot {}: {error}", item.index + 1);
            }
        }
    }
    Ok(())
}

fn print_login_material(items: &[CreateItem], global: &GlobalOpts) {
    if global.quiet {
        return;
    }
    for item in items {
        match (&item.qr_url, &item.permanent_link) {
            (Some(qr), _) => {
                eprintln!("Slot {}: scan this QR URL to log in:", item.index + 1);
                eprintln!("  {qr}");
            }
            (None, Some(link)) => {
                eprintln!("Slot {}: share this login link:", item.index + 1);
                eprintln!("  {link}");
            }
            (None, None) => {
                eprintln!(
                    "Slot {}: no login material ({})",
                    item.index + 1,
                    item.error.as_deref().unwrap_or("pending")
                );
            }
        }
    }
}

fn report_transitions(items: &[CreateItem], last: &mut Vec<CreateState>, global: &GlobalOpts) {
    if global.quiet {
        last.clear();
        last.extend(items.iter().map(|i| i.state));
        return;
    }
    for item in items {
        let previous = last.get(item.index).copied();
        if previous != Some(item.state) && previous.is_some() {
            let who = item
                .account_info
                .as_ref()
                .map_or("", |info| info.nickname.as_str());
            eprintln!("Slot {}: {} {}", item.index + 1, item.state, who);
        }
    }
    last.clear();
    last.extend(items.iter().map(|i| i.state));
}
