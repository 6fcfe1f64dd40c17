//! Sync command handler.

use tabled::Tabled;

use roster_core::sync::SyncedAccount;
use roster_core::{AccountId, FullSyncReport};

use crate::cli::{GlobalOpts, SyncArgs};
use crate::engine::Engine;
use crate::error::CliError;
use crate::output;

// ── Table row ───────────────────────────────────────────────────────

#[derive(Tabled)]
struct SyncedRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Nickname")]
    nickname: String,
    #[tabled(rename = "Action")]
    action: String,
}

impl From<&SyncedAccount> for SyncedRow {
    fn from(s: &SyncedAccount) -> Self {
        Self {
            id: s.account_id.to_string(),
            nickname: s.nickname.clone(),
            action: s.action.to_string(),
        }
    }
}

// ── Handler ─────────────────────────────────────────────────────────

pub async fn handle(engine: &Engine, args: SyncArgs, global: &GlobalOpts) -> Result<(), CliError> {
    if args.names {
        return names(engine, global).await;
    }

    if let Some(raw_id) = args.account_id {
        return single(engine, &AccountId::from(raw_id.as_str()), args.force, global).await;
    }

    let report = engine
        .sync
        .full_sync(engine.config.creator_filter.as_deref())
        .await;
    print_report(&report, global);
    Ok(())
}

async fn single(
    engine: &Engine,
    id: &AccountId,
    force: bool,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let result = engine.sync.sync_single(id, force).await;

    if !result.success {
        return Err(CliError::ApiError {
            message: result
                .message
                .unwrap_or_else(|| "sync failed".into()),
            status: None,
        });
    }

    let out = output::render_single(
        &global.output,
        &result,
        |r| {
            format!(
                "{}: {}",
                r.action.map_or_else(|| "done".into(), |a| a.to_string()),
                r.message.as_deref().unwrap_or("")
            )
        },
        |r| r.action.map_or_else(String::new, |a| a.to_string()),
    );
    output::print_output(&out, global.quiet);
    Ok(())
}

async fn names(engine: &Engine, global: &GlobalOpts) -> Result<(), CliError> {
    let page = engine
        .limiter
        .run(|| {
            engine
                .host
                .list_profiles(0, 1000, engine.config.creator_filter.as_deref())
        })
        .await
        .map_err(roster_core::CoreError::from)?;

    let ids: Vec<AccountId> = page
        .list
        .iter()
        .map(|p| AccountId::from(p.id.as_str()))
        .collect();
    let report = engine.sync.sync_profile_names_from_cloud(&ids).await;

    if !global.quiet {
        eprintln!(
            "Names: {} updated, {} unchanged, {} failed",
            report.updated, report.skipped, report.failed
        );
    }
    Ok(())
}

fn print_report(report: &FullSyncReport, global: &GlobalOpts) {
    let out = output::render_list(&global.output, &report.synced, SyncedRow::from, |s| {
        s.account_id.to_string()
    });
    output::print_output(&out, global.quiet);

    if !global.quiet {
        eprintln!(
            "Synced {} profiles: {} pulled, {} pushed, {} skipped, {} failed",
            report.total,
            report.cloud_to_local,
            report.local_to_cloud,
            report.skipped,
            report.failed
        );
    }
}
