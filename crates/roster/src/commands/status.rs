//! Status command handler.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tabled::Tabled;

use roster_core::{AccountId, CachedStatus, StatusSummary};

use crate::cli::{GlobalOpts, StatusArgs};
use crate::engine::Engine;
use crate::error::CliError;
use crate::output;

// ── Table row ───────────────────────────────────────────────────────

#[derive(serde::Serialize)]
struct StatusEntry {
    account_id: AccountId,
    #[serde(flatten)]
    status: CachedStatus,
}

#[derive(Tabled)]
struct StatusRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Nickname")]
    nickname: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Last Check")]
    last_check: String,
    #[tabled(rename = "Last Valid")]
    last_valid: String,
}

impl From<&StatusEntry> for StatusRow {
    fn from(entry: &StatusEntry) -> Self {
        Self {
            id: entry.account_id.to_string(),
            nickname: entry.status.nickname().unwrap_or("-").to_owned(),
            status: entry.status.cookie_status.to_string(),
            last_check: fmt_time(Some(entry.status.last_check_time)),
            last_valid: fmt_time(entry.status.last_valid_time),
        }
    }
}

fn fmt_time(time: Option<DateTime<Utc>>) -> String {
    time.map_or_else(|| "-".into(), |t| t.format("%Y-%m-%d %H:%M").to_string())
}

// ── Handler ─────────────────────────────────────────────────────────

pub async fn handle(engine: &Engine, args: StatusArgs, global: &GlobalOpts) -> Result<(), CliError> {
    if let Some(raw_id) = args.account_id {
        return single(engine, &AccountId::from(raw_id.as_str()), global).await;
    }

    // Reconciliation pass populates the cache from host + cloud.
    engine.monitor.sync_all_status().await?;

    if args.summary {
        let summary = engine.monitor.summary();
        let out = output::render_single(&global.output, &summary, summary_detail, |s| {
            format!("{}/{} online", s.online, s.total)
        });
        output::print_output(&out, global.quiet);
        return Ok(());
    }

    let mut entries: Vec<StatusEntry> = engine
        .monitor
        .store()
        .snapshot()
        .iter()
        .map(|(id, status)| StatusEntry {
            account_id: id.clone(),
            status: CachedStatus::clone(status),
        })
        .collect();
    entries.sort_by(|a, b| a.account_id.cmp(&b.account_id));

    let out = output::render_list(&global.output, &entries, StatusRow::from, |e| {
        e.account_id.to_string()
    });
    output::print_output(&out, global.quiet);
    Ok(())
}

async fn single(engine: &Engine, id: &AccountId, global: &GlobalOpts) -> Result<(), CliError> {
    engine.monitor.ensure_subscribed(id, None);
    engine.monitor.refresh(id).await?;

    let Some(status) = engine.monitor.get_status(id) else {
        return Err(CliError::NotFound {
            identifier: id.to_string(),
        });
    };

    let entry = StatusEntry {
        account_id: id.clone(),
        status: Arc::unwrap_or_clone(status),
    };
    let out = output::render_single(&global.output, &entry, entry_detail, |e| {
        e.account_id.to_string()
    });
    output::print_output(&out, global.quiet);
    Ok(())
}

fn entry_detail(entry: &StatusEntry) -> String {
    let status = &entry.status;
    let mut lines = vec![
        format!("Account:     {}", entry.account_id),
        format!("Nickname:    {}", status.nickname().unwrap_or("-")),
        format!("Status:      {}", status.cookie_status),
        format!("Method:      {}", status.login_method()),
        format!("Last check:  {}", fmt_time(Some(status.last_check_time))),
        format!("Last valid:  {}", fmt_time(status.last_valid_time)),
        format!("Cookie sync: {}", fmt_time(status.cookie_updated_at)),
    ];
    if let Some(url) = &status.channels_jump_url {
        lines.push(format!("Console:     {url}"));
    }
    if status.check_error_count > 0 {
        lines.push(format!("Check errors: {}", status.check_error_count));
    }
    lines.join("\n")
}

fn summary_detail(summary: &StatusSummary) -> String {
    format!(
        "Accounts: {}\nOnline:   {}\nOffline:  {}\nChecking: {}\nPending:  {}\nLast sync: {}",
        summary.total,
        summary.online,
        summary.offline,
        summary.checking,
        summary.pending,
        fmt_time(summary.last_sync_time),
    )
}
