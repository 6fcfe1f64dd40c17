//! Clap derive structures for the `roster` CLI.
//!
//! Defines the complete command tree, global flags, and shared types.

use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// roster -- keep a pool of browser-automation accounts in sync
#[derive(Debug, Parser)]
#[command(
    name = "roster",
    version,
    about = "Manage a pool of social-commerce browser accounts",
    long_about = "Keeps browser-automation profiles and their cloud account records\n\
        in sync: push-driven status monitoring, bidirectional cookie sync,\n\
        and QR / permanent-link onboarding flows.",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Deployment profile to use
    #[arg(long, short = 'p', env = "ROSTER_PROFILE", global = true)]
    pub profile: Option<String>,

    /// Cloud backend URL (overrides profile)
    #[arg(long, env = "ROSTER_CLOUD_URL", global = true)]
    pub cloud_url: Option<String>,

    /// Local automation host URL (overrides profile)
    #[arg(long, env = "ROSTER_HOST_URL", global = true)]
    pub host_url: Option<String>,

    /// Tenant scope for every cloud call (overrides profile)
    #[arg(long, env = "ROSTER_OWNER", global = true)]
    pub owner: Option<String>,

    /// Output format
    #[arg(
        long,
        short = 'o',
        env = "ROSTER_OUTPUT",
        default_value = "table",
        global = true
    )]
    pub output: OutputFormat,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,

    /// Skip confirmation prompts
    #[arg(long, short = 'y', global = true)]
    pub yes: bool,
}

#[derive(Debug, Clone, ValueEnum)]
pub enum OutputFormat {
    /// Pretty table (default, interactive)
    Table,
    /// Pretty-printed JSON
    Json,
    /// Plain text, one value per line (scripting)
    Plain,
}

// ── Top-Level Command Enum ───────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Show account session status
    #[command(alias = "st")]
    Status(StatusArgs),

    /// Reconcile cookies between the host and the cloud
    Sync(SyncArgs),

    /// Onboard new accounts via QR code or shareable link
    Login(LoginArgs),

    /// Stream status change notifications
    Watch(WatchArgs),

    /// Remove an account locally and from the cloud
    #[command(alias = "rm")]
    Remove(RemoveArgs),

    /// Manage configuration profiles
    Config(ConfigArgs),
}

// ── Status ───────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct StatusArgs {
    /// Show one account instead of the whole pool
    pub account_id: Option<String>,

    /// Print aggregate counts only
    #[arg(long)]
    pub summary: bool,
}

// ── Sync ─────────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct SyncArgs {
    /// Sync one account instead of every profile
    pub account_id: Option<String>,

    /// Pull cloud cookies unconditionally, even when both sides match
    #[arg(long, short = 'f')]
    pub force: bool,

    /// Only align local profile names with cloud nicknames
    #[arg(long)]
    pub names: bool,
}

// ── Login ────────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct LoginArgs {
    /// Number of accounts to onboard (max 10)
    #[arg(long, short = 'n', default_value = "1")]
    pub count: usize,

    /// Account kind to log in
    #[arg(long, default_value = "channels")]
    pub method: LoginMethodArg,

    /// Login flow
    #[arg(long, default_value = "qr")]
    pub way: LoginWayArg,

    /// Host profile group for the new profiles
    #[arg(long, short = 'g')]
    pub group: String,

    /// Give up on slots still pending after this many seconds
    #[arg(long, default_value = "300")]
    pub wait_secs: u64,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum LoginMethodArg {
    /// Channels creator console
    Channels,
    /// Shop talent console
    Shop,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum LoginWayArg {
    /// Ephemeral QR code, scanned from this terminal
    Qr,
    /// Shareable permanent link
    Link,
}

// ── Watch ────────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct WatchArgs {
    /// Exit after this many seconds (default: run until Ctrl-C)
    #[arg(long)]
    pub duration_secs: Option<u64>,
}

// ── Remove ───────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct RemoveArgs {
    /// Account / profile id to remove
    pub account_id: String,
}

// ── Config ───────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Create or update a profile
    Init {
        /// Profile name
        #[arg(long, default_value = "default")]
        name: String,

        /// Cloud backend URL
        #[arg(long)]
        cloud_url: String,

        /// Local automation host URL
        #[arg(long, default_value = "http://127.0.0.1:54345/")]
        host_url: String,

        /// Tenant scope for cloud calls
        #[arg(long)]
        owner: String,

        /// Push channel WebSocket endpoint
        #[arg(long)]
        push_url: Option<String>,

        /// Env variable holding the push bearer token
        #[arg(long)]
        push_auth_key_env: Option<String>,

        /// Host API budget in requests per second (2 or 8)
        #[arg(long)]
        host_rate_per_sec: Option<u32>,
    },

    /// Print the active configuration
    Show,

    /// Print the configuration file path
    Path,
}
