//! Config command handlers: init, show, path.

use roster_config::Profile;

use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts};
use crate::error::CliError;

pub fn handle(args: ConfigArgs, global: &GlobalOpts) -> Result<(), CliError> {
    match args.command {
        ConfigCommand::Init {
            name,
            cloud_url,
            host_url,
            owner,
            push_url,
            push_auth_key_env,
            host_rate_per_sec,
        } => init(
            &name,
            Profile {
                cloud_url,
                host_url,
                owner,
                creator_filter: None,
                push_url,
                push_auth_key: None,
                push_auth_key_env,
                host_rate_per_sec,
                timeout: None,
                cache_ttl_secs: None,
            },
            global,
        ),
        ConfigCommand::Show => show(),
        ConfigCommand::Path => {
            println!("{}", roster_config::config_path().display());
            Ok(())
        }
    }
}

fn init(name: &str, profile: Profile, global: &GlobalOpts) -> Result<(), CliError> {
    // Validate before writing anything to disk.
    let mut cfg = roster_config::load_config_or_default();
    roster_config::profile_to_engine_config(&profile, &cfg.defaults)?;

    cfg.profiles.insert(name.to_owned(), profile);
    if cfg.default_profile.is_none() {
        cfg.default_profile = Some(name.to_owned());
    }
    roster_config::save_config(&cfg)?;

    if !global.quiet {
        eprintln!(
            "Profile '{name}' written to {}",
            roster_config::config_path().display()
        );
    }
    Ok(())
}

fn show() -> Result<(), CliError> {
    let cfg = roster_config::load_config_or_default();
    let rendered = toml::to_string_pretty(&cfg).map_err(|e| CliError::Validation {
        field: "config".into(),
        reason: e.to_string(),
    })?;
    println!("{rendered}");
    Ok(())
}
