use crate::cmd::load_config;
use crate::output::{print_json, print_table};
use anyhow::Context;
use clap::Subcommand;
use claimfee_core::config::{Config, WarnLevel};
use claimfee_core::pricing::permission_node;
use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// Subcommand types
// ---------------------------------------------------------------------------

#[derive(Subcommand)]
pub enum ConfigSubcommand {
    /// Write a config file with the default settings
    Init {
        /// Where to write it
        path: PathBuf,
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Show the effective settings and price tiers
    Show,

    /// Validate the config for common mistakes
    Validate,
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

pub fn run(config: Option<&Path>, subcmd: ConfigSubcommand, json: bool) -> anyhow::Result<()> {
    match subcmd {
        ConfigSubcommand::Init { path, force } => init(&path, force),
        ConfigSubcommand::Show => show(config, json),
        ConfigSubcommand::Validate => validate(config, json),
    }
}

// ---------------------------------------------------------------------------
// init
// ---------------------------------------------------------------------------

fn init(path: &Path, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        anyhow::bail!("{} already exists (use --force to overwrite)", path.display());
    }
    Config::default()
        .save(path)
        .with_context(|| format!("failed to write {}", path.display()))?;
    println!("Wrote default config to {}", path.display());
    Ok(())
}

// ---------------------------------------------------------------------------
// show
// ---------------------------------------------------------------------------

fn show(path: Option<&Path>, json: bool) -> anyhow::Result<()> {
    let config = load_config(path)?;
    let economy = &config.economy;

    if json {
        let tiers: serde_json::Map<String, serde_json::Value> = economy
            .price_tiers()
            .into_iter()
            .map(|(name, tier)| {
                (
                    name.clone(),
                    serde_json::json!({
                        "permission": permission_node(&name),
                        "horizontal": tier.horizontal,
                        "vertical": tier.vertical,
                    }),
                )
            })
            .collect();
        let value = serde_json::json!({
            "config": config,
            "tiers": tiers,
        });
        return print_json(&value);
    }

    println!(
        "Economy:              {}",
        if economy.enabled { "enabled" } else { "disabled" }
    );
    println!(
        "Confirmation timeout: {}s",
        economy.confirmation_timeout_seconds
    );
    println!(
        "Minimum size:         {} wide, {} tall",
        config.limits.min_horizontal, config.limits.min_vertical
    );
    println!();

    let default_tier = economy.default_tier();
    let mut rows = vec![vec![
        "(default)".to_string(),
        "-".to_string(),
        default_tier.horizontal.to_string(),
        default_tier.vertical.to_string(),
    ]];
    for (name, tier) in economy.price_tiers() {
        rows.push(vec![
            permission_node(&name),
            name,
            tier.horizontal.to_string(),
            tier.vertical.to_string(),
        ]);
    }
    print_table(&["PERMISSION", "TIER", "HORIZONTAL", "VERTICAL"], rows);

    if !economy.enabled {
        println!();
        println!("Claims are not charged while the economy is disabled.");
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// validate
// ---------------------------------------------------------------------------

fn validate(path: Option<&Path>, json: bool) -> anyhow::Result<()> {
    let Some(path) = path else {
        anyhow::bail!("no config file given (use --config or CLAIMFEE_CONFIG)");
    };
    let config = load_config(Some(path))?;
    let warnings = config.validate();

    if json {
        let value = serde_json::json!({
            "warnings": warnings,
        });
        print_json(&value)?;
    } else if warnings.is_empty() {
        println!("Config is valid. No warnings.");
    } else {
        for w in &warnings {
            let prefix = match w.level {
                WarnLevel::Warning => "warning",
                WarnLevel::Error => "error",
            };
            println!("[{prefix}] {}", w.message);
        }
    }

    let has_errors = warnings.iter().any(|w| w.level == WarnLevel::Error);
    if has_errors {
        anyhow::bail!("config validation found errors");
    }

    Ok(())
}
