mod cmd;
mod output;

use clap::{Parser, Subcommand};
use claimfee_core::geometry::Cuboid;
use cmd::config::ConfigSubcommand;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "claimfee",
    about = "Price region claims by the new volume they add, and replay confirmation sessions",
    version,
    propagate_version = true
)]
struct Cli {
    /// Config file (default: built-in defaults)
    #[arg(long, global = true, env = "CLAIMFEE_CONFIG")]
    config: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    /// Log at debug level (RUST_LOG still takes precedence per target)
    #[arg(long, global = true, short = 'v')]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Price a claim or redefinition against a set of existing regions
    Quote {
        /// World file listing the regions already registered
        #[arg(long)]
        world: Option<PathBuf>,

        /// Selection as x1,y1,z1,x2,y2,z2
        #[arg(long = "box", value_name = "COORDS", allow_hyphen_values = true)]
        bounds: Cuboid,

        /// Price a redefinition of this region instead of a new claim
        #[arg(long)]
        redefine: Option<String>,

        /// Price tier the actor holds (repeatable)
        #[arg(long = "tier")]
        tiers: Vec<String>,
    },

    /// Replay a scripted quote/confirm/settle session
    Simulate {
        /// Scenario file
        scenario: PathBuf,
    },

    /// Inspect the configuration
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::WARN
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config_path = cli.config.as_deref();

    let result = match cli.command {
        Commands::Quote {
            world,
            bounds,
            redefine,
            tiers,
        } => cmd::quote::run(
            config_path,
            cmd::quote::QuoteRequest {
                world: world.as_deref(),
                bounds,
                redefine: redefine.as_deref(),
                tiers: &tiers,
            },
            cli.json,
        ),
        Commands::Simulate { scenario } => cmd::simulate::run(config_path, &scenario, cli.json),
        Commands::Config { subcommand } => cmd::config::run(config_path, subcommand, cli.json),
    };

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
