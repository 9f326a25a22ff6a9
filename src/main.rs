//! vtrim command-line entry point
//!
//! # Usage
//!
//! ```bash
//! vtrim trim -i clip.mp4 -s 00:05 -e 00:12.500
//! vtrim edit -i clip.mp4 -s 5 -e 12 --rect 100,40,640,360 --surface 1280x720
//! vtrim compress -i clip.mp4 --size 640x360 -q low
//! vtrim inspect -i clip.mp4 --json
//! ```

use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info};

use vtrim::adapters::VtrimConfig;
use vtrim::cli::commands::{self, exit_code, AppContext};
use vtrim::cli::{Cli, Commands};
use vtrim::utils::logging::init_logging;

fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::from(1)
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    let mut config = VtrimConfig::load(cli.config.as_deref())?;
    if let Some(level) = &cli.log_level {
        config.log_level = level.parse()?;
    }
    if let Some(format) = &cli.log_format {
        config.log_format = format.parse()?;
    }
    init_logging(&config.logging())?;
    info!("Starting vtrim {}", env!("CARGO_PKG_VERSION"));

    let ctx = AppContext {
        config,
        json: cli.json,
    };

    let status = match cli.command {
        Commands::Trim(args) => commands::trim(args, &ctx)?,
        Commands::Cut(args) => commands::cut(args, &ctx)?,
        Commands::Crop(args) => commands::crop(args, &ctx)?,
        Commands::Edit(args) => commands::edit(args, &ctx)?,
        Commands::Compress(args) => commands::compress(args, &ctx)?,
        Commands::Inspect(args) => {
            commands::inspect(args, &ctx)?;
            return Ok(ExitCode::SUCCESS);
        }
    };

    info!("Job finished: {:?}", status);
    Ok(exit_code(&status))
}
