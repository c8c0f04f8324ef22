mod cli;
mod commands;
mod output;

use std::process;

use clap::Parser;
use tracing::{Level, error};
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use crate::cli::{Args, Commands, OutputFormat};
use crate::commands::CommandExecutor;

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let output_format = args.output_format();

    if let Err(e) = run(args).await {
        match output_format {
            Some(OutputFormat::Json) => {
                let error_json = serde_json::json!({
                    "status": "error",
                    "message": e.to_string(),
                });
                println!("{}", serde_json::to_string(&error_json).unwrap());
            }
            _ => {
                error!("Application error: {}", e);
                eprintln!("Error: {e:#}");
            }
        }
        process::exit(1);
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    // Pretty output owns the terminal; logging joins only when asked for.
    if args.output_format() != Some(OutputFormat::Pretty) || args.verbose {
        init_logging(args.verbose, args.quiet)?;
    }

    let executor = CommandExecutor::new(args.state_dir, args.out_dir);

    match args.command {
        Commands::Resolve { selection, output } => executor.resolve(selection, output).await?,
        Commands::Download {
            selection,
            quality,
            output,
        } => executor.download(selection, quality, output).await?,
        Commands::Jobs { output } => executor.jobs(output).await?,
        Commands::Progress { action } => executor.progress(action).await?,
    }

    Ok(())
}

fn init_logging(verbose: bool, quiet: bool) -> anyhow::Result<()> {
    let filter = if quiet {
        EnvFilter::new("error")
    } else if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env().add_directive(Level::INFO.into())
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).with_level(verbose))
        .init();
    Ok(())
}
