use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use clap::Subcommand;
use env_logger::Env;
use log::{error, info};
use navwatch_cli::commands::{self, status_line};
use navwatch_cli::config::Config;
use navwatch_cli::error::CliError;
use navwatch_cli::tokio_tools::run_in_tokio;
use navwatch_cli::{NAME, VERSION};
use tokio_util::sync::CancellationToken;

#[derive(Subcommand)]
enum Commands {
    /// Validate the configuration
    Validate {},
    /// Run every health check once and print the results
    Check {
        /// Print the statuses as json
        #[arg(long)]
        json: bool,
    },
    /// Keep checking and log every status change
    Watch {},
    /// Watch and serve the statuses over http
    Serve {},
}

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Sets a custom config file
    #[arg(short, long, value_name = "FILE")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

fn run(command: Commands, config: Config) -> Result<ExitCode, CliError> {
    match command {
        Commands::Validate {} => {
            for line in commands::validate(&config)? {
                println!("{}", line);
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Check { json } => {
            commands::validate(&config)?;
            let report = run_in_tokio(commands::check(config))?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report.statuses)?);
            } else {
                for status in &report.statuses {
                    println!("{}", status_line(status));
                }
            }
            Ok(if report.all_online() {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(2)
            })
        }
        Commands::Watch {} => {
            run_in_tokio(commands::watch(config, CancellationToken::new()))?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Serve {} => {
            run_in_tokio(commands::serve(config, CancellationToken::new()))?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

pub fn main() -> ExitCode {
    let log_level = Env::default().default_filter_or("info");
    env_logger::Builder::from_env(log_level).init();

    let cli = Cli::parse();

    info!("{}:{} using config {:?}", NAME, VERSION, cli.config);

    let config = match Config::load(&cli.config) {
        Ok(config) => config,
        Err(err) => {
            error!("{}", err);
            return ExitCode::FAILURE;
        }
    };

    let Some(command) = cli.command else {
        println!("No command specified");
        return ExitCode::FAILURE;
    };

    match run(command, config) {
        Ok(code) => code,
        Err(err) => {
            error!("{}", err);
            ExitCode::FAILURE
        }
    }
}
