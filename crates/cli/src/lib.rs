pub mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use concierge_core::config::LoadOptions;

#[derive(Debug, Parser)]
#[command(
    name = "concierge",
    about = "Concierge operator CLI",
    long_about = "Inspect effective configuration, preview execution plans, and check answer grounding offline.",
    after_help = "Examples:\n  concierge config\n  concierge plan --intent intent.json --query \"compare x200 and x300\"\n  concierge ground --response answer.txt --evidence docs.json --query \"x200 price\""
)]
pub struct Cli {
    #[arg(long, global = true, help = "Explicit config file path (must exist)")]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(
        about = "Inspect effective configuration values with source attribution"
    )]
    Config,
    #[command(about = "Build the execution plan for a parsed intent and report plan validation")]
    Plan {
        #[arg(long, help = "Path to a ParsedIntent JSON document")]
        intent: PathBuf,
        #[arg(long, default_value = "", help = "Original query text passed to plan steps")]
        query: String,
    },
    #[command(about = "Validate a response against evidence documents and print the assessment")]
    Ground {
        #[arg(long, help = "Path to the response text")]
        response: PathBuf,
        #[arg(long, help = "Path to evidence JSON (array of documents or {\"documents\": [...]})")]
        evidence: PathBuf,
        #[arg(long, default_value = "", help = "Original user query")]
        query: String,
    },
}

impl Cli {
    pub fn load_options(&self) -> LoadOptions {
        LoadOptions {
            config_path: self.config.clone(),
            require_file: self.config.is_some(),
            ..LoadOptions::default()
        }
    }
}

pub fn run() -> ExitCode {
    execute(Cli::parse())
}

pub fn execute(cli: Cli) -> ExitCode {
    let options = cli.load_options();

    let result = match cli.command {
        Command::Config => commands::config::run(&options),
        Command::Plan { intent, query } => commands::plan::run(&options, &intent, &query),
        Command::Ground { response, evidence, query } => {
            commands::ground::run(&options, &response, &evidence, &query)
        }
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
