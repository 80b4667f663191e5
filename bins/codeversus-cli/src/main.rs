mod commands;
mod generator;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "codeversus-cli")]
#[command(about = "CodeVersus CLI - Manage problems, templates and language configuration", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List languages from languages.json
    ListLangs {
        /// Path to languages.json
        #[arg(short, long, default_value = "config/languages.json")]
        languages: PathBuf,
    },

    /// Load and validate every problem in the content directory
    Check {
        /// Content directory
        #[arg(short, long, default_value = "problems")]
        problems: PathBuf,

        /// Path to languages.json
        #[arg(short, long, default_value = "config/languages.json")]
        languages: PathBuf,
    },

    /// Splice user code into a problem template and print the program
    Assemble {
        /// Content directory
        #[arg(short, long, default_value = "problems")]
        problems: PathBuf,

        /// Problem id (directory name)
        #[arg(long)]
        problem: String,

        /// Language tag (e.g., cpp, java, python)
        #[arg(short, long)]
        language: String,

        /// File holding the user code
        #[arg(short, long)]
        code: PathBuf,

        /// Write the program here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Scaffold a new problem with boilerplate for each language
    NewProblem {
        /// Content directory
        #[arg(short, long, default_value = "problems")]
        problems: PathBuf,

        /// Problem id (becomes the directory name)
        #[arg(long)]
        id: String,

        /// Languages to generate boilerplate for
        #[arg(short, long, value_delimiter = ',', default_value = "cpp,java,python")]
        languages: Vec<String>,

        /// Function the harness calls with the parsed input
        #[arg(short, long, default_value = "solve")]
        function: String,

        /// Time limit in milliseconds
        #[arg(long, default_value = "2000")]
        time_limit_ms: u64,

        /// Comparison policy (exact, trim-trailing-whitespace, token-sequence)
        #[arg(long, default_value = "trim-trailing-whitespace")]
        comparison: String,

        /// Input for test case 0
        #[arg(long, default_value = "")]
        sample_input: String,

        /// Expected output for test case 0
        #[arg(long, default_value = "")]
        sample_output: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::ListLangs { languages } => {
            commands::list_languages(&languages).await?;
        }
        Commands::Check { problems, languages } => {
            commands::check_content(&problems, &languages).await?;
        }
        Commands::Assemble {
            problems,
            problem,
            language,
            code,
            output,
        } => {
            commands::assemble(&problems, &problem, &language, &code, output.as_deref()).await?;
        }
        Commands::NewProblem {
            problems,
            id,
            languages,
            function,
            time_limit_ms,
            comparison,
            sample_input,
            sample_output,
        } => {
            commands::new_problem(
                &problems,
                commands::NewProblem {
                    id: &id,
                    languages: &languages,
                    function: &function,
                    time_limit_ms,
                    comparison: &comparison,
                    sample_input: &sample_input,
                    sample_output: &sample_output,
                },
            )
            .await?;
        }
    }

    Ok(())
}
