use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use pfx_adapters::ListingMode;
use pfx_sync::PipelineConfig;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "pfx-cli")]
#[command(about = "Property facts extractor command-line interface")]
struct Cli {
    /// Directory holding input.csv, data.json and the dataset.
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
    #[arg(long, global = true)]
    input: Option<PathBuf>,
    #[arg(long, global = true)]
    output: Option<PathBuf>,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Extract every pending address, then write the dataset.
    Run,
    /// Rewrite the dataset from stored records without a browser.
    Export,
    /// Print what the field strategies read from a saved detail page.
    Inspect {
        html_file: PathBuf,
        #[arg(long, default_value = "https://www.zillow.com/homedetails/")]
        url: String,
    },
    /// List search-result links for a free-text query.
    Search {
        query: String,
        #[arg(long, value_enum, default_value_t = Mode::Buy)]
        mode: Mode,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Mode {
    Buy,
    Rent,
}

impl From<Mode> for ListingMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Buy => ListingMode::Buy,
            Mode::Rent => ListingMode::Rent,
        }
    }
}

impl Cli {
    fn config(&self) -> PipelineConfig {
        let mut config = PipelineConfig::from_env();
        if let Some(dir) = &self.data_dir {
            config = config.with_data_dir(dir);
        }
        if let Some(input) = &self.input {
            config.input_path = input.clone();
        }
        if let Some(output) = &self.output {
            config.output_path = output.clone();
        }
        config
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let config = cli.config();

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => match pfx_sync::run(&config).await? {
            Some(summary) => {
                println!(
                    "run complete: total={} succeeded={} failed={} success_rate={:.2}% elapsed_hours={:.2} output={}",
                    summary.total_rows,
                    summary.succeeded,
                    summary.failed,
                    summary.success_rate_percent,
                    summary.elapsed_hours,
                    summary.output_path
                );
            }
            None => eprintln!("no usable input at {}", config.input_path.display()),
        },
        Commands::Export => match pfx_sync::export_dataset(&config).await? {
            Some(summary) => println!(
                "export complete: rows={} fact_columns={} output={}",
                summary.rows, summary.fact_columns, summary.path
            ),
            None => eprintln!("no usable input at {}", config.input_path.display()),
        },
        Commands::Inspect { html_file, url } => {
            let html = tokio::fs::read_to_string(&html_file)
                .await
                .with_context(|| format!("reading {}", html_file.display()))?;
            let details = pfx_sync::inspect_page(&url, &html).await?;
            println!("{}", serde_json::to_string_pretty(&details)?);
        }
        Commands::Search { query, mode } => {
            for listing in pfx_sync::search_listings(&config, mode.into(), &query).await? {
                println!("{}\t{}", listing.title, listing.url);
            }
        }
    }

    Ok(())
}
