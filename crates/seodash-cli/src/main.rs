use anyhow::Result;
use clap::{Parser, Subcommand};
use seodash_report::Section;
use seodash_web::WebConfig;

#[derive(Debug, Parser)]
#[command(name = "seodash-cli")]
#[command(about = "SEO dashboard command-line interface")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the HTTP API.
    Serve,
    /// Print one client report as JSON.
    Report {
        workbook_id: String,
        /// Comma-separated section names; all sections when omitted.
        #[arg(long)]
        sections: Option<String>,
    },
    /// Print the service rollup for a free-text location.
    Rollup { location: String },
    /// Print the distinct cities available for rollups.
    Cities,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => seodash_web::serve_from_env().await?,
        Commands::Report {
            workbook_id,
            sections,
        } => {
            let config = WebConfig::from_env();
            let registry = seodash_store::WorkbookRegistry::load(&config.registry_path)?;
            let workbook = registry.open(&workbook_id)?;

            let sections: Vec<Section> = match sections {
                None => Section::ALL.to_vec(),
                Some(names) => names
                    .split(',')
                    .filter_map(Section::from_name)
                    .collect(),
            };
            let payload = seodash_report::build_report(&workbook, &sections)?;
            println!("{}", serde_json::to_string_pretty(&payload)?);
        }
        Commands::Rollup { location } => {
            let config = WebConfig::from_env();
            let registry = seodash_store::WorkbookRegistry::load(&config.registry_path)?;
            let workbook = registry.open(&config.services_workbook_id)?;
            let rollup = seodash_rollup::resolve_rollup(&workbook, &location);
            println!("{}", serde_json::to_string_pretty(&rollup)?);
        }
        Commands::Cities => {
            let config = WebConfig::from_env();
            let registry = seodash_store::WorkbookRegistry::load(&config.registry_path)?;
            let workbook = registry.open(&config.services_workbook_id)?;
            println!(
                "{}",
                serde_json::to_string_pretty(&seodash_rollup::list_cities(&workbook))?
            );
        }
    }

    Ok(())
}
