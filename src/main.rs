use clap::{Parser, Subcommand};
use tracing::{error, info, warn};

use ro_harvester::config::Config;
use ro_harvester::error::Result;
use ro_harvester::infra::http_client::ReqwestJson;
use ro_harvester::logging;
use ro_harvester::providers::datacite::DataCiteApi;
use ro_harvester::types::MatchContext;

#[derive(Parser)]
#[command(name = "ro_harvester")]
#[command(about = "Research output metadata harvester for DataCite")]
#[command(version)]
struct Cli {
    /// Organization name pattern, repeatable; `*` acts as a wildcard
    #[arg(long = "name")]
    names: Vec<String>,

    /// ROR identifier, full URL or bare suffix
    #[arg(long)]
    ror: Option<String>,

    /// Path to the TOML configuration file
    #[arg(long, default_value = "config.toml")]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Report the number of matching DOIs without fetching any records
    Count,
    /// Fetch all matching records and print them as normalized JSON lines
    Fetch,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    logging::init_logging();

    let cli = Cli::parse();

    let config = if std::path::Path::new(&cli.config).exists() {
        Config::load(&cli.config)?
    } else {
        Config::default()
    };

    // Command line arguments override the configuration file
    let name_patterns = if cli.names.is_empty() {
        config.organization.name_patterns
    } else {
        cli.names
    };
    let ror = cli.ror.unwrap_or(config.organization.ror);

    let context = MatchContext::new(name_patterns, ror);
    if context.is_empty() {
        warn!("No organization name patterns or ROR identifier configured; query will match nothing");
    }

    let api = DataCiteApi::new(context, Box::new(ReqwestJson::new()))
        .with_page_size(config.datacite.page_size);

    match cli.command {
        Commands::Count => {
            let total = api.count().await?;
            println!("{total}");
        }
        Commands::Fetch => {
            let raw = api.all().await?;
            info!("Fetched {} raw records from DataCite", raw.len());

            let mut errors = 0usize;
            for item in &raw {
                match api.normalize(item) {
                    Ok(record) => println!("{}", serde_json::to_string(&record)?),
                    Err(e) => {
                        errors += 1;
                        error!("Failed to normalize record: {e}");
                    }
                }
            }
            if errors > 0 {
                warn!("{errors} records could not be normalized");
            }
        }
    }

    Ok(())
}
