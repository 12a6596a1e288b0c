use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{error, info};

use filmfest_scraper::adapters;
use filmfest_scraper::config::FestivalConfig;
use filmfest_scraper::fetch::{CachingFetcher, DirPageSource, PageSource};
use filmfest_scraper::logging;
use filmfest_scraper::output;
use filmfest_scraper::registry::{FestivalData, FilmKeyPolicy};
use filmfest_scraper::report::RunReport;
use filmfest_scraper::resolver::{self, CombinationLinks};

#[derive(Parser)]
#[command(name = "filmfest_scraper")]
#[command(about = "Film festival website scraper and data reconciliation engine")]
#[command(version = "0.1.0")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a full festival scrape: crawl, resolve, write outputs
    Scrape {
        /// Festival configuration file (TOML)
        #[arg(long)]
        festival: PathBuf,
        /// Parse only pages already in the cache; never touch the network
        #[arg(long)]
        offline: bool,
        /// Refetch pages even when cached
        #[arg(long)]
        force_fetch: bool,
    },
    /// Re-run resolution and output over cached pages only
    Resolve {
        /// Festival configuration file (TOML)
        #[arg(long)]
        festival: PathBuf,
    },
}

async fn run_festival(
    config: &FestivalConfig,
    pages: &dyn PageSource,
) -> Result<(), Box<dyn std::error::Error>> {
    let festival_dir = config.festival_dir();
    std::fs::create_dir_all(&festival_dir)?;

    let mut report = RunReport::new();
    let mut data = FestivalData::new(FilmKeyPolicy::ByUrl);
    data.load_id_maps(config.common_dir(), &festival_dir, &mut report)?;

    let Some(adapter) = adapters::create_adapter(config) else {
        return Err(format!("unknown festival: {}", config.festival).into());
    };

    let span = tracing::info_span!("festival run", festival = %config.festival);
    let _enter = span.enter();

    info!("starting crawl");
    let mut links = CombinationLinks::new();
    adapter
        .run(pages, &mut data, &mut links, &mut report)
        .await?;
    report.films_created = data.film_count() as u32;

    info!("resolving combination programs");
    resolver::resolve(&mut data, links, &mut report);

    output::write_all(&mut data, &festival_dir)?;

    println!("\n📊 Run results for {}:", config.festival);
    println!("{}", report.summary());
    if report.has_errors() {
        println!("\n⚠️  Data-quality errors for triage:");
        for err in report.errors() {
            println!("   - {err}");
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    logging::init_logging();

    let cli = Cli::parse();

    match cli.command {
        Commands::Scrape {
            festival,
            offline,
            force_fetch,
        } => {
            let config = FestivalConfig::load(&festival)?;
            println!("🔄 Scraping {} {}...", config.festival, config.edition);
            let result = if offline {
                let pages = DirPageSource::new(config.cache_dir());
                run_festival(&config, &pages).await
            } else {
                let pages = CachingFetcher::new(config.cache_dir(), force_fetch);
                run_festival(&config, &pages).await
            };
            if let Err(e) = result {
                error!("run failed: {}", e);
                return Err(e);
            }
        }
        Commands::Resolve { festival } => {
            let config = FestivalConfig::load(&festival)?;
            println!("🔄 Resolving {} from cache...", config.festival);
            let pages = DirPageSource::new(config.cache_dir());
            if let Err(e) = run_festival(&config, &pages).await {
                error!("run failed: {}", e);
                return Err(e);
            }
        }
    }
    Ok(())
}
