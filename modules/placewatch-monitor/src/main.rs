use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use chrome_session::SessionOptions;
use placewatch_common::{Config, Place, SortOrder, MIN_INTERVAL_MINUTES};
use placewatch_monitor::monitor::{IncrementalMonitor, MonitorSettings};
use placewatch_monitor::scrape::{self, ScrapeRequest};
use placewatch_monitor::store::PgStore;
use placewatch_monitor::traits::ChromeDriverFactory;
use placewatch_monitor::webhook::{NotificationDispatcher, WebhookConfig};

#[derive(Parser)]
#[command(name = "placewatch")]
#[command(about = "Map-service review scraping and monitoring")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the monitoring loop continuously
    Run {
        /// JSON file with the places to monitor
        #[arg(long)]
        places: PathBuf,

        /// Ignore reviews older than this date (YYYY-MM-DD)
        #[arg(long)]
        min_date: Option<String>,
    },

    /// Run a single monitoring cycle and exit
    Once {
        /// JSON file with the places to monitor
        #[arg(long)]
        places: PathBuf,

        /// Ignore reviews older than this date (YYYY-MM-DD)
        #[arg(long)]
        min_date: Option<String>,
    },

    /// Scrape reviews from one place page
    Scrape {
        url: String,

        /// Maximum reviews to collect
        #[arg(long, default_value_t = 100)]
        max_reviews: usize,

        /// Sort order: relevant, newest, highest, lowest
        #[arg(long, default_value = "newest")]
        sort: String,

        /// Stop once reviews older than this date (YYYY-MM-DD) are reached
        #[arg(long)]
        min_date: Option<String>,

        /// Also persist the results (requires DATABASE_URL)
        #[arg(long)]
        persist: bool,
    },

    /// Extract place metadata (name, rating, address, hours)
    PlaceInfo { url: String },

    /// Send a synthetic test event to a webhook URL
    TestWebhook { url: String },
}

fn parse_sort(raw: &str) -> Result<SortOrder> {
    match raw {
        "relevant" => Ok(SortOrder::MostRelevant),
        "newest" => Ok(SortOrder::Newest),
        "highest" => Ok(SortOrder::HighestRating),
        "lowest" => Ok(SortOrder::LowestRating),
        other => anyhow::bail!("Unknown sort order {other:?} (expected relevant, newest, highest or lowest)"),
    }
}

fn parse_min_date(raw: Option<&str>) -> Result<Option<chrono::DateTime<chrono::Utc>>> {
    let Some(raw) = raw else { return Ok(None) };
    let date: chrono::NaiveDate = raw
        .parse()
        .with_context(|| format!("Invalid date {raw:?} (expected YYYY-MM-DD)"))?;
    let midnight = date
        .and_hms_opt(0, 0, 0)
        .context("Invalid midnight timestamp")?;
    Ok(Some(midnight.and_utc()))
}

fn load_places(path: &PathBuf) -> Result<Vec<Place>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Reading places file {} failed", path.display()))?;
    let places: Vec<Place> = serde_json::from_str(&raw)
        .with_context(|| format!("Parsing places file {} failed", path.display()))?;
    Ok(places)
}

fn factory(config: &Config) -> ChromeDriverFactory {
    ChromeDriverFactory::new(SessionOptions {
        headless: config.headless,
        chrome_executable: config.chrome_executable.clone(),
    })
}

fn dispatcher(config: &Config) -> NotificationDispatcher {
    NotificationDispatcher::new(WebhookConfig {
        timeout: config.webhook_timeout,
        max_retries: config.webhook_max_retries,
        retry_delay: config.webhook_retry_delay,
    })
}

async fn build_monitor(
    config: &Config,
    min_review_date: Option<chrono::DateTime<chrono::Utc>>,
) -> Result<IncrementalMonitor<ChromeDriverFactory, PgStore>> {
    let store = PgStore::connect(&config.database_url)
        .await
        .context("Connecting to the database failed")?;
    let settings = MonitorSettings {
        max_new_per_check: config.max_reviews_per_request,
        max_scrolls: config.max_scrolls,
        job_timeout: config.job_timeout,
        min_review_date,
        ..MonitorSettings::default()
    };
    Ok(IncrementalMonitor::new(
        factory(config),
        store,
        dispatcher(config),
        settings,
    ))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("placewatch=info".parse()?))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run { places, min_date } => {
            let config = Config::from_env();
            let places = load_places(&places)?;
            let monitor = build_monitor(&config, parse_min_date(min_date.as_deref())?).await?;

            let interval = config.monitor_interval_minutes.max(MIN_INTERVAL_MINUTES);
            info!(
                places = places.len(),
                interval_minutes = interval,
                "Placewatch monitor starting"
            );

            loop {
                let summary = monitor.run_cycle(&places).await;
                if summary.failed > 0 {
                    warn!(failed = summary.failed, "Cycle finished with failures");
                }
                tokio::time::sleep(Duration::from_secs(u64::from(interval) * 60)).await;
            }
        }

        Commands::Once { places, min_date } => {
            let config = Config::from_env();
            let places = load_places(&places)?;
            let monitor = build_monitor(&config, parse_min_date(min_date.as_deref())?).await?;

            let summary = monitor.run_cycle(&places).await;
            println!("{}", serde_json::to_string_pretty(&summary)?);
            if summary.failed > 0 {
                anyhow::bail!("{} of {} places failed", summary.failed, summary.total_places);
            }
        }

        Commands::Scrape {
            url,
            max_reviews,
            sort,
            min_date,
            persist,
        } => {
            let config = Config::browser_from_env();
            let mut request = ScrapeRequest::new(url);
            request.max_reviews = max_reviews;
            request.sort_order = parse_sort(&sort)?;
            request.min_review_date = parse_min_date(min_date.as_deref())?;
            request.max_scrolls = config.max_scrolls;

            let reviews = scrape::scrape_reviews(&factory(&config), &request).await?;
            if persist {
                let store = PgStore::connect(&Config::from_env().database_url)
                    .await
                    .context("Connecting to the database failed")?;
                scrape::persist_reviews(&store, &reviews).await?;
            }
            println!("{}", serde_json::to_string_pretty(&reviews)?);
        }

        Commands::PlaceInfo { url } => {
            let config = Config::browser_from_env();
            let info = scrape::scrape_place_info(&factory(&config), &url).await?;
            println!("{}", serde_json::to_string_pretty(&info)?);
        }

        Commands::TestWebhook { url } => {
            let config = Config::browser_from_env();
            let report = dispatcher(&config).test(&url).await;
            println!("{}", serde_json::to_string_pretty(&report)?);
            if !report.success {
                anyhow::bail!("Webhook test failed");
            }
        }
    }

    Ok(())
}
