#![allow(clippy::uninlined_format_args)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pagesift::errors::ErrorCategory;
use pagesift::progress::LogSink;
use pagesift::{
    DriverManager, LaunchOptions, OpenAiAnalyzer, ScrapeConfig, ScrapeMode, ScrapeRequest,
    ScrapeResult, Scraper, WebDriverLauncher,
};

const EXIT_SUCCESS: i32 = 0;
const EXIT_COMMAND_ERROR: i32 = 1;

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    /// Markdown only
    Markdown,
    /// The full structured result
    Json,
}

#[derive(Parser)]
#[command(name = "pagesift")]
#[command(about = "Extract LLM-readable content from web pages", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scrape a page to Markdown
    Scrape {
        /// URL to scrape
        url: String,

        /// normal extracts the page as loaded; beast also reveals hidden content
        #[arg(short, long, default_value = "normal")]
        mode: ScrapeMode,

        /// What the caller is looking for; steers element discovery
        #[arg(short, long)]
        query: Option<String>,

        /// Browser to use (overrides the config file)
        #[arg(short, long)]
        browser: Option<String>,

        /// Set viewport size (WIDTHxHEIGHT, e.g., 1920x1080)
        #[arg(long)]
        viewport: Option<String>,

        /// Run browser in visible mode (disables headless)
        #[arg(long = "no-headless")]
        no_headless: bool,

        /// Config file (defaults to the user config directory)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Output format
        #[arg(short, long, default_value = "markdown")]
        format: OutputFormat,
    },
}

#[tokio::main]
async fn main() {
    // Initialize tracing to stderr (so output to stdout remains clean)
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pagesift=info".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
        .init();

    let cli = Cli::parse();
    let code = match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            let category = ErrorCategory::classify(&format!("{:#}", err));
            let code = match category {
                ErrorCategory::Unknown => EXIT_COMMAND_ERROR,
                other => other.exit_code(),
            };
            print_error(&format!("{:#}", err), category, code);
            code
        }
    };
    std::process::exit(code);
}

/// JSON error on stdout for programmatic consumers, plain text on stderr
fn print_error(message: &str, category: ErrorCategory, code: i32) {
    let error_json = json!({
        "error": true,
        "category": category,
        "message": message,
        "exit_code": code
    });
    println!(
        "{}",
        serde_json::to_string(&error_json).unwrap_or_else(|_| "{}".to_string())
    );
    eprintln!("Error: {}", message);
}

async fn run(cli: Cli) -> Result<i32> {
    match cli.command {
        Commands::Scrape {
            url,
            mode,
            query,
            browser,
            viewport,
            no_headless,
            config,
            format,
        } => {
            let mut config = ScrapeConfig::discover(config.as_deref()).context("Failed to load config")?;
            if let Some(browser) = browser {
                config.browser.browser = browser;
            }
            if let Some(viewport) = viewport {
                config.browser.viewport = viewport;
            }
            if no_headless {
                config.browser.headless = false;
            }
            if config.model.api_key.is_none() {
                config.model.api_key = std::env::var("OPENAI_API_KEY").ok();
            }
            // Flags bypass the validation done at load time
            config.browser.browser_type()?;
            config.browser.viewport_size()?;

            let result = scrape(config, &url, mode, query).await?;
            print_result(&result, format)?;
            Ok(match &result.error {
                Some(failure) => failure.category.exit_code(),
                None => EXIT_SUCCESS,
            })
        }
    }
}

async fn scrape(
    config: ScrapeConfig,
    url: &str,
    mode: ScrapeMode,
    query: Option<String>,
) -> Result<ScrapeResult> {
    url::Url::parse(url).with_context(|| format!("Invalid URL: {}", url))?;

    let drivers = Arc::new(DriverManager::new());
    let launcher = WebDriverLauncher::new(LaunchOptions::from_config(&config)?, drivers.clone());
    let analyzer = OpenAiAnalyzer::new(config.model.clone(), config.timeouts.model());
    let scraper = Scraper::new(config, Arc::new(launcher), Arc::new(analyzer)).with_progress(Arc::new(LogSink));

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping after the current step");
            on_signal.cancel();
        }
    });

    let mut request = ScrapeRequest::new(url, mode);
    if let Some(query) = query {
        request = request.with_query(query);
    }
    let result = scraper.scrape(request, cancel).await;

    // Always clean up WebDriver processes before exiting
    drivers.stop_all();
    info!("Finished with outcome {:?}", result.outcome);
    Ok(result)
}

fn print_result(result: &ScrapeResult, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(result)?);
        }
        OutputFormat::Markdown => match (&result.markdown, &result.error) {
            (Some(markdown), _) => {
                if let Some(caveat) = &result.enhanced_error {
                    warn!("Partial result: {}", caveat);
                }
                println!("{}", markdown);
            }
            (None, Some(failure)) => {
                print_error(&failure.message, failure.category, failure.category.exit_code());
            }
            (None, None) => {}
        },
    }
    Ok(())
}
