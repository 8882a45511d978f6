mod config;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use legal_crawler::{
    BrowserPage, Challenge, ChallengeSolver, ChromiumProvider, CrawlEngine, CrawlQueue,
    CrawlStats, DocumentRouter, DocumentWriter, FileCookieStore, Label, PageProvider,
    SessionManager, VisionChallengeSolver,
};
use openai_client::OpenAIClient;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use url::Url;

use crate::config::Config;

const SITE_URL: &str = "https://thuvienphapluat.vn";
const SOLVER_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Parser)]
#[command(name = "crawl", about = "Crawl legal documents into JSON records")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Crawl the seed searches and every related document
    Run {
        /// Crawl these document URLs instead of the seed searches
        #[arg(long = "url")]
        urls: Vec<Url>,
    },
    /// Sign out and truncate the cookie file
    ClearCookies,
    /// Send one captcha image to the solver and print the digits
    SolveCaptcha { image: PathBuf },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,legal_crawler=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = Config::from_env().context("Failed to load configuration")?;

    match cli.command {
        Command::Run { urls } => run(&config, urls).await,
        Command::ClearCookies => clear_cookies(&config).await,
        Command::SolveCaptcha { image } => solve_captcha(&config, image).await,
    }
}

fn solver(config: &Config) -> Result<VisionChallengeSolver> {
    let crawler = config.crawler_config();
    let client = OpenAIClient::new(config.openai_api_key.expose())
        .with_timeout(SOLVER_TIMEOUT)
        .context("Failed to build OpenAI client")?;
    let mut solver = VisionChallengeSolver::new(client, crawler.challenge.instruction);
    if let Some(model) = &config.openai_model {
        solver = solver.with_model(model);
    }
    Ok(solver)
}

async fn run(config: &Config, urls: Vec<Url>) -> Result<()> {
    let crawler = config.crawler_config();
    let provider = Arc::new(
        ChromiumProvider::launch(config.headless)
            .await
            .context("Failed to launch browser")?,
    );

    let cookies = Arc::new(FileCookieStore::new(&crawler.cookies_file));
    let session = Arc::new(SessionManager::from_config(&crawler, cookies));
    let writer = Arc::new(DocumentWriter::new(&crawler.output_dir));
    let router = DocumentRouter::new(
        &crawler,
        provider.clone(),
        session,
        Arc::new(solver(config)?),
        writer,
    )
    .context("Invalid selector configuration")?;

    let engine = CrawlEngine::new(crawler.engine.clone());
    if urls.is_empty() {
        let start = Url::parse(SITE_URL).context("Invalid site URL")?;
        engine.enqueue(vec![start], Label::Start).await;
    } else {
        engine.enqueue(urls, Label::Detail).await;
    }

    let stats = engine.run(Arc::new(router)).await;
    print_stats(&stats, &crawler.output_dir);

    if let Ok(provider) = Arc::try_unwrap(provider) {
        provider.shutdown().await;
    }
    Ok(())
}

async fn clear_cookies(config: &Config) -> Result<()> {
    let crawler = config.crawler_config();
    let provider = ChromiumProvider::launch(config.headless)
        .await
        .context("Failed to launch browser")?;

    let page = provider
        .open(&Url::parse(SITE_URL).context("Invalid site URL")?)
        .await
        .context("Failed to open site")?;
    let session = SessionManager::from_config(
        &crawler,
        Arc::new(FileCookieStore::new(&crawler.cookies_file)),
    );
    let cleared = session.clear_session(page.as_ref()).await;
    let _ = page.close().await;
    provider.shutdown().await;
    cleared.context("Failed to clear session")?;

    println!(
        "{} {}",
        "Cleared".bright_green().bold(),
        crawler.cookies_file.display()
    );
    Ok(())
}

async fn solve_captcha(config: &Config, image: PathBuf) -> Result<()> {
    let bytes = tokio::fs::read(&image)
        .await
        .with_context(|| format!("Failed to read {}", image.display()))?;

    let mut challenge = Challenge::jpeg(bytes);
    if image.extension().and_then(|e| e.to_str()) == Some("png") {
        challenge.mime = "image/png";
    }

    match solver(config)?
        .solve(&challenge)
        .await
        .context("Solver request failed")?
    {
        Some(digits) => println!("{}", digits.bright_green().bold()),
        None => println!("{}", "No digits recognized".bright_yellow()),
    }
    Ok(())
}

fn print_stats(stats: &CrawlStats, output_dir: &std::path::Path) {
    println!();
    println!("{}", "Crawl finished".bright_cyan().bold());
    println!("  requests:   {}", stats.requests_total);
    println!(
        "  succeeded:  {}",
        stats.requests_succeeded.to_string().bright_green()
    );
    println!("  skipped:    {}", stats.requests_skipped);
    println!("  retried:    {}", stats.requests_retried);
    let failed = stats.requests_failed.to_string();
    if stats.requests_failed > 0 {
        println!("  failed:     {}", failed.bright_red());
    } else {
        println!("  failed:     {}", failed);
    }
    if stats.requests_over_limit > 0 {
        println!(
            "  over limit: {}",
            stats.requests_over_limit.to_string().bright_yellow()
        );
    }
    println!("  output:     {}", output_dir.display());
}
