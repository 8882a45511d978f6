use anyhow::{Context, Result};
use dotenvy::dotenv;
use legal_crawler::config::SecretString;
use legal_crawler::{CrawlerConfig, Credentials, EngineConfig};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;

/// Crawler settings loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub username: String,
    pub password: SecretString,
    /// Value of the site's `MemberGA` global for this account
    pub member_marker: String,
    pub openai_api_key: SecretString,
    pub openai_model: Option<String>,
    pub max_concurrency: usize,
    pub max_requests_per_crawl: Option<usize>,
    pub max_request_retries: u32,
    pub cookies_file: PathBuf,
    pub output_dir: PathBuf,
    pub headless: bool,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        Ok(Self {
            username: env::var("TVPL_USERNAME").context("TVPL_USERNAME must be set")?,
            password: SecretString::new(
                env::var("TVPL_PASSWORD").context("TVPL_PASSWORD must be set")?,
            ),
            member_marker: env::var("TVPL_MEMBER_GA").context("TVPL_MEMBER_GA must be set")?,
            openai_api_key: SecretString::new(
                env::var("OPENAI_API_KEY").context("OPENAI_API_KEY must be set")?,
            ),
            openai_model: env::var("OPENAI_MODEL").ok(),
            max_concurrency: parse_or("MAX_CONCURRENCY", 1)?,
            max_requests_per_crawl: env::var("MAX_REQUESTS_PER_CRAWL")
                .ok()
                .map(|v| v.parse())
                .transpose()
                .context("MAX_REQUESTS_PER_CRAWL must be a valid number")?,
            max_request_retries: parse_or("MAX_REQUEST_RETRIES", 3)?,
            cookies_file: env::var("COOKIES_FILE")
                .unwrap_or_else(|_| "cookies.json".to_string())
                .into(),
            output_dir: env::var("OUTPUT_DIR")
                .unwrap_or_else(|_| "documents".to_string())
                .into(),
            headless: parse_or("HEADLESS", true)?,
        })
    }

    pub fn crawler_config(&self) -> CrawlerConfig {
        let credentials = Credentials::new(
            &self.username,
            self.password.expose(),
            &self.member_marker,
        );
        CrawlerConfig::new(credentials)
            .with_engine(
                EngineConfig::default()
                    .with_max_concurrency(self.max_concurrency)
                    .with_max_requests(self.max_requests_per_crawl)
                    .with_max_retries(self.max_request_retries),
            )
            .with_cookies_file(&self.cookies_file)
            .with_output_dir(&self.output_dir)
    }
}

fn parse_or<T: FromStr>(key: &str, default: T) -> Result<T> {
    match env::var(key) {
        Ok(value) => value
            .parse()
            .ok()
            .with_context(|| format!("{} must be a valid value, got {:?}", key, value)),
        Err(_) => Ok(default),
    }
}
