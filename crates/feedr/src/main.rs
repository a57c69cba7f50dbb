use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use feedr::database::{DbError, HistoryDatabase};
use feedr::feed::{FeedError, FeedSource, HttpFeedSource};
use feedr::fingerprint;
use feedr::image::HttpImageFetcher;
use feedr::publisher::Publisher;
use feedr::reconciler::Reconciler;
use feedr::social::{self, Credentials, SocialClient as _, SocialError, TwitterClient};
use feedr::{CycleError, run_one_cycle};
use feedr_util_error::FmtCompact as _;
use snafu::{OptionExt as _, ResultExt as _, Snafu};
use tokio::time::{Duration, interval};
use tracing::level_filters::LevelFilter;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use url::Url;

pub const LOG_TARGET: &str = "feedr::main";

#[derive(Debug, Snafu)]
pub enum FeedrError {
    #[snafu(display("Database error: {source}"))]
    Database { source: DbError },
    #[snafu(display("Feed error: {source}"))]
    Feed { source: FeedError },
    #[snafu(display("Social platform error: {source}"))]
    Social { source: SocialError },
    #[snafu(display("Cycle error: {source}"))]
    Cycle { source: CycleError },
    #[snafu(display("HTTP client initialization failed: {source}"))]
    HttpClient { source: reqwest::Error },
    #[snafu(display("Missing credential: {name} must be set"))]
    MissingCredential { name: &'static str },
    #[snafu(display("Feed URL is required (--feed-url or FEEDR_FEED_URL)"))]
    MissingFeedUrl,
    #[snafu(display("Invalid feed URL: {source}"))]
    InvalidFeedUrl { source: url::ParseError },
    #[snafu(display("Logging initialization failed"))]
    Logging,
}

pub type FeedrResult<T> = std::result::Result<T, FeedrError>;

/// feedr - posts new feed entries to a social account
#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
pub struct Opts {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Name of the feed, used in logs and as the default table name
    #[arg(long, env = "FEEDR_FEED_NAME", default_value = "feed")]
    pub feed_name: String,

    /// URL of the RSS/Atom feed
    #[arg(long, env = "FEEDR_FEED_URL")]
    pub feed_url: Option<String>,

    /// Timeout for fetching the feed, in seconds
    #[arg(long, env = "FEEDR_POLL_TIMEOUT_SECS", default_value = "30")]
    pub poll_timeout_secs: u64,

    /// Path of the history database
    #[arg(long, env = "FEEDR_DB_PATH", default_value = "feedr.redb")]
    pub db_path: PathBuf,

    /// History table of this feed (defaults to the feed name)
    #[arg(long, env = "FEEDR_TABLE_NAME")]
    pub table_name: Option<String>,

    #[arg(long, env = "FEEDR_API_BASE_URL", default_value = social::DEFAULT_API_BASE_URL)]
    pub api_base_url: String,

    #[arg(long, env = "FEEDR_UPLOAD_BASE_URL", default_value = social::DEFAULT_UPLOAD_BASE_URL)]
    pub upload_base_url: String,

    #[arg(long, env = "FEEDR_CONSUMER_KEY", hide_env_values = true)]
    pub consumer_key: Option<String>,

    #[arg(long, env = "FEEDR_CONSUMER_SECRET", hide_env_values = true)]
    pub consumer_secret: Option<String>,

    #[arg(long, env = "FEEDR_ACCESS_TOKEN", hide_env_values = true)]
    pub access_token: Option<String>,

    #[arg(long, env = "FEEDR_ACCESS_TOKEN_SECRET", hide_env_values = true)]
    pub access_token_secret: Option<String>,
}

impl Opts {
    fn table_name(&self) -> &str {
        self.table_name.as_deref().unwrap_or(&self.feed_name)
    }

    fn credentials(&self) -> FeedrResult<Credentials> {
        Ok(Credentials {
            consumer_key: self.consumer_key.clone().context(MissingCredentialSnafu {
                name: "FEEDR_CONSUMER_KEY",
            })?,
            consumer_secret: self.consumer_secret.clone().context(MissingCredentialSnafu {
                name: "FEEDR_CONSUMER_SECRET",
            })?,
            access_token: self.access_token.clone().context(MissingCredentialSnafu {
                name: "FEEDR_ACCESS_TOKEN",
            })?,
            access_token_secret: self.access_token_secret.clone().context(
                MissingCredentialSnafu {
                    name: "FEEDR_ACCESS_TOKEN_SECRET",
                },
            )?,
        })
    }

    fn feed_source(&self, client: reqwest::Client) -> FeedrResult<HttpFeedSource> {
        let url = self.feed_url.as_deref().context(MissingFeedUrlSnafu)?;
        let url = Url::parse(url).context(InvalidFeedUrlSnafu)?;
        Ok(HttpFeedSource::new(
            client,
            url,
            Duration::from_secs(self.poll_timeout_secs),
        ))
    }

    fn social_client(&self, client: reqwest::Client) -> FeedrResult<TwitterClient> {
        Ok(TwitterClient::new(client, self.credentials()?)
            .with_base_urls(&self.api_base_url, &self.upload_base_url))
    }

    async fn open_db(&self) -> FeedrResult<HistoryDatabase> {
        HistoryDatabase::open(&self.db_path, self.table_name())
            .await
            .context(DatabaseSnafu)
    }
}

#[derive(Debug, Parser)]
pub enum Command {
    /// Run a single polling cycle (default)
    Run,
    /// Run polling cycles forever, one after another
    Watch {
        /// Interval between cycles in minutes
        #[arg(long, default_value = "15")]
        interval_minutes: u64,
    },
    /// Send direct messages about new updates to an account
    Subscribe { account: String },
    /// Stop sending direct messages to an account
    Unsubscribe { account: String },
    /// List subscribed accounts
    Subscribers,
    /// Show processed entries, most recent first
    History {
        #[arg(long, default_value = "20")]
        limit: usize,
    },
    /// Development commands
    Dev {
        #[command(subcommand)]
        dev_command: DevCommand,
    },
}

#[derive(Debug, Parser)]
pub enum DevCommand {
    /// Fetch and print the feed without publishing anything
    Fetch,
    /// Print the id of the account's latest post, to check the credentials
    LatestPost,
}

#[snafu::report]
#[tokio::main]
async fn main() -> FeedrResult<()> {
    init_logging()?;

    let opts = Opts::parse();

    match &opts.command {
        None | Some(Command::Run) => {
            let (source, reconciler) = build_pipeline(&opts).await?;
            run_one_cycle(&source, &reconciler)
                .await
                .context(CycleSnafu)?;
            Ok(())
        }
        Some(Command::Watch { interval_minutes }) => {
            let (source, reconciler) = build_pipeline(&opts).await?;
            run_watch_loop(*interval_minutes, &source, &reconciler).await
        }
        Some(Command::Subscribe { account }) => {
            let db = opts.open_db().await?;
            if db.subscribe(account).await.context(DatabaseSnafu)? {
                println!("Subscribed {account}");
            } else {
                println!("{account} was already subscribed");
            }
            Ok(())
        }
        Some(Command::Unsubscribe { account }) => {
            let db = opts.open_db().await?;
            if db.unsubscribe(account).await.context(DatabaseSnafu)? {
                println!("Unsubscribed {account}");
            } else {
                println!("{account} was not subscribed");
            }
            Ok(())
        }
        Some(Command::Subscribers) => {
            use feedr::database::HistoryStore as _;

            let db = opts.open_db().await?;
            for account in db.list_subscribed_accounts().await.context(DatabaseSnafu)? {
                println!("{account}");
            }
            Ok(())
        }
        Some(Command::History { limit }) => {
            let db = opts.open_db().await?;
            for record in db.recent(*limit).await.context(DatabaseSnafu)? {
                println!(
                    "{}  {}  {}  {}",
                    fingerprint::prefix(&record.fingerprint),
                    record.date,
                    record.title,
                    record.url
                );
            }
            Ok(())
        }
        Some(Command::Dev { dev_command }) => handle_dev_command(&opts, dev_command).await,
    }
}

async fn build_pipeline(
    opts: &Opts,
) -> FeedrResult<(HttpFeedSource, Reconciler<HistoryDatabase>)> {
    info!(
        target: LOG_TARGET,
        feed = %opts.feed_name,
        table = %opts.table_name(),
        db_path = %opts.db_path.display(),
        "Feedr configuration"
    );

    let client = http_client()?;
    let social = opts.social_client(client.clone())?;
    let source = opts.feed_source(client.clone())?;
    let db = opts.open_db().await?;

    let publisher = Publisher::new(
        Arc::new(social),
        Arc::new(HttpImageFetcher::new(client)),
    );

    Ok((source, Reconciler::new(&opts.feed_name, db, publisher)))
}

async fn handle_dev_command(opts: &Opts, dev_command: &DevCommand) -> FeedrResult<()> {
    match dev_command {
        DevCommand::Fetch => {
            let source = opts.feed_source(http_client()?)?;
            let entries = source.fetch_entries().await.context(FeedSnafu)?;

            println!("Fetched {} entries (oldest first):", entries.len());
            println!();
            for (i, entry) in entries.iter().enumerate() {
                println!("Entry {}:", i + 1);
                println!("  Fingerprint: {}", fingerprint::Fingerprint::of(entry));
                println!("  Title: {}", entry.title);
                println!("  Link: {}", entry.link);
                println!("  Date: {}", entry.published_or_updated);
                println!();
            }
            Ok(())
        }
        DevCommand::LatestPost => {
            let social = opts.social_client(http_client()?)?;
            let post_id = social.most_recent_post().await.context(SocialSnafu)?;
            println!("Latest post: {post_id}");
            Ok(())
        }
    }
}

async fn run_watch_loop(
    interval_minutes: u64,
    source: &dyn FeedSource,
    reconciler: &Reconciler<HistoryDatabase>,
) -> FeedrResult<()> {
    let mut interval = interval(Duration::from_secs(interval_minutes.max(1) * 60));

    loop {
        interval.tick().await;

        if let Err(e) = run_one_cycle(source, reconciler).await {
            error!(
                target: LOG_TARGET,
                feed = %reconciler.feed_name(),
                err = %e.fmt_compact(),
                "Cycle failed"
            );
        }

        info!(
            target: LOG_TARGET,
            next_run_in_minutes = interval_minutes,
            "Cycle complete, waiting for next run"
        );
    }
}

fn http_client() -> FeedrResult<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(concat!("feedr/", env!("CARGO_PKG_VERSION")))
        .build()
        .context(HttpClientSnafu)
}

pub fn init_logging() -> FeedrResult<()> {
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .try_init()
        .map_err(|_| FeedrError::Logging)?;

    Ok(())
}
