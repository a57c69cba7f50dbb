use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use snafu::{ResultExt as _, Snafu};
use tracing::{debug, info};

use crate::entry::FeedEntry;

const LOG_TARGET: &str = "feedr::feed";

/// Largest feed document we are willing to parse.
pub const MAX_FEED_SIZE: u64 = 10 * 1024 * 1024;

#[derive(Debug, Snafu)]
pub enum FeedError {
    #[snafu(display("Feed request failed: {source}"))]
    Http { source: reqwest::Error },
    #[snafu(display("Feed server returned HTTP {status}"))]
    Status { status: u16 },
    #[snafu(display("Feed too large: {size} bytes"))]
    TooLarge { size: u64 },
    #[snafu(display("Failed to parse feed: {source}"))]
    Parse { source: feed_rs::parser::ParseFeedError },
}

pub type FeedResult<T> = std::result::Result<T, FeedError>;

#[async_trait]
pub trait FeedSource: Send + Sync {
    /// Current entries of the feed, oldest first.
    async fn fetch_entries(&self) -> FeedResult<Vec<FeedEntry>>;
}

pub struct HttpFeedSource {
    client: Client,
    url: String,
    timeout: Duration,
}

impl HttpFeedSource {
    pub fn new(client: Client, url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client,
            url: url.into(),
            timeout,
        }
    }
}

#[async_trait]
impl FeedSource for HttpFeedSource {
    async fn fetch_entries(&self) -> FeedResult<Vec<FeedEntry>> {
        debug!(target: LOG_TARGET, url = %self.url, "Fetching feed");

        let response = self
            .client
            .get(&self.url)
            .timeout(self.timeout)
            .send()
            .await
            .context(HttpSnafu)?;

        if !response.status().is_success() {
            return StatusSnafu {
                status: response.status().as_u16(),
            }
            .fail();
        }

        if let Some(size) = response.content_length() {
            if MAX_FEED_SIZE < size {
                return TooLargeSnafu { size }.fail();
            }
        }

        let bytes = response.bytes().await.context(HttpSnafu)?;
        if MAX_FEED_SIZE < bytes.len() as u64 {
            return TooLargeSnafu {
                size: bytes.len() as u64,
            }
            .fail();
        }

        let entries = parse_entries(&bytes)?;
        info!(target: LOG_TARGET, url = %self.url, count = entries.len(), "Fetched feed");
        Ok(entries)
    }
}

/// Parse an RSS/Atom/JSON feed document into entries, oldest first.
///
/// Feeds list their newest item first; entries are reversed so that they
/// can be processed in publication order.
pub fn parse_entries(bytes: &[u8]) -> FeedResult<Vec<FeedEntry>> {
    let feed = feed_rs::parser::parse(bytes).context(ParseSnafu)?;
    let mut entries: Vec<FeedEntry> = feed.entries.into_iter().map(FeedEntry::from).collect();
    entries.reverse();
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    const ATOM: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>Status</title>
  <id>urn:example:status</id>
  <updated>2025-03-02T10:00:00Z</updated>
  <entry>
    <title>Second incident</title>
    <id>urn:example:2</id>
    <link href="https://status.example.com/2"/>
    <updated>2025-03-02T10:00:00Z</updated>
  </entry>
  <entry>
    <title>First incident</title>
    <id>urn:example:1</id>
    <link href="https://status.example.com/1"/>
    <published>2025-03-01T09:00:00Z</published>
    <updated>2025-03-01T12:00:00Z</updated>
  </entry>
</feed>"#;

    #[test]
    fn entries_are_oldest_first() {
        let entries = parse_entries(ATOM.as_bytes()).unwrap();
        let titles: Vec<_> = entries.iter().map(|e| e.title.as_str()).collect();
        assert_eq!(titles, vec!["First incident", "Second incident"]);
    }

    #[test]
    fn published_is_preferred_over_updated() {
        let entries = parse_entries(ATOM.as_bytes()).unwrap();
        assert!(entries[0].published_or_updated.starts_with("2025-03-01T09:00:00"));
        assert!(entries[1].published_or_updated.starts_with("2025-03-02T10:00:00"));
    }

    #[test]
    fn garbage_is_a_parse_error() {
        assert!(matches!(
            parse_entries(b"definitely not a feed"),
            Err(FeedError::Parse { .. })
        ));
    }
}
