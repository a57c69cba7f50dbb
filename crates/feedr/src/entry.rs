use feed_rs::model::Entry;

/// A single item of the watched feed, as observed during one cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedEntry {
    pub title: String,
    pub link: String,
    /// `published` if present, otherwise `updated`, otherwise empty.
    pub published_or_updated: String,
    pub summary: Option<String>,
    /// Primary HTML body (`content` / `content:encoded`).
    pub content_html: Option<String>,
    /// Secondary HTML body (`description`), used when there is no content.
    pub description_html: Option<String>,
}

impl FeedEntry {
    pub fn new(title: impl Into<String>, link: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            link: link.into(),
            published_or_updated: String::new(),
            summary: None,
            content_html: None,
            description_html: None,
        }
    }

    pub fn with_date(mut self, date: impl Into<String>) -> Self {
        self.published_or_updated = date.into();
        self
    }

    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = Some(summary.into());
        self
    }

    pub fn with_content_html(mut self, html: impl Into<String>) -> Self {
        self.content_html = Some(html.into());
        self
    }

    /// The HTML body to look for images in: content first, then description.
    pub fn body_html(&self) -> Option<&str> {
        self.content_html
            .as_deref()
            .or(self.description_html.as_deref())
    }
}

impl From<Entry> for FeedEntry {
    fn from(entry: Entry) -> Self {
        let published_or_updated = entry
            .published
            .or(entry.updated)
            .map(|dt| dt.to_rfc3339())
            .unwrap_or_default();

        // feed-rs maps RSS `<description>` to `summary`, which is usually HTML
        let description_html = entry.summary.as_ref().map(|s| s.content.clone());

        Self {
            title: entry.title.map(|t| t.content).unwrap_or_default(),
            link: entry
                .links
                .into_iter()
                .next()
                .map(|l| l.href)
                .unwrap_or_default(),
            published_or_updated,
            summary: entry.summary.map(|s| s.content),
            content_html: entry.content.and_then(|c| c.body),
            description_html,
        }
    }
}
