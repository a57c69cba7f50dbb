//! Bounded-length post composition.
//!
//! A post is made of up to four lines, in this order: title, summary, link
//! and image URL. The link and the image are shortened by the platform to a
//! fixed length, so instead of counting them we reserve a fixed number of
//! characters for each out of [`MESSAGE_BUDGET`]. Title and summary must fit
//! into what is left.

use scraper::Html;

use crate::entry::FeedEntry;

/// Total characters available for a post.
pub const MESSAGE_BUDGET: usize = 140;

/// Characters reserved for a link, regardless of its real length.
pub const URL_RESERVATION: usize = 24;

/// Characters reserved for an attached image.
pub const IMAGE_RESERVATION: usize = 25;

const ELLIPSIS: &str = "...";

/// Title/summary budget left after the link and image reservations.
pub fn text_budget(has_link: bool, has_image: bool) -> usize {
    let mut budget = MESSAGE_BUDGET;
    if has_link {
        budget -= URL_RESERVATION;
    }
    if has_image {
        budget -= IMAGE_RESERVATION;
    }
    budget
}

/// The fields of a post, already cut to size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposedMessage {
    pub title: String,
    pub summary: Option<String>,
    pub url: Option<String>,
    /// Only rendered once attaching the image itself has failed.
    pub img_url: Option<String>,
}

impl ComposedMessage {
    pub fn compose(entry: &FeedEntry, img_url: Option<&str>) -> Self {
        let url = Some(entry.link.clone()).filter(|l| !l.is_empty());
        let budget = text_budget(url.is_some(), img_url.is_some());

        let title_len = entry.title.chars().count();
        let (title, summary) = if budget < title_len {
            // Title alone is too long: cut it and leave no room for a summary
            (truncate_with_ellipsis(&entry.title, budget), None)
        } else {
            // One character goes to the newline between title and summary
            let remaining = budget.saturating_sub(title_len + 1);
            let summary = entry
                .summary
                .as_deref()
                .map(plain_text)
                .filter(|s| !s.is_empty())
                .and_then(|s| fit_summary(&s, remaining));
            (entry.title.clone(), summary)
        };

        Self {
            title,
            summary,
            url,
            img_url: None,
        }
    }

    /// Title, summary and link: the text posted along with an attached image.
    pub fn media_text(&self) -> String {
        join_lines([
            Some(self.title.as_str()),
            self.summary.as_deref(),
            self.url.as_deref(),
        ])
    }

    /// All non-empty fields, one per line.
    pub fn render(&self) -> String {
        join_lines([
            Some(self.title.as_str()),
            self.summary.as_deref(),
            self.url.as_deref(),
            self.img_url.as_deref(),
        ])
    }

    pub fn without_summary(&self) -> Self {
        Self {
            summary: None,
            ..self.clone()
        }
    }

    /// Length of the title and summary lines, the part bounded by
    /// [`text_budget`].
    pub fn text_len(&self) -> usize {
        join_lines([Some(self.title.as_str()), self.summary.as_deref()])
            .chars()
            .count()
    }
}

fn join_lines<'a>(fields: impl IntoIterator<Item = Option<&'a str>>) -> String {
    fields
        .into_iter()
        .flatten()
        .filter(|f| !f.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn fit_summary(summary: &str, remaining: usize) -> Option<String> {
    if summary.chars().count() <= remaining {
        return Some(summary.to_owned());
    }
    // Not even one character plus the ellipsis fits
    if remaining <= ELLIPSIS.len() {
        return None;
    }
    Some(truncate_with_ellipsis(summary, remaining))
}

/// Cut `s` to exactly `max` characters, the last three being `...`.
///
/// Strings that already fit are returned unchanged.
pub fn truncate_with_ellipsis(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_owned();
    }
    let mut out: String = s.chars().take(max.saturating_sub(ELLIPSIS.len())).collect();
    out.push_str(ELLIPSIS);
    out
}

/// Text content of a (possibly HTML) summary with whitespace collapsed.
fn plain_text(summary: &str) -> String {
    let fragment = Html::parse_fragment(summary);
    let text: String = fragment.root_element().text().collect();
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
