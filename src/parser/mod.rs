//! Feed document parsing
//!
//! Turns a fetched byte stream into a channel description and an ordered list
//! of items. RSS 2.0 is tried first; documents that are not RSS are retried as
//! Atom. A document that is neither is reported as
//! [`Error::MalformedDocument`].
//!
//! Unparseable item dates never reject the item: the date becomes `None`.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use tracing::debug;

/// Layout of RSS `pubDate` values after the `Ddd, ` weekday prefix: RFC 1123
/// with a numeric zone
///
/// A full value looks like `Mon, 02 Jan 2006 15:04:05 -0700`. The weekday must
/// be a valid English abbreviation but is not checked against the date.
pub const PUB_DATE_FORMAT: &str = "%d %b %Y %H:%M:%S %z";

const WEEKDAYS: [&str; 7] = ["Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"];

/// Channel-level metadata of a parsed document
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ParsedChannel {
    /// Channel title
    pub title: String,
    /// Channel home link
    pub link: String,
    /// Channel description
    pub description: String,
    /// Channel language, if declared
    pub language: Option<String>,
}

/// One item of a parsed document
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParsedItem {
    /// Item title (empty if absent)
    pub title: String,
    /// Item URL; falls back to the GUID (RSS) or id (Atom) when no link is given
    pub link: Option<String>,
    /// Item description or summary
    pub description: Option<String>,
    /// Publication date exactly as it appeared in the document
    pub pub_date: Option<String>,
    /// Publication date, when `pub_date` parsed
    pub published_at: Option<DateTime<Utc>>,
}

/// A decoded feed document
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ParsedFeed {
    /// Channel metadata
    pub channel: ParsedChannel,
    /// Items in document order
    pub items: Vec<ParsedItem>,
}

/// Decodes raw documents into [`ParsedFeed`]s
pub trait DocumentParser: Send + Sync {
    /// Parse `bytes` into a feed
    ///
    /// # Errors
    /// Returns [`Error::MalformedDocument`] if the bytes are not a feed document.
    fn parse(&self, bytes: &[u8]) -> Result<ParsedFeed>;
}

/// RSS 2.0 parser with Atom fallback
#[derive(Clone, Copy, Debug, Default)]
pub struct SyndicationParser;

impl DocumentParser for SyndicationParser {
    fn parse(&self, bytes: &[u8]) -> Result<ParsedFeed> {
        match parse_rss(bytes) {
            Ok(feed) => {
                debug!("Parsed as RSS, found {} items", feed.items.len());
                Ok(feed)
            }
            Err(rss_err) => {
                debug!("Failed to parse as RSS: {}, trying Atom", rss_err);
                match parse_atom(bytes) {
                    Ok(feed) => {
                        debug!("Parsed as Atom, found {} items", feed.items.len());
                        Ok(feed)
                    }
                    Err(atom_err) => Err(Error::MalformedDocument(format!(
                        "not an RSS or Atom document. RSS error: {}. Atom error: {}",
                        rss_err, atom_err
                    ))),
                }
            }
        }
    }
}

/// Parse an RSS `pubDate` value
///
/// Returns `None` unless the value is a weekday abbreviation, `", "`, and
/// then [`PUB_DATE_FORMAT`] with a two-digit day.
pub fn parse_pub_date(raw: &str) -> Option<DateTime<Utc>> {
    let (weekday, rest) = raw.trim().split_once(", ")?;
    if !WEEKDAYS.iter().any(|day| day.eq_ignore_ascii_case(weekday)) {
        return None;
    }
    if !rest.get(..2)?.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    DateTime::parse_from_str(rest, PUB_DATE_FORMAT)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn parse_rss(bytes: &[u8]) -> std::result::Result<ParsedFeed, rss::Error> {
    let channel = rss::Channel::read_from(bytes)?;

    let items = channel
        .items()
        .iter()
        .map(|item| {
            let link = item
                .link()
                .map(str::to_string)
                .or_else(|| item.guid().map(|g| g.value().to_string()))
                .filter(|l| !l.trim().is_empty());
            let pub_date = item.pub_date().map(str::to_string);
            let published_at = pub_date.as_deref().and_then(parse_pub_date);

            ParsedItem {
                title: item.title().unwrap_or("").to_string(),
                link,
                description: item.description().map(str::to_string),
                pub_date,
                published_at,
            }
        })
        .collect();

    Ok(ParsedFeed {
        channel: ParsedChannel {
            title: channel.title().to_string(),
            link: channel.link().to_string(),
            description: channel.description().to_string(),
            language: channel.language().map(str::to_string),
        },
        items,
    })
}

fn parse_atom(bytes: &[u8]) -> std::result::Result<ParsedFeed, atom_syndication::Error> {
    let feed = atom_syndication::Feed::read_from(bytes)?;

    let items = feed
        .entries()
        .iter()
        .map(|entry| {
            // Prefer the alternate link, then any link, then the entry id
            let link = entry
                .links()
                .iter()
                .find(|link| link.rel() == "alternate")
                .or_else(|| entry.links().first())
                .map(|link| link.href().to_string())
                .or_else(|| Some(entry.id().to_string()))
                .filter(|l| !l.trim().is_empty());

            let published = entry.published().unwrap_or_else(|| entry.updated());

            let description = entry.summary().map(|s| s.as_str().to_string()).or_else(|| {
                entry
                    .content()
                    .and_then(|c| c.value().map(|v| v.to_string()))
            });

            ParsedItem {
                title: entry.title().as_str().to_string(),
                link,
                description,
                pub_date: Some(published.to_rfc3339()),
                published_at: Some(published.with_timezone(&Utc)),
            }
        })
        .collect();

    Ok(ParsedFeed {
        channel: ParsedChannel {
            title: feed.title().as_str().to_string(),
            link: feed
                .links()
                .first()
                .map(|link| link.href().to_string())
                .unwrap_or_default(),
            description: feed
                .subtitle()
                .map(|s| s.as_str().to_string())
                .unwrap_or_default(),
            language: feed.lang().map(str::to_string),
        },
        items,
    })
}
