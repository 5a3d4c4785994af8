use crate::{HttpFsError, HttpFsResult};
use chrono::{DateTime, NaiveDateTime, Utc};
use percent_encoding::percent_decode_str;
use scraper::{ElementRef, Html, Node as HtmlNode};
use serde::Deserialize;

/// Apache autoindex timestamp layouts, classic first.
const AUTOINDEX_TIME_FORMATS: [&str; 2] = ["%d-%b-%Y %H:%M", "%Y-%m-%d %H:%M"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DirEntryKind {
    Directory,
    File,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryEntry {
    pub name: String,
    pub kind: DirEntryKind,
    /// Best effort; `None` when the listing carried no usable time.
    pub mod_time: Option<DateTime<Utc>>,
}

impl DirectoryEntry {
    pub fn is_dir(&self) -> bool {
        self.kind == DirEntryKind::Directory
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListingFormat {
    Html,
    Json,
}

impl ListingFormat {
    /// Parameters such as `; charset=utf-8` are ignored.
    pub fn from_content_type(content_type: &str) -> HttpFsResult<Self> {
        let mime = content_type
            .split(';')
            .next()
            .unwrap_or("")
            .trim()
            .to_ascii_lowercase();
        match mime.as_str() {
            "text/html" => Ok(ListingFormat::Html),
            "application/json" => Ok(ListingFormat::Json),
            _ => Err(HttpFsError::UnsupportedListing(format!(
                "content type '{}'",
                content_type
            ))),
        }
    }
}

pub fn parse_listing(format: ListingFormat, body: &[u8]) -> HttpFsResult<Vec<DirectoryEntry>> {
    match format {
        ListingFormat::Html => Ok(parse_html_listing(&String::from_utf8_lossy(body))),
        ListingFormat::Json => parse_json_listing(body),
    }
}

/// Scrapes every anchor of an autoindex page. The href names the entry, a
/// trailing `/` marks a directory, and the text after the anchor holds the
/// modification time.
pub fn parse_html_listing(body: &str) -> Vec<DirectoryEntry> {
    let document = Html::parse_document(body);
    let mut entries = Vec::new();
    for node in document.tree.root().descendants() {
        let anchor = match ElementRef::wrap(node) {
            Some(v) if v.value().name() == "a" => v,
            _ => continue,
        };
        let href = match anchor.value().attr("href") {
            Some(v) => v,
            None => continue,
        };
        let (name, kind) = match entry_from_href(href) {
            Some(v) => v,
            None => {
                debug!("skip anchor href={}", href);
                continue;
            }
        };
        let mod_time = anchor_time_text(anchor)
            .as_deref()
            .and_then(parse_autoindex_time);
        debug!("{} {:?}", name, kind);
        entries.push(DirectoryEntry {
            name,
            kind,
            mod_time,
        });
    }
    entries
}

fn entry_from_href(href: &str) -> Option<(String, DirEntryKind)> {
    let href = href.trim();
    // autoindex writes `./a:b` so that a colon is not read as a scheme
    let (href, dot_relative) = match href.strip_prefix("./") {
        Some(rest) => (rest, true),
        None => (href, false),
    };
    if href.is_empty() || href.starts_with(['?', '#', '/']) {
        return None;
    }
    let first_segment = href.split('/').next().unwrap_or("");
    if !dot_relative && first_segment.contains(':') {
        return None;
    }

    let kind = if href.ends_with('/') {
        DirEntryKind::Directory
    } else {
        DirEntryKind::File
    };
    // a lossy name would re-encode to a path the server does not have
    let decoded = match percent_decode_str(href).decode_utf8() {
        Ok(v) => v.into_owned(),
        Err(err) => {
            warn!("skip href {}: {}", href, err);
            return None;
        }
    };
    let name = decoded.trim_end_matches('/');
    if name.is_empty() || name == "." || name == ".." || name.contains('/') {
        return None;
    }
    Some((name.to_string(), kind))
}

/// Text holding the timestamp for an anchor: the text node right after it,
/// or the next cell for table-style listings.
fn anchor_time_text(anchor: ElementRef<'_>) -> Option<String> {
    if let Some(sibling) = anchor.next_sibling() {
        if let HtmlNode::Text(text) = sibling.value() {
            let text: &str = text;
            if !text.trim().is_empty() {
                return Some(text.to_string());
            }
        }
    }

    let cell = anchor.parent()?;
    match cell.value() {
        HtmlNode::Element(element) if element.name() == "td" => {}
        _ => return None,
    }
    let next_cell = cell.next_siblings().find(|n| n.value().is_element())?;
    let text: String = next_cell
        .descendants()
        .filter_map(|n| match n.value() {
            HtmlNode::Text(text) => {
                let text: &str = text;
                Some(text.to_string())
            }
            _ => None,
        })
        .collect();
    Some(text)
}

/// Parses the first two whitespace separated tokens after an anchor as a
/// timestamp. Unparsable text degrades to `None`.
pub fn parse_autoindex_time(text: &str) -> Option<DateTime<Utc>> {
    let tokens: Vec<&str> = text.split_whitespace().take(2).collect();
    if tokens.len() < 2 {
        return None;
    }
    let ts = tokens.join(" ");
    for format in AUTOINDEX_TIME_FORMATS {
        if let Ok(t) = NaiveDateTime::parse_from_str(&ts, format) {
            return Some(t.and_utc());
        }
    }
    warn!("parse autoindex time '{}' failed", ts);
    None
}

#[derive(Debug, Deserialize)]
struct BrowseEntry {
    #[serde(alias = "Name")]
    name: String,
    #[serde(alias = "IsDir", default)]
    is_dir: bool,
    #[serde(alias = "ModTime", default)]
    mod_time: Option<String>,
}

/// Decodes a browse-listing JSON array.
pub fn parse_json_listing(body: &[u8]) -> HttpFsResult<Vec<DirectoryEntry>> {
    let raw: Vec<BrowseEntry> = serde_json::from_slice(body)
        .map_err(|e| HttpFsError::InvalidData(format!("decode json listing: {}", e)))?;

    let mut entries = Vec::with_capacity(raw.len());
    for item in raw {
        let name = item.name.trim_end_matches('/').to_string();
        if name.is_empty() {
            continue;
        }
        let mod_time = item.mod_time.as_deref().and_then(|ts| {
            DateTime::parse_from_rfc3339(ts)
                .map(|t| t.with_timezone(&Utc))
                .map_err(|e| warn!("parse mod_time '{}' of {}: {}", ts, name, e))
                .ok()
        });
        let kind = if item.is_dir {
            DirEntryKind::Directory
        } else {
            DirEntryKind::File
        };
        debug!("{} {:?}", name, kind);
        entries.push(DirectoryEntry {
            name,
            kind,
            mod_time,
        });
    }
    Ok(entries)
}
