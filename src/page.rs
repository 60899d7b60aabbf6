//! Referrer observations scraped from the destination page.
//!
//! Every test page exposes the referrer through four channels:
//!
//! - `header`: the `Referer` row of the server-rendered request header table
//! - `document`: `#referrer`, filled from `document.referrer`
//! - `frame`: `#frame-referrer` in the embedded same-origin iframe, filled
//!   from `parent.document.referrer`
//! - `reflect`: `#frame-reflect` in the iframe, filled by calling the frame
//!   realm's `Document.prototype.referrer` getter on the parent document
//!
//! A missing element and an empty value both count as "no referrer".

use scraper::{ElementRef, Html, Selector};
use serde::Serialize;
use std::fmt;

pub const REFERRER_ID: &str = "referrer";
pub const FRAME_REFERRER_ID: &str = "frame-referrer";
pub const FRAME_REFLECT_ID: &str = "frame-reflect";
pub const FRAME_ID: &str = "frame";

/// One of the four places the referrer is read from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Header,
    Document,
    Frame,
    Reflect,
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Channel::Header => "HTTP Referer header",
            Channel::Document => "document.referrer",
            Channel::Frame => "iframe parent.document.referrer",
            Channel::Reflect => "iframe reflected referrer getter",
        };
        f.write_str(name)
    }
}

/// Referrer values observed on a loaded page
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Observation {
    pub header: Option<String>,
    pub document: Option<String>,
    pub frame: Option<String>,
    pub reflect: Option<String>,
}

/// A channel whose value differs from the expectation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelMismatch {
    pub channel: Channel,
    pub expected: Option<String>,
    pub observed: Option<String>,
}

/// All channels that failed for one navigation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Mismatch {
    pub channels: Vec<ChannelMismatch>,
}

impl fmt::Display for Mismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, m) in self.channels.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{}: expected {}, got {}", m.channel, show(&m.expected), show(&m.observed))?;
        }
        Ok(())
    }
}

impl std::error::Error for Mismatch {}

fn show(v: &Option<String>) -> String {
    match v {
        Some(s) => format!("'{}'", s),
        None => "no referrer".to_string(),
    }
}

impl Observation {
    /// Build an observation from the serialized main document and the
    /// serialized iframe document (if the frame could be read at all).
    pub fn from_documents(main_html: &str, frame_html: Option<&str>) -> Self {
        let main = Html::parse_document(main_html);
        let frame = frame_html.map(Html::parse_document);
        Self {
            header: header_value(&main, "Referer"),
            document: text_by_id(&main, REFERRER_ID),
            frame: frame.as_ref().and_then(|f| text_by_id(f, FRAME_REFERRER_ID)),
            reflect: frame.as_ref().and_then(|f| text_by_id(f, FRAME_REFLECT_ID)),
        }
    }

    pub fn channels(&self) -> [(Channel, &Option<String>); 4] {
        [
            (Channel::Header, &self.header),
            (Channel::Document, &self.document),
            (Channel::Frame, &self.frame),
            (Channel::Reflect, &self.reflect),
        ]
    }

    /// Check that every channel shows `expected`.
    pub fn verify(&self, expected: Option<&str>) -> Result<(), Mismatch> {
        let channels: Vec<ChannelMismatch> = self
            .channels()
            .into_iter()
            .filter(|(_, observed)| observed.as_deref() != expected)
            .map(|(channel, observed)| ChannelMismatch {
                channel,
                expected: expected.map(str::to_string),
                observed: observed.clone(),
            })
            .collect();
        if channels.is_empty() {
            Ok(())
        } else {
            Err(Mismatch { channels })
        }
    }
}

fn normalise(text: String) -> Option<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn text_by_id(doc: &Html, id: &str) -> Option<String> {
    let selector = Selector::parse(&format!("#{}", id)).ok()?;
    doc.select(&selector)
        .next()
        .and_then(|el| normalise(el.text().collect()))
}

/// Value cell following the `<td>` whose text is exactly `name`, the
/// equivalent of `//td[text()="name"]/following::td`.
fn header_value(doc: &Html, name: &str) -> Option<String> {
    let selector = Selector::parse("td").ok()?;
    let mut cells = doc.select(&selector);
    cells.find(|td| cell_text(td) == name)?;
    cells.next().and_then(|td| normalise(cell_text(&td)))
}

fn cell_text(td: &ElementRef<'_>) -> String {
    td.text().collect::<String>().trim().to_string()
}
