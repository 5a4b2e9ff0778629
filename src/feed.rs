//! Syndication feeds.
//!
//! A `feed` content writes an Atom 1.0 document (`feed_type = "atom"`) or
//! an RSS 1.0 (RDF) document (`feed_type = "rss"`). Entries are the newest
//! `feed_num_articles` articles matching the feed's `filters`, `excludes`
//! and `directories`. The render context must use absolute links: entry
//! summaries are abstracts rendered in that context, so links inside them
//! are absolute too.

use chrono::{DateTime, FixedOffset};
use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use serde_json::Value;
use std::fmt::Display;

use crate::config::ConfigError;
use crate::content::Content;
use crate::context::{BuildContext, RenderError};
use crate::store::Query;
use crate::types::{ContentPath, PageArgs};

const ATOM_NS: &str = "http://www.w3.org/2005/Atom";
const RDF_NS: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#";
const RSS_NS: &str = "http://purl.org/rss/1.0/";
const DC_NS: &str = "http://purl.org/dc/elements/1.1/";

struct Entry {
    title: String,
    url: String,
    updated: DateTime<FixedOffset>,
    summary: String,
}

/// Serialize the feed document for `feed`.
pub fn render(ctx: &BuildContext, feed: &Content) -> Result<Vec<u8>, RenderError> {
    let config = ctx.config();
    let feed_type = feed.get_str(config, "feed_type")?;

    let query = Query::from_values(
        feed.get_opt(config, "filters")?.as_ref(),
        feed.get_opt(config, "excludes")?.as_ref(),
        feed.get_opt(config, "directories")?.as_ref(),
        true,
    );
    let limit = feed.get_int(config, "feed_num_articles")?.max(0) as usize;
    let mut entries = Vec::new();
    for article in ctx.site().store.get_many(config, &query)?.into_iter().take(limit) {
        ctx.add_depend(article.path());
        entries.push(Entry {
            title: ctx.title(article)?,
            url: ctx.url(article, &PageArgs::default())?,
            updated: entry_updated(article, ctx)?,
            summary: ctx.get_abstract(article, None)?,
        });
    }

    let title = ctx.title(feed)?;
    let self_url = ctx.url(feed, ctx.args())?;
    let site_url = feed.get_str(config, "site_url")?;
    let updated = entries
        .iter()
        .map(|e| e.updated)
        .max()
        .unwrap_or_else(|| DateTime::UNIX_EPOCH.fixed_offset());

    let mut out = FeedWriter::new(feed.path());
    out.declaration()?;
    match feed_type.as_str() {
        "atom" => write_atom(&mut out, &title, &self_url, &site_url, updated, &entries)?,
        "rss" => write_rss(&mut out, &title, &self_url, &site_url, updated, &entries)?,
        _ => {
            return Err(ConfigError::invalid(
                "feed_type",
                &Value::String(feed_type),
                "expected atom or rss",
            )
            .into());
        }
    }
    Ok(out.finish())
}

/// `updated` metadata, else `date`, else the epoch.
fn entry_updated(article: &Content, ctx: &BuildContext) -> Result<DateTime<FixedOffset>, RenderError> {
    let config = ctx.config();
    if let Some(Value::String(s)) = article.get_opt(config, "updated")?
        && let Ok(updated) = DateTime::parse_from_rfc3339(&s)
    {
        return Ok(updated);
    }
    Ok(article
        .date(config)?
        .unwrap_or_else(|| DateTime::UNIX_EPOCH.fixed_offset()))
}

fn write_atom(
    out: &mut FeedWriter,
    title: &str,
    self_url: &str,
    site_url: &str,
    updated: DateTime<FixedOffset>,
    entries: &[Entry],
) -> Result<(), RenderError> {
    out.start("feed", &[("xmlns", ATOM_NS)])?;
    out.text_element("title", title)?;
    out.empty("link", &[("href", self_url), ("rel", "self")])?;
    out.empty("link", &[("href", site_url)])?;
    out.text_element("id", self_url)?;
    out.text_element("updated", &updated.to_rfc3339())?;
    for entry in entries {
        out.start("entry", &[])?;
        out.text_element("title", &entry.title)?;
        out.empty("link", &[("href", entry.url.as_str())])?;
        out.text_element("id", &entry.url)?;
        out.text_element("updated", &entry.updated.to_rfc3339())?;
        out.start("summary", &[("type", "html")])?;
        out.text(&entry.summary)?;
        out.end("summary")?;
        out.end("entry")?;
    }
    out.end("feed")
}

fn write_rss(
    out: &mut FeedWriter,
    title: &str,
    self_url: &str,
    site_url: &str,
    updated: DateTime<FixedOffset>,
    entries: &[Entry],
) -> Result<(), RenderError> {
    out.start(
        "rdf:RDF",
        &[("xmlns:rdf", RDF_NS), ("xmlns", RSS_NS), ("xmlns:dc", DC_NS)],
    )?;
    out.start("channel", &[("rdf:about", self_url)])?;
    out.text_element("title", title)?;
    out.text_element("link", site_url)?;
    out.text_element("description", title)?;
    out.text_element("dc:date", &updated.to_rfc3339())?;
    out.start("items", &[])?;
    out.start("rdf:Seq", &[])?;
    for entry in entries {
        out.empty("rdf:li", &[("rdf:resource", entry.url.as_str())])?;
    }
    out.end("rdf:Seq")?;
    out.end("items")?;
    out.end("channel")?;
    for entry in entries {
        out.start("item", &[("rdf:about", entry.url.as_str())])?;
        out.text_element("title", &entry.title)?;
        out.text_element("link", &entry.url)?;
        out.text_element("description", &entry.summary)?;
        out.text_element("dc:date", &entry.updated.to_rfc3339())?;
        out.end("item")?;
    }
    out.end("rdf:RDF")
}

/// Indenting XML writer that reports failures against one feed content.
struct FeedWriter {
    writer: Writer<Vec<u8>>,
    content: ContentPath,
}

impl FeedWriter {
    fn new(content: &ContentPath) -> Self {
        Self {
            writer: Writer::new_with_indent(Vec::new(), b' ', 2),
            content: content.clone(),
        }
    }

    fn fail(&self, err: impl Display) -> RenderError {
        RenderError::Feed {
            content: self.content.clone(),
            message: err.to_string(),
        }
    }

    fn write(&mut self, event: Event<'_>) -> Result<(), RenderError> {
        self.writer.write_event(event).map_err(|e| self.fail(e))
    }

    fn declaration(&mut self) -> Result<(), RenderError> {
        self.write(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)))
    }

    fn start(&mut self, tag: &str, attrs: &[(&str, &str)]) -> Result<(), RenderError> {
        let mut elem = BytesStart::new(tag);
        for &attr in attrs {
            elem.push_attribute(attr);
        }
        self.write(Event::Start(elem))
    }

    fn end(&mut self, tag: &str) -> Result<(), RenderError> {
        self.write(Event::End(BytesEnd::new(tag)))
    }

    fn empty(&mut self, tag: &str, attrs: &[(&str, &str)]) -> Result<(), RenderError> {
        let mut elem = BytesStart::new(tag);
        for &attr in attrs {
            elem.push_attribute(attr);
        }
        self.write(Event::Empty(elem))
    }

    fn text(&mut self, text: &str) -> Result<(), RenderError> {
        self.write(Event::Text(BytesText::new(text)))
    }

    fn text_element(&mut self, tag: &str, text: &str) -> Result<(), RenderError> {
        self.start(tag, &[])?;
        self.text(text)?;
        self.end(tag)
    }

    fn finish(self) -> Vec<u8> {
        let mut bytes = self.writer.into_inner();
        bytes.push(b'\n');
        bytes
    }
}
