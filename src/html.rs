//! HTML post-processing over a quick-xml event stream.
//!
//! Rendered bodies go through two passes:
//!
//! - [`add_header_ids`] gives every `<h1>`–`<h6>` a unique `id` and returns
//!   the header list used for fragment links and tables of contents.
//! - [`truncate`] produces abstracts: head/style/script/title elements are
//!   dropped and the visible text is cut after a character budget, with
//!   every still-open element closed so the result stays well formed.
//!
//! The reader runs with all well-formedness checks disabled so ordinary
//! HTML (void elements without `/>`, mismatched case) passes through.

use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use thiserror::Error;

use crate::naming;

#[derive(Error, Debug)]
pub enum HtmlError {
    #[error("HTML parse error: {0}")]
    Xml(#[from] quick_xml::Error),
    #[error("HTML write error: {0}")]
    Io(#[from] std::io::Error),
}

/// A heading of a rendered body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Header {
    pub level: u8,
    pub id: String,
    /// Visible text with markup removed.
    pub text: String,
}

/// Class of the marker element whose `id` names the following heading.
const HEADER_TARGET_CLASS: &str = "header_target";

/// Elements whose content never appears in abstracts.
const SKIPPED: &[&[u8]] = &[b"head", b"style", b"script", b"title"];

/// Elements that never have a closing tag.
const VOID: &[&[u8]] = &[
    b"area", b"base", b"br", b"col", b"embed", b"hr", b"img", b"input", b"link", b"meta",
    b"source", b"track", b"wbr",
];

fn create_reader(html: &str) -> Reader<&[u8]> {
    let mut reader = Reader::from_reader(html.as_bytes());
    reader.config_mut().trim_text(false);
    reader.config_mut().enable_all_checks(false);
    reader
}

fn heading_level(name: &[u8]) -> Option<u8> {
    match name {
        [b'h' | b'H', d @ b'1'..=b'6'] => Some(d - b'0'),
        _ => None,
    }
}

fn attr_value(elem: &BytesStart<'_>, key: &[u8]) -> Option<String> {
    elem.attributes()
        .flatten()
        .find(|a| a.key.as_ref() == key)
        .map(|a| String::from_utf8_lossy(&a.value).into_owned())
}

fn is_header_target(elem: &BytesStart<'_>) -> bool {
    attr_value(elem, b"class")
        .is_some_and(|c| c.split_whitespace().any(|c| c == HEADER_TARGET_CLASS))
}

/// Resolve an entity reference name (without `&`/`;`) to its text.
fn resolve_entity(name: &str) -> String {
    let resolved = match name {
        "amp" => Some('&'),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        "nbsp" => Some('\u{a0}'),
        _ => name.strip_prefix('#').and_then(|num| {
            let code = match num.strip_prefix(['x', 'X']) {
                Some(hex) => u32::from_str_radix(hex, 16).ok(),
                None => num.parse::<u32>().ok(),
            };
            code.and_then(char::from_u32)
        }),
    };
    match resolved {
        Some(c) => c.to_string(),
        None => format!("&{};", name),
    }
}

/// Every `id` attribute already present in the document.
fn collect_ids(html: &str) -> Result<HashSet<String>, HtmlError> {
    let mut reader = create_reader(html);
    let mut ids = HashSet::new();
    loop {
        match reader.read_event()? {
            Event::Start(e) | Event::Empty(e) => {
                if let Some(id) = attr_value(&e, b"id") {
                    ids.insert(id);
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(ids)
}

fn generated_id(key: &str, text: &str, short: bool) -> String {
    if short {
        let digest = Sha256::digest(format!("{}:{}", key, text).as_bytes());
        format!("h_{:x}", digest)[..10].to_string()
    } else {
        naming::slugify(text)
    }
}

fn unique_id(base: String, used: &mut HashSet<String>) -> String {
    let mut id = base.clone();
    let mut n = 1;
    while used.contains(&id) {
        id = format!("{}-{}", base, n);
        n += 1;
    }
    used.insert(id.clone());
    id
}

/// Assign an `id` to every heading and collect the header list.
///
/// A heading keeps its own `id`, or takes the `id` of a directly preceding
/// `<div class="header_target" id="...">` marker. Other headings get a slug
/// of their text, or `h_` plus a short hash of `key` and the text when
/// `short` is set. Generated ids never repeat within one document.
pub fn add_header_ids(html: &str, key: &str, short: bool) -> Result<(String, Vec<Header>), HtmlError> {
    let mut used = collect_ids(html)?;
    let mut reader = create_reader(html);
    let mut writer = Writer::new(Vec::with_capacity(html.len() + 64));
    let mut headers = Vec::new();
    let mut pending_target: Option<String> = None;

    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                let name = e.name().as_ref().to_vec();
                if let Some(level) = heading_level(&name) {
                    let mut inner: Vec<Event<'static>> = Vec::new();
                    let mut text = String::new();
                    let mut depth = 0usize;
                    loop {
                        match reader.read_event()? {
                            Event::Start(inner_start) => {
                                if inner_start.name().as_ref() == name.as_slice() {
                                    depth += 1;
                                }
                                inner.push(Event::Start(inner_start.into_owned()));
                            }
                            Event::End(end) if end.name().as_ref() == name.as_slice() => {
                                if depth == 0 {
                                    break;
                                }
                                depth -= 1;
                                inner.push(Event::End(end.into_owned()));
                            }
                            Event::Text(t) => {
                                text.push_str(&String::from_utf8_lossy(&t));
                                inner.push(Event::Text(t.into_owned()));
                            }
                            Event::GeneralRef(r) => {
                                text.push_str(&resolve_entity(&String::from_utf8_lossy(&r)));
                                inner.push(Event::GeneralRef(r.into_owned()));
                            }
                            Event::CData(c) => {
                                text.push_str(&String::from_utf8_lossy(&c));
                                inner.push(Event::CData(c.into_owned()));
                            }
                            Event::Eof => break,
                            other => inner.push(other.into_owned()),
                        }
                    }
                    let text = text.split_whitespace().collect::<Vec<_>>().join(" ");

                    let (id, start) = match attr_value(&e, b"id") {
                        Some(id) => (id, e.into_owned()),
                        None => {
                            let id = match pending_target.take() {
                                Some(target) => target,
                                None => unique_id(generated_id(key, &text, short), &mut used),
                            };
                            let mut start = e.into_owned();
                            start.push_attribute(("id", id.as_str()));
                            (id, start)
                        }
                    };
                    pending_target = None;

                    writer.write_event(Event::Start(start))?;
                    for event in inner {
                        writer.write_event(event)?;
                    }
                    writer.write_event(Event::End(BytesEnd::new(String::from_utf8_lossy(&name))))?;
                    headers.push(Header { level, id, text });
                    continue;
                }
                pending_target = if is_header_target(&e) {
                    attr_value(&e, b"id")
                } else {
                    None
                };
                writer.write_event(Event::Start(e))?;
            }
            Event::Empty(e) => {
                pending_target = if is_header_target(&e) {
                    attr_value(&e, b"id")
                } else {
                    None
                };
                writer.write_event(Event::Empty(e))?;
            }
            Event::Text(t) => {
                if !String::from_utf8_lossy(&t).trim().is_empty() {
                    pending_target = None;
                }
                writer.write_event(Event::Text(t))?;
            }
            Event::Eof => break,
            other => writer.write_event(other)?,
        }
    }

    let out = String::from_utf8_lossy(&writer.into_inner()).into_owned();
    Ok((out, headers))
}

/// Strip non-visible elements and cut the visible text after `max_chars`.
///
/// Entity references count as one character. `max_chars == 0` keeps the
/// whole text. Elements open at the cut point are closed in order.
pub fn truncate(html: &str, max_chars: usize) -> Result<String, HtmlError> {
    let mut remaining = if max_chars == 0 { usize::MAX } else { max_chars };
    let mut reader = create_reader(html);
    let mut writer = Writer::new(Vec::with_capacity(html.len()));
    let mut open: Vec<Vec<u8>> = Vec::new();

    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                let name = e.name().as_ref().to_ascii_lowercase();
                if SKIPPED.contains(&name.as_slice()) {
                    reader.read_to_end(e.name())?;
                    continue;
                }
                if !VOID.contains(&name.as_slice()) {
                    open.push(e.name().as_ref().to_vec());
                }
                writer.write_event(Event::Start(e))?;
            }
            Event::End(e) => {
                let name = e.name().as_ref().to_vec();
                if let Some(pos) = open.iter().rposition(|n| *n == name) {
                    open.truncate(pos);
                }
                writer.write_event(Event::End(e))?;
            }
            Event::Empty(e) => {
                let name = e.name().as_ref().to_ascii_lowercase();
                if !SKIPPED.contains(&name.as_slice()) {
                    writer.write_event(Event::Empty(e))?;
                }
            }
            Event::Text(t) => {
                let text = String::from_utf8_lossy(&t).into_owned();
                let count = text.chars().count();
                if count == 0 {
                    continue;
                }
                if remaining == 0 {
                    break;
                }
                if count <= remaining {
                    remaining -= count;
                    writer.write_event(Event::Text(t))?;
                    if remaining == 0 {
                        break;
                    }
                } else {
                    let cut: String = text.chars().take(remaining).collect();
                    writer.write_event(Event::Text(BytesText::from_escaped(cut)))?;
                    break;
                }
            }
            Event::GeneralRef(r) => {
                if remaining == 0 {
                    break;
                }
                remaining -= 1;
                writer.write_event(Event::GeneralRef(r))?;
                if remaining == 0 {
                    break;
                }
            }
            Event::CData(c) => {
                let text = String::from_utf8_lossy(&c).into_owned();
                if remaining == 0 {
                    break;
                }
                let cut: String = text.chars().take(remaining).collect();
                remaining -= cut.chars().count();
                writer.write_event(Event::Text(BytesText::new(&cut)))?;
            }
            Event::Comment(_) | Event::DocType(_) | Event::Decl(_) | Event::PI(_) => {}
            Event::Eof => break,
            other => writer.write_event(other)?,
        }
    }

    for name in open.iter().rev() {
        writer.write_event(Event::End(BytesEnd::new(String::from_utf8_lossy(name))))?;
    }
    Ok(String::from_utf8_lossy(&writer.into_inner()).into_owned())
}

/// Number of visible characters, counted the way [`truncate`] counts them.
pub fn visible_len(html: &str) -> Result<usize, HtmlError> {
    let mut reader = create_reader(html);
    let mut len = 0;
    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                let name = e.name().as_ref().to_ascii_lowercase();
                if SKIPPED.contains(&name.as_slice()) {
                    reader.read_to_end(e.name())?;
                }
            }
            Event::Text(t) => len += String::from_utf8_lossy(&t).chars().count(),
            Event::GeneralRef(_) => len += 1,
            Event::CData(c) => len += String::from_utf8_lossy(&c).chars().count(),
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(len)
}
