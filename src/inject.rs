//! Reconstruction.
//!
//! Reads translated blocks from the stream, substitutes them into the
//! persisted `content.xml`, scrubs leftover block markers, re-expands
//! inline and protected-inline markers through the state store, re-parses
//! the XML and restores the folded whitespace. Unknown identifiers are a
//! visible, non-fatal condition: one diagnostic line each, and the marker
//! remnant (or untouched original text) stays in the output.

use std::fs;
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use tracing::{debug, warn};

use crate::dom::{append_xml, Document, Engine};
use crate::error::{Error, Result};
use crate::formats;
use crate::sentinel::{TFB_OPEN_B, TFB_OPEN_E};
use crate::state::{SqliteState, StateStore};
use crate::stream::{detect_stream, Dialect};
use crate::styles::cleanup_styles;
use crate::tags::{Format, Tags};

fn rx_block_remnant() -> &'static Regex {
    static RX: OnceLock<Regex> = OnceLock::new();
    RX.get_or_init(|| {
        Regex::new("\u{e020}[0-9]+-[0-9A-Za-z_-]+\u{e021}").expect("block-remnant pattern")
    })
}

fn rx_inlines() -> &'static Regex {
    static RX: OnceLock<Regex> = OnceLock::new();
    RX.get_or_init(|| {
        Regex::new(
            "\u{e011}([^\u{e012}]+?):([^\u{e012}:]+)\u{e012}([^\u{e011}-\u{e013}]*)\u{e013}",
        )
        .expect("inline-marker pattern")
    })
}

fn rx_prot_markers() -> &'static Regex {
    static RX: OnceLock<Regex> = OnceLock::new();
    RX.get_or_init(|| {
        Regex::new("\u{e020}([^\u{e021}]+?):([^\u{e021}:]+)\u{e021}").expect("protected-marker pattern")
    })
}

/// Reinject a translated stream into the document it was extracted from.
///
/// The staging directory is taken from `tmpdir` or, when `None`, from the
/// stream header. Returns the staging directory and the name of the
/// produced file inside it.
pub fn inject(
    tmpdir: Option<&Path>,
    input: &mut dyn BufRead,
    dialect: Dialect,
) -> Result<(PathBuf, String)> {
    let mut header = String::new();
    if input.read_line(&mut header)? == 0 {
        return Err(Error::Stream("empty input stream".to_string()));
    }

    let stream = detect_stream(dialect, &header)?;

    let tmpdir: PathBuf = match tmpdir {
        Some(dir) => dir.to_path_buf(),
        None => stream.get_tmpdir(&header).ok_or_else(|| {
            Error::Stream("could not read state folder path from stream header".to_string())
        })?,
    };

    for artifact in ["original", "content.xml", "state.sqlite3"] {
        if !tmpdir.join(artifact).exists() {
            return Err(Error::Staging(tmpdir.clone()));
        }
    }

    let mut content = fs::read_to_string(tmpdir.join("content.xml"))?;

    // Read all blocks from the input stream and put them back in the
    // document
    let mut body = String::new();
    let mut bid = String::new();
    let mut escaped = String::new();
    while stream.get_block(input, &mut body, &mut bid)? {
        if bid.is_empty() {
            continue;
        }
        escaped.clear();
        append_xml(&mut escaped, body.trim());

        let open_marker = format!("{TFB_OPEN_B}{bid}{TFB_OPEN_E}");
        let close_marker = open_marker.clone();

        let mut out = String::with_capacity(content.len());
        let mut l = 0usize;
        loop {
            let Some(rel_b) = content[l..].find(&open_marker) else {
                break;
            };
            let b = l + rel_b;
            let after_open = b + open_marker.len();
            let Some(rel_e) = content[after_open..].find(&close_marker) else {
                break;
            };
            out.push_str(&content[l..b]);
            out.push_str(&escaped);
            l = after_open + rel_e + close_marker.len();
        }
        if l == 0 {
            warn!("Block {bid} did not exist in this document");
            continue;
        }
        out.push_str(&content[l..]);
        content = out;
    }

    // Remove block markers for blocks that had no translation, leaving
    // their original bodies in place
    if rx_block_remnant().is_match(&content) {
        content = rx_block_remnant().replace_all(&content, "").into_owned();
    }

    cleanup_styles(&mut content);

    let mut state = SqliteState::open(&tmpdir)?;

    // Turn inline and protected-inline markers back into their original
    // forms; nested markers surface after expansion, so repeat until a
    // pass changes nothing
    loop {
        let mut did = false;

        if rx_inlines().is_match(&content) {
            let mut out = String::with_capacity(content.len());
            let mut last = 0;
            for caps in rx_inlines().captures_iter(&content) {
                did = true;
                let whole = caps.get(0).unwrap();
                out.push_str(&content[last..whole.start()]);
                last = whole.end();

                let (kind, hash, inner) = (&caps[1], &caps[2], &caps[3]);
                let (open, close) = state.lookup(kind, hash)?;
                if open.is_empty() && close.is_empty() {
                    warn!("Inline tag {kind}:{hash} did not exist in this document");
                }
                out.push_str(&open);
                out.push_str(inner);
                out.push_str(&close);
            }
            out.push_str(&content[last..]);
            content = out;
        }

        if rx_prot_markers().is_match(&content) {
            let mut out = String::with_capacity(content.len());
            let mut last = 0;
            for caps in rx_prot_markers().captures_iter(&content) {
                did = true;
                let whole = caps.get(0).unwrap();
                out.push_str(&content[last..whole.start()]);
                last = whole.end();

                let (kind, hash) = (&caps[1], &caps[2]);
                let (open, close) = state.lookup(kind, hash)?;
                if open.is_empty() && close.is_empty() {
                    warn!("Protected inline tag {kind}:{hash} did not exist in this document");
                }
                out.push_str(&open);
                out.push_str(&close);
            }
            out.push_str(&content[last..]);
            content = out;
        }

        if !did {
            break;
        }
    }

    let format = Format::from_name(&state.format()?).unwrap_or(Format::Xml);
    debug!("injecting as {}", format.name());

    let doc = Document::parse(&content)?;
    let mut engine = Engine::new(doc, Tags::for_format(format), &mut state);
    engine.restore_spaces();

    let serialized = engine.doc.serialize(false);
    let output = match format {
        Format::Docx => formats::docx::inject_postpass(&serialized),
        _ => serialized,
    };
    fs::write(tmpdir.join("injected.xml"), &output)?;

    // Container formats need repacking by the caller; containerless
    // formats get their final file right away
    let fname = match format {
        Format::Docx | Format::Pptx | Format::Odt | Format::Odp => "injected.xml".to_string(),
        _ => {
            let name = format!("injected.{}", format.extension());
            fs::write(tmpdir.join(&name), &output)?;
            name
        }
    };

    Ok((tmpdir, fname))
}
