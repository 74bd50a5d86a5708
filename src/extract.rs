//! Extraction driver.
//!
//! Orchestrates the staging directory and the forward pipeline: whitespace
//! folding, style serialization, protection folding, cleanup, block
//! extraction. The returned string is the stream text handed to the
//! translation pipeline; everything needed to reverse the process lands in
//! the staging directory (`original`, `styled.xml`, `content.xml`,
//! `state.sqlite3`).

use std::fs;
use std::path::Path;

use tracing::debug;

use crate::dom::{Document, Engine};
use crate::error::{Error, Result};
use crate::formats;
use crate::sentinel;
use crate::state::{SqliteState, StateStore};
use crate::stream::StreamFormat;
use crate::tags::{Format, Tags};

/// Extract a source document into a translation stream.
///
/// `raw` is the document content (for container formats, the content part
/// the caller unpacked, e.g. DOCX `word/document.xml`). The staging
/// directory is created if needed and must be carried over to the later
/// [`inject`](crate::inject) run; its path rides in the stream header.
pub fn extract(
    raw: &str,
    tmpdir: &Path,
    format: Format,
    stream: &dyn StreamFormat,
) -> Result<String> {
    if let Some(c) = sentinel::find_reserved(raw) {
        return Err(Error::Parse(format!(
            "input contains reserved code point U+{:04X}",
            c as u32
        )));
    }

    fs::create_dir_all(tmpdir)?;
    fs::write(tmpdir.join("original"), raw)?;

    let mut state = SqliteState::open(tmpdir)?;
    state.set_format(format.name())?;

    let (doc, tags) = match format {
        Format::Docx => formats::docx::extract_prepass(&mut state, raw)?,
        _ => (Document::parse(raw)?, Tags::for_format(format)),
    };

    let mut engine = Engine::new(doc, tags, &mut state);
    engine.save_spaces();
    debug!("whitespace folded");

    let mut styled = engine.save_styles()?;
    engine.protect_to_styles(&mut styled)?;
    crate::styles::cleanup_styles(&mut styled);
    if format == Format::Docx {
        formats::docx::merge_text_seams(&mut styled);
    }
    fs::write(tmpdir.join("styled.xml"), &styled)?;
    debug!("styles folded, {} bytes", styled.len());

    // Markers are plain text from here on; re-parse and pull the blocks
    // out of the styled tree.
    engine.doc = Document::parse(&styled)?;

    let mut out = String::new();
    stream.header(&mut out, tmpdir);
    engine.extract_blocks(stream, &mut out);
    debug!("extracted {} blocks", engine.block_count());

    let content = engine.doc.serialize(true);
    fs::write(tmpdir.join("content.xml"), &content)?;

    Ok(out)
}
