//! Stream dialects.
//!
//! Two framings exist for the text that travels to and from the
//! translation pipeline: Apertium-style bracketed markers and VISL-style
//! stream commands. Detection is by substring of the first line, which
//! also carries the staging directory so a later `inject` run can find the
//! document's state again.

use std::io::BufRead;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Which stream framing to use; `Detect` sniffs the header line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Dialect {
    /// Decide from the first line of the incoming stream
    #[default]
    Detect,
    /// Apertium bracketed framing
    Apertium,
    /// VISL stream-command framing
    Visl,
}

/// One wire framing for blocks.
pub trait StreamFormat {
    /// Write the stream header carrying the staging directory.
    fn header(&self, out: &mut String, tmpdir: &Path);
    /// Open one block.
    fn block_open(&self, out: &mut String, id: &str);
    /// Append a block's body.
    fn block_body(&self, out: &mut String, body: &str);
    /// Close one block.
    fn block_close(&self, out: &mut String, id: &str);
    /// Parse the staging directory out of the header line.
    fn get_tmpdir(&self, header: &str) -> Option<PathBuf>;
    /// Pull the next block from the incoming stream; false at EOF.
    fn get_block(&self, input: &mut dyn BufRead, body: &mut String, id: &mut String)
        -> Result<bool>;
}

/// Resolve a dialect against the stream's first line.
pub fn detect_stream(dialect: Dialect, header: &str) -> Result<Box<dyn StreamFormat>> {
    match dialect {
        Dialect::Apertium => Ok(Box::new(ApertiumStream)),
        Dialect::Visl => Ok(Box::new(VislStream)),
        Dialect::Detect => {
            if header.contains("[transfuse:") {
                Ok(Box::new(ApertiumStream))
            } else if header.contains("<STREAMCMD:TRANSFUSE:") {
                Ok(Box::new(VislStream))
            } else {
                Err(Error::Stream(
                    "could not detect input stream format".to_string(),
                ))
            }
        }
    }
}

/// Apertium-style framing: `[transfuse:…]` header, `[tf-block:…]` blocks,
/// backslash-escaped brackets inside bodies.
pub struct ApertiumStream;

fn escape_brackets(out: &mut String, body: &str) {
    for c in body.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '[' => out.push_str("\\["),
            ']' => out.push_str("\\]"),
            _ => out.push(c),
        }
    }
}

fn unescape_brackets(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut chars = line.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some(n) => out.push(n),
                None => out.push('\\'),
            }
        } else {
            out.push(c);
        }
    }
    out
}

impl StreamFormat for ApertiumStream {
    fn header(&self, out: &mut String, tmpdir: &Path) {
        out.push_str("[transfuse:");
        out.push_str(&tmpdir.to_string_lossy());
        out.push_str("]\n\n");
    }

    fn block_open(&self, out: &mut String, id: &str) {
        out.push_str("[tf-block:");
        out.push_str(id);
        out.push_str("]\n");
    }

    fn block_body(&self, out: &mut String, body: &str) {
        escape_brackets(out, body);
    }

    fn block_close(&self, out: &mut String, id: &str) {
        let _ = id;
        out.push_str("\n[/tf-block]\n\n");
    }

    fn get_tmpdir(&self, header: &str) -> Option<PathBuf> {
        let rest = &header[header.find("[transfuse:")? + "[transfuse:".len()..];
        let end = rest.find(']')?;
        Some(PathBuf::from(&rest[..end]))
    }

    fn get_block(
        &self,
        input: &mut dyn BufRead,
        body: &mut String,
        id: &mut String,
    ) -> Result<bool> {
        body.clear();
        id.clear();
        let mut line = String::new();

        loop {
            line.clear();
            if input.read_line(&mut line)? == 0 {
                return Ok(false);
            }
            let t = line.trim_end_matches(['\r', '\n']);
            if let Some(rest) = t.strip_prefix("[tf-block:") {
                if let Some(end) = rest.find(']') {
                    id.push_str(&rest[..end]);
                    break;
                }
            }
        }

        let mut first = true;
        loop {
            line.clear();
            if input.read_line(&mut line)? == 0 {
                return Err(Error::Stream(format!("block {id} is unterminated")));
            }
            let t = line.trim_end_matches(['\r', '\n']);
            if t.starts_with("[/tf-block") {
                break;
            }
            if !first {
                body.push('\n');
            }
            body.push_str(&unescape_brackets(t));
            first = false;
        }
        Ok(true)
    }
}

/// VISL-style framing: `<STREAMCMD:TRANSFUSE:…>` header and `<s:…>` block
/// markers; bodies travel raw.
pub struct VislStream;

impl StreamFormat for VislStream {
    fn header(&self, out: &mut String, tmpdir: &Path) {
        out.push_str("<STREAMCMD:TRANSFUSE:");
        out.push_str(&tmpdir.to_string_lossy());
        out.push_str(">\n\n");
    }

    fn block_open(&self, out: &mut String, id: &str) {
        out.push_str("<s:");
        out.push_str(id);
        out.push_str(">\n");
    }

    fn block_body(&self, out: &mut String, body: &str) {
        out.push_str(body);
    }

    fn block_close(&self, out: &mut String, id: &str) {
        out.push_str("\n</s:");
        out.push_str(id);
        out.push_str(">\n\n");
    }

    fn get_tmpdir(&self, header: &str) -> Option<PathBuf> {
        let rest = &header[header.find("<STREAMCMD:TRANSFUSE:")? + "<STREAMCMD:TRANSFUSE:".len()..];
        let end = rest.rfind('>')?;
        Some(PathBuf::from(&rest[..end]))
    }

    fn get_block(
        &self,
        input: &mut dyn BufRead,
        body: &mut String,
        id: &mut String,
    ) -> Result<bool> {
        body.clear();
        id.clear();
        let mut line = String::new();

        loop {
            line.clear();
            if input.read_line(&mut line)? == 0 {
                return Ok(false);
            }
            let t = line.trim_end_matches(['\r', '\n']);
            if let Some(rest) = t.strip_prefix("<s:") {
                if let Some(end) = rest.find('>') {
                    id.push_str(&rest[..end]);
                    break;
                }
            }
        }

        let mut first = true;
        loop {
            line.clear();
            if input.read_line(&mut line)? == 0 {
                return Err(Error::Stream(format!("block {id} is unterminated")));
            }
            let t = line.trim_end_matches(['\r', '\n']);
            if t.starts_with("</s:") {
                break;
            }
            if !first {
                body.push('\n');
            }
            body.push_str(t);
            first = false;
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::BufReader;

    fn roundtrip(stream: &dyn StreamFormat) {
        let mut out = String::new();
        stream.header(&mut out, Path::new("/tmp/tf-abc123"));
        stream.block_open(&mut out, "1-AbCd");
        stream.block_body(&mut out, "Hello [world]\nsecond line");
        stream.block_close(&mut out, "1-AbCd");
        stream.block_open(&mut out, "2-XyZ9");
        stream.block_body(&mut out, "short");
        stream.block_close(&mut out, "2-XyZ9");

        let mut lines = out.lines();
        let header = lines.next().unwrap().to_string();
        assert_eq!(
            stream.get_tmpdir(&header),
            Some(PathBuf::from("/tmp/tf-abc123"))
        );

        let rest = out.splitn(2, '\n').nth(1).unwrap().to_string();
        let mut input = BufReader::new(rest.as_bytes());
        let mut body = String::new();
        let mut id = String::new();

        assert!(stream.get_block(&mut input, &mut body, &mut id).unwrap());
        assert_eq!(id, "1-AbCd");
        assert_eq!(body, "Hello [world]\nsecond line");

        assert!(stream.get_block(&mut input, &mut body, &mut id).unwrap());
        assert_eq!(id, "2-XyZ9");
        assert_eq!(body, "short");

        assert!(!stream.get_block(&mut input, &mut body, &mut id).unwrap());
    }

    #[test]
    fn test_apertium_roundtrip() {
        roundtrip(&ApertiumStream);
    }

    #[test]
    fn test_visl_roundtrip() {
        roundtrip(&VislStream);
    }

    #[test]
    fn test_detection() {
        assert!(detect_stream(Dialect::Detect, "[transfuse:/tmp/x]").is_ok());
        assert!(detect_stream(Dialect::Detect, "<STREAMCMD:TRANSFUSE:/tmp/x>").is_ok());
        assert!(detect_stream(Dialect::Detect, "random first line").is_err());
    }

    #[test]
    fn test_apertium_bracket_escaping() {
        let mut out = String::new();
        ApertiumStream.block_body(&mut out, r"a\b[c]d");
        assert_eq!(out, r"a\\b\[c\]d");
        assert_eq!(unescape_brackets(&out), r"a\b[c]d");
    }
}
