//! Block extraction.
//!
//! Walks the styled document and emits every translatable text region as a
//! stream block with a content-addressed identifier, replacing the region
//! in the tree with a marker pair the injector can later find. Blocks come
//! from text nodes under allowed parents and from designated attribute
//! values; regions without a single alphanumeric character are skipped.

use std::sync::OnceLock;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use indextree::NodeId;
use regex::Regex;
use xxhash_rust::xxh32::xxh32;

use crate::dom::{Engine, NodeKind};
use crate::sentinel::{TFB_CLOSE_B, TFB_CLOSE_E, TFB_OPEN_B, TFB_OPEN_E};
use crate::stream::StreamFormat;

fn rx_any_alnum() -> &'static Regex {
    static RX: OnceLock<Regex> = OnceLock::new();
    RX.get_or_init(|| Regex::new(r"[\w\p{L}\p{N}\p{M}]").expect("alnum pattern"))
}

/// Render a block identifier: ordinal, dash, base64url of the body hash.
fn block_id(ordinal: u32, body: &str) -> String {
    let hash = xxh32(body.as_bytes(), 0);
    format!("{}-{}", ordinal, URL_SAFE_NO_PAD.encode(hash.to_be_bytes()))
}

/// Wrap a block body in its in-tree marker pair.
fn block_markers(id: &str, body: &str) -> String {
    format!("{TFB_OPEN_B}{id}{TFB_OPEN_E}{body}{TFB_CLOSE_B}{id}{TFB_CLOSE_E}")
}

impl<'a> Engine<'a> {
    /// Extract blocks and textual attributes for the stream, leaving
    /// unique markers that injection can later search for.
    pub fn extract_blocks(&mut self, stream: &dyn StreamFormat, out: &mut String) {
        self.extract_blocks_in(stream, out, self.doc.root, 0, false);
    }

    fn extract_blocks_in(
        &mut self,
        stream: &dyn StreamFormat,
        out: &mut String,
        dom: NodeId,
        rn: usize,
        txt: bool,
    ) {
        // If there are no parent tags set, all tags are valid parents
        let txt = txt || self.tags.parents_allow.is_empty();

        let mut next = self.doc.arena[dom].first_child();
        while let Some(child) = next {
            next = self.doc.arena[child].next_sibling();

            let mut lname = self.scratch.take(rn);
            let is_elem = self.doc.lower_name_of(child, &mut lname);

            if is_elem {
                if self.tags.protected.contains(lname.as_str()) {
                    self.scratch.give(rn, lname);
                    continue;
                }
                self.extract_attr_blocks(stream, out, child);
                let allowed = self.tags.parents_allow.contains(lname.as_str());
                self.scratch.give(rn, lname);
                self.extract_blocks_in(stream, out, child, rn + 1, allowed || txt);
                continue;
            }
            self.scratch.give(rn, lname);

            if !matches!(self.doc.kind(child), NodeKind::Text(t) if !t.is_empty()) {
                continue;
            }
            if !txt {
                continue;
            }
            if self.doc.attr(dom, "tf-protect").is_some() {
                continue;
            }
            if !self.tags.parents_direct.is_empty() {
                let mut pname = self.scratch.take(rn);
                self.doc.lower_name_of(dom, &mut pname);
                let direct = self.tags.parents_direct.contains(pname.as_str());
                self.scratch.give(rn, pname);
                if !direct {
                    continue;
                }
            }

            let body = self.doc.text(child).unwrap_or("").to_string();
            if !rx_any_alnum().is_match(&body) {
                continue;
            }

            self.blocks += 1;
            let id = block_id(self.blocks, &body);
            stream.block_open(out, &id);
            stream.block_body(out, &body);
            stream.block_close(out, &id);
            self.doc.set_text(child, &block_markers(&id, &body));
        }
    }

    /// Extract translatable attribute values from one element.
    fn extract_attr_blocks(&mut self, stream: &dyn StreamFormat, out: &mut String, child: NodeId) {
        for i in 0..self.tags.tag_attrs.len() {
            let name = &self.tags.tag_attrs[i];
            let Some(value) = self.doc.attr(child, name).map(|v| v.to_string()) else {
                continue;
            };
            // Values with no alphanumeric content carry nothing to
            // translate
            if !rx_any_alnum().is_match(&value) {
                continue;
            }
            self.blocks += 1;
            let id = block_id(self.blocks, &value);
            stream.block_open(out, &id);
            stream.block_body(out, &value);
            stream.block_close(out, &id);
            self.doc.set_attr(child, name, &block_markers(&id, &value));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::Document;
    use crate::state::MemState;
    use crate::stream::ApertiumStream;
    use crate::tags::Tags;

    fn run(xml: &str, tags: Tags) -> (String, String, u32) {
        let mut state = MemState::default();
        let doc = Document::parse(xml).unwrap();
        let mut eng = Engine::new(doc, tags, &mut state);
        let mut out = String::new();
        eng.extract_blocks(&ApertiumStream, &mut out);
        let blocks = eng.block_count();
        (out, eng.doc.serialize(true), blocks)
    }

    #[test]
    fn test_everything_extracted_without_parent_tags() {
        let (out, content, blocks) = run("<doc><p>one</p><p>two</p></doc>", Tags::default());
        assert_eq!(blocks, 2);
        assert!(out.contains("one") && out.contains("two"));
        // The tree now carries marker pairs with the original bodies.
        assert_eq!(content.matches('\u{e020}').count(), 4);
    }

    #[test]
    fn test_parents_allow_filters() {
        let mut tags = Tags::default();
        tags.parents_allow.insert("w:t".to_string());
        let (out, content, blocks) = run(
            "<w:document><w:sdt>skip me</w:sdt><w:t>take me</w:t></w:document>",
            tags,
        );
        assert_eq!(blocks, 1);
        assert!(out.contains("take me") && !out.contains("skip me"));
        assert!(content.contains("<w:sdt>skip me</w:sdt>"));
    }

    #[test]
    fn test_parents_direct_filters() {
        let mut tags = Tags::default();
        tags.parents_allow.insert("p".to_string());
        tags.parents_direct.insert("em".to_string());
        let (_, _, blocks) = run("<doc><p>loose<em>direct</em></p></doc>", tags);
        // Only the text whose immediate parent is <em> qualifies; "loose"
        // sits directly under <p>.
        assert_eq!(blocks, 1);
    }

    #[test]
    fn test_protected_and_non_alnum_skipped() {
        let mut tags = Tags::default();
        tags.protected.insert("script".to_string());
        let (out, _, blocks) = run("<doc><p>•••</p><script>code</script><p>ok</p></doc>", tags);
        assert_eq!(blocks, 1);
        assert!(!out.contains("code"));
        assert!(out.contains("ok"));
    }

    #[test]
    fn test_tf_protect_attr_blocks_extraction() {
        let (_, _, blocks) = run(
            "<doc><p tf-protect=\"1\">no</p><p>yes</p></doc>",
            Tags::default(),
        );
        assert_eq!(blocks, 1);
    }

    #[test]
    fn test_attr_values_extracted() {
        let mut tags = Tags::default();
        tags.tag_attrs.push("alt".to_string());
        let (out, content, blocks) = run(
            "<doc><img alt=\"A red fox\"/><img alt=\"---\"/><p>text</p></doc>",
            tags,
        );
        assert_eq!(blocks, 2);
        assert!(out.contains("A red fox"));
        // The decorative-only alt value has no alphanumeric content.
        assert!(content.contains("alt=\"---\""));
        assert!(content.contains("\u{e020}1-"));
    }

    #[test]
    fn test_identifiers_unique_and_ordinals_contiguous() {
        let (out, _, blocks) = run(
            "<doc><p>same</p><p>same</p><p>same</p></doc>",
            Tags::default(),
        );
        assert_eq!(blocks, 3);
        let mut opens: Vec<String> = vec![];
        for line in out.lines() {
            if let Some(rest) = line.strip_prefix("[tf-block:") {
                opens.push(rest.trim_end_matches(']').to_string());
            }
        }
        assert_eq!(opens.len(), 3);
        for (i, id) in opens.iter().enumerate() {
            assert!(id.starts_with(&format!("{}-", i + 1)), "{id}");
        }
        // Same body, same hash suffix; the ordinal disambiguates.
        let suffix = opens[0].split('-').nth(1).unwrap().to_string();
        assert!(opens.iter().all(|id| id.ends_with(&suffix)));
        let unique: std::collections::HashSet<_> = opens.iter().collect();
        assert_eq!(unique.len(), 3);
    }

    #[test]
    fn test_marker_pair_shape() {
        let body = "Hello";
        let id = block_id(7, body);
        let m = block_markers(&id, body);
        assert_eq!(m, format!("\u{e020}{id}\u{e021}Hello\u{e020}{id}\u{e021}"));
    }
}
