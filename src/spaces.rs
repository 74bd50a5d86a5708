//! Whitespace folding.
//!
//! `save_spaces` records where whitespace sat around and inside elements as
//! `tf-space-*` attributes; the text nodes themselves are left alone so the
//! serialized stream still reads naturally. After translation the saved
//! whitespace is authoritative: `restore_spaces` trims whatever boundary
//! whitespace the translator produced and splices the original back in,
//! and `create_spaces` synthesizes text nodes where the translation removed
//! the neighbor a saved run would have merged into.
//!
//! Two whitespace vocabularies are in play: the "blank" class
//! `[\s\r\n\p{Z}]` used when recording and merging runs, and the narrower
//! `[\s\p{Zs}]` used when asking whether a node is space-only between
//! inline tokens.

use std::sync::OnceLock;

use indextree::NodeId;
use regex::Regex;

use crate::dom::{Engine, NodeKind};

fn rx_space_only() -> &'static Regex {
    static RX: OnceLock<Regex> = OnceLock::new();
    RX.get_or_init(|| Regex::new(r"^[\s\p{Zs}]+$").expect("space-only pattern"))
}

fn rx_blank_only() -> &'static Regex {
    static RX: OnceLock<Regex> = OnceLock::new();
    RX.get_or_init(|| Regex::new(r"^[\s\r\n\p{Z}]+$").expect("blank-only pattern"))
}

fn rx_blank_head() -> &'static Regex {
    static RX: OnceLock<Regex> = OnceLock::new();
    RX.get_or_init(|| Regex::new(r"^[\s\r\n\p{Z}]+").expect("blank-head pattern"))
}

fn rx_blank_tail() -> &'static Regex {
    static RX: OnceLock<Regex> = OnceLock::new();
    RX.get_or_init(|| Regex::new(r"[\s\r\n\p{Z}]+$").expect("blank-tail pattern"))
}

/// True when `text` is whitespace in the narrow token-trimming sense.
pub(crate) fn is_space(text: &str) -> bool {
    rx_space_only().is_match(text)
}

/// Append `text` to `out` with its leading blank run removed.
fn append_ltrim(out: &mut String, text: &str) {
    match rx_blank_head().find(text) {
        Some(m) => out.push_str(&text[m.end()..]),
        None => out.push_str(text),
    }
}

/// Assign `text` to `out` with its trailing blank run removed.
fn assign_rtrim(out: &mut String, text: &str) {
    out.clear();
    match rx_blank_tail().find(text) {
        Some(m) => out.push_str(&text[..m.start()]),
        None => out.push_str(text),
    }
}

impl<'a> Engine<'a> {
    /// Record whether nodes had space around and/or inside them.
    pub fn save_spaces(&mut self) {
        self.save_spaces_in(self.doc.root, 0);
    }

    fn save_spaces_in(&mut self, dom: NodeId, rn: usize) {
        let mut next = self.doc.arena[dom].first_child();
        while let Some(child) = next {
            next = self.doc.arena[child].next_sibling();

            let mut lname = self.scratch.take(rn);
            let skip = self.doc.lower_name_of(child, &mut lname)
                && self.tags.protected.contains(lname.as_str());
            self.scratch.give(rn, lname);
            if skip {
                continue;
            }

            let content = match self.doc.kind(child) {
                NodeKind::Text(t) if !t.is_empty() => t.to_string(),
                NodeKind::Text(_) => continue,
                _ => {
                    self.save_spaces_in(child, rn + 1);
                    continue;
                }
            };

            if rx_blank_only().is_match(&content) {
                let prev = self.doc.arena[child].previous_sibling();
                let next_sib = self.doc.arena[child].next_sibling();
                if prev.is_none() {
                    self.doc.set_attr(dom, "tf-space-prefix", &content);
                } else if next_sib.is_none() {
                    self.doc.set_attr(dom, "tf-space-suffix", &content);
                } else if prev.is_some_and(|p| self.doc.is_element(p)) {
                    self.doc.set_attr(prev.unwrap(), "tf-space-after", &content);
                } else if next_sib.is_some_and(|n| self.doc.is_element(n)) {
                    self.doc
                        .set_attr(next_sib.unwrap(), "tf-space-before", &content);
                }
                // The node was entirely whitespace, skip looking for
                // leading/trailing
                continue;
            }

            // Leading whitespace is owed to the previous sibling or, with
            // no sibling, to the parent
            if let Some(m) = rx_blank_head().find(&content) {
                let ws = m.as_str();
                match self.doc.arena[child].previous_sibling() {
                    Some(prev) if self.doc.is_element(prev) => {
                        self.doc.set_attr(prev, "tf-space-after", ws);
                    }
                    Some(_) => {}
                    None => self.doc.set_attr(dom, "tf-space-prefix", ws),
                }
            }

            // Trailing whitespace symmetrically
            if let Some(m) = rx_blank_tail().find(&content) {
                let ws = m.as_str();
                match self.doc.arena[child].next_sibling() {
                    Some(next_sib) if self.doc.is_element(next_sib) => {
                        self.doc.set_attr(next_sib, "tf-space-before", ws);
                    }
                    Some(_) => {}
                    None => self.doc.set_attr(dom, "tf-space-suffix", ws),
                }
            }
        }
    }

    /// Insert saved whitespace back into the document: merge into existing
    /// text nodes first, then synthesize fresh nodes for whatever saved
    /// runs lost their neighbor to the translation.
    pub fn restore_spaces(&mut self) {
        self.restore_spaces_in(self.doc.root, 0);
        self.create_spaces_in(self.doc.root, 0);
    }

    /// Create fresh text nodes for the saved whitespace the merging pass
    /// could not place (its neighbor text node no longer exists).
    fn create_spaces_in(&mut self, dom: NodeId, rn: usize) {
        let mut next = self.doc.arena[dom].first_child();
        while let Some(child) = next {
            next = self.doc.arena[child].next_sibling();

            let mut lname = self.scratch.take(rn);
            let is_elem = self.doc.lower_name_of(child, &mut lname);
            let skip = is_elem && self.tags.protected.contains(lname.as_str());
            self.scratch.give(rn, lname);
            if skip || !is_elem {
                continue;
            }

            self.create_spaces_in(child, rn + 1);

            if let Some(ws) = self.doc.remove_attr(child, "tf-space-after") {
                let node = self.new_text(&ws);
                child.insert_after(node, &mut self.doc.arena);
            }
            if let Some(ws) = self.doc.remove_attr(child, "tf-space-prefix") {
                let node = self.new_text(&ws);
                child.prepend(node, &mut self.doc.arena);
            }
            if let Some(ws) = self.doc.remove_attr(child, "tf-space-before") {
                let node = self.new_text(&ws);
                child.insert_before(node, &mut self.doc.arena);
            }
            if let Some(ws) = self.doc.remove_attr(child, "tf-space-suffix") {
                let node = self.new_text(&ws);
                child.append(node, &mut self.doc.arena);
            }
        }
    }

    /// Merge saved whitespace into existing text nodes, replacing whatever
    /// boundary whitespace the translation left there.
    fn restore_spaces_in(&mut self, dom: NodeId, rn: usize) {
        let mut next = self.doc.arena[dom].first_child();
        while let Some(child) = next {
            next = self.doc.arena[child].next_sibling();

            let mut lname = self.scratch.take(rn);
            let skip = self.doc.lower_name_of(child, &mut lname)
                && self.tags.protected.contains(lname.as_str());
            self.scratch.give(rn, lname);
            if skip {
                continue;
            }

            if !self.is_plain_text(child) {
                self.restore_spaces_in(child, rn + 1);
                continue;
            }

            if let Some(prev) = self.doc.arena[child].previous_sibling() {
                if let Some(ws) = self.doc.remove_attr(prev, "tf-space-after") {
                    let mut merged = self.scratch.take(rn);
                    merged.push_str(&ws);
                    append_ltrim(&mut merged, self.doc.text(child).unwrap_or(""));
                    self.doc.set_text(child, &merged);
                    self.scratch.give(rn, merged);
                }
            }
            if self.doc.arena[dom].first_child() == Some(child) {
                if let Some(ws) = self.doc.remove_attr(dom, "tf-space-prefix") {
                    let mut merged = self.scratch.take(rn);
                    merged.push_str(&ws);
                    append_ltrim(&mut merged, self.doc.text(child).unwrap_or(""));
                    self.doc.set_text(child, &merged);
                    self.scratch.give(rn, merged);
                }
            }
            if let Some(next_sib) = self.doc.arena[child].next_sibling() {
                if let Some(ws) = self.doc.remove_attr(next_sib, "tf-space-before") {
                    let mut merged = self.scratch.take(rn);
                    assign_rtrim(&mut merged, self.doc.text(child).unwrap_or(""));
                    merged.push_str(&ws);
                    self.doc.set_text(child, &merged);
                    self.scratch.give(rn, merged);
                }
            }
            if self.doc.arena[dom].last_child() == Some(child) {
                if let Some(ws) = self.doc.remove_attr(dom, "tf-space-suffix") {
                    let mut merged = self.scratch.take(rn);
                    assign_rtrim(&mut merged, self.doc.text(child).unwrap_or(""));
                    merged.push_str(&ws);
                    self.doc.set_text(child, &merged);
                    self.scratch.give(rn, merged);
                }
            }
        }
    }

    fn is_plain_text(&self, id: NodeId) -> bool {
        matches!(self.doc.kind(id), NodeKind::Text(_))
    }

    fn new_text(&mut self, text: &str) -> NodeId {
        self.doc.arena.new_node(NodeKind::Text(text.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::Document;
    use crate::state::MemState;
    use crate::tags::Tags;

    fn engine<'s>(xml: &str, state: &'s mut MemState) -> Engine<'s> {
        let doc = Document::parse(xml).unwrap();
        Engine::new(doc, Tags::default(), state)
    }

    #[test]
    fn test_mixed_node_spaces_recorded() {
        let mut state = MemState::default();
        let mut eng = engine("<p>  a  <b>b</b>  c  </p>", &mut state);
        eng.save_spaces();
        let out = eng.doc.serialize(true);
        assert_eq!(
            out,
            "<p tf-space-prefix=\"  \" tf-space-suffix=\"  \">  a  \
             <b tf-space-before=\"  \" tf-space-after=\"  \">b</b>  c  </p>"
        );
    }

    #[test]
    fn test_space_only_node_placement() {
        let mut state = MemState::default();
        let mut eng = engine("<div><p>a</p> <p>b</p></div>", &mut state);
        eng.save_spaces();
        let out = eng.doc.serialize(true);
        // The whitespace-only node sits between two elements; the previous
        // sibling owns it.
        assert!(out.contains("<p tf-space-after=\" \">a</p>"), "{out}");
    }

    #[test]
    fn test_space_only_at_edges_goes_to_parent() {
        let mut state = MemState::default();
        let mut eng = engine("<div> <p>a</p> </div>", &mut state);
        eng.save_spaces();
        let out = eng.doc.serialize(true);
        assert!(
            out.starts_with("<div tf-space-prefix=\" \" tf-space-suffix=\" \">"),
            "{out}"
        );
    }

    #[test]
    fn test_mixed_prefix_falls_back_to_parent() {
        // With no previous sibling the prefix is owed to the parent, while
        // the suffix still lands on the following element.
        let mut state = MemState::default();
        let mut eng = engine("<p>  a<b>b</b></p>", &mut state);
        eng.save_spaces();
        let out = eng.doc.serialize(true);
        assert!(out.starts_with("<p tf-space-prefix=\"  \">"), "{out}");
        assert!(!out.contains("tf-space-before"), "{out}");
    }

    #[test]
    fn test_save_restore_identity() {
        for xml in [
            "<p>  a  <b>b</b>  c  </p>",
            "<div> <p>x</p>\n<p>y</p> </div>",
            "<p>Hello <b>world</b>!</p>",
            "<p>\u{a0}nbsp\u{a0}</p>",
        ] {
            let mut state = MemState::default();
            let mut eng = engine(xml, &mut state);
            eng.save_spaces();
            eng.restore_spaces();
            assert_eq!(eng.doc.serialize(false), xml, "round-trip of {xml}");
        }
    }

    #[test]
    fn test_restore_replaces_translator_whitespace() {
        // Saved whitespace is authoritative: boundary whitespace in the
        // translated text is trimmed before the original is spliced in.
        let mut state = MemState::default();
        let mut eng = engine("<p tf-space-prefix=\"  \">   translated</p>", &mut state);
        eng.restore_spaces();
        assert_eq!(eng.doc.serialize(false), "<p>  translated</p>");
    }

    #[test]
    fn test_create_spaces_synthesizes_missing_nodes() {
        // The translation removed the text around <b>; saved whitespace
        // comes back as fresh nodes.
        let mut state = MemState::default();
        let mut eng = engine(
            "<p tf-space-prefix=\" \"><b tf-space-before=\" \" tf-space-after=\" \">b</b></p>",
            &mut state,
        );
        eng.restore_spaces();
        assert_eq!(eng.doc.serialize(false), "<p>  <b>b</b> </p>");
    }

    #[test]
    fn test_whitespace_conservation() {
        // Every recorded run is exactly the whitespace the source carried
        // at the recorded position, including non-ASCII space separators.
        let mut state = MemState::default();
        let mut eng = engine("<p>\t a \u{2003}<b>b</b>\nc</p>", &mut state);
        eng.save_spaces();
        let out = eng.doc.serialize(true);
        assert!(out.contains("tf-space-prefix=\"&#9; \""), "{out}");
        assert!(out.contains("tf-space-before=\" \u{2003}\""), "{out}");
        assert!(out.contains("tf-space-after=\"&#10;\""), "{out}");
    }

    #[test]
    fn test_is_space_vocabulary() {
        assert!(is_space(" \t\u{a0}"));
        assert!(!is_space("a "));
        assert!(!is_space(""));
    }
}
