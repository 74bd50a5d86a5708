//! Style serialization and marker cleanup.
//!
//! `save_styles` walks the tree and emits a UTF-8 string in which inline
//! elements have become sentinel-framed `kind:hash` markers, protected
//! subtrees are serialized verbatim, and protected-inline elements are
//! wrapped in `<tf-protect>` for the protection folder to deal with.
//!
//! `cleanup_styles` normalizes the marker stream afterwards (and again on
//! injection): letter runs touching a marker move inside it, boundary
//! whitespace moves outside, and consecutive identical markers merge.

use std::sync::OnceLock;

use indextree::NodeId;
use regex::Regex;

use crate::dom::{append_attrs, append_xml, Engine, NodeKind};
use crate::error::Result;
use crate::sentinel::{TFI_CLOSE, TFI_OPEN_B, TFI_OPEN_E};
use crate::spaces::is_space;

impl<'a> Engine<'a> {
    /// Serialize the document while turning inline tags into markers the
    /// stream can deal with.
    pub fn save_styles(&mut self) -> Result<String> {
        let mut s = String::new();
        if let Some(decl) = &self.doc.decl {
            s.push_str(decl);
        }
        self.save_styles_in(&mut s, self.doc.root, 0, false)?;
        Ok(s)
    }

    fn save_styles_in(
        &mut self,
        s: &mut String,
        dom: NodeId,
        rn: usize,
        protect: bool,
    ) -> Result<()> {
        let mut next = self.doc.arena[dom].first_child();
        while let Some(child) = next {
            next = self.doc.arena[child].next_sibling();

            if self.doc.is_element(child) {
                self.save_styles_elem(s, child, rn, protect)?;
                continue;
            }

            if matches!(self.doc.kind(child), NodeKind::Text(_) | NodeKind::CData(_)) {
                let mut pname = self.scratch.take(rn);
                let raw = self.doc.lower_name_of(dom, &mut pname)
                    && self.tags.raw.contains(pname.as_str());
                self.scratch.give(rn, pname);
                let t = self.doc.text(child).unwrap_or("");
                if raw {
                    s.push_str(t);
                } else {
                    append_xml(s, t);
                }
                continue;
            }

            match self.doc.kind(child) {
                NodeKind::Comment(t) => {
                    s.push_str("<!--");
                    s.push_str(t);
                    s.push_str("-->");
                }
                NodeKind::Pi(t) => {
                    s.push_str("<?");
                    s.push_str(t);
                    s.push_str("?>");
                }
                NodeKind::Doctype(t) => {
                    s.push_str("<!DOCTYPE ");
                    s.push_str(t);
                    s.push('>');
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn save_styles_elem(
        &mut self,
        s: &mut String,
        child: NodeId,
        rn: usize,
        protect: bool,
    ) -> Result<()> {
        let mut lname = self.scratch.take(rn);
        self.doc.lower_name_of(child, &mut lname);

        let mut l_protect = protect || self.tags.protected.contains(lname.as_str());
        if self.doc.attr(child, "tf-protect").is_some() {
            l_protect = true;
        }

        let mut otag = self.scratch.take(rn);
        {
            let el = self.doc.elem(child).expect("element node");
            otag.push('<');
            otag.push_str(&el.name);
            append_attrs(&mut otag, el, true);
        }

        let prot_inline = self.tags.protected_inline.contains(lname.as_str());

        if self.doc.arena[child].first_child().is_none() {
            otag.push_str("/>");
            if prot_inline && !protect {
                s.push_str("<tf-protect>");
                s.push_str(&otag);
                s.push_str("</tf-protect>");
            } else {
                s.push_str(&otag);
            }
            self.scratch.give(rn, otag);
            self.scratch.give(rn, lname);
            return Ok(());
        }
        otag.push('>');

        let mut ctag = self.scratch.take(rn);
        ctag.push_str("</");
        ctag.push_str(&self.doc.elem(child).expect("element node").name);
        ctag.push('>');

        if prot_inline && !protect {
            s.push_str("<tf-protect>");
            s.push_str(&otag);
            self.save_styles_in(s, child, rn + 1, true)?;
            s.push_str(&ctag);
            s.push_str("</tf-protect>");
        } else if !l_protect
            && self.tags.inline.contains(lname.as_str())
            && !self.first_child_protected(child, rn)
            && !self.is_only_child(child)
            && !self.has_block_child(child)
        {
            // Fold into an inline marker. The marker kind is the local
            // name: prefixes belong to the stored open/close tags.
            let mut kind = self.scratch.take(rn);
            {
                let name: &str = self.doc.elem(child).expect("element node").name.as_str();
                kind.push_str(name.rsplit(':').next().unwrap_or(name));
                kind.make_ascii_lowercase();
            }
            let hash = self.state.style(&kind, &otag, &ctag)?;
            s.push_str(TFI_OPEN_B);
            s.push_str(&kind);
            s.push(':');
            s.push_str(&hash);
            s.push_str(TFI_OPEN_E);
            self.save_styles_in(s, child, rn + 1, false)?;
            s.push_str(TFI_CLOSE);
            self.scratch.give(rn, kind);
        } else {
            s.push_str(&otag);
            self.save_styles_in(s, child, rn + 1, l_protect)?;
            s.push_str(&ctag);
        }

        self.scratch.give(rn, ctag);
        self.scratch.give(rn, otag);
        self.scratch.give(rn, lname);
        Ok(())
    }

    /// True when the element's first child is a protected element.
    fn first_child_protected(&mut self, id: NodeId, rn: usize) -> bool {
        let Some(first) = self.doc.arena[id].first_child() else {
            return false;
        };
        let mut buf = self.scratch.take(rn);
        let prot =
            self.doc.lower_name_of(first, &mut buf) && self.tags.protected.contains(buf.as_str());
        self.scratch.give(rn, buf);
        prot
    }

    /// True when the node is the sole element child of its parent (text
    /// siblings allowed only if pure whitespace), recursively up through
    /// inline parents. Such an element's parent is already the natural
    /// inline boundary, so folding it would be redundant.
    pub(crate) fn is_only_child(&self, cn: NodeId) -> bool {
        let Some(parent) = self.doc.arena[cn].parent() else {
            return true;
        };
        let first = self.doc.arena[parent].first_child().expect("has child");
        let last = self.doc.arena[parent].last_child().expect("has child");

        let space_text =
            |id: NodeId| matches!(self.doc.kind(id), NodeKind::Text(t) if is_space(t));

        let mut only = first == cn
            || (self.doc.arena[first].next_sibling() == Some(cn) && space_text(first));
        if only {
            only = last == cn
                || (self.doc.arena[last].previous_sibling() == Some(cn) && space_text(last));
        }

        if only {
            let mut pname = String::new();
            if self.doc.lower_name_of(parent, &mut pname)
                && self.tags.inline.contains(pname.as_str())
            {
                return self.is_only_child(parent);
            }
        }
        only
    }

    /// True when the node contains any descendant element that is neither
    /// inline nor protected-inline. Blocks must not be hidden inside style
    /// markers because translators may split text mid-marker.
    pub(crate) fn has_block_child(&self, dom: NodeId) -> bool {
        let mut buf = String::new();
        for cn in dom.children(&self.doc.arena) {
            if !self.doc.lower_name_of(cn, &mut buf) {
                continue;
            }
            if !(self.tags.inline.contains(buf.as_str())
                || self.tags.protected_inline.contains(buf.as_str()))
                || self.has_block_child(cn)
            {
                return true;
            }
        }
        false
    }
}

fn rx_alpha_prefix() -> &'static Regex {
    static RX: OnceLock<Regex> = OnceLock::new();
    RX.get_or_init(|| {
        Regex::new(
            "([\\p{L}\\p{N}\\p{M}]*?[\\p{L}\\p{M}])(\u{e011}[^\u{e012}]+\u{e012})(\\p{L}+)",
        )
        .expect("alpha-prefix pattern")
    })
}

fn rx_alpha_suffix() -> &'static Regex {
    static RX: OnceLock<Regex> = OnceLock::new();
    RX.get_or_init(|| {
        Regex::new("(\\p{L}[\\p{L}\\p{M}]*)(\u{e013})(\\p{L}[\\p{L}\\p{N}\\p{M}]*)")
            .expect("alpha-suffix pattern")
    })
}

fn rx_spc_prefix() -> &'static Regex {
    static RX: OnceLock<Regex> = OnceLock::new();
    RX.get_or_init(|| {
        Regex::new("(\u{e011}[^\u{e012}]+\u{e012})([\\s\\p{Zs}]+)").expect("space-prefix pattern")
    })
}

fn rx_spc_suffix() -> &'static Regex {
    static RX: OnceLock<Regex> = OnceLock::new();
    RX.get_or_init(|| {
        Regex::new("([\\s\\p{Zs}]+)(\u{e013})").expect("space-suffix pattern")
    })
}

fn rx_merge_candidate() -> &'static Regex {
    static RX: OnceLock<Regex> = OnceLock::new();
    RX.get_or_init(|| {
        Regex::new("(\u{e011}[^\u{e012}]+\u{e012})([^\u{e011}-\u{e013}]+)\u{e013}([\\s\\p{Zs}]*)")
            .expect("merge pattern")
    })
}

/// Adjust and merge inline markers where applicable.
///
/// Four single-pass rewrites plus a merge that runs to fixpoint; the whole
/// function is idempotent and never increases the marker count.
pub fn cleanup_styles(s: &mut String) {
    // If the marker starts with a letter and has only alphanumerics before
    // it (ending with alpha), move that prefix inside
    if rx_alpha_prefix().is_match(s) {
        let mut out = String::with_capacity(s.len());
        let mut last = 0;
        for caps in rx_alpha_prefix().captures_iter(s) {
            let (pfx, tag, sfx) = (
                caps.get(1).unwrap(),
                caps.get(2).unwrap(),
                caps.get(3).unwrap(),
            );
            out.push_str(&s[last..pfx.start()]);
            out.push_str(tag.as_str());
            out.push_str(pfx.as_str());
            out.push_str(sfx.as_str());
            last = sfx.end();
        }
        out.push_str(&s[last..]);
        *s = out;
    }

    // If the marker ends with a letter and has only alphanumerics after it
    // (starting with alpha), move that suffix inside
    if rx_alpha_suffix().is_match(s) {
        let mut out = String::with_capacity(s.len());
        let mut last = 0;
        for caps in rx_alpha_suffix().captures_iter(s) {
            let (pfx, tag, sfx) = (
                caps.get(1).unwrap(),
                caps.get(2).unwrap(),
                caps.get(3).unwrap(),
            );
            out.push_str(&s[last..pfx.start()]);
            out.push_str(pfx.as_str());
            out.push_str(sfx.as_str());
            out.push_str(tag.as_str());
            last = sfx.end();
        }
        out.push_str(&s[last..]);
        *s = out;
    }

    // Move leading space from inside the marker to before it
    if rx_spc_prefix().is_match(s) {
        let mut out = String::with_capacity(s.len());
        let mut last = 0;
        for caps in rx_spc_prefix().captures_iter(s) {
            let (tag, spc) = (caps.get(1).unwrap(), caps.get(2).unwrap());
            out.push_str(&s[last..tag.start()]);
            out.push_str(spc.as_str());
            out.push_str(tag.as_str());
            last = spc.end();
        }
        out.push_str(&s[last..]);
        *s = out;
    }

    // Move trailing space from inside the marker to after it
    if rx_spc_suffix().is_match(s) {
        let mut out = String::with_capacity(s.len());
        let mut last = 0;
        for caps in rx_spc_suffix().captures_iter(s) {
            let (spc, tag) = (caps.get(1).unwrap(), caps.get(2).unwrap());
            out.push_str(&s[last..spc.start()]);
            out.push_str(tag.as_str());
            out.push_str(spc.as_str());
            last = tag.end();
        }
        out.push_str(&s[last..]);
        *s = out;
    }

    // Merge identical markers that have nothing or only space between
    // them. The regex engine has no backreferences, so the opener equality
    // check happens here; the scan repeats until no pair is left so that
    // longer runs of identical markers collapse in one call.
    loop {
        let mut changed = false;
        let mut out = String::with_capacity(s.len());
        let mut last = 0;
        let mut pos = 0;
        while let Some(caps) = rx_merge_candidate().captures_at(s, pos) {
            let whole = caps.get(0).unwrap();
            let opener = caps.get(1).unwrap();
            let body_end = caps.get(2).unwrap().end();
            let ws = caps.get(3).unwrap();
            if s[whole.end()..].starts_with(opener.as_str()) {
                out.push_str(&s[last..opener.start()]);
                out.push_str(&s[opener.start()..body_end]);
                out.push_str(ws.as_str());
                last = whole.end() + opener.as_str().len();
                pos = last;
                changed = true;
            } else {
                pos = whole.end();
            }
        }
        if !changed {
            break;
        }
        out.push_str(&s[last..]);
        *s = out;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::Document;
    use crate::state::{MemState, StateStore};
    use crate::tags::Tags;

    fn html_ish() -> Tags {
        let mut tags = Tags::default();
        for t in ["b", "i", "span"] {
            tags.inline.insert(t.to_string());
        }
        tags.protected.insert("script".to_string());
        tags.protected_inline.insert("br".to_string());
        tags.raw.insert("script".to_string());
        tags
    }

    #[test]
    fn test_inline_folds_to_marker() {
        let mut state = MemState::default();
        let doc = Document::parse("<p>Hello <b>world</b>!</p>").unwrap();
        let mut eng = Engine::new(doc, html_ish(), &mut state);
        let styled = eng.save_styles().unwrap();

        let hash = state.style("b", "<b>", "</b>").unwrap();
        assert_eq!(
            styled,
            format!("<p>Hello \u{e011}b:{hash}\u{e012}world\u{e013}!</p>")
        );
    }

    #[test]
    fn test_only_child_not_folded() {
        // <b> is the sole child of its parent: the parent is already the
        // inline boundary.
        let mut state = MemState::default();
        let doc = Document::parse("<p> <b>alone</b> </p>").unwrap();
        let mut eng = Engine::new(doc, html_ish(), &mut state);
        let styled = eng.save_styles().unwrap();
        assert_eq!(styled, "<p> <b>alone</b> </p>");
    }

    #[test]
    fn test_block_child_prevents_folding() {
        let mut state = MemState::default();
        let doc = Document::parse("<p>x<b>a<div>block</div>b</b>y</p>").unwrap();
        let mut eng = Engine::new(doc, html_ish(), &mut state);
        let styled = eng.save_styles().unwrap();
        assert!(!styled.contains('\u{e011}'), "{styled}");
    }

    #[test]
    fn test_protected_serializes_verbatim() {
        let mut state = MemState::default();
        let doc = Document::parse("<p>a<script>if (x) go()</script>b</p>").unwrap();
        let mut eng = Engine::new(doc, html_ish(), &mut state);
        let styled = eng.save_styles().unwrap();
        assert!(styled.contains("<script>if (x) go()</script>"), "{styled}");
    }

    #[test]
    fn test_protected_inline_wrapped() {
        let mut state = MemState::default();
        let doc = Document::parse("<p>a<br/>b</p>").unwrap();
        let mut eng = Engine::new(doc, html_ish(), &mut state);
        let styled = eng.save_styles().unwrap();
        assert_eq!(styled, "<p>a<tf-protect><br/></tf-protect>b</p>");
    }

    #[test]
    fn test_tf_protect_attr_forces_protection() {
        let mut state = MemState::default();
        let doc = Document::parse("<p>x<b tf-protect=\"1\">keep</b>y</p>").unwrap();
        let mut eng = Engine::new(doc, html_ish(), &mut state);
        let styled = eng.save_styles().unwrap();
        assert!(styled.contains("<b tf-protect=\"1\">keep</b>"), "{styled}");
    }

    #[test]
    fn test_nested_inline_folds_both() {
        let mut state = MemState::default();
        let doc = Document::parse("<p>x <b>bold <i>both</i> just</b> y</p>").unwrap();
        let mut eng = Engine::new(doc, html_ish(), &mut state);
        let styled = eng.save_styles().unwrap();
        assert_eq!(styled.matches('\u{e011}').count(), 2, "{styled}");
        assert_eq!(styled.matches('\u{e013}').count(), 2, "{styled}");
    }

    #[test]
    fn test_cleanup_alpha_prefix_moves_inside() {
        let mut s = "un\u{e011}b:h\u{e012}breakable\u{e013}".to_string();
        cleanup_styles(&mut s);
        assert_eq!(s, "\u{e011}b:h\u{e012}unbreakable\u{e013}");
    }

    #[test]
    fn test_cleanup_alpha_suffix_moves_inside() {
        let mut s = "\u{e011}b:h\u{e012}break\u{e013}able".to_string();
        cleanup_styles(&mut s);
        assert_eq!(s, "\u{e011}b:h\u{e012}breakable\u{e013}");
    }

    #[test]
    fn test_cleanup_space_moves_outside() {
        let mut s = "a\u{e011}b:h\u{e012}  x \u{e013}b".to_string();
        cleanup_styles(&mut s);
        assert_eq!(s, "a  \u{e011}b:h\u{e012}x\u{e013} b");
    }

    #[test]
    fn test_cleanup_merges_identical_markers() {
        let mut s = "\u{e011}i:h\u{e012}foo\u{e013}\u{e011}i:h\u{e012}bar\u{e013}".to_string();
        cleanup_styles(&mut s);
        assert_eq!(s, "\u{e011}i:h\u{e012}foobar\u{e013}");
    }

    #[test]
    fn test_cleanup_merge_keeps_intervening_space() {
        let mut s = "\u{e011}i:h\u{e012}foo\u{e013} \u{e011}i:h\u{e012}bar\u{e013}".to_string();
        cleanup_styles(&mut s);
        assert_eq!(s, "\u{e011}i:h\u{e012}foo bar\u{e013}");
    }

    #[test]
    fn test_cleanup_does_not_merge_distinct_markers() {
        let s0 = "\u{e011}i:h1\u{e012}foo\u{e013}\u{e011}i:h2\u{e012}bar\u{e013}".to_string();
        let mut s = s0.clone();
        cleanup_styles(&mut s);
        assert_eq!(s, s0);
    }

    #[test]
    fn test_cleanup_merges_three_in_one_call() {
        let one = "\u{e011}i:h\u{e012}a\u{e013}";
        let mut s = format!("{one}{}{}", one.replace('a', "b"), one.replace('a', "c"));
        cleanup_styles(&mut s);
        assert_eq!(s, "\u{e011}i:h\u{e012}abc\u{e013}");
    }

    #[test]
    fn test_cleanup_idempotent() {
        for case in [
            "un\u{e011}b:h\u{e012}break able \u{e013}now",
            "\u{e011}i:h\u{e012}a\u{e013} \u{e011}i:h\u{e012}b\u{e013} \u{e011}i:h\u{e012}c\u{e013}",
            "plain text, no markers",
            "x \u{e011}a:1\u{e012} padded \u{e013} y",
        ] {
            let mut once = case.to_string();
            cleanup_styles(&mut once);
            let mut twice = once.clone();
            cleanup_styles(&mut twice);
            assert_eq!(once, twice, "cleanup not idempotent for {case:?}");
        }
    }
}
