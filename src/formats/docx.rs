//! DOCX (`word/document.xml`) pre- and post-passes.
//!
//! WordprocessingML splits every run of differently-formatted text into
//! `<w:r><w:rPr>…</w:rPr><w:t>text</w:t></w:r>` wrappers, and editors
//! spray revision-tracking attributes over everything. The pre-pass strips
//! the chaff and merges each run into an inline style on a synthetic
//! `<tf-text>` element, so whole paragraphs reach the translator as one
//! block. The post-pass undoes the synthetic structure and restores the
//! `xml:space` handling Word expects.

use std::sync::OnceLock;

use indextree::NodeId;
use regex::Regex;

use crate::dom::{Document, NodeKind};
use crate::error::Result;
use crate::sentinel::{TFI_CLOSE, TFI_OPEN_B, TFI_OPEN_E, TF_SENTINEL};
use crate::state::StateStore;
use crate::tags::{Format, Tags};

fn rx_rsid() -> &'static Regex {
    static RX: OnceLock<Regex> = OnceLock::new();
    RX.get_or_init(|| Regex::new(r#" w:rsid(?:R|RPr|Del)="[^"]+""#).expect("rsid pattern"))
}

fn rx_lang() -> &'static Regex {
    static RX: OnceLock<Regex> = OnceLock::new();
    RX.get_or_init(|| Regex::new(r"<w:lang [^/>]*/>").expect("lang pattern"))
}

fn rx_wt_seam() -> &'static Regex {
    static RX: OnceLock<Regex> = OnceLock::new();
    RX.get_or_init(|| Regex::new(r"</w:t>[^<>]+?<w:t( [^>]*)?>").expect("wt-seam pattern"))
}

fn rx_after_run() -> &'static Regex {
    static RX: OnceLock<Regex> = OnceLock::new();
    RX.get_or_init(|| Regex::new(r"(</w:t></w:r>)([^<>]+)").expect("after-run pattern"))
}

fn rx_after_link() -> &'static Regex {
    static RX: OnceLock<Regex> = OnceLock::new();
    RX.get_or_init(|| {
        Regex::new(r"(</w:t></w:r></w:hyperlink>)([^<>]+)").expect("after-link pattern")
    })
}

fn rx_tf_text() -> &'static Regex {
    static RX: OnceLock<Regex> = OnceLock::new();
    RX.get_or_init(|| Regex::new(r"</?tf-text>").expect("tf-text pattern"))
}

fn rx_wt_open() -> &'static Regex {
    static RX: OnceLock<Regex> = OnceLock::new();
    RX.get_or_init(|| Regex::new(r"<w:t([ >])").expect("wt-open pattern"))
}

/// Strip chaff, merge runs into inline styles, and return the prepared
/// document with the DOCX tag classification.
pub fn extract_prepass(state: &mut dyn StateStore, raw: &str) -> Result<(Document, Tags)> {
    let mut data = raw.to_string();

    // Wipe chaff that's not relevant when translated, or simply
    // superfluous
    data = data.replace(" xml:space=\"preserve\"", "");
    data = data.replace(" w:eastAsiaTheme=\"minorHAnsi\"", "");

    // Revision tracking information
    data = rx_rsid().replace_all(&data, "").into_owned();

    // Full-tag chaff, intentionally after the attributes because removing
    // those may leave these tags empty
    data = rx_lang().replace_all(&data, "").into_owned();
    for gone in [
        "<w:lastRenderedPageBreak/>",
        "<w:color w:val=\"auto\"/>",
        "<w:rFonts/>",
        "<w:rFonts></w:rFonts>",
        "<w:rPr></w:rPr>",
        "<w:softHyphen/>",
    ] {
        data = data.replace(gone, "");
    }

    // Word splits text runs at spell-check boundaries; join the seams
    data = rx_wt_seam().replace_all(&data, "").into_owned();

    let mut doc = Document::parse(&data)?;
    merge_runs(state, &mut doc)?;

    Ok((doc, Tags::for_format(Format::Docx)))
}

/// Merge sibling `w:r`/`w:t` runs into inline styles on `tf-text`
/// elements, and `w:hyperlink` wrappers into styles of kind `a`.
fn merge_runs(state: &mut dyn StateStore, doc: &mut Document) -> Result<()> {
    state.begin()?;

    let paragraphs = collect_named(doc, doc.root, "w:p");
    for p in paragraphs {
        let texts = collect_named(doc, p, "w:t");
        // A single run has nothing to merge with; leave it for plain
        // extraction under the w:t parent rule
        if texts.len() <= 1 {
            continue;
        }

        for t in texts {
            let Some(run) = doc.arena[t].parent() else {
                continue;
            };
            // A second w:t in an already-detached run has nowhere to go
            if doc.arena[run].parent().is_none() {
                continue;
            }
            let content = child_text(doc, t);
            set_sole_text(doc, t, TF_SENTINEL);
            let mut tag = String::new();
            doc.serialize_node(&mut tag, run, true);

            let kind = run_kind(&tag);
            let Some((open, close)) = split_at_sentinel(&tag) else {
                continue;
            };
            let hash = state.style(kind, open, close)?;

            let marker = format!("{TFI_OPEN_B}{kind}:{hash}{TFI_OPEN_E}{content}{TFI_CLOSE}");
            attach_to_tf_text(doc, run, &marker);
            run.detach(&mut doc.arena);
        }

        let links = collect_named(doc, p, "w:hyperlink");
        for link in links {
            let Some(first) = doc.arena[link].first_child() else {
                continue;
            };
            // Runs inside the hyperlink were merged above; the wrapper
            // folds around the tf-text they landed in
            if !is_named(doc, first, "tf-text") {
                continue;
            }
            first.detach(&mut doc.arena);
            link.insert_before(first, &mut doc.arena);

            set_sole_text(doc, link, TF_SENTINEL);
            let mut tag = String::new();
            doc.serialize_node(&mut tag, link, true);
            let Some((open, close)) = split_at_sentinel(&tag) else {
                continue;
            };
            let hash = state.style("a", open, close)?;

            if let Some(text_node) = doc.arena[first].first_child() {
                let inner = doc.text(text_node).unwrap_or("").to_string();
                let wrapped = format!("{TFI_OPEN_B}a:{hash}{TFI_OPEN_E}{inner}{TFI_CLOSE}");
                doc.set_text(text_node, &wrapped);
            }
            link.detach(&mut doc.arena);
        }
    }

    state.commit()?;
    Ok(())
}

/// Infer the style kind from a serialized run wrapper.
fn run_kind(tag: &str) -> &'static str {
    let bold = tag.contains("<w:b/>");
    let italic = tag.contains("<w:i/>");
    match (bold, italic) {
        (true, true) => "b+i",
        (true, false) => "b",
        (false, true) => "i",
        (false, false) => "text",
    }
}

fn split_at_sentinel(tag: &str) -> Option<(&str, &str)> {
    let at = tag.find(TF_SENTINEL)?;
    Some((&tag[..at], &tag[at + TF_SENTINEL.len()..]))
}

/// Append the marker to the preceding `tf-text` sibling, creating one when
/// the run has none yet.
fn attach_to_tf_text(doc: &mut Document, run: NodeId, marker: &str) {
    if let Some(prev) = doc.arena[run].previous_sibling() {
        if is_named(doc, prev, "tf-text") {
            if let Some(text_node) = doc.arena[prev].first_child() {
                let mut merged = doc.text(text_node).unwrap_or("").to_string();
                merged.push_str(marker);
                doc.set_text(text_node, &merged);
                return;
            }
        }
    }
    let tf = doc.arena.new_node(NodeKind::Element(crate::dom::ElementData {
        name: "tf-text".to_string(),
        attrs: Default::default(),
    }));
    let text = doc.arena.new_node(NodeKind::Text(marker.to_string()));
    tf.append(text, &mut doc.arena);
    run.insert_before(tf, &mut doc.arena);
}

/// All descendants of `root` with the given element name, in document
/// order.
fn collect_named(doc: &Document, root: NodeId, name: &str) -> Vec<NodeId> {
    root.descendants(&doc.arena)
        .filter(|&id| is_named(doc, id, name))
        .collect()
}

fn is_named(doc: &Document, id: NodeId, name: &str) -> bool {
    doc.elem(id).is_some_and(|el| el.name == name)
}

/// Concatenated text content of the node's children.
fn child_text(doc: &Document, id: NodeId) -> String {
    let mut out = String::new();
    for child in id.children(&doc.arena) {
        if let Some(t) = doc.text(child) {
            out.push_str(t);
        }
    }
    out
}

/// Replace all children with a single text node.
fn set_sole_text(doc: &mut Document, id: NodeId, text: &str) {
    while let Some(child) = doc.arena[id].first_child() {
        child.detach(&mut doc.arena);
    }
    let node = doc.arena.new_node(NodeKind::Text(text.to_string()));
    id.append(node, &mut doc.arena);
}

/// Merge adjacent `tf-text` elements in the styled serialization.
pub fn merge_text_seams(styled: &mut String) {
    while let Some(at) = styled.rfind("</tf-text><tf-text>") {
        styled.replace_range(at..at + "</tf-text><tf-text>".len(), "");
    }
}

/// Rearrange the injected serialization back into Word's shape.
pub fn inject_postpass(xml: &str) -> String {
    // Text that ended up after a run belongs inside it
    let mut data = rx_after_run().replace_all(xml, "$2$1").into_owned();
    data = rx_after_link().replace_all(&data, "$2$1").into_owned();

    // Runs whose text vanished entirely are noise
    data = data.replace("<w:r><w:t/></w:r>", "");

    data = rx_tf_text().replace_all(&data, "").into_owned();

    // Word drops boundary whitespace without this
    data = rx_wt_open()
        .replace_all(&data, "<w:t xml:space=\"preserve\"$1")
        .into_owned();
    data
}
