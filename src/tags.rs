//! Tag classification tables.
//!
//! Static per-format sets declaring which element names are inline, block,
//! protected, raw-text, protected-inline, allowed parents, direct parents,
//! and which attributes carry translatable text. Names are matched on
//! their ASCII-lowercased prefixed form (`w:t`, `text:span`).

use std::collections::HashSet;

/// The document formats the engine knows classification tables for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    /// Generic XML: every text node under every parent is translatable
    Xml,
    /// HTML serialized as XML
    Html,
    /// An HTML fragment (same classification as full HTML)
    HtmlFragment,
    /// Office Open XML word processing (`word/document.xml`)
    Docx,
    /// Office Open XML presentation (`ppt/slides/*.xml`)
    Pptx,
    /// OpenDocument text (`content.xml`)
    Odt,
    /// OpenDocument presentation (same schema family as ODT)
    Odp,
}

impl Format {
    /// The tag stored in the state store at extraction time.
    pub fn name(&self) -> &'static str {
        match self {
            Format::Xml => "xml",
            Format::Html => "html",
            Format::HtmlFragment => "html-fragment",
            Format::Docx => "docx",
            Format::Pptx => "pptx",
            Format::Odt => "odt",
            Format::Odp => "odp",
        }
    }

    /// Inverse of [`Format::name`].
    pub fn from_name(name: &str) -> Option<Format> {
        match name {
            "xml" => Some(Format::Xml),
            "html" => Some(Format::Html),
            "html-fragment" => Some(Format::HtmlFragment),
            "docx" => Some(Format::Docx),
            "pptx" => Some(Format::Pptx),
            "odt" => Some(Format::Odt),
            "odp" => Some(Format::Odp),
            _ => None,
        }
    }

    /// File extension of the destination document.
    pub fn extension(&self) -> &'static str {
        match self {
            Format::Xml => "xml",
            Format::Html | Format::HtmlFragment => "html",
            Format::Docx => "docx",
            Format::Pptx => "pptx",
            Format::Odt => "odt",
            Format::Odp => "odp",
        }
    }
}

/// One format's classification, loaded once per document.
#[derive(Debug, Clone, Default)]
pub struct Tags {
    /// Elements folded into inline-style markers
    pub inline: HashSet<String>,
    /// Elements whose subtree round-trips verbatim and is never offered to
    /// the translator
    pub protected: HashSet<String>,
    /// Elements wrapped in `<tf-protect>` and folded onto adjacent tokens
    pub protected_inline: HashSet<String>,
    /// Elements whose text content serializes unescaped
    pub raw: HashSet<String>,
    /// Elements under which text becomes translatable; empty means all
    pub parents_allow: HashSet<String>,
    /// When non-empty, text is only extracted when its immediate parent is
    /// in this set
    pub parents_direct: HashSet<String>,
    /// Attribute names whose values are translatable
    pub tag_attrs: Vec<String>,
}

fn set(names: &[&str]) -> HashSet<String> {
    names.iter().map(|n| n.to_string()).collect()
}

impl Tags {
    /// The classification table for a format.
    pub fn for_format(format: Format) -> Tags {
        match format {
            Format::Xml => Tags::default(),
            Format::Html | Format::HtmlFragment => Tags {
                inline: set(&[
                    "a", "abbr", "acronym", "b", "bdi", "bdo", "big", "cite", "code", "del", "dfn",
                    "em", "font", "i", "ins", "kbd", "mark", "meter", "output", "q", "rt", "ruby",
                    "s", "samp", "small", "span", "strike", "strong", "sub", "sup", "time", "tt",
                    "u", "var",
                ]),
                protected: set(&[
                    "applet", "embed", "iframe", "math", "object", "script", "style", "svg",
                    "template",
                ]),
                protected_inline: set(&["br", "img", "wbr"]),
                raw: set(&["script", "style"]),
                parents_allow: HashSet::new(),
                parents_direct: HashSet::new(),
                tag_attrs: vec![
                    "alt".to_string(),
                    "aria-label".to_string(),
                    "label".to_string(),
                    "placeholder".to_string(),
                    "title".to_string(),
                ],
            },
            Format::Docx => Tags {
                parents_allow: set(&["tf-text", "w:t"]),
                ..Tags::default()
            },
            Format::Pptx => Tags {
                parents_allow: set(&["tf-text", "a:t"]),
                ..Tags::default()
            },
            Format::Odt | Format::Odp => Tags {
                inline: set(&["text:a", "text:span"]),
                protected: set(&["office:binary-data", "svg:desc", "svg:title"]),
                protected_inline: set(&["text:line-break", "text:s", "text:tab"]),
                parents_allow: set(&["text:h", "text:p"]),
                ..Tags::default()
            },
        }
    }
}
