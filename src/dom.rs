//! Arena-based DOM with XML parsing and lossless serialization.
//!
//! All nodes live in one [`indextree::Arena`]; `NodeId` handles are stable
//! across mutation, so the recursive walks can rewrite attributes and
//! splice siblings without shared ownership. Attributes keep their
//! insertion order (`IndexMap`) because attribute order is significant to
//! the host formats.

use indexmap::IndexMap;
use indextree::{Arena, NodeId};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::error::{Error, Result};
use crate::state::StateStore;
use crate::tags::Tags;

/// DOM content.
#[derive(Debug, Clone)]
pub enum NodeKind {
    /// Synthetic document node; its children are the top-level element plus
    /// any document-level text, comments and processing instructions.
    Document,
    /// An element node
    Element(ElementData),
    /// A text node
    Text(String),
    /// A CDATA section
    CData(String),
    /// A comment node
    Comment(String),
    /// A processing instruction (target and data, verbatim)
    Pi(String),
    /// A document type declaration (contents after `<!DOCTYPE `, verbatim)
    Doctype(String),
}

/// An element: prefixed name plus ordered attributes.
#[derive(Debug, Clone)]
pub struct ElementData {
    /// The element name, including any namespace prefix (`w:p`)
    pub name: String,
    /// Attributes in document order; `xmlns:*` declarations are kept here
    /// too but always serialize first
    pub attrs: IndexMap<String, String>,
}

/// A parsed document: the arena plus the synthetic root.
#[derive(Debug, Clone)]
pub struct Document {
    /// THE tree - all nodes live here
    pub arena: Arena<NodeKind>,
    /// The synthetic document node
    pub root: NodeId,
    /// The raw `<?xml …?>` declaration, if the source had one
    pub decl: Option<String>,
}

impl Document {
    /// Create an empty document.
    pub fn new() -> Self {
        let mut arena = Arena::new();
        let root = arena.new_node(NodeKind::Document);
        Self {
            arena,
            root,
            decl: None,
        }
    }

    /// Parse an XML string into a document.
    ///
    /// Prefixed names are kept verbatim; namespace declarations stay in the
    /// attribute map of the element that carries them. Adjacent text runs
    /// are merged.
    pub fn parse(xml: &str) -> Result<Self> {
        let mut doc = Self::new();

        // quick-xml reports the declaration as parsed fields; keep the raw
        // bytes instead so the round-trip preserves the original spelling.
        // Must not trip on processing instructions like <?xml-stylesheet …?>.
        if let Some(rest) = xml.strip_prefix("<?xml") {
            if rest.starts_with(|c: char| c.is_ascii_whitespace()) {
                if let Some(end) = xml.find("?>") {
                    doc.decl = Some(xml[..end + 2].to_string());
                }
            }
        }

        let mut reader = Reader::from_str(xml);
        let mut stack: Vec<NodeId> = vec![doc.root];

        loop {
            match reader.read_event() {
                Err(e) => {
                    return Err(Error::Parse(format!(
                        "at byte {}: {e}",
                        reader.buffer_position()
                    )))
                }
                Ok(Event::Eof) => break,
                Ok(Event::Decl(_)) => {}
                Ok(Event::Start(e)) => {
                    let pos = reader.buffer_position() as u64;
                    let id = doc.push_element(pos, *stack.last().unwrap(), &e)?;
                    stack.push(id);
                }
                Ok(Event::Empty(e)) => {
                    let pos = reader.buffer_position() as u64;
                    doc.push_element(pos, *stack.last().unwrap(), &e)?;
                }
                Ok(Event::End(_)) => {
                    if stack.len() <= 1 {
                        return Err(Error::Parse(format!(
                            "unexpected closing tag at byte {}",
                            reader.buffer_position()
                        )));
                    }
                    stack.pop();
                }
                Ok(Event::Text(e)) => {
                    let text = e
                        .unescape()
                        .map_err(|err| Error::Parse(format!("bad entity: {err}")))?;
                    doc.push_text(*stack.last().unwrap(), &text);
                }
                Ok(Event::CData(e)) => {
                    let raw = e.into_inner();
                    let text = String::from_utf8_lossy(&raw).into_owned();
                    let node = doc.arena.new_node(NodeKind::CData(text));
                    stack.last().unwrap().append(node, &mut doc.arena);
                }
                Ok(Event::Comment(e)) => {
                    let text = String::from_utf8_lossy(&e).into_owned();
                    let node = doc.arena.new_node(NodeKind::Comment(text));
                    stack.last().unwrap().append(node, &mut doc.arena);
                }
                Ok(Event::PI(e)) => {
                    let text = String::from_utf8_lossy(&e).into_owned();
                    let node = doc.arena.new_node(NodeKind::Pi(text));
                    stack.last().unwrap().append(node, &mut doc.arena);
                }
                Ok(Event::DocType(e)) => {
                    let text = String::from_utf8_lossy(&e).into_owned();
                    let node = doc.arena.new_node(NodeKind::Doctype(text));
                    stack.last().unwrap().append(node, &mut doc.arena);
                }
            }
        }

        if stack.len() != 1 {
            return Err(Error::Parse("unclosed element at end of input".to_string()));
        }

        Ok(doc)
    }

    fn push_element(&mut self, pos: u64, parent: NodeId, e: &BytesStart<'_>) -> Result<NodeId> {
        let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
        let mut attrs = IndexMap::new();
        for attr in e.attributes() {
            let attr =
                attr.map_err(|err| Error::Parse(format!("bad attribute at byte {pos}: {err}")))?;
            let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
            let value = attr
                .unescape_value()
                .map_err(|err| Error::Parse(format!("bad attribute value: {err}")))?;
            attrs.insert(key, value.into_owned());
        }
        let id = self
            .arena
            .new_node(NodeKind::Element(ElementData { name, attrs }));
        parent.append(id, &mut self.arena);
        Ok(id)
    }

    fn push_text(&mut self, parent: NodeId, text: &str) {
        // Merge adjacent text runs
        if let Some(last) = self.arena[parent].last_child() {
            if let NodeKind::Text(t) = self.arena[last].get_mut() {
                t.push_str(text);
                return;
            }
        }
        let node = self.arena.new_node(NodeKind::Text(text.to_string()));
        parent.append(node, &mut self.arena);
    }

    /// Immutable access to a node's kind.
    pub fn kind(&self, id: NodeId) -> &NodeKind {
        self.arena[id].get()
    }

    /// Element data of a node, if it is an element.
    pub fn elem(&self, id: NodeId) -> Option<&ElementData> {
        match self.arena[id].get() {
            NodeKind::Element(el) => Some(el),
            _ => None,
        }
    }

    /// True when the node is an element.
    pub fn is_element(&self, id: NodeId) -> bool {
        matches!(self.arena[id].get(), NodeKind::Element(_))
    }

    /// Text content of a text or CDATA node.
    pub fn text(&self, id: NodeId) -> Option<&str> {
        match self.arena[id].get() {
            NodeKind::Text(t) | NodeKind::CData(t) => Some(t.as_str()),
            _ => None,
        }
    }

    /// Replace the content of a text or CDATA node.
    pub fn set_text(&mut self, id: NodeId, text: &str) {
        match self.arena[id].get_mut() {
            NodeKind::Text(t) | NodeKind::CData(t) => {
                t.clear();
                t.push_str(text);
            }
            _ => {}
        }
    }

    /// Attribute value on an element node.
    pub fn attr(&self, id: NodeId, name: &str) -> Option<&str> {
        self.elem(id)?.attrs.get(name).map(|v| v.as_str())
    }

    /// Set an attribute on an element node; replaces any existing value.
    pub fn set_attr(&mut self, id: NodeId, name: &str, value: &str) {
        if let NodeKind::Element(el) = self.arena[id].get_mut() {
            el.attrs.insert(name.to_string(), value.to_string());
        }
    }

    /// Remove an attribute from an element node, returning its value.
    pub fn remove_attr(&mut self, id: NodeId, name: &str) -> Option<String> {
        if let NodeKind::Element(el) = self.arena[id].get_mut() {
            el.attrs.shift_remove(name)
        } else {
            None
        }
    }

    /// Write the ASCII-lowercased element name into `buf`.
    /// Returns false (and clears the buffer) for non-element nodes.
    pub fn lower_name_of(&self, id: NodeId, buf: &mut String) -> bool {
        buf.clear();
        match self.elem(id) {
            Some(el) => {
                buf.push_str(&el.name);
                buf.make_ascii_lowercase();
                true
            }
            None => false,
        }
    }

    /// Serialize the whole document.
    ///
    /// `with_tf` controls whether engine-injected `tf-*` attributes are
    /// emitted; staging artifacts keep them, final output drops them.
    pub fn serialize(&self, with_tf: bool) -> String {
        let mut out = String::new();
        if let Some(decl) = &self.decl {
            out.push_str(decl);
        }
        for child in self.root.children(&self.arena) {
            self.serialize_node(&mut out, child, with_tf);
        }
        out
    }

    /// Serialize one node and its subtree into `out`.
    pub fn serialize_node(&self, out: &mut String, id: NodeId, with_tf: bool) {
        match self.arena[id].get() {
            NodeKind::Document => {
                for child in id.children(&self.arena) {
                    self.serialize_node(out, child, with_tf);
                }
            }
            NodeKind::Element(el) => {
                out.push('<');
                out.push_str(&el.name);
                append_attrs(out, el, with_tf);
                if self.arena[id].first_child().is_none() {
                    out.push_str("/>");
                    return;
                }
                out.push('>');
                for child in id.children(&self.arena) {
                    self.serialize_node(out, child, with_tf);
                }
                out.push_str("</");
                out.push_str(&el.name);
                out.push('>');
            }
            NodeKind::Text(t) => append_xml(out, t),
            NodeKind::CData(t) => {
                out.push_str("<![CDATA[");
                out.push_str(t);
                out.push_str("]]>");
            }
            NodeKind::Comment(t) => {
                out.push_str("<!--");
                out.push_str(t);
                out.push_str("-->");
            }
            NodeKind::Pi(t) => {
                out.push_str("<?");
                out.push_str(t);
                out.push_str("?>");
            }
            NodeKind::Doctype(t) => {
                out.push_str("<!DOCTYPE ");
                out.push_str(t);
                out.push('>');
            }
        }
    }
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

/// Append an element's attributes: namespace declarations first, then the
/// rest in insertion order, with `tf-*` attributes gated on `with_tf`.
pub(crate) fn append_attrs(out: &mut String, el: &ElementData, with_tf: bool) {
    for (name, value) in &el.attrs {
        if name == "xmlns" || name.starts_with("xmlns:") {
            out.push(' ');
            out.push_str(name);
            out.push_str("=\"");
            append_xml_attr(out, value);
            out.push('"');
        }
    }
    for (name, value) in &el.attrs {
        if name == "xmlns" || name.starts_with("xmlns:") {
            continue;
        }
        if !with_tf && name.starts_with("tf-") {
            continue;
        }
        out.push(' ');
        out.push_str(name);
        out.push_str("=\"");
        append_xml_attr(out, value);
        out.push('"');
    }
}

/// XML-escape text content into `out`.
pub fn append_xml(out: &mut String, text: &str) {
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
}

/// XML-escape an attribute value into `out`; also encodes the whitespace
/// characters that attribute-value normalization would otherwise fold.
pub fn append_xml_attr(out: &mut String, text: &str) {
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            '\t' => out.push_str("&#9;"),
            '\n' => out.push_str("&#10;"),
            '\r' => out.push_str("&#13;"),
            _ => out.push(c),
        }
    }
}

/// Reusable per-depth string buffers for the recursive walks: grown on
/// demand, never shrunk within a traversal.
#[derive(Debug, Default)]
pub(crate) struct Scratch {
    pools: Vec<Vec<String>>,
}

impl Scratch {
    /// Borrow a cleared buffer for the given recursion depth.
    pub(crate) fn take(&mut self, rn: usize) -> String {
        if self.pools.len() <= rn {
            self.pools.resize_with(rn + 1, Vec::new);
        }
        let mut s = self.pools[rn].pop().unwrap_or_default();
        s.clear();
        s
    }

    /// Return a buffer to its depth's pool, keeping the allocation.
    pub(crate) fn give(&mut self, rn: usize, s: String) {
        if self.pools.len() <= rn {
            self.pools.resize_with(rn + 1, Vec::new);
        }
        self.pools[rn].push(s);
    }
}

/// The extract/restore engine: a document, its tag classification, and the
/// state store that assigns style hashes.
///
/// One engine owns one walk at a time; all passes are synchronous and run
/// to completion on a single thread.
pub struct Engine<'a> {
    /// The document under transformation
    pub doc: Document,
    /// Tag classification for the document's format
    pub tags: Tags,
    pub(crate) state: &'a mut dyn StateStore,
    pub(crate) scratch: Scratch,
    pub(crate) blocks: u32,
}

impl<'a> Engine<'a> {
    /// Wrap a parsed document for transformation.
    pub fn new(doc: Document, tags: Tags, state: &'a mut dyn StateStore) -> Self {
        Self {
            doc,
            tags,
            state,
            scratch: Scratch::default(),
            blocks: 0,
        }
    }

    /// Number of blocks extracted so far.
    pub fn block_count(&self) -> u32 {
        self.blocks
    }
}
