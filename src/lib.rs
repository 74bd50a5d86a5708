//! Lossless bridge between structured documents and linear translation streams.
//!
//! transfuse flattens a document tree into a stream where each translatable
//! region is an opaque block of text decorated with minimal inline-style
//! markers, and, after external text transformation, reconstructs a document
//! in which every untranslated structural detail is identical to the source.
//!
//! The engine works in tree-walking passes:
//! - **Whitespace folding**: boundary whitespace moves into `tf-space-*`
//!   attributes so it survives arbitrary edits of the surrounding text
//! - **Style serialization**: inline elements become sentinel-framed
//!   `kind:hash` markers whose open/close tags live in the [`StateStore`]
//! - **Block extraction**: translatable text regions become stream blocks
//!   with content-addressed identifiers
//! - **Protection folding**: protected fragments fold into synthetic styles
//!   so the stream surface carries no structural tags
//! - **Injection**: the inverse of all of the above, tolerant of missing
//!   blocks and stray markers
//!
//! # Example
//!
//! ```rust
//! use transfuse::{cleanup_styles, Document, Engine, MemState, Tags};
//!
//! let doc = Document::parse("<p>Hello <b>world</b>!</p>").unwrap();
//! let mut tags = Tags::default();
//! tags.inline.insert("b".to_string());
//! tags.parents_allow.insert("p".to_string());
//!
//! let mut state = MemState::default();
//! let mut engine = Engine::new(doc, tags, &mut state);
//! engine.save_spaces();
//! let mut styled = engine.save_styles().unwrap();
//! engine.protect_to_styles(&mut styled).unwrap();
//! cleanup_styles(&mut styled);
//!
//! // The <b> element is now a sentinel-framed style marker.
//! assert!(styled.contains('\u{e011}'));
//! assert!(styled.contains("world"));
//! assert!(!styled.contains("<b"));
//! ```

mod blocks;
mod dom;
mod error;
mod extract;
pub mod formats;
mod inject;
mod protect;
pub mod sentinel;
mod spaces;
mod state;
mod stream;
mod styles;
mod tags;

pub use dom::{append_xml, append_xml_attr, Document, ElementData, Engine, NodeKind};
pub use error::{Error, Result};
pub use extract::extract;
pub use inject::inject;
pub use state::{MemState, SqliteState, StateStore};
pub use stream::{detect_stream, ApertiumStream, Dialect, StreamFormat, VislStream};
pub use styles::cleanup_styles;
pub use tags::{Format, Tags};
