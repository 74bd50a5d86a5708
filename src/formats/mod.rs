//! Format-specific pre- and post-passes.
//!
//! Container unpacking and repacking (ZIP I/O) belongs to the caller; the
//! passes here work on the content part itself, massaging host-format
//! quirks into shapes the generic engine handles well.

pub mod docx;
