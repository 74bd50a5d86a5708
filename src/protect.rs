//! Protection folding.
//!
//! After serialization the stream buffer still contains literal
//! `<tf-protect>…</tf-protect>` regions. This pass removes them: adjacent
//! regions separated only by whitespace coalesce, then each region is
//! folded into a synthetic style of kind `P` attached to an adjacent token
//! or style, so the stream surface presents no structural tags. Regions
//! sitting at a block boundary are safe as-is and stay literal (minus the
//! wrapper). The five dispositions are ordered; reordering them changes
//! semantics.

use std::borrow::Cow;
use std::sync::OnceLock;

use regex::Regex;
use tracing::warn;

use crate::dom::Engine;
use crate::error::Result;
use crate::sentinel::{TFI_CLOSE, TFI_OPEN_B, TFI_OPEN_E};

/// Iteration cap for the folding loop.
const MAX_PASSES: usize = 100;

fn rx_prot_seam() -> &'static Regex {
    static RX: OnceLock<Regex> = OnceLock::new();
    RX.get_or_init(|| {
        Regex::new(r"</tf-protect>([\s\r\n\p{Z}]*)<tf-protect>").expect("seam pattern")
    })
}

fn rx_prots() -> &'static Regex {
    static RX: OnceLock<Regex> = OnceLock::new();
    RX.get_or_init(|| Regex::new(r"(?s)<tf-protect>(.*?)</tf-protect>").expect("protect pattern"))
}

fn rx_block_start() -> &'static Regex {
    static RX: OnceLock<Regex> = OnceLock::new();
    RX.get_or_init(|| Regex::new(r">[\s\p{Zs}]*$").expect("block-start pattern"))
}

fn rx_block_end() -> &'static Regex {
    static RX: OnceLock<Regex> = OnceLock::new();
    RX.get_or_init(|| Regex::new(r"^[\s\p{Zs}]*<").expect("block-end pattern"))
}

fn rx_ifx_start() -> &'static Regex {
    static RX: OnceLock<Regex> = OnceLock::new();
    RX.get_or_init(|| {
        Regex::new("(\u{e011}[^\u{e012}]+\u{e012})[\\s\\p{Zs}]*$").expect("style-start pattern")
    })
}

fn rx_pfx_style() -> &'static Regex {
    static RX: OnceLock<Regex> = OnceLock::new();
    RX.get_or_init(|| Regex::new("\u{e013}[\\s\\p{Zs}]*$").expect("style-prefix pattern"))
}

fn rx_pfx_token() -> &'static Regex {
    static RX: OnceLock<Regex> = OnceLock::new();
    RX.get_or_init(|| {
        Regex::new("[^>\\s\\p{Z}\u{e012}]+[\\s\\p{Zs}]*$").expect("token-prefix pattern")
    })
}

impl<'a> Engine<'a> {
    /// Turn protected regions into inline styles on the surrounding tokens.
    pub fn protect_to_styles(&mut self, styled: &mut String) -> Result<()> {
        // Merge protected regions if they only have whitespace between them
        if let Cow::Owned(merged) = rx_prot_seam().replace_all(styled, "$1") {
            *styled = merged;
        }

        let mut ns = String::with_capacity(styled.len());

        for _ in 0..MAX_PASSES {
            let mut last = 0usize;

            while let Some(caps) = rx_prots().captures_at(styled, last) {
                let whole = caps.get(0).unwrap();
                let body = caps.get(1).unwrap().as_str().to_string();
                ns.push_str(&styled[last..whole.start()]);
                last = whole.end();

                if rx_block_start().is_match(&ns) {
                    // At the beginning of a block tag: leave the protected
                    // content as-is
                    ns.push_str(&body);
                    continue;
                }

                if rx_block_end().is_match(&styled[last..]) {
                    // At the end of a block tag: leave as-is
                    ns.push_str(&body);
                    continue;
                }

                if let Some(ic) = rx_ifx_start().captures(&ns) {
                    // Inside at the start of an existing style: wrap the
                    // whole style body
                    let Some(close_rel) = styled[last..].find(TFI_CLOSE) else {
                        ns.push_str(&body);
                        continue;
                    };
                    let hash = self.state.style("P", &body, "")?;
                    let opener_end = ic.get(1).unwrap().end();
                    let tail = ns.split_off(opener_end);
                    ns.push_str(TFI_OPEN_B);
                    ns.push_str("P:");
                    ns.push_str(&hash);
                    ns.push_str(TFI_OPEN_E);
                    ns.push_str(&tail);
                    ns.push_str(&styled[last..last + close_rel]);
                    ns.push_str(TFI_CLOSE);
                    last += close_rel;
                    continue;
                }

                if rx_pfx_style().is_match(&ns) {
                    // Create a new style around the immediately preceding
                    // style
                    if let Some(open_at) = ns.rfind(TFI_OPEN_B) {
                        let hash = self.state.style("P", "", &body)?;
                        let tail = ns.split_off(open_at);
                        ns.push_str(TFI_OPEN_B);
                        ns.push_str("P:");
                        ns.push_str(&hash);
                        ns.push_str(TFI_OPEN_E);
                        ns.push_str(&tail);
                        ns.push_str(TFI_CLOSE);
                        continue;
                    }
                }

                if let Some(token_at) = rx_pfx_token().find(&ns).map(|m| m.start()) {
                    // Create a new style around the immediately preceding
                    // token
                    let hash = self.state.style("P", "", &body)?;
                    let tail = ns.split_off(token_at);
                    ns.push_str(TFI_OPEN_B);
                    ns.push_str("P:");
                    ns.push_str(&hash);
                    ns.push_str(TFI_OPEN_E);
                    ns.push_str(&tail);
                    ns.push_str(TFI_CLOSE);
                    continue;
                }

                // No token on either side to attach to; leaving the content
                // literal is the visible failure mode, never silent loss
                ns.push_str(&body);
            }

            if last == 0 {
                break;
            }

            ns.push_str(&styled[last..]);
            std::mem::swap(styled, &mut ns);
            ns.clear();
        }

        if styled.contains("<tf-protect>") {
            warn!("protection folding hit the {MAX_PASSES}-pass cap; leaving remaining regions");
        }

        Ok(())
    }
}
