//! Wikitext cleanup and first-sentence extraction.
//!
//! Everything here is a best-effort heuristic over wiki markup, not a full
//! parser. Templates and links go through a small recursive scanner so that
//! nested templates disappear as a whole; tags and citations are regex work.

use lazy_static::lazy_static;
use quick_xml::escape::resolve_html5_entity;
use regex::{Captures, Regex};
use unicode_normalization::UnicodeNormalization;

/// Minimum length of a first sentence before it is preferred over the whole text.
pub const DEFAULT_SENTENCE_MIN: usize = 20;

/// Templates nested deeper than this are treated as unclosed.
const MAX_TEMPLATE_DEPTH: usize = 32;

lazy_static! {
    // Citations: <ref name="x"/> and <ref ...>...</ref>
    static ref REF_SELF_CLOSING: Regex = Regex::new(r"(?i)<ref\b[^>]*/>").unwrap();
    static ref REF_BLOCK: Regex = Regex::new(r"(?is)<ref\b[^>]*>.*?</ref\s*>").unwrap();

    // Inline formatting tags, opening or closing
    static ref INLINE_TAG: Regex = Regex::new(
        r"(?i)</?(?:nowiki|ref|math|code|span|div|br|small|i|b|u|sup|sub)\b[^>]*>"
    ).unwrap();

    static ref WHITESPACE_RUN: Regex = Regex::new(r"\s+").unwrap();

    // A single leading "(...)" aside, no nested parentheses
    static ref LEADING_ASIDE: Regex = Regex::new(r"^\([^()]{1,120}\)\s*").unwrap();

    // Shortest prefix ending in a strong terminator followed by space or end
    static ref SENTENCE_END: Regex = Regex::new(r"^(.+?[.!?])(?:\s|$)").unwrap();

    static ref HTML_ENTITY: Regex = Regex::new(r"&(#[0-9]{1,7}|#[xX][0-9a-fA-F]{1,6}|[a-zA-Z][a-zA-Z0-9]{1,31});").unwrap();
}

/// Number of Unicode scalar values in `s`.
pub fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Decode HTML character references: the full HTML5 named set plus decimal
/// and hex numeric forms. Unknown names and a bare `&` are left untouched.
pub fn decode_entities(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }
    HTML_ENTITY
        .replace_all(text, |caps: &Captures| {
            let body = &caps[1];
            let numeric = if let Some(hex) = body.strip_prefix("#x").or_else(|| body.strip_prefix("#X")) {
                Some(u32::from_str_radix(hex, 16).ok())
            } else {
                body.strip_prefix('#').map(|dec| dec.parse::<u32>().ok())
            };
            match numeric {
                Some(code) => code
                    .and_then(char::from_u32)
                    .map(String::from)
                    .unwrap_or_else(|| caps[0].to_string()),
                None => resolve_html5_entity(body)
                    .map(str::to_string)
                    .unwrap_or_else(|| caps[0].to_string()),
            }
        })
        .into_owned()
}

/// Decode entities, compose to NFC, collapse whitespace runs and trim.
pub fn normalize_space(text: &str) -> String {
    let decoded = decode_entities(text);
    let composed: String = decoded.nfc().collect();
    WHITESPACE_RUN.replace_all(&composed, " ").trim().to_string()
}

/// Strip wiki markup down to a single plain line.
pub fn strip_markup(text: &str) -> String {
    let text = REF_SELF_CLOSING.replace_all(text, "");
    let text = REF_BLOCK.replace_all(&text, "");
    let text = INLINE_TAG.replace_all(&text, " ");
    let text = MarkupScanner::new(&text).strip();
    let text = text.replace("'''", "").replace("''", "");
    let text = normalize_space(&text);
    LEADING_ASIDE.replace(&text, "").into_owned()
}

/// First sentence of `text` if it is at least `min_len` characters, else the
/// whole normalized text.
pub fn first_sentence(text: &str, min_len: usize) -> String {
    let text = normalize_space(text);
    if let Some(caps) = SENTENCE_END.captures(&text) {
        let sentence = &caps[1];
        if char_len(sentence) >= min_len {
            return sentence.to_string();
        }
    }
    text
}

// ─────────────────────────────────────────────────────────────────────────────
// Template / link scanner
// ─────────────────────────────────────────────────────────────────────────────

/// Parsed wikilink body: target#anchor|display
#[derive(Debug, PartialEq)]
struct Wikilink<'a> {
    target: &'a str,
    anchor: Option<&'a str>,
    display: Option<&'a str>,
}

impl<'a> Wikilink<'a> {
    fn parse(body: &'a str) -> Self {
        let (head, display) = match body.split_once('|') {
            Some((head, display)) => (head, Some(display)),
            None => (body, None),
        };
        let (target, anchor) = match head.split_once('#') {
            Some((target, anchor)) => (target, Some(anchor)),
            None => (head, None),
        };
        Wikilink { target, anchor, display }
    }

    /// Display text if present, otherwise target (or the bare anchor)
    fn text(&self) -> &'a str {
        if let Some(display) = self.display {
            return display;
        }
        if self.target.trim().is_empty() {
            return self.anchor.unwrap_or("");
        }
        self.target
    }
}

/// Walks the text once, dropping `{{...}}` spans (nested-safe) and
/// replacing `[[...]]` links with their visible text.
struct MarkupScanner<'a> {
    text: &'a str,
    pos: usize,
}

impl<'a> MarkupScanner<'a> {
    fn new(text: &'a str) -> Self {
        MarkupScanner { text, pos: 0 }
    }

    fn rest(&self) -> &'a str {
        &self.text[self.pos..]
    }

    fn strip(mut self) -> String {
        let mut out = String::with_capacity(self.text.len());
        while let Some(c) = self.rest().chars().next() {
            let rest = self.rest();
            if rest.starts_with("{{") {
                match self.template_end(self.pos, 0) {
                    Some(end) => {
                        self.pos = end;
                        out.push(' ');
                    }
                    None => {
                        // unclosed: keep literally
                        out.push_str("{{");
                        self.pos += 2;
                    }
                }
            } else if rest.starts_with("[[") {
                match self.link_body() {
                    Some(body) => {
                        out.push_str(Wikilink::parse(body).text());
                        self.pos += body.len() + 4;
                    }
                    None => {
                        out.push_str("[[");
                        self.pos += 2;
                    }
                }
            } else {
                out.push(c);
                self.pos += c.len_utf8();
            }
        }
        out
    }

    // template ::= "{{" (template | char)* "}}"
    fn template_end(&self, start: usize, depth: usize) -> Option<usize> {
        if depth >= MAX_TEMPLATE_DEPTH {
            return None;
        }
        let mut pos = start + 2;
        while pos < self.text.len() {
            let rest = &self.text[pos..];
            if rest.starts_with("}}") {
                return Some(pos + 2);
            }
            if rest.starts_with("{{") {
                pos = self.template_end(pos, depth + 1)?;
                continue;
            }
            pos += rest.chars().next()?.len_utf8();
        }
        None
    }

    // link ::= "[[" [^\[\]]+ "]]"
    fn link_body(&self) -> Option<&'a str> {
        let inner = &self.rest()[2..];
        let end = inner.find("]]")?;
        let body = &inner[..end];
        if body.is_empty() || body.contains('[') || body.contains(']') {
            return None;
        }
        Some(body)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
