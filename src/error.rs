//! Shared diagnostic rendering for every fallible subsystem in this crate.
//!
//! Each subsystem defines its own `thiserror` enum and implements
//! [`Diagnostic`] on it so the CLI can print a uniform, colored error with
//! source context, in the same spirit as a compiler frontend's diagnostics
//! even though most of what we report here are runtime/parse failures
//! rather than type errors.

use std::error::Error;
use std::fmt;

use colored::Colorize;

/// Number of bytes of context printed to either side of a [`Span`].
const CONTEXT_WINDOW: usize = 40;

/// Trait implemented by every error type in this crate so they can be
/// rendered uniformly, with or without a source-position anchor.
pub trait Diagnostic: Error {
    /// The byte span in the original source this error pertains to, if any.
    fn span(&self) -> Option<Span> {
        None
    }

    fn severity(&self) -> Severity {
        Severity::Error
    }

    /// Renders a human-readable, colored description of this error,
    /// including a windowed view of the offending source when a [`Span`]
    /// and source text are available.
    fn describe(&self, source: Option<&str>) -> String {
        let mut out = String::new();

        let label = match self.severity() {
            Severity::Error => "error:".red().bold(),
            Severity::Warning => "warning:".yellow().bold(),
        };
        out.push_str(&label.to_string());
        out.push(' ');
        out.push_str(&self.to_string());

        if let (Some(span), Some(src)) = (self.span(), source) {
            let (line, col) = line_col(src, span.start);
            out.push_str(&format!("\n  --> byte {}, line {}, col {}\n", span.start, line, col));

            let pre_start = span.start.saturating_sub(CONTEXT_WINDOW);
            let post_end = (span.end + CONTEXT_WINDOW).min(src.len());
            let mid_end = span.end.min(src.len()).max(span.start);
            let pre = &src[pre_start..span.start];
            let mid = &src[span.start..mid_end];
            let post = &src[mid_end..post_end];

            out.push_str("  ");
            out.push_str(&"...".black().to_string());
            out.push_str(pre);
            out.push_str(&mid.color(self.severity().color()).underline().bold().to_string());
            out.push_str(post);
            out.push_str(&"...".black().to_string());
        }

        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

impl Severity {
    fn color(self) -> colored::Color {
        match self {
            Severity::Error => colored::Color::Red,
            Severity::Warning => colored::Color::Yellow,
        }
    }
}

/// A half-open byte range into a source buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn at(offset: usize) -> Span {
        Span { start: offset, end: offset + 1 }
    }

    pub fn new(start: usize, end: usize) -> Span {
        Span { start, end }
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

/// Computes a 1-indexed (line, column) pair for a byte offset into `src`.
/// Columns count bytes, not graphemes; brainfuck source is ASCII-dominant
/// and this is only used for diagnostics, not for slicing.
fn line_col(src: &str, offset: usize) -> (usize, usize) {
    let mut line = 1;
    let mut col = 1;
    for &b in src.as_bytes().iter().take(offset) {
        if b == b'\n' {
            line += 1;
            col = 1;
        } else {
            col += 1;
        }
    }
    (line, col)
}
