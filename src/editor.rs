//! Editor surface
//!
//! Holds the working copy of the pattern source during an editing session.
//! The buffer is bound one-way to the document's source at mount time; after
//! that the surface owns it outright, and nothing else overwrites it.
//!
//! Keystroke handling belongs to the embedding widget; this type only tracks
//! the resulting text and a revision counter the shell uses to order edit
//! notifications before any evaluate or save.

use serde::Deserialize;
use std::ops::Range;

/// Cosmetic options, stored for the embedding widget but never interpreted
/// here.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EditorOptions {
    pub font_size: u16,
    pub font_family: String,
    pub theme: String,
    pub line_numbers: bool,
    pub line_wrapping: bool,
}

impl Default for EditorOptions {
    fn default() -> Self {
        Self {
            font_size: 14,
            font_family: "Input Mono Condensed".to_string(),
            theme: "github-light".to_string(),
            line_numbers: false,
            line_wrapping: false,
        }
    }
}

pub struct EditorSurface {
    buffer: String,
    revision: u64,
    options: EditorOptions,
}

impl EditorSurface {
    pub fn new(initial_source: &str, options: EditorOptions) -> Self {
        Self {
            buffer: initial_source.to_string(),
            revision: 0,
            options,
        }
    }

    /// Current content, reported on demand rather than streamed.
    pub fn text(&self) -> &str {
        &self.buffer
    }

    /// Bumped on every content change; the shell compares revisions to turn
    /// widget edits into synchronous dirty notifications.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn options(&self) -> &EditorOptions {
        &self.options
    }

    pub fn set_theme(&mut self, theme: &str) {
        self.options.theme = theme.to_string();
    }

    /// Replace a byte range with new text. The range is clamped to char
    /// boundaries by the caller (the widget edits in valid units).
    pub fn splice(&mut self, range: Range<usize>, replacement: &str) {
        self.buffer.replace_range(range, replacement);
        self.revision += 1;
    }

    pub fn insert(&mut self, at: usize, text: &str) {
        self.buffer.insert_str(at, text);
        self.revision += 1;
    }

    pub fn replace_all(&mut self, text: &str) {
        self.buffer.clear();
        self.buffer.push_str(text);
        self.revision += 1;
    }
}
