//! Render adapters: the seam between highlight state and whatever draws it.
//!
//! The highlight engine never touches a UI. It pushes line classes and word
//! progress into [`HighlightTarget`]s; a target may be a terminal, a DOM
//! bridge, or the [`WatchTarget`] below which publishes a [`RenderedLyrics`]
//! snapshot over a `tokio::sync::watch` channel.

use crate::lrc::LyricsDocument;
use tokio::sync::watch;

/// Visual class of one lyric line relative to the active line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LineClass {
    Past,
    Active,
    Future,
}

impl LineClass {
    /// Classify line `index` against the active line.
    ///
    /// With no active line every line is in the future.
    #[must_use]
    pub fn of(index: usize, active: Option<usize>) -> Self {
        match active {
            Some(active) if index == active => Self::Active,
            Some(active) if index < active => Self::Past,
            _ => Self::Future,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Past => "past",
            Self::Active => "active",
            Self::Future => "future",
        }
    }
}

impl std::fmt::Display for LineClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify every line of a `len`-line document from scratch
#[must_use]
pub fn classify_lines(len: usize, active: Option<usize>) -> Vec<LineClass> {
    (0..len).map(|index| LineClass::of(index, active)).collect()
}

/// Something that displays lyrics and follows highlight updates.
pub trait HighlightTarget: Send + Sync {
    /// Lay out a freshly loaded document.
    fn show_lyrics(&mut self, document: &LyricsDocument);

    /// Remove any displayed lyrics.
    fn clear(&mut self);

    /// Replace the class of every line. Called when the active line changes.
    fn apply_line_classes(&mut self, classes: &[LineClass], active: Option<usize>);

    /// Per-word fill fractions for the active enhanced line. Called every frame.
    fn apply_word_progress(&mut self, line: usize, progress: &[f64]);
}

/// What a target currently shows
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RenderedLyrics {
    pub lines: Vec<String>,
    pub classes: Vec<LineClass>,
    pub active_line: Option<usize>,
    /// Line the word progress belongs to
    pub word_line: Option<usize>,
    pub word_progress: Vec<f64>,
}

impl RenderedLyrics {
    /// Text of the active line, if any
    #[must_use]
    pub fn active_text(&self) -> Option<&str> {
        self.active_line
            .and_then(|index| self.lines.get(index))
            .map(String::as_str)
    }
}

/// Target that publishes every change as a [`RenderedLyrics`] snapshot
pub struct WatchTarget {
    tx: watch::Sender<RenderedLyrics>,
}

impl WatchTarget {
    /// Create a target and the receiver that observes it
    #[must_use]
    pub fn new() -> (Self, watch::Receiver<RenderedLyrics>) {
        let (tx, rx) = watch::channel(RenderedLyrics::default());
        (Self { tx }, rx)
    }
}

impl HighlightTarget for WatchTarget {
    fn show_lyrics(&mut self, document: &LyricsDocument) {
        self.tx.send_replace(RenderedLyrics {
            lines: document.lines.iter().map(|line| line.text.clone()).collect(),
            classes: classify_lines(document.len(), None),
            ..RenderedLyrics::default()
        });
    }

    fn clear(&mut self) {
        self.tx.send_replace(RenderedLyrics::default());
    }

    fn apply_line_classes(&mut self, classes: &[LineClass], active: Option<usize>) {
        self.tx.send_modify(|view| {
            view.classes = classes.to_vec();
            view.active_line = active;
            if view.word_line != active {
                view.word_line = None;
                view.word_progress.clear();
            }
        });
    }

    fn apply_word_progress(&mut self, line: usize, progress: &[f64]) {
        self.tx.send_modify(|view| {
            view.word_line = Some(line);
            view.word_progress = progress.to_vec();
        });
    }
}
