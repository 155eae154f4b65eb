//! Time-index engine: maps a playback position to the active line and word,
//! and drives render targets with as few updates as possible.

use crate::lrc::{LyricWord, LyricsDocument};
use crate::render::{classify_lines, HighlightTarget};
use std::time::Duration;
use tokio::time::{interval, Interval, MissedTickBehavior};
use tracing::trace;

const LOG_TARGET: &str = "melodeck::highlight";

/// Binary search for the last item whose onset is at or before `time`.
///
/// `items` must be sorted by onset. Returns `None` when `time` precedes the
/// first onset or `items` is empty.
#[must_use]
pub fn find_active_index<T>(items: &[T], time: f64, onset: impl Fn(&T) -> f64) -> Option<usize> {
    let mut left = 0;
    let mut right = items.len();
    let mut result = None;

    while left < right {
        let mid = left + (right - left) / 2;
        if onset(&items[mid]) <= time {
            result = Some(mid);
            left = mid + 1;
        } else {
            right = mid;
        }
    }

    result
}

/// Fill fraction of a word at `time`, clamped to `[0, 1]`.
///
/// A word with no duration counts as fully sung.
#[must_use]
pub fn word_progress(word: &LyricWord, time: f64) -> f64 {
    let span = word.end_time - word.time;
    if span <= 0.0 {
        return 1.0;
    }
    ((time - word.time) / span).clamp(0.0, 1.0)
}

/// Active line and word at some instant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HighlightState {
    pub active_line: Option<usize>,
    pub active_word: Option<usize>,
}

/// Everything a renderer needs for one frame
#[derive(Debug, Clone, PartialEq, Default)]
pub struct HighlightSnapshot {
    pub time: f64,
    pub state: HighlightState,
    /// Per-word progress of the active line; empty unless that line is enhanced
    pub word_progress: Vec<f64>,
}

/// Compute the highlight for `document` at `time` without side effects.
#[must_use]
pub fn compute_highlight(document: &LyricsDocument, time: f64) -> HighlightSnapshot {
    let active_line = document.active_line_index(time);
    let mut state = HighlightState {
        active_line,
        active_word: None,
    };
    let mut progress = Vec::new();

    if let Some(line) = active_line
        .and_then(|index| document.lines.get(index))
        .filter(|line| line.is_enhanced)
    {
        let active_word = find_active_index(&line.words, time, |word| word.time);
        progress = line
            .words
            .iter()
            .enumerate()
            .map(|(index, word)| match active_word {
                Some(active) if index < active => 1.0,
                Some(active) if index == active => word_progress(word, time),
                _ => 0.0,
            })
            .collect();
        state.active_word = active_word;
    }

    HighlightSnapshot {
        time,
        state,
        word_progress: progress,
    }
}

/// Result of [`Highlighter::update`]
#[derive(Debug, Clone, PartialEq)]
pub struct HighlightUpdate {
    pub snapshot: HighlightSnapshot,
    /// Whether line classes were pushed to the targets this frame
    pub line_changed: bool,
}

/// Stateful highlighter bound to one document and up to two targets.
///
/// The primary target is the main lyrics view; the mirror is an optional
/// secondary view (the full-screen modal) that receives identical updates.
#[derive(Default)]
pub struct Highlighter {
    document: Option<LyricsDocument>,
    state: HighlightState,
    last_progress: Vec<f64>,
    primary: Option<Box<dyn HighlightTarget>>,
    mirror: Option<Box<dyn HighlightTarget>>,
}

impl Highlighter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_primary(target: Box<dyn HighlightTarget>) -> Self {
        Self {
            primary: Some(target),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn document(&self) -> Option<&LyricsDocument> {
        self.document.as_ref()
    }

    #[must_use]
    pub const fn state(&self) -> HighlightState {
        self.state
    }

    #[must_use]
    pub const fn has_mirror(&self) -> bool {
        self.mirror.is_some()
    }

    /// Replace the loaded document and reset the highlight.
    pub fn load(&mut self, document: LyricsDocument) {
        self.state = HighlightState::default();
        self.last_progress.clear();

        let classes = classify_lines(document.len(), None);
        for target in self.targets_mut() {
            target.show_lyrics(&document);
            target.apply_line_classes(&classes, None);
        }
        self.document = Some(document);
    }

    /// Drop the document and blank every target.
    pub fn clear(&mut self) {
        self.document = None;
        self.state = HighlightState::default();
        self.last_progress.clear();
        for target in self.targets_mut() {
            target.clear();
        }
    }

    /// Attach a mirror view and bring it up to date immediately.
    pub fn attach_mirror(&mut self, mut target: Box<dyn HighlightTarget>) {
        if let Some(document) = &self.document {
            target.show_lyrics(document);
            let active = self.state.active_line;
            target.apply_line_classes(&classify_lines(document.len(), active), active);
            if let Some(line) = active.filter(|_| !self.last_progress.is_empty()) {
                target.apply_word_progress(line, &self.last_progress);
            }
        }
        self.mirror = Some(target);
    }

    /// Detach the mirror view, returning it to the caller.
    pub fn detach_mirror(&mut self) -> Option<Box<dyn HighlightTarget>> {
        self.mirror.take()
    }

    /// Recompute the highlight for `time` and push changes to the targets.
    ///
    /// Line classes are pushed only when the active line changes, including a
    /// backwards seek to before the first line. Word progress is pushed every
    /// call while an enhanced line is active. Returns `None` when no lyrics
    /// are loaded.
    pub fn update(&mut self, time: f64) -> Option<HighlightUpdate> {
        let document = self.document.as_ref().filter(|doc| !doc.is_empty())?;
        let snapshot = compute_highlight(document, time);
        let active = snapshot.state.active_line;
        let line_changed = active != self.state.active_line;

        let classes = line_changed.then(|| classify_lines(document.len(), active));
        if line_changed {
            trace!(target: LOG_TARGET, "Active line {:?} -> {:?} at {time:.2}s", self.state.active_line, active);
        }

        for target in self.primary.iter_mut().chain(self.mirror.iter_mut()) {
            if let Some(classes) = &classes {
                target.apply_line_classes(classes, active);
            }
            if let Some(line) = active.filter(|_| !snapshot.word_progress.is_empty()) {
                target.apply_word_progress(line, &snapshot.word_progress);
            }
        }

        self.state = snapshot.state;
        self.last_progress.clone_from(&snapshot.word_progress);

        Some(HighlightUpdate {
            snapshot,
            line_changed,
        })
    }

    fn targets_mut(&mut self) -> impl Iterator<Item = &mut Box<dyn HighlightTarget>> {
        self.primary.iter_mut().chain(self.mirror.iter_mut())
    }
}

/// Collapses time samples so at most one highlight recomputation runs per
/// display frame. A new sample supersedes any sample still pending.
#[derive(Debug, Default)]
pub struct FrameCoalescer {
    pending: Option<f64>,
    superseded: u64,
}

impl FrameCoalescer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `time` for the next frame. Returns `true` if it replaced an
    /// earlier pending sample.
    pub fn submit(&mut self, time: f64) -> bool {
        let replaced = self.pending.replace(time).is_some();
        if replaced {
            self.superseded += 1;
        }
        replaced
    }

    /// Take the sample to process on this frame, if any.
    pub fn take(&mut self) -> Option<f64> {
        self.pending.take()
    }

    /// Drop the pending sample without processing it.
    pub fn cancel(&mut self) -> Option<f64> {
        self.pending.take()
    }

    #[must_use]
    pub const fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Number of samples dropped because a newer one arrived first
    #[must_use]
    pub const fn superseded(&self) -> u64 {
        self.superseded
    }
}

/// Frame ticker for `frame_rate` frames per second. Late frames are skipped
/// rather than replayed in a burst.
#[must_use]
pub fn frame_interval(frame_rate: u32) -> Interval {
    let period = Duration::from_secs_f64(1.0 / f64::from(frame_rate.max(1)));
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::{LineClass, RenderedLyrics, WatchTarget};
    use std::sync::{Arc, Mutex};

    const ENHANCED: &str = "[00:01.00]<00:01.00>Hello <00:02.00>world\n[00:05.00]<00:05.00>Second";

    #[derive(Clone, Default)]
    struct CountingTarget {
        class_pushes: Arc<Mutex<usize>>,
        word_pushes: Arc<Mutex<usize>>,
    }

    impl HighlightTarget for CountingTarget {
        fn show_lyrics(&mut self, _document: &LyricsDocument) {}
        fn clear(&mut self) {}
        fn apply_line_classes(&mut self, _classes: &[LineClass], _active: Option<usize>) {
            *self.class_pushes.lock().unwrap() += 1;
        }
        fn apply_word_progress(&mut self, _line: usize, _progress: &[f64]) {
            *self.word_pushes.lock().unwrap() += 1;
        }
    }

    fn onsets(times: &[f64]) -> Vec<f64> {
        times.to_vec()
    }

    #[test]
    fn test_find_active_index() {
        let items = onsets(&[1.0, 5.0, 9.0]);
        assert_eq!(find_active_index(&items, 0.5, |t| *t), None);
        assert_eq!(find_active_index(&items, 1.0, |t| *t), Some(0));
        assert_eq!(find_active_index(&items, 5.0, |t| *t), Some(1));
        assert_eq!(find_active_index(&items, 8.9, |t| *t), Some(1));
        assert_eq!(find_active_index(&items, 9.5, |t| *t), Some(2));
        assert_eq!(find_active_index(&items, 1000.0, |t| *t), Some(2));
    }

    #[test]
    fn test_find_active_index_empty_and_duplicates() {
        let empty: Vec<f64> = Vec::new();
        assert_eq!(find_active_index(&empty, 3.0, |t| *t), None);

        let items = onsets(&[1.0, 2.0, 2.0, 3.0]);
        assert_eq!(find_active_index(&items, 2.0, |t| *t), Some(2));
    }

    #[test]
    fn test_word_progress() {
        let word = LyricWord {
            time: 1.0,
            end_time: 3.0,
            text: "la".to_string(),
        };
        assert!(word_progress(&word, 0.0).abs() < 1e-9);
        assert!((word_progress(&word, 2.0) - 0.5).abs() < 1e-9);
        assert!((word_progress(&word, 10.0) - 1.0).abs() < 1e-9);

        let instant = LyricWord {
            time: 1.0,
            end_time: 1.0,
            text: "x".to_string(),
        };
        assert!((word_progress(&instant, 0.0) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_compute_highlight_standard() {
        let document = LyricsDocument::parse("[00:01.00]Hello\n[00:02.50]World");
        let snapshot = compute_highlight(&document, 2.0);
        assert_eq!(snapshot.state.active_line, Some(0));
        assert_eq!(snapshot.state.active_word, None);
        assert!(snapshot.word_progress.is_empty());

        assert_eq!(compute_highlight(&document, 0.5).state.active_line, None);
    }

    #[test]
    fn test_compute_highlight_enhanced() {
        let document = LyricsDocument::parse(ENHANCED);
        let snapshot = compute_highlight(&document, 3.5);
        assert_eq!(snapshot.state.active_line, Some(0));
        assert_eq!(snapshot.state.active_word, Some(1));
        assert_eq!(snapshot.word_progress.len(), 2);
        assert!((snapshot.word_progress[0] - 1.0).abs() < 1e-9);
        // "world" runs 2.0..5.0
        assert!((snapshot.word_progress[1] - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_update_without_lyrics() {
        let mut highlighter = Highlighter::new();
        assert!(highlighter.update(1.0).is_none());

        highlighter.load(LyricsDocument::parse(""));
        assert!(highlighter.update(1.0).is_none());
    }

    #[test]
    fn test_line_classes_pushed_only_on_change() {
        let target = CountingTarget::default();
        let mut highlighter = Highlighter::with_primary(Box::new(target.clone()));
        highlighter.load(LyricsDocument::parse("[00:01.00]A\n[00:05.00]B\n[00:09.00]C"));
        let after_load = *target.class_pushes.lock().unwrap();

        assert!(highlighter.update(1.5).unwrap().line_changed);
        assert!(!highlighter.update(2.0).unwrap().line_changed);
        assert!(!highlighter.update(4.9).unwrap().line_changed);
        assert!(highlighter.update(5.0).unwrap().line_changed);

        assert_eq!(*target.class_pushes.lock().unwrap() - after_load, 2);
        assert_eq!(*target.word_pushes.lock().unwrap(), 0);
    }

    #[test]
    fn test_seek_before_first_line_clears_active() {
        let (target, rx) = WatchTarget::new();
        let mut highlighter = Highlighter::with_primary(Box::new(target));
        highlighter.load(LyricsDocument::parse("[00:01.00]A\n[00:05.00]B"));

        highlighter.update(6.0);
        assert_eq!(rx.borrow().active_line, Some(1));

        let update = highlighter.update(0.2).unwrap();
        assert!(update.line_changed);
        assert_eq!(highlighter.state().active_line, None);
        assert!(rx
            .borrow()
            .classes
            .iter()
            .all(|class| *class == LineClass::Future));
    }

    #[test]
    fn test_word_progress_pushed_every_frame() {
        let target = CountingTarget::default();
        let mut highlighter = Highlighter::with_primary(Box::new(target.clone()));
        highlighter.load(LyricsDocument::parse(ENHANCED));

        highlighter.update(1.2);
        highlighter.update(1.4);
        highlighter.update(1.6);
        assert_eq!(*target.word_pushes.lock().unwrap(), 3);
    }

    #[test]
    fn test_mirror_receives_identical_updates() {
        let (primary, primary_rx) = WatchTarget::new();
        let (mirror, mirror_rx) = WatchTarget::new();
        let mut highlighter = Highlighter::with_primary(Box::new(primary));
        highlighter.load(LyricsDocument::parse(ENHANCED));
        highlighter.attach_mirror(Box::new(mirror));

        highlighter.update(3.5);
        highlighter.update(5.5);
        assert_eq!(*primary_rx.borrow(), *mirror_rx.borrow());
        assert_eq!(mirror_rx.borrow().active_text(), Some("Second"));
    }

    #[test]
    fn test_mirror_attached_mid_song_catches_up() {
        let (primary, primary_rx) = WatchTarget::new();
        let mut highlighter = Highlighter::with_primary(Box::new(primary));
        highlighter.load(LyricsDocument::parse(ENHANCED));
        highlighter.update(3.5);

        let (mirror, mirror_rx) = WatchTarget::new();
        highlighter.attach_mirror(Box::new(mirror));
        let mirrored: RenderedLyrics = mirror_rx.borrow().clone();
        assert_eq!(mirrored, *primary_rx.borrow());

        assert!(highlighter.detach_mirror().is_some());
        assert!(!highlighter.has_mirror());
    }

    #[test]
    fn test_load_resets_state() {
        let mut highlighter = Highlighter::new();
        highlighter.load(LyricsDocument::parse("[00:01.00]A"));
        highlighter.update(2.0);
        assert_eq!(highlighter.state().active_line, Some(0));

        highlighter.load(LyricsDocument::parse("[00:10.00]B"));
        assert_eq!(highlighter.state(), HighlightState::default());

        highlighter.clear();
        assert!(highlighter.document().is_none());
    }

    #[test]
    fn test_frame_coalescer_keeps_latest() {
        let mut coalescer = FrameCoalescer::new();
        assert!(!coalescer.submit(1.0));
        assert!(coalescer.submit(1.1));
        assert!(coalescer.submit(1.2));
        assert_eq!(coalescer.superseded(), 2);
        assert_eq!(coalescer.take(), Some(1.2));
        assert_eq!(coalescer.take(), None);

        coalescer.submit(3.0);
        assert_eq!(coalescer.cancel(), Some(3.0));
        assert!(!coalescer.is_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn test_frame_interval_period() {
        let mut ticker = frame_interval(50);
        let start = tokio::time::Instant::now();
        ticker.tick().await;
        ticker.tick().await;
        assert_eq!(start.elapsed(), Duration::from_millis(20));
    }
}
