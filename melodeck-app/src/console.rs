//! Terminal rendering of the lyrics view and line-based keyboard input.

use melodeck_core::{HighlightTarget, KeyPress, LineClass, LyricsDocument, PlayerCommand};

/// Prints the active lyric line whenever it changes
pub struct ConsoleTarget {
    label: &'static str,
    lines: Vec<String>,
    /// Word boundaries already printed for the active line
    shown_words: usize,
}

impl ConsoleTarget {
    #[must_use]
    pub const fn new(label: &'static str) -> Self {
        Self {
            label,
            lines: Vec::new(),
            shown_words: 0,
        }
    }
}

impl HighlightTarget for ConsoleTarget {
    fn show_lyrics(&mut self, document: &LyricsDocument) {
        self.lines = document.lines.iter().map(|line| line.text.clone()).collect();
        self.shown_words = 0;
        let title = document.metadata.title().unwrap_or("untitled");
        println!("[{}] ~ {} ({} lines) ~", self.label, title, self.lines.len());
    }

    fn clear(&mut self) {
        self.lines.clear();
        self.shown_words = 0;
    }

    fn apply_line_classes(&mut self, classes: &[LineClass], active: Option<usize>) {
        self.shown_words = 0;
        let Some(index) = active else {
            return;
        };
        if classes.get(index) != Some(&LineClass::Active) {
            return;
        }
        if let Some(text) = self.lines.get(index) {
            println!("[{}] > {}", self.label, text);
        }
    }

    fn apply_word_progress(&mut self, _line: usize, progress: &[f64]) {
        let done = progress.iter().filter(|p| **p >= 1.0).count();
        if done > self.shown_words {
            self.shown_words = done;
            println!("[{}]   {}", self.label, "*".repeat(done));
        }
    }
}

/// One line typed at the terminal
#[derive(Debug, PartialEq)]
pub enum Input {
    Key(KeyPress),
    Mirror,
    Shuffle,
    Repeat,
    Seek(f64),
    Volume(u8),
    Quit,
}

impl Input {
    /// Parse `space`, `ctrl+right`, `esc`, `mirror`, `seek 42`, `vol 80`, `quit` ...
    #[must_use]
    pub fn parse(line: &str) -> Option<Self> {
        let mut words = line.split_whitespace();
        let first = words.next()?;
        let arg = words.next();
        match (first.to_ascii_lowercase().as_str(), arg) {
            ("mirror", None) => Some(Self::Mirror),
            ("shuffle", None) => Some(Self::Shuffle),
            ("repeat", None) => Some(Self::Repeat),
            ("quit" | "exit", None) => Some(Self::Quit),
            ("seek", Some(secs)) => secs.parse().ok().map(Self::Seek),
            ("vol" | "volume", Some(volume)) => volume.parse().ok().map(Self::Volume),
            _ => line.parse().ok().map(Self::Key),
        }
    }

    /// The player command for this input. `Quit` has none.
    #[must_use]
    pub fn into_command(self) -> Option<PlayerCommand> {
        match self {
            Self::Key(press) => Some(PlayerCommand::Key(press)),
            Self::Mirror => Some(PlayerCommand::OpenMirror(Box::new(ConsoleTarget::new(
                "mirror",
            )))),
            Self::Shuffle => Some(PlayerCommand::ToggleShuffle),
            Self::Repeat => Some(PlayerCommand::ToggleRepeat),
            Self::Seek(position) => Some(PlayerCommand::Seek(position)),
            Self::Volume(volume) => Some(PlayerCommand::SetVolume(volume)),
            Self::Quit => None,
        }
    }
}
