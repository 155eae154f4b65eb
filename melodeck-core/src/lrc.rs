use crate::highlight::find_active_index;
use crate::time::{format_timestamp, is_timestamp, parse_timestamp};
use std::collections::BTreeMap;
use std::fmt::Write;
use std::sync::Arc;

/// How long the final word of the final line stays active, in seconds.
pub const TRAILING_GRACE_SECS: f64 = 3.0;

/// Header tags recognised as metadata rather than lyrics.
const METADATA_KEYS: [&str; 10] = [
    "ar", "ti", "al", "by", "offset", "re", "ve", "length", "au", "la",
];

/// Which LRC dialect a document is written in
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LrcFormat {
    /// `[mm:ss.xx]line` only
    #[default]
    Standard,
    /// At least one `<mm:ss.xx>` word timestamp is present
    Enhanced,
}

/// LRC metadata from ID tags, keyed by lowercase tag name
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LrcMetadata {
    tags: BTreeMap<String, String>,
}

impl LrcMetadata {
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }

    #[must_use]
    pub fn title(&self) -> Option<&str> {
        self.get("ti")
    }

    #[must_use]
    pub fn artist(&self) -> Option<&str> {
        self.get("ar")
    }

    #[must_use]
    pub fn album(&self) -> Option<&str> {
        self.get("al")
    }

    #[must_use]
    pub fn author(&self) -> Option<&str> {
        self.get("au")
    }

    /// The `[offset:...]` tag in milliseconds, if present and numeric.
    ///
    /// Informational only: onsets are never shifted by it.
    #[must_use]
    pub fn offset_ms(&self) -> Option<i64> {
        self.get("offset").and_then(|v| v.parse().ok())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    pub fn tags(&self) -> impl Iterator<Item = (&str, &str)> {
        self.tags.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    fn insert(&mut self, key: String, value: String) {
        self.tags.insert(key, value);
    }
}

/// Word-level timing for enhanced LRC format
#[derive(Debug, Clone, PartialEq)]
pub struct LyricWord {
    /// Onset in seconds
    pub time: f64,
    /// Exclusive end in seconds
    pub end_time: f64,
    pub text: String,
}

/// A single line of lyrics with timing
#[derive(Debug, Clone, PartialEq)]
pub struct LyricLine {
    /// Onset in seconds
    pub time: f64,
    /// Plain text, with word tags stripped for enhanced lines
    pub text: String,
    /// Word timings, empty for standard lines
    pub words: Vec<LyricWord>,
    pub is_enhanced: bool,
    /// Header block in effect when this line was read
    pub metadata: Arc<LrcMetadata>,
}

/// Parsed lyrics: lines sorted by onset plus the final metadata block
#[derive(Debug, Clone, Default)]
pub struct LyricsDocument {
    pub format: LrcFormat,
    pub metadata: LrcMetadata,
    pub lines: Vec<LyricLine>,
}

impl LyricsDocument {
    /// Parse LRC text in either dialect.
    ///
    /// Never fails: malformed lines are skipped and empty input yields an
    /// empty document.
    #[must_use]
    pub fn parse(input: &str) -> Self {
        if input.trim().is_empty() {
            return Self::default();
        }

        let format = detect_format(input);
        let mut metadata = Arc::new(LrcMetadata::default());
        let mut lines = Vec::new();

        for line in input.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            if let Some((key, value)) = parse_metadata_tag(line) {
                // Lines already read keep their own snapshot
                Arc::make_mut(&mut metadata).insert(key, value);
                continue;
            }

            if is_section_label(line) {
                continue;
            }

            match format {
                LrcFormat::Standard => lines.extend(parse_standard_line(line, &metadata)),
                LrcFormat::Enhanced => lines.extend(parse_enhanced_line(line, &metadata)),
            }
        }

        // Stable: equal onsets keep encounter order
        lines.sort_by(|a, b| a.time.total_cmp(&b.time));

        if format == LrcFormat::Enhanced {
            resolve_word_end_times(&mut lines);
        }

        Self {
            format,
            metadata: (*metadata).clone(),
            lines,
        }
    }

    #[must_use]
    pub fn is_enhanced(&self) -> bool {
        self.format == LrcFormat::Enhanced
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    /// Onset of the last line, or zero for an empty document
    #[must_use]
    pub fn duration(&self) -> f64 {
        self.lines.last().map_or(0.0, |line| line.time)
    }

    /// Index of the last line whose onset is at or before `time`
    #[must_use]
    pub fn active_line_index(&self, time: f64) -> Option<usize> {
        find_active_index(&self.lines, time, |line| line.time)
    }

    /// Serialize back to LRC text, keeping the document's dialect
    #[must_use]
    pub fn to_lrc(&self) -> String {
        let mut output = String::new();

        for (key, value) in self.metadata.tags() {
            let _ = writeln!(output, "[{key}:{value}]");
        }

        for line in &self.lines {
            let _ = write!(output, "[{}]", format_timestamp(line.time));
            if line.is_enhanced {
                let words = line
                    .words
                    .iter()
                    .map(|word| format!("<{}>{}", format_timestamp(word.time), word.text))
                    .collect::<Vec<_>>()
                    .join(" ");
                output.push_str(&words);
            } else {
                output.push_str(&line.text);
            }
            output.push('\n');
        }

        output
    }
}

/// Detect the dialect: enhanced if any `<mm:ss.xx>` token appears anywhere
#[must_use]
pub fn detect_format(input: &str) -> LrcFormat {
    let mut rest = input;
    while let Some(open) = rest.find('<') {
        let after = &rest[open + 1..];
        if let Some(close) = after.find('>') {
            if is_timestamp(&after[..close]) {
                return LrcFormat::Enhanced;
            }
        }
        rest = after;
    }
    LrcFormat::Standard
}

/// Parse a header tag like `[ti:Title]` or `[offset: 500]`
fn parse_metadata_tag(line: &str) -> Option<(String, String)> {
    let content = line.strip_prefix('[')?.strip_suffix(']')?;
    let (key, value) = content.split_once(':')?;
    let key = key.to_ascii_lowercase();

    if !METADATA_KEYS.contains(&key.as_str()) {
        return None;
    }

    Some((key, value.trim().to_string()))
}

/// Section markers like `[Chorus]` carry no digits and no timing
fn is_section_label(line: &str) -> bool {
    let Some(content) = line
        .strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
    else {
        return false;
    };

    !content.trim().is_empty()
        && !content
            .chars()
            .any(|c| c.is_ascii_digit() || c == '[' || c == ']')
}

/// Split a leading `open`timestamp`close` tag off `s`
fn take_tag(s: &str, open: char, close: char) -> Option<(f64, &str)> {
    let rest = s.strip_prefix(open)?;
    let end = rest.find(close)?;
    let inner = &rest[..end];

    if !is_timestamp(inner) {
        return None;
    }

    Some((parse_timestamp(inner), &rest[end + close.len_utf8()..]))
}

/// Parse `[00:12.34]Hello` or `[00:05.00][00:15.00]Same lyric`
fn parse_standard_line(line: &str, metadata: &Arc<LrcMetadata>) -> Vec<LyricLine> {
    let mut remaining = line;
    let mut timestamps = Vec::new();

    while let Some((time, rest)) = take_tag(remaining, '[', ']') {
        timestamps.push(time);
        remaining = rest;
    }

    let text = remaining.trim();
    if text.is_empty() {
        return Vec::new();
    }

    timestamps
        .into_iter()
        .map(|time| LyricLine {
            time,
            text: text.to_string(),
            words: Vec::new(),
            is_enhanced: false,
            metadata: Arc::clone(metadata),
        })
        .collect()
}

/// Parse `[00:01.00]<00:01.00>Hi <00:01.50>there`
fn parse_enhanced_line(line: &str, metadata: &Arc<LrcMetadata>) -> Option<LyricLine> {
    let (time, body) = take_tag(line, '[', ']')?;
    let mut words: Vec<LyricWord> = Vec::new();
    let mut remaining = body;

    while let Some(open) = remaining.find('<') {
        let candidate = &remaining[open..];
        let Some((word_time, after)) = take_tag(candidate, '<', '>') else {
            remaining = &candidate[1..];
            continue;
        };

        let word_end = after.find('<').unwrap_or(after.len());
        let text = after[..word_end].trim();

        if !text.is_empty() {
            if let Some(previous) = words.last_mut() {
                previous.end_time = word_time;
            }
            // Resolved after the whole document is read
            words.push(LyricWord {
                time: word_time,
                end_time: 0.0,
                text: text.to_string(),
            });
        }

        remaining = &after[word_end..];
    }

    if words.is_empty() {
        return None;
    }

    Some(LyricLine {
        time,
        text: strip_word_tags(body),
        words,
        is_enhanced: true,
        metadata: Arc::clone(metadata),
    })
}

/// Remove every `<mm:ss.xx>` token and normalise whitespace
fn strip_word_tags(body: &str) -> String {
    let mut plain = String::with_capacity(body.len());
    let mut remaining = body;

    while let Some(open) = remaining.find('<') {
        plain.push_str(&remaining[..open]);
        let candidate = &remaining[open..];
        if let Some((_, after)) = take_tag(candidate, '<', '>') {
            remaining = after;
        } else {
            plain.push('<');
            remaining = &candidate[1..];
        }
    }
    plain.push_str(remaining);

    plain.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Give every word a real end time once line onsets are known.
///
/// The last word of a line ends where the next line starts (or after the
/// trailing grace period on the final line); interior words whose end does
/// not exceed their onset end where the following word starts.
fn resolve_word_end_times(lines: &mut [LyricLine]) {
    let onsets: Vec<f64> = lines.iter().map(|line| line.time).collect();

    for (i, line) in lines.iter_mut().enumerate() {
        let Some(last) = line.words.last_mut() else {
            continue;
        };

        last.end_time = match onsets.get(i + 1) {
            Some(&next) if next > last.time => next,
            _ => last.time + TRAILING_GRACE_SECS,
        };

        let mut following = None;
        for word in line.words.iter_mut().rev() {
            if let Some(next) = following {
                if word.end_time <= word.time {
                    word.end_time = next;
                }
            }
            following = Some(word.time);
        }
    }
}
