//! Timestamp conversion utilities.
//!
//! Lyric onsets are plain `f64` seconds. These helpers convert between that
//! representation and the `mm:ss.xx` text used inside `[...]` and `<...>` tags.

/// Check whether `s` has the shape of a lyric timestamp: two or more minute
/// digits, a colon, two second digits, a dot and two or three fraction digits.
#[must_use]
pub fn is_timestamp(s: &str) -> bool {
    let Some((minutes, rest)) = s.split_once(':') else {
        return false;
    };
    let Some((seconds, fraction)) = rest.split_once('.') else {
        return false;
    };

    minutes.len() >= 2
        && minutes.bytes().all(|b| b.is_ascii_digit())
        && seconds.len() == 2
        && seconds.bytes().all(|b| b.is_ascii_digit())
        && (2..=3).contains(&fraction.len())
        && fraction.bytes().all(|b| b.is_ascii_digit())
}

/// Convert `mm:ss.fraction` to seconds.
///
/// Unparseable parts count as zero, so `"xx:12.50"` yields `12.5` and
/// garbage yields `0.0`.
#[must_use]
pub fn parse_timestamp(s: &str) -> f64 {
    let (minutes, seconds) = s.trim().split_once(':').unwrap_or(("", s));
    let minutes = minutes.parse::<u32>().map_or(0.0, f64::from);
    let seconds = seconds.parse::<f64>().unwrap_or(0.0);
    minutes * 60.0 + seconds
}

/// Format seconds as `mm:ss.xx`, rounding to the nearest hundredth.
///
/// Negative and non-finite inputs format as `00:00.00`.
#[must_use]
pub fn format_timestamp(seconds: f64) -> String {
    let hundredths = to_hundredths(seconds);
    let minutes = hundredths / 6000;
    let secs = (hundredths / 100) % 60;
    let fraction = hundredths % 100;

    format!("{minutes:02}:{secs:02}.{fraction:02}")
}

// Lyric timestamps are far below u64::MAX hundredths
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn to_hundredths(seconds: f64) -> u64 {
    if seconds.is_finite() && seconds > 0.0 {
        (seconds * 100.0).round() as u64
    } else {
        0
    }
}
