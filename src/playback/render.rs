//! Now-playing status rendering.

/// Number of segments in the progress bar.
pub const BAR_SEGMENTS: u64 = 10;

const FILLED: &str = "▬";
const CURSOR: &str = "🔘";
const EMPTY: &str = "▭";

/// Filled segment count: `floor(elapsed / duration * 10)` clamped to `[0, 10]`.
pub fn progress_segments(elapsed_secs: u64, duration_secs: u64) -> u64 {
    if duration_secs == 0 {
        return BAR_SEGMENTS;
    }
    (elapsed_secs.saturating_mul(BAR_SEGMENTS) / duration_secs).min(BAR_SEGMENTS)
}

pub fn render_bar(elapsed_secs: u64, duration_secs: u64) -> String {
    let filled = progress_segments(elapsed_secs, duration_secs) as usize;
    let empty = BAR_SEGMENTS as usize - filled;
    format!("{}{CURSOR}{}", FILLED.repeat(filled), EMPTY.repeat(empty))
}

/// `MM:SS`, zero-padded.
pub fn format_clock(secs: u64) -> String {
    format!("{:02}:{:02}", secs / 60, secs % 60)
}

/// The editable status message.
pub fn render_status(query: &str, elapsed_secs: u64, duration_secs: u64) -> String {
    format!(
        "🎵 *{query}*\n⏳ {} {} {}",
        format_clock(elapsed_secs),
        render_bar(elapsed_secs, duration_secs),
        format_clock(duration_secs)
    )
}

pub fn render_finished(query: &str) -> String {
    format!("✅ Finished playing: {query}")
}
