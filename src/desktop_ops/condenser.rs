//! Output condenser for the live view of supervised process output.
//!
//! The archival log always gets the raw chunk; this only shapes what lands in
//! the audit log and console. Rules, in order:
//! 1. a chunk containing an error keyword is returned untouched
//! 2. a chunk identical to the previous one becomes [`NO_NEW_OUTPUT`]
//! 3. a chunk made only of spinner / progress-bar lines becomes [`PROGRESS_MARKER`]
//! 4. otherwise the chunk is cut to the last `max_lines` lines, then to the
//!    last `max_bytes` bytes, with a marker saying so

pub const NO_NEW_OUTPUT: &str = "[no new output]";
pub const PROGRESS_MARKER: &str = "[progress output condensed]";

/// Substrings (lowercase) that exempt a chunk from condensing.
const ERROR_KEYWORDS: &[&str] = &[
    "error",
    "exception",
    "traceback",
    "failed",
    "failure",
    "fatal",
    "panic",
    "denied",
];

/// Characters that may appear on a progress line.
const PROGRESS_CHARS: &str = "|/-\\.*#=>[]%:() ⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏█▉▊▋▌▍▎▏░▒▓";

/// Characters that make a line look like progress rather than plain numbers.
const PROGRESS_SIGNALS: &str = "|/-\\#=>%⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏█░▒▓";

/// The condensed form of one chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Condensed {
    pub text: String,
    /// `true` when `text` differs from the raw chunk.
    pub condensed: bool,
}

/// Per-process condenser state.
#[derive(Debug, Clone)]
pub struct OutputCondenser {
    max_bytes: usize,
    max_lines: usize,
    last_chunk: Option<String>,
}

impl OutputCondenser {
    pub fn new(max_bytes: usize, max_lines: usize) -> Self {
        Self {
            max_bytes: max_bytes.max(1),
            max_lines: max_lines.max(1),
            last_chunk: None,
        }
    }

    pub fn condense(&mut self, chunk: &str) -> Condensed {
        let previous = self.last_chunk.replace(chunk.to_string());

        if contains_error_keyword(chunk) {
            return literal(chunk);
        }
        if previous.as_deref() == Some(chunk) {
            return marker(NO_NEW_OUTPUT);
        }
        if is_progress_only(chunk) {
            return marker(PROGRESS_MARKER);
        }
        self.truncate(chunk)
    }

    fn truncate(&self, chunk: &str) -> Condensed {
        let lines: Vec<&str> = chunk.lines().collect();
        let mut condensed = false;
        let mut text = if lines.len() > self.max_lines {
            condensed = true;
            let dropped = lines.len() - self.max_lines;
            format!(
                "[... {dropped} earlier lines truncated]\n{}",
                lines[dropped..].join("\n")
            )
        } else {
            chunk.to_string()
        };

        if text.len() > self.max_bytes {
            condensed = true;
            let mut start = text.len() - self.max_bytes;
            while !text.is_char_boundary(start) {
                start += 1;
            }
            text = format!(
                "[... truncated to last {} bytes]\n{}",
                self.max_bytes,
                &text[start..]
            );
        }
        Condensed { text, condensed }
    }
}

fn literal(chunk: &str) -> Condensed {
    Condensed {
        text: chunk.to_string(),
        condensed: false,
    }
}

fn marker(text: &str) -> Condensed {
    Condensed {
        text: text.to_string(),
        condensed: true,
    }
}

pub fn contains_error_keyword(chunk: &str) -> bool {
    let lower = chunk.to_lowercase();
    ERROR_KEYWORDS.iter().any(|k| lower.contains(k))
}

/// Every non-empty line (last carriage-return segment) is spinner-like.
fn is_progress_only(chunk: &str) -> bool {
    let mut saw_line = false;
    for line in chunk.lines() {
        let visible = line.rsplit('\r').next().unwrap_or(line).trim();
        if visible.is_empty() {
            continue;
        }
        saw_line = true;
        let only_progress = visible
            .chars()
            .all(|c| c.is_ascii_digit() || PROGRESS_CHARS.contains(c));
        let has_signal = visible.chars().any(|c| PROGRESS_SIGNALS.contains(c));
        if !(only_progress && has_signal) {
            return false;
        }
    }
    saw_line
}

// ─── Tests ───────────────────────────────────────────────────────────────────
