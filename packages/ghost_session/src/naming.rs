use std::sync::atomic::{AtomicU64, Ordering};

/// Longest sanitized title kept, in characters.
const MAX_TITLE_CHARS: usize = 100;

/// Title used when the page sends nothing usable.
const FALLBACK_TITLE: &str = "untitled";

const REPLACEMENT: char = '!';

/// Turn a page title into something safe to use as a file name.
///
/// Path separators, characters reserved on Windows and control characters
/// become `!` (runs collapse to one), leading dots are dropped so the result
/// can never be `.`/`..` or a hidden file.
pub fn sanitize_title(title: &str) -> String {
    let mut out = String::with_capacity(title.len());
    for c in title.trim().chars() {
        let c = if c.is_control() || matches!(c, '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*') {
            REPLACEMENT
        } else {
            c
        };
        if c == REPLACEMENT && out.ends_with(REPLACEMENT) {
            continue;
        }
        out.push(c);
    }

    let trimmed = out.trim_start_matches(|c: char| c == '.' || c.is_whitespace()).trim_end();
    let truncated: String = trimmed.chars().take(MAX_TITLE_CHARS).collect();
    let truncated = truncated.trim_end();

    if truncated.is_empty() || truncated.chars().all(|c| c == REPLACEMENT) {
        FALLBACK_TITLE.to_string()
    } else {
        truncated.to_string()
    }
}

/// Hands out buffer titles that never collide within this process.
///
/// The time stamp keeps names readable when several fields from one page are
/// open; the counter makes two sessions opened in the same second distinct.
#[derive(Debug, Default)]
pub struct BufferNamer {
    next: AtomicU64,
}

impl BufferNamer {
    pub fn new() -> Self {
        Self::default()
    }

    /// `HH-MM-SS-<n>/<sanitized title>`
    pub fn next_title(&self, title: &str) -> String {
        let n = self.next.fetch_add(1, Ordering::Relaxed) + 1;
        let stamp = chrono::Local::now().format("%H-%M-%S");
        format!("{stamp}-{n}/{}", sanitize_title(title))
    }
}
