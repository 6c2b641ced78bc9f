/// Default number of characters shown in a conversation list row.
pub const DEFAULT_PREVIEW_LENGTH: usize = 50;

/// Shortest preview that still fits a character of text before the ellipsis.
pub const MIN_PREVIEW_LENGTH: usize = 4;

/// Shorten message text to a single-line preview for the conversation list.
///
/// Uses the first line with visible text; `max_chars` below
/// [`MIN_PREVIEW_LENGTH`] is raised to it.
pub fn preview_text(text: &str, max_chars: usize) -> String {
    let max_chars = max_chars.max(MIN_PREVIEW_LENGTH);
    let first_line = text
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or("");
    if first_line.chars().count() > max_chars {
        let keep = max_chars.saturating_sub(3);
        let boundary = first_line
            .char_indices()
            .nth(keep)
            .map(|(i, _)| i)
            .unwrap_or(first_line.len());
        format!("{}...", &first_line[..boundary])
    } else {
        first_line.to_string()
    }
}

/// Trimmed, non-empty input or `None`.
pub fn non_blank(input: &str) -> Option<&str> {
    let trimmed = input.trim();
    (!trimmed.is_empty()).then_some(trimmed)
}
