//! Pure text transforms applied to collaborator responses.

/// Extract the interior of the first complete fenced block in `response`.
///
/// A block is an opening line starting with three backticks (language tag
/// optional) followed later by another fence line. When no complete block
/// exists, every non-fence line is kept, so a missing, unterminated, or stray
/// marker never drops content. The result is trimmed.
pub fn extract_fenced(response: &str) -> String {
    let lines: Vec<&str> = response.trim().lines().collect();
    let is_fence = |line: &&str| line.trim_start().starts_with("```");

    if let Some(open) = lines.iter().position(is_fence)
        && let Some(close_offset) = lines[open + 1..].iter().position(is_fence)
    {
        let interior = &lines[open + 1..open + 1 + close_offset];
        if interior.iter().any(|line| !line.trim().is_empty()) {
            return interior.join("\n").trim().to_string();
        }
    }

    lines
        .iter()
        .filter(|line| !is_fence(*line))
        .copied()
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

/// Clean a collaborator code response into file contents.
///
/// Returns `None` when nothing usable remains; otherwise the code ends with a
/// single trailing newline.
pub fn clean_code_response(response: &str) -> Option<String> {
    let code = extract_fenced(response);
    if code.is_empty() {
        return None;
    }
    Some(format!("{code}\n"))
}

/// Truncate `text` to at most `max_chars` characters, on a char boundary.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
