//! Small text helpers shared by sessions, notifications, and reports.

/// Truncate to at most `max` characters on a char boundary.
pub fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => text[..idx].to_owned(),
        None => text.to_owned(),
    }
}

/// Split `text` into pieces of at most `max` characters, preferring line breaks.
pub fn split_chunks(text: &str, max: usize) -> Vec<String> {
    if max == 0 || text.chars().count() <= max {
        return vec![text.to_owned()];
    }

    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0usize;

    for line in text.split_inclusive('\n') {
        let line_len = line.chars().count();
        if current_len + line_len > max && !current.is_empty() {
            chunks.push(std::mem::take(&mut current));
            current_len = 0;
        }
        if line_len > max {
            let mut rest = line;
            while !rest.is_empty() {
                let piece = truncate_chars(rest, max);
                rest = &rest[piece.len()..];
                chunks.push(piece);
            }
            continue;
        }
        current.push_str(line);
        current_len += line_len;
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("abc", 10), "abc");
        assert_eq!(truncate_chars("", 3), "");
    }

    #[test]
    fn short_text_is_one_chunk() {
        assert_eq!(split_chunks("hi", 10), vec!["hi".to_owned()]);
    }

    #[test]
    fn chunks_break_on_lines_and_respect_limit() {
        let text = "aaaa\nbbbb\ncccc\n";
        let chunks = split_chunks(text, 10);
        assert_eq!(chunks, vec!["aaaa\nbbbb\n".to_owned(), "cccc\n".to_owned()]);
        assert_eq!(chunks.concat(), text);
    }

    #[test]
    fn overlong_line_is_hard_split() {
        let text = "x".repeat(25);
        let chunks = split_chunks(&text, 10);
        assert_eq!(chunks.len(), 3);
        assert!(chunks.iter().all(|c| c.chars().count() <= 10));
        assert_eq!(chunks.concat(), text);
    }
}
