//! Paragraph-boundary text chunker for imported repair guides.
//!
//! Splits on blank lines and packs paragraphs into pieces of at most
//! `max_chars` characters. A paragraph longer than that is cut at the last
//! sentence end, newline or space before the limit. Lengths are counted in
//! `char`s, so multi-byte text never splits inside a character.

/// Default piece size for guide text.
pub const DEFAULT_CHUNK_CHARS: usize = 1200;

/// Split `text` into trimmed, non-empty pieces in document order.
pub fn chunk_text(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let mut chunks = Vec::new();
    let mut buf = String::new();
    let mut buf_chars = 0usize;

    for para in text.split("\n\n").map(str::trim).filter(|p| !p.is_empty()) {
        let para_chars = para.chars().count();

        let would_be = if buf.is_empty() {
            para_chars
        } else {
            buf_chars + 2 + para_chars
        };
        if would_be > max_chars && !buf.is_empty() {
            chunks.push(std::mem::take(&mut buf));
            buf_chars = 0;
        }

        if para_chars > max_chars {
            chunks.extend(split_long(para, max_chars));
            continue;
        }
        if !buf.is_empty() {
            buf.push_str("\n\n");
            buf_chars += 2;
        }
        buf.push_str(para);
        buf_chars += para_chars;
    }

    if !buf.is_empty() {
        chunks.push(buf);
    }
    chunks
}

fn split_long(para: &str, max_chars: usize) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut remaining = para;
    while !remaining.is_empty() {
        let limit = remaining
            .char_indices()
            .nth(max_chars)
            .map(|(i, _)| i)
            .unwrap_or(remaining.len());
        let cut = if limit < remaining.len() {
            let window = &remaining[..limit];
            window
                .rfind(". ")
                .map(|i| i + 1)
                .or_else(|| window.rfind('\n'))
                .or_else(|| window.rfind(' '))
                .filter(|&i| i > 0)
                .unwrap_or(limit)
        } else {
            limit
        };
        let piece = remaining[..cut].trim();
        if !piece.is_empty() {
            pieces.push(piece.to_string());
        }
        remaining = remaining[cut..].trim_start();
    }
    pieces
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_text_single_chunk() {
        assert_eq!(chunk_text("Check the door gasket.", 100), vec!["Check the door gasket."]);
    }

    #[test]
    fn test_empty_text_has_no_chunks() {
        assert!(chunk_text("", 100).is_empty());
        assert!(chunk_text("\n\n  \n\n", 100).is_empty());
    }

    #[test]
    fn test_paragraphs_pack_until_limit() {
        let text = "Unplug the fridge.\n\nRemove the back panel.\n\nTest the fan motor.";
        let chunks = chunk_text(text, 45);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0], "Unplug the fridge.\n\nRemove the back panel.");
        assert_eq!(chunks[1], "Test the fan motor.");
    }

    #[test]
    fn test_long_paragraph_splits_at_sentence() {
        let text = "The drain pump can clog with debris. Clear the filter first. Then test the pump.";
        let chunks = chunk_text(text, 40);
        assert!(chunks.len() > 1);
        assert_eq!(chunks[0], "The drain pump can clog with debris.");
        for c in &chunks {
            assert!(c.chars().count() <= 40);
        }
    }

    #[test]
    fn test_multibyte_text_is_safe() {
        let text = "é".repeat(50);
        let chunks = chunk_text(&text, 16);
        assert_eq!(chunks.concat(), text);
    }
}
