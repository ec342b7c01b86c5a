//! Paragraph- and sentence-aware splitting of knowledge documents.

pub const DEFAULT_CHUNK_SIZE: usize = 500;
pub const DEFAULT_OVERLAP: usize = 50;
/// Chunks shorter than this are folded into the previous one.
const MIN_CHUNK_CHARS: usize = 50;

const SENTENCE_ENDS: &[char] = &['.', '!', '?', '。', '！', '？', '\n'];

/// Split `text` into chunks of at most roughly `chunk_size` characters.
///
/// Paragraphs (separated by blank lines) that fit become chunks on their own.
/// Longer paragraphs are packed sentence by sentence, and each new chunk
/// starts with the last `overlap` characters of the previous one.
pub fn chunk_text(text: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    if text.trim().is_empty() {
        return Vec::new();
    }

    let mut chunks = Vec::new();
    for paragraph in paragraphs(text) {
        if char_len(&paragraph) <= chunk_size {
            chunks.push(paragraph);
            continue;
        }

        let mut current = String::new();
        for sentence in sentences(&paragraph) {
            let current_len = char_len(&current);
            if current_len + char_len(&sentence) + 1 > chunk_size && current_len > 0 {
                chunks.push(current.trim().to_string());
                current = format!("{} {}", tail_chars(&current, overlap), sentence);
            } else if current.is_empty() {
                current = sentence;
            } else {
                current.push(' ');
                current.push_str(&sentence);
            }
        }
        if !current.trim().is_empty() {
            chunks.push(current.trim().to_string());
        }
    }

    merge_short(chunks, chunk_size)
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

fn tail_chars(text: &str, count: usize) -> &str {
    let total = char_len(text);
    if total <= count {
        return text;
    }
    match text.char_indices().nth(total - count) {
        Some((index, _)) => &text[index..],
        None => text,
    }
}

/// Blank-line separated blocks, trimmed, empties dropped.
fn paragraphs(text: &str) -> Vec<String> {
    let mut blocks = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    for line in text.split('\n') {
        if line.trim().is_empty() {
            if !current.is_empty() {
                blocks.push(current.join("\n"));
                current.clear();
            }
        } else {
            current.push(line);
        }
    }
    if !current.is_empty() {
        blocks.push(current.join("\n"));
    }
    blocks
        .into_iter()
        .map(|block| block.trim().to_string())
        .filter(|block| !block.is_empty())
        .collect()
}

/// Cut after each sentence terminator, dropping the whitespace that follows.
fn sentences(paragraph: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut chars = paragraph.chars().peekable();
    while let Some(ch) = chars.next() {
        current.push(ch);
        if SENTENCE_ENDS.contains(&ch) {
            while chars.peek().is_some_and(|next| next.is_whitespace()) {
                chars.next();
            }
            out.push(std::mem::take(&mut current));
        }
    }
    out.push(current);
    out.into_iter()
        .filter(|sentence| !sentence.trim().is_empty())
        .collect()
}

fn merge_short(chunks: Vec<String>, chunk_size: usize) -> Vec<String> {
    let mut merged: Vec<String> = Vec::with_capacity(chunks.len());
    for chunk in chunks {
        match merged.last_mut() {
            Some(last)
                if char_len(&chunk) < MIN_CHUNK_CHARS
                    && char_len(last) + char_len(&chunk) < chunk_size =>
            {
                last.push('\n');
                last.push_str(&chunk);
            }
            _ => merged.push(chunk),
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_text_has_no_chunks() {
        assert!(chunk_text("  \n\n ", DEFAULT_CHUNK_SIZE, DEFAULT_OVERLAP).is_empty());
    }

    #[test]
    fn short_paragraphs_are_merged() {
        let text = "First paragraph that is comfortably longer than fifty characters.\n\nTiny.\n\n   \n\nAnother paragraph that also runs past the fifty character mark.";
        let chunks = chunk_text(text, DEFAULT_CHUNK_SIZE, DEFAULT_OVERLAP);
        assert_eq!(chunks.len(), 2);
        assert!(chunks[0].ends_with("characters.\nTiny."));
        assert!(chunks[1].starts_with("Another paragraph"));
    }

    #[test]
    fn long_paragraph_packs_sentences_with_overlap() {
        let sentence = "This sentence is exactly forty chars ok.";
        assert_eq!(sentence.chars().count(), 40);
        let paragraph = vec![sentence; 6].join(" ");

        let chunks = chunk_text(&paragraph, 100, 10);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0], format!("{sentence} {sentence}"));
        // The next chunk repeats the tail of the previous one.
        assert!(chunks[1].starts_with("chars ok. This sentence"));
        for chunk in &chunks {
            assert!(chunk.chars().count() <= 100);
        }
    }

    #[test]
    fn sentence_split_handles_cjk_terminators() {
        let parts = sentences("첫 문장입니다。두 번째！  세 번째？남은 글");
        assert_eq!(parts, vec!["첫 문장입니다。", "두 번째！", "세 번째？", "남은 글"]);
    }

    #[test]
    fn overlap_is_measured_in_chars() {
        assert_eq!(tail_chars("가나다라마", 2), "라마");
        assert_eq!(tail_chars("ab", 5), "ab");
    }
}
