//! Message splitting for chat delivery.
//!
//! Chat transports read badly when a wall of text arrives in one bubble,
//! so replies are split at a soft cap, preferring paragraph boundaries,
//! then sentence boundaries, with a hard fallback for pathological input.

/// Soft cap per chat message.
pub const CHUNK_MAX: usize = 800;

/// Split `text` into delivery chunks of at most [`CHUNK_MAX`] characters.
///
/// Paragraphs (`\n\n`) are packed greedily; an oversized paragraph is
/// split at sentence ends; a single oversized sentence is force-split at
/// the last space before the cap.
pub fn split_chunks(text: &str) -> Vec<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }
    if trimmed.chars().count() <= CHUNK_MAX {
        return vec![trimmed.to_string()];
    }

    let mut chunks: Vec<String> = Vec::new();
    let mut current = String::new();

    for paragraph in trimmed.split("\n\n") {
        let paragraph = paragraph.trim();
        if paragraph.is_empty() {
            continue;
        }
        let sep = if current.is_empty() { 0 } else { 2 };
        if !current.is_empty() && char_len(&current) + sep + char_len(paragraph) > CHUNK_MAX {
            chunks.push(std::mem::take(&mut current));
        }

        if char_len(paragraph) <= CHUNK_MAX {
            if !current.is_empty() {
                current.push_str("\n\n");
            }
            current.push_str(paragraph);
            continue;
        }

        // Paragraph alone exceeds the cap: flush and split by sentence.
        if !current.is_empty() {
            chunks.push(std::mem::take(&mut current));
        }
        for sentence in split_sentences(paragraph) {
            let sep = if current.is_empty() { 0 } else { 1 };
            if !current.is_empty() && char_len(&current) + sep + char_len(&sentence) > CHUNK_MAX {
                chunks.push(std::mem::take(&mut current));
            }
            if char_len(&sentence) <= CHUNK_MAX {
                if !current.is_empty() {
                    current.push(' ');
                }
                current.push_str(&sentence);
            } else {
                if !current.is_empty() {
                    chunks.push(std::mem::take(&mut current));
                }
                chunks.extend(force_split(&sentence));
            }
        }
    }

    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Split a paragraph at sentence-ending punctuation followed by a space.
fn split_sentences(paragraph: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();
    let mut chars = paragraph.chars().peekable();

    while let Some(c) = chars.next() {
        current.push(c);
        if matches!(c, '.' | '!' | '?') && chars.peek().is_some_and(|next| *next == ' ') {
            chars.next();
            sentences.push(std::mem::take(&mut current));
        }
    }
    if !current.trim().is_empty() {
        sentences.push(current.trim_end().to_string());
    }
    sentences
}

/// Last-resort split at the last space before the cap, or mid-word when
/// there is none.
fn force_split(text: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut remaining: Vec<char> = text.chars().collect();

    while remaining.len() > CHUNK_MAX {
        let window: String = remaining[..CHUNK_MAX].iter().collect();
        let split_at = window.rfind(' ').map(|byte_idx| window[..byte_idx].chars().count());
        let cut = split_at.unwrap_or(CHUNK_MAX);
        let head: String = remaining[..cut].iter().collect();
        parts.push(head.trim_end().to_string());
        remaining.drain(..cut);
        while remaining.first() == Some(&' ') {
            remaining.remove(0);
        }
    }
    if !remaining.is_empty() {
        parts.push(remaining.into_iter().collect());
    }
    parts
}
