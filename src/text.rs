//! Text cleaning and chunking.
//!
//! Pure string transformation between the document source and the store:
//! [`clean`] normalizes whitespace, [`split`] breaks cleaned text into
//! bounded chunks on paragraph boundaries, falling back to sentences and
//! finally to hard splits, with a configurable tail overlap between
//! adjacent chunks so context is not lost at the seams.

/// Collapse whitespace runs and strip control characters.
pub fn clean(text: &str) -> String {
    let stripped: String = text
        .chars()
        .filter(|c| !c.is_control() || *c == '\n')
        .collect();

    // Collapse horizontal whitespace but preserve paragraph breaks.
    stripped
        .split("\n\n")
        .map(|para| {
            para.split_whitespace()
                .collect::<Vec<_>>()
                .join(" ")
        })
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Split text into chunks of at most `max_chars`, preferring paragraph
/// boundaries, then sentence boundaries, then hard splits. Each chunk after
/// the first is prefixed with the tail of its predecessor (`overlap_chars`).
pub fn split(text: &str, max_chars: usize, overlap_chars: usize) -> Vec<String> {
    if text.is_empty() {
        return Vec::new();
    }

    let mut chunks: Vec<String> = Vec::new();
    let mut current = String::new();

    for para in text.split("\n\n") {
        let para = para.trim();
        if para.is_empty() {
            continue;
        }

        if para.chars().count() > max_chars {
            if !current.is_empty() {
                chunks.push(std::mem::take(&mut current));
            }
            chunks.extend(split_long_paragraph(para, max_chars));
            continue;
        }

        let would_be = if current.is_empty() {
            para.chars().count()
        } else {
            current.chars().count() + 2 + para.chars().count()
        };

        if would_be > max_chars && !current.is_empty() {
            chunks.push(std::mem::take(&mut current));
        }
        if current.is_empty() {
            current = para.to_string();
        } else {
            current.push_str("\n\n");
            current.push_str(para);
        }
    }

    if !current.is_empty() {
        chunks.push(current);
    }

    add_overlap(chunks, overlap_chars)
}

fn split_long_paragraph(para: &str, max_chars: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();

    for sentence in split_sentences(para) {
        let sentence_len = sentence.chars().count();

        if current.chars().count() + sentence_len + 1 > max_chars && !current.is_empty() {
            chunks.push(std::mem::take(&mut current));
        }

        if sentence_len > max_chars {
            chunks.extend(hard_split(&sentence, max_chars));
        } else {
            if !current.is_empty() {
                current.push(' ');
            }
            current.push_str(&sentence);
        }
    }

    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// Split on sentence-ending punctuation, keeping the punctuation attached.
fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();

    for c in text.chars() {
        current.push(c);
        if matches!(c, '.' | '!' | '?') {
            let trimmed = current.trim();
            if !trimmed.is_empty() {
                sentences.push(trimmed.to_string());
            }
            current.clear();
        }
    }

    let trimmed = current.trim();
    if !trimmed.is_empty() {
        sentences.push(trimmed.to_string());
    }
    sentences
}

fn hard_split(text: &str, max_chars: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(max_chars)
        .map(|c| c.iter().collect::<String>().trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn add_overlap(chunks: Vec<String>, overlap_chars: usize) -> Vec<String> {
    if overlap_chars == 0 || chunks.len() < 2 {
        return chunks;
    }

    let mut out = Vec::with_capacity(chunks.len());
    for (i, chunk) in chunks.iter().enumerate() {
        if i == 0 {
            out.push(chunk.clone());
            continue;
        }
        let prev: Vec<char> = chunks[i - 1].chars().collect();
        let tail_start = prev.len().saturating_sub(overlap_chars);
        let tail: String = prev[tail_start..].iter().collect();
        out.push(format!("{} {}", tail.trim(), chunk));
    }
    out
}
