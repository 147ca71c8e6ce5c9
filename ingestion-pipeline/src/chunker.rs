//! Sentence-aware chunking over Unicode code points.

pub const DEFAULT_CHUNK_SIZE: usize = 500;

/// Code points searched on either side of the ideal cut.
const BOUNDARY_WINDOW: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunker {
    size: usize,
    overlap: usize,
}

impl Default for Chunker {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_SIZE as i64, 50)
    }
}

impl Chunker {
    /// A non-positive `size` falls back to the default. `overlap` is clamped to zero when
    /// negative and to a tenth of `size` when it is not smaller than `size`.
    pub fn new(size: i64, overlap: i64) -> Self {
        let size = usize::try_from(size)
            .ok()
            .filter(|size| *size > 0)
            .unwrap_or(DEFAULT_CHUNK_SIZE);
        let mut overlap = usize::try_from(overlap).unwrap_or(0);
        if overlap >= size {
            overlap = size / 10;
        }
        Self { size, overlap }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn overlap(&self) -> usize {
        self.overlap
    }

    pub fn chunk(&self, text: &str) -> Vec<String> {
        if text.trim().is_empty() {
            return Vec::new();
        }

        let chars: Vec<char> = text.chars().collect();
        let len = chars.len();
        if len <= self.size {
            return vec![text.trim().to_string()];
        }

        let mut chunks = Vec::new();
        let mut start = 0;
        while start < len {
            let mut end = start.saturating_add(self.size).min(len);
            if end < len {
                end = find_sentence_boundary(&chars, start, end);
            }

            let piece: String = chars.get(start..end).unwrap_or_default().iter().collect();
            let trimmed = piece.trim();
            if !trimmed.is_empty() {
                chunks.push(trimmed.to_string());
            }

            if end >= len {
                break;
            }
            let next = end.saturating_sub(self.overlap);
            start = if next <= start { end } else { next };
        }

        chunks
    }
}

/// Looks for a terminator after `ideal_end` first, then before it. Returns the cut position
/// just past the terminator, or `ideal_end` for a hard cut.
fn find_sentence_boundary(chars: &[char], start: usize, ideal_end: usize) -> usize {
    let search_start = ideal_end.saturating_sub(BOUNDARY_WINDOW).max(start);
    let search_end = ideal_end.saturating_add(BOUNDARY_WINDOW).min(chars.len());

    if let Some(pos) = (ideal_end..search_end).find(|&i| is_sentence_end(chars, i)) {
        return pos + 1;
    }
    if let Some(pos) = (search_start..ideal_end)
        .rev()
        .find(|&i| is_sentence_end(chars, i))
    {
        return pos + 1;
    }
    ideal_end
}

fn is_sentence_end(chars: &[char], pos: usize) -> bool {
    let Some(&current) = chars.get(pos) else {
        return false;
    };
    let next = chars.get(pos + 1).copied();

    match current {
        '。' | '！' | '？' => true,
        '.' | '!' | '?' => matches!(next, Some(' ' | '\n')),
        '\n' => next == Some('\n'),
        _ => false,
    }
}
