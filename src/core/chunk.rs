//! Aligned text chunks.
//!
//! A [`Chunk`] is a piece of (possibly normalized) text in which every byte
//! remembers the byte range of the caller's original input it was produced
//! from. Normalizers rewrite chunks in place, pre-tokenizers slice them, and
//! the segmentation engine maps piece boundaries back through the alignments
//! to report offsets against the untouched input.
//!
//! Alignments are stored per byte and always cover whole original characters,
//! so any range reported by [`Chunk::original_range`] starts and ends on a
//! UTF-8 boundary of the original text.

use unicode_normalization::char::canonical_combining_class;

/// Normalized text plus a per-byte alignment to the original input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    text: String,
    alignments: Vec<(usize, usize)>,
}

impl Chunk {
    /// Wrap a slice of the original input that starts at byte `base`.
    pub fn from_original(text: &str, base: usize) -> Self {
        let mut alignments = Vec::with_capacity(text.len());
        for (start, ch) in text.char_indices() {
            let range = (base + start, base + start + ch.len_utf8());
            alignments.extend(std::iter::repeat(range).take(ch.len_utf8()));
        }
        Self {
            text: text.to_string(),
            alignments,
        }
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.text
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.text.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    /// Original byte range covered by the whole chunk.
    pub fn offsets(&self) -> (usize, usize) {
        match (self.alignments.first(), self.alignments.last()) {
            (Some(first), Some(last)) => (first.0, last.1),
            _ => (0, 0),
        }
    }

    /// Map a byte range of the chunk text back to the original input.
    ///
    /// `start..end` must lie on character boundaries of the chunk text.
    pub fn original_range(&self, start: usize, end: usize) -> (usize, usize) {
        debug_assert!(start <= end && end <= self.text.len());
        if start == end {
            let at = self
                .alignments
                .get(start)
                .map(|a| a.0)
                .or_else(|| self.alignments.last().map(|a| a.1))
                .unwrap_or(0);
            return (at, at);
        }
        (self.alignments[start].0, self.alignments[end - 1].1)
    }

    /// Sub-chunk for the byte range `start..end` of the chunk text.
    pub fn slice(&self, start: usize, end: usize) -> Chunk {
        Chunk {
            text: self.text[start..end].to_string(),
            alignments: self.alignments[start..end].to_vec(),
        }
    }

    /// Replace every character with the output of `f`.
    ///
    /// Each produced byte inherits the alignment of the source character; an
    /// empty output removes the character.
    pub fn map_chars<F>(&mut self, mut f: F)
    where
        F: FnMut(char, &mut String),
    {
        let mut text = String::with_capacity(self.text.len());
        let mut alignments = Vec::with_capacity(self.alignments.len());
        let mut scratch = String::new();

        for (start, ch) in self.text.char_indices() {
            let range = self.span(start, start + ch.len_utf8());
            scratch.clear();
            f(ch, &mut scratch);
            text.push_str(&scratch);
            alignments.extend(std::iter::repeat(range).take(scratch.len()));
        }

        self.text = text;
        self.alignments = alignments;
    }

    /// Rewrite the text one combining cluster at a time.
    ///
    /// A cluster is a starter character followed by its combining marks
    /// (canonical combining class != 0). Canonical reordering never crosses a
    /// cluster boundary, so normalizing cluster by cluster keeps alignments
    /// exact at cluster granularity. Conjoining Hangul jamo are the one
    /// composition that spans clusters; they stay as written.
    pub fn map_clusters<F>(&mut self, mut f: F)
    where
        F: FnMut(&str, &mut String),
    {
        let mut text = String::with_capacity(self.text.len());
        let mut alignments = Vec::with_capacity(self.alignments.len());
        let mut scratch = String::new();

        let mut cluster_start = 0;
        let mut iter = self.text.char_indices().peekable();
        while iter.next().is_some() {
            let boundary = match iter.peek() {
                Some(&(_, next)) => canonical_combining_class(next) == 0,
                None => true,
            };
            if !boundary {
                continue;
            }
            let cluster_end = iter.peek().map(|&(i, _)| i).unwrap_or(self.text.len());
            let range = self.span(cluster_start, cluster_end);
            scratch.clear();
            f(&self.text[cluster_start..cluster_end], &mut scratch);
            text.push_str(&scratch);
            alignments.extend(std::iter::repeat(range).take(scratch.len()));
            cluster_start = cluster_end;
        }

        self.text = text;
        self.alignments = alignments;
    }

    /// Replace every byte with one character, keeping the byte's alignment.
    pub fn map_bytes<F>(&mut self, mut f: F)
    where
        F: FnMut(u8) -> char,
    {
        let mut text = String::with_capacity(self.text.len() * 2);
        let mut alignments = Vec::with_capacity(self.alignments.len() * 2);
        for (i, &b) in self.text.as_bytes().iter().enumerate() {
            let ch = f(b);
            text.push(ch);
            alignments.extend(std::iter::repeat(self.alignments[i]).take(ch.len_utf8()));
        }
        self.text = text;
        self.alignments = alignments;
    }

    /// Replace every occurrence of `pattern` with `content`.
    ///
    /// The replacement aligns to the whole span it replaces.
    pub fn replace(&mut self, pattern: &str, content: &str) {
        if pattern.is_empty() || !self.text.contains(pattern) {
            return;
        }
        let mut text = String::with_capacity(self.text.len());
        let mut alignments = Vec::with_capacity(self.alignments.len());
        let mut last = 0;
        for (at, matched) in self.text.match_indices(pattern) {
            text.push_str(&self.text[last..at]);
            alignments.extend_from_slice(&self.alignments[last..at]);
            let range = self.span(at, at + matched.len());
            text.push_str(content);
            alignments.extend(std::iter::repeat(range).take(content.len()));
            last = at + matched.len();
        }
        text.push_str(&self.text[last..]);
        alignments.extend_from_slice(&self.alignments[last..]);
        self.text = text;
        self.alignments = alignments;
    }

    /// Insert `prefix` in front of the text.
    ///
    /// The inserted bytes align to the empty range at the chunk start.
    pub fn prepend(&mut self, prefix: &str) {
        let at = self.offsets().0;
        let mut alignments = vec![(at, at); prefix.len()];
        alignments.append(&mut self.alignments);
        self.text.insert_str(0, prefix);
        self.alignments = alignments;
    }

    /// Original range spanned by the chunk bytes `start..end`.
    fn span(&self, start: usize, end: usize) -> (usize, usize) {
        (self.alignments[start].0, self.alignments[end - 1].1)
    }
}
