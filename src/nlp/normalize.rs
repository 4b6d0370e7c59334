//! Normalization (§4.4 step 2): Unicode NFKC, whitespace collapse, with a
//! char-offset map back to the original text so entity spans stay valid.

use unicode_normalization::UnicodeNormalization;

#[derive(Debug, Clone)]
pub struct NormalizedText {
    pub text: String,
    /// `offsets[i]` is the byte offset in the *original* text that produced
    /// the char at `text`'s char index `i`. Collapsed whitespace runs all
    /// map to the first original whitespace byte in the run.
    offsets: Vec<usize>,
}

impl NormalizedText {
    /// Maps a char index in the normalized text back to an original-text
    /// byte offset, for recording entity spans against the source document.
    pub fn original_offset(&self, normalized_char_index: usize) -> usize {
        self.offsets.get(normalized_char_index).copied().unwrap_or(self.offsets.last().copied().unwrap_or(0))
    }
}

/// NFKC-normalizes `text` and collapses whitespace runs to a single space,
/// tracking the original byte offset of each emitted character.
pub fn normalize(text: &str) -> NormalizedText {
    let nfkc: Vec<(usize, char)> = text.char_indices().flat_map(|(i, c)| c.nfkc().map(move |n| (i, n))).collect();

    let mut out = String::with_capacity(nfkc.len());
    let mut offsets = Vec::with_capacity(nfkc.len());
    let mut last_was_space = false;
    for (offset, ch) in nfkc {
        if ch.is_whitespace() {
            if last_was_space {
                continue;
            }
            out.push(' ');
            offsets.push(offset);
            last_was_space = true;
        } else {
            out.push(ch);
            offsets.push(offset);
            last_was_space = false;
        }
    }

    NormalizedText { text: out, offsets }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collapses_whitespace_runs() {
        let n = normalize("hello    world\n\tfoo");
        assert_eq!(n.text, "hello world foo");
    }

    #[test]
    fn nfkc_folds_compatibility_characters() {
        let n = normalize("\u{FB01}sh"); // ﬁsh ligature
        assert_eq!(n.text, "fish");
    }

    #[test]
    fn offsets_point_back_into_original_text() {
        let n = normalize("ab  cd");
        let idx = n.text.find('c').unwrap();
        let original_offset = n.original_offset(idx);
        assert_eq!(&"ab  cd"[original_offset..original_offset + 1], "c");
    }
}
