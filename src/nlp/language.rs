//! Language detection (§4.4 step 1): character-range signals plus stopword
//! frequency, never calling out to an external model.

use std::collections::HashMap;

use once_cell::sync::Lazy;

#[derive(Debug, Clone, PartialEq)]
pub struct LanguageGuess {
    pub code: String,
    pub confidence: f64,
}

fn stopwords(code: &str) -> &'static [&'static str] {
    match code {
        "en" => &["the", "and", "of", "to", "in", "is", "for", "on", "with", "was"],
        "ru" => &["и", "в", "не", "на", "что", "с", "по", "как", "он", "его"],
        "es" => &["el", "la", "de", "que", "y", "en", "un", "es", "se", "no"],
        "de" => &["der", "die", "und", "in", "den", "von", "zu", "das", "mit", "ist"],
        _ => &[],
    }
}

static CJK_RANGES: Lazy<Vec<(u32, u32)>> = Lazy::new(|| vec![(0x4E00, 0x9FFF), (0x3400, 0x4DBF)]);
static CYRILLIC_RANGE: (u32, u32) = (0x0400, 0x04FF);
static HANGUL_RANGE: (u32, u32) = (0xAC00, 0xD7A3);

fn in_range(c: char, range: (u32, u32)) -> bool {
    let cp = c as u32;
    cp >= range.0 && cp <= range.1
}

/// Detects the language of `text` from `supported` (the configured
/// enumeration). Falls back to `default_language` with low confidence when
/// no signal clears the threshold (§4.4 step 1).
pub fn detect(text: &str, supported: &[String], default_language: &str) -> LanguageGuess {
    let total_chars = text.chars().filter(|c| c.is_alphabetic()).count().max(1);
    let cjk = text.chars().filter(|c| CJK_RANGES.iter().any(|r| in_range(*c, *r))).count();
    let cyrillic = text.chars().filter(|c| in_range(*c, CYRILLIC_RANGE)).count();
    let hangul = text.chars().filter(|c| in_range(*c, HANGUL_RANGE)).count();

    if supported.iter().any(|s| s == "zh") && cjk as f64 / total_chars as f64 > 0.3 {
        return LanguageGuess { code: "zh".into(), confidence: 0.9 };
    }
    if supported.iter().any(|s| s == "ko") && hangul as f64 / total_chars as f64 > 0.3 {
        return LanguageGuess { code: "ko".into(), confidence: 0.9 };
    }
    if supported.iter().any(|s| s == "ru") && cyrillic as f64 / total_chars as f64 > 0.3 {
        return LanguageGuess { code: "ru".into(), confidence: 0.9 };
    }

    let lowered = text.to_lowercase();
    let words: Vec<&str> = lowered.split_whitespace().collect();
    let word_count = words.len().max(1);

    let mut scores: HashMap<&str, usize> = HashMap::new();
    for candidate in supported.iter().map(|s| s.as_str()) {
        let hits = stopwords(candidate);
        if hits.is_empty() {
            continue;
        }
        let count = words.iter().filter(|w| hits.contains(w)).count();
        scores.insert(candidate, count);
    }

    if let Some((best, count)) = scores.iter().max_by_key(|(_, c)| **c) {
        let ratio = *count as f64 / word_count as f64;
        if ratio > 0.03 {
            return LanguageGuess { code: best.to_string(), confidence: (0.5 + ratio * 5.0).min(0.95) };
        }
    }

    LanguageGuess { code: default_language.to_string(), confidence: 0.3 }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_english_from_stopword_frequency() {
        let supported = vec!["en".to_string(), "ru".to_string()];
        let guess = detect("the quick brown fox and the lazy dog in the park", &supported, "en");
        assert_eq!(guess.code, "en");
    }

    #[test]
    fn detects_russian_from_cyrillic_range() {
        let supported = vec!["en".to_string(), "ru".to_string()];
        let guess = detect("Привет как дела сегодня хорошо", &supported, "en");
        assert_eq!(guess.code, "ru");
    }

    #[test]
    fn unsupported_language_falls_back_to_default_with_low_confidence() {
        let supported = vec!["en".to_string()];
        let guess = detect("xyzzy plugh qux quux", &supported, "en");
        assert_eq!(guess.code, "en");
        assert!(guess.confidence <= 0.5);
    }
}
