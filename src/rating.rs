//! Extracción de la calificación (1–5) del texto generado por el LLM.
//!
//! Las reglas se prueban en orden de prioridad y gana la primera que
//! encuentre una señal. Si ninguna la encuentra se devuelve
//! [`DEFAULT_RATING`]: un texto sin calificación nunca bloquea la sesión.

use std::sync::LazyLock;

use regex::Regex;

pub const MIN_RATING: u8 = 1;
pub const MAX_RATING: u8 = 5;

/// Calificación cuando el texto no contiene ninguna señal reconocible.
pub const DEFAULT_RATING: u8 = 1;

/// "4 sao", "3/5 sao", "5 stars", "3,5 sao". La parte decimal se consume
/// para que "3,5" no se lea como "5".
static DIGIT_WORD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(\d+)(?:[.,]\d+)?\s*(?:/\s*5\s*)?(?:sao|stars?)\b").expect("regex válida")
});

/// Ítem numerado seguido de una racha de estrellas: "2. ⭐⭐⭐".
static GLYPH_RUN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^[ \t]*\d+[.)][^\n⭐★]{0,40}?((?:[⭐★]\x{FE0F}?)+)").expect("regex válida")
});

/// Estrategia de reconocimiento de una calificación.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternRule {
    DigitWord,
    GlyphRun,
}

impl PatternRule {
    /// Valor crudo encontrado por la regla, sin acotar.
    pub fn apply(&self, text: &str) -> Option<u64> {
        match self {
            // Las medias estrellas se truncan; un entero que desborda se satura.
            Self::DigitWord => DIGIT_WORD
                .captures(text)
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().parse().unwrap_or(u64::MAX)),
            Self::GlyphRun => GLYPH_RUN.captures(text).and_then(|c| c.get(1)).map(|m| {
                m.as_str().chars().filter(|ch| matches!(ch, '⭐' | '★')).count() as u64
            }),
        }
    }
}

/// Orden de prioridad de las reglas.
pub const RULES: [PatternRule; 2] = [PatternRule::DigitWord, PatternRule::GlyphRun];

/// Devuelve siempre una calificación en `[1, 5]`.
pub fn extract(feedback_text: &str) -> u8 {
    RULES
        .iter()
        .find_map(|rule| rule.apply(feedback_text))
        .map(clamp)
        .unwrap_or(DEFAULT_RATING)
}

fn clamp(value: u64) -> u8 {
    value.clamp(MIN_RATING as u64, MAX_RATING as u64) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn glyph_run_after_numbered_item() {
        assert_eq!(extract("1. Phù hợp\n2. ⭐⭐⭐\n3. Tốt"), 3);
    }

    #[test]
    fn digit_word_in_vietnamese_and_english() {
        assert_eq!(extract("2. Đánh giá: 4 sao"), 4);
        assert_eq!(extract("Rating: 2 stars overall"), 2);
        assert_eq!(extract("Điểm 3/5 sao"), 3);
    }

    #[test]
    fn digit_word_takes_priority_over_glyphs() {
        assert_eq!(extract("1. Phù hợp\n2. ⭐⭐\nTổng kết: 5 sao"), 5);
    }

    #[test]
    fn out_of_range_values_are_clamped() {
        assert_eq!(extract("9 sao"), 5);
        assert_eq!(extract("0 sao"), 1);
        assert_eq!(extract("2. ⭐⭐⭐⭐⭐⭐⭐"), 5);
    }

    #[test]
    fn glyphs_with_variation_selector_and_label() {
        assert_eq!(extract("1. Ổn\n2. Mức độ: ⭐\u{FE0F}⭐\u{FE0F}"), 2);
        assert_eq!(extract("1) ★★★★"), 4);
    }

    #[test]
    fn missing_signal_falls_back_to_default() {
        assert_eq!(extract(""), DEFAULT_RATING);
        assert_eq!(extract("Câu trả lời khá tốt, cần bổ sung."), DEFAULT_RATING);
        assert_eq!(extract("Có 12 bước cần nhớ"), DEFAULT_RATING);
        assert_eq!(extract("⭐⭐⭐ không có số thứ tự"), DEFAULT_RATING);
    }

    #[test]
    fn stars_in_unnumbered_line_are_ignored_but_later_item_counts() {
        assert_eq!(extract("⭐⭐ mở đầu\n2. ⭐⭐⭐⭐"), 4);
    }

    #[test]
    fn decimal_ratings_are_truncated() {
        assert_eq!(extract("2. Đánh giá: 3,5 sao"), 3);
        assert_eq!(extract("2. Đánh giá: 3.5 sao"), 3);
        assert_eq!(extract("2. Đánh giá: 2,5/5 sao"), 2);
        assert_eq!(extract("2.5/5 sao"), 2);
        assert_eq!(extract("0,5 stars"), MIN_RATING);
    }

    #[test]
    fn huge_numbers_saturate() {
        assert_eq!(extract("99999999999999999999 sao"), MAX_RATING);
        assert_eq!(extract("Điểm: 123456789012 stars"), MAX_RATING);
    }

    #[test]
    fn every_input_yields_a_rating_in_range() {
        let fragments = [
            "", " ", "\n", "sao", "stars", "/5", "5/", ",", ".", "⭐", "★", "\u{FE0F}",
            "1.", "2)", "99", "3,5", "0", "Đánh giá:", "⭐\u{FE0F}★", "x",
        ];
        let mut inputs: Vec<String> = Vec::new();
        for a in fragments {
            for b in fragments {
                inputs.push(format!("{a}{b}"));
                inputs.push(format!("{a} {b}\n{b}{a}"));
            }
        }
        inputs.push("9".repeat(500) + " sao");
        inputs.push("1. ".to_string() + &"⭐★".repeat(300));
        inputs.push("⭐".repeat(1000));
        inputs.push("1.".repeat(200) + "⭐");

        for input in &inputs {
            let r = extract(input);
            assert!((MIN_RATING..=MAX_RATING).contains(&r), "{input:?} -> {r}");
        }
    }
}
