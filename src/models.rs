//! Modelos de dominio: categorías, unidades de texto (escenarios) y corpus.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use anyhow::anyhow;
use regex::Regex;
use serde::Serialize;

use crate::error::{EngineError, EngineResult};

/// Marcadores que abren la sección de "respuesta esperada" de un escenario.
/// Todo lo que sigue al primer marcador nunca se muestra al usuario.
static EXPECTED_ANSWER_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(cần thực hiện|đáp án|gợi ý trả lời|expected answer)\s*:")
        .expect("regex de marcador válida")
});

/// Indica si el texto ya contiene una sección de respuesta esperada.
pub(crate) fn has_expected_answer(text: &str) -> bool {
    EXPECTED_ANSWER_MARKER.is_match(text)
}

/// Categoría de un escenario. Determina el formato de presentación y el
/// cubo de alternancia de la sesión.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Emergency,
    Communication,
    Generic,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Emergency => "emergency",
            Self::Communication => "communication",
            Self::Generic => "generic",
        }
    }

    fn banner(&self) -> &'static str {
        match self {
            Self::Emergency => "🚑 TÌNH HUỐNG CẤP CỨU",
            Self::Communication => "💬 TÌNH HUỐNG GIAO TIẾP",
            Self::Generic => "📋 TÌNH HUỐNG",
        }
    }

    fn question(&self) -> &'static str {
        match self {
            Self::Emergency => "👉 Bạn sẽ xử trí tình huống này như thế nào?",
            Self::Communication => "👉 Bạn sẽ nói gì với người bệnh/người nhà?",
            Self::Generic => "👉 Câu trả lời của bạn là gì?",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "emergency" | "cap_cuu" | "cấp cứu" => Ok(Self::Emergency),
            "communication" | "giao_tiep" | "giao tiếp" => Ok(Self::Communication),
            "generic" => Ok(Self::Generic),
            other => Err(anyhow!("Categoría de escenario no soportada: {other}")),
        }
    }
}

/// Un pasaje recuperable/mostrable del documento fuente.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TextUnit {
    /// Posición en el corpus; estable durante toda la vida del proceso.
    pub id: usize,
    pub raw_text: String,
    pub category: Category,
}

impl TextUnit {
    /// Texto del escenario sin la sección de respuesta esperada.
    pub fn prompt_text(&self) -> &str {
        match EXPECTED_ANSWER_MARKER.find(&self.raw_text) {
            Some(m) => self.raw_text[..m.start()].trim(),
            None => self.raw_text.trim(),
        }
    }

    /// Sección de respuesta esperada (procedimiento de referencia), si existe.
    pub fn expected_answer(&self) -> Option<&str> {
        EXPECTED_ANSWER_MARKER
            .find(&self.raw_text)
            .map(|m| self.raw_text[m.end()..].trim())
            .filter(|s| !s.is_empty())
    }

    /// Formato de presentación según la categoría.
    pub fn visible_text(&self) -> String {
        let body = match self.prompt_text() {
            "" => "(không có mô tả)",
            text => text,
        };
        format!(
            "{}\n\n{}\n\n{}",
            self.category.banner(),
            body,
            self.category.question()
        )
    }
}

/// Secuencia ordenada e inmutable de unidades. Los ids coinciden con la
/// posición y ninguna unidad tiene texto vacío.
#[derive(Debug, Clone)]
pub struct Corpus {
    units: Vec<TextUnit>,
}

impl Corpus {
    /// Construye el corpus descartando fragmentos vacíos y asignando ids
    /// consecutivos. Un resultado vacío es un error de indexación.
    pub fn from_fragments<I>(fragments: I) -> EngineResult<Self>
    where
        I: IntoIterator<Item = (String, Category)>,
    {
        let units: Vec<TextUnit> = fragments
            .into_iter()
            .map(|(text, category)| (text.trim().to_string(), category))
            .filter(|(text, _)| !text.is_empty())
            .enumerate()
            .map(|(id, (raw_text, category))| TextUnit {
                id,
                raw_text,
                category,
            })
            .collect();

        if units.is_empty() {
            return Err(EngineError::Indexing(
                "no se pudo extraer ninguna unidad de texto".to_string(),
            ));
        }
        Ok(Self { units })
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn get(&self, id: usize) -> Option<&TextUnit> {
        self.units.get(id)
    }

    pub fn units(&self) -> &[TextUnit] {
        &self.units
    }

    pub fn count(&self, category: Category) -> usize {
        self.units.iter().filter(|u| u.category == category).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(text: &str, category: Category) -> TextUnit {
        TextUnit {
            id: 0,
            raw_text: text.to_string(),
            category,
        }
    }

    #[test]
    fn visible_text_hides_expected_answer() {
        let u = unit(
            "1. Ngừng tuần hoàn. Bệnh nhân bất tỉnh. Cần thực hiện: ép tim 30:2",
            Category::Emergency,
        );
        let shown = u.visible_text();
        assert!(shown.contains("Bệnh nhân bất tỉnh."));
        assert!(!shown.contains("ép tim"));
        assert!(shown.starts_with("🚑"));
        assert_eq!(u.expected_answer(), Some("ép tim 30:2"));
    }

    #[test]
    fn marker_match_is_case_insensitive() {
        let u = unit("2. Người nhà lo lắng. ĐÁP ÁN: trấn an", Category::Communication);
        assert_eq!(u.prompt_text(), "2. Người nhà lo lắng.");
        assert_eq!(u.expected_answer(), Some("trấn an"));
    }

    #[test]
    fn unit_without_marker_is_shown_whole() {
        let u = unit("3. Bệnh nhân đau ngực.", Category::Generic);
        assert_eq!(u.prompt_text(), "3. Bệnh nhân đau ngực.");
        assert_eq!(u.expected_answer(), None);
    }

    #[test]
    fn corpus_drops_empty_fragments_and_numbers_by_position() {
        let corpus = Corpus::from_fragments(vec![
            ("  ".to_string(), Category::Generic),
            ("a".to_string(), Category::Emergency),
            ("".to_string(), Category::Generic),
            ("b".to_string(), Category::Communication),
        ])
        .unwrap();
        assert_eq!(corpus.len(), 2);
        assert_eq!(corpus.get(0).unwrap().raw_text, "a");
        assert_eq!(corpus.get(1).unwrap().id, 1);
        assert_eq!(corpus.count(Category::Emergency), 1);
    }

    #[test]
    fn empty_corpus_is_an_indexing_error() {
        let err = Corpus::from_fragments(vec![(" ".to_string(), Category::Generic)]).unwrap_err();
        assert!(matches!(err, EngineError::Indexing(_)));
    }

    #[test]
    fn category_parses_config_tags() {
        assert_eq!("Emergency".parse::<Category>().unwrap(), Category::Emergency);
        assert_eq!("giao_tiep".parse::<Category>().unwrap(), Category::Communication);
        assert!("otro".parse::<Category>().is_err());
    }
}
