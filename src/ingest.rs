//! Indexación de documentos: extracción de texto, segmentación en unidades
//! (ventanas fijas o cabeceras estructurales) y ajuste del índice TF-IDF.
//!
//! Se ejecuta una única vez al arrancar; cualquier fallo aquí es fatal.

use std::{
    fs,
    path::{Path, PathBuf},
};

use mime_guess::MimeGuess;
use regex::Regex;
use tracing::{info, warn};

use crate::{
    error::{EngineError, EngineResult},
    models::{self, Category, Corpus},
    vector_store::Retriever,
};

/// Devuelve el texto completo de un documento (PDF o texto plano).
pub fn extract_text(path: &Path) -> EngineResult<String> {
    if !path.is_file() {
        return Err(EngineError::Indexing(format!(
            "el documento no existe: {}",
            path.display()
        )));
    }

    let extension = path
        .extension()
        .and_then(std::ffi::OsStr::to_str)
        .unwrap_or("")
        .to_lowercase();
    let mime = MimeGuess::from_path(path).first();

    if extension == "pdf" {
        return pdf_extract::extract_text(path).map_err(|e| {
            EngineError::Indexing(format!(
                "no se pudo extraer texto del PDF {}: {e}",
                path.display()
            ))
        });
    }

    let is_text = matches!(extension.as_str(), "txt" | "md" | "text")
        || mime.map(|m| m.type_() == mime_guess::mime::TEXT).unwrap_or(false);
    if !is_text {
        return Err(EngineError::Indexing(format!(
            "formato de documento no soportado ('.{extension}'): {}",
            path.display()
        )));
    }

    fs::read_to_string(path).map_err(|e| {
        EngineError::Indexing(format!("no se pudo leer {}: {e}", path.display()))
    })
}

/// Estrategia de segmentación de un documento en fragmentos categorizados.
pub trait SplitStrategy: Send + Sync {
    fn split(&self, text: &str, default_category: Category) -> Vec<(String, Category)>;
}

/// Ventanas de longitud fija medidas en caracteres. Con `overlap == 0` las
/// ventanas son contiguas y su concatenación reproduce el documento.
#[derive(Debug, Clone)]
pub struct FixedWindow {
    size: usize,
    overlap: usize,
}

impl FixedWindow {
    pub fn new(size: usize, overlap: usize) -> EngineResult<Self> {
        if size == 0 || overlap >= size {
            return Err(EngineError::Indexing(format!(
                "ventana inválida: tamaño {size}, solapamiento {overlap}"
            )));
        }
        Ok(Self { size, overlap })
    }

    /// Trozos crudos, sin recortar espacios.
    pub fn windows(&self, text: &str) -> Vec<String> {
        let chars: Vec<char> = text.chars().collect();
        let stride = self.size - self.overlap;
        let mut windows = Vec::new();
        let mut start = 0;

        while start < chars.len() {
            let end = (start + self.size).min(chars.len());
            windows.push(chars[start..end].iter().collect());
            if end == chars.len() {
                break;
            }
            start += stride;
        }
        windows
    }
}

impl SplitStrategy for FixedWindow {
    fn split(&self, text: &str, default_category: Category) -> Vec<(String, Category)> {
        self.windows(text)
            .into_iter()
            .map(|w| (w, default_category))
            .collect()
    }
}

/// Tipo de cabecera reconocida por [`StructuralHeader`].
#[derive(Debug, Clone)]
pub enum HeaderRule {
    /// Encabezado de sección ("TÌNH HUỐNG CẤP CỨU"): abre una unidad y fija la
    /// categoría de las unidades ordinales que le siguen.
    Section { pattern: Regex, category: Category },
    /// Marcador ordinal al inicio de línea ("1.", "12)"): abre una unidad con
    /// la categoría vigente.
    Ordinal { pattern: Regex },
}

impl HeaderRule {
    fn pattern(&self) -> &Regex {
        match self {
            Self::Section { pattern, .. } | Self::Ordinal { pattern } => pattern,
        }
    }
}

/// Segmentación por cabeceras. Cada unidad conserva su cabecera; los
/// fragmentos vacíos al inicio o al final se descartan.
#[derive(Debug, Clone)]
pub struct StructuralHeader {
    rules: Vec<HeaderRule>,
}

impl StructuralHeader {
    pub fn new(rules: Vec<HeaderRule>) -> Self {
        Self { rules }
    }
}

impl Default for StructuralHeader {
    fn default() -> Self {
        let section = |pattern: &str, category| HeaderRule::Section {
            pattern: Regex::new(pattern).expect("regex de sección válida"),
            category,
        };
        Self::new(vec![
            section(r"(?mi)^[ \t]*tình huống[ \t]+cấp[ \t]+cứu\b", Category::Emergency),
            section(r"(?mi)^[ \t]*tình huống[ \t]+giao[ \t]+tiếp\b", Category::Communication),
            HeaderRule::Ordinal {
                pattern: Regex::new(r"(?m)^[ \t]*\d{1,3}[.)][ \t]+\S")
                    .expect("regex ordinal válida"),
            },
        ])
    }
}

struct Boundary {
    start: usize,
    header_end: usize,
    section: Option<Category>,
    ordinal: Option<u32>,
}

impl Boundary {
    fn ordinal_of(header: &str) -> Option<u32> {
        let digits: String = header
            .trim_start()
            .chars()
            .take_while(char::is_ascii_digit)
            .collect();
        digits.parse().ok()
    }
}

/// Descarta las cabeceras ordinales que numeran los pasos de una respuesta
/// esperada. Dentro de una unidad que ya abrió su sección de respuesta, un
/// ordinal que continúa la lista de pasos (1, 2, 3...) pertenece a esa
/// unidad; cualquier otro abre un escenario nuevo.
fn drop_answer_steps(text: &str, boundaries: Vec<Boundary>) -> Vec<Boundary> {
    let mut kept: Vec<Boundary> = Vec::with_capacity(boundaries.len());
    let mut steps = 0u32;
    for b in boundaries {
        if let (Some(n), Some(open)) = (b.ordinal, kept.last()) {
            if models::has_expected_answer(&text[open.start..b.start]) && n == steps + 1 {
                steps = n;
                continue;
            }
        }
        steps = 0;
        kept.push(b);
    }
    kept
}

impl SplitStrategy for StructuralHeader {
    fn split(&self, text: &str, default_category: Category) -> Vec<(String, Category)> {
        let mut boundaries: Vec<Boundary> = Vec::new();
        for rule in &self.rules {
            let section = match rule {
                HeaderRule::Section { category, .. } => Some(*category),
                HeaderRule::Ordinal { .. } => None,
            };
            for m in rule.pattern().find_iter(text) {
                // La primera regla que reclama una posición gana.
                if boundaries.iter().any(|b| b.start == m.start()) {
                    continue;
                }
                boundaries.push(Boundary {
                    start: m.start(),
                    header_end: m.end(),
                    section,
                    ordinal: match rule {
                        HeaderRule::Ordinal { .. } => Boundary::ordinal_of(m.as_str()),
                        HeaderRule::Section { .. } => None,
                    },
                });
            }
        }
        boundaries.sort_by_key(|b| b.start);
        let boundaries = drop_answer_steps(text, boundaries);

        let mut fragments = Vec::new();
        if let Some(first) = boundaries.first() {
            // Preámbulo anterior a la primera cabecera: recuperable pero nunca
            // servido como escenario de una categoría concreta.
            let preamble = text[..first.start].trim();
            if !preamble.is_empty() {
                fragments.push((preamble.to_string(), Category::Generic));
            }
        } else {
            let whole = text.trim();
            if !whole.is_empty() {
                fragments.push((whole.to_string(), default_category));
            }
            return fragments;
        }

        let mut current = default_category;
        let mut carried: Option<&str> = None;
        for (i, b) in boundaries.iter().enumerate() {
            let end = boundaries.get(i + 1).map(|n| n.start).unwrap_or(text.len());
            let segment = text[b.start..end].trim();

            if let Some(category) = b.section {
                current = category;
                // Un encabezado de sección sin cuerpo se antepone a la unidad siguiente.
                let body = &text[b.header_end..end];
                if !body.chars().any(char::is_alphanumeric) {
                    carried = Some(segment);
                    continue;
                }
            }

            let unit = match carried.take() {
                Some(heading) => format!("{heading}\n{segment}"),
                None => segment.to_string(),
            };
            if !unit.trim().is_empty() {
                fragments.push((unit, current));
            }
        }
        fragments
    }
}

/// Documento a indexar junto con su estrategia y categoría por defecto.
pub struct DocumentSource {
    pub path: PathBuf,
    pub strategy: Box<dyn SplitStrategy>,
    pub default_category: Category,
}

/// Indexa un único documento.
pub fn build(path: &Path, strategy: &dyn SplitStrategy) -> EngineResult<Retriever> {
    let text = extract_text(path)?;
    build_from_text(&text, strategy, Category::Generic)
}

/// Indexa un texto ya extraído.
pub fn build_from_text(
    text: &str,
    strategy: &dyn SplitStrategy,
    default_category: Category,
) -> EngineResult<Retriever> {
    let corpus = Corpus::from_fragments(strategy.split(text, default_category))?;
    Ok(Retriever::new(corpus))
}

/// Indexa varios documentos en un único corpus; los ids son posiciones en
/// el corpus combinado.
pub fn build_from_sources(sources: &[DocumentSource]) -> EngineResult<Retriever> {
    let mut fragments = Vec::new();
    for source in sources {
        let text = extract_text(&source.path)?;
        let parts = source.strategy.split(&text, source.default_category);
        if parts.is_empty() {
            warn!("Documento sin unidades útiles: {}", source.path.display());
        }
        info!(
            "Documento {} segmentado en {} unidades.",
            source.path.display(),
            parts.len()
        );
        fragments.extend(parts);
    }
    let corpus = Corpus::from_fragments(fragments)?;
    Ok(Retriever::new(corpus))
}
