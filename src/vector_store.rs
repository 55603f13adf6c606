//! Índice vectorial TF-IDF en memoria sobre el corpus de escenarios.
//!
//! API pública:
//!   - `Retriever::new(Corpus)` ajusta el índice una sola vez.
//!   - `Retriever::top_k(&str, usize)` ranking por similitud coseno.
//!   - `Retriever::pick_random(Category)` escenario aleatorio de una categoría.
//!   - `Retriever::ensure_categories(&[Category])` validación de arranque.

use std::collections::HashMap;
use std::sync::LazyLock;

use rand::seq::SliceRandom;
use rand::Rng;
use regex::Regex;

use crate::{
    error::{EngineError, EngineResult},
    models::{Category, Corpus, TextUnit},
};

/// Tokens de dos o más caracteres de palabra, como el tokenizador clásico
/// de TF-IDF.
static TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\w\w+\b").expect("regex de token válida"));

fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    TOKEN.find_iter(text).map(|m| m.as_str().to_lowercase())
}

/// Vector disperso normalizado (L2): pares (término, peso) ordenados por término.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SparseVector(Vec<(usize, f32)>);

impl SparseVector {
    fn normalized(mut entries: Vec<(usize, f32)>) -> Self {
        entries.sort_by_key(|(term, _)| *term);
        let norm = entries.iter().map(|(_, w)| w * w).sum::<f32>().sqrt();
        if norm > f32::EPSILON {
            for (_, w) in entries.iter_mut() {
                *w /= norm;
            }
        } else {
            entries.clear();
        }
        Self(entries)
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_empty()
    }

    /// Coseno entre dos vectores ya normalizados (producto escalar).
    pub fn cosine(&self, other: &SparseVector) -> f32 {
        let (mut i, mut j, mut dot) = (0, 0, 0.0);
        while i < self.0.len() && j < other.0.len() {
            let (ta, wa) = self.0[i];
            let (tb, wb) = other.0[j];
            match ta.cmp(&tb) {
                std::cmp::Ordering::Less => i += 1,
                std::cmp::Ordering::Greater => j += 1,
                std::cmp::Ordering::Equal => {
                    dot += wa * wb;
                    i += 1;
                    j += 1;
                }
            }
        }
        dot
    }
}

/// Transformación TF-IDF ajustada más la matriz de vectores del corpus.
/// La dimensionalidad queda fija tras el ajuste.
#[derive(Debug, Clone)]
pub struct VectorIndex {
    vocabulary: HashMap<String, usize>,
    idf: Vec<f32>,
    vectors: Vec<SparseVector>,
}

impl VectorIndex {
    /// Ajusta vocabulario e IDF suavizado: `ln((1 + n) / (1 + df)) + 1`.
    pub fn fit(texts: &[&str]) -> Self {
        let mut vocabulary: HashMap<String, usize> = HashMap::new();
        let mut df: Vec<usize> = Vec::new();
        let mut counts: Vec<HashMap<usize, usize>> = Vec::with_capacity(texts.len());

        for text in texts {
            let mut tf: HashMap<usize, usize> = HashMap::new();
            for token in tokenize(text) {
                let next_id = vocabulary.len();
                let term = *vocabulary.entry(token).or_insert(next_id);
                if term == df.len() {
                    df.push(0);
                }
                *tf.entry(term).or_insert(0) += 1;
            }
            for term in tf.keys() {
                df[*term] += 1;
            }
            counts.push(tf);
        }

        let n = texts.len() as f32;
        let idf: Vec<f32> = df
            .iter()
            .map(|&d| ((1.0 + n) / (1.0 + d as f32)).ln() + 1.0)
            .collect();

        let vectors = counts
            .into_iter()
            .map(|tf| {
                SparseVector::normalized(
                    tf.into_iter()
                        .map(|(term, c)| (term, c as f32 * idf[term]))
                        .collect(),
                )
            })
            .collect();

        Self {
            vocabulary,
            idf,
            vectors,
        }
    }

    pub fn dimensions(&self) -> usize {
        self.idf.len()
    }

    /// Proyecta un texto con la ponderación ya ajustada; los términos fuera
    /// del vocabulario no aportan peso.
    pub fn transform(&self, text: &str) -> SparseVector {
        let mut tf: HashMap<usize, usize> = HashMap::new();
        for token in tokenize(text) {
            if let Some(&term) = self.vocabulary.get(&token) {
                *tf.entry(term).or_insert(0) += 1;
            }
        }
        SparseVector::normalized(
            tf.into_iter()
                .map(|(term, c)| (term, c as f32 * self.idf[term]))
                .collect(),
        )
    }

    pub fn vector(&self, id: usize) -> Option<&SparseVector> {
        self.vectors.get(id)
    }
}

/// Unidad recuperada junto con su similitud con la consulta.
#[derive(Debug, Clone, Copy)]
pub struct Hit<'a> {
    pub unit: &'a TextUnit,
    pub score: f32,
}

/// Corpus + índice, compartidos en sólo lectura por todas las sesiones.
#[derive(Debug)]
pub struct Retriever {
    corpus: Corpus,
    index: VectorIndex,
    by_category: HashMap<Category, Vec<usize>>,
}

impl Retriever {
    pub fn new(corpus: Corpus) -> Self {
        let texts: Vec<&str> = corpus.units().iter().map(|u| u.raw_text.as_str()).collect();
        let index = VectorIndex::fit(&texts);

        let mut by_category: HashMap<Category, Vec<usize>> = HashMap::new();
        for unit in corpus.units() {
            by_category.entry(unit.category).or_default().push(unit.id);
        }

        Self {
            corpus,
            index,
            by_category,
        }
    }

    pub fn corpus(&self) -> &Corpus {
        &self.corpus
    }

    pub fn index(&self) -> &VectorIndex {
        &self.index
    }

    /// Las `k` unidades más similares a `query`, por similitud descendente y
    /// desempate por id ascendente. Una consulta sin vocabulario común
    /// devuelve igualmente `k` unidades (todas con similitud 0).
    pub fn top_k(&self, query: &str, k: usize) -> impl Iterator<Item = Hit<'_>> + '_ {
        let query_vec = self.index.transform(query);
        let mut scored: Vec<Hit<'_>> = self
            .corpus
            .units()
            .iter()
            .map(|unit| Hit {
                unit,
                score: self
                    .index
                    .vector(unit.id)
                    .map(|v| v.cosine(&query_vec))
                    .unwrap_or(0.0),
            })
            .collect();

        scored.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.unit.id.cmp(&b.unit.id))
        });
        scored.truncate(k);
        scored.into_iter()
    }

    /// Escenario uniforme al azar entre las unidades de `category`.
    pub fn pick_random(&self, category: Category) -> EngineResult<&TextUnit> {
        self.pick_random_with(category, &mut rand::thread_rng())
    }

    pub fn pick_random_with<R: Rng + ?Sized>(
        &self,
        category: Category,
        rng: &mut R,
    ) -> EngineResult<&TextUnit> {
        self.by_category
            .get(&category)
            .and_then(|ids| ids.choose(rng))
            .and_then(|&id| self.corpus.get(id))
            .ok_or(EngineError::NoScenarioAvailable(category))
    }

    /// Comprueba al arrancar que cada categoría tenga al menos un escenario.
    pub fn ensure_categories(&self, categories: &[Category]) -> EngineResult<()> {
        for category in categories {
            if self.by_category.get(category).map_or(true, Vec::is_empty) {
                return Err(EngineError::NoScenarioAvailable(*category));
            }
        }
        Ok(())
    }
}
