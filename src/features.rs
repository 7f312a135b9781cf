use crate::error::{AppError, AppResult};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::{
    collections::{HashMap, HashSet},
    sync::OnceLock,
};
use tracing::debug;

/// Runs of two or more word characters. Changing this changes every vocabulary.
const TOKEN_PATTERN: &str = r"\b\w\w+\b";

fn token_regex() -> &'static Regex {
    static TOKEN_RE: OnceLock<Regex> = OnceLock::new();
    TOKEN_RE.get_or_init(|| Regex::new(TOKEN_PATTERN).expect("token pattern is a valid regex"))
}

/// Lowercases `text` and returns its tokens in order of appearance.
pub fn tokenize(text: &str) -> Vec<String> {
    let lowered = text.to_lowercase();
    token_regex()
        .find_iter(&lowered)
        .map(|m| m.as_str().to_string())
        .collect()
}

/// Expands tokens into contiguous n-grams for every n in `min_n..=max_n`,
/// joining the tokens of each n-gram with a single space.
pub fn ngrams(tokens: &[String], (min_n, max_n): (usize, usize)) -> Vec<String> {
    let mut grams = Vec::new();
    for n in min_n..=max_n {
        if n == 0 || n > tokens.len() {
            continue;
        }
        grams.extend(tokens.windows(n).map(|window| window.join(" ")));
    }
    grams
}

fn analyze(text: &str, ngram_range: (usize, usize)) -> Vec<String> {
    ngrams(&tokenize(text), ngram_range)
}

/// Knobs for fitting a [`TfidfVectorizer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VectorizerParams {
    pub ngram_range: (usize, usize),
    pub min_df: usize,
    pub max_features: usize,
}

impl Default for VectorizerParams {
    fn default() -> Self {
        Self {
            ngram_range: (1, 2),
            min_df: 2,
            max_features: 50_000,
        }
    }
}

impl VectorizerParams {
    pub fn validate(&self) -> AppResult<()> {
        let (min_n, max_n) = self.ngram_range;
        if min_n == 0 {
            return Err(AppError::InvalidConfig("ngram_min must be at least 1".to_string()));
        }
        if min_n > max_n {
            return Err(AppError::InvalidConfig(format!(
                "ngram_min ({}) exceeds ngram_max ({})",
                min_n, max_n
            )));
        }
        if self.max_features == 0 {
            return Err(AppError::InvalidConfig("max_features must be positive".to_string()));
        }
        Ok(())
    }
}

/// Sparse feature vector with strictly increasing indices.
#[derive(Debug, Clone, PartialEq)]
pub struct SparseVector {
    dim: usize,
    indices: Vec<usize>,
    values: Vec<f64>,
}

impl SparseVector {
    pub fn zeros(dim: usize) -> Self {
        Self {
            dim,
            indices: Vec::new(),
            values: Vec::new(),
        }
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn nnz(&self) -> usize {
        self.indices.len()
    }

    pub fn is_zero(&self) -> bool {
        self.values.iter().all(|v| *v == 0.0)
    }

    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn get(&self, index: usize) -> f64 {
        match self.indices.binary_search(&index) {
            Ok(pos) => self.values[pos],
            Err(_) => 0.0,
        }
    }

    pub fn norm(&self) -> f64 {
        self.values.iter().map(|v| v * v).sum::<f64>().sqrt()
    }

    /// Dot product against a dense weight slice of length `dim`.
    pub fn dot(&self, dense: &[f64]) -> f64 {
        self.indices
            .iter()
            .zip(&self.values)
            .map(|(&i, &v)| dense[i] * v)
            .sum()
    }
}

/// Compressed sparse row matrix, one row per document.
#[derive(Debug, Clone, PartialEq)]
pub struct CsrMatrix {
    n_cols: usize,
    indptr: Vec<usize>,
    indices: Vec<usize>,
    data: Vec<f64>,
}

impl CsrMatrix {
    pub fn from_rows(rows: &[SparseVector], n_cols: usize) -> Self {
        let nnz = rows.iter().map(SparseVector::nnz).sum();
        let mut indptr = Vec::with_capacity(rows.len() + 1);
        let mut indices = Vec::with_capacity(nnz);
        let mut data = Vec::with_capacity(nnz);
        indptr.push(0);
        for row in rows {
            debug_assert!(row.dim() == n_cols);
            indices.extend_from_slice(row.indices());
            data.extend_from_slice(row.values());
            indptr.push(indices.len());
        }
        Self {
            n_cols,
            indptr,
            indices,
            data,
        }
    }

    pub fn n_rows(&self) -> usize {
        self.indptr.len() - 1
    }

    pub fn n_cols(&self) -> usize {
        self.n_cols
    }

    pub fn nnz(&self) -> usize {
        self.data.len()
    }

    pub fn row(&self, i: usize) -> (&[usize], &[f64]) {
        let (start, end) = (self.indptr[i], self.indptr[i + 1]);
        (&self.indices[start..end], &self.data[start..end])
    }

    pub fn row_dot(&self, i: usize, dense: &[f64]) -> f64 {
        let (indices, values) = self.row(i);
        indices
            .iter()
            .zip(values)
            .map(|(&j, &v)| dense[j] * v)
            .sum()
    }
}

/// Frozen vocabulary plus smoothed IDF weights.
///
/// Feature indices follow lexicographic order of the n-gram strings, so two
/// fits over the same corpus always agree on the index of every n-gram.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "VectorizerState", into = "VectorizerState")]
pub struct TfidfVectorizer {
    ngram_range: (usize, usize),
    terms: Vec<String>,
    idf: Vec<f64>,
    vocabulary: HashMap<String, usize>,
}

/// Persisted form of [`TfidfVectorizer`]; the index map is rebuilt on load.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct VectorizerState {
    ngram_range: (usize, usize),
    terms: Vec<String>,
    idf: Vec<f64>,
}

impl From<TfidfVectorizer> for VectorizerState {
    fn from(v: TfidfVectorizer) -> Self {
        Self {
            ngram_range: v.ngram_range,
            terms: v.terms,
            idf: v.idf,
        }
    }
}

impl TryFrom<VectorizerState> for TfidfVectorizer {
    type Error = String;

    fn try_from(state: VectorizerState) -> Result<Self, Self::Error> {
        TfidfVectorizer::from_parts(state.ngram_range, state.terms, state.idf)
    }
}

impl TfidfVectorizer {
    /// Learns the vocabulary and IDF weights from `documents`.
    pub fn fit<S: AsRef<str>>(documents: &[S], params: &VectorizerParams) -> AppResult<Self> {
        params.validate()?;
        let n_docs = documents.len();

        let mut doc_freq: HashMap<String, usize> = HashMap::new();
        for doc in documents {
            let unique: HashSet<String> = analyze(doc.as_ref(), params.ngram_range)
                .into_iter()
                .collect();
            for gram in unique {
                *doc_freq.entry(gram).or_insert(0) += 1;
            }
        }
        let seen = doc_freq.len();

        let mut kept: Vec<(String, usize)> = doc_freq
            .into_iter()
            .filter(|(_, df)| *df >= params.min_df)
            .collect();

        if kept.is_empty() {
            return Err(AppError::EmptyVocabulary {
                min_df: params.min_df,
                n_docs,
            });
        }

        if kept.len() > params.max_features {
            kept.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
            kept.truncate(params.max_features);
        }
        kept.sort_by(|a, b| a.0.cmp(&b.0));

        let n = n_docs as f64;
        let (terms, idf): (Vec<String>, Vec<f64>) = kept
            .into_iter()
            .map(|(term, df)| {
                let weight = ((1.0 + n) / (1.0 + df as f64)).ln() + 1.0;
                (term, weight)
            })
            .unzip();

        debug!(
            "Fitted vectorizer: {} documents, {} distinct n-grams, {} kept",
            n_docs,
            seen,
            terms.len()
        );

        Self::from_parts(params.ngram_range, terms, idf).map_err(AppError::InvalidConfig)
    }

    fn from_parts(
        ngram_range: (usize, usize),
        terms: Vec<String>,
        idf: Vec<f64>,
    ) -> Result<Self, String> {
        if ngram_range.0 == 0 || ngram_range.0 > ngram_range.1 {
            return Err(format!("invalid ngram range {:?}", ngram_range));
        }
        if terms.len() != idf.len() {
            return Err(format!(
                "{} terms but {} idf weights",
                terms.len(),
                idf.len()
            ));
        }
        if let Some(weight) = idf.iter().find(|w| !(w.is_finite() && **w > 0.0)) {
            return Err(format!("idf weight {} is not a positive finite number", weight));
        }
        let mut vocabulary = HashMap::with_capacity(terms.len());
        for (index, term) in terms.iter().enumerate() {
            if vocabulary.insert(term.clone(), index).is_some() {
                return Err(format!("duplicate term {:?}", term));
            }
        }
        Ok(Self {
            ngram_range,
            terms,
            idf,
            vocabulary,
        })
    }

    /// Maps one document to its L2-normalised TF-IDF vector. Unknown n-grams
    /// are ignored; a document with no known n-grams yields the zero vector.
    pub fn transform(&self, document: &str) -> SparseVector {
        let mut counts: HashMap<usize, f64> = HashMap::new();
        for gram in analyze(document, self.ngram_range) {
            if let Some(&index) = self.vocabulary.get(&gram) {
                *counts.entry(index).or_insert(0.0) += 1.0;
            }
        }

        let mut entries: Vec<(usize, f64)> = counts
            .into_iter()
            .map(|(index, tf)| (index, tf * self.idf[index]))
            .collect();
        entries.sort_unstable_by_key(|&(index, _)| index);

        let (indices, mut values): (Vec<usize>, Vec<f64>) = entries.into_iter().unzip();
        let norm = values.iter().map(|v| v * v).sum::<f64>().sqrt();
        if norm > 0.0 {
            for v in &mut values {
                *v /= norm;
            }
        }

        SparseVector {
            dim: self.terms.len(),
            indices,
            values,
        }
    }

    pub fn transform_batch<S: AsRef<str>>(&self, documents: &[S]) -> CsrMatrix {
        let rows: Vec<SparseVector> = documents
            .iter()
            .map(|doc| self.transform(doc.as_ref()))
            .collect();
        CsrMatrix::from_rows(&rows, self.terms.len())
    }

    pub fn vocabulary_size(&self) -> usize {
        self.terms.len()
    }

    pub fn ngram_range(&self) -> (usize, usize) {
        self.ngram_range
    }

    pub fn index_of(&self, term: &str) -> Option<usize> {
        self.vocabulary.get(term).copied()
    }

    pub fn terms(&self) -> &[String] {
        &self.terms
    }

    pub fn idf(&self) -> &[f64] {
        &self.idf
    }
}
