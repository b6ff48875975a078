use crate::error::IndexError;
use crate::models::{Chunk, ChunkMetadata, IndexStatistics, SearchHit};
use crate::traits::KeywordIndex;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info, warn};

pub const DOCUMENTS_FILE: &str = "documents.json";
pub const METADATA_FILE: &str = "metadata.json";
pub const TOKENIZED_FILE: &str = "tokenized_docs.json";
pub const CONFIG_FILE: &str = "config.json";

const MIN_TOKEN_CHARS: usize = 3;
const GENERATION_HEX_LEN: usize = 16;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Bm25Params {
    pub k1: f64,
    pub b: f64,
    pub epsilon: f64,
}

impl Default for Bm25Params {
    fn default() -> Self {
        Self {
            k1: 1.2,
            b: 0.75,
            epsilon: 0.25,
        }
    }
}

impl Bm25Params {
    pub fn validate(&self) -> Result<(), IndexError> {
        if !self.k1.is_finite() || self.k1 < 0.0 {
            return Err(IndexError::InvalidConfig(format!("k1 must be >= 0, got {}", self.k1)));
        }
        if !(0.0..=1.0).contains(&self.b) {
            return Err(IndexError::InvalidConfig(format!("b must be in [0, 1], got {}", self.b)));
        }
        if !self.epsilon.is_finite() {
            return Err(IndexError::InvalidConfig(format!(
                "epsilon must be finite, got {}",
                self.epsilon
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SnapshotConfig {
    pub k1: f64,
    pub b: f64,
    pub epsilon: f64,
    pub document_count: usize,
    pub generation: String,
    #[serde(default)]
    pub saved_at: Option<DateTime<Utc>>,
}

pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|token| token.chars().count() >= MIN_TOKEN_CHARS)
        .map(str::to_string)
        .collect()
}

#[derive(Debug, Clone)]
pub struct Bm25Index {
    params: Bm25Params,
    documents: Vec<String>,
    metadata: Vec<ChunkMetadata>,
    tokenized: Vec<Vec<String>>,
    term_freqs: Vec<HashMap<String, usize>>,
    idf: BTreeMap<String, f64>,
    avg_doc_len: f64,
}

impl Bm25Index {
    pub fn build(chunks: &[Chunk], params: Bm25Params) -> Result<Self, IndexError> {
        let documents = chunks.iter().map(|chunk| chunk.text.clone()).collect();
        let metadata = chunks.iter().map(ChunkMetadata::from).collect();
        let tokenized = chunks.iter().map(|chunk| tokenize(&chunk.text)).collect();
        Self::from_parts(params, documents, metadata, tokenized)
    }

    fn from_parts(
        params: Bm25Params,
        documents: Vec<String>,
        metadata: Vec<ChunkMetadata>,
        tokenized: Vec<Vec<String>>,
    ) -> Result<Self, IndexError> {
        params.validate()?;
        if documents.len() != metadata.len() || documents.len() != tokenized.len() {
            return Err(IndexError::LengthMismatch {
                details: format!(
                    "documents={} metadata={} tokenized={}",
                    documents.len(),
                    metadata.len(),
                    tokenized.len()
                ),
            });
        }

        let term_freqs: Vec<HashMap<String, usize>> = tokenized
            .iter()
            .map(|tokens| {
                let mut freqs = HashMap::new();
                for token in tokens {
                    *freqs.entry(token.clone()).or_insert(0) += 1;
                }
                freqs
            })
            .collect();

        let total_tokens = tokenized.iter().map(Vec::len).sum::<usize>();
        let avg_doc_len = if tokenized.is_empty() {
            0.0
        } else {
            total_tokens as f64 / tokenized.len() as f64
        };

        let idf = compute_idf(&term_freqs, params.epsilon);

        Ok(Self {
            params,
            documents,
            metadata,
            tokenized,
            term_freqs,
            idf,
            avg_doc_len,
        })
    }

    pub fn params(&self) -> Bm25Params {
        self.params
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn scores(&self, query_tokens: &[String]) -> Vec<f64> {
        let Bm25Params { k1, b, .. } = self.params;
        let avg_doc_len = if self.avg_doc_len > 0.0 {
            self.avg_doc_len
        } else {
            1.0
        };

        self.term_freqs
            .iter()
            .zip(&self.tokenized)
            .map(|(freqs, tokens)| {
                let length_norm = 1.0 - b + b * tokens.len() as f64 / avg_doc_len;
                query_tokens
                    .iter()
                    .map(|token| {
                        let Some(tf) = freqs.get(token).map(|tf| *tf as f64) else {
                            return 0.0;
                        };
                        let idf = self.idf.get(token).copied().unwrap_or(0.0);
                        idf * (tf * (k1 + 1.0)) / (tf + k1 * length_norm)
                    })
                    .sum::<f64>()
            })
            .collect()
    }

    /// Ranks the whole corpus, keeps the first `top_k`, then drops hits scoring below
    /// `min_score`. Equal scores keep corpus order.
    pub fn search(&self, query: &str, top_k: usize, min_score: f64) -> Vec<SearchHit> {
        let query_tokens = tokenize(query);
        if !query_tokens.iter().any(|token| self.idf.contains_key(token)) {
            debug!(query, "no query term occurs in the corpus");
            return Vec::new();
        }

        let scores = self.scores(&query_tokens);
        let mut order: Vec<usize> = (0..scores.len()).collect();
        order.sort_by(|left, right| scores[*right].total_cmp(&scores[*left]));
        order.truncate(top_k);

        order
            .into_iter()
            .filter(|position| scores[*position] >= min_score)
            .enumerate()
            .map(|(rank, position)| SearchHit {
                text: self.documents[position].clone(),
                score: scores[position],
                metadata: self.metadata[position].clone(),
                rank: rank + 1,
            })
            .collect()
    }

    pub fn statistics(&self) -> IndexStatistics {
        if self.is_empty() {
            return IndexStatistics::Empty;
        }

        let lengths: Vec<usize> = self.tokenized.iter().map(Vec::len).collect();
        let total_tokens = lengths.iter().sum::<usize>();
        let unique_tokens = self
            .tokenized
            .iter()
            .flatten()
            .collect::<BTreeSet<_>>()
            .len();

        IndexStatistics::Built {
            num_documents: self.len(),
            avg_doc_length: total_tokens as f64 / lengths.len() as f64,
            min_doc_length: lengths.iter().copied().min().unwrap_or_default(),
            max_doc_length: lengths.iter().copied().max().unwrap_or_default(),
            total_tokens,
            unique_tokens,
        }
    }

    /// Writes the four snapshot artifacts into `dir`.
    ///
    /// Every artifact carries the same generation id, so files left over from an
    /// interrupted save are rejected by [`Bm25Index::load`].
    pub fn save(&self, dir: &Path) -> Result<(), IndexError> {
        fs::create_dir_all(dir)?;

        let saved_at = Utc::now();
        let generation = self.generation_id(saved_at)?;
        let config = SnapshotConfig {
            k1: self.params.k1,
            b: self.params.b,
            epsilon: self.params.epsilon,
            document_count: self.len(),
            generation: generation.clone(),
            saved_at: Some(saved_at),
        };

        let artifacts = [
            (DOCUMENTS_FILE, envelope_bytes(&generation, &self.documents)?),
            (METADATA_FILE, envelope_bytes(&generation, &self.metadata)?),
            (TOKENIZED_FILE, envelope_bytes(&generation, &self.tokenized)?),
            (CONFIG_FILE, serde_json::to_vec_pretty(&config)?),
        ];

        let mut staged = Vec::with_capacity(artifacts.len());
        for (name, bytes) in &artifacts {
            let temporary = dir.join(format!("{name}.tmp"));
            if let Err(error) = fs::write(&temporary, bytes) {
                staged.push((temporary, dir.join(name)));
                discard_staged(&staged);
                return Err(error.into());
            }
            staged.push((temporary, dir.join(name)));
        }

        for (position, (temporary, target)) in staged.iter().enumerate() {
            if let Err(error) = fs::rename(temporary, target) {
                discard_staged(&staged[position..]);
                return Err(error.into());
            }
        }

        info!(
            dir = %dir.display(),
            documents = self.len(),
            %generation,
            "saved bm25 index"
        );
        Ok(())
    }

    pub fn load(dir: &Path) -> Result<Self, IndexError> {
        let documents: SnapshotArtifact<Vec<String>> = read_artifact(dir, DOCUMENTS_FILE)?;
        let metadata: SnapshotArtifact<Vec<ChunkMetadata>> = read_artifact(dir, METADATA_FILE)?;
        let tokenized: SnapshotArtifact<Vec<Vec<String>>> = read_artifact(dir, TOKENIZED_FILE)?;
        let config: SnapshotConfig = read_artifact(dir, CONFIG_FILE)?;

        for (name, generation) in [
            (DOCUMENTS_FILE, &documents.generation),
            (METADATA_FILE, &metadata.generation),
            (TOKENIZED_FILE, &tokenized.generation),
        ] {
            if *generation != config.generation {
                return Err(IndexError::GenerationMismatch {
                    details: format!(
                        "{name} is generation {generation}, config is generation {}",
                        config.generation
                    ),
                });
            }
        }

        if config.document_count != documents.items.len() {
            return Err(IndexError::LengthMismatch {
                details: format!(
                    "config declares {} documents, documents file holds {}",
                    config.document_count,
                    documents.items.len()
                ),
            });
        }

        let params = Bm25Params {
            k1: config.k1,
            b: config.b,
            epsilon: config.epsilon,
        };
        let index = Self::from_parts(params, documents.items, metadata.items, tokenized.items)?;

        info!(
            dir = %dir.display(),
            documents = index.len(),
            generation = %config.generation,
            "loaded bm25 index"
        );
        Ok(index)
    }

    // Content hash plus save time; unchanged corpora still get a new generation.
    fn generation_id(&self, saved_at: DateTime<Utc>) -> Result<String, IndexError> {
        let mut hasher = Sha256::new();
        hasher.update(serde_json::to_vec(&self.documents)?);
        hasher.update(serde_json::to_vec(&self.metadata)?);
        hasher.update(serde_json::to_vec(&self.tokenized)?);
        hasher.update(saved_at.to_rfc3339().as_bytes());
        let digest = format!("{:x}", hasher.finalize());
        Ok(digest[..GENERATION_HEX_LEN].to_string())
    }
}

/// Okapi IDF, `ln((N - n + 0.5) / (n + 0.5))`, with every non-positive value replaced by
/// `epsilon * mean(idf)`.
fn compute_idf(term_freqs: &[HashMap<String, usize>], epsilon: f64) -> BTreeMap<String, f64> {
    let mut doc_freqs: BTreeMap<String, usize> = BTreeMap::new();
    for freqs in term_freqs {
        for term in freqs.keys() {
            *doc_freqs.entry(term.clone()).or_insert(0) += 1;
        }
    }

    if doc_freqs.is_empty() {
        return BTreeMap::new();
    }

    let corpus_size = term_freqs.len() as f64;
    let mut idf: BTreeMap<String, f64> = doc_freqs
        .into_iter()
        .map(|(term, freq)| {
            let freq = freq as f64;
            let value = ((corpus_size - freq + 0.5) / (freq + 0.5)).ln();
            (term, value)
        })
        .collect();

    let mean_idf = idf.values().sum::<f64>() / idf.len() as f64;
    let floor = epsilon * mean_idf;
    for value in idf.values_mut() {
        if *value <= 0.0 {
            *value = floor;
        }
    }

    idf
}

#[derive(Serialize)]
struct SnapshotArtifactRef<'a, T> {
    generation: &'a str,
    items: &'a T,
}

#[derive(Deserialize)]
struct SnapshotArtifact<T> {
    generation: String,
    items: T,
}

fn envelope_bytes<T: Serialize>(generation: &str, items: &T) -> Result<Vec<u8>, IndexError> {
    Ok(serde_json::to_vec_pretty(&SnapshotArtifactRef { generation, items })?)
}

fn discard_staged(staged: &[(PathBuf, PathBuf)]) {
    for (temporary, _) in staged {
        if let Err(error) = fs::remove_file(temporary) {
            if error.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %temporary.display(), %error, "could not remove staged artifact");
            }
        }
    }
}

fn read_artifact<T: DeserializeOwned>(dir: &Path, name: &str) -> Result<T, IndexError> {
    let path = dir.join(name);
    if !path.is_file() {
        return Err(IndexError::MissingArtifact(path.display().to_string()));
    }
    let bytes = fs::read(&path)?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Caller-owned handle to the current BM25 index.
///
/// Rebuilds and loads construct a fresh [`Bm25Index`] first and then swap it in, so
/// concurrent readers observe either the previous index or the new one in full.
#[derive(Debug, Default)]
pub struct Indexer {
    params: Bm25Params,
    current: RwLock<Option<Arc<Bm25Index>>>,
}

impl Indexer {
    pub fn new(params: Bm25Params) -> Self {
        Self {
            params,
            current: RwLock::new(None),
        }
    }

    pub fn params(&self) -> Bm25Params {
        self.current().map_or(self.params, |index| index.params())
    }

    pub fn current(&self) -> Option<Arc<Bm25Index>> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn swap(&self, index: Bm25Index) {
        let mut guard = self.current.write().unwrap_or_else(PoisonError::into_inner);
        *guard = Some(Arc::new(index));
    }

    pub fn build_index(&self, chunks: &[Chunk]) -> Result<(), IndexError> {
        let index = Bm25Index::build(chunks, self.params)?;
        info!(documents = index.len(), "built bm25 index");
        self.swap(index);
        Ok(())
    }

    pub fn search(&self, query: &str, top_k: usize, min_score: f64) -> Vec<SearchHit> {
        match self.current() {
            Some(index) => index.search(query, top_k, min_score),
            None => {
                warn!("search called before the index was built");
                Vec::new()
            }
        }
    }

    pub fn batch_search(&self, queries: &[&str], top_k: usize) -> Vec<(String, Vec<SearchHit>)> {
        let Some(index) = self.current() else {
            warn!(queries = queries.len(), "batch search called before the index was built");
            return queries.iter().map(|query| (query.to_string(), Vec::new())).collect();
        };

        queries
            .iter()
            .map(|query| (query.to_string(), index.search(query, top_k, 0.0)))
            .collect()
    }

    pub fn statistics(&self) -> IndexStatistics {
        self.current()
            .map_or(IndexStatistics::Empty, |index| index.statistics())
    }

    pub fn save_index(&self, dir: &Path) -> Result<(), IndexError> {
        self.current().ok_or(IndexError::NotBuilt)?.save(dir)
    }

    pub fn load_index(&self, dir: &Path) -> Result<(), IndexError> {
        let index = Bm25Index::load(dir)?;
        self.swap(index);
        Ok(())
    }
}

impl KeywordIndex for Indexer {
    fn index_chunks(&self, chunks: &[Chunk]) -> Result<(), IndexError> {
        self.build_index(chunks)
    }

    fn search_keyword(&self, query: &str, top_k: usize, min_score: f64) -> Vec<SearchHit> {
        self.search(query, top_k, min_score)
    }
}
