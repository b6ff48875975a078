use crate::chunking::{Chunker, ChunkingConfig};
use crate::error::{IndexError, IngestError};
use crate::index::Bm25Params;
use crate::markdown::MarkdownRenderer;
use crate::models::{Chunk, DocumentKind, DocumentLayout, Extensions, PageSpans, TextBlock};
use crate::reconstruct::{BlockReconstructor, ReconstructionOptions};
use crate::structure::{group_sections, sections_from_markdown};
use crate::tokenizer::SizeMeasure;
use crate::traits::{KeywordIndex, SpanSource, TextFilter};
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use std::str::FromStr;
use tracing::{debug, info, warn};

const ENV_PREFIX: &str = "PDF_CORPUS_";

#[derive(Debug, Clone, Default)]
pub struct PipelineOptions {
    pub reconstruction: ReconstructionOptions,
    pub chunking: ChunkingConfig,
    pub bm25: Bm25Params,
    pub tokenizer_path: Option<PathBuf>,
}

impl PipelineOptions {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut options = Self::default();
        let read = |key: &str| {
            let name = format!("{ENV_PREFIX}{key}");
            lookup(&name)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
                .map(|value| (name, value))
        };

        override_parsed(&read, "MERGE_THRESHOLD", &mut options.reconstruction.merge_threshold);
        override_parsed(&read, "FIX_HYPHENATION", &mut options.reconstruction.fix_hyphenation);
        override_parsed(&read, "MAX_CHUNK_SIZE", &mut options.chunking.max_chunk_size);
        override_parsed(&read, "MIN_CHUNK_SIZE", &mut options.chunking.min_chunk_size);
        override_parsed(&read, "CHUNK_OVERLAP", &mut options.chunking.chunk_overlap);
        override_parsed(&read, "BM25_K1", &mut options.bm25.k1);
        override_parsed(&read, "BM25_B", &mut options.bm25.b);
        override_parsed(&read, "BM25_EPSILON", &mut options.bm25.epsilon);
        options.tokenizer_path = read("TOKENIZER").map(|(_, value)| PathBuf::from(value));

        options
    }

    pub fn size_measure(&self) -> SizeMeasure {
        match &self.tokenizer_path {
            Some(path) => SizeMeasure::from_tokenizer_file(path),
            None => SizeMeasure::Characters,
        }
    }
}

fn override_parsed<T, R>(read: &R, key: &str, target: &mut T)
where
    T: FromStr,
    T::Err: std::fmt::Display,
    R: Fn(&str) -> Option<(String, String)>,
{
    let Some((name, value)) = read(key) else {
        return;
    };
    match value.parse::<T>() {
        Ok(parsed) => *target = parsed,
        Err(error) => warn!(%name, %value, %error, "ignoring unparsable setting"),
    }
}

pub fn derive_doc_id(source: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    digest[..16].to_string()
}

pub struct SourceDocument<S> {
    pub doc_id: String,
    pub kind: DocumentKind,
    pub source: S,
    pub extensions: Extensions,
}

impl<S> SourceDocument<S> {
    pub fn new(doc_id: impl Into<String>, kind: DocumentKind, source: S) -> Self {
        Self {
            doc_id: doc_id.into(),
            kind,
            source,
            extensions: Extensions::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SkippedDocument {
    pub doc_id: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct IngestionReport {
    pub chunks: Vec<Chunk>,
    pub skipped_documents: Vec<SkippedDocument>,
}

impl IngestionReport {
    pub fn index_into<I: KeywordIndex + ?Sized>(&self, index: &I) -> Result<(), IndexError> {
        index.index_chunks(&self.chunks)
    }
}

pub struct DocumentPipeline {
    reconstructor: BlockReconstructor,
    chunker: Chunker,
    filters: Vec<Box<dyn TextFilter + Send + Sync>>,
}

impl DocumentPipeline {
    pub fn new(options: &PipelineOptions) -> Result<Self, IngestError> {
        Self::with_measure(options, options.size_measure())
    }

    pub fn with_measure(
        options: &PipelineOptions,
        measure: SizeMeasure,
    ) -> Result<Self, IngestError> {
        Ok(Self {
            reconstructor: BlockReconstructor::new(options.reconstruction),
            chunker: Chunker::new(options.chunking, measure)?,
            filters: Vec::new(),
        })
    }

    pub fn with_filter(mut self, filter: impl TextFilter + Send + Sync + 'static) -> Self {
        self.filters.push(Box::new(filter));
        self
    }

    pub fn chunker(&self) -> &Chunker {
        &self.chunker
    }

    pub fn layout_document<S: SpanSource + ?Sized>(
        &self,
        document: &SourceDocument<&S>,
    ) -> Result<DocumentLayout, IngestError> {
        if document.kind == DocumentKind::Scanned {
            info!(doc_id = %document.doc_id, "skipping scanned document");
            return Ok(DocumentLayout::from_pages(Vec::new()));
        }

        let pages: Vec<PageSpans> = document
            .source
            .extract_spans()?
            .into_iter()
            .filter(|page| document.kind.admits_page(page.page_num))
            .collect();

        let layout = self.reconstructor.layout(&pages)?;
        debug!(
            doc_id = %document.doc_id,
            pages = layout.pages.len(),
            blocks = layout.statistics.total_blocks,
            "reconstructed blocks"
        );

        if self.filters.is_empty() {
            return Ok(layout);
        }
        let pages = layout
            .pages
            .into_iter()
            .map(|mut page| {
                let blocks = self.apply_filters(std::mem::take(&mut page.blocks));
                page.set_blocks(blocks);
                page
            })
            .collect();
        Ok(DocumentLayout::from_pages(pages))
    }

    pub fn process_document<S: SpanSource + ?Sized>(
        &self,
        document: &SourceDocument<&S>,
    ) -> Result<Vec<Chunk>, IngestError> {
        let blocks = self.layout_document(document)?.into_blocks();
        let sections = group_sections(&blocks);
        Ok(self
            .chunker
            .chunk_with_extensions(&sections, &document.doc_id, &document.extensions))
    }

    pub fn render_markdown<S: SpanSource + ?Sized>(
        &self,
        document: &SourceDocument<&S>,
        renderer: &MarkdownRenderer,
    ) -> Result<String, IngestError> {
        Ok(renderer.render(&self.layout_document(document)?))
    }

    pub fn process_markdown(
        &self,
        doc_id: &str,
        markdown: &str,
    ) -> Result<Vec<Chunk>, IngestError> {
        let sections = sections_from_markdown(markdown)?;
        Ok(self.chunker.chunk(&sections, doc_id))
    }

    /// Processes every document, collecting chunks in input order. Documents that fail
    /// or are gated out are reported instead of aborting the batch.
    pub fn ingest_documents_best_effort<S: SpanSource>(
        &self,
        documents: &[SourceDocument<S>],
    ) -> IngestionReport {
        let mut report = IngestionReport::default();

        for document in documents {
            if document.kind == DocumentKind::Scanned {
                report.skipped_documents.push(SkippedDocument {
                    doc_id: document.doc_id.clone(),
                    reason: "scanned document has no text layer".to_string(),
                });
                continue;
            }

            let borrowed = SourceDocument {
                doc_id: document.doc_id.clone(),
                kind: document.kind.clone(),
                source: &document.source,
                extensions: document.extensions.clone(),
            };

            match self.process_document(&borrowed) {
                Ok(chunks) => report.chunks.extend(chunks),
                Err(error) => {
                    warn!(doc_id = %document.doc_id, %error, "skipping document");
                    report.skipped_documents.push(SkippedDocument {
                        doc_id: document.doc_id.clone(),
                        reason: error.to_string(),
                    });
                }
            }
        }

        info!(
            chunks = report.chunks.len(),
            skipped = report.skipped_documents.len(),
            "ingestion finished"
        );
        report
    }

    fn apply_filters(&self, blocks: Vec<TextBlock>) -> Vec<TextBlock> {
        blocks
            .into_iter()
            .filter_map(|mut block| {
                for filter in &self.filters {
                    block.text = filter.apply(&block.text);
                }
                if block.text.trim().is_empty() {
                    debug!(
                        page = block.page_num,
                        block = block.block_num,
                        "block emptied by filters"
                    );
                    None
                } else {
                    Some(block)
                }
            })
            .collect()
    }
}
