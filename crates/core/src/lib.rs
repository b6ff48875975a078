pub mod chunking;
pub mod error;
pub mod index;
pub mod markdown;
pub mod models;
pub mod pipeline;
pub mod reconstruct;
pub mod structure;
pub mod tokenizer;
pub mod traits;

pub use chunking::{chunk_statistics, make_chunk_id, Chunker, ChunkingConfig};
pub use error::{IndexError, IngestError};
pub use index::{tokenize, Bm25Index, Bm25Params, Indexer, SnapshotConfig};
pub use markdown::{write_markdown, MarkdownOptions, MarkdownRenderer};
pub use models::{
    BBox, Chunk, ChunkMetadata, ChunkStatistics, DocumentKind, DocumentLayout, Extensions,
    IndexStatistics, LayoutStatistics, PageLayout, PageSpans, Paragraph, SearchHit, Section,
    Span, StructureType, TextBlock,
};
pub use pipeline::{
    derive_doc_id, DocumentPipeline, IngestionReport, PipelineOptions, SkippedDocument,
    SourceDocument,
};
pub use reconstruct::{BlockReconstructor, ReconstructionOptions};
pub use structure::{group_sections, sections_from_markdown};
#[cfg(feature = "hf-tokenizer")]
pub use tokenizer::HfTokenCounter;
pub use tokenizer::{SizeMeasure, TokenCounter, WordCounter};
pub use traits::{KeywordIndex, SpanSource, TextFilter};
