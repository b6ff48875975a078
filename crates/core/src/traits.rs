use crate::error::{IndexError, IngestError};
use crate::models::{Chunk, PageSpans, SearchHit};

pub trait SpanSource {
    fn extract_spans(&self) -> Result<Vec<PageSpans>, IngestError>;
}

impl SpanSource for [PageSpans] {
    fn extract_spans(&self) -> Result<Vec<PageSpans>, IngestError> {
        Ok(self.to_vec())
    }
}

impl SpanSource for Vec<PageSpans> {
    fn extract_spans(&self) -> Result<Vec<PageSpans>, IngestError> {
        Ok(self.clone())
    }
}

pub trait TextFilter {
    fn apply(&self, text: &str) -> String;
}

impl<F> TextFilter for F
where
    F: Fn(&str) -> String,
{
    fn apply(&self, text: &str) -> String {
        self(text)
    }
}

pub trait KeywordIndex {
    fn index_chunks(&self, chunks: &[Chunk]) -> Result<(), IndexError>;

    fn search_keyword(&self, query: &str, top_k: usize, min_score: f64) -> Vec<SearchHit>;
}
