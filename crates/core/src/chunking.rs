use crate::error::IngestError;
use crate::models::{Chunk, ChunkStatistics, Extensions, Paragraph, Section};
use crate::tokenizer::SizeMeasure;
use tracing::{debug, info};

const PARAGRAPH_SEPARATOR: &str = "\n\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingConfig {
    pub max_chunk_size: usize,
    pub min_chunk_size: usize,
    /// Any non-zero value enables paragraph overlap between consecutive chunks.
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chunk_size: 1_000,
            min_chunk_size: 100,
            chunk_overlap: 50,
        }
    }
}

impl ChunkingConfig {
    pub fn validate(&self) -> Result<(), IngestError> {
        if self.max_chunk_size == 0 {
            return Err(IngestError::InvalidChunkConfig(
                "max_chunk_size must be positive".to_string(),
            ));
        }
        if self.min_chunk_size > self.max_chunk_size {
            return Err(IngestError::InvalidChunkConfig(format!(
                "min_chunk_size {} exceeds max_chunk_size {}",
                self.min_chunk_size, self.max_chunk_size
            )));
        }
        if self.chunk_overlap >= self.max_chunk_size {
            return Err(IngestError::InvalidChunkConfig(format!(
                "chunk_overlap {} must be below max_chunk_size {}",
                self.chunk_overlap, self.max_chunk_size
            )));
        }
        Ok(())
    }
}

pub fn make_chunk_id(doc_id: &str, chunk_index: u64) -> String {
    format!("{doc_id}_chunk_{chunk_index:06}")
}

#[derive(Debug, Clone)]
pub struct Chunker {
    config: ChunkingConfig,
    measure: SizeMeasure,
}

impl Chunker {
    pub fn new(config: ChunkingConfig, measure: SizeMeasure) -> Result<Self, IngestError> {
        config.validate()?;
        Ok(Self { config, measure })
    }

    pub fn config(&self) -> &ChunkingConfig {
        &self.config
    }

    pub fn measure(&self) -> &SizeMeasure {
        &self.measure
    }

    pub fn chunk(&self, sections: &[Section], doc_id: &str) -> Vec<Chunk> {
        self.chunk_with_extensions(sections, doc_id, &Extensions::new())
    }

    pub fn chunk_with_extensions(
        &self,
        sections: &[Section],
        doc_id: &str,
        extensions: &Extensions,
    ) -> Vec<Chunk> {
        let mut chunks = Vec::new();
        for section in sections {
            let mut emitter = ChunkEmitter {
                chunker: self,
                section,
                doc_id,
                extensions,
                chunks: &mut chunks,
            };
            emitter.chunk_section();
        }

        info!(
            doc_id,
            sections = sections.len(),
            chunk_count = chunks.len(),
            token_based = self.measure.is_token_based(),
            "chunked document"
        );
        chunks
    }

    pub fn statistics(&self, chunks: &[Chunk]) -> ChunkStatistics {
        chunk_statistics(chunks, self.measure.is_token_based())
    }

    fn joined_size(&self, sizes: usize, count: usize) -> usize {
        let separator = self.measure.measure(PARAGRAPH_SEPARATOR);
        sizes + separator * count.saturating_sub(1)
    }
}

struct ChunkEmitter<'a> {
    chunker: &'a Chunker,
    section: &'a Section,
    doc_id: &'a str,
    extensions: &'a Extensions,
    chunks: &'a mut Vec<Chunk>,
}

impl<'a> ChunkEmitter<'a> {
    fn chunk_section(&mut self) {
        let section = self.section;

        if section.is_empty() {
            if let Some(heading) = &section.heading {
                self.emit(heading.clone(), section.page_start, section.page_end);
            }
            return;
        }

        let text = section.text();
        let size = self.chunker.measure.measure(&text);
        if size <= self.chunker.config.max_chunk_size {
            self.emit(text, section.page_start, section.page_end);
            return;
        }

        debug!(
            doc_id = self.doc_id,
            heading = ?section.heading,
            size,
            "splitting oversized section"
        );
        self.split_paragraphs();
    }

    fn split_paragraphs(&mut self) {
        let max = self.chunker.config.max_chunk_size;
        let overlap_enabled = self.chunker.config.chunk_overlap > 0;

        let mut buffer: Vec<(&'a Paragraph, usize)> = Vec::new();
        let mut buffer_sizes = 0usize;

        for paragraph in &self.section.paragraphs {
            let size = self.chunker.measure.measure(&paragraph.text);
            let grown = self.chunker.joined_size(buffer_sizes + size, buffer.len() + 1);

            if !buffer.is_empty() && grown > max {
                self.emit_paragraphs(&buffer);

                let seeded = buffer
                    .last()
                    .copied()
                    .filter(|(_, last_size)| {
                        overlap_enabled && self.chunker.joined_size(last_size + size, 2) <= max
                    });

                buffer.clear();
                buffer_sizes = 0;
                if let Some((last, last_size)) = seeded {
                    buffer.push((last, last_size));
                    buffer_sizes += last_size;
                }
            }

            buffer.push((paragraph, size));
            buffer_sizes += size;
        }

        if !buffer.is_empty() {
            self.emit_paragraphs(&buffer);
        }
    }

    fn emit_paragraphs(&mut self, buffer: &[(&Paragraph, usize)]) {
        let text = buffer
            .iter()
            .map(|(paragraph, _)| paragraph.text.as_str())
            .collect::<Vec<_>>()
            .join(PARAGRAPH_SEPARATOR);
        let pages = buffer.iter().map(|(paragraph, _)| paragraph.page);
        let page_start = pages.clone().min().unwrap_or(self.section.page_start);
        let page_end = pages.max().unwrap_or(self.section.page_end);
        self.emit(text, page_start, page_end);
    }

    fn emit(&mut self, text: String, page_start: u32, page_end: u32) {
        let chunk_index = self.chunks.len() as u64;
        let token_count = if self.chunker.measure.is_token_based() {
            self.chunker.measure.measure(&text)
        } else {
            0
        };

        self.chunks.push(Chunk {
            chunk_id: make_chunk_id(self.doc_id, chunk_index),
            char_count: text.chars().count(),
            token_count,
            text,
            doc_id: self.doc_id.to_string(),
            page_start,
            page_end,
            chunk_index,
            heading: self.section.heading.clone(),
            level: self.section.level,
            extensions: self.extensions.clone(),
        });
    }
}

pub fn chunk_statistics(chunks: &[Chunk], token_based: bool) -> ChunkStatistics {
    if chunks.is_empty() {
        return ChunkStatistics::default();
    }

    let sizes: Vec<usize> = chunks
        .iter()
        .map(|chunk| {
            if token_based {
                chunk.token_count
            } else {
                chunk.char_count
            }
        })
        .collect();

    let mut levels: Vec<u8> = chunks.iter().map(|chunk| chunk.level).collect();
    levels.sort_unstable();
    levels.dedup();

    let total_size = sizes.iter().sum::<usize>();
    ChunkStatistics {
        total_chunks: chunks.len(),
        avg_chunk_size: total_size as f64 / chunks.len() as f64,
        min_chunk_size: sizes.iter().copied().min().unwrap_or_default(),
        max_chunk_size: sizes.iter().copied().max().unwrap_or_default(),
        total_size,
        levels,
        page_start: chunks.iter().map(|c| c.page_start).min().unwrap_or_default(),
        page_end: chunks.iter().map(|c| c.page_end).max().unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokenizer::WordCounter;
    use serde_json::json;

    fn words(count: usize, tag: &str) -> String {
        (0..count)
            .map(|index| format!("{tag}{index}"))
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn section(heading: Option<&str>, level: u8, paragraphs: &[(String, u32)]) -> Section {
        let pages = paragraphs.iter().map(|(_, page)| *page);
        Section {
            heading: heading.map(str::to_string),
            level,
            paragraphs: paragraphs
                .iter()
                .map(|(text, page)| Paragraph {
                    text: text.clone(),
                    page: *page,
                })
                .collect(),
            page_start: pages.clone().min().unwrap_or_default(),
            page_end: pages.max().unwrap_or_default(),
        }
    }

    fn word_chunker(max: usize, overlap: usize) -> Chunker {
        let config = ChunkingConfig {
            max_chunk_size: max,
            min_chunk_size: 0,
            chunk_overlap: overlap,
        };
        Chunker::new(config, SizeMeasure::tokens(WordCounter)).expect("valid config")
    }

    #[test]
    fn overlap_reintroduces_previous_paragraph() {
        let (p1, p2, p3) = (words(40, "a"), words(40, "b"), words(40, "c"));
        let sections = vec![section(
            Some("Scope"),
            1,
            &[(p1.clone(), 0), (p2.clone(), 0), (p3.clone(), 1)],
        )];

        let chunks = word_chunker(100, 20).chunk(&sections, "ds01");

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].text, format!("{p1}\n\n{p2}"));
        assert_eq!(chunks[0].token_count, 80);
        assert_eq!(chunks[1].text, format!("{p2}\n\n{p3}"));
        assert_eq!((chunks[1].page_start, chunks[1].page_end), (0, 1));
        assert_eq!(chunks[1].heading.as_deref(), Some("Scope"));
    }

    #[test]
    fn overlap_is_skipped_when_the_pair_would_overflow() {
        let (p1, p2, p3) = (words(60, "a"), words(60, "b"), words(50, "c"));
        let sections = vec![section(
            None,
            0,
            &[(p1.clone(), 0), (p2.clone(), 0), (p3.clone(), 0)],
        )];

        let chunks = word_chunker(100, 20).chunk(&sections, "doc");

        let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(texts, vec![p1.as_str(), p2.as_str(), p3.as_str()]);
        assert!(chunks.iter().all(|chunk| chunk.token_count <= 100));
    }

    #[test]
    fn small_section_is_emitted_verbatim() {
        let sections = vec![section(
            Some("Notes"),
            2,
            &[("Use gasket type B.".to_string(), 4), ("Torque to spec.".to_string(), 5)],
        )];

        let chunks = word_chunker(100, 10).chunk(&sections, "doc");

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "Use gasket type B.\n\nTorque to spec.");
        assert_eq!(chunks[0].char_count, chunks[0].text.chars().count());
        assert_eq!((chunks[0].page_start, chunks[0].page_end), (4, 5));
        assert_eq!(chunks[0].level, 2);
    }

    #[test]
    fn oversized_paragraph_becomes_its_own_chunk() {
        let (small, huge, tail) = (words(10, "s"), words(150, "h"), words(10, "t"));
        let sections = vec![section(
            None,
            0,
            &[(small.clone(), 0), (huge.clone(), 0), (tail.clone(), 0)],
        )];

        let chunks = word_chunker(100, 10).chunk(&sections, "doc");

        let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(texts, vec![small.as_str(), huge.as_str(), tail.as_str()]);
    }

    #[test]
    fn zero_overlap_never_duplicates_paragraphs() {
        let paragraphs: Vec<(String, u32)> = (0..6)
            .map(|i| (words(30, &format!("p{i}x")), 0))
            .collect();
        let sections = vec![section(None, 0, &paragraphs)];

        let chunks = word_chunker(100, 0).chunk(&sections, "doc");

        let rebuilt: Vec<String> = chunks
            .iter()
            .flat_map(|c| c.text.split("\n\n").map(str::to_string).collect::<Vec<_>>())
            .collect();
        let original: Vec<String> = paragraphs.into_iter().map(|(text, _)| text).collect();
        assert_eq!(rebuilt, original);
    }

    #[test]
    fn paragraphs_are_recovered_in_order_despite_overlap() {
        let paragraphs: Vec<(String, u32)> = [25, 60, 15, 45, 120, 30, 30, 30]
            .iter()
            .enumerate()
            .map(|(i, n)| (words(*n, &format!("p{i}x")), i as u32))
            .collect();
        let sections = vec![section(Some("Body"), 1, &paragraphs)];

        let chunks = word_chunker(100, 10).chunk(&sections, "doc");

        let mut rebuilt: Vec<String> = Vec::new();
        for chunk in &chunks {
            for paragraph in chunk.text.split("\n\n") {
                if rebuilt.last().map(String::as_str) != Some(paragraph) {
                    rebuilt.push(paragraph.to_string());
                }
            }
        }
        let original: Vec<String> = paragraphs.into_iter().map(|(text, _)| text).collect();
        assert_eq!(rebuilt, original);
    }

    #[test]
    fn non_final_chunks_respect_max_size_in_characters() -> Result<(), IngestError> {
        let paragraphs: Vec<(String, u32)> = [120, 300, 80, 500, 60, 60, 250, 90, 40]
            .iter()
            .enumerate()
            .map(|(i, n)| (format!("{i}").repeat(*n), 0))
            .collect();
        let config = ChunkingConfig {
            max_chunk_size: 400,
            min_chunk_size: 50,
            chunk_overlap: 40,
        };
        let chunker = Chunker::new(config, SizeMeasure::Characters)?;
        let chunks = chunker.chunk(&[section(None, 0, &paragraphs)], "doc");

        let (last, rest) = chunks.split_last().expect("chunks");
        assert!(last.char_count > 0);
        for chunk in rest {
            let single_paragraph = !chunk.text.contains("\n\n");
            assert!(
                chunk.char_count <= 400 || single_paragraph,
                "chunk {} has {} chars",
                chunk.chunk_id,
                chunk.char_count
            );
            assert_eq!(chunk.token_count, 0);
        }
        Ok(())
    }

    #[test]
    fn ids_are_unique_padded_and_ordered_across_sections() {
        let sections = vec![
            section(Some("A"), 1, &[(words(60, "a"), 0), (words(60, "b"), 0)]),
            section(Some("B"), 1, &[(words(10, "c"), 1)]),
            section(Some("C"), 2, &[]),
        ];

        let chunks = word_chunker(100, 0).chunk(&sections, "ds01");

        let ids: Vec<&str> = chunks.iter().map(|c| c.chunk_id.as_str()).collect();
        assert_eq!(
            ids,
            vec![
                "ds01_chunk_000000",
                "ds01_chunk_000001",
                "ds01_chunk_000002",
                "ds01_chunk_000003"
            ]
        );
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(sorted, ids);
        assert!(chunks.windows(2).all(|w| w[0].chunk_index < w[1].chunk_index));
        assert_eq!(chunks[3].text, "C");
    }

    #[test]
    fn extensions_are_copied_to_every_chunk() {
        let mut extensions = Extensions::new();
        extensions.insert("source".to_string(), json!("ds01.pdf"));
        let sections = vec![section(None, 0, &[("Only text".to_string(), 0)])];

        let chunks = word_chunker(100, 0).chunk_with_extensions(&sections, "doc", &extensions);

        assert_eq!(chunks[0].extensions.get("source"), Some(&json!("ds01.pdf")));
    }

    #[test]
    fn invalid_configs_are_rejected() {
        let bad = [(0, 0, 0), (10, 20, 0), (10, 1, 10)];
        for (max_chunk_size, min_chunk_size, chunk_overlap) in bad {
            let config = ChunkingConfig {
                max_chunk_size,
                min_chunk_size,
                chunk_overlap,
            };
            assert!(matches!(
                Chunker::new(config, SizeMeasure::Characters),
                Err(IngestError::InvalidChunkConfig(_))
            ));
        }
    }

    #[test]
    fn chunking_is_deterministic() {
        let sections = vec![section(
            Some("Spec"),
            1,
            &[(words(70, "x"), 0), (words(70, "y"), 0), (words(70, "z"), 1)],
        )];
        let chunker = word_chunker(100, 5);
        assert_eq!(chunker.chunk(&sections, "d"), chunker.chunk(&sections, "d"));
    }

    #[test]
    fn statistics_summarise_sizes_levels_and_pages() {
        let sections = vec![
            section(Some("A"), 1, &[(words(20, "a"), 2)]),
            section(Some("B"), 3, &[(words(40, "b"), 5)]),
        ];
        let chunker = word_chunker(100, 0);
        let stats = chunker.statistics(&chunker.chunk(&sections, "doc"));

        assert_eq!(stats.total_chunks, 2);
        assert_eq!(stats.min_chunk_size, 20);
        assert_eq!(stats.max_chunk_size, 40);
        assert_eq!(stats.avg_chunk_size, 30.0);
        assert_eq!(stats.levels, vec![1, 3]);
        assert_eq!((stats.page_start, stats.page_end), (2, 5));
    }
}
