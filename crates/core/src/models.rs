use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub type Extensions = BTreeMap<String, serde_json::Value>;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Span {
    pub text: String,
    pub bbox: [f64; 4],
    #[serde(default)]
    pub font_size: Option<f64>,
    #[serde(default)]
    pub font_name: Option<String>,
}

impl Span {
    pub fn new(text: impl Into<String>, bbox: [f64; 4]) -> Self {
        Self {
            text: text.into(),
            bbox,
            font_size: None,
            font_name: None,
        }
    }

    pub fn with_font(mut self, size: f64, name: impl Into<String>) -> Self {
        self.font_size = Some(size);
        self.font_name = Some(name.into());
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PageSpans {
    pub page_num: u32,
    pub width: f64,
    pub height: f64,
    #[serde(default)]
    pub rotation: i32,
    pub spans: Vec<Span>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct BBox {
    pub x0: f64,
    pub y0: f64,
    pub x1: f64,
    pub y1: f64,
}

impl BBox {
    pub fn from_array(coords: [f64; 4]) -> Self {
        Self {
            x0: coords[0],
            y0: coords[1],
            x1: coords[2],
            y1: coords[3],
        }
    }

    pub fn union(&self, other: &BBox) -> BBox {
        BBox {
            x0: self.x0.min(other.x0),
            y0: self.y0.min(other.y0),
            x1: self.x1.max(other.x1),
            y1: self.y1.max(other.y1),
        }
    }

    pub fn is_well_formed(&self) -> bool {
        [self.x0, self.y0, self.x1, self.y1]
            .iter()
            .all(|value| value.is_finite())
            && self.x0 < self.x1
            && self.y0 < self.y1
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(tag = "type", content = "level", rename_all = "snake_case")]
pub enum StructureType {
    Heading(u8),
    Paragraph,
    Unknown,
}

impl StructureType {
    pub fn heading_level(&self) -> Option<u8> {
        match self {
            StructureType::Heading(level) => Some(*level),
            StructureType::Paragraph | StructureType::Unknown => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TextBlock {
    pub text: String,
    pub bbox: BBox,
    pub page_num: u32,
    pub block_num: u32,
    pub font_size: Option<f64>,
    pub font_name: Option<String>,
    pub structure: StructureType,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PageLayout {
    pub page_num: u32,
    pub width: f64,
    pub height: f64,
    pub rotation: i32,
    pub blocks: Vec<TextBlock>,
    pub block_count: usize,
    pub char_count: usize,
    pub full_text: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
pub struct LayoutStatistics {
    pub total_blocks: usize,
    pub total_characters: usize,
    pub avg_blocks_per_page: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DocumentLayout {
    pub pages: Vec<PageLayout>,
    pub statistics: LayoutStatistics,
}

impl PageLayout {
    pub fn new(page: &PageSpans, blocks: Vec<TextBlock>) -> Self {
        let mut layout = Self {
            page_num: page.page_num,
            width: page.width,
            height: page.height,
            rotation: page.rotation,
            blocks: Vec::new(),
            block_count: 0,
            char_count: 0,
            full_text: String::new(),
        };
        layout.set_blocks(blocks);
        layout
    }

    pub fn set_blocks(&mut self, blocks: Vec<TextBlock>) {
        self.full_text = blocks
            .iter()
            .map(|block| block.text.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        self.char_count = self.full_text.chars().count();
        self.block_count = blocks.len();
        self.blocks = blocks;
    }
}

impl DocumentLayout {
    pub fn from_pages(pages: Vec<PageLayout>) -> Self {
        let total_blocks = pages.iter().map(|page| page.block_count).sum::<usize>();
        let total_characters = pages.iter().map(|page| page.char_count).sum::<usize>();
        let avg_blocks_per_page = if pages.is_empty() {
            0.0
        } else {
            total_blocks as f64 / pages.len() as f64
        };

        Self {
            pages,
            statistics: LayoutStatistics {
                total_blocks,
                total_characters,
                avg_blocks_per_page,
            },
        }
    }

    pub fn into_blocks(self) -> Vec<TextBlock> {
        self.pages.into_iter().flat_map(|page| page.blocks).collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Paragraph {
    pub text: String,
    pub page: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Section {
    pub heading: Option<String>,
    pub level: u8,
    pub paragraphs: Vec<Paragraph>,
    pub page_start: u32,
    pub page_end: u32,
}

impl Section {
    pub fn text(&self) -> String {
        self.paragraphs
            .iter()
            .map(|paragraph| paragraph.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    pub fn is_empty(&self) -> bool {
        self.paragraphs.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    pub chunk_id: String,
    pub text: String,
    pub doc_id: String,
    pub page_start: u32,
    pub page_end: u32,
    pub char_count: usize,
    pub token_count: usize,
    pub chunk_index: u64,
    pub heading: Option<String>,
    pub level: u8,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extensions: Extensions,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ChunkStatistics {
    pub total_chunks: usize,
    pub avg_chunk_size: f64,
    pub min_chunk_size: usize,
    pub max_chunk_size: usize,
    pub total_size: usize,
    pub levels: Vec<u8>,
    pub page_start: u32,
    pub page_end: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChunkMetadata {
    pub chunk_id: String,
    pub doc_id: String,
    pub page_start: u32,
    pub page_end: u32,
    pub heading: Option<String>,
    pub level: u8,
}

impl From<&Chunk> for ChunkMetadata {
    fn from(chunk: &Chunk) -> Self {
        Self {
            chunk_id: chunk.chunk_id.clone(),
            doc_id: chunk.doc_id.clone(),
            page_start: chunk.page_start,
            page_end: chunk.page_end,
            heading: chunk.heading.clone(),
            level: chunk.level,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchHit {
    pub text: String,
    pub score: f64,
    pub metadata: ChunkMetadata,
    pub rank: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum IndexStatistics {
    Empty,
    Built {
        num_documents: usize,
        avg_doc_length: f64,
        min_doc_length: usize,
        max_doc_length: usize,
        total_tokens: usize,
        unique_tokens: usize,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    Vector,
    Scanned,
    Mixed { text_pages: Vec<u32> },
}

impl DocumentKind {
    pub fn admits_page(&self, page_num: u32) -> bool {
        match self {
            DocumentKind::Vector => true,
            DocumentKind::Scanned => false,
            DocumentKind::Mixed { text_pages } => text_pages.contains(&page_num),
        }
    }
}
