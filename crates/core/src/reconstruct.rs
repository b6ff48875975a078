use crate::error::IngestError;
use crate::models::{BBox, DocumentLayout, PageLayout, PageSpans, StructureType, TextBlock};
use std::cmp::Ordering;
use tracing::debug;

const HEADING1_RATIO: f64 = 1.30;
const HEADING2_RATIO: f64 = 1.15;
const HEADING3_RATIO: f64 = 1.05;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReconstructionOptions {
    /// Vertical distance (in PDF units) under which two blocks count as one line.
    /// Values `<= 0` disable the merge pass.
    pub merge_threshold: f64,
    pub fix_hyphenation: bool,
}

impl Default for ReconstructionOptions {
    fn default() -> Self {
        Self {
            merge_threshold: 10.0,
            fix_hyphenation: true,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct BlockReconstructor {
    options: ReconstructionOptions,
}

impl BlockReconstructor {
    pub fn new(options: ReconstructionOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &ReconstructionOptions {
        &self.options
    }

    pub fn reconstruct(&self, pages: &[PageSpans]) -> Result<Vec<TextBlock>, IngestError> {
        Ok(self.layout(pages)?.into_blocks())
    }

    /// Like [`BlockReconstructor::reconstruct`] but keeps page geometry and statistics.
    ///
    /// Structure classification uses the mean font size of the whole document, so a
    /// page holding only a title is still classified against body text elsewhere.
    pub fn layout(&self, pages: &[PageSpans]) -> Result<DocumentLayout, IngestError> {
        let mut per_page = Vec::with_capacity(pages.len());
        for page in pages {
            per_page.push(self.reconstruct_page_unclassified(page)?);
        }

        let mut all_blocks: Vec<TextBlock> = per_page.iter().flatten().cloned().collect();
        classify_structure(&mut all_blocks);

        let mut classified = all_blocks.into_iter();
        let mut layouts = Vec::with_capacity(pages.len());
        for (page, unclassified) in pages.iter().zip(per_page) {
            let blocks: Vec<TextBlock> = classified.by_ref().take(unclassified.len()).collect();
            layouts.push(PageLayout::new(page, blocks));
        }

        let layout = DocumentLayout::from_pages(layouts);
        debug!(
            pages = layout.pages.len(),
            total_blocks = layout.statistics.total_blocks,
            total_characters = layout.statistics.total_characters,
            "reconstructed document layout"
        );
        Ok(layout)
    }

    pub fn reconstruct_page(&self, page: &PageSpans) -> Result<Vec<TextBlock>, IngestError> {
        let mut blocks = self.reconstruct_page_unclassified(page)?;
        classify_structure(&mut blocks);
        Ok(blocks)
    }

    fn reconstruct_page_unclassified(
        &self,
        page: &PageSpans,
    ) -> Result<Vec<TextBlock>, IngestError> {
        let mut blocks = blocks_from_spans(page)?;
        let span_count = blocks.len();

        sort_by_reading_order(&mut blocks);

        if self.options.fix_hyphenation {
            blocks = fix_hyphenation(blocks, self.options.merge_threshold);
        }

        if self.options.merge_threshold > 0.0 {
            blocks = merge_nearby_blocks(blocks, self.options.merge_threshold);
        }

        sort_by_reading_order(&mut blocks);

        debug!(
            page = page.page_num,
            spans = span_count,
            blocks = blocks.len(),
            "reconstructed page blocks"
        );

        Ok(blocks)
    }
}

fn blocks_from_spans(page: &PageSpans) -> Result<Vec<TextBlock>, IngestError> {
    let mut blocks = Vec::with_capacity(page.spans.len());

    for span in &page.spans {
        let text = span.text.trim();
        if text.is_empty() {
            continue;
        }

        let bbox = BBox::from_array(span.bbox);
        if !bbox.is_well_formed() {
            return Err(IngestError::InvalidSpan {
                page: page.page_num,
                details: format!("malformed bbox {:?} for span {text:?}", span.bbox),
            });
        }

        blocks.push(TextBlock {
            text: text.to_string(),
            bbox,
            page_num: page.page_num,
            block_num: blocks.len() as u32,
            font_size: span
                .font_size
                .filter(|size| size.is_finite() && *size > 0.0),
            font_name: span
                .font_name
                .as_ref()
                .map(|name| name.trim().to_string())
                .filter(|name| !name.is_empty()),
            structure: StructureType::Unknown,
        });
    }

    Ok(blocks)
}

fn reading_order(left: &TextBlock, right: &TextBlock) -> Ordering {
    left.bbox
        .y0
        .total_cmp(&right.bbox.y0)
        .then_with(|| left.bbox.x0.total_cmp(&right.bbox.x0))
}

pub fn sort_by_reading_order(blocks: &mut [TextBlock]) {
    blocks.sort_by(reading_order);
}

/// Rejoins words split across lines by a trailing hyphen.
///
/// Only the immediate neighbour is inspected. The first token of the next block is
/// moved onto the hyphenated block; whatever remains of the next block survives as
/// its own block with its original bbox.
pub fn fix_hyphenation(blocks: Vec<TextBlock>, merge_threshold: f64) -> Vec<TextBlock> {
    let mut fixed = Vec::with_capacity(blocks.len());
    let mut iter = blocks.into_iter().peekable();

    while let Some(mut block) = iter.next() {
        let continues_on_next_line = block.text.ends_with('-')
            && iter
                .peek()
                .is_some_and(|next| (next.bbox.y0 - block.bbox.y0).abs() > merge_threshold);

        if continues_on_next_line {
            if let Some(next) = iter.next() {
                let (first, rest) = split_first_token(&next.text);
                block.text.pop();
                block.text.push_str(first);
                let rest = rest.to_string();
                fixed.push(block);

                if !rest.is_empty() {
                    fixed.push(TextBlock { text: rest, ..next });
                }
                continue;
            }
        }

        fixed.push(block);
    }

    fixed
}

fn split_first_token(text: &str) -> (&str, &str) {
    match text.split_once(char::is_whitespace) {
        Some((first, rest)) => (first, rest.trim_start()),
        None => (text, ""),
    }
}

pub fn merge_nearby_blocks(blocks: Vec<TextBlock>, merge_threshold: f64) -> Vec<TextBlock> {
    let mut merged = Vec::with_capacity(blocks.len());
    let mut iter = blocks.into_iter();
    let Some(mut current) = iter.next() else {
        return merged;
    };

    for next in iter {
        let y_distance = (current.bbox.y0 - next.bbox.y0).abs();
        let x_gap = next.bbox.x0 - current.bbox.x1;

        if y_distance < merge_threshold && x_gap < merge_threshold * 2.0 {
            current.text.push(' ');
            current.text.push_str(&next.text);
            current.bbox = current.bbox.union(&next.bbox);
        } else {
            merged.push(std::mem::replace(&mut current, next));
        }
    }

    merged.push(current);
    merged
}

pub fn classify_structure(blocks: &mut [TextBlock]) {
    let sizes: Vec<f64> = blocks.iter().filter_map(|block| block.font_size).collect();
    let mean = if sizes.is_empty() {
        None
    } else {
        Some(sizes.iter().sum::<f64>() / sizes.len() as f64)
    };

    for block in blocks.iter_mut() {
        block.structure = match (block.font_size, mean) {
            (Some(size), Some(mean)) => classify_font_size(size, mean),
            _ => StructureType::Unknown,
        };
    }
}

pub fn classify_font_size(size: f64, mean: f64) -> StructureType {
    if size > mean * HEADING1_RATIO {
        StructureType::Heading(1)
    } else if size > mean * HEADING2_RATIO {
        StructureType::Heading(2)
    } else if size > mean * HEADING3_RATIO {
        StructureType::Heading(3)
    } else {
        StructureType::Paragraph
    }
}
