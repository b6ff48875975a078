use crate::error::Result;
use crate::models::{DocumentLayout, PageLayout, TextBlock};
use regex::Regex;
use std::fs;
use std::path::Path;
use tracing::info;

const NUMBERED_ITEM: &str = r"^(\d+)[.)]\s*";
const BULLET_ITEM: &str = r"^[-•*]\s*";
const NUMBERED_ITEM_START: &str = r"^\d+[.)]\s+";
const BULLET_ITEM_START: &str = r"^[-•*]\s+";
const PAGE_BREAK: &str = "---";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkdownOptions {
    pub source: Option<String>,
    pub add_page_breaks: bool,
    pub preserve_bbox: bool,
    pub preserve_fonts: bool,
}

impl Default for MarkdownOptions {
    fn default() -> Self {
        Self {
            source: None,
            add_page_breaks: true,
            preserve_bbox: false,
            preserve_fonts: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MarkdownRenderer {
    options: MarkdownOptions,
    numbered_item: Regex,
    bullet_item: Regex,
    numbered_start: Regex,
    bullet_start: Regex,
}

impl MarkdownRenderer {
    pub fn new(options: MarkdownOptions) -> Result<Self> {
        Ok(Self {
            options,
            numbered_item: Regex::new(NUMBERED_ITEM)?,
            bullet_item: Regex::new(BULLET_ITEM)?,
            numbered_start: Regex::new(NUMBERED_ITEM_START)?,
            bullet_start: Regex::new(BULLET_ITEM_START)?,
        })
    }

    pub fn options(&self) -> &MarkdownOptions {
        &self.options
    }

    pub fn render(&self, layout: &DocumentLayout) -> String {
        let mut parts = Vec::with_capacity(layout.pages.len() * 2 + 1);

        if let Some(source) = &self.options.source {
            parts.push(format!(
                "---\nsource: {source}\ntotal_pages: {}\n\
                 total_blocks: {}\ntotal_characters: {}\n---",
                layout.pages.len(),
                layout.statistics.total_blocks,
                layout.statistics.total_characters
            ));
        }

        for (position, page) in layout.pages.iter().enumerate() {
            if position > 0 && self.options.add_page_breaks {
                parts.push(PAGE_BREAK.to_string());
            }
            parts.push(self.render_page(page));
        }

        parts.join("\n\n")
    }

    pub fn render_page(&self, page: &PageLayout) -> String {
        let mut parts = vec![format!("<!-- Page {} -->", page.page_num + 1)];
        if self.options.preserve_bbox {
            parts.push(format!("<!-- Dimensions: {}x{} -->", page.width, page.height));
        }

        for block in &page.blocks {
            let rendered = match block.structure.heading_level() {
                Some(level) => self.render_heading(block, level),
                None => self.render_paragraph(block),
            };
            if !rendered.is_empty() {
                parts.push(rendered);
            }
        }

        parts.join("\n\n")
    }

    fn render_heading(&self, block: &TextBlock, level: u8) -> String {
        let text = block.text.split_whitespace().collect::<Vec<_>>().join(" ");
        if text.is_empty() {
            return String::new();
        }

        let marks = "#".repeat(usize::from(level.clamp(1, 6)));
        match self.block_comment(block) {
            Some(comment) => format!("{marks} {text}\n{comment}"),
            None => format!("{marks} {text}"),
        }
    }

    fn render_paragraph(&self, block: &TextBlock) -> String {
        let text = block.text.trim();
        if text.is_empty() {
            return String::new();
        }

        let text = self.format_list_item(text);
        match self.block_comment(block) {
            Some(comment) => format!("{comment}\n{text}"),
            None => text,
        }
    }

    pub fn format_list_item(&self, text: &str) -> String {
        if self.numbered_start.is_match(text) {
            self.numbered_item.replace(text, "$1. ").into_owned()
        } else if self.bullet_start.is_match(text) {
            self.bullet_item.replace(text, "- ").into_owned()
        } else {
            text.to_string()
        }
    }

    fn block_comment(&self, block: &TextBlock) -> Option<String> {
        let mut fields = Vec::new();
        if self.options.preserve_bbox {
            let b = &block.bbox;
            fields.push(format!("bbox:[{}, {}, {}, {}]", b.x0, b.y0, b.x1, b.y1));
        }
        if self.options.preserve_fonts {
            if let Some(size) = block.font_size {
                fields.push(format!("size:{size}"));
            }
            if let Some(name) = &block.font_name {
                fields.push(format!("font:{name}"));
            }
        }

        if fields.is_empty() {
            None
        } else {
            Some(format!("<!-- {} -->", fields.join(", ")))
        }
    }
}

pub fn write_markdown(path: &Path, markdown: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, markdown)?;
    info!(path = %path.display(), bytes = markdown.len(), "saved markdown");
    Ok(())
}
