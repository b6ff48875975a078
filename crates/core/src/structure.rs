use crate::error::IngestError;
use crate::models::{Paragraph, Section, StructureType, TextBlock};
use regex::Regex;

const MARKDOWN_HEADING: &str = r"^(#{1,6})(?:\s+(.*))?$";
const MARKDOWN_PAGE_MARKER: &str = r"<!--\s*Page\s+(\d+)";
const MARKDOWN_COMMENT: &str = r"^\s*<!--.*-->\s*$";
const MARKDOWN_BREAK: &str = r"^\s*(?:-{3,}|\*{3,}|_{3,})\s*$";
const FRONT_MATTER_FENCE: &str = "---";

#[derive(Debug)]
struct SectionBuilder {
    heading: Option<String>,
    level: u8,
    heading_page: Option<u32>,
    paragraphs: Vec<Paragraph>,
}

impl SectionBuilder {
    fn implicit() -> Self {
        Self {
            heading: None,
            level: 0,
            heading_page: None,
            paragraphs: Vec::new(),
        }
    }

    fn headed(heading: &str, level: u8, page: u32) -> Self {
        Self {
            heading: Some(heading.trim().to_string()),
            level,
            heading_page: Some(page),
            paragraphs: Vec::new(),
        }
    }

    fn push_text(&mut self, text: &str, page: u32) {
        self.paragraphs.extend(
            split_paragraphs(text).map(|paragraph| Paragraph {
                text: paragraph.to_string(),
                page,
            }),
        );
    }

    fn finish(self) -> Section {
        let pages = self.paragraphs.iter().map(|paragraph| paragraph.page);
        let (page_start, page_end) = match (pages.clone().min(), pages.max()) {
            (Some(start), Some(end)) => (start, end),
            _ => {
                let page = self.heading_page.unwrap_or_default();
                (page, page)
            }
        };

        Section {
            heading: self.heading,
            level: self.level,
            paragraphs: self.paragraphs,
            page_start,
            page_end,
        }
    }
}

fn split_paragraphs(text: &str) -> impl Iterator<Item = &str> {
    text.split("\n\n")
        .map(str::trim)
        .filter(|paragraph| !paragraph.is_empty())
}

pub fn group_sections(blocks: &[TextBlock]) -> Vec<Section> {
    let mut sections = Vec::new();
    let mut current: Option<SectionBuilder> = None;

    for block in blocks {
        match block.structure {
            StructureType::Heading(level) => {
                if let Some(finished) = current.take() {
                    sections.push(finished.finish());
                }
                current = Some(SectionBuilder::headed(&block.text, level, block.page_num));
            }
            StructureType::Paragraph | StructureType::Unknown => {
                current
                    .get_or_insert_with(SectionBuilder::implicit)
                    .push_text(&block.text, block.page_num);
            }
        }
    }

    if let Some(finished) = current {
        sections.push(finished.finish());
    }

    sections.retain(|section| section.heading.is_some() || !section.is_empty());
    sections
}

fn flush_lines(current: &mut Option<SectionBuilder>, lines: &mut Vec<&str>, page: u32) {
    if lines.is_empty() {
        return;
    }
    current
        .get_or_insert_with(SectionBuilder::implicit)
        .push_text(&lines.join("\n"), page);
    lines.clear();
}

// Leading `---` fenced block, only when a closing fence exists.
fn skip_front_matter(lines: &[&str]) -> usize {
    if lines.first().map(|line| line.trim()) != Some(FRONT_MATTER_FENCE) {
        return 0;
    }
    lines
        .iter()
        .skip(1)
        .position(|line| line.trim() == FRONT_MATTER_FENCE)
        .map_or(0, |closing| closing + 2)
}

/// Splits a Markdown rendering of a document into sections.
///
/// `#` lines open sections, `<!-- Page N -->` markers (1-based) move the page cursor,
/// blank lines end paragraphs. Front matter, other HTML comments and `---` breaks
/// carry no content.
pub fn sections_from_markdown(markdown: &str) -> Result<Vec<Section>, IngestError> {
    let heading_re = Regex::new(MARKDOWN_HEADING)?;
    let page_re = Regex::new(MARKDOWN_PAGE_MARKER)?;
    let comment_re = Regex::new(MARKDOWN_COMMENT)?;
    let break_re = Regex::new(MARKDOWN_BREAK)?;

    let mut sections = Vec::new();
    let mut current: Option<SectionBuilder> = None;
    let mut lines: Vec<&str> = Vec::new();
    let mut page = 0u32;

    let all_lines: Vec<&str> = markdown.lines().collect();
    let body = &all_lines[skip_front_matter(&all_lines)..];

    for &line in body {
        if let Some(captures) = page_re.captures(line) {
            flush_lines(&mut current, &mut lines, page);
            if let Some(number) = captures.get(1).and_then(|m| m.as_str().parse::<u32>().ok()) {
                page = number.saturating_sub(1);
            }
            continue;
        }

        if comment_re.is_match(line) {
            continue;
        }

        if break_re.is_match(line) {
            flush_lines(&mut current, &mut lines, page);
            continue;
        }

        if let Some(captures) = heading_re.captures(line) {
            flush_lines(&mut current, &mut lines, page);
            if let Some(finished) = current.take() {
                sections.push(finished.finish());
            }
            let level = captures.get(1).map_or(1, |m| m.as_str().len()) as u8;
            let heading = captures.get(2).map_or("", |m| m.as_str());
            current = Some(SectionBuilder::headed(heading, level, page));
            continue;
        }

        if line.trim().is_empty() {
            flush_lines(&mut current, &mut lines, page);
            continue;
        }

        lines.push(line);
    }

    flush_lines(&mut current, &mut lines, page);
    if let Some(finished) = current {
        sections.push(finished.finish());
    }

    Ok(sections)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::BBox;

    fn block(text: &str, page_num: u32, structure: StructureType) -> TextBlock {
        TextBlock {
            text: text.to_string(),
            bbox: BBox::from_array([0.0, 0.0, 10.0, 10.0]),
            page_num,
            block_num: 0,
            font_size: None,
            font_name: None,
            structure,
        }
    }

    #[test]
    fn no_blocks_means_no_sections() {
        assert!(group_sections(&[]).is_empty());
    }

    #[test]
    fn content_before_first_heading_forms_implicit_section() {
        let sections = group_sections(&[
            block("Document no. 4000-DS-01", 0, StructureType::Paragraph),
            block("1 Scope", 0, StructureType::Heading(1)),
            block("This data sheet covers the compressor.", 0, StructureType::Paragraph),
            block("Rev 0E", 1, StructureType::Unknown),
            block("1.1 Design", 2, StructureType::Heading(2)),
            block("Design pressure 42 barg.", 3, StructureType::Paragraph),
        ]);

        assert_eq!(sections.len(), 3);
        assert_eq!(sections[0].heading, None);
        assert_eq!(sections[0].level, 0);
        assert_eq!(sections[1].heading.as_deref(), Some("1 Scope"));
        assert_eq!(sections[1].level, 1);
        assert_eq!(sections[1].paragraphs.len(), 2);
        assert_eq!((sections[1].page_start, sections[1].page_end), (0, 1));
        assert_eq!(sections[2].level, 2);
        assert_eq!((sections[2].page_start, sections[2].page_end), (3, 3));
    }

    #[test]
    fn heading_without_content_keeps_its_page() {
        let sections = group_sections(&[
            block("Appendix", 7, StructureType::Heading(1)),
            block("Notes", 8, StructureType::Heading(2)),
            block("See drawing.", 8, StructureType::Paragraph),
        ]);

        assert_eq!(sections.len(), 2);
        assert!(sections[0].is_empty());
        assert_eq!((sections[0].page_start, sections[0].page_end), (7, 7));
    }

    #[test]
    fn blank_lines_inside_a_block_split_paragraphs() {
        let sections = group_sections(&[block(
            "First part.\n\nSecond part.",
            0,
            StructureType::Paragraph,
        )]);
        assert_eq!(sections[0].paragraphs.len(), 2);
        assert_eq!(sections[0].text(), "First part.\n\nSecond part.");
    }

    #[test]
    fn markdown_front_matter_comments_and_breaks_are_not_content() -> Result<(), IngestError> {
        let markdown = concat!(
            "---\nsource: ds.pdf\ntotal_pages: 2\n---\n\n",
            "<!-- Page 1 -->\n\n# Scope\n<!-- bbox:[1, 2, 3, 4] -->\n\nPumps only.\n\n",
            "---\n\n<!-- Page 2 -->\n\nValves too.\n",
        );
        let sections = sections_from_markdown(markdown)?;

        assert_eq!(sections.len(), 1);
        let texts: Vec<&str> = sections[0].paragraphs.iter().map(|p| p.text.as_str()).collect();
        assert_eq!(texts, vec!["Pumps only.", "Valves too."]);
        assert_eq!((sections[0].page_start, sections[0].page_end), (0, 1));
        Ok(())
    }

    #[test]
    fn unclosed_leading_rule_is_not_front_matter() -> Result<(), IngestError> {
        let sections = sections_from_markdown("---\nIntro text.\n")?;
        assert_eq!(sections[0].paragraphs[0].text, "Intro text.");
        Ok(())
    }

    #[test]
    fn markdown_headings_and_page_markers_are_parsed() -> Result<(), IngestError> {
        let markdown = concat!(
            "Preamble line\n\n",
            "# Scope\n<!-- Page 2 -->\nCovers pumps.\nAnd valves.\n\n",
            "## Limits\n<!-- Page 3 -->\nMax 10 bar.\n",
        );
        let sections = sections_from_markdown(markdown)?;

        assert_eq!(sections.len(), 3);
        assert_eq!(sections[0].heading, None);
        assert_eq!(sections[0].paragraphs[0].text, "Preamble line");
        assert_eq!(sections[1].heading.as_deref(), Some("Scope"));
        assert_eq!(sections[1].paragraphs[0].text, "Covers pumps.\nAnd valves.");
        assert_eq!((sections[1].page_start, sections[1].page_end), (1, 1));
        assert_eq!(sections[2].level, 2);
        assert_eq!(sections[2].page_start, 2);
        Ok(())
    }
}
