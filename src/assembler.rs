use anyhow::{anyhow, Result};
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, ObjectId, Stream};
use std::collections::BTreeMap;
use std::path::Path;
use tokio::fs;
use tracing::{debug, info};

use crate::crawler::PageRecord;

const TOC_PAGE_WIDTH: f32 = 595.0;
const TOC_PAGE_HEIGHT: f32 = 842.0;
const TOC_LEFT_MARGIN: f32 = 50.0;
const TOC_TITLE_Y: f32 = 800.0;
const TOC_FIRST_ENTRY_Y: f32 = 750.0;
const TOC_BOTTOM_MARGIN: f32 = 50.0;
const TOC_LINE_HEIGHT: f32 = 20.0;
const TOC_TITLE_FONT_SIZE: f32 = 16.0;
const TOC_ENTRY_FONT_SIZE: f32 = 12.0;
const TOC_MAX_TITLE_CHARS: usize = 60;

/// Merges rendered page PDFs in crawl order behind a generated table of
/// contents whose entries jump to the first page of each section.
pub struct PdfAssembler;

impl PdfAssembler {
    pub fn new() -> Self {
        Self
    }

    /// Builds the combined document and writes it atomically: the bytes go
    /// to a sibling temp file first and are renamed into place, so a failed
    /// merge never leaves a partial file at `output_path`.
    pub async fn assemble(&self, records: &[PageRecord], output_path: &Path) -> Result<()> {
        if records.is_empty() {
            return Err(anyhow!("No pages to assemble"));
        }

        info!("Assembling {} page(s) behind a table of contents", records.len());

        let mut documents = Vec::with_capacity(records.len());
        for record in records {
            let data = fs::read(&record.pdf_path).await.map_err(|e| {
                anyhow!("Failed to read PDF file {}: {}", record.pdf_path.display(), e)
            })?;
            let document = Document::load_mem(&data).map_err(|e| {
                anyhow!("Failed to parse PDF file {}: {}", record.pdf_path.display(), e)
            })?;
            debug!(
                "Loaded {} page(s) from {}",
                document.get_pages().len(),
                record.pdf_path.display()
            );
            documents.push(document);
        }

        // Stage 1: lay the TOC out. Its own page count must be known before
        // any destination offset can be fixed.
        let labels: Vec<String> = records.iter().map(entry_label).collect();
        let layout = TocLayout::compute(&labels);

        // Stage 2: each section starts after the TOC plus all prior sections.
        let mut dest_pages = Vec::with_capacity(documents.len());
        let mut next_page = layout.page_count;
        for document in &documents {
            dest_pages.push(next_page);
            next_page += document.get_pages().len();
        }

        // Stage 3: render the TOC, splice everything together, then wire up
        // the entry links against final page positions.
        let toc_document = layout.render()?;
        let mut merged = merge_documents(toc_document, documents)?;
        add_toc_links(&mut merged, &layout, &dest_pages)?;

        let mut data = Vec::new();
        merged
            .save_to(&mut data)
            .map_err(|e| anyhow!("Failed to serialize merged PDF: {}", e))?;

        let tmp_path = output_path.with_extension("pdf.tmp");
        fs::write(&tmp_path, &data)
            .await
            .map_err(|e| anyhow!("Failed to write merged PDF to {}: {}", tmp_path.display(), e))?;
        fs::rename(&tmp_path, output_path).await.map_err(|e| {
            anyhow!(
                "Failed to move merged PDF into place at {}: {}",
                output_path.display(),
                e
            )
        })?;

        info!(
            "Combined PDF with {} page(s) saved to {}",
            next_page,
            output_path.display()
        );
        Ok(())
    }
}

impl Default for PdfAssembler {
    fn default() -> Self {
        Self::new()
    }
}

fn entry_label(record: &PageRecord) -> String {
    let title = if record.title.is_empty() {
        record.url.as_str()
    } else {
        record.title.as_str()
    };
    let title = if title.chars().count() > TOC_MAX_TITLE_CHARS {
        let shortened: String = title.chars().take(TOC_MAX_TITLE_CHARS - 3).collect();
        format!("{}...", shortened)
    } else {
        title.to_string()
    };
    format!("{}. {}", record.index + 1, title)
}

struct TocSlot {
    label: String,
    /// TOC page (0-based) the entry is drawn on.
    page_index: usize,
    /// Clickable region around the entry text, in page coordinates.
    rect: [f32; 4],
}

struct TocLayout {
    page_count: usize,
    entries: Vec<TocSlot>,
}

impl TocLayout {
    fn compute(labels: &[String]) -> Self {
        let mut entries = Vec::with_capacity(labels.len());
        let mut page_index = 0usize;
        let mut y = TOC_FIRST_ENTRY_Y;

        for label in labels {
            let width = text_width(label, TOC_ENTRY_FONT_SIZE);
            entries.push(TocSlot {
                label: label.clone(),
                page_index,
                rect: [
                    TOC_LEFT_MARGIN,
                    y - 2.0,
                    TOC_LEFT_MARGIN + width,
                    y + 10.0,
                ],
            });
            y -= TOC_LINE_HEIGHT;
            if y < TOC_BOTTOM_MARGIN {
                page_index += 1;
                y = TOC_FIRST_ENTRY_Y;
            }
        }

        let page_count = entries.last().map(|slot| slot.page_index + 1).unwrap_or(1);
        Self { page_count, entries }
    }

    fn render(&self) -> Result<Document> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();

        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
        });
        let resources_id = doc.add_object(dictionary! {
            "Font" => dictionary! { "F1" => font_id },
        });

        let mut kids: Vec<Object> = Vec::with_capacity(self.page_count);
        for page_index in 0..self.page_count {
            let mut operations = Vec::new();
            if page_index == 0 {
                operations.extend(text_ops(
                    "Table of Contents",
                    200.0,
                    TOC_TITLE_Y,
                    TOC_TITLE_FONT_SIZE,
                ));
            }
            for slot in self.entries.iter().filter(|s| s.page_index == page_index) {
                operations.extend(text_ops(
                    &slot.label,
                    TOC_LEFT_MARGIN,
                    slot.rect[1] + 2.0,
                    TOC_ENTRY_FONT_SIZE,
                ));
            }

            let content = Content { operations };
            let encoded = content
                .encode()
                .map_err(|e| anyhow!("Failed to encode TOC content: {}", e))?;
            let content_id = doc.add_object(Stream::new(dictionary! {}, encoded));

            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "MediaBox" => vec![
                    0.into(),
                    0.into(),
                    TOC_PAGE_WIDTH.into(),
                    TOC_PAGE_HEIGHT.into(),
                ],
                "Resources" => resources_id,
                "Contents" => content_id,
            });
            kids.push(page_id.into());
        }

        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Count" => self.page_count as i64,
                "Kids" => kids,
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        Ok(doc)
    }
}

fn text_ops(text: &str, x: f32, y: f32, size: f32) -> Vec<Operation> {
    vec![
        Operation::new("BT", vec![]),
        Operation::new("Tf", vec!["F1".into(), size.into()]),
        Operation::new("Td", vec![x.into(), y.into()]),
        Operation::new("Tj", vec![Object::string_literal(text)]),
        Operation::new("ET", vec![]),
    ]
}

// Approximate Helvetica advance; only has to keep the hotspot over the text.
fn text_width(text: &str, size: f32) -> f32 {
    text.chars().count() as f32 * size * 0.5
}

/// Splices every document's pages onto the base (TOC) page tree, in order.
/// Adapted object numbering keeps imported ids from colliding.
fn merge_documents(mut base: Document, others: Vec<Document>) -> Result<Document> {
    let mut all_page_ids: Vec<ObjectId> = base.get_pages().into_values().collect();
    let mut max_id = base.max_id;

    for mut document in others {
        document.renumber_objects_with(max_id + 1);
        max_id = document.max_id;

        let pages = document.get_pages();
        for (object_id, object) in document.objects.iter() {
            base.objects.insert(*object_id, object.clone());
        }
        for (_, page_id) in pages {
            all_page_ids.push(page_id);
        }
    }
    base.max_id = max_id;

    let pages_id = base_pages_id(&base)?;

    // Re-parent imported pages onto the merged tree. Chromium output carries
    // MediaBox and Resources on each page, so nothing inherited is lost.
    for page_id in &all_page_ids {
        if let Ok(Object::Dictionary(page_dict)) = base.get_object_mut(*page_id) {
            page_dict.set("Parent", Object::Reference(pages_id));
        }
    }

    let count = all_page_ids.len() as i64;
    if let Ok(Object::Dictionary(pages_dict)) = base.get_object_mut(pages_id) {
        pages_dict.set(
            "Kids",
            Object::Array(all_page_ids.into_iter().map(Object::Reference).collect()),
        );
        pages_dict.set("Count", Object::Integer(count));
    }

    Ok(base)
}

fn base_pages_id(document: &Document) -> Result<ObjectId> {
    let catalog = document
        .catalog()
        .map_err(|e| anyhow!("Merged PDF has no catalog: {}", e))?;
    match catalog.get(b"Pages") {
        Ok(Object::Reference(id)) => Ok(*id),
        _ => Err(anyhow!("Merged PDF catalog has no page tree")),
    }
}

/// Attaches one /Link annotation per TOC entry, each carrying a /GoTo action
/// that lands on the first page of the entry's section. Every entry must
/// resolve; a dangling destination fails the whole assembly.
fn add_toc_links(document: &mut Document, layout: &TocLayout, dest_pages: &[usize]) -> Result<()> {
    let pages: Vec<ObjectId> = document.get_pages().into_values().collect();

    let mut annots_by_page: BTreeMap<usize, Vec<Object>> = BTreeMap::new();
    for (slot, &dest) in layout.entries.iter().zip(dest_pages) {
        let target = *pages
            .get(dest)
            .ok_or_else(|| anyhow!("TOC destination page {} is out of range", dest + 1))?;

        let annotation_id = document.add_object(dictionary! {
            "Type" => "Annot",
            "Subtype" => "Link",
            "Rect" => vec![
                slot.rect[0].into(),
                slot.rect[1].into(),
                slot.rect[2].into(),
                slot.rect[3].into(),
            ],
            "Border" => vec![0.into(), 0.into(), 0.into()],
            "H" => "I",
            "A" => dictionary! {
                "S" => "GoTo",
                "D" => vec![Object::Reference(target), "Fit".into()],
            },
        });
        annots_by_page
            .entry(slot.page_index)
            .or_default()
            .push(Object::Reference(annotation_id));
    }

    for (page_index, annotations) in annots_by_page {
        let page_id = *pages
            .get(page_index)
            .ok_or_else(|| anyhow!("TOC page {} is out of range", page_index + 1))?;
        match document.get_object_mut(page_id) {
            Ok(Object::Dictionary(page_dict)) => {
                page_dict.set("Annots", Object::Array(annotations));
            }
            _ => return Err(anyhow!("TOC page {} is not a dictionary", page_index + 1)),
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("{}. Page", i + 1)).collect()
    }

    #[test]
    fn layout_fits_36_entries_per_page() {
        let layout = TocLayout::compute(&labels(36));
        assert_eq!(layout.page_count, 1);

        let layout = TocLayout::compute(&labels(37));
        assert_eq!(layout.page_count, 2);
        assert_eq!(layout.entries[35].page_index, 0);
        assert_eq!(layout.entries[36].page_index, 1);
    }

    #[test]
    fn layout_restarts_at_the_top_of_each_page() {
        let layout = TocLayout::compute(&labels(37));
        assert_eq!(layout.entries[0].rect[1], TOC_FIRST_ENTRY_Y - 2.0);
        assert_eq!(layout.entries[36].rect[1], TOC_FIRST_ENTRY_Y - 2.0);
    }

    #[test]
    fn empty_layout_still_occupies_one_page() {
        let layout = TocLayout::compute(&[]);
        assert_eq!(layout.page_count, 1);
    }

    #[test]
    fn long_titles_are_truncated_in_labels() {
        let record = PageRecord {
            url: "https://example.com/x".into(),
            title: "t".repeat(80),
            pdf_path: "unused.pdf".into(),
            index: 0,
        };
        let label = entry_label(&record);
        assert!(label.ends_with("..."));
        // "1. " prefix plus 57 kept chars plus the ellipsis
        assert_eq!(label.chars().count(), 3 + 57 + 3);
    }

    #[test]
    fn empty_title_falls_back_to_url() {
        let record = PageRecord {
            url: "https://example.com/x".into(),
            title: String::new(),
            pdf_path: "unused.pdf".into(),
            index: 2,
        };
        assert_eq!(entry_label(&record), "3. https://example.com/x");
    }
}
