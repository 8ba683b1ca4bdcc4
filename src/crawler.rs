use anyhow::{anyhow, Result};
use colored::*;
use scraper::{Html, Selector};
use sha2::{Digest, Sha256};
use slug::slugify;
use std::collections::{HashSet, VecDeque};
use std::path::PathBuf;
use tokio::fs;
use tracing::{info, warn};
use url::Url;

use crate::links::extract_links;
use crate::renderer::PageRenderer;

/// A discovered URL waiting to be rendered. Consumed once when dequeued.
#[derive(Debug, Clone)]
struct CrawlTask {
    url: Url,
    depth: usize,
}

/// One successfully rendered page. `index` is the discovery order and fixes
/// the page's position in the final document and its TOC entry.
#[derive(Debug, Clone)]
pub struct PageRecord {
    pub url: String,
    pub title: String,
    pub pdf_path: PathBuf,
    pub index: usize,
}

pub struct Crawler {
    out_dir: PathBuf,
    max_depth: usize,
    exclusions: HashSet<String>,
}

impl Crawler {
    pub fn new(out_dir: PathBuf, max_depth: usize, exclusions: Vec<String>) -> Self {
        Self {
            out_dir,
            max_depth,
            exclusions: exclusions.into_iter().collect(),
        }
    }

    /// Breadth-first crawl from `root`, rendering each page and saving its
    /// PDF into the working directory. Returns records in discovery order.
    ///
    /// A render failure on the root page aborts the run; failures on any
    /// other page are logged and the page is omitted.
    pub async fn crawl<R: PageRenderer>(&self, renderer: &R, root: &Url) -> Result<Vec<PageRecord>> {
        fs::create_dir_all(&self.out_dir)
            .await
            .map_err(|e| anyhow!("Failed to create {}: {}", self.out_dir.display(), e))?;

        let mut visited: HashSet<String> = HashSet::new();
        let mut seen_hashes: HashSet<[u8; 32]> = HashSet::new();
        let mut queue: VecDeque<CrawlTask> = VecDeque::new();
        let mut records: Vec<PageRecord> = Vec::new();
        let mut skipped = 0usize;

        visited.insert(canonical_url(root));
        queue.push_back(CrawlTask {
            url: root.clone(),
            depth: 0,
        });

        while let Some(task) = queue.pop_front() {
            info!(
                "Rendering [depth {}] \"{}\"",
                task.depth,
                task.url.to_string().green()
            );

            let rendered = match renderer.render(&task.url).await {
                Ok(rendered) => rendered,
                Err(e) => {
                    if task.depth == 0 {
                        return Err(anyhow!("Failed to render root page {}: {}", task.url, e));
                    }
                    warn!("Skipping \"{}\": {}", task.url.to_string().green(), e);
                    skipped += 1;
                    continue;
                }
            };

            let digest: [u8; 32] = Sha256::digest(rendered.html.as_bytes()).into();
            if !seen_hashes.insert(digest) {
                info!(
                    "Duplicate content at \"{}\", skipping",
                    task.url.to_string().green()
                );
                continue;
            }

            let title = page_title(&rendered.html).unwrap_or_else(|| task.url.to_string());
            let links = if task.depth < self.max_depth {
                extract_links(&rendered.html, &task.url)
            } else {
                Vec::new()
            };

            let index = records.len();
            let pdf_path = self.out_dir.join(record_filename(index, &task.url));
            fs::write(&pdf_path, &rendered.pdf)
                .await
                .map_err(|e| anyhow!("Failed to write PDF to {}: {}", pdf_path.display(), e))?;
            info!(
                "Saved \"{}\" to \"{}\"",
                task.url.to_string().green(),
                pdf_path.display().to_string().blue()
            );

            records.push(PageRecord {
                url: canonical_url(&task.url),
                title,
                pdf_path,
                index,
            });

            for link in links {
                if self.exclusions.contains(&link.text) {
                    info!(
                        "Excluding link \"{}\" ({})",
                        link.text,
                        link.url.to_string().green()
                    );
                    continue;
                }
                // Mark visited at enqueue time so sibling pages can't queue
                // the same URL twice.
                if visited.insert(canonical_url(&link.url)) {
                    queue.push_back(CrawlTask {
                        url: link.url,
                        depth: task.depth + 1,
                    });
                }
            }
        }

        if skipped > 0 {
            warn!(
                "{} page(s) failed to render and will be omitted from the final document",
                skipped
            );
        }

        Ok(records)
    }
}

/// Dedup key: scheme+host+path+query with the fragment stripped and any
/// trailing slash on a non-root path trimmed.
pub fn canonical_url(url: &Url) -> String {
    let mut url = url.clone();
    url.set_fragment(None);
    let path = url.path();
    if path.len() > 1 && path.ends_with('/') {
        let trimmed = path.trim_end_matches('/').to_string();
        url.set_path(&trimmed);
    }
    url.to_string()
}

/// First non-empty `<h1>` wins, then the `<title>` element.
fn page_title(html: &str) -> Option<String> {
    let document = Html::parse_document(html);

    let h1 = Selector::parse("h1").unwrap();
    if let Some(element) = document.select(&h1).next() {
        let text = element.text().collect::<String>().trim().to_string();
        if !text.is_empty() {
            return Some(text);
        }
    }

    let title = Selector::parse("title").unwrap();
    document
        .select(&title)
        .next()
        .map(|element| element.text().collect::<String>().trim().to_string())
        .filter(|text| !text.is_empty())
}

fn record_filename(index: usize, url: &Url) -> String {
    let mut slug = slugify(url.path());
    if slug.is_empty() {
        slug = "index".to_string();
    }
    format!("{:03}_{}.pdf", index + 1, slug)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_url_strips_fragment() {
        let url = Url::parse("https://example.com/a?b=1#section").unwrap();
        assert_eq!(canonical_url(&url), "https://example.com/a?b=1");
    }

    #[test]
    fn canonical_url_trims_trailing_slash() {
        let url = Url::parse("https://example.com/docs/").unwrap();
        assert_eq!(canonical_url(&url), "https://example.com/docs");
    }

    #[test]
    fn canonical_url_keeps_root_path() {
        let url = Url::parse("https://example.com/#top").unwrap();
        assert_eq!(canonical_url(&url), "https://example.com/");
    }

    #[test]
    fn title_prefers_h1_over_title_element() {
        let html = "<html><head><title>Tab Title</title></head>\
                    <body><h1> Heading </h1></body></html>";
        assert_eq!(page_title(html).as_deref(), Some("Heading"));
    }

    #[test]
    fn title_falls_back_to_title_element() {
        let html = "<html><head><title>Tab Title</title></head><body><h1></h1></body></html>";
        assert_eq!(page_title(html).as_deref(), Some("Tab Title"));
    }

    #[test]
    fn title_missing_everywhere() {
        assert_eq!(page_title("<html><body><p>hi</p></body></html>"), None);
    }

    #[test]
    fn filenames_preserve_discovery_order() {
        let url = Url::parse("https://example.com/docs/intro").unwrap();
        assert_eq!(record_filename(0, &url), "001_docs-intro.pdf");
        let root = Url::parse("https://example.com/").unwrap();
        assert_eq!(record_filename(11, &root), "012_index.pdf");
    }
}
