//! # site2pdf
//!
//! A CLI utility that crawls a website breadth-first, renders every
//! discovered page to a PDF with headless Chromium, and merges the results
//! into one document behind a clickable table of contents.
//!
//! ## Usage
//!
//! ```bash
//! site2pdf https://example.com -L 2 -e "Edit this page" "Skip"
//! ```

mod assembler;
mod crawler;
mod links;
mod renderer;

pub use assembler::PdfAssembler;
pub use crawler::{canonical_url, Crawler, PageRecord};
pub use links::{extract_links, Link};
pub use renderer::{ChromiumRenderer, PageRenderer, PdfOptions, RenderedPage};
