//! Content extraction: stored document bytes → per-page text or page images.
//!
//! pdfium is not async-safe and parsing is CPU-bound, so every call runs on
//! the blocking pool via `spawn_blocking`. Each call binds its own pdfium
//! handle on that thread.

use super::{pdfium, postprocess};
use crate::error::PaperError;
use crate::paper::{PageImage, PaperContent, PaperMetadata};
use async_trait::async_trait;
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::io::Cursor;
use std::path::PathBuf;
use tracing::{debug, info};

#[async_trait]
pub trait ContentExtractor: Send + Sync {
    /// Per-page text in document order. Title and abstract come from `metadata`.
    async fn extract(
        &self,
        document: Vec<u8>,
        metadata: &PaperMetadata,
    ) -> Result<PaperContent, PaperError>;

    /// Render 1-based `page_number` as a PNG.
    async fn render_page(
        &self,
        document: Vec<u8>,
        page_number: usize,
    ) -> Result<PageImage, PaperError>;

    /// Render every page as a PNG, in document order.
    async fn render_pages(&self, document: Vec<u8>) -> Result<Vec<PageImage>, PaperError>;
}

/// Reject page numbers outside `[1, total]`.
pub fn check_page_number(page_number: usize, total: usize) -> Result<(), PaperError> {
    if page_number == 0 || page_number > total {
        return Err(PaperError::PageOutOfRange {
            page: page_number,
            total,
        });
    }
    Ok(())
}

/// [`ContentExtractor`] backed by pdfium.
#[derive(Debug, Clone)]
pub struct PdfiumExtractor {
    library: Option<PathBuf>,
    max_rendered_pixels: u32,
}

impl PdfiumExtractor {
    pub fn new(library: Option<PathBuf>, max_rendered_pixels: u32) -> Self {
        Self {
            library,
            max_rendered_pixels,
        }
    }
}

#[async_trait]
impl ContentExtractor for PdfiumExtractor {
    async fn extract(
        &self,
        document: Vec<u8>,
        metadata: &PaperMetadata,
    ) -> Result<PaperContent, PaperError> {
        let library = self.library.clone();
        let pages = tokio::task::spawn_blocking(move || extract_pages_blocking(library, document))
            .await
            .map_err(|e| PaperError::Internal(format!("Extraction task panicked: {e}")))??;

        info!("Extracted {} pages for paper {}", pages.len(), metadata.id);
        Ok(PaperContent {
            title: metadata.title.clone(),
            abstract_text: metadata.abstract_text.clone(),
            page_contents: pages,
        })
    }

    async fn render_page(
        &self,
        document: Vec<u8>,
        page_number: usize,
    ) -> Result<PageImage, PaperError> {
        let library = self.library.clone();
        let max_pixels = self.max_rendered_pixels;
        let image = tokio::task::spawn_blocking(move || {
            render_page_blocking(library, document, page_number, max_pixels)
        })
        .await
        .map_err(|e| PaperError::Internal(format!("Render task panicked: {e}")))??;

        let bytes = encode_png(&image)?;
        debug!("Page {page_number} → {} bytes PNG", bytes.len());
        Ok(PageImage {
            bytes,
            mime_type: "image/png",
        })
    }

    async fn render_pages(&self, document: Vec<u8>) -> Result<Vec<PageImage>, PaperError> {
        let library = self.library.clone();
        let max_pixels = self.max_rendered_pixels;
        let images = tokio::task::spawn_blocking(move || {
            render_all_blocking(library, document, max_pixels)
        })
        .await
        .map_err(|e| PaperError::Internal(format!("Render task panicked: {e}")))??;

        let mut pages = Vec::with_capacity(images.len());
        for image in &images {
            pages.push(PageImage {
                bytes: encode_png(image)?,
                mime_type: "image/png",
            });
        }
        info!("Rendered {} pages", pages.len());
        Ok(pages)
    }
}

fn load_error(e: PdfiumError) -> PaperError {
    PaperError::Parse {
        detail: format!("{e:?}"),
    }
}

fn extract_pages_blocking(
    library: Option<PathBuf>,
    document: Vec<u8>,
) -> Result<Vec<String>, PaperError> {
    let pdfium = pdfium::bind(library.as_deref())?;
    let doc = pdfium
        .load_pdf_from_byte_vec(document, None)
        .map_err(load_error)?;

    let mut pages = Vec::with_capacity(doc.pages().len() as usize);
    for (index, page) in doc.pages().iter().enumerate() {
        let text = page.text().map_err(|e| PaperError::Parse {
            detail: format!("page {}: {e:?}", index + 1),
        })?;
        pages.push(postprocess::clean_page_text(&text.all()));
    }
    Ok(pages)
}

fn render_page_blocking(
    library: Option<PathBuf>,
    document: Vec<u8>,
    page_number: usize,
    max_pixels: u32,
) -> Result<DynamicImage, PaperError> {
    let pdfium = pdfium::bind(library.as_deref())?;
    let doc = pdfium
        .load_pdf_from_byte_vec(document, None)
        .map_err(load_error)?;

    let pages = doc.pages();
    let total = pages.len() as usize;
    check_page_number(page_number, total)?;

    let page = pages
        .get((page_number - 1) as PdfPageIndex)
        .map_err(load_error)?;
    render_one(&page, page_number, max_pixels)
}

fn render_all_blocking(
    library: Option<PathBuf>,
    document: Vec<u8>,
    max_pixels: u32,
) -> Result<Vec<DynamicImage>, PaperError> {
    let pdfium = pdfium::bind(library.as_deref())?;
    let doc = pdfium
        .load_pdf_from_byte_vec(document, None)
        .map_err(load_error)?;

    let pages = doc.pages();
    let images = pages
        .iter()
        .enumerate()
        .map(|(index, page)| render_one(&page, index + 1, max_pixels))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(images)
}

fn render_one(
    page: &PdfPage,
    page_number: usize,
    max_pixels: u32,
) -> Result<DynamicImage, PaperError> {
    let (width, height) = fit_within(page.width().value, page.height().value, max_pixels);
    let render_config = PdfRenderConfig::new().set_target_size(width, height);

    let bitmap = page
        .render_with_config(&render_config)
        .map_err(|e| PaperError::Parse {
            detail: format!("render page {page_number}: {e:?}"),
        })?;

    Ok(bitmap.as_image())
}

/// Pixel size for a page of `width` × `height` points: native scale, shrunk
/// so the longer edge is at most `max_pixels`. Never upscales.
fn fit_within(width: f32, height: f32, max_pixels: u32) -> (i32, i32) {
    let longest = width.max(height);
    let scale = if longest > max_pixels as f32 {
        max_pixels as f32 / longest
    } else {
        1.0
    };
    let px = |points: f32| (points * scale).round().max(1.0) as i32;
    (px(width), px(height))
}

fn encode_png(image: &DynamicImage) -> Result<Vec<u8>, PaperError> {
    let mut buf = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
        .map_err(|e| PaperError::Internal(format!("PNG encoding: {e}")))?;
    Ok(buf)
}
