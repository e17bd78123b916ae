//! Turns downloaded document bytes into a single PNG for the vision model.
//!
//! PDFs are rasterised with `pdftoppm` (poppler-utils) and the pages are
//! stacked top to bottom. Images are passed through untouched.

use std::io::Cursor;
use std::path::{Path, PathBuf};

use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use log::{debug, info, warn};
use tokio::process::Command as TokioCommand;

use crate::error::InferenceError;

/// Resolution used to rasterise PDF pages.
pub const DEFAULT_DPI: u32 = 200;

/// Pages rasterised per document. Later pages are left out of the image.
pub const DEFAULT_MAX_PAGES: u32 = 20;

const PDF_MAGIC: &[u8] = b"%PDF";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderOptions {
    pub dpi: u32,
    pub max_pages: u32,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            dpi: DEFAULT_DPI,
            max_pages: DEFAULT_MAX_PAGES,
        }
    }
}

/// What kind of content a document holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    Pdf,
    Image(ImageFormat),
}

pub fn detect_content(bytes: &[u8]) -> Result<ContentKind, InferenceError> {
    if bytes.starts_with(PDF_MAGIC) {
        return Ok(ContentKind::Pdf);
    }
    image::guess_format(bytes)
        .map(ContentKind::Image)
        .map_err(|_| {
            InferenceError::UnsupportedContent(
                "document is neither a PDF nor a recognised image".to_string(),
            )
        })
}

/// Converts document bytes into image bytes the model can read.
///
/// Dropping the future (for instance when the job timeout fires) kills
/// `pdftoppm` and removes its scratch directory. Decoding the rendered pages
/// runs on the blocking pool and, once started, finishes on its own.
pub async fn document_to_image(
    bytes: Vec<u8>,
    options: RenderOptions,
) -> Result<Vec<u8>, InferenceError> {
    match detect_content(&bytes)? {
        ContentKind::Image(format) => {
            debug!("Document is already an image ({:?})", format);
            Ok(bytes)
        }
        ContentKind::Pdf => render_pdf(bytes, options).await,
    }
}

/// Page count according to lopdf, `None` if it cannot parse the file.
pub fn pdf_page_count(pdf_bytes: &[u8]) -> Option<usize> {
    match lopdf::Document::load_mem(pdf_bytes) {
        Ok(doc) => Some(doc.get_pages().len()),
        Err(e) => {
            debug!("lopdf could not parse PDF ({}), relying on pdftoppm", e);
            None
        }
    }
}

/// Last page to render. An unparseable PDF is left to pdftoppm with the cap
/// applied; one without pages is rejected.
pub fn last_page(page_count: Option<usize>, max_pages: u32) -> Result<u32, InferenceError> {
    let max_pages = max_pages.max(1);
    match page_count {
        Some(0) => Err(InferenceError::Render("PDF has no pages".to_string())),
        Some(count) if count > max_pages as usize => {
            warn!(
                "Document has {} pages, rendering the first {}",
                count, max_pages
            );
            Ok(max_pages)
        }
        Some(count) => Ok(count as u32),
        None => Ok(max_pages),
    }
}

/// Removes the scratch directory however rendering ends.
struct ScratchDir(PathBuf);

impl ScratchDir {
    fn create() -> Result<Self, InferenceError> {
        let path =
            std::env::temp_dir().join(format!("papervision_render_{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&path).map_err(|e| {
            InferenceError::Render(format!("Failed to create temp directory: {}", e))
        })?;
        Ok(Self(path))
    }

    fn path(&self) -> &Path {
        &self.0
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_dir_all(&self.0) {
            warn!("Failed to clean up {}: {}", self.0.display(), e);
        }
    }
}

fn join_error(e: tokio::task::JoinError) -> InferenceError {
    InferenceError::Render(format!("Render task failed: {}", e))
}

async fn render_pdf(pdf_bytes: Vec<u8>, options: RenderOptions) -> Result<Vec<u8>, InferenceError> {
    let (pdf_bytes, page_count) = tokio::task::spawn_blocking(move || {
        let count = pdf_page_count(&pdf_bytes);
        (pdf_bytes, count)
    })
    .await
    .map_err(join_error)?;
    let last = last_page(page_count, options.max_pages)?;

    let scratch = ScratchDir::create()?;
    let pdf_path = scratch.path().join("document.pdf");
    let prefix = scratch.path().join("page");

    tokio::fs::write(&pdf_path, &pdf_bytes)
        .await
        .map_err(|e| InferenceError::Render(format!("Failed to write temp PDF: {}", e)))?;

    let output = TokioCommand::new("pdftoppm")
        .arg("-png")
        .arg("-r")
        .arg(options.dpi.to_string())
        .arg("-f")
        .arg("1")
        .arg("-l")
        .arg(last.to_string())
        .arg(&pdf_path)
        .arg(&prefix)
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| {
            InferenceError::Render(format!(
                "Failed to run pdftoppm: {}. Make sure poppler-utils is installed.",
                e
            ))
        })?;

    if !output.status.success() {
        return Err(InferenceError::Render(format!(
            "pdftoppm failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    let dir = scratch.path().to_path_buf();
    let png = tokio::task::spawn_blocking(move || combine_rendered_pages(&dir))
        .await
        .map_err(join_error)??;
    drop(scratch);
    Ok(png)
}

/// Loads the rendered pages, stacks them and encodes the result.
fn combine_rendered_pages(dir: &Path) -> Result<Vec<u8>, InferenceError> {
    let page_paths = rendered_page_paths(dir)?;
    if page_paths.is_empty() {
        return Err(InferenceError::Render("No pages found in PDF".to_string()));
    }

    let pages = page_paths
        .iter()
        .map(|path| {
            image::open(path).map_err(|e| {
                InferenceError::Render(format!(
                    "Failed to read rendered page {}: {}",
                    path.display(),
                    e
                ))
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let combined = stack_pages(&pages)?;
    info!(
        "Created combined image ({}x{}) from {} page(s)",
        combined.width(),
        combined.height(),
        pages.len()
    );
    encode_png(combined)
}

/// Rendered pages in page order.
///
/// pdftoppm zero-pads page numbers to a common width within one run, so a
/// lexical sort is page order.
fn rendered_page_paths(dir: &Path) -> Result<Vec<PathBuf>, InferenceError> {
    let entries = std::fs::read_dir(dir)
        .map_err(|e| InferenceError::Render(format!("Failed to list rendered pages: {}", e)))?;

    let mut paths: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
            name.starts_with("page-") && name.ends_with(".png")
        })
        .collect();
    paths.sort();
    Ok(paths)
}

/// Stacks pages vertically on a white canvas, centring narrower pages.
pub fn stack_pages(pages: &[DynamicImage]) -> Result<RgbImage, InferenceError> {
    if pages.is_empty() {
        return Err(InferenceError::Render("No pages to combine".to_string()));
    }

    let width = pages.iter().map(|p| p.width()).max().unwrap_or(0);
    let height: u32 = pages.iter().map(|p| p.height()).sum();

    let mut canvas = RgbImage::from_pixel(width, height, Rgb([255, 255, 255]));
    let mut y_offset: i64 = 0;
    for page in pages {
        let x_offset = i64::from((width - page.width()) / 2);
        image::imageops::overlay(&mut canvas, &page.to_rgb8(), x_offset, y_offset);
        y_offset += i64::from(page.height());
    }
    Ok(canvas)
}

fn encode_png(image: RgbImage) -> Result<Vec<u8>, InferenceError> {
    let mut buffer = Vec::new();
    DynamicImage::ImageRgb8(image)
        .write_to(&mut Cursor::new(&mut buffer), ImageFormat::Png)
        .map_err(|e| InferenceError::Render(format!("Failed to encode PNG: {}", e)))?;
    Ok(buffer)
}
