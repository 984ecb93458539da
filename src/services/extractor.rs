use crate::config::OcrConfig;
use crate::models::Page;
use anyhow::{Context, Result, bail};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info, warn};

/// Lines at the bottom of a page searched for a printed page number.
const PAGE_NUMBER_WINDOW: usize = 5;

#[derive(Debug, thiserror::Error)]
enum PageOcrError {
    /// The OCR engine could not be started at all.
    #[error("failed to execute {program}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("OCR returned non-zero exit status for {image}: {stderr}")]
    Failed { image: String, stderr: String },
}

pub struct PageExtractor {
    language: String,
    dpi: u32,
    pdftoppm: PathBuf,
    tesseract: PathBuf,
}

impl PageExtractor {
    pub fn new(config: &OcrConfig) -> Self {
        Self {
            language: config.language.clone(),
            dpi: config.dpi,
            pdftoppm: config.pdftoppm.clone(),
            tesseract: config.tesseract.clone(),
        }
    }

    /// Renders every page of the PDF and runs OCR on it.
    ///
    /// A render failure, an OCR engine that cannot be started, or OCR failing
    /// on every page aborts the whole extraction. An OCR failure on some pages
    /// is logged and leaves those pages' text empty.
    pub fn extract(&self, pdf_path: &Path) -> Result<Vec<Page>> {
        info!(pdf = %pdf_path.display(), "starting text extraction");
        if !pdf_path.is_file() {
            bail!("PDF not found: {}", pdf_path.display());
        }

        let scratch = tempfile::Builder::new()
            .prefix("qbank_ocr_")
            .tempdir()
            .context("failed to create OCR scratch directory")?;
        let images = self.render_pages(pdf_path, scratch.path())?;
        if images.is_empty() {
            bail!("pdftoppm produced no page images for {}", pdf_path.display());
        }
        info!(pages = images.len(), "converted PDF to page images");

        let mut texts = Vec::with_capacity(images.len());
        let mut failed = 0usize;
        for (index, image) in images.iter().enumerate() {
            debug!(page = index + 1, "recognizing page");
            match self.recognize(image) {
                Ok(text) => texts.push(text),
                Err(error @ PageOcrError::Spawn { .. }) => return Err(error.into()),
                Err(error @ PageOcrError::Failed { .. }) => {
                    warn!(page = index + 1, error = %error, "OCR failed, page left empty");
                    failed += 1;
                    texts.push(String::new());
                }
            }
        }
        if failed == images.len() {
            bail!("OCR failed on every page of {}", pdf_path.display());
        }

        let pages = pages_from_text(texts);
        info!(pages = pages.len(), "extraction complete");
        Ok(pages)
    }

    fn render_pages(&self, pdf_path: &Path, scratch: &Path) -> Result<Vec<PathBuf>> {
        let prefix = scratch.join("page");
        let output = Command::new(&self.pdftoppm)
            .arg("-r")
            .arg(self.dpi.to_string())
            .arg("-png")
            .arg(pdf_path)
            .arg(&prefix)
            .output()
            .with_context(|| {
                format!(
                    "failed to execute {} for {}",
                    self.pdftoppm.display(),
                    pdf_path.display()
                )
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(
                "pdftoppm returned non-zero exit status for {}: {}",
                pdf_path.display(),
                stderr.trim()
            );
        }

        let mut images = fs::read_dir(scratch)
            .with_context(|| format!("failed to read {}", scratch.display()))?
            .filter_map(|entry| entry.ok().map(|entry| entry.path()))
            .filter(|path| path.extension().and_then(|ext| ext.to_str()) == Some("png"))
            .collect::<Vec<_>>();
        sort_rendered_pages(&mut images);
        Ok(images)
    }

    fn recognize(&self, image: &Path) -> Result<String, PageOcrError> {
        let output = Command::new(&self.tesseract)
            .arg(image)
            .arg("stdout")
            .arg("-l")
            .arg(&self.language)
            .output()
            .map_err(|source| PageOcrError::Spawn {
                program: self.tesseract.display().to_string(),
                source,
            })?;

        if !output.status.success() {
            return Err(PageOcrError::Failed {
                image: image.display().to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout)
            .replace('\u{0000}', "")
            .trim_end_matches('\u{000C}')
            .to_string())
    }
}

/// pdftoppm pads the page suffix to the width of the page count
/// (`page-01.png` … `page-12.png`), so order by the parsed suffix.
fn sort_rendered_pages(images: &mut [PathBuf]) {
    images.sort_by_key(|path| {
        let suffix = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .and_then(|stem| stem.rsplit('-').next())
            .and_then(|digits| digits.parse::<u32>().ok());
        (suffix.unwrap_or(u32::MAX), path.clone())
    });
}

/// Looks for a line that is exactly a 1-4 digit number among the last
/// non-empty lines of the page, bottom first.
pub fn detect_page_number(text: &str) -> Option<u32> {
    let lines = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>();
    let start = lines.len().saturating_sub(PAGE_NUMBER_WINDOW);
    lines[start..]
        .iter()
        .rev()
        .find(|line| (1..=4).contains(&line.len()) && line.bytes().all(|b| b.is_ascii_digit()))
        .and_then(|line| line.parse().ok())
}

/// Builds pages in document order, falling back to the page position when no
/// printed number is found.
pub fn pages_from_text(texts: Vec<String>) -> Vec<Page> {
    texts
        .into_iter()
        .enumerate()
        .map(|(index, content)| {
            let page_number = detect_page_number(&content).unwrap_or(index as u32 + 1);
            Page {
                page_number: Some(page_number),
                content,
            }
        })
        .collect()
}
