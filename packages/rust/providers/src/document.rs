//! Document text extraction for recommendation letters.
//!
//! Plain-text files are read directly. PDFs go through `pdf-extract`; when
//! that yields no text (scanned letters) and OCR is enabled, pages are
//! rasterized with `pdftoppm` and read with `tesseract`.

use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::{debug, info, instrument, warn};

use smartadmit_shared::{
    DocumentConfig, DocumentTextExtractor, ExtractedDocument, ExtractionMethod, Result,
    SmartAdmitError,
};

/// Rasterization resolution for OCR.
const OCR_DPI: &str = "300";

/// Extractor for `.pdf`, `.txt`, and `.md` files.
#[derive(Debug, Clone)]
pub struct PdfDocumentExtractor {
    ocr: Option<OcrCommands>,
}

#[derive(Debug, Clone)]
struct OcrCommands {
    pdftoppm: String,
    tesseract: String,
}

impl PdfDocumentExtractor {
    pub fn new(config: &DocumentConfig) -> Self {
        let ocr = config.ocr_enabled.then(|| OcrCommands {
            pdftoppm: config.pdftoppm_cmd.clone(),
            tesseract: config.tesseract_cmd.clone(),
        });
        Self { ocr }
    }

    fn extract_pdf(&self, path: &Path) -> Result<ExtractedDocument> {
        let bytes = std::fs::read(path).map_err(|e| SmartAdmitError::io(path, e))?;

        // pdf-extract panics on some malformed inputs
        match std::panic::catch_unwind(|| pdf_extract::extract_text_from_mem(&bytes)) {
            Ok(Ok(text)) if has_text(&text) => {
                return Ok(ExtractedDocument {
                    text: normalize_whitespace(&text),
                    method: ExtractionMethod::PdfDirect,
                });
            }
            Ok(Ok(_)) => debug!("PDF has no text layer"),
            Ok(Err(e)) => warn!(error = %e, "direct PDF extraction failed"),
            Err(_) => warn!("direct PDF extraction panicked"),
        }

        let Some(ocr) = &self.ocr else {
            return Err(SmartAdmitError::Extraction(format!(
                "no extractable text in {} and OCR is disabled",
                path.display()
            )));
        };

        info!("falling back to OCR");
        let text = ocr.run(path)?;
        if !has_text(&text) {
            return Err(SmartAdmitError::Extraction(format!(
                "OCR produced no text for {}",
                path.display()
            )));
        }

        Ok(ExtractedDocument {
            text: normalize_whitespace(&text),
            method: ExtractionMethod::Ocr,
        })
    }
}

impl DocumentTextExtractor for PdfDocumentExtractor {
    #[instrument(skip(self), fields(path = %path.display()))]
    fn extract(&self, path: &Path) -> Result<ExtractedDocument> {
        if !path.is_file() {
            return Err(SmartAdmitError::Extraction(format!(
                "{} is not a readable file",
                path.display()
            )));
        }

        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();

        match ext.as_str() {
            "pdf" => self.extract_pdf(path),
            "txt" | "md" => {
                let text =
                    std::fs::read_to_string(path).map_err(|e| SmartAdmitError::io(path, e))?;
                if !has_text(&text) {
                    return Err(SmartAdmitError::Extraction(format!(
                        "{} is empty",
                        path.display()
                    )));
                }
                Ok(ExtractedDocument {
                    text: normalize_whitespace(&text),
                    method: ExtractionMethod::PlainText,
                })
            }
            other => Err(SmartAdmitError::Extraction(format!(
                "unsupported document type '.{other}'"
            ))),
        }
    }
}

impl OcrCommands {
    /// Rasterize every page into a temp dir, OCR each image in page order.
    fn run(&self, pdf: &Path) -> Result<String> {
        let dir = tempfile::tempdir()
            .map_err(|e| SmartAdmitError::Extraction(format!("failed to create temp dir: {e}")))?;
        let prefix = dir.path().join("page");

        let output = Command::new(&self.pdftoppm)
            .arg("-r")
            .arg(OCR_DPI)
            .arg("-png")
            .arg(pdf)
            .arg(&prefix)
            .output()
            .map_err(|e| {
                SmartAdmitError::Extraction(format!(
                    "failed to spawn {}: {e}. Is poppler installed?",
                    self.pdftoppm
                ))
            })?;
        if !output.status.success() {
            return Err(SmartAdmitError::Extraction(format!(
                "{} failed: {}",
                self.pdftoppm,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let mut pages: Vec<PathBuf> = std::fs::read_dir(dir.path())
            .map_err(|e| SmartAdmitError::io(dir.path(), e))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.extension().is_some_and(|ext| ext == "png"))
            .collect();
        pages.sort_by_key(|p| page_number(p));

        let mut text = String::new();
        for page in &pages {
            let output = Command::new(&self.tesseract)
                .arg(page)
                .arg("stdout")
                .output()
                .map_err(|e| {
                    SmartAdmitError::Extraction(format!(
                        "failed to spawn {}: {e}. Is tesseract installed?",
                        self.tesseract
                    ))
                })?;
            if !output.status.success() {
                warn!(page = %page.display(), "tesseract failed on page, skipping");
                continue;
            }
            text.push_str(&String::from_utf8_lossy(&output.stdout));
            text.push('\n');
        }

        debug!(pages = pages.len(), chars = text.len(), "OCR complete");
        Ok(text)
    }
}

/// `page-3.png` / `page-03.png` → 3.
fn page_number(path: &Path) -> u32 {
    path.file_stem()
        .and_then(|s| s.to_str())
        .and_then(|s| s.rsplit('-').next())
        .and_then(|n| n.parse().ok())
        .unwrap_or(u32::MAX)
}

fn has_text(text: &str) -> bool {
    text.chars().any(|c| c.is_alphanumeric())
}

fn normalize_whitespace(text: &str) -> String {
    text.lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}
