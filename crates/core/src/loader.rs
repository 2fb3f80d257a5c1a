use crate::error::IngestError;
use crate::models::Document;
use lopdf::Document as PdfDocument;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use walkdir::WalkDir;

pub const SUPPORTED_EXTENSIONS: [&str; 2] = ["pdf", "txt"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Pdf,
    Text,
}

impl DocumentKind {
    pub fn from_path(path: &Path) -> Option<Self> {
        let extension = path.extension()?.to_str()?;
        if extension.eq_ignore_ascii_case("pdf") {
            Some(DocumentKind::Pdf)
        } else if extension.eq_ignore_ascii_case("txt") {
            Some(DocumentKind::Text)
        } else {
            None
        }
    }
}

pub trait PdfExtractor {
    /// Text of every non-empty page as `(page number, text)`.
    fn extract_pages(&self, path: &Path) -> Result<Vec<(u32, String)>, IngestError>;
}

/// Reads the text layer of each page. A page whose content stream cannot be
/// decoded is skipped with a warning; only a file with no readable page at all
/// is an error.
#[derive(Debug, Default)]
pub struct LopdfExtractor;

impl PdfExtractor for LopdfExtractor {
    fn extract_pages(&self, path: &Path) -> Result<Vec<(u32, String)>, IngestError> {
        let pdf = PdfDocument::load(path)
            .map_err(|error| IngestError::PdfParse(format!("{}: {error}", path.display())))?;
        let page_numbers: Vec<u32> = pdf.get_pages().into_keys().collect();

        let pages: Vec<(u32, String)> = page_numbers
            .iter()
            .filter_map(|&number| match pdf.extract_text(&[number]) {
                Ok(text) => Some((number, text)),
                Err(error) => {
                    warn!(path = %path.display(), page = number, %error, "unreadable pdf page");
                    None
                }
            })
            .filter(|(_, text)| !text.trim().is_empty())
            .collect();

        if pages.is_empty() {
            return Err(IngestError::PdfParse(format!(
                "{}: none of {} page(s) has a text layer",
                path.display(),
                page_numbers.len()
            )));
        }
        Ok(pages)
    }
}

/// Strips NUL characters and byte-order marks left behind by extractors.
pub fn clean_text(text: &str) -> String {
    text.chars()
        .filter(|c| *c != '\0' && *c != '\u{feff}')
        .collect()
}

/// Loads one file: a `.txt` file becomes one document, a `.pdf` one document
/// per page with text.
pub fn load_document(path: &Path) -> Result<Vec<Document>, IngestError> {
    let source = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| IngestError::MissingFileName(path.display().to_string()))?
        .to_string();

    let documents = match DocumentKind::from_path(path) {
        Some(DocumentKind::Text) => {
            let text = clean_text(&fs::read_to_string(path)?);
            if text.trim().is_empty() {
                Vec::new()
            } else {
                vec![Document::new(source.clone(), text)]
            }
        }
        Some(DocumentKind::Pdf) => LopdfExtractor
            .extract_pages(path)?
            .into_iter()
            .map(|(page, text)| Document::new(source.clone(), clean_text(&text)).with_page(page))
            .collect(),
        None => {
            return Err(IngestError::UnsupportedFileType(path.display().to_string()));
        }
    };

    info!(source = %source, sections = documents.len(), "loaded document");
    Ok(documents)
}

/// Supported files under `folder`, recursively, in sorted order.
pub fn discover_documents(folder: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for entry in WalkDir::new(folder)
        .into_iter()
        .filter_map(|item| item.ok())
    {
        if entry.file_type().is_file() && DocumentKind::from_path(entry.path()).is_some() {
            files.push(entry.path().to_path_buf());
        }
    }

    files.sort_unstable();
    files
}

pub struct SkippedFile {
    pub path: PathBuf,
    pub reason: String,
}

pub struct LoadReport {
    pub documents: Vec<Document>,
    pub skipped_files: Vec<SkippedFile>,
}

/// Loads every file, recording failures instead of stopping at the first.
pub fn load_files_best_effort(paths: &[PathBuf]) -> LoadReport {
    let mut documents = Vec::new();
    let mut skipped_files = Vec::new();

    for path in paths {
        match load_document(path) {
            Ok(loaded) if loaded.is_empty() => skipped_files.push(SkippedFile {
                path: path.clone(),
                reason: "no text content".to_string(),
            }),
            Ok(loaded) => documents.extend(loaded),
            Err(error) => {
                warn!(path = %path.display(), %error, "skipping document");
                skipped_files.push(SkippedFile {
                    path: path.clone(),
                    reason: error.to_string(),
                });
            }
        }
    }

    info!(
        loaded = paths.len() - skipped_files.len(),
        total = paths.len(),
        "loaded documents"
    );
    LoadReport {
        documents,
        skipped_files,
    }
}

pub fn load_folder_best_effort(folder: &Path) -> Result<LoadReport, IngestError> {
    let files = discover_documents(folder);

    if files.is_empty() {
        return Err(IngestError::InvalidArgument(format!(
            "no {} files found in {}",
            SUPPORTED_EXTENSIONS.join("/"),
            folder.display()
        )));
    }

    Ok(load_files_best_effort(&files))
}
