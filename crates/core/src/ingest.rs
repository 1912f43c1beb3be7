use crate::chunking::{build_chunks, ChunkingConfig};
use crate::embeddings::Embedder;
use crate::error::IngestError;
use crate::extractor::{extract_page_texts, PageText};
use crate::index::{save_page_images, Metric, VectorStore};
use crate::models::{DocumentFingerprint, PageImage};
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use walkdir::WalkDir;

const CHECKSUM_PREFIX_LEN: usize = 12;

pub fn discover_pdf_files(folder: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for entry in WalkDir::new(folder)
        .into_iter()
        .filter_map(|item| item.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }

        let is_pdf = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"));

        if is_pdf {
            files.push(entry.path().to_path_buf());
        }
    }

    files.sort_unstable();
    files
}

pub fn digest_file(path: &Path) -> Result<String, IngestError> {
    let bytes = fs::read(path)?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(format!("{:x}", hasher.finalize()))
}

/// Per-document index directory: `<root>/<file stem>-<checksum prefix>`.
/// Distinct documents never share artifacts; re-ingesting the same bytes
/// replaces the same index.
pub fn index_path_for(index_root: &Path, fingerprint: &DocumentFingerprint) -> PathBuf {
    let stem: String = Path::new(&fingerprint.document_title)
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or_default()
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' {
                ch.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect();
    let stem = if stem.is_empty() { "document".to_string() } else { stem };
    let prefix: String = fingerprint.checksum.chars().take(CHECKSUM_PREFIX_LEN).collect();
    index_root.join(format!("{stem}-{prefix}"))
}

#[derive(Debug, Clone)]
pub struct IngestionReport {
    pub fingerprint: DocumentFingerprint,
    pub index_path: PathBuf,
    pub pages: usize,
    pub chunks: usize,
    pub images: usize,
}

#[derive(Debug, Clone)]
pub struct SkippedPdf {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct FolderIngestionReport {
    pub documents: Vec<IngestionReport>,
    pub skipped_files: Vec<SkippedPdf>,
}

/// Extract, chunk, embed and persist one PDF under `index_root`.
///
/// Any failure is returned: no partial index is left behind for a document
/// that produced no content.
pub async fn ingest_document(
    pdf: &Path,
    index_root: &Path,
    chunking: ChunkingConfig,
    embedder: &dyn Embedder,
    metric: Metric,
) -> Result<IngestionReport, IngestError> {
    chunking.validate()?;

    let source = pdf.to_path_buf();
    let (fingerprint, pages) = tokio::task::spawn_blocking(move || {
        let fingerprint = build_document_fingerprint(&source)?;
        let pages = extract_page_texts(&source)?;
        Ok::<_, IngestError>((fingerprint, pages))
    })
    .await
    .map_err(|error| IngestError::Io(std::io::Error::other(error)))??;

    index_pages(fingerprint, pages, index_root, chunking, embedder, metric).await
}

/// Index already-extracted pages for `fingerprint`.
pub async fn index_pages(
    fingerprint: DocumentFingerprint,
    pages: Vec<PageText>,
    index_root: &Path,
    chunking: ChunkingConfig,
    embedder: &dyn Embedder,
    metric: Metric,
) -> Result<IngestionReport, IngestError> {
    let source = PathBuf::from(&fingerprint.source_path);
    let chunks = build_chunks(&source, &pages, chunking)?;
    let chunk_count = chunks.len();
    let images: Vec<PageImage> = pages
        .iter()
        .flat_map(|page| page.images.iter().cloned())
        .collect();

    let index_path = index_path_for(index_root, &fingerprint);
    VectorStore::build(chunks, embedder, &index_path, metric).await?;
    if !images.is_empty() {
        save_page_images(&index_path, &images).await?;
    }

    info!(
        document = %fingerprint.document_title,
        pages = pages.len(),
        chunks = chunk_count,
        images = images.len(),
        index = %index_path.display(),
        "ingested document"
    );

    Ok(IngestionReport {
        fingerprint,
        index_path,
        pages: pages.len(),
        chunks: chunk_count,
        images: images.len(),
    })
}

/// Ingest every PDF under `folder`, one index per document. Files that fail
/// are reported in `skipped_files` instead of aborting the run.
pub async fn ingest_folder_best_effort(
    folder: &Path,
    index_root: &Path,
    chunking: ChunkingConfig,
    embedder: &dyn Embedder,
    metric: Metric,
) -> Result<FolderIngestionReport, IngestError> {
    chunking.validate()?;
    let files = discover_pdf_files(folder);

    if files.is_empty() {
        return Err(IngestError::InvalidArgument(format!(
            "no pdf files found in {}",
            folder.display()
        )));
    }

    let mut report = FolderIngestionReport::default();
    for path in files {
        match ingest_document(&path, index_root, chunking, embedder, metric).await {
            Ok(document) => report.documents.push(document),
            Err(error) => {
                warn!(path = %path.display(), %error, "skipping pdf");
                report.skipped_files.push(SkippedPdf {
                    path,
                    reason: error.to_string(),
                });
            }
        }
    }

    Ok(report)
}

pub(crate) fn build_document_fingerprint(path: &Path) -> Result<DocumentFingerprint, IngestError> {
    let checksum = digest_file(path)?;
    let name = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| {
            IngestError::MissingFileName(format!("path missing filename: {}", path.display()))
        })?;

    Ok(DocumentFingerprint {
        document_id: generate_document_id(path),
        document_title: name.to_string(),
        source_path: path.to_string_lossy().to_string(),
        checksum,
        ingested_at: Utc::now(),
    })
}

fn generate_document_id(path: &Path) -> String {
    let mut hasher = Sha256::new();
    hasher.update(path.to_string_lossy().as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::CharacterNgramEmbedder;
    use crate::index::{load_page_images, IMAGES_FILE};
    use std::fs::{self, File};
    use std::io::Write;
    use tempfile::tempdir;

    fn page(number: u32, text: &str) -> PageText {
        PageText {
            number,
            text: text.to_string(),
            images: Vec::new(),
        }
    }

    fn fingerprint_for(dir: &Path, name: &str, bytes: &[u8]) -> DocumentFingerprint {
        let path = dir.join(name);
        fs::write(&path, bytes).expect("seed source file");
        build_document_fingerprint(&path).expect("fingerprint")
    }

    #[test]
    fn discover_pdf_files_is_recursive() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let base = dir.path();
        let nested = base.join("nested");
        fs::create_dir(&nested)?;

        File::create(base.join("a.pdf")).and_then(|mut file| file.write_all(b"%PDF-1.4\n%fake"))?;
        File::create(nested.join("b.PDF"))
            .and_then(|mut file| file.write_all(b"%PDF-1.4\n%fake"))?;
        File::create(base.join("notes.txt"))?;

        let files = discover_pdf_files(base);
        assert_eq!(files.len(), 2);
        Ok(())
    }

    #[test]
    fn checksum_is_reproducible() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let file_path = dir.path().join("a.pdf");
        fs::write(&file_path, b"abc")?;

        let first = digest_file(&file_path)?;
        let second = digest_file(&file_path)?;
        assert_eq!(first, second);
        Ok(())
    }

    #[test]
    fn index_paths_are_scoped_per_document() {
        let dir = tempdir().expect("temp dir");
        let root = Path::new("/indexes");
        let first = fingerprint_for(dir.path(), "Annual Report.pdf", b"one");
        let second = fingerprint_for(dir.path(), "annual-report.pdf", b"two");

        let first_path = index_path_for(root, &first);
        assert!(first_path.starts_with(root));
        assert_eq!(
            first_path.file_name().and_then(|name| name.to_str()),
            Some(format!("annual_report-{}", &first.checksum[..12]).as_str())
        );
        assert_ne!(first_path, index_path_for(root, &second));
    }

    #[tokio::test]
    async fn ingestion_fails_without_pdfs() {
        let dir = tempdir().expect("temp dir");
        let result = ingest_folder_best_effort(
            dir.path(),
            &dir.path().join("indexes"),
            ChunkingConfig::default(),
            &CharacterNgramEmbedder::default(),
            Metric::default(),
        )
        .await;
        assert!(matches!(result, Err(IngestError::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn best_effort_skips_unreadable_pdfs() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        fs::write(dir.path().join("unreadable.pdf"), b"%PDF-1.4\n%broken")?;
        let index_root = dir.path().join("indexes");

        let report = ingest_folder_best_effort(
            dir.path(),
            &index_root,
            ChunkingConfig::default(),
            &CharacterNgramEmbedder::default(),
            Metric::default(),
        )
        .await?;

        assert!(report.documents.is_empty());
        assert_eq!(report.skipped_files.len(), 1);
        assert_eq!(
            report.skipped_files[0]
                .path
                .file_name()
                .and_then(|name| name.to_str()),
            Some("unreadable.pdf")
        );
        assert!(!index_root.exists());
        Ok(())
    }

    #[tokio::test]
    async fn indexed_pages_are_searchable() {
        let dir = tempdir().expect("temp dir");
        let fingerprint = fingerprint_for(dir.path(), "policy.pdf", b"policy bytes");
        let embedder = CharacterNgramEmbedder::default();
        let pages = vec![
            page(1, "Employees receive twenty days of paid leave every calendar year."),
            page(2, "Remote work requires written approval from a line manager."),
        ];

        let report = index_pages(
            fingerprint,
            pages,
            &dir.path().join("indexes"),
            ChunkingConfig::default(),
            &embedder,
            Metric::default(),
        )
        .await
        .expect("indexing succeeds");

        assert_eq!(report.pages, 2);
        assert_eq!(report.chunks, 2);
        assert_eq!(report.images, 0);
        assert!(!report.index_path.join(IMAGES_FILE).exists());

        let store = VectorStore::load(&report.index_path).await.expect("index loads");
        let hits = store
            .search("how many days of paid leave", 1, &embedder)
            .await
            .expect("search succeeds");
        assert_eq!(hits[0].page, 1);
    }

    #[tokio::test]
    async fn page_images_are_stored_beside_the_index() {
        let dir = tempdir().expect("temp dir");
        let fingerprint = fingerprint_for(dir.path(), "scan.pdf", b"scan bytes");
        let scanned = PageText {
            number: 1,
            text: String::new(),
            images: vec![PageImage {
                page: 1,
                filter: Some("DCTDecode".to_string()),
                data: vec![0xFF, 0xD8, 0xFF],
            }],
        };

        let report = index_pages(
            fingerprint,
            vec![scanned],
            &dir.path().join("indexes"),
            ChunkingConfig::default(),
            &CharacterNgramEmbedder::default(),
            Metric::default(),
        )
        .await
        .expect("image-only page still indexes");

        assert_eq!(report.chunks, 1);
        assert_eq!(report.images, 1);
        let images = load_page_images(&report.index_path, &[1]).await;
        assert_eq!(images.len(), 1);
        assert_eq!(images[0].data, vec![0xFF, 0xD8, 0xFF]);
    }

    #[tokio::test]
    async fn documents_without_content_produce_no_index() {
        let dir = tempdir().expect("temp dir");
        let fingerprint = fingerprint_for(dir.path(), "blank.pdf", b"blank");
        let index_root = dir.path().join("indexes");

        let result = index_pages(
            fingerprint,
            vec![page(1, "   "), page(2, "tiny")],
            &index_root,
            ChunkingConfig::default(),
            &CharacterNgramEmbedder::default(),
            Metric::default(),
        )
        .await;

        assert!(matches!(result, Err(IngestError::NoContentExtracted { .. })));
        assert!(!index_root.exists());
    }
}
