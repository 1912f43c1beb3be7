use crate::embeddings::{matrix_dimensions, Embedder};
use crate::error::IndexError;
use crate::models::{Chunk, PageImage, SearchHit};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info};
use uuid::Uuid;

pub const INDEX_FILE: &str = "index.bin";
pub const METADATA_FILE: &str = "metadata.json";
pub const IMAGES_FILE: &str = "images.json";

const MAGIC: &[u8; 8] = b"PDFQAIX1";
// magic + metric + dimensions + count + build id
const HEADER_LEN: usize = 8 + 1 + 4 + 8 + 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    /// Squared Euclidean distance.
    #[default]
    SquaredL2,
    /// `1 - cosine similarity`, in `[0, 2]`.
    Cosine,
}

impl Metric {
    fn code(self) -> u8 {
        match self {
            Metric::SquaredL2 => 0,
            Metric::Cosine => 1,
        }
    }

    fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Metric::SquaredL2),
            1 => Some(Metric::Cosine),
            _ => None,
        }
    }

    /// Lower is closer for every metric.
    pub fn distance(self, left: &[f32], right: &[f32]) -> f32 {
        match self {
            Metric::SquaredL2 => left
                .iter()
                .zip(right)
                .map(|(a, b)| (a - b) * (a - b))
                .sum(),
            Metric::Cosine => {
                let dot: f32 = left.iter().zip(right).map(|(a, b)| a * b).sum();
                let left_norm = left.iter().map(|a| a * a).sum::<f32>().sqrt();
                let right_norm = right.iter().map(|b| b * b).sum::<f32>().sqrt();
                if left_norm == 0.0 || right_norm == 0.0 {
                    1.0
                } else {
                    1.0 - dot / (left_norm * right_norm)
                }
            }
        }
    }
}

/// Monotonic distance-to-score transform into `(0, 1]`.
pub fn distance_to_score(distance: f32) -> f32 {
    1.0 / (1.0 + distance.max(0.0))
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub position: usize,
    pub distance: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FlatIndex {
    metric: Metric,
    dimensions: usize,
    vectors: Vec<f32>,
}

impl FlatIndex {
    pub fn new(metric: Metric, dimensions: usize) -> Self {
        Self {
            metric,
            dimensions,
            vectors: Vec::new(),
        }
    }

    pub fn metric(&self) -> Metric {
        self.metric
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn len(&self) -> usize {
        if self.dimensions == 0 {
            0
        } else {
            self.vectors.len() / self.dimensions
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn add(&mut self, vectors: &[Vec<f32>]) -> Result<(), IndexError> {
        for vector in vectors {
            if vector.len() != self.dimensions {
                return Err(IndexError::DimensionMismatch {
                    expected: self.dimensions,
                    got: vector.len(),
                });
            }
        }
        for vector in vectors {
            self.vectors.extend_from_slice(vector);
        }
        Ok(())
    }

    fn row(&self, position: usize) -> &[f32] {
        let start = position * self.dimensions;
        &self.vectors[start..start + self.dimensions]
    }

    /// Up to `k` nearest rows, closest first. Ties keep insertion order.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>, IndexError> {
        if query.len() != self.dimensions {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimensions,
                got: query.len(),
            });
        }

        let mut neighbors: Vec<Neighbor> = (0..self.len())
            .map(|position| Neighbor {
                position,
                distance: self.metric.distance(self.row(position), query),
            })
            .filter(|neighbor| neighbor.distance.is_finite())
            .collect();

        neighbors.sort_by(|left, right| {
            left.distance
                .total_cmp(&right.distance)
                .then(left.position.cmp(&right.position))
        });
        neighbors.truncate(k);
        Ok(neighbors)
    }

    fn to_bytes(&self, build_id: Uuid) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(HEADER_LEN + self.vectors.len() * 4);
        bytes.extend_from_slice(MAGIC);
        bytes.push(self.metric.code());
        bytes.extend_from_slice(&(self.dimensions as u32).to_le_bytes());
        bytes.extend_from_slice(&(self.len() as u64).to_le_bytes());
        bytes.extend_from_slice(build_id.as_bytes());
        for value in &self.vectors {
            bytes.extend_from_slice(&value.to_le_bytes());
        }
        bytes
    }

    fn from_bytes(bytes: &[u8]) -> Result<(Self, Uuid), String> {
        if bytes.len() < HEADER_LEN || &bytes[..8] != MAGIC {
            return Err("missing index header".to_string());
        }

        let metric = Metric::from_code(bytes[8]).ok_or_else(|| format!("unknown metric {}", bytes[8]))?;
        let dimensions = u32::from_le_bytes(le_array(&bytes[9..13])) as usize;
        let count = u64::from_le_bytes(le_array(&bytes[13..21])) as usize;
        let build_id = Uuid::from_slice(&bytes[21..HEADER_LEN]).map_err(|error| error.to_string())?;

        let body = &bytes[HEADER_LEN..];
        let expected = count
            .checked_mul(dimensions)
            .and_then(|values| values.checked_mul(4))
            .ok_or_else(|| "index header overflows".to_string())?;
        if body.len() != expected {
            return Err(format!(
                "expected {expected} bytes of vectors, found {}",
                body.len()
            ));
        }
        if dimensions == 0 && count > 0 {
            return Err("zero-dimensional vectors".to_string());
        }

        let vectors = body
            .chunks_exact(4)
            .map(|raw| f32::from_le_bytes(le_array(raw)))
            .collect();

        Ok((
            Self {
                metric,
                dimensions,
                vectors,
            },
            build_id,
        ))
    }
}

fn le_array<const N: usize>(raw: &[u8]) -> [u8; N] {
    let mut array = [0u8; N];
    array.copy_from_slice(&raw[..N]);
    array
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct IndexMetadata {
    build_id: Uuid,
    embedder: String,
    dimensions: usize,
    metric: Metric,
    built_at: DateTime<Utc>,
    chunks: Vec<Chunk>,
}

/// A loaded (or freshly built) index: vectors in `index.bin`, chunks in
/// `metadata.json`, position `i` in one matching position `i` in the other.
/// Read-only; share it behind an `Arc` across queries.
#[derive(Debug, Clone)]
pub struct VectorStore {
    path: PathBuf,
    index: FlatIndex,
    metadata: IndexMetadata,
}

impl VectorStore {
    /// Embed `chunks` in one batch, build a flat index over `metric` and
    /// persist both artifacts under `path`, replacing any previous index.
    pub async fn build(
        chunks: Vec<Chunk>,
        embedder: &dyn Embedder,
        path: &Path,
        metric: Metric,
    ) -> Result<Self, IndexError> {
        if chunks.is_empty() {
            return Err(IndexError::EmptyInput);
        }

        let texts = chunks.iter().map(|chunk| chunk.text.clone()).collect::<Vec<_>>();
        let matrix = embedder.embed(&texts).await?;
        let dimensions = matrix_dimensions(&matrix, chunks.len())?;

        let mut index = FlatIndex::new(metric, dimensions);
        index.add(&matrix)?;

        let metadata = IndexMetadata {
            build_id: Uuid::new_v4(),
            embedder: embedder.model_id(),
            dimensions,
            metric,
            built_at: Utc::now(),
            chunks,
        };

        let store = Self {
            path: path.to_path_buf(),
            index,
            metadata,
        };
        store.persist().await?;

        info!(
            path = %path.display(),
            chunks = store.len(),
            dimensions,
            embedder = %store.metadata.embedder,
            "built vector index"
        );
        Ok(store)
    }

    async fn persist(&self) -> Result<(), IndexError> {
        let index_bytes = self.index.to_bytes(self.metadata.build_id);
        let metadata_bytes = serde_json::to_vec(&self.metadata)?;
        let dir = self.path.clone();

        tokio::task::spawn_blocking(move || -> Result<(), IndexError> {
            std::fs::create_dir_all(&dir)?;
            let index_file = staged(&dir, &index_bytes)?;
            let metadata_file = staged(&dir, &metadata_bytes)?;
            index_file
                .persist(dir.join(INDEX_FILE))
                .map_err(|error| IndexError::Io(error.error))?;
            metadata_file
                .persist(dir.join(METADATA_FILE))
                .map_err(|error| IndexError::Io(error.error))?;
            Ok(())
        })
        .await
        .map_err(|error| IndexError::Io(std::io::Error::other(error)))?
    }

    /// Load both artifacts from `path`. Either one missing is
    /// `IndexNotFound`; unreadable or disagreeing artifacts are `CorruptIndex`.
    pub async fn load(path: &Path) -> Result<Self, IndexError> {
        let index_path = path.join(INDEX_FILE);
        let metadata_path = path.join(METADATA_FILE);

        let (index_bytes, metadata_bytes) =
            match tokio::try_join!(tokio::fs::read(&index_path), tokio::fs::read(&metadata_path)) {
                Ok(bytes) => bytes,
                Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                    return Err(IndexError::IndexNotFound {
                        path: path.to_path_buf(),
                    })
                }
                Err(error) => return Err(IndexError::Io(error)),
            };

        let corrupt = |reason: String| IndexError::CorruptIndex {
            path: path.to_path_buf(),
            reason,
        };

        let (index, build_id) = FlatIndex::from_bytes(&index_bytes).map_err(corrupt)?;
        let metadata: IndexMetadata = serde_json::from_slice(&metadata_bytes)
            .map_err(|error| corrupt(format!("metadata: {error}")))?;

        if metadata.build_id != build_id {
            return Err(corrupt("index and metadata come from different builds".to_string()));
        }
        if metadata.chunks.len() != index.len() {
            return Err(corrupt(format!(
                "{} vectors but {} chunks",
                index.len(),
                metadata.chunks.len()
            )));
        }
        if metadata.dimensions != index.dimensions() || metadata.metric != index.metric() {
            return Err(corrupt("metadata header disagrees with index".to_string()));
        }

        debug!(path = %path.display(), chunks = index.len(), "loaded vector index");
        Ok(Self {
            path: path.to_path_buf(),
            index,
            metadata,
        })
    }

    /// Nearest chunks to `query`, best first, at most `top_k`.
    /// A blank query yields no results rather than an error.
    pub async fn search(
        &self,
        query: &str,
        top_k: usize,
        embedder: &dyn Embedder,
    ) -> Result<Vec<SearchHit>, IndexError> {
        if query.trim().is_empty() || top_k == 0 || self.index.is_empty() {
            return Ok(Vec::new());
        }

        let query_model = embedder.model_id();
        if query_model != self.metadata.embedder {
            return Err(IndexError::ModelMismatch {
                indexed: self.metadata.embedder.clone(),
                query: query_model,
            });
        }

        let matrix = embedder.embed(&[query.to_string()]).await?;
        matrix_dimensions(&matrix, 1)?;
        let neighbors = self.index.search(&matrix[0], top_k)?;

        Ok(neighbors
            .into_iter()
            .filter_map(|neighbor| {
                let chunk = self.metadata.chunks.get(neighbor.position)?;
                Some(SearchHit {
                    page: chunk.page,
                    text: chunk.text.clone(),
                    distance: neighbor.distance,
                    score: distance_to_score(neighbor.distance),
                    has_images: chunk.has_images,
                })
            })
            .collect())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.metadata.chunks
    }

    pub fn metric(&self) -> Metric {
        self.index.metric()
    }

    pub fn embedder_id(&self) -> &str {
        &self.metadata.embedder
    }
}

fn staged(dir: &Path, bytes: &[u8]) -> Result<NamedTempFile, IndexError> {
    let mut file = NamedTempFile::new_in(dir)?;
    file.write_all(bytes)?;
    file.as_file().sync_all()?;
    Ok(file)
}

/// Store page images beside an index. Optional: the index loads without it.
pub async fn save_page_images(path: &Path, images: &[PageImage]) -> Result<(), IndexError> {
    let bytes = serde_json::to_vec(images)?;
    let dir = path.to_path_buf();
    tokio::task::spawn_blocking(move || -> Result<(), IndexError> {
        std::fs::create_dir_all(&dir)?;
        staged(&dir, &bytes)?
            .persist(dir.join(IMAGES_FILE))
            .map_err(|error| IndexError::Io(error.error))?;
        Ok(())
    })
    .await
    .map_err(|error| IndexError::Io(std::io::Error::other(error)))?
}

/// Images stored for `pages`, empty when none were saved.
pub async fn load_page_images(path: &Path, pages: &[u32]) -> Vec<PageImage> {
    let Ok(bytes) = tokio::fs::read(path.join(IMAGES_FILE)).await else {
        return Vec::new();
    };
    match serde_json::from_slice::<Vec<PageImage>>(&bytes) {
        Ok(images) => images
            .into_iter()
            .filter(|image| pages.contains(&image.page))
            .collect(),
        Err(error) => {
            debug!(path = %path.display(), %error, "ignoring unreadable image store");
            Vec::new()
        }
    }
}
