//! Exact nearest-neighbour index
//!
//! An [`IndexPair`] bundles a flat L2 index, the ordinal-aligned chunk store
//! and the manifest that ties them together. Ordinal `i` in the index is
//! always `chunks[i]` in the store.


pub mod store;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::cmp::Ordering;
use std::fmt::Write as _;

use crate::embeddings::Chunk;
use crate::errors::PipelineError;

pub use store::IndexStore;

/// Magic bytes at the start of `vectors.bin`
pub const VECTORS_MAGIC: [u8; 4] = *b"DVIX";
/// On-disk format version of all three artifacts
pub const FORMAT_VERSION: u32 = 1;
/// magic + version + dimension + count
const VECTORS_HEADER_LEN: usize = 4 + 4 + 4 + 8;

/// A search hit: an index ordinal and its Euclidean distance to the query
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub ordinal: usize,
    pub distance: f32,
}

/// Brute-force L2 index over a row-major `f32` matrix
#[derive(Debug, Clone, PartialEq)]
pub struct FlatL2Index {
    dimension: usize,
    data: Vec<f32>,
}

impl FlatL2Index {
    #[inline]
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            data: Vec::new(),
        }
    }

    #[inline]
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    #[inline]
    pub fn len(&self) -> usize {
        if self.dimension == 0 {
            0
        } else {
            self.data.len() / self.dimension
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append a vector, returning its ordinal
    #[inline]
    pub fn add(&mut self, vector: &[f32]) -> Result<usize, PipelineError> {
        if vector.len() != self.dimension {
            return Err(PipelineError::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }
        let ordinal = self.len();
        self.data.extend_from_slice(vector);
        Ok(ordinal)
    }

    #[inline]
    pub fn vector(&self, ordinal: usize) -> Option<&[f32]> {
        let start = ordinal.checked_mul(self.dimension)?;
        self.data.get(start..start + self.dimension)
    }

    /// The `k` nearest vectors by Euclidean distance, ascending, ties by ordinal
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>, PipelineError> {
        if query.len() != self.dimension {
            return Err(PipelineError::DimensionMismatch {
                expected: self.dimension,
                actual: query.len(),
            });
        }

        let k = k.min(self.len());
        if k == 0 {
            return Ok(Vec::new());
        }

        let mut neighbors: Vec<Neighbor> = self
            .data
            .chunks_exact(self.dimension)
            .enumerate()
            .map(|(ordinal, row)| Neighbor {
                ordinal,
                distance: squared_l2(row, query),
            })
            .collect();

        if k < neighbors.len() {
            neighbors.select_nth_unstable_by(k - 1, compare_neighbors);
            neighbors.truncate(k);
        }
        neighbors.sort_unstable_by(compare_neighbors);

        for neighbor in &mut neighbors {
            neighbor.distance = neighbor.distance.sqrt();
        }

        Ok(neighbors)
    }

    /// Serialize as `vectors.bin`: little-endian header, then the row-major `f32` matrix
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(VECTORS_HEADER_LEN + self.data.len() * 4);
        bytes.extend_from_slice(&VECTORS_MAGIC);
        bytes.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        bytes.extend_from_slice(&u32::try_from(self.dimension).unwrap_or(u32::MAX).to_le_bytes());
        bytes.extend_from_slice(&(self.len() as u64).to_le_bytes());
        bytes.extend_from_slice(bytemuck::cast_slice(&self.data));
        bytes
    }

    #[inline]
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PipelineError> {
        if bytes.len() < VECTORS_HEADER_LEN {
            return Err(PipelineError::index_unavailable("vectors.bin is truncated"));
        }
        let (header, body) = bytes.split_at(VECTORS_HEADER_LEN);

        if header[0..4] != VECTORS_MAGIC {
            return Err(PipelineError::index_unavailable(
                "vectors.bin has an unknown format",
            ));
        }
        let version = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
        if version != FORMAT_VERSION {
            return Err(PipelineError::index_unavailable(format!(
                "vectors.bin has unsupported version {version}"
            )));
        }
        let dimension = u32::from_le_bytes([header[8], header[9], header[10], header[11]]);
        let mut count_bytes = [0u8; 8];
        count_bytes.copy_from_slice(&header[12..20]);
        let count = u64::from_le_bytes(count_bytes);

        let dimension = usize::try_from(dimension)
            .map_err(|_| PipelineError::index_unavailable("vectors.bin dimension overflows"))?;
        let count = usize::try_from(count)
            .map_err(|_| PipelineError::index_unavailable("vectors.bin count overflows"))?;
        let expected_len = count
            .checked_mul(dimension)
            .and_then(|values| values.checked_mul(4))
            .ok_or_else(|| PipelineError::index_unavailable("vectors.bin size overflows"))?;

        if body.len() != expected_len || (dimension == 0 && count > 0) {
            return Err(PipelineError::index_unavailable(format!(
                "vectors.bin holds {} bytes of vectors, expected {} for {} x {}",
                body.len(),
                expected_len,
                count,
                dimension
            )));
        }

        // pod_read_unaligned copes with buffers that are not 4-byte aligned
        let data = body
            .chunks_exact(4)
            .map(bytemuck::pod_read_unaligned::<f32>)
            .collect();

        Ok(Self { dimension, data })
    }
}

fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| {
            let diff = x - y;
            diff * diff
        })
        .sum()
}

fn compare_neighbors(a: &Neighbor, b: &Neighbor) -> Ordering {
    a.distance
        .total_cmp(&b.distance)
        .then(a.ordinal.cmp(&b.ordinal))
}

/// Ordinal-aligned side table of chunk text and provenance
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkStore {
    pub format_version: u32,
    pub chunks: Vec<Chunk>,
}

impl ChunkStore {
    #[inline]
    pub fn new(chunks: Vec<Chunk>) -> Self {
        Self {
            format_version: FORMAT_VERSION,
            chunks,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    #[inline]
    pub fn get(&self, ordinal: usize) -> Option<&Chunk> {
        self.chunks.get(ordinal)
    }

    #[inline]
    pub fn to_bytes(&self) -> Result<Vec<u8>, PipelineError> {
        serde_json::to_vec(self)
            .map_err(|e| PipelineError::index_write(format!("failed to serialize chunks: {e}")))
    }

    #[inline]
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PipelineError> {
        let store: Self = serde_json::from_slice(bytes).map_err(|e| {
            PipelineError::index_unavailable(format!("chunks.json is unreadable: {e}"))
        })?;
        if store.format_version != FORMAT_VERSION {
            return Err(PipelineError::index_unavailable(format!(
                "chunks.json has unsupported version {}",
                store.format_version
            )));
        }
        Ok(store)
    }
}

/// Metadata tying `vectors.bin` and `chunks.json` of one generation together
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub format_version: u32,
    pub model_id: String,
    pub dimension: usize,
    pub count: usize,
    pub vectors_sha256: String,
    pub chunks_sha256: String,
    pub created_at: DateTime<Utc>,
}

impl Manifest {
    #[inline]
    pub fn to_bytes(&self) -> Result<Vec<u8>, PipelineError> {
        serde_json::to_vec_pretty(self)
            .map_err(|e| PipelineError::index_write(format!("failed to serialize manifest: {e}")))
    }

    #[inline]
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, PipelineError> {
        let manifest: Self = serde_json::from_slice(bytes).map_err(|e| {
            PipelineError::index_unavailable(format!("manifest.json is unreadable: {e}"))
        })?;
        if manifest.format_version != FORMAT_VERSION {
            return Err(PipelineError::index_unavailable(format!(
                "manifest.json has unsupported version {}",
                manifest.format_version
            )));
        }
        Ok(manifest)
    }
}

/// Hex-encoded SHA-256 of `bytes`
#[inline]
pub fn sha256_hex(bytes: &[u8]) -> String {
    Sha256::digest(bytes)
        .iter()
        .fold(String::with_capacity(64), |mut hex, byte| {
            let _ = write!(hex, "{byte:02x}");
            hex
        })
}

/// Serialized form of an [`IndexPair`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexArtifacts {
    pub vectors: Vec<u8>,
    pub chunks: Vec<u8>,
    pub manifest: Vec<u8>,
}

/// A vector index and its chunk store, always handled together
#[derive(Debug, Clone, PartialEq)]
pub struct IndexPair {
    index: FlatL2Index,
    chunks: ChunkStore,
    manifest: Manifest,
}

impl IndexPair {
    /// Build a pair from embeddings and the chunks they were computed from
    #[inline]
    pub fn build(
        model_id: &str,
        vectors: &[Vec<f32>],
        chunks: Vec<Chunk>,
    ) -> Result<Self, PipelineError> {
        if vectors.len() != chunks.len() {
            return Err(PipelineError::index_write(format!(
                "{} vectors for {} chunks",
                vectors.len(),
                chunks.len()
            )));
        }

        let dimension = vectors.first().map_or(0, Vec::len);
        let mut index = FlatL2Index::new(dimension);
        for vector in vectors {
            index.add(vector)?;
        }
        let chunks = ChunkStore::new(chunks);

        let manifest = Manifest {
            format_version: FORMAT_VERSION,
            model_id: model_id.to_string(),
            dimension,
            count: index.len(),
            vectors_sha256: sha256_hex(&index.to_bytes()),
            chunks_sha256: sha256_hex(&chunks.to_bytes()?),
            created_at: Utc::now(),
        };

        Ok(Self {
            index,
            chunks,
            manifest,
        })
    }

    #[inline]
    pub fn index(&self) -> &FlatL2Index {
        &self.index
    }

    #[inline]
    pub fn chunks(&self) -> &ChunkStore {
        &self.chunks
    }

    #[inline]
    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.index.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    #[inline]
    pub fn to_artifacts(&self) -> Result<IndexArtifacts, PipelineError> {
        Ok(IndexArtifacts {
            vectors: self.index.to_bytes(),
            chunks: self.chunks.to_bytes()?,
            manifest: self.manifest.to_bytes()?,
        })
    }

    /// Decode and cross-check the three artifacts of one generation
    pub fn from_artifacts(artifacts: &IndexArtifacts) -> Result<Self, PipelineError> {
        let manifest = Manifest::from_bytes(&artifacts.manifest)?;

        if sha256_hex(&artifacts.vectors) != manifest.vectors_sha256 {
            return Err(PipelineError::index_unavailable(
                "vectors.bin does not match its manifest checksum",
            ));
        }
        if sha256_hex(&artifacts.chunks) != manifest.chunks_sha256 {
            return Err(PipelineError::index_unavailable(
                "chunks.json does not match its manifest checksum",
            ));
        }

        let index = FlatL2Index::from_bytes(&artifacts.vectors)?;
        let chunks = ChunkStore::from_bytes(&artifacts.chunks)?;

        if index.len() != manifest.count || chunks.len() != manifest.count {
            return Err(PipelineError::index_unavailable(format!(
                "manifest lists {} entries but the index holds {} vectors and {} chunks",
                manifest.count,
                index.len(),
                chunks.len()
            )));
        }
        if index.dimension() != manifest.dimension {
            return Err(PipelineError::index_unavailable(format!(
                "manifest dimension {} does not match index dimension {}",
                manifest.dimension,
                index.dimension()
            )));
        }

        Ok(Self {
            index,
            chunks,
            manifest,
        })
    }
}
