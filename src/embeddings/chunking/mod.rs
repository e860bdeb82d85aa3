
use fancy_regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::PipelineError;
use crate::loader::{Provenance, TextUnit};

/// Preferred cut points, strongest first. A cut lands right after the match.
const SEPARATOR_PATTERNS: &[&str] = &[
    // paragraph break
    r"\n[ \t]*\n",
    // line break
    r"\n",
    // sentence end
    r"(?<=[.!?])\s",
    // any whitespace
    r"\s",
];

/// A contiguous slice of a text unit, ready for embedding
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub text: String,
    pub provenance: Provenance,
    /// Position of this chunk within its unit
    pub position: usize,
    /// Character offset of the first char inside the unit text
    pub start: usize,
    /// Character offset one past the last char inside the unit text
    pub end: usize,
}

impl Chunk {
    #[inline]
    pub fn char_len(&self) -> usize {
        self.end - self.start
    }
}

/// Configuration for splitting text units
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Maximum chunk length in characters
    pub chunk_size: usize,
    /// Characters shared by adjacent chunks of the same unit
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    #[inline]
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 200,
        }
    }
}

impl ChunkingConfig {
    #[inline]
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.chunk_size == 0 {
            return Err(PipelineError::InvalidSettings {
                message: "chunk_size must be greater than zero".to_string(),
            });
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(PipelineError::InvalidSettings {
                message: format!(
                    "chunk_overlap ({}) must be smaller than chunk_size ({})",
                    self.chunk_overlap, self.chunk_size
                ),
            });
        }
        Ok(())
    }

    /// Length of the fresh segment each chunk contributes
    #[inline]
    pub fn stride(&self) -> usize {
        self.chunk_size - self.chunk_overlap
    }
}

/// Splits text units into overlapping, bounded chunks
#[derive(Debug)]
pub struct Chunker {
    config: ChunkingConfig,
    separators: Vec<Regex>,
}

impl Chunker {
    #[inline]
    pub fn new(config: &ChunkingConfig) -> Result<Self, PipelineError> {
        config.validate()?;

        let separators = SEPARATOR_PATTERNS
            .iter()
            .map(|pattern| {
                Regex::new(pattern).map_err(|e| PipelineError::InvalidSettings {
                    message: format!("invalid separator pattern {pattern:?}: {e}"),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            config: config.clone(),
            separators,
        })
    }

    #[inline]
    pub fn config(&self) -> &ChunkingConfig {
        &self.config
    }

    /// Character spans `[start, end)` of the chunks of `text`
    ///
    /// The spans are ordered, cover the whole text without gaps, and each
    /// span after the first begins `chunk_overlap` characters before the end
    /// of its predecessor.
    ///
    /// The first span has no overlap to carry, so it holds at most
    /// `chunk_size - chunk_overlap` characters; later spans reach `chunk_size`.
    pub fn split_spans(&self, text: &str) -> Vec<(usize, usize)> {
        if text.trim().is_empty() {
            return Vec::new();
        }

        // offsets[i] is the byte offset of char i; offsets[len] == text.len()
        let offsets: Vec<usize> = text
            .char_indices()
            .map(|(offset, _)| offset)
            .chain(std::iter::once(text.len()))
            .collect();
        let len = offsets.len() - 1;

        let size = self.config.chunk_size;
        let overlap = self.config.chunk_overlap;
        let stride = self.config.stride();

        if len <= size {
            return vec![(0, len)];
        }

        let mut spans = Vec::new();
        let mut segment_start: usize = 0;
        loop {
            let chunk_start = if spans.is_empty() {
                0
            } else {
                segment_start.saturating_sub(overlap)
            };

            if !spans.is_empty() && len - chunk_start <= size {
                spans.push((chunk_start, len));
                break;
            }

            let window_end = (segment_start + stride).min(len);
            let search_from = segment_start + (stride / 2).max(1);
            let cut = self.find_cut(text, &offsets, segment_start, search_from, window_end);

            spans.push((chunk_start, cut));
            if cut >= len {
                break;
            }
            segment_start = cut;
        }

        spans
    }

    /// Best cut position in `[search_from, window_end]`, falling back to a hard cut
    fn find_cut(
        &self,
        text: &str,
        offsets: &[usize],
        segment_start: usize,
        search_from: usize,
        window_end: usize,
    ) -> usize {
        if search_from >= window_end {
            return window_end;
        }

        let base = offsets[segment_start];
        let window = &text[base..offsets[window_end]];

        for separator in &self.separators {
            let mut best = None;
            for found in separator.find_iter(window) {
                let Ok(found) = found else {
                    break;
                };
                let cut = offsets.partition_point(|&offset| offset < base + found.end());
                if cut >= search_from {
                    best = Some(cut);
                }
            }
            if let Some(cut) = best {
                return cut;
            }
        }

        window_end
    }

    /// Split one unit into chunks
    #[inline]
    pub fn chunk_unit(&self, unit: &TextUnit) -> Vec<Chunk> {
        let spans = self.split_spans(&unit.text);
        if spans.is_empty() {
            return Vec::new();
        }

        let offsets: Vec<usize> = unit
            .text
            .char_indices()
            .map(|(offset, _)| offset)
            .chain(std::iter::once(unit.text.len()))
            .collect();

        spans
            .into_iter()
            .enumerate()
            .map(|(position, (start, end))| Chunk {
                text: unit.text[offsets[start]..offsets[end]].to_string(),
                provenance: unit.provenance.clone(),
                position,
                start,
                end,
            })
            .collect()
    }
}

/// Chunk every unit, preserving unit order and in-unit position order
#[inline]
pub fn chunk_units(units: &[TextUnit], config: &ChunkingConfig) -> Result<Vec<Chunk>, PipelineError> {
    let chunker = Chunker::new(config)?;
    let chunks: Vec<Chunk> = units
        .iter()
        .flat_map(|unit| chunker.chunk_unit(unit))
        .collect();

    debug!(
        "Chunked {} units into {} chunks (avg {} chars)",
        units.len(),
        chunks.len(),
        chunks.iter().map(Chunk::char_len).sum::<usize>() / chunks.len().max(1)
    );

    Ok(chunks)
}
