//! Semantic document chunking
//!
//! Splits cleaned documents into meaning-preserving segments for indexing.
//! Sentences are embedded in small batches and a new chunk starts wherever
//! the cosine similarity between adjacent sentences drops below the
//! configured threshold, or where appending would exceed the chunk ceiling.
//! Undersized chunks are merged into a neighbour and any residual oversized
//! chunk is hard-split with a fixed-size overlap splitter.
//!
//! The chunker never raises: a failed embedding batch degrades to zero
//! vectors, and a document whose embeddings fail entirely is split with the
//! fixed-size splitter (`ChunkMethod::Fallback`).

use crate::config::ChunkerConfig;
use crate::embeddings::EmbeddingClient;
use std::sync::Arc;
use std::time::Instant;

/// A cleaned source document ready for chunking
#[derive(Debug, Clone)]
pub struct Document {
    pub id: String,
    pub url: String,
    pub title: String,
    /// Human-readable origin, e.g. "Product Documentation"
    pub source_label: String,
    pub raw_text: String,
}

/// How a chunk's boundaries were decided
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkMethod {
    /// Boundaries from embedding similarity
    Semantic,
    /// Fixed-size overlap splitter (embeddings unavailable)
    Fallback,
}

impl ChunkMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkMethod::Semantic => "semantic",
            ChunkMethod::Fallback => "fallback",
        }
    }
}

/// A bounded contiguous span of a source document
#[derive(Debug, Clone)]
pub struct Chunk {
    pub chunk_id: String,
    pub document_ref: String,
    pub text: String,
    pub method: ChunkMethod,
}

/// Embedding-driven chunker
pub struct SemanticChunker {
    embeddings: Arc<EmbeddingClient>,
    config: ChunkerConfig,
}

impl SemanticChunker {
    pub fn new(embeddings: Arc<EmbeddingClient>, config: ChunkerConfig) -> Self {
        Self { embeddings, config }
    }

    /// Chunk a document. Empty or whitespace-only input yields an empty
    /// list; any other input yields at least one chunk. Never fails.
    pub async fn chunk(&self, document: &Document) -> Vec<Chunk> {
        let start = Instant::now();
        let cleaned = clean_whitespace(&document.raw_text);
        if cleaned.is_empty() {
            return Vec::new();
        }

        let sentences = split_sentences(&cleaned);
        let texts = self.build_chunk_texts(&cleaned, &sentences).await;

        let chunks: Vec<Chunk> = texts
            .segments
            .into_iter()
            .enumerate()
            .map(|(i, text)| Chunk {
                chunk_id: format!("{}-chunk-{}", document.url, i),
                document_ref: document.id.clone(),
                text,
                method: texts.method,
            })
            .collect();

        tracing::debug!(
            document = %document.url,
            chunk_count = chunks.len(),
            method = texts.method.as_str(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Document chunked"
        );
        chunks
    }

    /// Chunk a batch of documents, preserving document order
    pub async fn chunk_all(&self, documents: &[Document]) -> Vec<Chunk> {
        let mut all = Vec::new();
        for document in documents {
            all.extend(self.chunk(document).await);
        }
        all
    }

    async fn build_chunk_texts(&self, cleaned: &str, sentences: &[String]) -> ChunkTexts {
        let embeddings = self.embed_sentences(sentences).await;

        let embeddings = match embeddings {
            Some(vectors) => vectors,
            None => {
                tracing::warn!("Embeddings unavailable for document, using fixed-size splitter");
                return ChunkTexts {
                    segments: split_with_overlap(
                        cleaned,
                        self.config.chunk_size,
                        self.config.overlap(),
                    ),
                    method: ChunkMethod::Fallback,
                };
            }
        };

        let max = self.config.max_chunk_size();
        let threshold = self.config.similarity_threshold;

        // Boundary walk: close the current chunk when similarity to the
        // previous sentence drops or the ceiling would be exceeded.
        let mut segments: Vec<String> = Vec::new();
        let mut current = sentences[0].clone();
        for i in 1..sentences.len() {
            let sentence = &sentences[i];
            let similarity = cosine_similarity(&embeddings[i - 1], &embeddings[i]);
            let would_overflow = current.len() + 1 + sentence.len() > max;
            if similarity < threshold || would_overflow {
                segments.push(std::mem::take(&mut current));
                current = sentence.clone();
            } else {
                current.push(' ');
                current.push_str(sentence);
            }
        }
        segments.push(current);

        ChunkTexts {
            segments: self.refine(segments),
            method: ChunkMethod::Semantic,
        }
    }

    /// Embed all sentences in sequential fixed-size batches.
    ///
    /// A failed batch is substituted with zero vectors so boundary detection
    /// continues (zero similarity forces a split there). Returns `None` only
    /// when every batch failed.
    async fn embed_sentences(&self, sentences: &[String]) -> Option<Vec<Vec<f32>>> {
        let batch_size = self.config.embed_batch_size.max(1);
        let mut vectors: Vec<Vec<f32>> = Vec::with_capacity(sentences.len());
        let mut any_success = false;

        for batch in sentences.chunks(batch_size) {
            let result = self.embeddings.embed(batch).await;
            if result.len() == batch.len() {
                vectors.extend(result);
                any_success = true;
            } else {
                let warning = crate::errors::AppError::DataIntegrity {
                    message: format!(
                        "embedding count mismatch: expected {}, got {}",
                        batch.len(),
                        result.len()
                    ),
                };
                tracing::warn!(error = %warning, "Embedding batch failed, substituting zero vectors");
                let dim = self.embeddings.dimension();
                vectors.extend(std::iter::repeat(vec![0.0; dim]).take(batch.len()));
            }
        }

        if any_success {
            Some(vectors)
        } else {
            None
        }
    }

    /// Merge undersized chunks into a neighbour, then hard-split anything
    /// still above the ceiling.
    fn refine(&self, segments: Vec<String>) -> Vec<String> {
        let min = self.config.min_chunk_size;
        let max = self.config.max_chunk_size();

        let mut merged: Vec<String> = Vec::with_capacity(segments.len());
        for segment in segments {
            match merged.last_mut() {
                Some(previous) if segment.len() < min => {
                    previous.push(' ');
                    previous.push_str(&segment);
                }
                _ => merged.push(segment),
            }
        }
        // A lone leading chunk has no previous neighbour; fold it forward.
        if merged.len() >= 2 && merged[0].len() < min {
            let head = merged.remove(0);
            merged[0] = format!("{} {}", head, merged[0]);
        }

        let mut refined = Vec::with_capacity(merged.len());
        for segment in merged {
            if segment.len() > max {
                refined.extend(split_with_overlap(&segment, max, self.config.overlap()));
            } else {
                refined.push(segment);
            }
        }
        refined
    }
}

struct ChunkTexts {
    segments: Vec<String>,
    method: ChunkMethod,
}

/// Collapse whitespace runs into single spaces and trim
pub fn clean_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Split text into sentences at `.`, `!` or `?` followed by whitespace.
pub fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        current.push(c);
        if matches!(c, '.' | '!' | '?') {
            if chars.peek().map_or(true, |next| next.is_whitespace()) {
                // Consume the separating whitespace
                while chars.peek().map_or(false, |next| next.is_whitespace()) {
                    chars.next();
                }
                let sentence = current.trim();
                if !sentence.is_empty() {
                    sentences.push(sentence.to_string());
                }
                current.clear();
            }
        }
    }

    let tail = current.trim();
    if !tail.is_empty() {
        sentences.push(tail.to_string());
    }
    sentences
}

/// Fixed-size splitter with overlap, the absolute upper-bound guarantee
pub fn split_with_overlap(text: &str, size: usize, overlap: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let total = chars.len();
    if total == 0 {
        return Vec::new();
    }
    let size = size.max(1);
    let advance = if overlap < size { size - overlap } else { size };

    let mut pieces = Vec::new();
    let mut start = 0;
    while start < total {
        let end = (start + size).min(total);
        let piece: String = chars[start..end].iter().collect();
        let piece = piece.trim().to_string();
        if !piece.is_empty() {
            pieces.push(piece);
        }
        if end == total {
            break;
        }
        start += advance.max(1);
    }
    pieces
}

/// Cosine similarity; zero if either vector has zero norm
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}
