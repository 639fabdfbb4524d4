//! Index persistence — JSON-lines storage.
//!
//! Layout: one header line, then one line per document record, then one
//! line per chunk in slot order. Each line is a tagged JSON object:
//!
//! ```text
//! {"kind":"header","format_version":1,"generation":3,"dimension":256,"metric":"cosine"}
//! {"kind":"document","doc_id":"guide","revision":1,...}
//! {"kind":"chunk","chunk_id":"guide:1:0","vector":[0.1,...],...}
//! ```
//!
//! Vectors serialize as shortest round-trip floats, so a reload reproduces
//! them bit-exactly. Lexical postings are not stored; they are rebuilt
//! from chunk text on load.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use ctxpack_core::{DocumentChunk, Embedder, IndexError, SimilarityMetric};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::chunker::Chunker;
use crate::index::{ChunkIndex, DocumentRecord, IndexSnapshot};

const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoreHeader {
    format_version: u32,
    generation: u64,
    dimension: usize,
    metric: SimilarityMetric,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum StoreRecord {
    Header(StoreHeader),
    Document(DocumentRecord),
    Chunk(DocumentChunk),
}

impl ChunkIndex {
    /// Write the current generation to `path` as JSON lines.
    ///
    /// The file is written next to `path` and renamed into place, so a
    /// crash mid-write never leaves a half-written index behind. Saves hold
    /// the writer lock, so they never interleave with each other or with an
    /// update.
    pub async fn save(&self, path: &Path) -> Result<(), IndexError> {
        let _writer = self.writer.lock().await;
        let snapshot = self.snapshot();
        let content = encode(&snapshot)?;

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                IndexError::Storage(format!("Failed to create index directory: {e}"))
            })?;
        }

        let tmp = path.with_extension("jsonl.tmp");
        tokio::fs::write(&tmp, content)
            .await
            .map_err(|e| IndexError::Storage(format!("Failed to write index file: {e}")))?;
        tokio::fs::rename(&tmp, path)
            .await
            .map_err(|e| IndexError::Storage(format!("Failed to move index file into place: {e}")))?;

        debug!(
            path = %path.display(),
            generation = snapshot.generation(),
            chunks = snapshot.len(),
            "Index saved"
        );
        Ok(())
    }

    /// Load an index written by [`save`](Self::save).
    ///
    /// Corrupted lines are skipped with a warning; a document whose chunks
    /// did not all survive is dropped as a whole. The embedder must produce
    /// vectors of the stored dimension.
    pub async fn load(
        path: &Path,
        embedder: Arc<dyn Embedder>,
        chunker: Chunker,
    ) -> Result<Self, IndexError> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| IndexError::Storage(format!("Failed to read index file: {e}")))?;
        let snapshot = decode(&content)?;

        if embedder.dimension() != snapshot.dimension() {
            return Err(IndexError::DimensionMismatch {
                expected: snapshot.dimension(),
                actual: embedder.dimension(),
            });
        }

        debug!(
            path = %path.display(),
            generation = snapshot.generation(),
            chunks = snapshot.len(),
            "Index loaded"
        );
        Ok(Self::with_snapshot(embedder, chunker, snapshot))
    }
}

fn encode(snapshot: &IndexSnapshot) -> Result<String, IndexError> {
    let mut content = String::new();
    let mut push = |record: &StoreRecord| -> Result<(), IndexError> {
        let line = serde_json::to_string(record)
            .map_err(|e| IndexError::Storage(format!("Failed to serialize index record: {e}")))?;
        content.push_str(&line);
        content.push('\n');
        Ok(())
    };

    push(&StoreRecord::Header(StoreHeader {
        format_version: FORMAT_VERSION,
        generation: snapshot.generation(),
        dimension: snapshot.dimension(),
        metric: snapshot.metric(),
    }))?;
    for record in snapshot.documents() {
        push(&StoreRecord::Document(record.clone()))?;
    }
    for chunk in snapshot.chunks() {
        push(&StoreRecord::Chunk(chunk.as_ref().clone()))?;
    }
    Ok(content)
}

fn decode(content: &str) -> Result<IndexSnapshot, IndexError> {
    let mut header: Option<StoreHeader> = None;
    let mut documents: BTreeMap<String, DocumentRecord> = BTreeMap::new();
    let mut chunks: Vec<DocumentChunk> = Vec::new();

    for (line_no, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<StoreRecord>(line) {
            Ok(StoreRecord::Header(h)) => header = Some(h),
            Ok(StoreRecord::Document(d)) => {
                documents.insert(d.doc_id.clone(), d);
            }
            Ok(StoreRecord::Chunk(c)) => chunks.push(c),
            Err(e) => {
                warn!(line = line_no + 1, error = %e, "Skipping corrupted index record");
            }
        }
    }

    let header = header.ok_or_else(|| IndexError::Corrupt("missing header record".into()))?;
    if header.format_version != FORMAT_VERSION {
        return Err(IndexError::Corrupt(format!(
            "unsupported format version {}",
            header.format_version
        )));
    }

    // Drop chunks with the wrong dimension, then documents left incomplete.
    chunks.retain(|c| {
        let ok = c.vector.len() == header.dimension;
        if !ok {
            warn!(chunk_id = %c.chunk_id, "Skipping chunk with wrong vector dimension");
        }
        ok
    });
    let present: HashSet<&str> = chunks.iter().map(|c| c.chunk_id.as_str()).collect();
    let incomplete: Vec<String> = documents
        .values()
        .filter(|d| d.chunk_ids.iter().any(|id| !present.contains(id.as_str())))
        .map(|d| d.doc_id.clone())
        .collect();
    for doc_id in &incomplete {
        warn!(doc_id = %doc_id, "Dropping document with missing chunks");
        documents.remove(doc_id);
    }
    chunks.retain(|c| documents.contains_key(&c.source_doc_id));

    Ok(IndexSnapshot::from_parts(
        header.generation,
        header.dimension,
        header.metric,
        chunks,
        documents,
    ))
}
