//! On-disk schema snapshots keyed by scope set
//!
//! A snapshot is reused only while its recorded fingerprint still matches the
//! schema it carries; anything unreadable is rebuilt from the provider.

use lens_ir::{SchemaError, SchemaGraph, SchemaProvider};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Schema cache I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Schema cache encoding failed: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Serialize, Deserialize)]
struct Envelope {
    fingerprint: String,
    scopes: Vec<String>,
    schema: SchemaGraph,
}

pub struct SchemaCache {
    dir: PathBuf,
}

impl SchemaCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Same scope set in any order maps to the same file
    pub fn path_for(&self, scopes: &[String]) -> PathBuf {
        let mut sorted: Vec<&str> = scopes.iter().map(String::as_str).collect();
        sorted.sort_unstable();
        sorted.dedup();

        let digest = Sha256::digest(sorted.join("\n").as_bytes());
        let key = format!("{:x}", digest);
        self.dir.join(format!("lens-schema-{}.json", &key[..16]))
    }

    pub fn load(&self, scopes: &[String]) -> Option<SchemaGraph> {
        let path = self.path_for(scopes);
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(_) => {
                debug!(path = %path.display(), "Schema cache miss");
                return None;
            }
        };

        let envelope: Envelope = match serde_json::from_str(&text) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Discarding unreadable schema cache");
                return None;
            }
        };

        if envelope.schema.fingerprint() != envelope.fingerprint {
            warn!(path = %path.display(), "Schema cache fingerprint mismatch");
            return None;
        }

        debug!(path = %path.display(), fingerprint = %envelope.fingerprint, "Schema cache hit");
        Some(envelope.schema)
    }

    pub fn store(&self, scopes: &[String], graph: &SchemaGraph) -> Result<PathBuf, CacheError> {
        fs::create_dir_all(&self.dir)?;
        let path = self.path_for(scopes);
        let envelope = Envelope {
            fingerprint: graph.fingerprint(),
            scopes: scopes.to_vec(),
            schema: graph.clone(),
        };
        fs::write(&path, serde_json::to_string_pretty(&envelope)?)?;
        Ok(path)
    }

    /// Cached snapshot, or a fresh one from `provider` when missing, stale or forced
    pub fn get_or_build(
        &self,
        provider: &dyn SchemaProvider,
        scopes: &[String],
        force: bool,
    ) -> Result<SchemaGraph, SchemaError> {
        if !force {
            if let Some(graph) = self.load(scopes) {
                return Ok(graph);
            }
        }

        let graph = provider.build_schema(scopes)?;
        info!(entities = graph.entities().len(), force, "Built schema snapshot");

        if let Err(e) = self.store(scopes, &graph) {
            warn!(error = %e, "Failed to persist schema snapshot");
        }
        Ok(graph)
    }
}
