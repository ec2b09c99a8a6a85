//! C1 — Policy Loader.
//!
//! Exposes two pure queries over the policy document (spec §4.1). The file
//! is re-read on every call: a missing file means "no pins / no shards",
//! silently; a malformed document is a [`PolicyError`] that aborts the
//! current tick (the control loop retries on the next event or timer, per
//! spec §7.3). Spec §9 allows caching the parsed document with mtime
//! invalidation as a performance optimization — this implementation
//! re-reads, matching the original's behavior and keeping the loader
//! trivially correct.

use crate::error::PolicyError;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, serde::Deserialize)]
struct PolicyDocument {
    #[serde(default)]
    upsf: UpsfSection,
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
struct UpsfSection {
    #[serde(default)]
    shards: Vec<RawShardEntry>,
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
struct RawShardEntry {
    name: Option<String>,
    prefixes: Option<Vec<String>>,
    #[serde(default)]
    exclude: Vec<String>,
    #[serde(rename = "serviceGatewayUserPlane")]
    service_gateway_user_plane: Option<String>,
}

/// A policy entry with the fields required for default-shard
/// materialization (spec §4.3): `name` and `prefixes` are guaranteed
/// present.
#[derive(Debug, Clone)]
pub struct PredefinedShard {
    pub name: String,
    pub prefixes: Vec<String>,
    pub exclude: Vec<String>,
    pub service_gateway_user_plane: Option<String>,
}

pub struct PolicyLoader {
    path: PathBuf,
}

impl PolicyLoader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        PolicyLoader { path: path.into() }
    }

    /// `staticPin(shardName) -> sgupName | none` (spec §4.1).
    pub fn static_pin(&self, shard_name: &str) -> Result<Option<String>, PolicyError> {
        let Some(doc) = self.load()? else {
            return Ok(None);
        };

        for entry in &doc.upsf.shards {
            let (Some(name), Some(sgup)) =
                (&entry.name, &entry.service_gateway_user_plane)
            else {
                tracing::warn!(entry = ?entry, "policy entry missing name or serviceGatewayUserPlane, skipping");
                continue;
            };
            if name == shard_name {
                return Ok(Some(sgup.clone()));
            }
        }
        Ok(None)
    }

    /// `predefinedShards() -> [entry]` (spec §4.1).
    pub fn predefined_shards(&self) -> Result<Vec<PredefinedShard>, PolicyError> {
        let Some(doc) = self.load()? else {
            return Ok(Vec::new());
        };

        let mut out = Vec::with_capacity(doc.upsf.shards.len());
        for entry in doc.upsf.shards {
            let (Some(name), Some(prefixes)) = (entry.name, entry.prefixes) else {
                tracing::warn!("policy entry missing name or prefixes, skipping");
                continue;
            };
            out.push(PredefinedShard {
                name,
                prefixes,
                exclude: entry.exclude,
                service_gateway_user_plane: entry.service_gateway_user_plane,
            });
        }
        Ok(out)
    }

    fn load(&self) -> Result<Option<PolicyDocument>, PolicyError> {
        Self::load_path(&self.path)
    }

    fn load_path(path: &Path) -> Result<Option<PolicyDocument>, PolicyError> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(PolicyError::Read {
                    path: path.display().to_string(),
                    source: err,
                })
            }
        };

        let doc: PolicyDocument =
            serde_yaml::from_str(&contents).map_err(|err| PolicyError::Parse {
                path: path.display().to_string(),
                source: err,
            })?;
        Ok(Some(doc))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_tmp(contents: &str) -> (tempfile::NamedTempFile, PolicyLoader) {
        let file = tempfile::NamedTempFile::new().expect("create temp policy file");
        std::fs::write(file.path(), contents).expect("write temp policy file");
        let loader = PolicyLoader::new(file.path().to_path_buf());
        (file, loader)
    }

    #[test]
    fn missing_file_is_empty_not_error() {
        let loader = PolicyLoader::new("/nonexistent/path/policy.yaml");
        assert!(loader.static_pin("s1").unwrap().is_none());
        assert!(loader.predefined_shards().unwrap().is_empty());
    }

    #[test]
    fn static_pin_found() {
        let (_file, loader) = write_tmp(
            r#"
upsf:
  shards:
    - name: s1
      prefixes: ["10.0.0.0/30"]
      serviceGatewayUserPlane: sgup-a
"#,
        );
        assert_eq!(loader.static_pin("s1").unwrap(), Some("sgup-a".to_string()));
        assert_eq!(loader.static_pin("missing").unwrap(), None);
    }

    #[test]
    fn entries_missing_required_fields_are_skipped() {
        let (_file, loader) = write_tmp(
            r#"
upsf:
  shards:
    - prefixes: ["10.0.0.0/30"]
    - name: s2
"#,
        );
        assert!(loader.predefined_shards().unwrap().is_empty());
    }

    #[test]
    fn malformed_document_is_an_error() {
        let (_file, loader) = write_tmp("not: [valid: yaml");
        assert!(loader.predefined_shards().is_err());
    }
}
