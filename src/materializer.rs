//! C3 — Default-Item Materializer. Ensures every shard named in policy
//! exists in the store, with computed capacity and an initial SGUP binding
//! (spec §4.3). Idempotent: never touches an existing shard.

use crate::ipcalc;
use crate::model::CreateShardParams;
use crate::policy::PolicyLoader;
use crate::store::UpsfStore;
use std::collections::HashSet;
use std::sync::Arc;

pub struct DefaultItemMaterializer {
    store: Arc<dyn UpsfStore>,
    policy: PolicyLoader,
    virtual_mac: String,
}

impl DefaultItemMaterializer {
    pub fn new(store: Arc<dyn UpsfStore>, policy: PolicyLoader, virtual_mac: String) -> Self {
        DefaultItemMaterializer {
            store,
            policy,
            virtual_mac,
        }
    }

    /// Invoked on startup and on every periodic tick (spec §4.3).
    pub async fn materialize(&self) -> Result<(), crate::error::StoreError> {
        let entries = match self.policy.predefined_shards() {
            Ok(entries) => entries,
            Err(err) => {
                tracing::warn!(error = %err, "policy error, skipping this materialization tick");
                return Ok(());
            }
        };
        if entries.is_empty() {
            return Ok(());
        }

        let sgups = self.store.list_sgups().await?;
        if sgups.is_empty() {
            tracing::warn!("no sgups available, aborting default-shard materialization");
            return Ok(());
        }

        let existing: HashSet<String> = self
            .store
            .list_shards()
            .await?
            .into_iter()
            .map(|s| s.name)
            .collect();

        let sgup_names: Vec<String> = sgups.iter().map(|up| up.name.clone()).collect();
        let mut round_robin = sgup_names.iter();

        for entry in entries {
            if existing.contains(&entry.name) {
                continue;
            }

            let exclude = ipcalc::parse_exclusions(&entry.exclude);
            let mut max_session_count: u64 = 0;
            for prefix in &entry.prefixes {
                match ipcalc::host_count(prefix, &exclude) {
                    Ok(count) => max_session_count += count,
                    Err(err) => {
                        tracing::warn!(
                            shard = %entry.name,
                            prefix = %prefix,
                            error = %err,
                            "invalid prefix, ignoring"
                        );
                    }
                }
            }

            let desired_sgup = match entry.service_gateway_user_plane {
                Some(pinned) => {
                    if !sgup_names.iter().any(|n| n == &pinned) {
                        tracing::warn!(
                            shard = %entry.name,
                            sgup = %pinned,
                            "desired sgup for shard not available, ignoring"
                        );
                        continue;
                    }
                    Some(pinned)
                }
                None => round_robin.next().cloned(),
            };

            let params = CreateShardParams {
                name: entry.name.clone(),
                virtual_mac: self.virtual_mac.clone(),
                allocated_session_count: 0,
                max_session_count: max_session_count as i64,
                prefix: entry.prefixes,
                desired_service_gateway_user_plane: desired_sgup,
            };

            tracing::info!(shard = %entry.name, params = ?params, "materializing default shard");
            self.store.create_shard(params).await?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Endpoint, ServiceGateway, ServiceGatewayUserPlane};
    use crate::store::mock::MockStore;

    fn sgup(name: &str) -> ServiceGatewayUserPlane {
        ServiceGatewayUserPlane {
            name: name.to_string(),
            service_gateway_name: "sg1".to_string(),
            max_session_count: 100,
            allocated_session_count: 0,
            default_endpoint: Endpoint::new(format!("ep-{name}")),
            supported_service_group: vec![],
        }
    }

    fn write_policy(contents: &str) -> (tempfile::TempDir, PolicyLoader) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("policy.yaml");
        std::fs::write(&path, contents).unwrap();
        let loader = PolicyLoader::new(path);
        (dir, loader)
    }

    #[tokio::test]
    async fn capacity_with_exclusion() {
        let (_dir, policy) = write_policy(
            r#"
upsf:
  shards:
    - name: s
      prefixes: ["10.0.0.0/30"]
      exclude: ["10.0.0.1"]
"#,
        );
        let store = Arc::new(MockStore::new().with_sgups(vec![sgup("A")]));
        let materializer =
            DefaultItemMaterializer::new(store.clone(), policy, "00:00:01:00:00:00".to_string());
        materializer.materialize().await.unwrap();

        let shard = store.shard("s").unwrap();
        assert_eq!(shard.prefix, vec!["10.0.0.0/30".to_string()]);
    }

    #[tokio::test]
    async fn idempotent_on_existing_shard() {
        let (_dir, policy) = write_policy(
            r#"
upsf:
  shards:
    - name: s
      prefixes: ["10.0.0.0/30"]
"#,
        );
        let store = Arc::new(
            MockStore::new()
                .with_sgups(vec![sgup("A")])
                .with_shards(vec![crate::model::Shard {
                    name: "s".to_string(),
                    prefix: vec!["10.0.0.0/30".to_string()],
                    desired_state: Default::default(),
                    current_state: Default::default(),
                }]),
        );
        let materializer =
            DefaultItemMaterializer::new(store.clone(), policy, "00:00:01:00:00:00".to_string());
        materializer.materialize().await.unwrap();
        materializer.materialize().await.unwrap();

        use crate::store::UpsfStore;
        assert_eq!(store.list_shards().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn static_pin_unresolvable_is_skipped() {
        let (_dir, policy) = write_policy(
            r#"
upsf:
  shards:
    - name: s
      prefixes: ["10.0.0.0/30"]
      serviceGatewayUserPlane: missing
"#,
        );
        let store = Arc::new(MockStore::new().with_sgups(vec![sgup("A")]));
        let materializer =
            DefaultItemMaterializer::new(store.clone(), policy, "00:00:01:00:00:00".to_string());
        materializer.materialize().await.unwrap();

        assert!(store.shard("s").is_none());
    }

    #[tokio::test]
    async fn no_sgups_aborts_materialization() {
        let (_dir, policy) = write_policy(
            r#"
upsf:
  shards:
    - name: s
      prefixes: ["10.0.0.0/30"]
"#,
        );
        let store = Arc::new(MockStore::new());
        let materializer =
            DefaultItemMaterializer::new(store.clone(), policy, "00:00:01:00:00:00".to_string());
        materializer.materialize().await.unwrap();

        assert!(store.shard("s").is_none());
    }
}
