//! C4 — Shard Mapper: the reconciler. One [`ShardMapper::reconcile`] call
//! performs a full sweep over the store snapshot, computing and writing
//! the desired SGUP and network-connection set for every shard (spec
//! §4.4). Triggered by C5 on every watch event and once at startup.

use crate::model::{
    ItemKind, ListMergeStrategy, NetworkConnection, OrderedNcSet, ServiceGateway,
    ServiceGatewayUserPlane, Shard, TrafficSteeringFunction, UpdateShardParams,
};
use crate::policy::PolicyLoader;
use crate::store::UpsfStore;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

pub struct ShardMapper {
    store: Arc<dyn UpsfStore>,
    policy: PolicyLoader,
}

impl ShardMapper {
    pub fn new(store: Arc<dyn UpsfStore>, policy: PolicyLoader) -> Self {
        ShardMapper { store, policy }
    }

    /// Performs one reconciliation sweep (spec §4.4). Errors from
    /// individual shards are logged and do not abort the sweep; only a
    /// snapshot-read failure propagates to the caller (C5), which treats
    /// it as transient.
    pub async fn reconcile(&self) -> Result<(), crate::error::StoreError> {
        let sgs = self.store.list_sgs().await?;
        let sgups = self.store.list_sgups().await?;
        let shards = self.store.list_shards().await?;

        if sgups.is_empty() {
            self.clear_all_bindings(&shards).await;
            return Ok(());
        }

        let tsfs = self.store.list_tsfs().await?;
        let ncs = self.store.list_ncs().await?;

        let sg_names: HashSet<&str> = sgs.iter().map(|sg| sg.name.as_str()).collect();
        let up_names: HashSet<&str> = sgups.iter().map(|up| up.name.as_str()).collect();

        for shard in &shards {
            if let Err(err) = self
                .reconcile_shard(shard, &sgups, &tsfs, &ncs, &sg_names, &up_names)
                .await
            {
                tracing::error!(shard = %shard.name, error = %err, "shard update failed, continuing sweep");
            }
        }

        self.dump_shards().await;
        Ok(())
    }

    /// Spec §4.4 step 2: with no SGUPs available, every shard that had a
    /// non-empty desired SGUP loses its network connections.
    async fn clear_all_bindings(&self, shards: &[Shard]) {
        tracing::warn!("no service gateway user planes available, resetting all shards");
        for shard in shards {
            if shard.desired_state.service_gateway_user_plane.is_empty() {
                continue;
            }
            let params = UpdateShardParams {
                name: shard.name.clone(),
                prefix: shard.prefix.clone(),
                list_merge_strategy: Some(ListMergeStrategy::Replace),
                ..Default::default()
            };
            if let Err(err) = self.store.update_shard(params).await {
                tracing::error!(shard = %shard.name, error = %err, "failed to clear shard binding");
            }
        }
    }

    async fn reconcile_shard(
        &self,
        shard: &Shard,
        sgups: &[ServiceGatewayUserPlane],
        tsfs: &[TrafficSteeringFunction],
        ncs: &[NetworkConnection],
        sg_names: &HashSet<&str>,
        up_names: &HashSet<&str>,
    ) -> Result<(), crate::error::StoreError> {
        let fp_active = fingerprint(
            &shard.desired_state.service_gateway_user_plane,
            &shard.desired_state.network_connection.join(","),
        );

        let Some(up_name) = self.select_sgup(shard, sgups, sg_names, up_names)? else {
            return Ok(());
        };

        // Spec §4.4 step 4c: resolve the chosen SGUP's default endpoint via
        // a fresh `getSGUP` rather than trusting the sweep-start snapshot,
        // in case it changed between the list and this point.
        let Some(chosen) = self.store.get_sgup(&up_name).await? else {
            tracing::warn!(shard = %shard.name, sgup = %up_name, "selected sgup vanished before fetch, skipping shard this sweep");
            return Ok(());
        };

        let up_ep_name = chosen.default_endpoint.name.as_str();

        let (desired_nc, tsf_nc) = match_network_connections(tsfs, ncs, up_ep_name);

        let fp_desired = fingerprint(&chosen.name, &desired_nc.join(","));

        if fp_desired == fp_active {
            tracing::debug!(shard = %shard.name, sgup = %chosen.name, "no shard update needed");
            return Ok(());
        }

        let service_groups_supported: Vec<String> = chosen
            .supported_service_group
            .iter()
            .filter(|g| !g.is_empty())
            .cloned()
            .collect();

        let params = UpdateShardParams {
            name: shard.name.clone(),
            desired_service_gateway_user_plane: Some(chosen.name.clone()),
            desired_network_connection: Some(desired_nc.into_vec()),
            current_tsf_network_connection: Some(tsf_nc),
            service_groups_supported: Some(service_groups_supported),
            prefix: shard.prefix.clone(),
            list_merge_strategy: Some(ListMergeStrategy::Replace),
        };

        tracing::debug!(shard = %shard.name, sgup = %chosen.name, "updating shard");
        self.store.update_shard(params).await?;
        Ok(())
    }

    /// Spec §4.4 step 4b. Returns `Ok(None)` when the shard should be left
    /// alone for this sweep (unresolvable static pin, or no eligible SGUP
    /// for a re-selection).
    fn select_sgup(
        &self,
        shard: &Shard,
        sgups: &[ServiceGatewayUserPlane],
        sg_names: &HashSet<&str>,
        up_names: &HashSet<&str>,
    ) -> Result<Option<String>, crate::error::StoreError> {
        let current_up = &shard.desired_state.service_gateway_user_plane;

        let static_pin = match self.policy.static_pin(&shard.name) {
            Ok(pin) => pin,
            Err(err) => {
                tracing::warn!(shard = %shard.name, error = %err, "policy error reading static pin, skipping shard");
                return Ok(None);
            }
        };

        let stale = !up_names.contains(current_up.as_str());
        let needs_reselection = match &static_pin {
            Some(pin) => pin != current_up || stale,
            None => stale,
        };

        if !needs_reselection {
            return Ok(Some(current_up.clone()));
        }

        if let Some(pin) = static_pin {
            if !up_names.contains(pin.as_str()) {
                tracing::warn!(
                    shard = %shard.name,
                    sgup = %pin,
                    "shard has static sgup mapping, but sgup is not available, ignoring"
                );
                return Ok(None);
            }
            tracing::info!(shard = %shard.name, sgup = %pin, "shard has static mapping");
            return Ok(Some(pin));
        }

        let load: BTreeMap<&str, f64> = sgups
            .iter()
            .filter(|up| up.max_session_count > 0 && sg_names.contains(up.service_gateway_name.as_str()))
            .map(|up| (up.name.as_str(), up.load()))
            .collect();

        if load.is_empty() {
            tracing::warn!(shard = %shard.name, "set of sgup candidates is empty");
            return Ok(None);
        }

        // `BTreeMap` iterates by key (SGUP name) ascending, giving a
        // deterministic, lexicographic tie-break among equal loads (spec §9
        // "Open question — tie-breaking").
        let (selected, _) = load
            .iter()
            .min_by(|(_, a), (_, b)| a.partial_cmp(b).expect("load is never NaN"))
            .expect("load map checked non-empty above");

        tracing::info!(shard = %shard.name, sgup = %selected, "selected new user plane");
        Ok(Some(selected.to_string()))
    }

    async fn dump_shards(&self) {
        let Ok(shards) = self.store.list_shards().await else {
            return;
        };
        for shard in shards {
            tracing::debug!(
                shard = %shard.name,
                desired_up = %shard.desired_state.service_gateway_user_plane,
                current_up = %shard.current_state.service_gateway_user_plane,
                "shard state"
            );
        }
    }
}

/// `SHA-256(up + "/" + joined-nc-names)` (spec §4.4 step 4a/e, GLOSSARY).
fn fingerprint(up: &str, joined_ncs: &str) -> String {
    let finger = format!("{up}/{joined_ncs}");
    let mut hasher = Sha256::new();
    hasher.update(finger.as_bytes());
    hex::encode(hasher.finalize())
}

/// Spec §4.4 step 4d: for every TSF, scan every NC and apply the topology
/// rule. Returns the desired NC set (in first-match insertion order, so
/// the fingerprint and the write use the same order) and the per-TSF
/// last-match map.
fn match_network_connections(
    tsfs: &[TrafficSteeringFunction],
    ncs: &[NetworkConnection],
    up_ep_name: &str,
) -> (OrderedNcSet, BTreeMap<String, String>) {
    let mut desired_nc = OrderedNcSet::new();
    let mut tsf_nc = BTreeMap::new();

    for tsf in tsfs {
        let tsf_ep_name = tsf.default_endpoint.name.as_str();
        for nc in ncs {
            if nc.topology.matches(up_ep_name, tsf_ep_name) {
                desired_nc.insert(nc.name.clone());
                tsf_nc.insert(tsf.name.clone(), nc.name.clone());
            }
        }
    }

    (desired_nc, tsf_nc)
}

/// Items the control loop watches trigger a fresh [`ShardMapper::reconcile`]
/// sweep regardless of which of the four kinds fired (spec §4.5).
pub fn is_watched(kind: ItemKind) -> bool {
    crate::model::WATCHED_KINDS.contains(&kind)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CreateShardParams, CurrentState, DesiredState, Endpoint, NcTopology};
    use crate::store::mock::MockStore;
    use crate::store::UpsfStore;
    use std::sync::Arc;

    fn sgup(name: &str, sg: &str, alloc: i64, max: i64, ep: &str) -> ServiceGatewayUserPlane {
        ServiceGatewayUserPlane {
            name: name.to_string(),
            service_gateway_name: sg.to_string(),
            max_session_count: max,
            allocated_session_count: alloc,
            default_endpoint: Endpoint::new(ep),
            supported_service_group: vec![],
        }
    }

    fn shard(name: &str, up: &str, ncs: &[&str]) -> Shard {
        Shard {
            name: name.to_string(),
            prefix: vec!["10.0.0.0/30".to_string()],
            desired_state: DesiredState {
                service_gateway_user_plane: up.to_string(),
                network_connection: ncs.iter().map(|s| s.to_string()).collect(),
            },
            current_state: CurrentState::default(),
        }
    }

    fn mapper_without_policy(store: Arc<MockStore>) -> ShardMapper {
        ShardMapper::new(store, PolicyLoader::new("/nonexistent/policy.yaml"))
    }

    #[tokio::test]
    async fn empty_fleet_clears_bindings() {
        let store = Arc::new(
            MockStore::new().with_shards(vec![shard("s1", "u-old", &["nc-x"])]),
        );
        let mapper = mapper_without_policy(store.clone());
        mapper.reconcile().await.unwrap();

        let s1 = store.shard("s1").unwrap();
        assert_eq!(s1.desired_state.service_gateway_user_plane, "u-old");
        assert!(s1.desired_state.network_connection.is_empty());
    }

    #[tokio::test]
    async fn picks_least_loaded_sgup() {
        let store = Arc::new(
            MockStore::new()
                .with_sgs(vec![ServiceGateway {
                    name: "sg1".to_string(),
                }])
                .with_sgups(vec![
                    sgup("A", "sg1", 10, 100, "ep-A"),
                    sgup("B", "sg1", 5, 100, "ep-B"),
                    sgup("C", "sg1", 50, 100, "ep-C"),
                ])
                .with_shards(vec![shard("s", "", &[])]),
        );
        let mapper = mapper_without_policy(store.clone());
        mapper.reconcile().await.unwrap();

        assert_eq!(
            store.shard("s").unwrap().desired_state.service_gateway_user_plane,
            "B"
        );
    }

    #[tokio::test]
    async fn static_pin_unresolvable_leaves_shard_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("policy.yaml");
        std::fs::write(
            &path,
            r#"
upsf:
  shards:
    - name: s
      prefixes: ["10.0.0.0/30"]
      serviceGatewayUserPlane: Z
"#,
        )
        .unwrap();

        let store = Arc::new(
            MockStore::new()
                .with_sgs(vec![ServiceGateway {
                    name: "sg1".to_string(),
                }])
                .with_sgups(vec![
                    sgup("A", "sg1", 0, 100, "ep-A"),
                    sgup("B", "sg1", 0, 100, "ep-B"),
                ])
                .with_shards(vec![shard("s", "", &[])]),
        );
        let mapper = ShardMapper::new(store.clone(), PolicyLoader::new(path));
        mapper.reconcile().await.unwrap();

        assert_eq!(
            store.shard("s").unwrap().desired_state.service_gateway_user_plane,
            ""
        );
    }

    #[tokio::test]
    async fn ms_mptp_matches_and_records_per_tsf() {
        let store = Arc::new(
            MockStore::new()
                .with_sgs(vec![ServiceGateway {
                    name: "sg1".to_string(),
                }])
                .with_sgups(vec![sgup("A", "sg1", 0, 100, "ep-A")])
                .with_tsfs(vec![
                    TrafficSteeringFunction {
                        name: "t1".to_string(),
                        default_endpoint: Endpoint::new("ep-T1"),
                    },
                    TrafficSteeringFunction {
                        name: "t2".to_string(),
                        default_endpoint: Endpoint::new("ep-T2"),
                    },
                ])
                .with_ncs(vec![NetworkConnection {
                    name: "nc1".to_string(),
                    topology: NcTopology::MsMptp {
                        tsf_endpoint: vec![Endpoint::new("ep-T1"), Endpoint::new("ep-T2")],
                        sgup_endpoint: Endpoint::new("ep-A"),
                    },
                }])
                .with_shards(vec![shard("s", "", &[])]),
        );
        let mapper = mapper_without_policy(store.clone());
        mapper.reconcile().await.unwrap();

        let s = store.shard("s").unwrap();
        assert_eq!(s.desired_state.network_connection, vec!["nc1".to_string()]);
    }

    #[tokio::test]
    async fn stable_snapshot_yields_no_second_write() {
        let store = Arc::new(
            MockStore::new()
                .with_sgs(vec![ServiceGateway {
                    name: "sg1".to_string(),
                }])
                .with_sgups(vec![sgup("A", "sg1", 0, 100, "ep-A")])
                .with_shards(vec![shard("s", "", &[])]),
        );
        let mapper = mapper_without_policy(store.clone());
        mapper.reconcile().await.unwrap();
        let after_first = store.shard("s").unwrap();

        mapper.reconcile().await.unwrap();
        let after_second = store.shard("s").unwrap();

        assert_eq!(
            after_first.desired_state.service_gateway_user_plane,
            after_second.desired_state.service_gateway_user_plane
        );
        assert_eq!(
            after_first.desired_state.network_connection,
            after_second.desired_state.network_connection
        );
    }

    #[tokio::test]
    async fn create_shard_then_reconcile_binds_it() {
        let store = Arc::new(
            MockStore::new()
                .with_sgs(vec![ServiceGateway {
                    name: "sg1".to_string(),
                }])
                .with_sgups(vec![sgup("A", "sg1", 0, 100, "ep-A")]),
        );
        store
            .create_shard(CreateShardParams {
                name: "s".to_string(),
                virtual_mac: "00:00:01:00:00:00".to_string(),
                allocated_session_count: 0,
                max_session_count: 4,
                prefix: vec!["10.0.0.0/30".to_string()],
                desired_service_gateway_user_plane: None,
            })
            .await
            .unwrap();

        let mapper = mapper_without_policy(store.clone());
        mapper.reconcile().await.unwrap();
        assert_eq!(
            store.shard("s").unwrap().desired_state.service_gateway_user_plane,
            "A"
        );
    }
}
