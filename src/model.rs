//! Plain domain types the reconciliation core operates on.
//!
//! These are independent of the wire encoding: [`crate::store`] is
//! responsible for converting between them and whatever the UPSF store's
//! gRPC schema actually looks like.

use std::collections::BTreeSet;

/// A named attachment point on an SGUP or TSF. Only the name is
/// significant for network-connection matching.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct Endpoint {
    pub name: String,
}

impl Endpoint {
    pub fn new(name: impl Into<String>) -> Self {
        Endpoint { name: name.into() }
    }
}

/// The shard's `desired_state`: the binding this reconciler last wrote.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct DesiredState {
    pub service_gateway_user_plane: String,
    pub network_connection: Vec<String>,
}

/// The shard's `current_state`: observed only, never written by this core.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct CurrentState {
    pub service_gateway_user_plane: String,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Shard {
    pub name: String,
    pub prefix: Vec<String>,
    pub desired_state: DesiredState,
    pub current_state: CurrentState,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ServiceGatewayUserPlane {
    pub name: String,
    pub service_gateway_name: String,
    pub max_session_count: i64,
    pub allocated_session_count: i64,
    pub default_endpoint: Endpoint,
    pub supported_service_group: Vec<String>,
}

impl ServiceGatewayUserPlane {
    /// Fraction of capacity currently allocated. Only meaningful when
    /// `max_session_count > 0`; callers filter on that separately.
    pub fn load(&self) -> f64 {
        self.allocated_session_count as f64 / self.max_session_count as f64
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct TrafficSteeringFunction {
    pub name: String,
    pub default_endpoint: Endpoint,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ServiceGateway {
    pub name: String,
}

/// The four network-connection topologies a [`NetworkConnection`] may
/// carry. Both naming conventions observed on the wire (`SsPtpSpec` /
/// `ss_ptp`, and so on) collapse onto these same four variants.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub enum NcTopology {
    /// Shared-SGUP, point-to-point: one TSF endpoint, many SGUP endpoints.
    SsPtp {
        tsf_endpoint: Endpoint,
        sgup_endpoint: Vec<Endpoint>,
    },
    /// Shared-SGUP, multi-point-to-point: many TSF endpoints, many SGUP endpoints.
    SsMptp {
        tsf_endpoint: Vec<Endpoint>,
        sgup_endpoint: Vec<Endpoint>,
    },
    /// Multi-SGUP, point-to-point: one TSF endpoint, one SGUP endpoint.
    MsPtp {
        tsf_endpoint: Endpoint,
        sgup_endpoint: Endpoint,
    },
    /// Multi-SGUP, multi-point-to-point: many TSF endpoints, one SGUP endpoint.
    MsMptp {
        tsf_endpoint: Vec<Endpoint>,
        sgup_endpoint: Endpoint,
    },
}

impl NcTopology {
    /// True if this topology connects `sgup_ep` to `tsf_ep` (matched by
    /// endpoint name, per the four rules in spec §4.4 step 4d).
    pub fn matches(&self, sgup_ep: &str, tsf_ep: &str) -> bool {
        match self {
            NcTopology::SsPtp {
                tsf_endpoint,
                sgup_endpoint,
            } => tsf_endpoint.name == tsf_ep && sgup_endpoint.iter().any(|e| e.name == sgup_ep),
            NcTopology::SsMptp {
                tsf_endpoint,
                sgup_endpoint,
            } => {
                sgup_endpoint.iter().any(|e| e.name == sgup_ep)
                    && tsf_endpoint.iter().any(|e| e.name == tsf_ep)
            }
            NcTopology::MsPtp {
                tsf_endpoint,
                sgup_endpoint,
            } => tsf_endpoint.name == tsf_ep && sgup_endpoint.name == sgup_ep,
            NcTopology::MsMptp {
                tsf_endpoint,
                sgup_endpoint,
            } => sgup_endpoint.name == sgup_ep && tsf_endpoint.iter().any(|e| e.name == tsf_ep),
        }
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct NetworkConnection {
    pub name: String,
    pub topology: NcTopology,
}

/// `list_merge_strategy` on [`crate::store::UpdateShardParams`]. The store
/// contract (spec §4.2, §6) requires `Replace` semantics on shard updates:
/// without it, stale network connections from a previous desired state
/// would linger after a rebinding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ListMergeStrategy {
    Merge,
    Replace,
}

/// Parameters for [`crate::store::UpsfStore::create_shard`] (spec §4.3 step 7).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CreateShardParams {
    pub name: String,
    pub virtual_mac: String,
    pub allocated_session_count: i64,
    pub max_session_count: i64,
    pub prefix: Vec<String>,
    pub desired_service_gateway_user_plane: Option<String>,
}

/// Parameters for [`crate::store::UpsfStore::update_shard`] (spec §4.4 steps
/// 2 and 4f).
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct UpdateShardParams {
    pub name: String,
    pub desired_service_gateway_user_plane: Option<String>,
    pub desired_network_connection: Option<Vec<String>>,
    pub current_tsf_network_connection: Option<std::collections::BTreeMap<String, String>>,
    pub service_groups_supported: Option<Vec<String>>,
    pub prefix: Vec<String>,
    pub list_merge_strategy: Option<ListMergeStrategy>,
}

/// The four item kinds the control loop subscribes to (spec §4.5, §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ItemKind {
    ServiceGatewayUserPlane,
    TrafficSteeringFunction,
    NetworkConnection,
    Shard,
}

pub const WATCHED_KINDS: [ItemKind; 4] = [
    ItemKind::ServiceGatewayUserPlane,
    ItemKind::TrafficSteeringFunction,
    ItemKind::NetworkConnection,
    ItemKind::Shard,
];

/// A single item-change notification from [`crate::store::UpsfStore::watch`].
/// Only the kind is significant to the control loop; the core always
/// re-snapshots rather than acting on the payload (spec §4.2).
#[derive(Debug, Clone)]
pub struct ItemEvent {
    pub kind: ItemKind,
    pub name: String,
}

/// Deduplicated, insertion-ordered set of network-connection names. The
/// fingerprint in spec §4.4 step 4e requires a stable iteration order that
/// matches what gets written to the store, so a plain `HashSet` won't do.
#[derive(Debug, Clone, Default)]
pub struct OrderedNcSet {
    order: Vec<String>,
    seen: BTreeSet<String>,
}

impl OrderedNcSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `name` if not already present. Returns `true` if this was
    /// the first time `name` was seen.
    pub fn insert(&mut self, name: String) -> bool {
        if self.seen.insert(name.clone()) {
            self.order.push(name);
            true
        } else {
            false
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    pub fn into_vec(self) -> Vec<String> {
        self.order
    }

    pub fn join(&self, sep: &str) -> String {
        self.order.join(sep)
    }
}
