//! C2 — UPSF Gateway: a thin typed facade over the external UPSF store
//! (spec §4.2). The reconciliation core only ever talks to the
//! [`UpsfStore`] trait; [`grpc`] is the production implementation and
//! [`mock`] is the in-memory test double used throughout this crate's test
//! suite.

pub mod grpc;
pub mod mock;

use crate::error::StoreError;
use crate::model::{
    CreateShardParams, ItemEvent, ItemKind, NetworkConnection, ServiceGateway,
    ServiceGatewayUserPlane, Shard, TrafficSteeringFunction, UpdateShardParams,
};
use futures::stream::BoxStream;

/// Capabilities required of the UPSF facade (spec §4.2). Every method may
/// fail with a [`StoreError`]; the control loop (C5) treats any such
/// failure as transient and backs off before re-subscribing or retrying.
#[async_trait::async_trait]
pub trait UpsfStore: Send + Sync {
    async fn list_shards(&self) -> Result<Vec<Shard>, StoreError>;
    async fn list_sgups(&self) -> Result<Vec<ServiceGatewayUserPlane>, StoreError>;
    async fn list_tsfs(&self) -> Result<Vec<TrafficSteeringFunction>, StoreError>;
    async fn list_sgs(&self) -> Result<Vec<ServiceGateway>, StoreError>;
    async fn list_ncs(&self) -> Result<Vec<NetworkConnection>, StoreError>;

    async fn get_sgup(&self, name: &str) -> Result<Option<ServiceGatewayUserPlane>, StoreError>;

    async fn create_shard(&self, params: CreateShardParams) -> Result<Shard, StoreError>;
    async fn update_shard(&self, params: UpdateShardParams) -> Result<Shard, StoreError>;

    /// Subscribes to changes on {SGUP, TSF, NetworkConnection, Shard}. The
    /// stream is a liveness signal only — the core always re-snapshots
    /// rather than acting on event payloads (spec §4.2, §4.5).
    async fn watch(
        &self,
        kinds: &[ItemKind],
    ) -> Result<BoxStream<'static, Result<ItemEvent, StoreError>>, StoreError>;
}
