//! In-memory [`UpsfStore`] double used by this crate's test suite. Mirrors
//! the teacher's habit of building fixtures by hand (see
//! `data-plane-controller/tests/util.rs`) rather than mocking at the
//! network layer.

use crate::error::StoreError;
use crate::model::{
    CreateShardParams, CurrentState, DesiredState, ItemEvent, ItemKind, ListMergeStrategy,
    NetworkConnection, ServiceGateway, ServiceGatewayUserPlane, Shard, TrafficSteeringFunction,
    UpdateShardParams,
};
use futures::stream::{BoxStream, StreamExt};
use std::sync::Mutex;
use tokio::sync::broadcast;

struct Inner {
    shards: Vec<Shard>,
    sgups: Vec<ServiceGatewayUserPlane>,
    tsfs: Vec<TrafficSteeringFunction>,
    sgs: Vec<ServiceGateway>,
    ncs: Vec<NetworkConnection>,
}

pub struct MockStore {
    inner: Mutex<Inner>,
    events: broadcast::Sender<ItemEvent>,
}

impl Default for MockStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MockStore {
    pub fn new() -> Self {
        let (events, _rx) = broadcast::channel(256);
        MockStore {
            inner: Mutex::new(Inner {
                shards: Vec::new(),
                sgups: Vec::new(),
                tsfs: Vec::new(),
                sgs: Vec::new(),
                ncs: Vec::new(),
            }),
            events,
        }
    }

    pub fn with_sgs(self, sgs: Vec<ServiceGateway>) -> Self {
        self.inner.lock().unwrap().sgs = sgs;
        self
    }

    pub fn with_sgups(self, sgups: Vec<ServiceGatewayUserPlane>) -> Self {
        self.inner.lock().unwrap().sgups = sgups;
        self
    }

    pub fn with_tsfs(self, tsfs: Vec<TrafficSteeringFunction>) -> Self {
        self.inner.lock().unwrap().tsfs = tsfs;
        self
    }

    pub fn with_ncs(self, ncs: Vec<NetworkConnection>) -> Self {
        self.inner.lock().unwrap().ncs = ncs;
        self
    }

    pub fn with_shards(self, shards: Vec<Shard>) -> Self {
        self.inner.lock().unwrap().shards = shards;
        self
    }

    pub fn shard(&self, name: &str) -> Option<Shard> {
        self.inner
            .lock()
            .unwrap()
            .shards
            .iter()
            .find(|s| s.name == name)
            .cloned()
    }

    pub fn set_sgup_load(&self, name: &str, allocated: i64) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(sgup) = inner.sgups.iter_mut().find(|u| u.name == name) {
            sgup.allocated_session_count = allocated;
        }
    }

    /// Publishes a liveness notification to any active [`UpsfStore::watch`]
    /// subscribers. Returns without error if nobody is currently watching.
    pub fn notify(&self, kind: ItemKind, name: impl Into<String>) {
        let _ = self.events.send(ItemEvent {
            kind,
            name: name.into(),
        });
    }
}

#[async_trait::async_trait]
impl super::UpsfStore for MockStore {
    async fn list_shards(&self) -> Result<Vec<Shard>, StoreError> {
        Ok(self.inner.lock().unwrap().shards.clone())
    }

    async fn list_sgups(&self) -> Result<Vec<ServiceGatewayUserPlane>, StoreError> {
        Ok(self.inner.lock().unwrap().sgups.clone())
    }

    async fn list_tsfs(&self) -> Result<Vec<TrafficSteeringFunction>, StoreError> {
        Ok(self.inner.lock().unwrap().tsfs.clone())
    }

    async fn list_sgs(&self) -> Result<Vec<ServiceGateway>, StoreError> {
        Ok(self.inner.lock().unwrap().sgs.clone())
    }

    async fn list_ncs(&self) -> Result<Vec<NetworkConnection>, StoreError> {
        Ok(self.inner.lock().unwrap().ncs.clone())
    }

    async fn get_sgup(&self, name: &str) -> Result<Option<ServiceGatewayUserPlane>, StoreError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .sgups
            .iter()
            .find(|u| u.name == name)
            .cloned())
    }

    async fn create_shard(&self, params: CreateShardParams) -> Result<Shard, StoreError> {
        let shard = Shard {
            name: params.name,
            prefix: params.prefix,
            desired_state: DesiredState {
                service_gateway_user_plane: params
                    .desired_service_gateway_user_plane
                    .unwrap_or_default(),
                network_connection: Vec::new(),
            },
            current_state: CurrentState::default(),
        };
        self.inner.lock().unwrap().shards.push(shard.clone());
        Ok(shard)
    }

    async fn update_shard(&self, params: UpdateShardParams) -> Result<Shard, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let shard = inner
            .shards
            .iter_mut()
            .find(|s| s.name == params.name)
            .expect("update_shard called on unknown shard in mock store");

        if let Some(up) = params.desired_service_gateway_user_plane {
            shard.desired_state.service_gateway_user_plane = up;
        }
        if let Some(strategy) = params.list_merge_strategy {
            match strategy {
                ListMergeStrategy::Replace => {
                    shard.desired_state.network_connection =
                        params.desired_network_connection.unwrap_or_default();
                }
                ListMergeStrategy::Merge => {
                    if let Some(ncs) = params.desired_network_connection {
                        for nc in ncs {
                            if !shard.desired_state.network_connection.contains(&nc) {
                                shard.desired_state.network_connection.push(nc);
                            }
                        }
                    }
                }
            }
        }
        shard.prefix = params.prefix;
        Ok(shard.clone())
    }

    async fn watch(
        &self,
        kinds: &[crate::model::ItemKind],
    ) -> Result<BoxStream<'static, Result<ItemEvent, StoreError>>, StoreError> {
        let kinds: Vec<ItemKind> = kinds.to_vec();
        let rx = self.events.subscribe();
        let stream = tokio_stream::wrappers::BroadcastStream::new(rx)
            .filter_map(move |item| {
                let kinds = kinds.clone();
                async move {
                    match item {
                        Ok(event) if kinds.contains(&event.kind) => Some(Ok(event)),
                        Ok(_) => None,
                        // Lagged: we dropped some notifications, but the
                        // watch is only a liveness signal, so this is safe
                        // to ignore — the next live event still fires.
                        Err(_lagged) => None,
                    }
                }
            })
            .boxed();
        Ok(stream)
    }
}
