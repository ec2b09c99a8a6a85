//! Production [`UpsfStore`] implementation: a tonic/prost client generated
//! at build time from `proto/upsf.proto` (spec §4.2, §6). Every method is a
//! direct RPC; failures surface as [`StoreError`] and are treated as
//! transient by the control loop (spec §7.1).

use crate::error::StoreError;
use crate::model::{
    CreateShardParams, CurrentState, DesiredState, Endpoint, ItemEvent, ItemKind,
    ListMergeStrategy, NcTopology, NetworkConnection, ServiceGateway, ServiceGatewayUserPlane,
    Shard, TrafficSteeringFunction, UpdateShardParams,
};
use futures::stream::{BoxStream, StreamExt};
use std::time::Duration;

mod proto {
    tonic::include_proto!("upsf.v1");
}

use proto::upsf_client::UpsfClient;

/// Scoped deadline applied to every RPC on this channel (spec §5), so a
/// wedged store connection can't hang a reconciliation sweep forever.
const RPC_TIMEOUT: Duration = Duration::from_secs(10);

pub struct GrpcUpsfStore {
    client: UpsfClient<tonic::transport::Channel>,
}

impl GrpcUpsfStore {
    pub async fn connect(addr: String) -> Result<Self, StoreError> {
        let channel = tonic::transport::Endpoint::from_shared(addr)?
            .timeout(RPC_TIMEOUT)
            .connect()
            .await?;
        Ok(GrpcUpsfStore {
            client: UpsfClient::new(channel),
        })
    }
}

#[async_trait::async_trait]
impl super::UpsfStore for GrpcUpsfStore {
    async fn list_shards(&self) -> Result<Vec<Shard>, StoreError> {
        let mut client = self.client.clone();
        let resp = client.list_shards(proto::ListRequest {}).await?;
        Ok(resp.into_inner().items.into_iter().map(Into::into).collect())
    }

    async fn list_sgups(&self) -> Result<Vec<ServiceGatewayUserPlane>, StoreError> {
        let mut client = self.client.clone();
        let resp = client
            .list_service_gateway_user_planes(proto::ListRequest {})
            .await?;
        Ok(resp.into_inner().items.into_iter().map(Into::into).collect())
    }

    async fn list_tsfs(&self) -> Result<Vec<TrafficSteeringFunction>, StoreError> {
        let mut client = self.client.clone();
        let resp = client
            .list_traffic_steering_functions(proto::ListRequest {})
            .await?;
        Ok(resp.into_inner().items.into_iter().map(Into::into).collect())
    }

    async fn list_sgs(&self) -> Result<Vec<ServiceGateway>, StoreError> {
        let mut client = self.client.clone();
        let resp = client.list_service_gateways(proto::ListRequest {}).await?;
        Ok(resp.into_inner().items.into_iter().map(Into::into).collect())
    }

    async fn list_ncs(&self) -> Result<Vec<NetworkConnection>, StoreError> {
        let mut client = self.client.clone();
        let resp = client
            .list_network_connections(proto::ListRequest {})
            .await?;
        Ok(resp
            .into_inner()
            .items
            .into_iter()
            .filter_map(TryFrom::try_from)
            .collect())
    }

    async fn get_sgup(&self, name: &str) -> Result<Option<ServiceGatewayUserPlane>, StoreError> {
        let mut client = self.client.clone();
        match client
            .get_service_gateway_user_plane(proto::GetServiceGatewayUserPlaneRequest {
                name: name.to_string(),
            })
            .await
        {
            Ok(resp) => Ok(Some(resp.into_inner().into())),
            Err(status) if status.code() == tonic::Code::NotFound => Ok(None),
            Err(status) => Err(status.into()),
        }
    }

    async fn create_shard(&self, params: CreateShardParams) -> Result<Shard, StoreError> {
        let mut client = self.client.clone();
        let resp = client
            .create_shard(proto::CreateShardRequest {
                name: params.name,
                virtual_mac: params.virtual_mac,
                allocated_session_count: params.allocated_session_count,
                max_session_count: params.max_session_count,
                prefix: params.prefix,
                desired_service_gateway_user_plane: params.desired_service_gateway_user_plane,
            })
            .await?;
        Ok(resp.into_inner().into())
    }

    async fn update_shard(&self, params: UpdateShardParams) -> Result<Shard, StoreError> {
        let mut client = self.client.clone();
        let strategy = match params.list_merge_strategy {
            Some(ListMergeStrategy::Replace) | None => proto::ListMergeStrategy::Replace,
            Some(ListMergeStrategy::Merge) => proto::ListMergeStrategy::Merge,
        };
        let resp = client
            .update_shard(proto::UpdateShardRequest {
                name: params.name,
                desired_service_gateway_user_plane: params.desired_service_gateway_user_plane,
                desired_network_connection: params.desired_network_connection.unwrap_or_default(),
                current_tsf_network_connection: params
                    .current_tsf_network_connection
                    .unwrap_or_default()
                    .into_iter()
                    .collect(),
                service_groups_supported: params.service_groups_supported.unwrap_or_default(),
                prefix: params.prefix,
                list_merge_strategy: strategy as i32,
            })
            .await?;
        Ok(resp.into_inner().into())
    }

    async fn watch(
        &self,
        kinds: &[ItemKind],
    ) -> Result<BoxStream<'static, Result<ItemEvent, StoreError>>, StoreError> {
        let mut client = self.client.clone();
        let kinds: Vec<i32> = kinds.iter().map(|k| proto_item_kind(*k) as i32).collect();
        let resp = client
            .subscribe(proto::SubscribeRequest { kinds })
            .await?;
        let stream = resp
            .into_inner()
            .map(|item| match item {
                Ok(event) => item_event_from_proto(event).ok_or_else(|| {
                    tonic::Status::invalid_argument("subscribe event carried no item").into()
                }),
                Err(status) => Err(status.into()),
            })
            .boxed();
        Ok(stream)
    }
}

fn proto_item_kind(kind: ItemKind) -> proto::ItemKind {
    match kind {
        ItemKind::ServiceGatewayUserPlane => proto::ItemKind::ServiceGatewayUserPlane,
        ItemKind::TrafficSteeringFunction => proto::ItemKind::TrafficSteeringFunction,
        ItemKind::NetworkConnection => proto::ItemKind::NetworkConnection,
        ItemKind::Shard => proto::ItemKind::Shard,
    }
}

fn item_event_from_proto(event: proto::ItemEvent) -> Option<ItemEvent> {
    use proto::item_event::Item;
    match event.item? {
        Item::ServiceGatewayUserPlane(up) if !up.name.is_empty() => Some(ItemEvent {
            kind: ItemKind::ServiceGatewayUserPlane,
            name: up.name,
        }),
        Item::TrafficSteeringFunction(tsf) if !tsf.name.is_empty() => Some(ItemEvent {
            kind: ItemKind::TrafficSteeringFunction,
            name: tsf.name,
        }),
        Item::NetworkConnection(nc) if !nc.name.is_empty() => Some(ItemEvent {
            kind: ItemKind::NetworkConnection,
            name: nc.name,
        }),
        Item::Shard(shard) if !shard.name.is_empty() => Some(ItemEvent {
            kind: ItemKind::Shard,
            name: shard.name,
        }),
        _ => None,
    }
}

impl From<proto::Endpoint> for Endpoint {
    fn from(ep: proto::Endpoint) -> Self {
        Endpoint { name: ep.name }
    }
}

impl From<proto::Shard> for Shard {
    fn from(shard: proto::Shard) -> Self {
        let spec = shard.spec.unwrap_or_default();
        let status = shard.status.unwrap_or_default();
        let desired = spec.desired_state.unwrap_or_default();
        let current = status.current_state.unwrap_or_default();
        Shard {
            name: shard.name,
            prefix: spec.prefix,
            desired_state: DesiredState {
                service_gateway_user_plane: desired.service_gateway_user_plane,
                network_connection: desired.network_connection,
            },
            current_state: CurrentState {
                service_gateway_user_plane: current.service_gateway_user_plane,
            },
        }
    }
}

impl From<proto::ServiceGatewayUserPlane> for ServiceGatewayUserPlane {
    fn from(up: proto::ServiceGatewayUserPlane) -> Self {
        let spec = up.spec.unwrap_or_default();
        let status = up.status.unwrap_or_default();
        ServiceGatewayUserPlane {
            name: up.name,
            service_gateway_name: spec.service_gateway_name,
            max_session_count: spec.max_session_count,
            allocated_session_count: status.allocated_session_count,
            default_endpoint: spec.default_endpoint.unwrap_or_default().into(),
            supported_service_group: spec.supported_service_group,
        }
    }
}

impl From<proto::TrafficSteeringFunction> for TrafficSteeringFunction {
    fn from(tsf: proto::TrafficSteeringFunction) -> Self {
        let spec = tsf.spec.unwrap_or_default();
        TrafficSteeringFunction {
            name: tsf.name,
            default_endpoint: spec.default_endpoint.unwrap_or_default().into(),
        }
    }
}

impl From<proto::ServiceGateway> for ServiceGateway {
    fn from(sg: proto::ServiceGateway) -> Self {
        ServiceGateway { name: sg.name }
    }
}

impl TryFrom<proto::NetworkConnection> for NetworkConnection {
    type Error = ();

    fn try_from(nc: proto::NetworkConnection) -> Result<Self, Self::Error> {
        use proto::network_connection_spec::NcSpec;

        let spec = nc.spec.ok_or(())?;
        let topology = match spec.nc_spec.ok_or(())? {
            NcSpec::SsPtp(s) => NcTopology::SsPtp {
                tsf_endpoint: s.tsf_endpoint.unwrap_or_default().into(),
                sgup_endpoint: s.sgup_endpoint.into_iter().map(Into::into).collect(),
            },
            NcSpec::SsMptp(s) => NcTopology::SsMptp {
                tsf_endpoint: s.tsf_endpoint.into_iter().map(Into::into).collect(),
                sgup_endpoint: s.sgup_endpoint.into_iter().map(Into::into).collect(),
            },
            NcSpec::MsPtp(s) => NcTopology::MsPtp {
                tsf_endpoint: s.tsf_endpoint.unwrap_or_default().into(),
                sgup_endpoint: s.sgup_endpoint.unwrap_or_default().into(),
            },
            NcSpec::MsMptp(s) => NcTopology::MsMptp {
                tsf_endpoint: s.tsf_endpoint.into_iter().map(Into::into).collect(),
                sgup_endpoint: s.sgup_endpoint.unwrap_or_default().into(),
            },
        };
        Ok(NetworkConnection {
            name: nc.name,
            topology,
        })
    }
}
