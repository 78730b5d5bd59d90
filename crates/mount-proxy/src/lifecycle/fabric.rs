//! In-memory stand-in for the cluster network.

use crate::error::ProxyError;
use crate::master::{MasterChannel, MasterClient, TxReply, TxRequest};
use crate::model::{MemberAddress, ResourceId};
use ask_framework::{link, serve, ChannelError, MessageChannel, RequestHandler};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, info};

type MasterKey = (MemberAddress, ResourceId);
type Registry = Arc<Mutex<HashMap<MasterKey, MasterClient>>>;

fn lock(registry: &Registry) -> MutexGuard<'_, HashMap<MasterKey, MasterClient>> {
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Registry of the masters each member currently runs, and the means to reach them.
///
/// A connection is addressed by (member, resource), not bound to one master instance: every
/// request is routed to whatever master is registered when it arrives. Requests reaching a
/// member that runs no master for the resource fail with `RemoteFailure`.
#[derive(Clone)]
pub struct ClusterFabric {
    masters: Registry,
    link_buffer: usize,
}

impl ClusterFabric {
    pub fn new(link_buffer: usize) -> Self {
        Self {
            masters: Registry::default(),
            link_buffer,
        }
    }

    pub fn register(&self, member: MemberAddress, resource: ResourceId, master: MasterClient) {
        info!(%member, %resource, "Master registered");
        lock(&self.masters).insert((member, resource), master);
    }

    pub fn unregister(&self, member: &MemberAddress, resource: &ResourceId) {
        if lock(&self.masters)
            .remove(&(member.clone(), resource.clone()))
            .is_some()
        {
            info!(%member, %resource, "Master unregistered");
        }
    }

    pub fn has_master(&self, member: &MemberAddress, resource: &ResourceId) -> bool {
        lock(&self.masters).contains_key(&(member.clone(), resource.clone()))
    }

    /// Opens a new link to `member` for `resource`.
    pub fn connect(&self, member: &MemberAddress, resource: &ResourceId, ask_timeout: Duration) -> MasterChannel {
        let (client, server) = link::pair(self.link_buffer);
        let acceptor = Acceptor {
            masters: self.masters.clone(),
            key: (member.clone(), resource.clone()),
        };
        tokio::spawn(serve(server, Arc::new(acceptor)));
        debug!(%member, %resource, "Link opened");
        MessageChannel::connect(client, ask_timeout)
    }
}

/// Server half of a fabric link: resolves the addressed master per request.
struct Acceptor {
    masters: Registry,
    key: MasterKey,
}

#[async_trait]
impl RequestHandler for Acceptor {
    type Request = TxRequest;
    type Response = TxReply;

    async fn handle(&self, request: TxRequest) -> TxReply {
        let master = lock(&self.masters).get(&self.key).cloned();
        match master {
            Some(master) => master.request(request).await,
            None => {
                let (member, resource) = &self.key;
                TxReply::Failure(ProxyError::RemoteFailure(format!(
                    "member {} runs no master for {}",
                    member, resource
                )))
            }
        }
    }

    fn reject(&self, error: ChannelError) -> TxReply {
        TxReply::Failure(ProxyError::SerializationError(error.to_string()))
    }
}
