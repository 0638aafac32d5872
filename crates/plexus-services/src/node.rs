use std::future::Future;
use std::net::Ipv4Addr;
use std::sync::Arc;

use rand::RngCore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use plexus_crypto::AesSealer;
use plexus_ledger::{Ledger, Transport, WireCodec};
use plexus_types::{Machine, PeerId};

use crate::alive::AliveService;
use crate::allocator::{Allocator, AllocatorConfig, LeaseWaiter};
use crate::config::NodeConfig;
use crate::error::{AllocatorError, ServiceError, ServiceResult};
use crate::iface::NetworkInterface;
use crate::lease::LeaseStore;
use crate::protocol::MACHINES_LEDGER_KEY;

/// Assembles the ledger and the coordination services of one node.
pub struct Node;

impl Node {
    /// Start a node on `transport`.
    ///
    /// Spawns the replication loop, the liveness service and either the
    /// address allocator (`dhcp`) or the announcement of the static address.
    /// Everything runs under one cancellation token owned by the handle.
    /// Must be called from within a tokio runtime.
    pub fn start(
        config: NodeConfig,
        transport: Arc<dyn Transport>,
        iface: Arc<dyn NetworkInterface>,
    ) -> ServiceResult<NodeHandle> {
        config.validate()?;

        let peer = match &config.peer_id {
            Some(id) => PeerId::new(id.as_str())?,
            None => random_peer_id()?,
        };
        let codec = match &config.network_key {
            Some(key) => WireCodec::sealed(Arc::new(AesSealer::new()), key.as_str()),
            None => WireCodec::plain(),
        };
        let ledger = Arc::new(Ledger::new(
            peer.clone(),
            transport,
            codec,
            config.ledger_config(),
        ));
        let role = if config.dhcp {
            Role::Allocate(config.allocator_config()?)
        } else {
            let address = config.range()?.address();
            // A static node whose subnet cannot be gated never starts.
            iface.block_subnet(&format!("{address}/24"))?;
            Role::Static(address)
        };

        let ctx = CancellationToken::new();
        let mut tasks: Vec<JoinHandle<ServiceResult<()>>> = Vec::new();

        {
            let ledger = Arc::clone(&ledger);
            let run_ctx = ctx.clone();
            tasks.push(supervise(&ctx, async move {
                ledger.run(run_ctx).await.map_err(ServiceError::from)
            }));
        }

        let alive = AliveService::new(Arc::clone(&ledger), config.alive_config());
        tasks.push(supervise(&ctx, alive.run(ctx.clone())));

        let lease = match role {
            Role::Allocate(allocator_config) => {
                let leases = LeaseStore::open(&config.lease_dir).unwrap_or_else(|e| {
                    warn!(dir = %config.lease_dir.display(), error = %e, "cannot create lease directory");
                    LeaseStore::new(&config.lease_dir)
                });
                let (allocator, waiter) =
                    Allocator::new(Arc::clone(&ledger), allocator_config, leases, iface);
                let run = allocator.run(ctx.clone());
                tasks.push(supervise(&ctx, async move {
                    match run.await {
                        Ok(_) => Ok(()),
                        // Shutdown before a lease is not a failure of the node.
                        Err(AllocatorError::Cancelled) => Ok(()),
                        Err(e) => Err(ServiceError::from(e)),
                    }
                }));
                Some(waiter)
            }
            Role::Static(address) => {
                let machine = Machine::new(peer.clone(), address.to_string());
                if let Err(e) = ledger.persist(
                    &ctx,
                    config.healthcheck_interval,
                    config.max_interval,
                    MACHINES_LEDGER_KEY,
                    peer.as_str(),
                    &machine,
                ) {
                    ctx.cancel();
                    return Err(e.into());
                }
                None
            }
        };

        info!(peer = %peer, dhcp = config.dhcp, "node started");
        Ok(NodeHandle {
            peer,
            ledger,
            ctx,
            tasks,
            lease,
        })
    }
}

/// How a node comes by its address.
enum Role {
    Allocate(AllocatorConfig),
    Static(Ipv4Addr),
}

/// Spawn a node task. A task that fails takes the whole node down with it.
fn supervise<F>(ctx: &CancellationToken, task: F) -> JoinHandle<ServiceResult<()>>
where
    F: Future<Output = ServiceResult<()>> + Send + 'static,
{
    let ctx = ctx.clone();
    tokio::spawn(async move {
        let result = task.await;
        if let Err(e) = &result {
            error!(error = %e, "node task failed, shutting down");
            ctx.cancel();
        }
        result
    })
}

fn random_peer_id() -> ServiceResult<PeerId> {
    let mut bytes = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut bytes);
    Ok(PeerId::new(format!("plx-{}", hex::encode(bytes)))?)
}

/// A running node.
pub struct NodeHandle {
    peer: PeerId,
    ledger: Arc<Ledger>,
    ctx: CancellationToken,
    tasks: Vec<JoinHandle<ServiceResult<()>>>,
    lease: Option<LeaseWaiter>,
}

impl NodeHandle {
    pub fn peer_id(&self) -> &PeerId {
        &self.peer
    }

    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    /// The allocator's result. `None` for static nodes or once taken.
    pub fn take_lease(&mut self) -> Option<LeaseWaiter> {
        self.lease.take()
    }

    /// Ask every task to stop.
    pub fn shutdown(&self) {
        self.ctx.cancel();
    }

    /// Wait for every task to end; returns the first failure.
    ///
    /// Resolves on its own once any task fails, since a failure shuts the
    /// node down. Otherwise it waits for [`shutdown`](Self::shutdown).
    pub async fn join(self) -> ServiceResult<()> {
        let mut first_error = None;
        for task in self.tasks {
            let result = match task.await {
                Ok(result) => result,
                Err(e) => Err(ServiceError::Task(e.to_string())),
            };
            if let Err(e) = result {
                warn!(peer = %self.peer, error = %e, "node task failed");
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for NodeHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeHandle")
            .field("peer", &self.peer)
            .field("tasks", &self.tasks.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::iface::NoopInterface;
    use plexus_ledger::LocalHub;
    use std::time::Duration;

    #[tokio::test]
    async fn static_node_announces_its_address() {
        let hub = LocalHub::default();
        let config = NodeConfig {
            peer_id: Some("static".into()),
            address: "10.1.0.7/24".into(),
            ..NodeConfig::default()
        };
        let mut node = Node::start(config, Arc::new(hub.transport()), Arc::new(NoopInterface)).unwrap();
        assert!(node.take_lease().is_none());

        let machine: Machine = node
            .ledger()
            .get_key(MACHINES_LEDGER_KEY, "static")
            .unwrap()
            .decode()
            .unwrap();
        assert_eq!(machine.address, "10.1.0.7");

        node.shutdown();
        node.join().await.unwrap();
    }

    #[tokio::test]
    async fn generated_ids_are_unique() {
        let hub = LocalHub::default();
        let a = Node::start(NodeConfig::default(), Arc::new(hub.transport()), Arc::new(NoopInterface)).unwrap();
        let b = Node::start(NodeConfig::default(), Arc::new(hub.transport()), Arc::new(NoopInterface)).unwrap();
        assert_ne!(a.peer_id(), b.peer_id());
        assert!(a.peer_id().as_str().starts_with("plx-"));
        a.shutdown();
        b.shutdown();
        tokio::time::timeout(Duration::from_secs(5), a.join()).await.unwrap().unwrap();
        tokio::time::timeout(Duration::from_secs(5), b.join()).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn invalid_config_does_not_start() {
        let hub = LocalHub::default();
        let config = NodeConfig {
            address: "nonsense".into(),
            ..NodeConfig::default()
        };
        assert!(matches!(
            Node::start(config, Arc::new(hub.transport()), Arc::new(NoopInterface)),
            Err(ServiceError::Config(_))
        ));
    }

    struct NoFirewall;

    impl NetworkInterface for NoFirewall {
        fn block_subnet(&self, cidr: &str) -> Result<(), crate::error::IfaceError> {
            Err(crate::error::IfaceError::Gate {
                cidr: cidr.to_string(),
                reason: "no firewall".into(),
            })
        }
    }

    #[tokio::test]
    async fn static_node_without_gate_does_not_start() {
        let hub = LocalHub::default();
        let observer = Arc::new(Ledger::new(
            PeerId::new("observer").unwrap(),
            Arc::new(hub.transport()),
            WireCodec::plain(),
            Default::default(),
        ));
        let ctx = CancellationToken::new();
        {
            let observer = Arc::clone(&observer);
            let ctx = ctx.clone();
            tokio::spawn(async move { observer.run(ctx).await });
        }
        let config = NodeConfig {
            peer_id: Some("static".into()),
            address: "10.1.0.7/24".into(),
            ..NodeConfig::default()
        };
        assert!(matches!(
            Node::start(config, Arc::new(hub.transport()), Arc::new(NoFirewall)),
            Err(ServiceError::Interface(_))
        ));

        // Nothing about the failed node ever reached the mesh.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(observer.last_block().is_empty());
        ctx.cancel();
    }
}
