//! Address allocation by cooperative election.
//!
//! Every node without an address polls the ledger. Among the live peers that
//! still need an address, [`leader`] picks one; that peer announces a
//! short-lived leader marker, waits one poll for competing announcements to
//! settle, and once its own marker is the recorded one it takes the lowest
//! free address for itself. It then publishes its `Machine` entry, which
//! removes it from the next round. A previously leased address found on disk
//! short-circuits the whole process.

use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use plexus_ledger::Ledger;
use plexus_types::{wall_clock_ms, Machine, PeerId};

use crate::alive::available_nodes;
use crate::error::AllocatorError;
use crate::iface::NetworkInterface;
use crate::leader::leader;
use crate::lease::LeaseStore;
use crate::nextip::{next_ip, AddressRange};
use crate::protocol::{DHCP_LEDGER_KEY, LEADER_ENTRY_KEY, MACHINES_LEDGER_KEY};

/// Settings of the address allocator.
#[derive(Clone, Debug)]
pub struct AllocatorConfig {
    /// Range addresses are drawn from.
    pub range: AddressRange,
    /// Secret naming this node's lease file.
    pub exchange_secret: String,
    /// Liveness window: peers without a heartbeat this recent are ignored.
    pub max_time: Duration,
    /// Pause between observations.
    pub poll_interval: Duration,
    /// Re-announcement interval of the leader marker.
    pub leader_announce: Duration,
    /// Expiration of each leader marker publication.
    pub leader_expiration: Duration,
    /// Re-announcement interval of this node's `Machine` entry.
    pub machine_announce: Duration,
    /// Expiration of each `Machine` entry publication.
    pub machine_expiration: Duration,
}

impl AllocatorConfig {
    pub fn new(range: AddressRange, exchange_secret: impl Into<String>) -> Self {
        Self {
            range,
            exchange_secret: exchange_secret.into(),
            max_time: Duration::from_secs(15 * 60),
            poll_interval: Duration::from_secs(5),
            leader_announce: Duration::from_secs(5),
            leader_expiration: Duration::from_secs(15),
            machine_announce: Duration::from_secs(60),
            machine_expiration: Duration::from_secs(15 * 60),
        }
    }
}

/// One consistent reading of the ledger.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Observation {
    /// Live peers, in id order.
    pub nodes: Vec<PeerId>,
    /// Live peers without a `Machine` entry.
    pub without_ip: Vec<PeerId>,
    /// Addresses of every live `Machine` entry.
    pub used: Vec<String>,
    /// Current leader marker of the allocation domain.
    pub recorded_leader: Option<PeerId>,
}

impl Observation {
    /// Read liveness, machines and the leader marker from one block.
    pub fn read(ledger: &Ledger, max_time: Duration) -> Self {
        let nodes = available_nodes(ledger, max_time);
        let block = ledger.last_block();
        let now = wall_clock_ms();

        let mut assigned = HashSet::new();
        let mut used = Vec::new();
        for (key, entry) in block.live_entries(MACHINES_LEDGER_KEY, now) {
            match entry.decode::<Machine>() {
                Ok(machine) => {
                    debug!(peer = %machine.peer_id, address = %machine.address, "address in use");
                    assigned.insert(machine.peer_id);
                    used.push(machine.address);
                }
                Err(e) => debug!(%key, error = %e, "skipping malformed machine entry"),
            }
        }

        let without_ip = nodes
            .iter()
            .filter(|peer| !assigned.contains(*peer))
            .cloned()
            .collect();

        let recorded_leader = block
            .get_live(DHCP_LEDGER_KEY, LEADER_ENTRY_KEY, now)
            .and_then(|entry| entry.decode::<String>().ok())
            .and_then(|id| PeerId::new(id).ok());

        Self {
            nodes,
            without_ip,
            used,
            recorded_leader,
        }
    }
}

/// What to do after an observation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Decision {
    /// One live node or fewer: keep polling.
    NotEnoughNodes,
    /// Every live node already has an address: keep polling.
    NobodyWaiting,
    /// Someone else should act.
    Follow { leader: PeerId },
    /// We should lead but are not recorded yet: announce and re-poll.
    Announce,
    /// Another peer holds the marker: wait an extra interval.
    BackOff { leader: Option<PeerId> },
    /// We are the recorded leader: assign.
    Lead,
}

/// Decide the next step of node `me` from `observation`.
pub fn decide(me: &PeerId, observation: &Observation) -> Decision {
    if observation.nodes.len() <= 1 {
        return Decision::NotEnoughNodes;
    }
    let Some(should_lead) = leader(&observation.without_ip) else {
        return Decision::NobodyWaiting;
    };

    let recorded = observation.recorded_leader.as_ref();
    let computed_is_me = &should_lead == me;
    let recorded_is_me = recorded == Some(me);

    if !computed_is_me && !recorded_is_me {
        return Decision::Follow {
            leader: should_lead,
        };
    }
    if computed_is_me && recorded.map_or(true, |r| !observation.without_ip.contains(r)) {
        return Decision::Announce;
    }
    if !recorded_is_me {
        return Decision::BackOff {
            leader: recorded.cloned(),
        };
    }
    Decision::Lead
}

/// Resolves once the allocator has an address.
#[derive(Debug)]
pub struct LeaseWaiter {
    receiver: oneshot::Receiver<Ipv4Addr>,
}

impl LeaseWaiter {
    /// Wait for the address, or [`AllocatorError::Cancelled`] if the
    /// allocator stops first. The allocator's own error, if any, is
    /// reported by its task.
    pub async fn wait(self) -> Result<Ipv4Addr, AllocatorError> {
        self.receiver.await.map_err(|_| AllocatorError::Cancelled)
    }
}

/// The allocation state machine of one node.
pub struct Allocator {
    ledger: Arc<Ledger>,
    config: AllocatorConfig,
    leases: LeaseStore,
    iface: Arc<dyn NetworkInterface>,
    waiter: Option<oneshot::Sender<Ipv4Addr>>,
    /// Our running leader marker, if any.
    marker: Option<CancellationToken>,
}

impl Allocator {
    pub fn new(
        ledger: Arc<Ledger>,
        config: AllocatorConfig,
        leases: LeaseStore,
        iface: Arc<dyn NetworkInterface>,
    ) -> (Self, LeaseWaiter) {
        let (sender, receiver) = oneshot::channel();
        let allocator = Self {
            ledger,
            config,
            leases,
            iface,
            waiter: Some(sender),
            marker: None,
        };
        (allocator, LeaseWaiter { receiver })
    }

    /// Obtain an address, publish it and gate the subnet.
    ///
    /// Returns the leased address. Only cancellation and bootstrap faults
    /// end this early; our leader marker is withdrawn on every exit.
    pub async fn run(mut self, ctx: CancellationToken) -> Result<Ipv4Addr, AllocatorError> {
        let me = self.ledger.peer_id().clone();
        info!(peer = %me, range = %self.config.range, "address allocator started");

        let address = match self.leases.load(&self.config.exchange_secret) {
            Some(address) => {
                info!(%address, "adopting address from lease file");
                address
            }
            None => {
                let address = match self.elect(&me, &ctx).await {
                    Ok(address) => address,
                    Err(e) => {
                        self.withdraw();
                        return Err(e);
                    }
                };
                if let Err(e) = self.leases.store(&self.config.exchange_secret, address) {
                    warn!(error = %e, "cannot write lease file");
                }
                address
            }
        };

        self.settle(&me, &ctx, address)?;
        Ok(address)
    }

    async fn elect(&mut self, me: &PeerId, ctx: &CancellationToken) -> Result<Ipv4Addr, AllocatorError> {
        loop {
            pause(ctx, self.config.poll_interval).await?;

            let observation = Observation::read(&self.ledger, self.config.max_time);
            match decide(me, &observation) {
                Decision::NotEnoughNodes => {
                    debug!(nodes = observation.nodes.len(), "not enough nodes to determine an address");
                }
                Decision::NobodyWaiting => {
                    debug!("no node is waiting for an address");
                }
                Decision::Follow { leader } => {
                    self.yield_to(me, &observation);
                    info!(%leader, "not the leader, waiting");
                }
                Decision::Announce => {
                    self.announce(me, ctx)?;
                    info!("announcing ourselves as leader, backing off");
                }
                Decision::BackOff { leader } => {
                    self.yield_to(me, &observation);
                    info!(leader = ?leader, "backing off, not the recorded leader");
                    pause(ctx, self.config.poll_interval).await?;
                }
                Decision::Lead => {
                    debug!(waiting = observation.without_ip.len(), used = ?observation.used, "leading");
                    let address = next_ip(&self.config.range, &observation.used)?;
                    info!(%address, "assigned address to ourselves");
                    return Ok(address);
                }
            }
        }
    }

    fn announce(&mut self, me: &PeerId, ctx: &CancellationToken) -> Result<(), AllocatorError> {
        let marker = ctx.child_token();
        self.ledger.persist(
            &marker,
            self.config.leader_announce,
            self.config.leader_expiration,
            DHCP_LEDGER_KEY,
            LEADER_ENTRY_KEY,
            me.as_str(),
        )?;
        if let Some(previous) = self.marker.replace(marker) {
            previous.cancel();
        }
        Ok(())
    }

    /// Stop refreshing our marker when another peer holds the record.
    fn yield_to(&mut self, me: &PeerId, observation: &Observation) {
        let other_recorded = observation
            .recorded_leader
            .as_ref()
            .is_some_and(|recorded| recorded != me);
        if other_recorded {
            self.withdraw();
        }
    }

    fn withdraw(&mut self) {
        if let Some(marker) = self.marker.take() {
            debug!("withdrawing leader marker");
            marker.cancel();
        }
    }

    /// Gate the subnet, then hand out and publish the address. An address
    /// whose subnet cannot be gated is never published.
    fn settle(&mut self, me: &PeerId, ctx: &CancellationToken, address: Ipv4Addr) -> Result<(), AllocatorError> {
        self.withdraw();

        let cidr = format!("{address}/24");
        self.iface.block_subnet(&cidr)?;

        if let Some(waiter) = self.waiter.take() {
            // Nobody waiting is fine; the address is still published below.
            let _ = waiter.send(address);
        }

        let machine = Machine::new(me.clone(), address.to_string());
        self.ledger.persist(
            ctx,
            self.config.machine_announce,
            self.config.machine_expiration,
            MACHINES_LEDGER_KEY,
            me.as_str(),
            &machine,
        )?;
        info!(%address, "address leased");
        Ok(())
    }
}

async fn pause(ctx: &CancellationToken, period: Duration) -> Result<(), AllocatorError> {
    tokio::select! {
        _ = ctx.cancelled() => Err(AllocatorError::Cancelled),
        _ = tokio::time::sleep(period) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::NextIpError;
    use crate::iface::NoopInterface;
    use crate::protocol::HEALTHCHECK_LEDGER_KEY;
    use plexus_ledger::{LedgerConfig, LocalHub, WireCodec};

    fn peer(id: &str) -> PeerId {
        PeerId::new(id).unwrap()
    }

    fn peers(ids: &[&str]) -> Vec<PeerId> {
        ids.iter().map(|id| peer(id)).collect()
    }

    fn observation(nodes: &[&str], without_ip: &[&str], recorded: Option<&str>) -> Observation {
        Observation {
            nodes: peers(nodes),
            without_ip: peers(without_ip),
            used: Vec::new(),
            recorded_leader: recorded.map(peer),
        }
    }

    /// Ids ordered by election outcome among `ids`: (winner, loser).
    fn winner_and_loser(a: &str, b: &str) -> (PeerId, PeerId) {
        let set = peers(&[a, b]);
        let winner = leader(&set).unwrap();
        let loser = set.into_iter().find(|p| *p != winner).unwrap();
        (winner, loser)
    }

    #[test]
    fn single_node_keeps_polling() {
        let obs = observation(&["a"], &["a"], None);
        assert_eq!(decide(&peer("a"), &obs), Decision::NotEnoughNodes);
    }

    #[test]
    fn nobody_waiting_keeps_polling() {
        let obs = observation(&["a", "b"], &[], Some("a"));
        assert_eq!(decide(&peer("a"), &obs), Decision::NobodyWaiting);
        assert_eq!(decide(&peer("b"), &obs), Decision::NobodyWaiting);
    }

    #[test]
    fn computed_leader_announces_first() {
        let (winner, loser) = winner_and_loser("a", "b");
        let obs = observation(&["a", "b"], &["a", "b"], None);

        assert_eq!(decide(&winner, &obs), Decision::Announce);
        assert_eq!(decide(&loser, &obs), Decision::Follow { leader: winner });
    }

    #[test]
    fn stale_marker_of_an_addressed_peer_is_overridden() {
        let (winner, loser) = winner_and_loser("b", "c");
        let obs = Observation {
            nodes: peers(&["a", "b", "c"]),
            without_ip: vec![winner.clone(), loser],
            used: vec!["10.1.0.1".into()],
            recorded_leader: Some(peer("a")),
        };
        assert_eq!(decide(&winner, &obs), Decision::Announce);
    }

    #[test]
    fn recorded_leader_leads() {
        let (winner, loser) = winner_and_loser("a", "b");
        let obs = Observation {
            nodes: peers(&["a", "b"]),
            without_ip: peers(&["a", "b"]),
            used: Vec::new(),
            recorded_leader: Some(winner.clone()),
        };
        assert_eq!(decide(&winner, &obs), Decision::Lead);
        assert_eq!(decide(&loser, &obs), Decision::Follow { leader: winner });
    }

    #[test]
    fn recorded_leader_leads_even_when_no_longer_computed() {
        let (winner, loser) = winner_and_loser("a", "b");
        let obs = Observation {
            nodes: peers(&["a", "b"]),
            without_ip: peers(&["a", "b"]),
            used: Vec::new(),
            recorded_leader: Some(loser.clone()),
        };
        assert_eq!(decide(&loser, &obs), Decision::Lead);
        assert_eq!(
            decide(&winner, &obs),
            Decision::BackOff {
                leader: Some(loser)
            }
        );
    }

    fn ledger(hub: &LocalHub, id: &str) -> Arc<Ledger> {
        Arc::new(Ledger::new(
            peer(id),
            Arc::new(hub.transport()),
            WireCodec::plain(),
            LedgerConfig::default(),
        ))
    }

    fn fast_config(secret: &str) -> AllocatorConfig {
        AllocatorConfig {
            poll_interval: Duration::from_millis(10),
            ..AllocatorConfig::new(AddressRange::parse("10.1.0.1/24").unwrap(), secret)
        }
    }

    async fn heartbeat(ledger: &Ledger, id: &str) {
        ledger
            .add(HEALTHCHECK_LEDGER_KEY, id, &wall_clock_ms())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn observation_reads_machines_and_marker() {
        let hub = LocalHub::default();
        let ledger = ledger(&hub, "a");
        for id in ["a", "b", "c"] {
            heartbeat(&ledger, id).await;
        }
        ledger
            .add(MACHINES_LEDGER_KEY, "b", &Machine::new(peer("b"), "10.1.0.1"))
            .await
            .unwrap();
        ledger.add(DHCP_LEDGER_KEY, LEADER_ENTRY_KEY, "c").await.unwrap();

        let obs = Observation::read(&ledger, Duration::from_secs(60));
        assert_eq!(obs.nodes, peers(&["a", "b", "c"]));
        assert_eq!(obs.without_ip, peers(&["a", "c"]));
        assert_eq!(obs.used, vec!["10.1.0.1".to_string()]);
        assert_eq!(obs.recorded_leader, Some(peer("c")));
    }

    #[tokio::test]
    async fn lone_node_never_leaves_polling() {
        let hub = LocalHub::default();
        let ledger = ledger(&hub, "a");
        heartbeat(&ledger, "a").await;
        let dir = tempfile::tempdir().unwrap();

        let (allocator, waiter) = Allocator::new(
            Arc::clone(&ledger),
            fast_config("secret"),
            LeaseStore::new(dir.path()),
            Arc::new(NoopInterface),
        );
        let ctx = CancellationToken::new();
        let task = tokio::spawn(allocator.run(ctx.clone()));

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(ledger.get_key(DHCP_LEDGER_KEY, LEADER_ENTRY_KEY).is_none());
        assert!(ledger.last_block().bucket(MACHINES_LEDGER_KEY).is_none());

        ctx.cancel();
        assert!(matches!(task.await.unwrap(), Err(AllocatorError::Cancelled)));
        assert!(matches!(waiter.wait().await, Err(AllocatorError::Cancelled)));
    }

    #[tokio::test]
    async fn fully_addressed_mesh_never_leaves_polling() {
        let hub = LocalHub::default();
        let ledger = ledger(&hub, "a");
        for (id, address) in [("a", "10.1.0.1"), ("b", "10.1.0.2")] {
            heartbeat(&ledger, id).await;
            ledger
                .add(MACHINES_LEDGER_KEY, id, &Machine::new(peer(id), address))
                .await
                .unwrap();
        }
        let dir = tempfile::tempdir().unwrap();

        let (allocator, _waiter) = Allocator::new(
            Arc::clone(&ledger),
            fast_config("secret"),
            LeaseStore::new(dir.path()),
            Arc::new(NoopInterface),
        );
        let ctx = CancellationToken::new();
        let task = tokio::spawn(allocator.run(ctx.clone()));

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(ledger.get_key(DHCP_LEDGER_KEY, LEADER_ENTRY_KEY).is_none());
        ctx.cancel();
        assert!(matches!(task.await.unwrap(), Err(AllocatorError::Cancelled)));
    }

    #[tokio::test]
    async fn two_nodes_on_one_ledger_view_elect_and_lease() {
        let hub = LocalHub::default();
        let ledger = ledger(&hub, "a");
        heartbeat(&ledger, "a").await;
        heartbeat(&ledger, "b").await;
        let dir = tempfile::tempdir().unwrap();

        let (allocator, waiter) = Allocator::new(
            Arc::clone(&ledger),
            fast_config("secret"),
            LeaseStore::new(dir.path()),
            Arc::new(NoopInterface),
        );
        let ctx = CancellationToken::new();
        tokio::spawn(allocator.run(ctx.clone()));

        // "b" never runs an allocator; if it wins the election, "a" waits.
        // Give "a" the lead by recording it once "b" would have announced.
        let (winner, _) = winner_and_loser("a", "b");
        if winner != peer("a") {
            ledger
                .persist(
                    &ctx,
                    Duration::from_millis(10),
                    Duration::from_secs(5),
                    DHCP_LEDGER_KEY,
                    LEADER_ENTRY_KEY,
                    "a",
                )
                .unwrap();
        }

        let address = tokio::time::timeout(Duration::from_secs(5), waiter.wait())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(address, Ipv4Addr::new(10, 1, 0, 1));

        let machine: Machine = ledger
            .get_key(MACHINES_LEDGER_KEY, "a")
            .unwrap()
            .decode()
            .unwrap();
        assert_eq!(machine.address, "10.1.0.1");
        assert_eq!(LeaseStore::new(dir.path()).load("secret"), Some(address));
        ctx.cancel();
    }

    #[tokio::test]
    async fn exhausted_range_withdraws_the_marker() {
        let hub = LocalHub::default();
        let ledger = ledger(&hub, "a");
        for id in ["a", "b", "c"] {
            heartbeat(&ledger, id).await;
        }
        for (id, address) in [("b", "10.1.0.1"), ("c", "10.1.0.2")] {
            ledger
                .add(MACHINES_LEDGER_KEY, id, &Machine::new(peer(id), address))
                .await
                .unwrap();
        }
        let dir = tempfile::tempdir().unwrap();
        let config = AllocatorConfig {
            poll_interval: Duration::from_millis(10),
            leader_announce: Duration::from_millis(20),
            leader_expiration: Duration::from_millis(60),
            ..AllocatorConfig::new(AddressRange::parse("10.1.0.1/30").unwrap(), "secret")
        };

        let (allocator, waiter) = Allocator::new(
            Arc::clone(&ledger),
            config,
            LeaseStore::new(dir.path()),
            Arc::new(NoopInterface),
        );
        let ctx = CancellationToken::new();
        let result = tokio::time::timeout(Duration::from_secs(5), allocator.run(ctx.clone()))
            .await
            .unwrap();
        assert!(matches!(
            result,
            Err(AllocatorError::Address(NextIpError::Exhausted(_)))
        ));
        assert!(matches!(waiter.wait().await, Err(AllocatorError::Cancelled)));

        // The node is still up, but its marker lapses.
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(ledger.get_key(DHCP_LEDGER_KEY, LEADER_ENTRY_KEY).is_none());
        assert!(!ctx.is_cancelled());
    }

    #[tokio::test]
    async fn failed_gate_publishes_nothing() {
        let hub = LocalHub::default();
        let ledger = ledger(&hub, "a");
        let dir = tempfile::tempdir().unwrap();
        let leases = LeaseStore::open(dir.path()).unwrap();
        leases.store("secret", Ipv4Addr::new(10, 1, 0, 9)).unwrap();

        let (allocator, waiter) = Allocator::new(
            Arc::clone(&ledger),
            fast_config("secret"),
            leases,
            Arc::new(RefusingInterface),
        );
        let ctx = CancellationToken::new();
        assert!(matches!(
            allocator.run(ctx.clone()).await,
            Err(AllocatorError::Gate(_))
        ));
        assert!(matches!(waiter.wait().await, Err(AllocatorError::Cancelled)));
        assert!(ledger.get_key(MACHINES_LEDGER_KEY, "a").is_none());
        ctx.cancel();
    }

    struct RefusingInterface;

    impl NetworkInterface for RefusingInterface {
        fn block_subnet(&self, cidr: &str) -> Result<(), crate::error::IfaceError> {
            Err(crate::error::IfaceError::Gate {
                cidr: cidr.to_string(),
                reason: "refused".into(),
            })
        }
    }
}
