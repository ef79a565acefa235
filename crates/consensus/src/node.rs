//! Operator node - wires transport, registry, engines and observer together

use crate::dispatcher::Dispatcher;
use crate::engine::{EngineConfig, EngineKind, ThresholdEngine};
use crate::error::ConsensusError;
use crate::heartbeat::{HeartbeatService, DEFAULT_HEARTBEAT_INTERVAL};
use crate::observer::EventObserver;
use crate::operators::{OperatorRegistry, RegistryConfig};
use bridge_chain::{AuthoritySource, ChainAdapter, ChainSet, OperatorCredential};
use bridge_gossip::codec::now_ms;
use bridge_gossip::{GossipConfig, GossipTransport, HttpProbe, PeerDiscovery, ReachabilityProbe};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Snapshot of node activity
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeStats {
    pub peers: usize,
    pub public_peers: usize,
    pub operators: usize,
    pub connected_operators: usize,
    pub threshold: usize,
    pub pending_mints: usize,
    pub pending_redemptions: usize,
    pub open_proposals: usize,
}

/// A bridge operator node
pub struct OperatorNode {
    transport: Arc<GossipTransport>,
    discovery: Arc<PeerDiscovery>,
    registry: Arc<OperatorRegistry>,
    mint: Arc<ThresholdEngine>,
    redemption: Arc<ThresholdEngine>,
    governance: Arc<ThresholdEngine>,
    observer: Arc<EventObserver>,
    dispatcher: Arc<Dispatcher>,
    heartbeat: Option<Arc<HeartbeatService>>,
    chains: ChainSet,
    operator: Option<String>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl OperatorNode {
    /// Load the operator set, then start every background loop
    pub async fn start(&self) -> anyhow::Result<()> {
        match self.registry.refresh().await {
            Ok(change) => tracing::info!(
                "Loaded {} operators, threshold {}",
                change.added.len(),
                self.registry.threshold()
            ),
            Err(e) => tracing::warn!("Initial operator refresh failed, will retry: {}", e),
        }

        let mut tasks = self.tasks.lock();
        tasks.push(self.dispatcher.spawn(self.transport.subscribe()));
        tasks.push(self.transport.spawn_cache_sweeper());
        tasks.push(self.discovery.spawn());
        tasks.push(self.registry.spawn_refresh());
        for engine in [&self.mint, &self.redemption, &self.governance] {
            tasks.extend(engine.spawn());
        }
        tasks.extend(self.observer.spawn_all());
        if let Some(heartbeat) = &self.heartbeat {
            tasks.push(heartbeat.clone().spawn());
        }

        tracing::info!(
            "Operator node {} started as {} on chains {:?}",
            self.transport.my_id(),
            self.operator.as_deref().unwrap_or("observer"),
            self.chains.ids()
        );
        Ok(())
    }

    /// Abort background loops and drop every peer
    pub fn shutdown(&self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        for peer in self.transport.directory().all_peers() {
            self.transport.directory().remove_peer(&peer.id);
        }
        tracing::info!("Operator node stopped");
    }

    pub fn stats(&self) -> NodeStats {
        let directory = self.transport.directory();
        NodeStats {
            peers: directory.len(),
            public_peers: directory.public_peers().len(),
            operators: self.registry.operators().len(),
            connected_operators: self.registry.connected_count(now_ms()),
            threshold: self.registry.threshold(),
            pending_mints: self.mint.len(),
            pending_redemptions: self.redemption.len(),
            open_proposals: self.governance.len(),
        }
    }

    pub fn transport(&self) -> &Arc<GossipTransport> {
        &self.transport
    }

    pub fn registry(&self) -> &Arc<OperatorRegistry> {
        &self.registry
    }

    pub fn mint(&self) -> &Arc<ThresholdEngine> {
        &self.mint
    }

    pub fn redemption(&self) -> &Arc<ThresholdEngine> {
        &self.redemption
    }

    pub fn governance(&self) -> &Arc<ThresholdEngine> {
        &self.governance
    }

    pub fn observer(&self) -> &Arc<EventObserver> {
        &self.observer
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn chains(&self) -> &ChainSet {
        &self.chains
    }

    /// Operator this node signs for, if any
    pub fn operator(&self) -> Option<&str> {
        self.operator.as_deref()
    }
}

/// Builder for OperatorNode
pub struct OperatorNodeBuilder {
    gossip: GossipConfig,
    registry: RegistryConfig,
    mint: EngineConfig,
    redemption: EngineConfig,
    governance: EngineConfig,
    heartbeat_interval: Duration,
    chains: ChainSet,
    authority: Option<Arc<dyn AuthoritySource>>,
    probe: Option<Arc<dyn ReachabilityProbe>>,
    credential: Option<OperatorCredential>,
    treasury: String,
}

impl OperatorNodeBuilder {
    pub fn new() -> Self {
        Self {
            gossip: GossipConfig::default(),
            registry: RegistryConfig::default(),
            mint: EngineConfig::for_kind(EngineKind::Mint),
            redemption: EngineConfig::for_kind(EngineKind::Redemption),
            governance: EngineConfig::for_kind(EngineKind::Governance),
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            chains: ChainSet::new(),
            authority: None,
            probe: None,
            credential: None,
            treasury: String::new(),
        }
    }

    pub fn gossip(mut self, config: GossipConfig) -> Self {
        self.gossip = config;
        self
    }

    pub fn registry(mut self, config: RegistryConfig) -> Self {
        self.registry = config;
        self
    }

    pub fn engine(mut self, kind: EngineKind, config: EngineConfig) -> Self {
        match kind {
            EngineKind::Mint => self.mint = config,
            EngineKind::Redemption => self.redemption = config,
            EngineKind::Governance => self.governance = config,
        }
        self
    }

    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn chain(mut self, adapter: Arc<dyn ChainAdapter>) -> Self {
        self.chains.insert(adapter);
        self
    }

    /// Settlement chain view of the signer set
    pub fn authority(mut self, source: Arc<dyn AuthoritySource>) -> Self {
        self.authority = Some(source);
        self
    }

    pub fn probe(mut self, probe: Arc<dyn ReachabilityProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    pub fn credential(mut self, credential: OperatorCredential) -> Self {
        self.credential = Some(credential);
        self
    }

    pub fn treasury(mut self, account: impl Into<String>) -> Self {
        self.treasury = account.into();
        self
    }

    pub fn build(self) -> Result<OperatorNode, ConsensusError> {
        let authority = self.authority.ok_or(ConsensusError::NoAuthoritySource)?;
        let probe = self
            .probe
            .unwrap_or_else(|| Arc::new(HttpProbe::default()) as Arc<dyn ReachabilityProbe>);

        let transport = GossipTransport::new(self.gossip, probe);
        let discovery = PeerDiscovery::new(transport.clone());
        let registry = Arc::new(OperatorRegistry::new(self.registry, authority));

        let engine = |kind: EngineKind, config: EngineConfig| {
            ThresholdEngine::new(
                kind,
                config,
                self.chains.clone(),
                registry.clone(),
                transport.clone(),
                self.credential.clone(),
            )
        };
        let mint = engine(EngineKind::Mint, self.mint);
        let redemption = engine(EngineKind::Redemption, self.redemption);
        let governance = engine(EngineKind::Governance, self.governance);

        let operator = self.credential.as_ref().map(|c| c.username().to_string());
        let observer = EventObserver::new(
            self.treasury,
            self.chains.clone(),
            registry.clone(),
            mint.clone(),
            redemption.clone(),
            governance.clone(),
            operator.clone(),
        );
        let dispatcher = Dispatcher::new(
            registry.clone(),
            Some(discovery.clone()),
            mint.clone(),
            redemption.clone(),
            governance.clone(),
        );
        let heartbeat = self.credential.map(|credential| {
            Arc::new(HeartbeatService::new(
                registry.clone(),
                transport.clone(),
                credential,
                transport.my_id(),
                self.heartbeat_interval,
            ))
        });

        Ok(OperatorNode {
            transport,
            discovery,
            registry,
            mint,
            redemption,
            governance,
            observer,
            dispatcher,
            heartbeat,
            chains: self.chains,
            operator,
            tasks: Mutex::new(Vec::new()),
        })
    }
}

impl Default for OperatorNodeBuilder {
    fn default() -> Self {
        Self::new()
    }
}
