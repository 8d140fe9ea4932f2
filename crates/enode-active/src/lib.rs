//! Local enode activation.
//!
//! Drives this process from "just started" to "announced and pinging":
//! wait for the chain, discover an external address, find or adopt a
//! collateral, broadcast the announcement and keep pinging while
//! started. Every failure lands in `NotCapable` with a human-readable
//! reason; nothing here is ever reported to peers.

use enode_chain::{
    ActiveIdentity, Chain, Net, SharedIdentity, Signer, Wallet, WalletError,
};
use enode_messages::{inv, Announce, Ping};
use enode_registry::EnodeRegistry;
use enode_sync::SyncManager;
use enode_types::{
    params::PROTOCOL_VERSION, NetAddr, Network, NetworkParams, Outpoint, PubKey, SecretKey,
    COLLATERAL_AMOUNT, MIN_PING_SECONDS,
};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// How this node expects to be activated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActiveType {
    /// Not determined yet.
    Unknown,
    /// Collateral lives in someone else's wallet; adopt the record
    /// from the network.
    Remote,
    /// Collateral lives in the local wallet; announce ourselves.
    Local,
}

impl ActiveType {
    fn name(self) -> &'static str {
        match self {
            ActiveType::Unknown => "UNKNOWN",
            ActiveType::Remote => "REMOTE",
            ActiveType::Local => "LOCAL",
        }
    }
}

/// Activation progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActiveStatus {
    /// Just started, nothing attempted.
    Initial,
    /// Waiting for the blockchain to sync.
    SyncInProcess,
    /// Collateral exists but is too fresh.
    InputTooNew,
    /// A precondition failed; see the reason string.
    NotCapable,
    /// Announced and pinging.
    Started,
}

impl ActiveStatus {
    fn name(self) -> &'static str {
        match self {
            ActiveStatus::Initial => "INITIAL",
            ActiveStatus::SyncInProcess => "SYNC_IN_PROCESS",
            ActiveStatus::InputTooNew => "INPUT_TOO_NEW",
            ActiveStatus::NotCapable => "NOT_CAPABLE",
            ActiveStatus::Started => "STARTED",
        }
    }
}

/// Operator configuration for the activation component.
#[derive(Clone)]
pub struct ActiveConfig {
    /// This process should act as an enode.
    pub is_enode: bool,
    /// The host accepts inbound connections.
    pub listen: bool,
    /// Operator-specified external endpoint, if any.
    pub external_address: Option<NetAddr>,
    /// Operating secret key.
    pub enode_key: Option<SecretKey>,
}

struct State {
    active_type: ActiveType,
    status: ActiveStatus,
    not_capable_reason: String,
    pinger_enabled: bool,
    outpoint: Outpoint,
    service: NetAddr,
    enode_pubkey: PubKey,
}

/// The local activation state machine.
pub struct ActiveEnode {
    params: NetworkParams,
    chain: Arc<dyn Chain>,
    net: Arc<dyn Net>,
    wallet: Arc<dyn Wallet>,
    signer: Arc<dyn Signer>,
    sync: Arc<SyncManager>,
    registry: Arc<EnodeRegistry>,
    identity: SharedIdentity,
    config: ActiveConfig,
    state: Mutex<State>,
}

impl ActiveEnode {
    /// Wire up the activation component.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        params: NetworkParams,
        chain: Arc<dyn Chain>,
        net: Arc<dyn Net>,
        wallet: Arc<dyn Wallet>,
        signer: Arc<dyn Signer>,
        sync: Arc<SyncManager>,
        registry: Arc<EnodeRegistry>,
        identity: SharedIdentity,
        config: ActiveConfig,
    ) -> Self {
        let enode_pubkey = config
            .enode_key
            .as_ref()
            .and_then(|key| signer.derive_pubkey(key).ok())
            .unwrap_or_default();
        Self {
            params,
            chain,
            net,
            wallet,
            signer,
            sync,
            registry,
            identity,
            config,
            state: Mutex::new(State {
                active_type: ActiveType::Unknown,
                status: ActiveStatus::Initial,
                not_capable_reason: String::new(),
                pinger_enabled: false,
                outpoint: Outpoint::default(),
                service: NetAddr::default(),
                enode_pubkey,
            }),
        }
    }

    /// Current status.
    pub fn status(&self) -> ActiveStatus {
        self.state.lock().status
    }

    /// Current type.
    pub fn active_type(&self) -> ActiveType {
        self.state.lock().active_type
    }

    /// Whether the pinger is running.
    pub fn pinger_enabled(&self) -> bool {
        self.state.lock().pinger_enabled
    }

    /// Human-readable status line.
    pub fn status_text(&self) -> String {
        let state = self.state.lock();
        match state.status {
            ActiveStatus::Initial => "Node just started, not yet activated".into(),
            ActiveStatus::SyncInProcess => {
                "Sync in progress. Must wait until sync is complete to start enode".into()
            }
            ActiveStatus::InputTooNew => format!(
                "Enode input must have at least {} confirmations",
                self.params.min_collateral_confirmations
            ),
            ActiveStatus::NotCapable => format!("Not capable enode: {}", state.not_capable_reason),
            ActiveStatus::Started => "Enode successfully started".into(),
        }
    }

    fn not_capable(&self, state: &mut State, reason: &str) {
        state.status = ActiveStatus::NotCapable;
        state.not_capable_reason = reason.to_string();
        warn!(
            status = state.status.name(),
            reason, "enode activation blocked"
        );
    }

    /// One activation tick.
    pub fn manage_state(&self, now: i64) {
        if !self.config.is_enode {
            return;
        }
        debug!("activation tick");

        {
            let mut state = self.state.lock();
            if self.params.network != Network::Regtest && !self.chain.is_synced() {
                state.status = ActiveStatus::SyncInProcess;
                info!(status = state.status.name(), "waiting for blockchain sync");
                return;
            }
            if state.status == ActiveStatus::SyncInProcess {
                state.status = ActiveStatus::Initial;
            }
        }

        if self.active_type() == ActiveType::Unknown {
            self.manage_state_initial();
        }

        match self.active_type() {
            ActiveType::Remote => self.manage_state_remote(now),
            ActiveType::Local => {
                // Remote start first: a restarted node re-adopts its
                // live record without a fresh broadcast.
                self.manage_state_remote(now);
                if self.status() != ActiveStatus::Started {
                    self.manage_state_local(now);
                }
            }
            ActiveType::Unknown => {}
        }

        self.send_ping(now);
    }

    fn manage_state_initial(&self) {
        let mut state = self.state.lock();
        debug!(
            status = state.status.name(),
            active_type = state.active_type.name(),
            pinger = state.pinger_enabled,
            "initial activation checks"
        );

        if !self.config.listen {
            self.not_capable(
                &mut state,
                "Enode must accept connections from outside; make sure the listen option is on",
            );
            return;
        }

        // Configured override first, discovered address second.
        let mut found = self
            .config
            .external_address
            .filter(|addr| self.is_valid_net_addr(addr));
        if found.is_none() {
            let peers = self.net.connected_peers();
            if peers.is_empty() {
                self.not_capable(
                    &mut state,
                    "Can't detect valid external address; will retry when connections appear",
                );
                return;
            }
            for peer in &peers {
                if let Some(addr) = self.net.local_address_for(peer) {
                    if self.is_valid_net_addr(&addr) {
                        found = Some(addr);
                        break;
                    }
                }
            }
        }
        let Some(service) = found else {
            self.not_capable(
                &mut state,
                "Can't detect valid external address; consider setting one explicitly, IPv4 only",
            );
            return;
        };

        if !self.params.is_valid_port(service.port) {
            self.not_capable(
                &mut state,
                &format!("Invalid port {} for this network", service.port),
            );
            return;
        }

        // Can we reach ourselves from the outside?
        info!(%service, "probing own inbound connectivity");
        if self.net.connect(service).is_none() {
            self.not_capable(&mut state, &format!("Could not connect to {service}"));
            return;
        }
        state.service = service;

        // Default to remote; a local collateral upgrades us.
        state.active_type = ActiveType::Remote;

        if self.wallet.is_locked() {
            debug!("wallet is locked, staying remote");
            return;
        }
        if self.wallet.balance() < COLLATERAL_AMOUNT {
            debug!("wallet balance below collateral, staying remote");
            return;
        }
        if self.wallet.select_collateral_output().is_ok() {
            state.active_type = ActiveType::Local;
        }

        debug!(
            status = state.status.name(),
            active_type = state.active_type.name(),
            pinger = state.pinger_enabled,
            "initial activation done"
        );
    }

    fn manage_state_remote(&self, now: i64) {
        let pubkey = self.state.lock().enode_pubkey;
        debug!(
            status = self.status().name(),
            active_type = self.active_type().name(),
            pubkey = %pubkey,
            "remote activation check"
        );

        if let Some(mn) = self.registry.get_by_enode_pubkey(&pubkey) {
            self.registry.check_enode(&mn.outpoint, false, now);
            let Some(mn) = self.registry.get(&mn.outpoint) else {
                return;
            };
            let mut state = self.state.lock();
            if mn.protocol_version != PROTOCOL_VERSION {
                self.not_capable(&mut state, "Invalid protocol version");
                return;
            }
            if state.service != NetAddr::default() && state.service != mn.addr {
                self.not_capable(
                    &mut state,
                    "Broadcasted IP doesn't match our external address; \
                     issue a new broadcast if this enode's IP changed",
                );
                return;
            }
            if !mn.state.valid_for_auto_start() {
                self.not_capable(&mut state, &format!("Enode in {} state", mn.state));
                return;
            }
            if state.status != ActiveStatus::Started {
                info!(enode = %mn.outpoint, "remote activation complete");
                state.outpoint = mn.outpoint;
                state.service = mn.addr;
                state.pinger_enabled = true;
                state.status = ActiveStatus::Started;
                if let Some(key) = self.config.enode_key.clone() {
                    self.identity.set(ActiveIdentity {
                        outpoint: mn.outpoint,
                        addr: mn.addr,
                        enode_pubkey: pubkey,
                        enode_key: key,
                    });
                }
            }
        } else {
            let mut state = self.state.lock();
            self.not_capable(&mut state, "Enode not in enode list");
        }
    }

    fn manage_state_local(&self, now: i64) {
        if self.status() == ActiveStatus::Started {
            return;
        }
        debug!(
            status = self.status().name(),
            active_type = self.active_type().name(),
            "local activation check"
        );

        let collateral = match self.wallet.select_collateral_output() {
            Ok(collateral) => collateral,
            Err(WalletError::Locked) => {
                let mut state = self.state.lock();
                self.not_capable(&mut state, "Wallet is locked");
                return;
            }
            Err(_) => return,
        };

        let confirmations = match self.chain.height_of_tx(&collateral.outpoint.txid) {
            Ok(height) => self
                .chain
                .tip_height()
                .map(|tip| tip.saturating_sub(height) + 1)
                .unwrap_or(0),
            Err(_) => 0,
        };
        if confirmations < self.params.min_collateral_confirmations {
            let mut state = self.state.lock();
            state.status = ActiveStatus::InputTooNew;
            state.not_capable_reason =
                format!("{} - {} confirmations", self.status_text_for_input_too_new(), confirmations);
            warn!(
                confirmations,
                required = self.params.min_collateral_confirmations,
                "collateral too new"
            );
            return;
        }

        self.wallet.lock_coin(&collateral.outpoint);

        let service = self.state.lock().service;
        let mnb = match self.create_announce(&collateral, service, now) {
            Ok(mnb) => mnb,
            Err(reason) => {
                let mut state = self.state.lock();
                self.not_capable(&mut state, &format!("Error creating enode broadcast: {reason}"));
                return;
            }
        };

        {
            let mut state = self.state.lock();
            state.outpoint = collateral.outpoint;
            state.pinger_enabled = true;
            state.status = ActiveStatus::Started;
        }
        if let Some(key) = self.config.enode_key.clone() {
            self.identity.set(ActiveIdentity {
                outpoint: collateral.outpoint,
                addr: service,
                enode_pubkey: self.state.lock().enode_pubkey,
                enode_key: key,
            });
        }

        info!(enode = %collateral.outpoint, "registering local enode");
        self.registry.update_enode_list(&mnb, now);
        info!(enode = %collateral.outpoint, "relaying enode broadcast");
        self.net.relay_inventory(inv::ANNOUNCE, mnb.hash());
    }

    fn status_text_for_input_too_new(&self) -> String {
        format!(
            "Enode input must have at least {} confirmations",
            self.params.min_collateral_confirmations
        )
    }

    /// Build and doubly-sign a fresh announcement for our collateral.
    fn create_announce(
        &self,
        collateral: &enode_chain::CollateralOutput,
        service: NetAddr,
        now: i64,
    ) -> Result<Announce, String> {
        if !self.sync.is_synced() && self.params.network != Network::Regtest {
            return Err("sync in progress; must finish before starting an enode".into());
        }
        let enode_key = self
            .config
            .enode_key
            .clone()
            .ok_or_else(|| "no enode key configured".to_string())?;
        let enode_pubkey = self.state.lock().enode_pubkey;
        if !self.is_valid_net_addr(&service) {
            return Err(format!("invalid address {service}"));
        }

        let mut ping = self
            .build_ping(collateral.outpoint)
            .ok_or_else(|| "chain too short for a ping".to_string())?;
        ping.sign(&*self.signer, &enode_key, now)
            .map_err(|e| format!("failed to sign ping: {e}"))?;

        let mut mnb = Announce {
            outpoint: collateral.outpoint,
            addr: service,
            collateral_pubkey: collateral.pubkey,
            enode_pubkey,
            sig: Vec::new(),
            sig_time: now,
            protocol_version: PROTOCOL_VERSION,
            last_ping: ping,
        };
        mnb.sign(&*self.signer, &collateral.privkey, now)
            .map_err(|e| format!("failed to sign broadcast: {e}"))?;
        Ok(mnb)
    }

    fn build_ping(&self, outpoint: Outpoint) -> Option<Ping> {
        let tip = self.chain.tip_height()?;
        if tip < Ping::BLOCK_DEPTH {
            return None;
        }
        let block_hash = self.chain.block_hash_at(tip - Ping::BLOCK_DEPTH).ok()?;
        Some(Ping {
            outpoint,
            block_hash,
            sig_time: 0,
            sig: Vec::new(),
        })
    }

    /// Sign and gossip a fresh ping; throttled to the ping interval.
    pub fn send_ping(&self, now: i64) -> bool {
        let (enabled, outpoint) = {
            let state = self.state.lock();
            (state.pinger_enabled, state.outpoint)
        };
        if !enabled {
            debug!("pinger disabled, skipping");
            return false;
        }

        if !self.registry.has(&outpoint) {
            let mut state = self.state.lock();
            self.not_capable(&mut state, "Enode not in enode list");
            return false;
        }

        let Some(enode_key) = self.config.enode_key.clone() else {
            return false;
        };
        let Some(mut ping) = self.build_ping(outpoint) else {
            return false;
        };
        if ping.sign(&*self.signer, &enode_key, now).is_err() {
            warn!("could not sign enode ping");
            return false;
        }

        if self
            .registry
            .is_enode_pinged_within(&outpoint, MIN_PING_SECONDS, ping.sig_time)
        {
            debug!("too early for another enode ping");
            return false;
        }

        // Bump our own record first so the liveness check never marks
        // us expired between the send and the receipt.
        self.registry.set_enode_last_ping(&outpoint, &ping);
        info!(enode = %outpoint, "relaying enode ping");
        self.net.relay_inventory(inv::PING, ping.hash());
        true
    }

    fn is_valid_net_addr(&self, addr: &NetAddr) -> bool {
        self.params.network == Network::Regtest
            || (addr.is_routable() && !addr.is_rfc1918() && !addr.is_local())
    }
}
