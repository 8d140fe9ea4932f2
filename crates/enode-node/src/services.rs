//! The assembled subsystem.

use crate::NodeConfig;
use enode_active::{ActiveEnode, ActiveStatus};
use enode_chain::{Chain, Net, Signer, SporkSet, SharedIdentity, Wallet};
use enode_payments::PaymentEngine;
use enode_registry::{EnodeRegistry, RegistryEvent};
use enode_sync::{SyncAction, SyncManager, SYNC_TICK_SECONDS};
use enode_types::CHECK_SECONDS;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{sync_channel, Receiver};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Capacity of the self-announce event channel; losing an event only
/// delays reactivation until the next activation tick.
const EVENT_CHANNEL_CAPACITY: usize = 16;

/// Seconds between housekeeping rounds.
const HOUSEKEEPING_SECONDS: u64 = 60;

/// Seconds between activation ticks.
const ACTIVATION_SECONDS: u64 = 60;

/// Everything the subsystem runs on, constructed once at startup.
pub struct Services {
    /// Configuration.
    pub config: NodeConfig,
    /// Host chain.
    pub chain: Arc<dyn Chain>,
    /// Host peer set.
    pub net: Arc<dyn Net>,
    /// Operator feature flags.
    pub sporks: Arc<SporkSet>,
    /// Sync state machine.
    pub sync: Arc<SyncManager>,
    /// Enode registry.
    pub registry: Arc<EnodeRegistry>,
    /// Payment vote engine.
    pub payments: Arc<PaymentEngine>,
    /// Local activation.
    pub active: Arc<ActiveEnode>,
    /// Own-enode identity cell.
    pub identity: SharedIdentity,
    shutdown: Arc<AtomicBool>,
    registry_events: Mutex<Option<Receiver<RegistryEvent>>>,
}

impl Services {
    /// Wire every component together.
    pub fn new(
        config: NodeConfig,
        chain: Arc<dyn Chain>,
        net: Arc<dyn Net>,
        wallet: Arc<dyn Wallet>,
        signer: Arc<dyn Signer>,
    ) -> Arc<Self> {
        let sporks = Arc::new(SporkSet::new());
        let sync = Arc::new(SyncManager::new());
        let identity = SharedIdentity::new();

        let registry = Arc::new(EnodeRegistry::new(
            config.params.clone(),
            Arc::clone(&chain),
            Arc::clone(&net),
            Arc::clone(&signer),
            Arc::clone(&sporks),
            Arc::clone(&sync),
            identity.clone(),
        ));
        let payments = Arc::new(PaymentEngine::new(
            config.params.clone(),
            Arc::clone(&chain),
            Arc::clone(&net),
            Arc::clone(&signer),
            Arc::clone(&sporks),
            Arc::clone(&sync),
            Arc::clone(&registry),
            identity.clone(),
        ));
        let active = Arc::new(ActiveEnode::new(
            config.params.clone(),
            Arc::clone(&chain),
            Arc::clone(&net),
            Arc::clone(&wallet),
            Arc::clone(&signer),
            Arc::clone(&sync),
            Arc::clone(&registry),
            identity.clone(),
            config.active.clone(),
        ));

        // Registry validators publish; the activation tick consumes.
        let (event_tx, event_rx) = sync_channel(EVENT_CHANNEL_CAPACITY);
        registry.set_event_sender(event_tx);

        Arc::new(Self {
            config,
            chain,
            net,
            sporks,
            sync,
            registry,
            payments,
            active,
            identity,
            shutdown: Arc::new(AtomicBool::new(false)),
            registry_events: Mutex::new(Some(event_rx)),
        })
    }

    /// Load both caches from disk, tolerating absent files.
    pub fn load_caches(&self) {
        let path = self.config.registry_cache_path();
        if path.exists() {
            if let Err(err) = self.registry.load_cache(&path) {
                tracing::warn!(error = %err, "could not load registry cache");
            }
        }
        let path = self.config.payments_cache_path();
        if path.exists() {
            if let Err(err) = self.payments.load_cache(&path) {
                tracing::warn!(error = %err, "could not load payment cache");
            }
        }
    }

    /// Flush both caches to disk.
    pub fn save_caches(&self) {
        if let Err(err) = self.registry.save_cache(&self.config.registry_cache_path()) {
            tracing::warn!(error = %err, "could not save registry cache");
        }
        if let Err(err) = self.payments.save_cache(&self.config.payments_cache_path()) {
            tracing::warn!(error = %err, "could not save payment cache");
        }
    }

    /// The host connected a new chain tip.
    pub fn updated_block_tip(&self, height: u32) {
        let now = self.chain.adjusted_time();
        self.registry.updated_block_tip(height);
        self.payments.updated_block_tip(height, now);
        // Enodes keep payment bookkeeping current on every block.
        if self.identity.get().is_some() {
            self.payments.update_last_paid();
        }
        self.registry.do_full_verification_step(now);
    }

    /// Request a shutdown; every loop exits at its next tick.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    /// Whether shutdown was requested.
    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Run the periodic loops until shutdown.
    pub async fn run(self: Arc<Self>) -> anyhow::Result<()> {
        info!("starting enode services");
        let event_rx = self
            .registry_events
            .lock()
            .take()
            .ok_or_else(|| anyhow::anyhow!("services already running"))?;

        let mut tasks = Vec::new();

        // Sync tick.
        {
            let services = Arc::clone(&self);
            tasks.push(tokio::spawn(async move {
                let mut interval =
                    tokio::time::interval(Duration::from_secs(SYNC_TICK_SECONDS as u64));
                while !services.is_shutting_down() {
                    interval.tick().await;
                    services.sync_tick();
                }
            }));
        }

        // Lifecycle checks.
        {
            let services = Arc::clone(&self);
            tasks.push(tokio::spawn(async move {
                let mut interval =
                    tokio::time::interval(Duration::from_secs(CHECK_SECONDS as u64));
                while !services.is_shutting_down() {
                    interval.tick().await;
                    let now = services.chain.adjusted_time();
                    services.registry.check(now);
                    services.registry.process_scheduled_connections();
                }
            }));
        }

        // Housekeeping.
        {
            let services = Arc::clone(&self);
            tasks.push(tokio::spawn(async move {
                let mut interval = tokio::time::interval(Duration::from_secs(HOUSEKEEPING_SECONDS));
                while !services.is_shutting_down() {
                    interval.tick().await;
                    let now = services.chain.adjusted_time();
                    services.registry.check_and_remove(now);
                    services.payments.check_and_remove();
                }
            }));
        }

        // Activation: periodic tick plus self-announce events.
        {
            let services = Arc::clone(&self);
            tasks.push(tokio::task::spawn_blocking(move || {
                loop {
                    if services.is_shutting_down() {
                        break;
                    }
                    let woke_by_event = matches!(
                        event_rx.recv_timeout(Duration::from_secs(ACTIVATION_SECONDS)),
                        Ok(RegistryEvent::SelfAnnounceSeen)
                    );
                    if woke_by_event {
                        debug!("self announce seen; running activation");
                    }
                    let now = services.chain.adjusted_time();
                    services.active.manage_state(now);
                }
            }));
        }

        for task in tasks {
            let _ = task.await;
        }
        info!("enode services stopped");
        Ok(())
    }

    /// One sync scheduling round.
    pub fn sync_tick(&self) {
        let now = self.chain.adjusted_time();
        let peers = self.net.connected_peers();
        let actions = self
            .sync
            .tick(now, self.chain.is_synced(), &peers);
        for action in actions {
            match action {
                SyncAction::AskSporks(peer) => {
                    // Spork distribution is host-owned; asking is just
                    // an empty-payload request under its command.
                    self.net.send(&peer, "getsporks", Vec::new());
                }
                SyncAction::AskList(peer) => self.registry.dseg_update(&peer, now),
                SyncAction::AskWinners(peer) => {
                    self.payments.ask_winners(&peer);
                    // Winners streams leave gaps for old heights.
                    self.payments.request_low_data_payment_blocks(&peer);
                }
            }
        }
    }

    /// Whether the local enode is fully started.
    pub fn is_started(&self) -> bool {
        self.active.status() == ActiveStatus::Started
    }
}
