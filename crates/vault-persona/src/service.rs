//! Shared persona machinery.
//!
//! Every inbound delivery runs the same pipeline:
//!
//! ```text
//! Received ─► SenderValidated ─► QuorumCheck ─┬─► Dropped
//!                                             ├─► Absorbed
//!                                             └─► Handled
//! ```
//!
//! [`PersonaCore`] owns the stages up to the quorum check and everything
//! that does not depend on the persona: the account map, synchronisation,
//! account transfer, churn, archival and stale-state eviction. The Maid and
//! Pmid services add their own handlers on top.
//!
//! # Locking
//!
//! Each account sits behind its own mutex and is only reachable through
//! [`PersonaCore::with_account`], which holds that mutex for the closure and
//! nothing else. The account map and the accumulator have separate locks, so
//! unrelated accounts are processed in parallel.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use serde_bytes::ByteBuf;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};
use vault_consensus::{Accumulator, AddResult, MessageId};
use vault_dht::{AccountName, CloseGroup, NodeId};
use vault_sync::{MergePolicy, SyncOutcome, UnresolvedEntry};

use crate::config::VaultConfig;
use crate::dispatcher::Dispatcher;
use crate::error::{Error, Result};
use crate::messages::{Authority, Delivery, Message, Payload, Persona};
use crate::models::{Account, SyncSettings};
use crate::storage::AccountStore;

/// Value voted on by an account type.
pub type ValueOf<A> = <<A as Account>::Policy as MergePolicy>::Value;

/// Decides whether a sender may act with the given authority.
///
/// Signature checks live behind this predicate.
pub trait SenderValidator: Send + Sync + 'static {
    fn is_valid(&self, delivery: &Delivery, authority: Authority) -> bool;
}

impl<F> SenderValidator for F
where
    F: Fn(&Delivery, Authority) -> bool + Send + Sync + 'static,
{
    fn is_valid(&self, delivery: &Delivery, authority: Authority) -> bool {
        self(delivery, authority)
    }
}

/// Why a delivery was dropped before reaching a handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Addressed to another node.
    Misrouted,
    /// Kind not accepted by this persona.
    Unsupported,
    /// Sender failed validation for the kind's authority.
    InvalidSender,
}

/// Final state of an inbound delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Dropped(DropReason),
    /// Recorded as a vote; nothing else to do yet.
    Absorbed,
    Handled,
}

/// Outcome of the shared pipeline stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Quorum reached: run the persona handler.
    Proceed,
    Done(Disposition),
}

/// What one maintenance sweep removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EvictionReport {
    pub requests: usize,
    pub entries: usize,
}

/// Account state and request pipeline shared by every persona.
pub struct PersonaCore<A: Account> {
    persona: Persona,
    this_node: NodeId,
    config: VaultConfig,
    accumulator: Mutex<Accumulator>,
    accounts: RwLock<HashMap<AccountName, Arc<Mutex<A>>>>,
    members: RwLock<Vec<NodeId>>,
    dispatcher: Arc<dyn Dispatcher>,
    validator: Arc<dyn SenderValidator>,
    store: Option<Arc<AccountStore>>,
    next_message_id: AtomicU64,
}

impl<A: Account> std::fmt::Debug for PersonaCore<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersonaCore")
            .field("persona", &self.persona)
            .field("this_node", &self.this_node)
            .finish_non_exhaustive()
    }
}

impl<A: Account> PersonaCore<A> {
    pub fn new(
        persona: Persona,
        this_node: NodeId,
        config: VaultConfig,
        dispatcher: Arc<dyn Dispatcher>,
        validator: Arc<dyn SenderValidator>,
    ) -> Self {
        let table = persona.quorum_table(config.group_size);
        let accumulator = Accumulator::new(table, config.accumulator());
        // Distinct starting points keep ids from different nodes apart.
        let seed = vault_dht::hash_identity(&this_node.0);
        let mut first = [0u8; 8];
        first.copy_from_slice(&seed.as_bytes()[..8]);

        Self {
            persona,
            this_node,
            config,
            accumulator: Mutex::new(accumulator),
            accounts: RwLock::new(HashMap::new()),
            members: RwLock::new(Vec::new()),
            dispatcher,
            validator,
            store: None,
            next_message_id: AtomicU64::new(u64::from_le_bytes(first)),
        }
    }

    /// Archive accounts to `store` when this node leaves their close group.
    pub fn with_store(mut self, store: Arc<AccountStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn persona(&self) -> Persona {
        self.persona
    }

    pub fn this_node(&self) -> NodeId {
        self.this_node
    }

    pub fn config(&self) -> &VaultConfig {
        &self.config
    }

    pub fn settings(&self) -> SyncSettings {
        self.config.sync_settings()
    }

    pub(crate) fn dispatcher(&self) -> &dyn Dispatcher {
        self.dispatcher.as_ref()
    }

    pub fn next_message_id(&self) -> MessageId {
        MessageId(self.next_message_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Replace the known network membership without churn handling.
    pub async fn set_members(&self, members: Vec<NodeId>) {
        *self.members.write().await = members;
    }

    /// Close group of `name` as this node currently sees it.
    pub async fn close_group(&self, name: &AccountName) -> CloseGroup {
        let members = self.members.read().await;
        self.group_of(name, &members)
    }

    fn group_of(&self, name: &AccountName, members: &[NodeId]) -> CloseGroup {
        let candidates = members.iter().copied().chain(std::iter::once(self.this_node));
        CloseGroup::compute(*name.identity(), candidates, self.config.group_size)
    }

    // --- Pipeline ---

    /// Run the shared stages: routing, sender validation and the quorum check.
    pub async fn admit(&self, delivery: &Delivery) -> Result<Admission> {
        let message = &delivery.message;
        let kind = message.kind();

        if delivery.receiver != self.this_node {
            debug!(%kind, receiver = %delivery.receiver, "Dropping misrouted message");
            return Ok(Admission::Done(Disposition::Dropped(DropReason::Misrouted)));
        }

        let Some(route) = self.persona.route(kind) else {
            debug!(persona = %self.persona, %kind, "Dropping unsupported message");
            return Ok(Admission::Done(Disposition::Dropped(DropReason::Unsupported)));
        };

        if !self.validator.is_valid(delivery, route.sender) {
            warn!(%kind, sender = %delivery.sender, "Dropping message from invalid sender");
            return Ok(Admission::Done(Disposition::Dropped(
                DropReason::InvalidSender,
            )));
        }

        let content = bincode::serialize(&message.payload)?;
        let result = {
            let mut accumulator = self.accumulator.lock().await;
            accumulator.add_request(message.request_key(), delivery.sender, &content)
        };

        match result {
            Ok(AddResult::QuorumReached { votes }) => {
                trace!(key = %message.request_key(), votes, "Quorum reached");
                Ok(Admission::Proceed)
            }
            Ok(AddResult::Pending { .. }) | Ok(AddResult::DuplicateIgnored) => {
                Ok(Admission::Done(Disposition::Absorbed))
            }
            Err(e) => {
                warn!(error = %e, "Rejected conflicting vote");
                Err(e.into())
            }
        }
    }

    // --- Accounts ---

    /// Run `f` with exclusive access to one account.
    pub async fn with_account<R>(
        &self,
        name: &AccountName,
        f: impl FnOnce(&mut A) -> R,
    ) -> Result<R> {
        let account = self
            .accounts
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or(Error::NoSuchAccount(*name))?;
        let mut guard = account.lock().await;
        Ok(f(&mut *guard))
    }

    /// Create an empty account. Returns false if it already exists.
    pub async fn create_account(&self, name: AccountName) -> bool {
        let mut accounts = self.accounts.write().await;
        if accounts.contains_key(&name) {
            return false;
        }
        let account = A::create(name, self.this_node, self.settings());
        accounts.insert(name, Arc::new(Mutex::new(account)));
        info!(persona = %self.persona, account = %name, "Account created");
        true
    }

    pub async fn has_account(&self, name: &AccountName) -> bool {
        self.accounts.read().await.contains_key(name)
    }

    pub async fn account_names(&self) -> Vec<AccountName> {
        let mut names: Vec<_> = self.accounts.read().await.keys().copied().collect();
        names.sort();
        names
    }

    async fn take_account(&self, name: &AccountName) -> Option<Arc<Mutex<A>>> {
        self.accounts.write().await.remove(name)
    }

    // --- Synchronisation ---

    /// Send this node's vote to the rest of the account's close group.
    pub async fn broadcast_entry(
        &self,
        name: AccountName,
        entry: &UnresolvedEntry<ValueOf<A>>,
    ) -> Result<()> {
        let bytes = ByteBuf::from(entry.serialise()?);
        let group = self.close_group(&name).await;
        for peer in group.peers_of(&self.this_node) {
            let message = Message::new(
                self.next_message_id(),
                name,
                Payload::Synchronise {
                    entry: bytes.clone(),
                },
            );
            self.dispatcher.send(message, *peer);
        }
        Ok(())
    }

    /// Fold a peer's serialised entry into the account.
    pub async fn synchronise(&self, name: &AccountName, entry: &[u8]) -> Result<()> {
        let entry = UnresolvedEntry::<ValueOf<A>>::parse(entry)?;
        let outcome = self
            .with_account(name, |account| account.sync_mut().add_unresolved_entry(entry))
            .await?;
        log_outcome(name, &outcome);
        Ok(())
    }

    /// Pending entries this node voted on, per account.
    pub async fn unresolved_for_sync(
        &self,
    ) -> Vec<(AccountName, Vec<UnresolvedEntry<ValueOf<A>>>)> {
        let mut unresolved = Vec::new();
        for name in self.account_names().await {
            if let Ok(entries) = self
                .with_account(&name, |account| account.sync().local_unresolved_data())
                .await
            {
                if !entries.is_empty() {
                    unresolved.push((name, entries));
                }
            }
        }
        unresolved
    }

    /// Re-broadcast every pending local vote. Returns entries sent.
    pub async fn broadcast_unresolved(&self) -> Result<usize> {
        let mut sent = 0;
        for (name, entries) in self.unresolved_for_sync().await {
            for entry in &entries {
                self.broadcast_entry(name, entry).await?;
                sent += 1;
            }
        }
        Ok(sent)
    }

    // --- Transfer and churn ---

    /// Create or merge an account from a transfer.
    pub async fn receive_transfer(&self, name: AccountName, bytes: &[u8]) -> Result<()> {
        self.create_account(name).await;
        let report = self
            .with_account(&name, |account| account.apply_transfer(bytes))
            .await??;
        info!(
            account = %name,
            records = report.records,
            replayed = report.replayed,
            resolved = report.resolved,
            "Account transfer applied"
        );
        Ok(())
    }

    /// React to a membership change.
    ///
    /// For every held account whose close group changed: departed replicas'
    /// votes move to the replicas that replaced them, joiners receive the
    /// account, and accounts this node no longer serves are archived and
    /// dropped.
    pub async fn on_close_group_changed(&self, old: &[NodeId], new: &[NodeId]) -> Result<()> {
        *self.members.write().await = new.to_vec();

        for name in self.account_names().await {
            let before = self.group_of(&name, old);
            let after = self.group_of(&name, new);
            let diff = before.diff(&after);
            if diff.is_empty() {
                continue;
            }

            if !after.contains(&self.this_node) {
                info!(account = %name, "No longer in close group, archiving account");
                self.archive_account(&name).await?;
                continue;
            }

            let replacements: Vec<_> = diff.replacements().collect();
            let snapshot = self
                .with_account(&name, |account| {
                    for (left, joined) in &replacements {
                        account.sync_mut().replace_node(left, *joined);
                    }
                    account.serialise()
                })
                .await??;

            let snapshot = ByteBuf::from(snapshot);
            for joiner in &diff.joined {
                debug!(account = %name, %joiner, "Sending account transfer");
                let message = Message::new(
                    self.next_message_id(),
                    name,
                    Payload::AccountTransfer {
                        account: snapshot.clone(),
                    },
                );
                self.dispatcher.send(message, *joiner);
            }
        }
        Ok(())
    }

    async fn archive_account(&self, name: &AccountName) -> Result<()> {
        let Some(account) = self.take_account(name).await else {
            return Ok(());
        };
        let bytes = account.lock().await.serialise()?;
        match &self.store {
            Some(store) => store.archive(A::PREFIX, name, &bytes)?,
            None => warn!(account = %name, "No account store, dropping account"),
        }
        Ok(())
    }

    /// Load every archived account. Corrupt archives are skipped.
    pub async fn restore_archived(&self) -> Result<usize> {
        let Some(store) = &self.store else {
            return Ok(0);
        };
        let mut restored = 0;
        for (name, bytes) in store.load_all(A::PREFIX)? {
            match A::parse(name, self.this_node, self.settings(), &bytes) {
                Ok(account) => {
                    self.accounts
                        .write()
                        .await
                        .insert(name, Arc::new(Mutex::new(account)));
                    store.remove(A::PREFIX, &name)?;
                    restored += 1;
                }
                Err(e) => warn!(account = %name, error = %e, "Skipping corrupt archived account"),
            }
        }
        if restored > 0 {
            info!(persona = %self.persona, restored, "Restored archived accounts");
        }
        Ok(restored)
    }

    // --- Maintenance ---

    /// Drop requests and entries that never reached quorum.
    pub async fn evict_stale(&self, now: Instant) -> EvictionReport {
        let requests = self.accumulator.lock().await.evict_stale(now);
        let mut entries = 0;
        for name in self.account_names().await {
            entries += self
                .with_account(&name, |account| account.sync_mut().evict_stale(now))
                .await
                .unwrap_or(0);
        }
        if requests + entries > 0 {
            debug!(requests, entries, "Evicted stale state");
        }
        EvictionReport { requests, entries }
    }

    /// Run [`evict_stale`](Self::evict_stale) every maintenance interval.
    pub fn spawn_maintenance(self: &Arc<Self>) -> JoinHandle<()> {
        let core = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(core.config.maintenance_interval);
            loop {
                interval.tick().await;
                core.evict_stale(Instant::now()).await;
            }
        })
    }

    /// Handlers every persona shares. Returns false for kinds left to the
    /// persona.
    pub async fn handle_common(&self, delivery: &Delivery) -> Result<bool> {
        let message = &delivery.message;
        match &message.payload {
            Payload::Synchronise { entry } => self.synchronise(&message.account, entry).await?,
            Payload::AccountTransfer { account } => {
                self.receive_transfer(message.account, account).await?
            }
            Payload::ChurnNotification { old, new } => self.on_close_group_changed(old, new).await?,
            _ => return Ok(false),
        }
        Ok(true)
    }
}

pub(crate) fn log_outcome<V, O, E>(name: &AccountName, outcome: &SyncOutcome<V, O, E>)
where
    V: std::fmt::Debug,
    O: std::fmt::Debug,
    E: std::fmt::Display,
{
    match outcome {
        SyncOutcome::Pending { votes, required } => {
            trace!(account = %name, votes, required, "Entry pending")
        }
        SyncOutcome::Resolved { value, outcome } => {
            debug!(account = %name, ?value, ?outcome, "Entry merged")
        }
        SyncOutcome::Rejected { value, error } => {
            warn!(account = %name, ?value, error = %error, "Entry rejected")
        }
    }
}
