//! Pmid manager persona: tracks what each Pmid node stores.

use std::sync::Arc;

use serde_bytes::ByteBuf;
use tracing::{debug, warn};
use vault_consensus::MessageId;
use vault_dht::{AccountName, DataKey, NodeId};

use crate::config::VaultConfig;
use crate::dispatcher::Dispatcher;
use crate::error::{Error, Result};
use crate::messages::{node_for, Delivery, Message, Payload, Persona, PutResult};
use crate::models::{checked_size, PmidAccount};
use crate::service::{log_outcome, Admission, Disposition, PersonaCore, SenderValidator};
use crate::storage::AccountStore;

/// Serves the Pmid accounts this node is a close-group member for.
#[derive(Debug, Clone)]
pub struct PmidManagerService {
    core: Arc<PersonaCore<PmidAccount>>,
}

impl PmidManagerService {
    pub fn new(
        this_node: NodeId,
        config: VaultConfig,
        dispatcher: Arc<dyn Dispatcher>,
        validator: Arc<dyn SenderValidator>,
        store: Option<Arc<AccountStore>>,
    ) -> Self {
        let mut core =
            PersonaCore::new(Persona::PmidManager, this_node, config, dispatcher, validator);
        if let Some(store) = store {
            core = core.with_store(store);
        }
        Self {
            core: Arc::new(core),
        }
    }

    pub fn core(&self) -> &Arc<PersonaCore<PmidAccount>> {
        &self.core
    }

    /// Run `f` with exclusive access to one account.
    pub async fn with_account<R>(
        &self,
        name: &AccountName,
        f: impl FnOnce(&mut PmidAccount) -> R,
    ) -> Result<R> {
        self.core.with_account(name, f).await
    }

    pub async fn on_close_group_changed(&self, old: &[NodeId], new: &[NodeId]) -> Result<()> {
        self.core.on_close_group_changed(old, new).await
    }

    /// Process one inbound delivery.
    pub async fn process(&self, delivery: Delivery) -> Result<Disposition> {
        if let Admission::Done(disposition) = self.core.admit(&delivery).await? {
            return Ok(disposition);
        }
        if !self.core.handle_common(&delivery).await? {
            self.handle(&delivery).await?;
        }
        Ok(Disposition::Handled)
    }

    /// Report a Pmid node's totals to the Maid managers of `owner`.
    ///
    /// Every Pmid manager replica must use the same `message_id` so the
    /// receiving group can accumulate the copies.
    pub async fn report_totals(
        &self,
        message_id: MessageId,
        pmid: &AccountName,
        owner: AccountName,
    ) -> Result<()> {
        let record = self.core.with_account(pmid, |account| account.record()).await?;
        let message = Message::new(message_id, owner, Payload::PmidTotals { record });
        self.core.dispatcher().send(message, node_for(owner.identity()));
        Ok(())
    }

    async fn handle(&self, delivery: &Delivery) -> Result<()> {
        let message = &delivery.message;
        let name = message.account;
        let pmid_node = node_for(name.identity());
        match &message.payload {
            Payload::CreateAccount => {
                if !self.core.create_account(name).await {
                    debug!(account = %name, "Account already exists");
                }
            }
            Payload::CreatePmidAccount {
                claimed_available_size,
            } => {
                let size = checked_size(*claimed_available_size)?;
                self.core.create_account(name).await;
                self.core
                    .with_account(&name, |account| account.set_claimed_available_size(size))
                    .await?;
                debug!(account = %name, claimed = size, "Pmid account ready");
            }
            Payload::Put { key, size } => {
                checked_size(*size)?;
                if !self.core.has_account(&name).await {
                    return Err(Error::NoSuchAccount(name));
                }
                // Stored only once the Pmid node confirms.
                let forward = Message::new(
                    message.message_id,
                    name,
                    Payload::Put {
                        key: *key,
                        size: *size,
                    },
                );
                self.core.dispatcher().send(forward, pmid_node);
            }
            Payload::PutResponse { key, size, result } => {
                self.handle_put_response(message, *key, *size, result).await?
            }
            Payload::Delete { key } => {
                let (entry, outcome) = self
                    .core
                    .with_account(&name, |account| account.vote_delete(*key))
                    .await?;
                log_outcome(&name, &outcome);
                self.core.broadcast_entry(name, &entry).await?;
                let forward = Message::new(message.message_id, name, Payload::Delete { key: *key });
                self.core.dispatcher().send(forward, pmid_node);
            }
            Payload::GetPmidAccount => {
                let elements = self
                    .core
                    .with_account(&name, |account| account.elements().serialise())
                    .await??;
                let response = Message::new(
                    message.message_id,
                    name,
                    Payload::GetPmidAccountResponse {
                        elements: ByteBuf::from(elements),
                    },
                );
                self.core.dispatcher().send(response, delivery.sender);
            }
            other => debug!(kind = %other.kind(), "No Pmid manager handler"),
        }
        Ok(())
    }

    async fn handle_put_response(
        &self,
        message: &Message,
        key: DataKey,
        size: i64,
        result: &PutResult,
    ) -> Result<()> {
        let name = message.account;
        let size = checked_size(size)?;
        match result {
            PutResult::Stored => {
                let (entry, outcome) = self
                    .core
                    .with_account(&name, |account| account.vote_put(key, size))
                    .await?;
                log_outcome(&name, &outcome);
                self.core.broadcast_entry(name, &entry).await?;
            }
            PutResult::Failed(reason) => {
                warn!(account = %name, %key, %reason, "Pmid node failed to store element");
                let response = Message::new(
                    message.message_id,
                    name,
                    Payload::PutResponse {
                        key,
                        size,
                        result: result.clone(),
                    },
                );
                self.core.dispatcher().send(response, node_for(key.identity()));
            }
        }
        Ok(())
    }
}
