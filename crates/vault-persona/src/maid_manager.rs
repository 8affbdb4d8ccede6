//! Maid manager persona: guards client accounts and their storage quota.

use std::sync::Arc;

use tracing::{debug, info, warn};
use vault_dht::{AccountName, DataKey, NodeId};

use crate::config::VaultConfig;
use crate::dispatcher::Dispatcher;
use crate::error::{Error, Result};
use crate::messages::{node_for, Delivery, Message, Payload, Persona, PutResult};
use crate::models::{checked_size, MaidAccount, PmidRecord};
use crate::service::{log_outcome, Admission, Disposition, PersonaCore, SenderValidator};
use crate::storage::AccountStore;

/// Serves the Maid accounts this node is a close-group member for.
#[derive(Debug, Clone)]
pub struct MaidManagerService {
    core: Arc<PersonaCore<MaidAccount>>,
}

impl MaidManagerService {
    pub fn new(
        this_node: NodeId,
        config: VaultConfig,
        dispatcher: Arc<dyn Dispatcher>,
        validator: Arc<dyn SenderValidator>,
        store: Option<Arc<AccountStore>>,
    ) -> Self {
        let mut core =
            PersonaCore::new(Persona::MaidManager, this_node, config, dispatcher, validator);
        if let Some(store) = store {
            core = core.with_store(store);
        }
        Self {
            core: Arc::new(core),
        }
    }

    pub fn core(&self) -> &Arc<PersonaCore<MaidAccount>> {
        &self.core
    }

    /// Run `f` with exclusive access to one account.
    pub async fn with_account<R>(
        &self,
        name: &AccountName,
        f: impl FnOnce(&mut MaidAccount) -> R,
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

    async fn handle(&self, delivery: &Delivery) -> Result<()> {
        let message = &delivery.message;
        let name = message.account;
        match &message.payload {
            Payload::CreateAccount => {
                if !self.core.create_account(name).await {
                    debug!(account = %name, "Account already exists");
                }
            }
            Payload::Put { key, size } => self.handle_put(delivery, *key, *size).await?,
            Payload::Delete { key } => self.handle_delete(message, *key).await?,
            Payload::RegisterPmid {
                pmid,
                claimed_available_size,
            } => {
                let claimed_available_size = checked_size(*claimed_available_size)?;
                let record = PmidRecord::new(*pmid, claimed_available_size);
                self.core
                    .with_account(&name, |account| account.register_pmid(record))
                    .await??;
                info!(account = %name, %pmid, "Pmid registered");
                // The Pmid manager group accumulates one copy per Maid manager.
                let create = Message::new(
                    message.message_id,
                    *pmid,
                    Payload::CreatePmidAccount {
                        claimed_available_size,
                    },
                );
                self.core.dispatcher().send(create, node_for(pmid.identity()));
            }
            Payload::UnregisterPmid { pmid } => {
                let removed = self
                    .core
                    .with_account(&name, |account| account.unregister_pmid(pmid))
                    .await?;
                debug!(account = %name, %pmid, removed, "Pmid unregistered");
            }
            Payload::PmidTotals { record } => {
                self.core
                    .with_account(&name, |account| account.update_pmid_totals(*record))
                    .await??;
            }
            other => debug!(kind = %other.kind(), "No Maid manager handler"),
        }
        Ok(())
    }

    async fn handle_put(&self, delivery: &Delivery, key: DataKey, cost: i64) -> Result<()> {
        let message = &delivery.message;
        let name = message.account;
        let cost = checked_size(cost)?;
        let voted = self
            .core
            .with_account(&name, |account| {
                account.check_put(&key, cost)?;
                Ok::<_, Error>(account.vote_put(key, cost))
            })
            .await?;

        let (entry, outcome) = match voted {
            Ok(voted) => voted,
            Err(e @ Error::QuotaExceeded { .. }) => {
                warn!(account = %name, %key, cost, "Put refused before voting");
                let response = Message::new(
                    message.message_id,
                    name,
                    Payload::PutResponse {
                        key,
                        size: cost,
                        result: PutResult::Failed(e.to_string()),
                    },
                );
                self.core.dispatcher().send(response, delivery.sender);
                return Err(e);
            }
            Err(e) => return Err(e),
        };

        log_outcome(&name, &outcome);
        self.core.broadcast_entry(name, &entry).await?;
        let forward = Message::new(message.message_id, name, Payload::Put { key, size: cost });
        self.core.dispatcher().send(forward, node_for(key.identity()));
        Ok(())
    }

    async fn handle_delete(&self, message: &Message, key: DataKey) -> Result<()> {
        let name = message.account;
        let (entry, outcome) = self
            .core
            .with_account(&name, |account| account.vote_delete(key))
            .await??;
        log_outcome(&name, &outcome);
        self.core.broadcast_entry(name, &entry).await?;
        let forward = Message::new(message.message_id, name, Payload::Delete { key });
        self.core.dispatcher().send(forward, node_for(key.identity()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::{ChannelDispatcher, Outbound};
    use crate::messages::Authority;
    use crate::service::DropReason;
    use crate::models::Account;
    use std::time::Duration;
    use tokio::sync::mpsc::UnboundedReceiver;
    use vault_consensus::MessageId;
    use vault_dht::Identity;

    const CLIENT: NodeId = NodeId([0xc0; 32]);
    const ME: NodeId = NodeId([0x01; 32]);

    fn account() -> AccountName {
        AccountName(Identity([0x0a; 32]))
    }

    fn key(seed: u8) -> DataKey {
        DataKey::ImmutableData(Identity([seed; 32]))
    }

    fn service(group_size: usize) -> (MaidManagerService, UnboundedReceiver<Outbound>) {
        let (dispatcher, rx) = ChannelDispatcher::new();
        let config = VaultConfig::from_lookup(|_| None)
            .with_group_size(group_size)
            .with_retention(Duration::from_secs(60));
        let validator = |d: &Delivery, authority: Authority| {
            authority != Authority::Client || d.sender == CLIENT
        };
        let service = MaidManagerService::new(
            ME,
            config,
            Arc::new(dispatcher),
            Arc::new(validator),
            None,
        );
        (service, rx)
    }

    fn from_client(id: u64, payload: Payload) -> Delivery {
        Delivery::new(Message::new(MessageId(id), account(), payload), CLIENT, ME)
    }

    fn drain(rx: &mut UnboundedReceiver<Outbound>) -> Vec<Outbound> {
        std::iter::from_fn(|| rx.try_recv().ok()).collect()
    }

    async fn funded(service: &MaidManagerService, claimed: i64) {
        service
            .process(from_client(1, Payload::CreateAccount))
            .await
            .unwrap();
        service
            .process(from_client(
                2,
                Payload::RegisterPmid {
                    pmid: AccountName(Identity([0x50; 32])),
                    claimed_available_size: claimed,
                },
            ))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn put_within_quota_is_merged_and_forwarded() {
        let (service, mut rx) = service(1);
        funded(&service, 1000).await;
        drain(&mut rx);

        let disposition = service
            .process(from_client(3, Payload::Put { key: key(1), size: 400 }))
            .await
            .unwrap();
        assert_eq!(disposition, Disposition::Handled);

        let consumed = service
            .with_account(&account(), |a| a.consumed())
            .await
            .unwrap();
        assert_eq!(consumed, 400);

        let sent = drain(&mut rx);
        assert!(sent.iter().any(|o| o.destination == node_for(key(1).identity())
            && matches!(o.message.payload, Payload::Put { size: 400, .. })));
    }

    #[tokio::test]
    async fn put_over_quota_gets_failure_response() {
        let (service, mut rx) = service(1);
        funded(&service, 100).await;
        drain(&mut rx);

        let err = service
            .process(from_client(3, Payload::Put { key: key(1), size: 150 }))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::QuotaExceeded { .. }));

        let sent = drain(&mut rx);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].destination, CLIENT);
        assert!(matches!(
            sent[0].message.payload,
            Payload::PutResponse {
                result: PutResult::Failed(_),
                ..
            }
        ));
        let pending = service
            .with_account(&account(), |a| a.sync().pending_len())
            .await
            .unwrap();
        assert_eq!(pending, 0);
    }

    #[tokio::test]
    async fn register_pmid_asks_pmid_managers_to_create_account() {
        let (service, mut rx) = service(1);
        funded(&service, 500).await;
        let sent = drain(&mut rx);
        let pmid = AccountName(Identity([0x50; 32]));
        assert!(sent.iter().any(|o| o.message.account == pmid
            && o.message.payload
                == Payload::CreatePmidAccount {
                    claimed_available_size: 500
                }
            && o.destination == node_for(pmid.identity())));
        let claimed = service
            .with_account(&account(), |a| a.claimed())
            .await
            .unwrap();
        assert_eq!(claimed, 500);
    }

    #[tokio::test]
    async fn negative_cost_is_rejected() {
        let (service, mut rx) = service(1);
        funded(&service, 100).await;
        drain(&mut rx);

        let err = service
            .process(from_client(3, Payload::Put { key: key(1), size: -1_000_000 }))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidSize(-1_000_000)));
        assert!(drain(&mut rx).is_empty());

        // The refused put leaves the full quota in place.
        let (consumed, claimed) = service
            .with_account(&account(), |a| (a.consumed(), a.claimed()))
            .await
            .unwrap();
        assert_eq!((consumed, claimed), (0, 100));
        let err = service
            .process(from_client(4, Payload::Put { key: key(2), size: 101 }))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::QuotaExceeded { .. }));
    }

    #[tokio::test]
    async fn oversized_cost_exceeds_quota() {
        let (service, mut rx) = service(1);
        funded(&service, 100).await;
        service
            .process(from_client(3, Payload::Put { key: key(1), size: 50 }))
            .await
            .unwrap();
        drain(&mut rx);

        let err = service
            .process(from_client(4, Payload::Put { key: key(2), size: i64::MAX }))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::QuotaExceeded {
                requested: i64::MAX,
                available: 50
            }
        ));
        let consumed = service
            .with_account(&account(), |a| a.consumed())
            .await
            .unwrap();
        assert_eq!(consumed, 50);
    }

    #[tokio::test]
    async fn negative_pmid_capacity_is_rejected() {
        let (service, mut rx) = service(1);
        service
            .process(from_client(1, Payload::CreateAccount))
            .await
            .unwrap();
        let err = service
            .process(from_client(
                2,
                Payload::RegisterPmid {
                    pmid: AccountName(Identity([0x50; 32])),
                    claimed_available_size: -5,
                },
            ))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidSize(-5)));
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn delete_of_unknown_record_fails() {
        let (service, _rx) = service(1);
        funded(&service, 500).await;
        let err = service
            .process(from_client(3, Payload::Delete { key: key(9) }))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NoSuchRecord(_)));
    }

    #[tokio::test]
    async fn invalid_sender_never_reaches_accumulator() {
        let (service, _rx) = service(1);
        let forged = Delivery::new(
            Message::new(MessageId(1), account(), Payload::CreateAccount),
            NodeId([0xee; 32]),
            ME,
        );
        assert_eq!(
            service.process(forged).await.unwrap(),
            Disposition::Dropped(DropReason::InvalidSender)
        );
        // The genuine request with the same id still goes through.
        assert_eq!(
            service
                .process(from_client(1, Payload::CreateAccount))
                .await
                .unwrap(),
            Disposition::Handled
        );
    }

    #[tokio::test]
    async fn duplicate_request_is_absorbed() {
        let (service, _rx) = service(1);
        let first = service.process(from_client(1, Payload::CreateAccount)).await;
        let second = service.process(from_client(1, Payload::CreateAccount)).await;
        assert_eq!(first.unwrap(), Disposition::Handled);
        assert_eq!(second.unwrap(), Disposition::Absorbed);
    }

    #[tokio::test]
    async fn pmid_only_kinds_are_unsupported() {
        let (service, _rx) = service(1);
        assert_eq!(
            service
                .process(from_client(1, Payload::GetPmidAccount))
                .await
                .unwrap(),
            Disposition::Dropped(DropReason::Unsupported)
        );
    }

    #[tokio::test]
    async fn totals_update_needs_pmid_manager_majority() {
        let (service, _rx) = service(3);
        funded(&service, 100).await;
        let pmid = AccountName(Identity([0x50; 32]));
        let update = |sender: u8| {
            Delivery::new(
                Message::new(
                    MessageId(77),
                    account(),
                    Payload::PmidTotals {
                        record: PmidRecord::new(pmid, 900),
                    },
                ),
                NodeId([sender; 32]),
                ME,
            )
        };
        assert_eq!(service.process(update(0x61)).await.unwrap(), Disposition::Absorbed);
        assert_eq!(service.process(update(0x62)).await.unwrap(), Disposition::Handled);
        let claimed = service
            .with_account(&account(), |a| a.claimed())
            .await
            .unwrap();
        assert_eq!(claimed, 900);
    }
}
