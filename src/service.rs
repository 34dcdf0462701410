//! Thread-safe registry handle shared by the CLI, the API and hosts.
//!
//! All mutations go through one write lock, so they are totally ordered.
//! Under the lock an operation is planned against the current ledger, its
//! [`StateDelta`] is saved, and only then applied in memory. Readers never
//! see a half-applied operation and a failed save changes nothing. The work
//! per operation is bounded by the name's ancestor chain.
//!
//! Withdrawals release the lock before calling the host. By then the
//! balance has already been zeroed and saved, so a host that calls back into
//! the registry during the transfer sees the post-withdrawal state.
//!
//! A refused transfer is always re-credited in memory. If that re-credit
//! cannot be saved, its delta stays queued and is written ahead of the next
//! save (or by [`Registry::flush`]).

use crate::amount::Amount;
use crate::crypto::Principal;
use crate::error::{RegistryError, Result};
use crate::events::{DomainRegistered, EventFilter};
use crate::host::{CallContext, Host, Operation, SignedCall};
use crate::ledger::{PendingTransfer, RewardLedger, DEFAULT_REWARD_BPS};
use crate::name::DomainName;
use crate::persistence::{InMemoryPersistence, Persistence};
use crate::registry::Registration;
use crate::state::{LedgerSnapshot, StateDelta};
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

const EVENT_CHANNEL_CAPACITY: usize = 1024;

#[derive(Default)]
struct Shared {
    ledger: RewardLedger,
    /// Applied in memory but not yet saved
    unsaved: Vec<StateDelta>,
}

#[derive(Clone)]
pub struct Registry {
    state: Arc<RwLock<Shared>>,
    persistence: Arc<dyn Persistence>,
    events_tx: broadcast::Sender<DomainRegistered>,
}

impl Registry {
    /// Open a registry over `persistence`, restoring any saved state.
    pub fn open(persistence: Arc<dyn Persistence>) -> Result<Self> {
        let ledger = match persistence.load_snapshot()? {
            Some(snapshot) => {
                let ledger = RewardLedger::from_snapshot(snapshot)?;
                info!(domains = ledger.domain_count(), "restored registry state");
                ledger
            }
            None => RewardLedger::new(),
        };

        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Ok(Registry {
            state: Arc::new(RwLock::new(Shared {
                ledger,
                unsaved: Vec::new(),
            })),
            persistence,
            events_tx,
        })
    }

    /// A registry that keeps its state in memory only.
    pub fn in_memory() -> Self {
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Registry {
            state: Arc::new(RwLock::new(Shared::default())),
            persistence: Arc::new(InMemoryPersistence::new()),
            events_tx,
        }
    }

    /// Plan an operation, save its delta behind any still-unsaved ones, then
    /// apply it. `nonce` is consumed in the same delta.
    fn commit<T>(
        &self,
        nonce: Option<(Principal, u64)>,
        plan: impl FnOnce(&RewardLedger) -> Result<(T, StateDelta)>,
    ) -> Result<T> {
        let mut guard = self.state.write();
        let shared = &mut *guard;

        if let Some((caller, nonce)) = nonce {
            shared.ledger.check_nonce(&caller, nonce)?;
        }
        let (out, mut delta) = plan(&shared.ledger)?;
        delta.nonce = nonce;

        shared.unsaved.push(delta);
        let saved = self.persistence.save_deltas(&shared.unsaved);
        let delta = shared.unsaved.pop();
        saved?;
        shared.unsaved.clear();
        if let Some(delta) = delta {
            shared.ledger.apply_delta(&delta);
        }
        Ok(out)
    }

    // ------------------------------------------------------------------
    // Mutations
    // ------------------------------------------------------------------

    pub fn configure(&self, initial_price: Amount, administrator: Principal) -> Result<()> {
        self.configure_with_reward(initial_price, administrator, DEFAULT_REWARD_BPS)
    }

    pub fn configure_with_reward(
        &self,
        initial_price: Amount,
        administrator: Principal,
        reward_bps: u32,
    ) -> Result<()> {
        self.commit(None, |ledger| {
            Ok(((), ledger.plan_configure(initial_price, administrator, reward_bps)?))
        })
    }

    /// Replace an empty, unconfigured registry with imported state, e.g. the
    /// output of [`crate::state::migrate_v1`].
    pub fn import_snapshot(&self, snapshot: LedgerSnapshot) -> Result<()> {
        let mut guard = self.state.write();
        if guard.ledger.is_configured() || guard.ledger.domain_count() > 0 {
            return Err(RegistryError::AlreadyConfigured);
        }
        let imported = RewardLedger::from_snapshot(snapshot.clone())?;
        self.persistence.save_snapshot(&snapshot)?;
        info!(domains = imported.domain_count(), "imported registry state");
        guard.ledger = imported;
        guard.unsaved.clear();
        Ok(())
    }

    pub fn purchase(
        &self,
        ctx: &CallContext,
        name: &DomainName,
        beneficiary: Principal,
    ) -> Result<DomainRegistered> {
        self.purchase_inner(None, ctx, name, beneficiary)
    }

    fn purchase_inner(
        &self,
        nonce: Option<(Principal, u64)>,
        ctx: &CallContext,
        name: &DomainName,
        beneficiary: Principal,
    ) -> Result<DomainRegistered> {
        let event = self.commit(nonce, |ledger| ledger.plan_purchase(ctx, name, beneficiary))?;
        // Having no live subscribers is fine; the event is already in the log.
        let _ = self.events_tx.send(event.clone());
        Ok(event)
    }

    pub fn update_price(&self, caller: &Principal, new_price: Amount) -> Result<()> {
        self.commit(None, |ledger| Ok(((), ledger.plan_update_price(caller, new_price)?)))
    }

    pub fn withdraw_domain_reward(
        &self,
        caller: &Principal,
        name: &DomainName,
        host: &dyn Host,
    ) -> Result<Amount> {
        let pending = self.commit(None, |ledger| ledger.plan_domain_withdrawal(caller, name))?;
        self.settle(pending, host)
    }

    pub fn withdraw_protocol(&self, caller: &Principal, host: &dyn Host) -> Result<Amount> {
        let pending = self.commit(None, |ledger| ledger.plan_protocol_withdrawal(caller))?;
        self.settle(pending, host)
    }

    // ------------------------------------------------------------------
    // Signed calls
    //
    // The caller is the signer, the signature must name this exact
    // operation, and the nonce is consumed together with the operation.
    // ------------------------------------------------------------------

    pub fn purchase_signed(
        &self,
        call: &SignedCall,
        name: &DomainName,
        beneficiary: Principal,
    ) -> Result<DomainRegistered> {
        let ctx = call.verify_for(&Operation::Purchase {
            name: name.clone(),
            beneficiary,
        })?;
        self.purchase_inner(Some((ctx.caller, call.nonce)), &ctx, name, beneficiary)
    }

    pub fn update_price_signed(&self, call: &SignedCall, new_price: Amount) -> Result<()> {
        let ctx = call.verify_for(&Operation::UpdatePrice { price: new_price })?;
        self.commit(Some((ctx.caller, call.nonce)), |ledger| {
            Ok(((), ledger.plan_update_price(&ctx.caller, new_price)?))
        })
    }

    pub fn withdraw_domain_reward_signed(
        &self,
        call: &SignedCall,
        name: &DomainName,
        host: &dyn Host,
    ) -> Result<Amount> {
        let ctx = call.verify_for(&Operation::WithdrawReward { name: name.clone() })?;
        let pending = self.commit(Some((ctx.caller, call.nonce)), |ledger| {
            ledger.plan_domain_withdrawal(&ctx.caller, name)
        })?;
        self.settle(pending, host)
    }

    pub fn withdraw_protocol_signed(&self, call: &SignedCall, host: &dyn Host) -> Result<Amount> {
        let ctx = call.verify_for(&Operation::WithdrawProtocol)?;
        let pending = self.commit(Some((ctx.caller, call.nonce)), |ledger| {
            ledger.plan_protocol_withdrawal(&ctx.caller)
        })?;
        self.settle(pending, host)
    }

    /// The nonce `caller` should sign its next call with.
    pub fn next_nonce(&self, caller: &Principal) -> u64 {
        self.state.read().ledger.last_nonce(caller).saturating_add(1)
    }

    // ------------------------------------------------------------------
    // Settlement
    // ------------------------------------------------------------------

    /// Called with no lock held.
    fn settle(&self, pending: PendingTransfer, host: &dyn Host) -> Result<Amount> {
        match host.transfer_out(&pending.recipient, pending.amount) {
            Ok(()) => {
                info!(
                    recipient = %pending.recipient,
                    amount = pending.amount,
                    source = ?pending.source,
                    "withdrawal settled"
                );
                Ok(pending.amount)
            }
            Err(e) => {
                warn!(
                    recipient = %pending.recipient,
                    amount = pending.amount,
                    error = %e,
                    "transfer failed, restoring balance"
                );
                match self.restore(&pending) {
                    Ok(()) => Err(e),
                    Err(save_err) => {
                        error!(
                            recipient = %pending.recipient,
                            amount = pending.amount,
                            error = %save_err,
                            "restored balance could not be saved, queued for the next save"
                        );
                        Err(RegistryError::RefundNotPersisted {
                            transfer: e.to_string(),
                            persistence: save_err.to_string(),
                        })
                    }
                }
            }
        }
    }

    /// Re-credit a refused transfer. The in-memory balance is restored even
    /// when the save fails; the delta then stays queued.
    fn restore(&self, pending: &PendingTransfer) -> Result<()> {
        let mut guard = self.state.write();
        let shared = &mut *guard;
        let delta = shared.ledger.plan_revert(pending)?;
        shared.ledger.apply_delta(&delta);
        shared.unsaved.push(delta);
        self.persistence.save_deltas(&shared.unsaved)?;
        shared.unsaved.clear();
        Ok(())
    }

    /// Save any changes left queued by an earlier failed save.
    pub fn flush(&self) -> Result<()> {
        let mut guard = self.state.write();
        if guard.unsaved.is_empty() {
            return Ok(());
        }
        self.persistence.save_deltas(&guard.unsaved)?;
        info!(deltas = guard.unsaved.len(), "flushed queued changes");
        guard.unsaved.clear();
        Ok(())
    }

    pub fn has_unsaved_changes(&self) -> bool {
        !self.state.read().unsaved.is_empty()
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub fn domain_owner_balance(&self, name: &DomainName) -> Amount {
        self.state.read().ledger.domain_owner_balance(name)
    }

    pub fn protocol_balance(&self, caller: &Principal) -> Result<Amount> {
        self.state.read().ledger.protocol_balance(caller)
    }

    pub fn contract_balance(&self, caller: &Principal) -> Result<Amount> {
        self.state.read().ledger.contract_balance(caller)
    }

    pub fn domain_count(&self) -> u64 {
        self.state.read().ledger.domain_count()
    }

    pub fn price(&self) -> Result<Amount> {
        self.state.read().ledger.price()
    }

    pub fn administrator(&self) -> Result<Principal> {
        self.state.read().ledger.administrator()
    }

    pub fn owner_of(&self, name: &DomainName) -> Result<Principal> {
        self.state.read().ledger.owner_of(name)
    }

    pub fn registration(&self, name: &DomainName) -> Result<Registration> {
        self.state.read().ledger.registration(name)
    }

    pub fn registration_at(&self, index: usize) -> Result<Registration> {
        self.state.read().ledger.registration_at(index)
    }

    pub fn names_owned_by(&self, owner: &Principal) -> Vec<DomainName> {
        self.state.read().ledger.registry().names_owned_by(owner)
    }

    pub fn events(&self, filter: &EventFilter) -> Vec<DomainRegistered> {
        self.state.read().ledger.events(filter)
    }

    /// Live feed of purchases made after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<DomainRegistered> {
        self.events_tx.subscribe()
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        self.state.read().ledger.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amount::{parse_amount, UNIT};
    use crate::crypto::KeyPair;
    use crate::host::InMemoryHost;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn name(s: &str) -> DomainName {
        DomainName::parse(s).unwrap()
    }

    fn tokens(s: &str) -> Amount {
        parse_amount(s).unwrap()
    }

    struct FailingPersistence;

    impl Persistence for FailingPersistence {
        fn save_snapshot(&self, _snapshot: &LedgerSnapshot) -> Result<()> {
            Err(RegistryError::DatabaseError("disk full".into()))
        }

        fn load_snapshot(&self) -> Result<Option<LedgerSnapshot>> {
            Ok(None)
        }

        fn save_deltas(&self, _deltas: &[StateDelta]) -> Result<()> {
            Err(RegistryError::DatabaseError("disk full".into()))
        }
    }

    /// In-memory store whose saves start failing from the `fail_from`-th
    /// save onwards (1-based).
    struct FlakyPersistence {
        inner: InMemoryPersistence,
        saves: AtomicUsize,
        fail_from: AtomicUsize,
    }

    impl FlakyPersistence {
        fn failing_from(save: usize) -> Self {
            FlakyPersistence {
                inner: InMemoryPersistence::new(),
                saves: AtomicUsize::new(0),
                fail_from: AtomicUsize::new(save),
            }
        }

        fn heal(&self) {
            self.fail_from.store(usize::MAX, Ordering::SeqCst);
        }

        fn check(&self) -> Result<()> {
            let n = self.saves.fetch_add(1, Ordering::SeqCst) + 1;
            if n >= self.fail_from.load(Ordering::SeqCst) {
                return Err(RegistryError::DatabaseError("disk full".into()));
            }
            Ok(())
        }
    }

    impl Persistence for FlakyPersistence {
        fn save_snapshot(&self, snapshot: &LedgerSnapshot) -> Result<()> {
            self.check()?;
            self.inner.save_snapshot(snapshot)
        }

        fn load_snapshot(&self) -> Result<Option<LedgerSnapshot>> {
            self.inner.load_snapshot()
        }

        fn save_deltas(&self, deltas: &[StateDelta]) -> Result<()> {
            self.check()?;
            self.inner.save_deltas(deltas)
        }
    }

    /// Records how many rows each save writes.
    #[derive(Default)]
    struct RecordingPersistence {
        inner: InMemoryPersistence,
        rows: parking_lot::Mutex<Vec<usize>>,
    }

    impl Persistence for RecordingPersistence {
        fn save_snapshot(&self, snapshot: &LedgerSnapshot) -> Result<()> {
            self.inner.save_snapshot(snapshot)
        }

        fn load_snapshot(&self) -> Result<Option<LedgerSnapshot>> {
            self.inner.load_snapshot()
        }

        fn save_deltas(&self, deltas: &[StateDelta]) -> Result<()> {
            self.rows.lock().push(deltas.iter().map(StateDelta::rows).sum());
            self.inner.save_deltas(deltas)
        }
    }

    #[test]
    fn test_failed_save_discards_operation() {
        let registry = Registry::open(Arc::new(FailingPersistence)).unwrap();
        assert!(registry.configure(UNIT, Principal::from_label("admin")).is_err());
        assert_eq!(registry.price().unwrap_err(), RegistryError::NotConfigured);
        assert!(!registry.has_unsaved_changes());
    }

    #[test]
    fn test_failed_purchase_save_leaves_memory_untouched() {
        // configure, then the purchase save fails
        let persistence = Arc::new(FlakyPersistence::failing_from(2));
        let registry = Registry::open(persistence.clone()).unwrap();
        let admin = Principal::from_label("admin");
        registry.configure(UNIT, admin).unwrap();

        let ctx = CallContext::new(admin).with_payment(UNIT);
        assert!(matches!(
            registry.purchase(&ctx, &name("com"), admin),
            Err(RegistryError::DatabaseError(_))
        ));
        assert_eq!(registry.domain_count(), 0);
        assert_eq!(registry.contract_balance(&admin).unwrap(), 0);

        persistence.heal();
        registry.purchase(&ctx, &name("com"), admin).unwrap();
        assert_eq!(registry.events(&EventFilter::all())[0].sequence, 1);
    }

    #[test]
    fn test_state_restored_from_persistence() {
        let persistence = Arc::new(InMemoryPersistence::new());
        let admin = Principal::from_label("admin");
        {
            let registry = Registry::open(persistence.clone()).unwrap();
            registry.configure(UNIT, admin).unwrap();
            let ctx = CallContext::new(admin).with_payment(UNIT);
            registry.purchase(&ctx, &name("com"), admin).unwrap();
        }

        let registry = Registry::open(persistence).unwrap();
        assert_eq!(registry.domain_count(), 1);
        assert_eq!(registry.protocol_balance(&admin).unwrap(), UNIT);
    }

    #[test]
    fn test_subscribers_receive_purchases() {
        let registry = Registry::in_memory();
        let admin = Principal::from_label("admin");
        registry.configure(UNIT, admin).unwrap();
        let mut rx = registry.subscribe();

        let ctx = CallContext::new(admin).with_payment(UNIT);
        registry.purchase(&ctx, &name("com"), admin).unwrap();

        let event = rx.try_recv().unwrap();
        assert_eq!(event.name, name("com"));
        assert_eq!(event.sequence, 1);
    }

    #[test]
    fn test_failed_transfer_restores_balance() {
        let registry = Registry::in_memory();
        let admin = Principal::from_label("admin");
        registry.configure(UNIT, admin).unwrap();
        let ctx = CallContext::new(admin).with_payment(UNIT);
        registry.purchase(&ctx, &name("com"), admin).unwrap();
        registry.purchase(&ctx, &name("a.com"), admin).unwrap();

        let host = InMemoryHost::new();
        host.set_failing(true);
        assert!(matches!(
            registry.withdraw_domain_reward(&admin, &name("com"), &host),
            Err(RegistryError::TransferFailed(_))
        ));
        assert_eq!(registry.domain_owner_balance(&name("com")), tokens("0.05"));

        host.set_failing(false);
        assert_eq!(
            registry.withdraw_domain_reward(&admin, &name("com"), &host).unwrap(),
            tokens("0.05")
        );
        assert_eq!(registry.contract_balance(&admin).unwrap(), tokens("1.95"));
    }

    #[test]
    fn test_unsaved_refund_is_kept_and_flushed() {
        // configure, com, a.com, begin withdrawal; the refund save fails
        let persistence = Arc::new(FlakyPersistence::failing_from(5));
        let registry = Registry::open(persistence.clone()).unwrap();
        let admin = Principal::from_label("admin");
        registry.configure(UNIT, admin).unwrap();
        let ctx = CallContext::new(admin).with_payment(UNIT);
        registry.purchase(&ctx, &name("com"), admin).unwrap();
        registry.purchase(&ctx, &name("a.com"), admin).unwrap();

        let host = InMemoryHost::new();
        host.set_failing(true);
        let err = registry
            .withdraw_domain_reward(&admin, &name("com"), &host)
            .unwrap_err();
        assert!(matches!(err, RegistryError::RefundNotPersisted { .. }));
        assert!(!err.is_retryable());

        // Nothing left custody, so nothing may be missing from the books.
        assert_eq!(registry.domain_owner_balance(&name("com")), tokens("0.05"));
        assert_eq!(registry.contract_balance(&admin).unwrap(), 2 * UNIT);
        assert!(registry.has_unsaved_changes());
        assert!(registry.flush().is_err());

        persistence.heal();
        registry.flush().unwrap();
        assert!(!registry.has_unsaved_changes());

        let reopened = Registry::open(persistence).unwrap();
        assert_eq!(reopened.domain_owner_balance(&name("com")), tokens("0.05"));
        assert_eq!(reopened.contract_balance(&admin).unwrap(), 2 * UNIT);
    }

    #[test]
    fn test_queued_refund_saved_with_next_operation() {
        let persistence = Arc::new(FlakyPersistence::failing_from(5));
        let registry = Registry::open(persistence.clone()).unwrap();
        let admin = Principal::from_label("admin");
        registry.configure(UNIT, admin).unwrap();
        let ctx = CallContext::new(admin).with_payment(UNIT);
        registry.purchase(&ctx, &name("com"), admin).unwrap();
        registry.purchase(&ctx, &name("a.com"), admin).unwrap();

        let host = InMemoryHost::new();
        host.set_failing(true);
        assert!(registry
            .withdraw_domain_reward(&admin, &name("com"), &host)
            .is_err());

        persistence.heal();
        registry.purchase(&ctx, &name("b.com"), admin).unwrap();
        assert!(!registry.has_unsaved_changes());

        let reopened = Registry::open(persistence).unwrap();
        assert_eq!(reopened.domain_owner_balance(&name("com")), tokens("0.10"));
        assert_eq!(reopened.snapshot(), registry.snapshot());
    }

    #[test]
    fn test_purchase_writes_only_changed_rows() {
        let persistence = Arc::new(RecordingPersistence::default());
        let registry = Registry::open(persistence.clone()).unwrap();
        let admin = Principal::from_label("admin");
        registry.configure(UNIT, admin).unwrap();
        let ctx = CallContext::new(admin).with_payment(UNIT);
        registry.purchase(&ctx, &name("com"), admin).unwrap();

        for i in 0..300 {
            registry
                .purchase(&ctx, &name(&format!("n{}.com", i)), admin)
                .unwrap();
        }
        registry.purchase(&ctx, &name("deep.n7.com"), admin).unwrap();

        let rows = persistence.rows.lock();
        // registration, one ancestor, protocol pool, event
        assert!(rows[2..rows.len() - 1].iter().all(|&r| r == 4));
        // two ancestors
        assert_eq!(rows[rows.len() - 1], 5);
    }

    #[test]
    fn test_signed_call_cannot_be_replayed() {
        let registry = Registry::in_memory();
        let admin = KeyPair::generate();
        registry.configure(UNIT, admin.principal()).unwrap();

        let buyer = KeyPair::generate();
        let beneficiary = Principal::from_label("beneficiary");
        let op = Operation::Purchase {
            name: name("com"),
            beneficiary,
        };
        let call = SignedCall::sign(&buyer, &op, UNIT, registry.next_nonce(&buyer.principal())).unwrap();
        let event = registry.purchase_signed(&call, &name("com"), beneficiary).unwrap();
        assert_eq!(event.registrant, buyer.principal());

        assert!(matches!(
            registry.purchase_signed(&call, &name("com"), beneficiary),
            Err(RegistryError::Unauthorized(_))
        ));
        assert_eq!(registry.next_nonce(&buyer.principal()), 2);

        let price = SignedCall::sign(&admin, &Operation::UpdatePrice { price: 2 * UNIT }, 0, 1).unwrap();
        registry.update_price_signed(&price, 2 * UNIT).unwrap();
        assert!(registry.update_price_signed(&price, 2 * UNIT).is_err());
        assert_eq!(registry.price().unwrap(), 2 * UNIT);
    }

    #[test]
    fn test_signed_call_rejected_for_other_operation() {
        let registry = Registry::in_memory();
        let admin = KeyPair::generate();
        registry.configure(UNIT, admin.principal()).unwrap();
        let ctx = CallContext::new(admin.principal()).with_payment(UNIT);
        registry.purchase(&ctx, &name("com"), admin.principal()).unwrap();

        let call = SignedCall::sign(&admin, &Operation::UpdatePrice { price: 0 }, 0, 1).unwrap();
        let host = InMemoryHost::new();
        assert!(matches!(
            registry.withdraw_protocol_signed(&call, &host),
            Err(RegistryError::Unauthorized(_))
        ));
        assert!(host.payouts().is_empty());
        // The nonce was not consumed by the rejected call.
        assert_eq!(registry.next_nonce(&admin.principal()), 1);

        let call = SignedCall::sign(&admin, &Operation::WithdrawProtocol, 0, 1).unwrap();
        assert_eq!(registry.withdraw_protocol_signed(&call, &host).unwrap(), UNIT);
    }

    #[test]
    fn test_rejected_signed_purchase_keeps_nonce() {
        let registry = Registry::in_memory();
        registry.configure(UNIT, Principal::from_label("admin")).unwrap();
        let buyer = KeyPair::generate();
        let op = Operation::Purchase {
            name: name("com"),
            beneficiary: buyer.principal(),
        };

        let underpaid = SignedCall::sign(&buyer, &op, UNIT - 1, 1).unwrap();
        assert!(matches!(
            registry.purchase_signed(&underpaid, &name("com"), buyer.principal()),
            Err(RegistryError::WrongPrice { .. })
        ));
        assert_eq!(registry.next_nonce(&buyer.principal()), 1);

        let paid = SignedCall::sign(&buyer, &op, UNIT, 1).unwrap();
        registry
            .purchase_signed(&paid, &name("com"), buyer.principal())
            .unwrap();
    }

    #[test]
    fn test_import_only_into_empty_registry() {
        let registry = Registry::in_memory();
        let admin = Principal::from_label("admin");
        registry.configure(UNIT, admin).unwrap();
        assert_eq!(
            registry.import_snapshot(LedgerSnapshot::default()).unwrap_err(),
            RegistryError::AlreadyConfigured
        );
    }
}
