//! Property tests: accounting holds for arbitrary names, prices and callers.

use domainchain::amount::{bps_of, Amount};
use domainchain::crypto::Principal;
use domainchain::error::RegistryError;
use domainchain::host::{CallContext, InMemoryHost};
use domainchain::ledger::{RewardLedger, DEFAULT_REWARD_BPS};
use domainchain::name::{DomainName, MAX_LABELS};
use proptest::prelude::*;

// ---------------------------------------------------------------------------
// Helpers / Strategies
// ---------------------------------------------------------------------------

fn arb_name(max_labels: usize) -> impl Strategy<Value = DomainName> {
    prop::collection::vec("[a-z0-9][a-z0-9-]{0,7}", 1..=max_labels)
        .prop_map(|labels| DomainName::parse(&labels.join(".")).unwrap())
}

fn arb_price() -> impl Strategy<Value = Amount> {
    prop_oneof![
        Just(0u128),
        1u128..1_000,
        any::<u64>().prop_map(|p| p as Amount * 1_000_000),
    ]
}

fn admin() -> Principal {
    Principal::from_label("admin")
}

fn ledger_at(price: Amount) -> RewardLedger {
    let mut ledger = RewardLedger::new();
    ledger.configure(price, admin()).unwrap();
    ledger
}

fn pay(caller: Principal, amount: Amount) -> CallContext {
    CallContext::new(caller).with_payment(amount)
}

// ---------------------------------------------------------------------------
// Properties
// ---------------------------------------------------------------------------

proptest! {
    #[test]
    fn second_registration_always_fails(name in arb_name(6), price in arb_price()) {
        let mut ledger = ledger_at(price);
        let buyer = Principal::from_label("buyer");
        ledger.purchase(&pay(buyer, price), &name, buyer).unwrap();

        let again = ledger.purchase(&pay(buyer, price), &name, buyer);
        prop_assert!(matches!(again, Err(RegistryError::AlreadyRegistered(_))));
        prop_assert_eq!(ledger.domain_count(), 1);
    }

    #[test]
    fn purchase_splits_payment_exactly(name in arb_name(MAX_LABELS), price in arb_price()) {
        let mut ledger = ledger_at(price);
        let ancestors = name.ancestors();
        let held_before = ledger.contract_balance(&admin()).unwrap();

        ledger.purchase(&pay(admin(), price), &name, admin()).unwrap();

        let share = bps_of(price, DEFAULT_REWARD_BPS).unwrap();
        for ancestor in &ancestors {
            prop_assert_eq!(ledger.domain_owner_balance(ancestor), share);
        }
        prop_assert_eq!(ledger.domain_owner_balance(&name), 0);
        prop_assert_eq!(
            ledger.protocol_balance(&admin()).unwrap(),
            price - share * ancestors.len() as Amount
        );
        prop_assert_eq!(ledger.contract_balance(&admin()).unwrap(), held_before + price);
    }

    #[test]
    fn wrong_payment_always_rejected(
        name in arb_name(4),
        price in 1u128..u64::MAX as u128,
        delta in 1u128..1_000_000,
        overpay in any::<bool>(),
    ) {
        let mut ledger = ledger_at(price);
        let attached = if overpay { price + delta } else { price.saturating_sub(delta) };
        let result = ledger.purchase(&pay(admin(), attached), &name, admin());

        let is_wrong_price = matches!(result, Err(RegistryError::WrongPrice { .. }));
        prop_assert!(is_wrong_price);
        prop_assert_eq!(ledger.domain_count(), 0);
        prop_assert_eq!(ledger.contract_balance(&admin()).unwrap(), 0);
    }

    #[test]
    fn non_owner_cannot_withdraw(child in "[a-z]{1,8}", intruder in "[a-z]{1,8}") {
        prop_assume!(intruder != "owner");
        let mut ledger = ledger_at(1_000);
        let owner = Principal::from_label("owner");
        let intruder = Principal::from_label(&intruder);
        let parent = DomainName::parse("com").unwrap();
        let child = DomainName::parse(&format!("{}.com", child)).unwrap();

        ledger.purchase(&pay(owner, 1_000), &parent, owner).unwrap();
        ledger.purchase(&pay(owner, 1_000), &child, owner).unwrap();
        let before = ledger.snapshot();

        let host = InMemoryHost::new();
        let result = ledger.withdraw_domain_reward(&intruder, &parent, &host);
        prop_assert!(matches!(result, Err(RegistryError::Unauthorized(_))));
        prop_assert_eq!(ledger.snapshot(), before);
        prop_assert!(host.payouts().is_empty());
    }

    #[test]
    fn owner_withdrawal_is_idempotent(children in prop::collection::btree_set("[a-z]{1,6}", 1..8)) {
        let mut ledger = ledger_at(1_000);
        let owner = Principal::from_label("owner");
        let parent = DomainName::parse("com").unwrap();
        ledger.purchase(&pay(owner, 1_000), &parent, owner).unwrap();
        for child in &children {
            let child = DomainName::parse(&format!("{}.com", child)).unwrap();
            ledger.purchase(&pay(owner, 1_000), &child, owner).unwrap();
        }

        let host = InMemoryHost::new();
        let first = ledger.withdraw_domain_reward(&owner, &parent, &host).unwrap();
        prop_assert_eq!(first, 50 * children.len() as Amount);
        prop_assert_eq!(ledger.domain_owner_balance(&parent), 0);

        let after_first = ledger.snapshot();
        let second = ledger.withdraw_domain_reward(&owner, &parent, &host).unwrap();
        prop_assert_eq!(second, 0);
        prop_assert_eq!(ledger.snapshot(), after_first);
        prop_assert_eq!(host.paid_to(&owner), first);
    }

    #[test]
    fn administrator_operations_reject_everyone_else(caller in "[a-z]{1,12}", price in arb_price()) {
        prop_assume!(caller != "admin");
        let caller = Principal::from_label(&caller);
        let mut ledger = ledger_at(price);
        let host = InMemoryHost::new();

        prop_assert!(matches!(ledger.update_price(&caller, 1), Err(RegistryError::Unauthorized(_))));
        prop_assert!(matches!(ledger.protocol_balance(&caller), Err(RegistryError::Unauthorized(_))));
        prop_assert!(matches!(ledger.contract_balance(&caller), Err(RegistryError::Unauthorized(_))));
        prop_assert!(matches!(ledger.withdraw_protocol(&caller, &host), Err(RegistryError::Unauthorized(_))));
        prop_assert_eq!(ledger.price().unwrap(), price);
    }
}
