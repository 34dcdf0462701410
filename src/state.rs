//! Versioned persisted state.
//!
//! The persisted layout only ever grows: new fields are appended with serde
//! defaults, existing fields are never renamed, reordered, or repurposed.
//! Layout 1 is the original flat storage (an owner, a cost, an indexed list
//! of domains and one undivided balance). Layout 2 adds per-name reward
//! pools, the protocol pool and the event log.

use crate::amount::Amount;
use crate::crypto::Principal;
use crate::error::{RegistryError, Result};
use crate::events::{DomainRegistered, EventLog};
use crate::ledger::{validate_reward_bps, LedgerSettings, RewardLedger, DEFAULT_REWARD_BPS};
use crate::access::AccessGuard;
use crate::name::DomainName;
use crate::registry::{NameRegistry, Registration};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::info;

pub const SCHEMA_VERSION: u32 = 2;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    pub schema_version: u32,
    pub settings: Option<LedgerSettings>,
    pub registrations: Vec<Registration>,
    pub reward_balances: BTreeMap<DomainName, Amount>,
    pub protocol_balance: Amount,
    #[serde(default)]
    pub events: Vec<DomainRegistered>,
    /// Highest signed-call nonce accepted per principal
    #[serde(default)]
    pub nonces: Vec<(Principal, u64)>,
}

impl Default for LedgerSnapshot {
    fn default() -> Self {
        LedgerSnapshot {
            schema_version: SCHEMA_VERSION,
            settings: None,
            registrations: Vec::new(),
            reward_balances: BTreeMap::new(),
            protocol_balance: 0,
            events: Vec::new(),
            nonces: Vec::new(),
        }
    }
}

impl LedgerSnapshot {
    /// Bring the snapshot forward by one operation.
    pub fn apply_delta(&mut self, delta: &StateDelta) {
        if let Some(settings) = delta.settings {
            self.settings = Some(settings);
        }
        if let Some(registration) = &delta.registration {
            self.registrations.push(registration.clone());
        }
        for (name, amount) in &delta.reward_balances {
            if *amount == 0 {
                self.reward_balances.remove(name);
            } else {
                self.reward_balances.insert(name.clone(), *amount);
            }
        }
        if let Some(balance) = delta.protocol_balance {
            self.protocol_balance = balance;
        }
        if let Some(event) = &delta.event {
            self.events.push(event.clone());
        }
        if let Some((principal, nonce)) = delta.nonce {
            match self.nonces.iter_mut().find(|(p, _)| *p == principal) {
                Some(entry) => entry.1 = nonce,
                None => self.nonces.push((principal, nonce)),
            }
        }
    }
}

/// The rows a single operation changes. Balances are absolute values, not
/// increments; a zero balance means the row is removed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StateDelta {
    pub settings: Option<LedgerSettings>,
    pub registration: Option<Registration>,
    pub reward_balances: Vec<(DomainName, Amount)>,
    pub protocol_balance: Option<Amount>,
    pub event: Option<DomainRegistered>,
    pub nonce: Option<(Principal, u64)>,
}

impl StateDelta {
    /// Number of stored rows this delta touches
    pub fn rows(&self) -> usize {
        self.settings.is_some() as usize
            + self.registration.is_some() as usize
            + self.reward_balances.len()
            + self.protocol_balance.is_some() as usize
            + self.event.is_some() as usize
            + self.nonce.is_some() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.rows() == 0
    }
}

/// Layout 1 domain entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegacyDomain {
    pub domain_name: String,
    pub domain_owner: Principal,
}

/// Layout 1: the original flat storage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegacyStorageV1 {
    pub owner: Principal,
    pub cost: Amount,
    pub domains: Vec<LegacyDomain>,
    pub balance: Amount,
}

impl RewardLedger {
    pub fn snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            schema_version: SCHEMA_VERSION,
            settings: self.settings().ok().copied(),
            registrations: self.registry().iter().cloned().collect(),
            reward_balances: self
                .reward_balances()
                .iter()
                .filter(|(_, v)| **v > 0)
                .map(|(k, v)| (k.clone(), *v))
                .collect(),
            protocol_balance: self.raw_protocol_balance(),
            events: self.event_log().iter().cloned().collect(),
            nonces: {
                let mut nonces: Vec<(Principal, u64)> =
                    self.nonces().iter().map(|(p, n)| (*p, *n)).collect();
                nonces.sort();
                nonces
            },
        }
    }

    pub fn from_snapshot(snapshot: LedgerSnapshot) -> Result<Self> {
        if snapshot.schema_version > SCHEMA_VERSION {
            return Err(RegistryError::SerializationError(format!(
                "state layout {} is newer than supported layout {}",
                snapshot.schema_version, SCHEMA_VERSION
            )));
        }
        if let Some(settings) = &snapshot.settings {
            validate_reward_bps(settings.reward_bps)?;
        }

        let registry = NameRegistry::from_registrations(snapshot.registrations)?;
        let reward_balances: HashMap<DomainName, Amount> =
            snapshot.reward_balances.into_iter().collect();

        Ok(RewardLedger::from_parts(
            snapshot.settings,
            registry,
            reward_balances,
            snapshot.protocol_balance,
            EventLog::from_events(snapshot.events),
            snapshot.nonces.into_iter().collect(),
        ))
    }
}

/// Carry a layout 1 store forward. Domains keep their order; the undivided
/// legacy balance becomes the protocol pool since no rewards existed then.
pub fn migrate_v1(legacy: LegacyStorageV1, migrated_at: DateTime<Utc>) -> Result<LedgerSnapshot> {
    let mut registrations = Vec::with_capacity(legacy.domains.len());
    for domain in legacy.domains {
        registrations.push(Registration {
            name: DomainName::parse(&domain.domain_name)?,
            owner: domain.domain_owner,
            registered_at: migrated_at,
        });
    }

    // Reject duplicates now rather than on first load.
    NameRegistry::from_registrations(registrations.clone())?;

    info!(
        domains = registrations.len(),
        balance = legacy.balance,
        "migrated layout 1 storage"
    );

    Ok(LedgerSnapshot {
        schema_version: SCHEMA_VERSION,
        settings: Some(LedgerSettings {
            guard: AccessGuard::new(legacy.owner),
            price: legacy.cost,
            reward_bps: DEFAULT_REWARD_BPS,
        }),
        registrations,
        reward_balances: BTreeMap::new(),
        protocol_balance: legacy.balance,
        events: Vec::new(),
        nonces: Vec::new(),
    })
}

/// Parse a JSON state document of any known layout into the current one.
/// Documents without a `schema_version` field are layout 1.
pub fn upgrade_from_json(json: &str, migrated_at: DateTime<Utc>) -> Result<LedgerSnapshot> {
    // Amounts can exceed u64, so avoid `serde_json::Value` and decode the
    // document straight into its typed layout once the version is known.
    #[derive(Deserialize)]
    struct LayoutHeader {
        schema_version: Option<u32>,
    }

    let header: LayoutHeader = serde_json::from_str(json)?;

    match header.schema_version.unwrap_or(1) {
        1 => migrate_v1(serde_json::from_str(json)?, migrated_at),
        2 => Ok(serde_json::from_str(json)?),
        other => Err(RegistryError::SerializationError(format!(
            "unknown state layout {}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amount::{parse_amount, UNIT};
    use crate::host::CallContext;

    fn name(s: &str) -> DomainName {
        DomainName::parse(s).unwrap()
    }

    fn legacy() -> LegacyStorageV1 {
        LegacyStorageV1 {
            owner: Principal::from_label("deployer"),
            cost: UNIT,
            domains: vec![
                LegacyDomain {
                    domain_name: "com".into(),
                    domain_owner: Principal::from_label("owner1"),
                },
                LegacyDomain {
                    domain_name: "test".into(),
                    domain_owner: Principal::from_label("owner2"),
                },
            ],
            balance: 2 * UNIT,
        }
    }

    #[test]
    fn test_snapshot_restores_ledger() {
        let admin = Principal::from_label("deployer");
        let mut ledger = RewardLedger::new();
        ledger.configure(UNIT, admin).unwrap();
        let ctx = CallContext::new(admin).with_payment(UNIT);
        ledger.purchase(&ctx, &name("com"), admin).unwrap();
        ledger.purchase(&ctx, &name("a.com"), admin).unwrap();

        let restored = RewardLedger::from_snapshot(ledger.snapshot()).unwrap();
        assert_eq!(restored.domain_count(), 2);
        assert_eq!(restored.domain_owner_balance(&name("com")), parse_amount("0.05").unwrap());
        assert_eq!(restored.protocol_balance(&admin).unwrap(), parse_amount("1.95").unwrap());
        assert_eq!(restored.snapshot(), ledger.snapshot());
    }

    #[test]
    fn test_migrated_store_keeps_buying() {
        let snapshot = migrate_v1(legacy(), Utc::now()).unwrap();
        let mut ledger = RewardLedger::from_snapshot(snapshot).unwrap();
        let deployer = Principal::from_label("deployer");

        assert_eq!(ledger.contract_balance(&deployer).unwrap(), 2 * UNIT);
        assert_eq!(ledger.registration_at(1).unwrap().name, name("test"));

        let ctx = CallContext::new(deployer).with_payment(UNIT);
        ledger
            .purchase(&ctx, &name("test.com"), Principal::from_label("owner2"))
            .unwrap();
        assert_eq!(ledger.domain_owner_balance(&name("com")), parse_amount("0.05").unwrap());
        assert_eq!(ledger.domain_count(), 3);
    }

    #[test]
    fn test_upgrade_from_json_detects_layout() {
        let v1_json = serde_json::to_string(&legacy()).unwrap();
        let upgraded = upgrade_from_json(&v1_json, Utc::now()).unwrap();
        assert_eq!(upgraded.schema_version, SCHEMA_VERSION);
        assert_eq!(upgraded.protocol_balance, 2 * UNIT);

        let v2_json = serde_json::to_string(&upgraded).unwrap();
        assert_eq!(upgrade_from_json(&v2_json, Utc::now()).unwrap(), upgraded);

        assert!(upgrade_from_json(r#"{"schema_version": 99}"#, Utc::now()).is_err());
    }

    #[test]
    fn test_layout_two_without_events_field() {
        let mut value = serde_json::to_value(LedgerSnapshot::default()).unwrap();
        value.as_object_mut().unwrap().remove("events");
        let snapshot: LedgerSnapshot = serde_json::from_value(value).unwrap();
        assert!(snapshot.events.is_empty());
    }

    #[test]
    fn test_migration_rejects_bad_names() {
        let mut store = legacy();
        store.domains.push(LegacyDomain {
            domain_name: "com".into(),
            domain_owner: Principal::from_label("x"),
        });
        assert!(matches!(
            migrate_v1(store, Utc::now()),
            Err(RegistryError::AlreadyRegistered(_))
        ));
    }
}
