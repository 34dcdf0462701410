//! Reward ledger: purchase pricing, reward splitting, and withdrawals.
//!
//! `RewardLedger` is a sequential state machine. Every public operation
//! validates everything it needs before its first write, so a failed call
//! leaves no trace.
//!
//! Each mutation is a `plan_*` step that checks the call and returns a
//! [`StateDelta`] naming only the rows it changes, followed by
//! [`RewardLedger::apply_delta`]. The shared service persists the delta
//! between the two steps.
//!
//! Withdrawals are split in two so the balance is zeroed before any funds
//! move: `begin_*_withdrawal` applies the effect and hands back a
//! [`PendingTransfer`], the caller performs the transfer, and
//! [`RewardLedger::revert_withdrawal`] re-credits the amount if the host
//! refused it. [`RewardLedger::withdraw_domain_reward`] and
//! [`RewardLedger::withdraw_protocol`] run the whole sequence against a
//! [`Host`].

use crate::access::AccessGuard;
use crate::amount::{bps_of, Amount, BPS_DENOMINATOR};
use crate::crypto::Principal;
use crate::error::{RegistryError, Result};
use crate::events::{DomainRegistered, EventFilter, EventLog};
use crate::host::{CallContext, Host};
use crate::name::{DomainName, MAX_ANCESTORS};
use crate::registry::{NameRegistry, Registration};
use crate::state::StateDelta;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{info, warn};

/// Share of the purchase price credited to each ancestor (5%)
pub const DEFAULT_REWARD_BPS: u32 = 500;

/// Settings fixed by `configure`; only the price changes afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerSettings {
    pub guard: AccessGuard,
    pub price: Amount,
    pub reward_bps: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PayoutSource {
    DomainReward(DomainName),
    Protocol,
}

/// A withdrawal whose balance has already been zeroed but whose funds have
/// not yet left custody.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingTransfer {
    pub recipient: Principal,
    pub amount: Amount,
    pub source: PayoutSource,
}

/// How a single payment is divided
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Split {
    pub per_ancestor: Amount,
    pub ancestors: usize,
    pub protocol: Amount,
}

impl Split {
    /// Divide `payment` between `ancestors` reward pools and the protocol pool.
    pub fn compute(payment: Amount, ancestors: usize, reward_bps: u32) -> Result<Split> {
        let per_ancestor = bps_of(payment, reward_bps)?;
        let to_ancestors = per_ancestor
            .checked_mul(ancestors as Amount)
            .ok_or(RegistryError::ArithmeticOverflow)?;
        let protocol = payment
            .checked_sub(to_ancestors)
            .ok_or(RegistryError::ArithmeticOverflow)?;
        Ok(Split {
            per_ancestor,
            ancestors,
            protocol,
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct RewardLedger {
    settings: Option<LedgerSettings>,
    registry: NameRegistry,
    reward_balances: HashMap<DomainName, Amount>,
    protocol_balance: Amount,
    events: EventLog,
    nonces: HashMap<Principal, u64>,
}

impl RewardLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reassemble a ledger from persisted parts. Used by `state`.
    pub(crate) fn from_parts(
        settings: Option<LedgerSettings>,
        registry: NameRegistry,
        reward_balances: HashMap<DomainName, Amount>,
        protocol_balance: Amount,
        events: EventLog,
        nonces: HashMap<Principal, u64>,
    ) -> Self {
        RewardLedger {
            settings,
            registry,
            reward_balances,
            protocol_balance,
            events,
            nonces,
        }
    }

    // ------------------------------------------------------------------
    // Setup
    // ------------------------------------------------------------------

    /// One-time setup with the default 5% ancestor reward.
    pub fn configure(&mut self, initial_price: Amount, administrator: Principal) -> Result<()> {
        self.configure_with_reward(initial_price, administrator, DEFAULT_REWARD_BPS)
    }

    pub fn configure_with_reward(
        &mut self,
        initial_price: Amount,
        administrator: Principal,
        reward_bps: u32,
    ) -> Result<()> {
        let delta = self.plan_configure(initial_price, administrator, reward_bps)?;
        self.apply_delta(&delta);
        Ok(())
    }

    pub fn is_configured(&self) -> bool {
        self.settings.is_some()
    }

    pub fn settings(&self) -> Result<&LedgerSettings> {
        self.settings.as_ref().ok_or(RegistryError::NotConfigured)
    }

    // ------------------------------------------------------------------
    // Mutations
    // ------------------------------------------------------------------

    /// Buy `name` for `beneficiary`, paying with the call's attached payment.
    pub fn purchase(
        &mut self,
        ctx: &CallContext,
        name: &DomainName,
        beneficiary: Principal,
    ) -> Result<DomainRegistered> {
        let (event, delta) = self.plan_purchase(ctx, name, beneficiary)?;
        self.apply_delta(&delta);
        Ok(event)
    }

    /// Replace the purchase price. Balances already credited are unaffected.
    pub fn update_price(&mut self, caller: &Principal, new_price: Amount) -> Result<()> {
        let delta = self.plan_update_price(caller, new_price)?;
        self.apply_delta(&delta);
        Ok(())
    }

    /// Zero `name`'s reward balance on behalf of its owner and return the
    /// transfer still to be made.
    pub fn begin_domain_withdrawal(
        &mut self,
        caller: &Principal,
        name: &DomainName,
    ) -> Result<PendingTransfer> {
        let (pending, delta) = self.plan_domain_withdrawal(caller, name)?;
        self.apply_delta(&delta);
        Ok(pending)
    }

    /// Zero the protocol pool on behalf of the administrator.
    pub fn begin_protocol_withdrawal(&mut self, caller: &Principal) -> Result<PendingTransfer> {
        let (pending, delta) = self.plan_protocol_withdrawal(caller)?;
        self.apply_delta(&delta);
        Ok(pending)
    }

    /// Put the funds of a failed transfer back where they came from.
    pub fn revert_withdrawal(&mut self, pending: &PendingTransfer) -> Result<()> {
        let delta = self.plan_revert(pending)?;
        self.apply_delta(&delta);
        Ok(())
    }

    /// Withdraw `name`'s whole reward balance to its owner. Returns the
    /// amount transferred, which is zero on a repeated call.
    pub fn withdraw_domain_reward(
        &mut self,
        caller: &Principal,
        name: &DomainName,
        host: &dyn Host,
    ) -> Result<Amount> {
        let pending = self.begin_domain_withdrawal(caller, name)?;
        self.settle(pending, host)
    }

    /// Withdraw the whole protocol pool to the administrator.
    pub fn withdraw_protocol(&mut self, caller: &Principal, host: &dyn Host) -> Result<Amount> {
        let pending = self.begin_protocol_withdrawal(caller)?;
        self.settle(pending, host)
    }

    fn settle(&mut self, pending: PendingTransfer, host: &dyn Host) -> Result<Amount> {
        if let Err(e) = host.transfer_out(&pending.recipient, pending.amount) {
            warn!(recipient = %pending.recipient, amount = pending.amount, error = %e, "transfer failed, restoring balance");
            self.revert_withdrawal(&pending)?;
            return Err(e);
        }
        info!(recipient = %pending.recipient, amount = pending.amount, source = ?pending.source, "withdrawal settled");
        Ok(pending.amount)
    }

    // ------------------------------------------------------------------
    // Planning
    //
    // `plan_*` validate an operation against the current state and describe
    // its writes as a `StateDelta` without touching `self`. The cost of a
    // plan is bounded by the name's ancestor chain, never by registry size.
    // ------------------------------------------------------------------

    pub fn plan_configure(
        &self,
        initial_price: Amount,
        administrator: Principal,
        reward_bps: u32,
    ) -> Result<StateDelta> {
        if self.settings.is_some() {
            return Err(RegistryError::AlreadyConfigured);
        }
        validate_reward_bps(reward_bps)?;

        Ok(StateDelta {
            settings: Some(LedgerSettings {
                guard: AccessGuard::new(administrator),
                price: initial_price,
                reward_bps,
            }),
            ..StateDelta::default()
        })
    }

    pub fn plan_purchase(
        &self,
        ctx: &CallContext,
        name: &DomainName,
        beneficiary: Principal,
    ) -> Result<(DomainRegistered, StateDelta)> {
        let settings = *self.settings()?;

        if ctx.attached_payment != settings.price {
            return Err(RegistryError::WrongPrice {
                expected: settings.price,
                attached: ctx.attached_payment,
            });
        }

        if self.registry.contains(name) {
            return Err(RegistryError::AlreadyRegistered(name.to_string()));
        }

        let ancestors = name.ancestors();
        let split = Split::compute(ctx.attached_payment, ancestors.len(), settings.reward_bps)?;
        let mut reward_balances = Vec::with_capacity(ancestors.len());
        for ancestor in ancestors {
            let balance = self
                .reward_balance(&ancestor)
                .checked_add(split.per_ancestor)
                .ok_or(RegistryError::ArithmeticOverflow)?;
            reward_balances.push((ancestor, balance));
        }
        let protocol_balance = self
            .protocol_balance
            .checked_add(split.protocol)
            .ok_or(RegistryError::ArithmeticOverflow)?;

        let event = DomainRegistered {
            sequence: self.events.next_sequence(),
            registrant: ctx.caller,
            timestamp: ctx.timestamp,
            name: name.clone(),
            beneficiary,
        };
        let delta = StateDelta {
            registration: Some(Registration {
                name: name.clone(),
                owner: beneficiary,
                registered_at: ctx.timestamp,
            }),
            reward_balances,
            protocol_balance: Some(protocol_balance),
            event: Some(event.clone()),
            ..StateDelta::default()
        };
        Ok((event, delta))
    }

    pub fn plan_update_price(&self, caller: &Principal, new_price: Amount) -> Result<StateDelta> {
        let mut settings = *self.settings()?;
        settings.guard.ensure_administrator(caller, "update_price")?;
        settings.price = new_price;
        Ok(StateDelta {
            settings: Some(settings),
            ..StateDelta::default()
        })
    }

    pub fn plan_domain_withdrawal(
        &self,
        caller: &Principal,
        name: &DomainName,
    ) -> Result<(PendingTransfer, StateDelta)> {
        self.settings()?;
        let owner = self.registry.owner_of(name)?;
        if &owner != caller {
            warn!(name = %name, caller = %caller, "rejected reward withdrawal by non-owner");
            return Err(RegistryError::Unauthorized(format!(
                "only the owner of '{}' can withdraw its reward",
                name
            )));
        }

        let pending = PendingTransfer {
            recipient: owner,
            amount: self.reward_balance(name),
            source: PayoutSource::DomainReward(name.clone()),
        };
        let delta = StateDelta {
            reward_balances: vec![(name.clone(), 0)],
            ..StateDelta::default()
        };
        Ok((pending, delta))
    }

    pub fn plan_protocol_withdrawal(
        &self,
        caller: &Principal,
    ) -> Result<(PendingTransfer, StateDelta)> {
        let guard = self.settings()?.guard;
        guard.ensure_administrator(caller, "withdraw_protocol")?;

        let pending = PendingTransfer {
            recipient: guard.administrator(),
            amount: self.protocol_balance,
            source: PayoutSource::Protocol,
        };
        let delta = StateDelta {
            protocol_balance: Some(0),
            ..StateDelta::default()
        };
        Ok((pending, delta))
    }

    pub fn plan_revert(&self, pending: &PendingTransfer) -> Result<StateDelta> {
        let delta = match &pending.source {
            PayoutSource::DomainReward(name) => {
                let balance = self
                    .reward_balance(name)
                    .checked_add(pending.amount)
                    .ok_or(RegistryError::ArithmeticOverflow)?;
                StateDelta {
                    reward_balances: vec![(name.clone(), balance)],
                    ..StateDelta::default()
                }
            }
            PayoutSource::Protocol => StateDelta {
                protocol_balance: Some(
                    self.protocol_balance
                        .checked_add(pending.amount)
                        .ok_or(RegistryError::ArithmeticOverflow)?,
                ),
                ..StateDelta::default()
            },
        };
        Ok(delta)
    }

    /// Reject a signed call whose nonce is not above the caller's last one.
    pub fn check_nonce(&self, caller: &Principal, nonce: u64) -> Result<()> {
        let last = self.last_nonce(caller);
        if nonce <= last {
            warn!(caller = %caller, nonce, last, "rejected replayed call");
            return Err(RegistryError::Unauthorized(format!(
                "nonce {} already used (last accepted {})",
                nonce, last
            )));
        }
        Ok(())
    }

    /// Write a planned delta. Infallible: every check happened while planning.
    pub fn apply_delta(&mut self, delta: &StateDelta) {
        if let Some(settings) = delta.settings {
            if self.settings.is_none() {
                info!(
                    administrator = %settings.guard.administrator(),
                    price = settings.price,
                    reward_bps = settings.reward_bps,
                    "registry configured"
                );
            } else {
                info!(new_price = settings.price, "purchase price updated");
            }
            self.settings = Some(settings);
        }
        if let Some(registration) = &delta.registration {
            self.registry.insert(registration.clone());
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
            info!(
                name = %event.name,
                registrant = %event.registrant,
                beneficiary = %event.beneficiary,
                ancestors = delta.reward_balances.len(),
                sequence = event.sequence,
                "domain purchased"
            );
        }
        if let Some((principal, nonce)) = delta.nonce {
            self.nonces.insert(principal, nonce);
        }
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Public: any caller may inspect any name's reward balance. Names that
    /// have never been credited report zero.
    pub fn domain_owner_balance(&self, name: &DomainName) -> Amount {
        self.reward_balance(name)
    }

    fn reward_balance(&self, name: &DomainName) -> Amount {
        self.reward_balances.get(name).copied().unwrap_or(0)
    }

    pub fn protocol_balance(&self, caller: &Principal) -> Result<Amount> {
        self.settings()?
            .guard
            .ensure_administrator(caller, "protocol_balance")?;
        Ok(self.protocol_balance)
    }

    /// Total funds in custody: every unwithdrawn reward plus the protocol pool.
    pub fn contract_balance(&self, caller: &Principal) -> Result<Amount> {
        self.settings()?
            .guard
            .ensure_administrator(caller, "contract_balance")?;
        self.total_held()
    }

    pub(crate) fn total_held(&self) -> Result<Amount> {
        self.reward_balances
            .values()
            .try_fold(self.protocol_balance, |acc, v| acc.checked_add(*v))
            .ok_or(RegistryError::ArithmeticOverflow)
    }

    pub fn domain_count(&self) -> u64 {
        self.registry.count()
    }

    pub fn price(&self) -> Result<Amount> {
        Ok(self.settings()?.price)
    }

    pub fn administrator(&self) -> Result<Principal> {
        Ok(self.settings()?.guard.administrator())
    }

    pub fn owner_of(&self, name: &DomainName) -> Result<Principal> {
        self.registry.owner_of(name)
    }

    pub fn registration(&self, name: &DomainName) -> Result<Registration> {
        self.registry
            .registration(name)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))
    }

    pub fn registration_at(&self, index: usize) -> Result<Registration> {
        self.registry
            .registration_at(index)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(format!("domain #{}", index)))
    }

    pub fn events(&self, filter: &EventFilter) -> Vec<DomainRegistered> {
        self.events.query(filter)
    }

    pub fn registry(&self) -> &NameRegistry {
        &self.registry
    }

    pub(crate) fn event_log(&self) -> &EventLog {
        &self.events
    }

    pub(crate) fn reward_balances(&self) -> &HashMap<DomainName, Amount> {
        &self.reward_balances
    }

    pub(crate) fn raw_protocol_balance(&self) -> Amount {
        self.protocol_balance
    }

    pub(crate) fn nonces(&self) -> &HashMap<Principal, u64> {
        &self.nonces
    }

    /// Highest signed-call nonce accepted from `caller`, zero if none.
    pub fn last_nonce(&self, caller: &Principal) -> u64 {
        self.nonces.get(caller).copied().unwrap_or(0)
    }
}

/// Each ancestor gets `reward_bps` of the payment, so the deepest allowed
/// chain must not route more than the whole payment to ancestors.
pub fn validate_reward_bps(reward_bps: u32) -> Result<()> {
    let worst_case = reward_bps as Amount * MAX_ANCESTORS as Amount;
    if worst_case > BPS_DENOMINATOR {
        return Err(RegistryError::InvalidConfig(format!(
            "reward_bps {} routes {} bps to a chain of {} ancestors (max {})",
            reward_bps, worst_case, MAX_ANCESTORS, BPS_DENOMINATOR
        )));
    }
    Ok(())
}
