//! The host capabilities the engine consumes: caller identity, attached
//! payment, and outbound transfers.

use crate::amount::Amount;
use crate::crypto::{verify_signature, Principal};
use crate::error::{RegistryError, Result};
use crate::name::DomainName;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// The in-flight call as seen by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallContext {
    pub caller: Principal,
    /// Zero if the call carries no payment
    pub attached_payment: Amount,
    pub timestamp: DateTime<Utc>,
}

impl CallContext {
    /// A call with no payment attached, timestamped now.
    pub fn new(caller: Principal) -> Self {
        CallContext {
            caller,
            attached_payment: 0,
            timestamp: Utc::now(),
        }
    }

    pub fn with_payment(mut self, amount: Amount) -> Self {
        self.attached_payment = amount;
        self
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

/// A state-changing operation a signed call can authorize.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Purchase {
        name: DomainName,
        beneficiary: Principal,
    },
    WithdrawReward {
        name: DomainName,
    },
    WithdrawProtocol,
    UpdatePrice {
        price: Amount,
    },
}

impl Operation {
    /// The string that gets signed, e.g. `purchase:com:<beneficiary hex>`.
    pub fn canonical(&self) -> String {
        match self {
            Operation::Purchase { name, beneficiary } => {
                format!("purchase:{}:{}", name, beneficiary.to_hex())
            }
            Operation::WithdrawReward { name } => format!("withdraw_reward:{}", name),
            Operation::WithdrawProtocol => "withdraw_protocol".to_string(),
            Operation::UpdatePrice { price } => format!("update_price:{}", price),
        }
    }
}

/// A call signed by its sender. The caller principal is derived from the
/// public key after the signature checks out, so it cannot be forged.
///
/// The signature covers the operation, the payment, the timestamp and a
/// nonce. The registry accepts each principal's nonces in strictly
/// increasing order, so a captured call cannot be submitted twice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedCall {
    /// Output of [`Operation::canonical`]
    pub operation: String,
    pub attached_payment: Amount,
    pub timestamp: DateTime<Utc>,
    pub nonce: u64,
    pub public_key: Vec<u8>,
    pub signature: Vec<u8>,
}

impl SignedCall {
    pub fn signable_message(
        operation: &str,
        attached_payment: Amount,
        timestamp: &DateTime<Utc>,
        nonce: u64,
    ) -> Vec<u8> {
        let mut message = Vec::with_capacity(operation.len() + 32);
        message.extend_from_slice(operation.as_bytes());
        message.extend_from_slice(&attached_payment.to_le_bytes());
        message.extend_from_slice(&timestamp.timestamp_millis().to_le_bytes());
        message.extend_from_slice(&nonce.to_le_bytes());
        message
    }

    pub fn sign(
        keypair: &crate::crypto::KeyPair,
        operation: &Operation,
        attached_payment: Amount,
        nonce: u64,
    ) -> Result<Self> {
        let operation = operation.canonical();
        let timestamp = Utc::now();
        let message = Self::signable_message(&operation, attached_payment, &timestamp, nonce);
        let signature = keypair.sign(&message)?;
        Ok(SignedCall {
            operation,
            attached_payment,
            timestamp,
            nonce,
            public_key: keypair.public_key_bytes().to_vec(),
            signature: signature.to_vec(),
        })
    }

    /// Verify the signature and that it authorizes exactly `expected`, then
    /// produce the engine-facing context. Nonce freshness is checked by the
    /// registry when the call is applied.
    pub fn verify_for(&self, expected: &Operation) -> Result<CallContext> {
        let message = Self::signable_message(
            &self.operation,
            self.attached_payment,
            &self.timestamp,
            self.nonce,
        );
        verify_signature(&self.public_key, &message, &self.signature)?;

        if self.operation != expected.canonical() {
            return Err(RegistryError::Unauthorized(format!(
                "call was signed for '{}', not '{}'",
                self.operation,
                expected.canonical()
            )));
        }

        let public_key: [u8; 33] = self.public_key.as_slice().try_into().map_err(|_| {
            RegistryError::CryptoError("Public key must be 33 bytes".to_string())
        })?;

        Ok(CallContext {
            caller: Principal::from_public_key_bytes(&public_key),
            attached_payment: self.attached_payment,
            timestamp: self.timestamp,
        })
    }
}

/// Moves funds out of the engine's custody. Implementations may call back
/// into the engine; the engine applies its own effects before calling this.
pub trait Host: Send + Sync {
    fn transfer_out(&self, recipient: &Principal, amount: Amount) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payout {
    pub recipient: Principal,
    pub amount: Amount,
}

/// Host that records payouts in memory. Transfers can be made to fail for
/// testing error paths.
#[derive(Debug, Clone, Default)]
pub struct InMemoryHost {
    payouts: Arc<Mutex<Vec<Payout>>>,
    failing: Arc<AtomicBool>,
}

impl InMemoryHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn payouts(&self) -> Vec<Payout> {
        self.payouts.lock().clone()
    }

    /// Total transferred to `recipient` so far
    pub fn paid_to(&self, recipient: &Principal) -> Amount {
        self.payouts
            .lock()
            .iter()
            .filter(|p| &p.recipient == recipient)
            .map(|p| p.amount)
            .sum()
    }
}

impl Host for InMemoryHost {
    fn transfer_out(&self, recipient: &Principal, amount: Amount) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(RegistryError::TransferFailed(format!(
                "host refused transfer of {} to {}",
                amount, recipient
            )));
        }
        self.payouts.lock().push(Payout {
            recipient: *recipient,
            amount,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KeyPair;

    fn buy_com(beneficiary: Principal) -> Operation {
        Operation::Purchase {
            name: DomainName::parse("com").unwrap(),
            beneficiary,
        }
    }

    #[test]
    fn test_signed_call_yields_signer_principal() {
        let keypair = KeyPair::generate();
        let op = buy_com(keypair.principal());
        let call = SignedCall::sign(&keypair, &op, 42, 1).unwrap();
        let ctx = call.verify_for(&op).unwrap();
        assert_eq!(ctx.caller, keypair.principal());
        assert_eq!(ctx.attached_payment, 42);
    }

    #[test]
    fn test_tampered_payment_rejected() {
        let keypair = KeyPair::generate();
        let op = buy_com(keypair.principal());
        let mut call = SignedCall::sign(&keypair, &op, 42, 1).unwrap();
        call.attached_payment = 43;
        assert!(matches!(call.verify_for(&op), Err(RegistryError::CryptoError(_))));
    }

    #[test]
    fn test_tampered_nonce_rejected() {
        let keypair = KeyPair::generate();
        let mut call = SignedCall::sign(&keypair, &Operation::WithdrawProtocol, 0, 5).unwrap();
        call.nonce = 6;
        assert!(matches!(
            call.verify_for(&Operation::WithdrawProtocol),
            Err(RegistryError::CryptoError(_))
        ));
    }

    #[test]
    fn test_call_only_authorizes_its_operation() {
        let keypair = KeyPair::generate();
        let op = buy_com(keypair.principal());
        let call = SignedCall::sign(&keypair, &op, 42, 1).unwrap();

        let other_beneficiary = buy_com(Principal::from_label("mallory"));
        assert!(matches!(
            call.verify_for(&other_beneficiary),
            Err(RegistryError::Unauthorized(_))
        ));
        assert!(matches!(
            call.verify_for(&Operation::WithdrawProtocol),
            Err(RegistryError::Unauthorized(_))
        ));
    }

    #[test]
    fn test_swapped_public_key_rejected() {
        let alice = KeyPair::generate();
        let mallory = KeyPair::generate();
        let mut call = SignedCall::sign(&alice, &Operation::WithdrawProtocol, 0, 1).unwrap();
        call.public_key = mallory.public_key_bytes().to_vec();
        assert!(call.verify_for(&Operation::WithdrawProtocol).is_err());
    }

    #[test]
    fn test_in_memory_host_records_and_fails() {
        let host = InMemoryHost::new();
        let bob = Principal::from_label("bob");
        host.transfer_out(&bob, 5).unwrap();
        host.transfer_out(&bob, 7).unwrap();
        assert_eq!(host.paid_to(&bob), 12);

        host.set_failing(true);
        assert!(matches!(
            host.transfer_out(&bob, 1),
            Err(RegistryError::TransferFailed(_))
        ));
        assert_eq!(host.payouts().len(), 2);
    }
}
