//! Administrator capability check.

use crate::crypto::Principal;
use crate::error::{RegistryError, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Holds the administrator identity fixed at configure time. It is never
/// rotated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessGuard {
    administrator: Principal,
}

impl AccessGuard {
    pub fn new(administrator: Principal) -> Self {
        AccessGuard { administrator }
    }

    pub fn administrator(&self) -> Principal {
        self.administrator
    }

    pub fn is_administrator(&self, principal: &Principal) -> bool {
        &self.administrator == principal
    }

    /// `Ok(())` for the administrator, `Unauthorized` for anyone else.
    pub fn ensure_administrator(&self, principal: &Principal, operation: &str) -> Result<()> {
        if self.is_administrator(principal) {
            Ok(())
        } else {
            warn!(caller = %principal, operation, "rejected non-administrator call");
            Err(RegistryError::Unauthorized(format!(
                "{} is restricted to the administrator",
                operation
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_administrator_passes() {
        let admin = Principal::from_label("admin");
        let guard = AccessGuard::new(admin);

        assert!(guard.is_administrator(&admin));
        assert!(guard.ensure_administrator(&admin, "withdraw_protocol").is_ok());

        let other = Principal::from_label("other");
        assert!(!guard.is_administrator(&other));
        assert!(matches!(
            guard.ensure_administrator(&other, "withdraw_protocol"),
            Err(RegistryError::Unauthorized(_))
        ));
    }
}
