//! Name registry: the namespace tree and its ownership records.
//!
//! Registrations are create-only. A name that already has an owner can never
//! be registered again, and nothing in this module updates an existing
//! registration.

use crate::crypto::Principal;
use crate::error::{RegistryError, Result};
use crate::name::DomainName;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A single name's ownership record
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Registration {
    pub name: DomainName,
    pub owner: Principal,
    pub registered_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct NameRegistry {
    entries: HashMap<DomainName, Registration>,
    /// Names in registration order
    order: Vec<DomainName>,
}

impl NameRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a registry from registrations in their original order.
    pub fn from_registrations(registrations: Vec<Registration>) -> Result<Self> {
        let mut registry = NameRegistry::new();
        for reg in registrations {
            if registry.entries.contains_key(&reg.name) {
                return Err(RegistryError::AlreadyRegistered(reg.name.to_string()));
            }
            registry.order.push(reg.name.clone());
            registry.entries.insert(reg.name.clone(), reg);
        }
        Ok(registry)
    }

    /// Register `name` to `owner` and return its ancestor chain, nearest first.
    pub fn register(
        &mut self,
        name: &DomainName,
        owner: Principal,
        registered_at: DateTime<Utc>,
    ) -> Result<Vec<DomainName>> {
        if self.entries.contains_key(name) {
            return Err(RegistryError::AlreadyRegistered(name.to_string()));
        }
        self.insert(Registration {
            name: name.clone(),
            owner,
            registered_at,
        });
        Ok(name.ancestors())
    }

    /// Append a registration that has already been checked. Returns false,
    /// leaving the registry untouched, if the name is taken.
    pub(crate) fn insert(&mut self, registration: Registration) -> bool {
        if self.entries.contains_key(&registration.name) {
            return false;
        }
        self.order.push(registration.name.clone());
        self.entries.insert(registration.name.clone(), registration);
        true
    }

    pub fn owner_of(&self, name: &DomainName) -> Result<Principal> {
        self.entries
            .get(name)
            .map(|r| r.owner)
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))
    }

    pub fn registration(&self, name: &DomainName) -> Option<&Registration> {
        self.entries.get(name)
    }

    /// Registration by insertion index (0-based).
    pub fn registration_at(&self, index: usize) -> Option<&Registration> {
        self.order.get(index).and_then(|name| self.entries.get(name))
    }

    pub fn contains(&self, name: &DomainName) -> bool {
        self.entries.contains_key(name)
    }

    pub fn count(&self) -> u64 {
        self.order.len() as u64
    }

    /// All names owned by `owner`, in registration order
    pub fn names_owned_by(&self, owner: &Principal) -> Vec<DomainName> {
        self.iter()
            .filter(|r| &r.owner == owner)
            .map(|r| r.name.clone())
            .collect()
    }

    /// Iterate registrations in registration order
    pub fn iter(&self) -> impl Iterator<Item = &Registration> {
        self.order.iter().filter_map(move |name| self.entries.get(name))
    }
}
