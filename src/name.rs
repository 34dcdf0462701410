//! Dotted domain names and their ancestor chains.

use crate::error::{RegistryError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Maximum number of labels in a name. A name can therefore have at most
/// `MAX_LABELS - 1` ancestors.
pub const MAX_LABELS: usize = 20;
pub const MAX_ANCESTORS: usize = MAX_LABELS - 1;

const MAX_LABEL_LENGTH: usize = 63;
const MAX_NAME_LENGTH: usize = 253;

/// A validated, dot-delimited domain name such as `buy2.buy1.com`.
///
/// Names are case-sensitive and stored exactly as given.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DomainName(String);

impl DomainName {
    pub fn parse(name: &str) -> Result<Self> {
        validate_name(name)?;
        Ok(DomainName(name.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn label_count(&self) -> usize {
        self.0.split('.').count()
    }

    /// The nearest ancestor, or `None` for a bare label.
    pub fn parent(&self) -> Option<DomainName> {
        self.0
            .split_once('.')
            .map(|(_, rest)| DomainName(rest.to_string()))
    }

    /// Ordered ancestor chain, nearest first: `a.b.c` -> `[b.c, c]`.
    pub fn ancestors(&self) -> Vec<DomainName> {
        let mut chain = Vec::with_capacity(self.label_count().saturating_sub(1));
        let mut rest = self.0.as_str();
        while let Some((_, suffix)) = rest.split_once('.') {
            chain.push(DomainName(suffix.to_string()));
            rest = suffix;
        }
        chain
    }

    pub fn is_top_level(&self) -> bool {
        !self.0.contains('.')
    }
}

impl fmt::Display for DomainName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for DomainName {
    type Error = RegistryError;

    fn try_from(value: String) -> Result<Self> {
        validate_name(&value)?;
        Ok(DomainName(value))
    }
}

impl From<DomainName> for String {
    fn from(name: DomainName) -> Self {
        name.0
    }
}

impl AsRef<str> for DomainName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(RegistryError::InvalidName("Name cannot be empty".to_string()));
    }

    if name.len() > MAX_NAME_LENGTH {
        return Err(RegistryError::InvalidName(format!(
            "Name too long (max {} characters)",
            MAX_NAME_LENGTH
        )));
    }

    let mut labels = 0usize;
    for label in name.split('.') {
        labels += 1;
        if label.is_empty() {
            return Err(RegistryError::InvalidName(format!(
                "'{}' contains an empty label",
                name
            )));
        }
        if label.len() > MAX_LABEL_LENGTH {
            return Err(RegistryError::InvalidName(format!(
                "Label '{}' too long (max {} characters)",
                label, MAX_LABEL_LENGTH
            )));
        }
        if !label
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(RegistryError::InvalidName(format!(
                "Label '{}' contains invalid characters",
                label
            )));
        }
    }

    if labels > MAX_LABELS {
        return Err(RegistryError::DepthExceeded {
            name: name.to_string(),
            labels,
            max: MAX_LABELS,
        });
    }

    Ok(())
}
