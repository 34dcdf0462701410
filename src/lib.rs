//! DomainChain - a hierarchical name registry that pays ancestors
//!
//! # Architecture
//!
//! The crate is organized into logical modules:
//!
//! ## Core Engine
//! - [`name`] - Dotted names and ancestor resolution
//! - [`registry`] - Name ownership
//! - [`ledger`] - Purchases, reward splitting and withdrawals
//! - [`access`] - Administrator checks
//! - [`events`] - `DomainRegistered` log
//!
//! ## Host Boundary
//! - [`host`] - Call context, signed calls and outbound transfers
//! - [`crypto`] - Principals and signatures (secp256k1)
//! - [`amount`] - Base-unit amounts and decimal formatting
//!
//! ## State Management
//! - [`state`] - Versioned snapshots and layout migration
//! - [`persistence`] - Database layer (SQLite)
//! - [`service`] - Thread-safe registry handle
//!
//! ## Configuration & Utilities
//! - [`config`] - Configuration management
//! - [`error`] - Error types

#![forbid(unsafe_code)]

// ============================================================================
// Core Engine
// ============================================================================
pub mod access;
pub mod events;
pub mod ledger;
pub mod name;
pub mod registry;

// ============================================================================
// Host Boundary
// ============================================================================
pub mod amount;
pub mod crypto;
pub mod host;

// ============================================================================
// State Management
// ============================================================================
pub mod persistence;
pub mod service;
pub mod state;

// ============================================================================
// Integration
// ============================================================================
#[cfg(feature = "api")]
pub mod api;

// ============================================================================
// Configuration & Utilities
// ============================================================================
pub mod config;
pub mod error;
