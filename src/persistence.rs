//! Database persistence layer for DomainChain

use crate::amount::Amount;
use crate::crypto::Principal;
use crate::error::RegistryError;
use crate::events::DomainRegistered;
use crate::host::{Host, Payout};
use crate::ledger::LedgerSettings;
use crate::access::AccessGuard;
use crate::name::DomainName;
use crate::registry::Registration;
use crate::state::{LedgerSnapshot, StateDelta, SCHEMA_VERSION};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

/// Abstraction for persistence backends. Both save methods must be atomic:
/// a failed save leaves the previously saved state intact.
pub trait Persistence: Send + Sync {
    /// Store a whole snapshot, used on import.
    fn save_snapshot(&self, snapshot: &LedgerSnapshot) -> Result<(), RegistryError>;
    fn load_snapshot(&self) -> Result<Option<LedgerSnapshot>, RegistryError>;
    /// Store the rows changed by `deltas`, applied in order.
    fn save_deltas(&self, deltas: &[StateDelta]) -> Result<(), RegistryError>;
}

pub struct Database {
    conn: Mutex<Connection>,
}

fn db_err(context: &str) -> impl Fn(rusqlite::Error) -> RegistryError + '_ {
    move |e| RegistryError::DatabaseError(format!("{}: {}", context, e))
}

fn parse_amount_column(value: &str) -> Result<Amount, RegistryError> {
    value
        .parse::<Amount>()
        .map_err(|e| RegistryError::DatabaseError(format!("Corrupt amount '{}': {}", value, e)))
}

fn parse_time_column(value: &str) -> Result<DateTime<Utc>, RegistryError> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| RegistryError::DatabaseError(format!("Corrupt timestamp '{}': {}", value, e)))
}

fn put_meta(conn: &Connection, key: &str, value: String) -> Result<(), RegistryError> {
    conn.execute(
        "INSERT OR REPLACE INTO metadata (key, value) VALUES (?1, ?2)",
        params![key, value],
    )
    .map_err(db_err("Failed to save metadata"))?;
    Ok(())
}

fn put_settings(conn: &Connection, settings: &LedgerSettings) -> Result<(), RegistryError> {
    put_meta(conn, "administrator", settings.guard.administrator().to_hex())?;
    put_meta(conn, "price", settings.price.to_string())?;
    put_meta(conn, "reward_bps", settings.reward_bps.to_string())
}

/// `position` of `None` appends after the last stored registration.
fn insert_registration(
    conn: &Connection,
    position: Option<i64>,
    reg: &Registration,
) -> Result<(), RegistryError> {
    conn.execute(
        "INSERT OR IGNORE INTO registrations (position, name, owner, registered_at)
         VALUES (?1, ?2, ?3, ?4)",
        params![
            position,
            reg.name.as_str(),
            reg.owner.to_hex(),
            reg.registered_at.to_rfc3339(),
        ],
    )
    .map_err(db_err("Failed to save registration"))?;
    Ok(())
}

/// A zero balance removes the row.
fn put_reward_balance(conn: &Connection, name: &DomainName, amount: Amount) -> Result<(), RegistryError> {
    let written = if amount == 0 {
        conn.execute("DELETE FROM reward_balances WHERE name = ?1", params![name.as_str()])
    } else {
        conn.execute(
            "INSERT OR REPLACE INTO reward_balances (name, amount) VALUES (?1, ?2)",
            params![name.as_str(), amount.to_string()],
        )
    };
    written.map_err(db_err("Failed to save reward balance"))?;
    Ok(())
}

fn insert_event(conn: &Connection, event: &DomainRegistered) -> Result<(), RegistryError> {
    conn.execute(
        "INSERT OR IGNORE INTO events (sequence, registrant, timestamp, name, beneficiary)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            event.sequence as i64,
            event.registrant.to_hex(),
            event.timestamp.to_rfc3339(),
            event.name.as_str(),
            event.beneficiary.to_hex(),
        ],
    )
    .map_err(db_err("Failed to save event"))?;
    Ok(())
}

fn put_nonce(conn: &Connection, principal: &Principal, nonce: u64) -> Result<(), RegistryError> {
    conn.execute(
        "INSERT OR REPLACE INTO nonces (principal, nonce) VALUES (?1, ?2)",
        params![principal.to_hex(), nonce as i64],
    )
    .map_err(db_err("Failed to save nonce"))?;
    Ok(())
}

impl Database {
    pub fn open(path: &str) -> Result<Self, RegistryError> {
        let conn = Connection::open(path).map_err(db_err("Failed to open database"))?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS metadata (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS registrations (
                position INTEGER PRIMARY KEY,
                name TEXT NOT NULL UNIQUE,
                owner TEXT NOT NULL,
                registered_at TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS reward_balances (
                name TEXT PRIMARY KEY,
                amount TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS events (
                sequence INTEGER PRIMARY KEY,
                registrant TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                name TEXT NOT NULL,
                beneficiary TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS events_registrant ON events (registrant, sequence);
            CREATE TABLE IF NOT EXISTS payouts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                recipient TEXT NOT NULL,
                amount TEXT NOT NULL,
                paid_at TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS nonces (
                principal TEXT PRIMARY KEY,
                nonce INTEGER NOT NULL
            );",
        )
        .map_err(db_err("Failed to create tables"))?;

        Ok(Database {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, RegistryError> {
        self.conn
            .lock()
            .map_err(|_| RegistryError::DatabaseError("Mutex poisoned".to_string()))
    }

    /// Atomically write the snapshot. Registrations and events are
    /// append-only, so only rows not yet stored are inserted; balances and
    /// metadata are rewritten.
    pub fn save_snapshot(&self, snapshot: &LedgerSnapshot) -> Result<(), RegistryError> {
        let conn_guard = self.lock()?;
        let tx = conn_guard
            .unchecked_transaction()
            .map_err(db_err("Failed to start transaction"))?;

        put_meta(&tx, "schema_version", snapshot.schema_version.to_string())?;
        put_meta(&tx, "protocol_balance", snapshot.protocol_balance.to_string())?;
        if let Some(settings) = &snapshot.settings {
            put_settings(&tx, settings)?;
        }

        for (position, reg) in snapshot.registrations.iter().enumerate() {
            insert_registration(&tx, Some(position as i64), reg)?;
        }

        tx.execute("DELETE FROM reward_balances", [])
            .map_err(db_err("Failed to clear reward_balances"))?;
        for (name, amount) in &snapshot.reward_balances {
            put_reward_balance(&tx, name, *amount)?;
        }

        for event in &snapshot.events {
            insert_event(&tx, event)?;
        }

        tx.execute("DELETE FROM nonces", [])
            .map_err(db_err("Failed to clear nonces"))?;
        for (principal, nonce) in &snapshot.nonces {
            put_nonce(&tx, principal, *nonce)?;
        }

        tx.commit().map_err(db_err("Failed to commit transaction"))?;
        Ok(())
    }

    /// Write the rows named by `deltas`, in order, in one transaction.
    pub fn save_deltas(&self, deltas: &[StateDelta]) -> Result<(), RegistryError> {
        let conn_guard = self.lock()?;
        let tx = conn_guard
            .unchecked_transaction()
            .map_err(db_err("Failed to start transaction"))?;

        put_meta(&tx, "schema_version", SCHEMA_VERSION.to_string())?;
        for delta in deltas {
            if let Some(settings) = &delta.settings {
                put_settings(&tx, settings)?;
            }
            if let Some(reg) = &delta.registration {
                insert_registration(&tx, None, reg)?;
            }
            for (name, amount) in &delta.reward_balances {
                put_reward_balance(&tx, name, *amount)?;
            }
            if let Some(balance) = delta.protocol_balance {
                put_meta(&tx, "protocol_balance", balance.to_string())?;
            }
            if let Some(event) = &delta.event {
                insert_event(&tx, event)?;
            }
            if let Some((principal, nonce)) = &delta.nonce {
                put_nonce(&tx, principal, *nonce)?;
            }
        }

        tx.commit().map_err(db_err("Failed to commit transaction"))?;
        Ok(())
    }

    pub fn load_snapshot(&self) -> Result<Option<LedgerSnapshot>, RegistryError> {
        let conn = self.lock()?;

        let mut meta: BTreeMap<String, String> = BTreeMap::new();
        {
            let mut stmt = conn
                .prepare("SELECT key, value FROM metadata")
                .map_err(db_err("Failed to prepare metadata query"))?;
            let rows = stmt
                .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))
                .map_err(db_err("Failed to query metadata"))?;
            for row in rows {
                let (key, value) = row.map_err(db_err("Failed to read metadata row"))?;
                meta.insert(key, value);
            }
        }

        let schema_version = match meta.get("schema_version") {
            Some(v) => v.parse::<u32>().map_err(|e| {
                RegistryError::DatabaseError(format!("Corrupt schema_version '{}': {}", v, e))
            })?,
            None => return Ok(None),
        };

        let settings = match (meta.get("administrator"), meta.get("price"), meta.get("reward_bps")) {
            (Some(admin), Some(price), Some(bps)) => Some(LedgerSettings {
                guard: AccessGuard::new(Principal::from_hex(admin)?),
                price: parse_amount_column(price)?,
                reward_bps: bps.parse::<u32>().map_err(|e| {
                    RegistryError::DatabaseError(format!("Corrupt reward_bps '{}': {}", bps, e))
                })?,
            }),
            (None, None, None) => None,
            (admin, price, bps) => {
                let missing: Vec<&str> = [("administrator", admin), ("price", price), ("reward_bps", bps)]
                    .into_iter()
                    .filter(|(_, value)| value.is_none())
                    .map(|(key, _)| key)
                    .collect();
                return Err(RegistryError::DatabaseError(format!(
                    "incomplete settings: missing {}",
                    missing.join(", ")
                )));
            }
        };

        let protocol_balance = meta
            .get("protocol_balance")
            .map(|v| parse_amount_column(v))
            .transpose()?
            .unwrap_or(0);

        let mut registrations = Vec::new();
        {
            let mut stmt = conn
                .prepare("SELECT name, owner, registered_at FROM registrations ORDER BY position ASC")
                .map_err(db_err("Failed to prepare registrations query"))?;
            let rows = stmt
                .query_map([], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                })
                .map_err(db_err("Failed to query registrations"))?;
            for row in rows {
                let (name, owner, registered_at) =
                    row.map_err(db_err("Failed to read registration"))?;
                registrations.push(Registration {
                    name: DomainName::parse(&name)?,
                    owner: Principal::from_hex(&owner)?,
                    registered_at: parse_time_column(&registered_at)?,
                });
            }
        }

        let mut reward_balances = BTreeMap::new();
        {
            let mut stmt = conn
                .prepare("SELECT name, amount FROM reward_balances")
                .map_err(db_err("Failed to prepare reward query"))?;
            let rows = stmt
                .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))
                .map_err(db_err("Failed to query reward balances"))?;
            for row in rows {
                let (name, amount) = row.map_err(db_err("Failed to read reward balance"))?;
                reward_balances.insert(DomainName::parse(&name)?, parse_amount_column(&amount)?);
            }
        }

        let mut events = Vec::new();
        {
            let mut stmt = conn
                .prepare(
                    "SELECT sequence, registrant, timestamp, name, beneficiary
                     FROM events ORDER BY sequence ASC",
                )
                .map_err(db_err("Failed to prepare events query"))?;
            let rows = stmt
                .query_map([], |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                    ))
                })
                .map_err(db_err("Failed to query events"))?;
            for row in rows {
                let (sequence, registrant, timestamp, name, beneficiary) =
                    row.map_err(db_err("Failed to read event"))?;
                events.push(DomainRegistered {
                    sequence: sequence as u64,
                    registrant: Principal::from_hex(&registrant)?,
                    timestamp: parse_time_column(&timestamp)?,
                    name: DomainName::parse(&name)?,
                    beneficiary: Principal::from_hex(&beneficiary)?,
                });
            }
        }

        let mut nonces = Vec::new();
        {
            let mut stmt = conn
                .prepare("SELECT principal, nonce FROM nonces ORDER BY principal ASC")
                .map_err(db_err("Failed to prepare nonce query"))?;
            let rows = stmt
                .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))
                .map_err(db_err("Failed to query nonces"))?;
            for row in rows {
                let (principal, nonce) = row.map_err(db_err("Failed to read nonce"))?;
                nonces.push((Principal::from_hex(&principal)?, nonce as u64));
            }
        }
        nonces.sort();

        Ok(Some(LedgerSnapshot {
            schema_version,
            settings,
            registrations,
            reward_balances,
            protocol_balance,
            events,
            nonces,
        }))
    }

    pub fn record_payout(&self, payout: &Payout) -> Result<(), RegistryError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO payouts (recipient, amount, paid_at) VALUES (?1, ?2, ?3)",
            params![
                payout.recipient.to_hex(),
                payout.amount.to_string(),
                Utc::now().to_rfc3339()
            ],
        )
        .map_err(db_err("Failed to record payout"))?;
        Ok(())
    }

    /// Sum of all payouts recorded for `recipient`
    pub fn paid_to(&self, recipient: &Principal) -> Result<Amount, RegistryError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT amount FROM payouts WHERE recipient = ?1")
            .map_err(db_err("Failed to prepare payout query"))?;
        let rows = stmt
            .query_map(params![recipient.to_hex()], |row| row.get::<_, String>(0))
            .map_err(db_err("Failed to query payouts"))?;

        let mut total: Amount = 0;
        for row in rows {
            let amount = parse_amount_column(&row.map_err(db_err("Failed to read payout"))?)?;
            total = total
                .checked_add(amount)
                .ok_or(RegistryError::ArithmeticOverflow)?;
        }
        Ok(total)
    }

    pub fn schema_version(&self) -> Result<Option<u32>, RegistryError> {
        let conn = self.lock()?;
        let value: Option<String> = conn
            .query_row(
                "SELECT value FROM metadata WHERE key = 'schema_version'",
                [],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_err("Failed to read schema_version"))?;
        value
            .map(|v| {
                v.parse::<u32>().map_err(|e| {
                    RegistryError::DatabaseError(format!("Corrupt schema_version '{}': {}", v, e))
                })
            })
            .transpose()
    }
}

impl Persistence for Database {
    fn save_snapshot(&self, snapshot: &LedgerSnapshot) -> Result<(), RegistryError> {
        Database::save_snapshot(self, snapshot)
    }

    fn load_snapshot(&self) -> Result<Option<LedgerSnapshot>, RegistryError> {
        Database::load_snapshot(self)
    }

    fn save_deltas(&self, deltas: &[StateDelta]) -> Result<(), RegistryError> {
        Database::save_deltas(self, deltas)
    }
}

/// Host that settles withdrawals by recording them in the `payouts` table,
/// for deployments where an external settlement process drains that table.
#[derive(Clone)]
pub struct DatabaseHost {
    db: Arc<Database>,
}

impl DatabaseHost {
    pub fn new(db: Arc<Database>) -> Self {
        DatabaseHost { db }
    }
}

impl Host for DatabaseHost {
    fn transfer_out(&self, recipient: &Principal, amount: Amount) -> Result<(), RegistryError> {
        self.db
            .record_payout(&Payout {
                recipient: *recipient,
                amount,
            })
            .map_err(|e| RegistryError::TransferFailed(e.to_string()))
    }
}

/// Simple in-memory persistence implementation useful for tests and ephemeral runs.
#[derive(Clone, Default)]
pub struct InMemoryPersistence {
    pub snapshot: Arc<Mutex<Option<LedgerSnapshot>>>,
}

impl InMemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Persistence for InMemoryPersistence {
    fn save_snapshot(&self, snapshot: &LedgerSnapshot) -> Result<(), RegistryError> {
        let mut slot = self
            .snapshot
            .lock()
            .map_err(|_| RegistryError::DatabaseError("Mutex poisoned".to_string()))?;
        *slot = Some(snapshot.clone());
        Ok(())
    }

    fn load_snapshot(&self) -> Result<Option<LedgerSnapshot>, RegistryError> {
        let slot = self
            .snapshot
            .lock()
            .map_err(|_| RegistryError::DatabaseError("Mutex poisoned".to_string()))?;
        Ok(slot.clone())
    }

    fn save_deltas(&self, deltas: &[StateDelta]) -> Result<(), RegistryError> {
        let mut slot = self
            .snapshot
            .lock()
            .map_err(|_| RegistryError::DatabaseError("Mutex poisoned".to_string()))?;
        let snapshot = slot.get_or_insert_with(LedgerSnapshot::default);
        for delta in deltas {
            snapshot.apply_delta(delta);
        }
        Ok(())
    }
}
