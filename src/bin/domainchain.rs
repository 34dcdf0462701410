#![forbid(unsafe_code)]
//! Command-line front end for a DomainChain registry stored in SQLite.

use chrono::Utc;
use clap::{Parser, Subcommand};
use colored::*;
use comfy_table::presets::UTF8_FULL;
use comfy_table::{Attribute, Cell, ContentArrangement, Table};
use domainchain::amount::{format_amount, parse_amount, Amount};
use domainchain::config::{default_key_path, load_config, Config, DEFAULT_CONFIG_FILE};
use domainchain::crypto::{KeyPair, Principal};
use domainchain::events::EventFilter;
use domainchain::host::{Operation, SignedCall};
use domainchain::name::DomainName;
use domainchain::persistence::{Database, DatabaseHost};
use domainchain::service::Registry;
use domainchain::state::upgrade_from_json;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "domainchain", version, about = "Hierarchical name registry")]
struct Cli {
    /// Configuration file
    #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Database path, overriding the configuration
    #[arg(long)]
    db: Option<String>,

    /// Secret key file (defaults to ~/.domainchain/key.hex)
    #[arg(long)]
    key: Option<PathBuf>,

    /// Log at debug level
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Generate a new secret key
    Keygen {
        /// Overwrite an existing key file
        #[arg(long)]
        force: bool,
    },
    /// Configure the registry (once)
    Init {
        /// Initial price in whole units
        #[arg(long)]
        price: Option<String>,
        /// Administrator principal (hex); defaults to the configured one, then the local key
        #[arg(long)]
        admin: Option<String>,
        #[arg(long)]
        reward_bps: Option<u32>,
    },
    /// Purchase a name
    Buy {
        name: String,
        /// Owner of the new name (hex); defaults to the local key
        #[arg(long)]
        beneficiary: Option<String>,
        /// Payment in whole units; defaults to the current price
        #[arg(long)]
        pay: Option<String>,
    },
    /// Withdraw the reward pool of a name you own
    WithdrawReward { name: String },
    /// Withdraw the protocol pool (administrator)
    WithdrawProtocol,
    /// Set the purchase price (administrator)
    UpdatePrice { price: String },
    /// Show the owner of a name
    Owner { name: String },
    /// Show the reward pool of a name
    Balance { name: String },
    /// Show the protocol pool (administrator)
    ProtocolBalance,
    /// Show everything held by the registry (administrator)
    ContractBalance,
    /// Number of registered names
    Count,
    /// Current purchase price
    Price,
    /// List purchase events
    Events {
        #[arg(long)]
        registrant: Option<String>,
        #[arg(long, default_value_t = 0)]
        from: u64,
        #[arg(long)]
        to: Option<u64>,
    },
    /// Import a layout 1 JSON state file into an empty registry
    MigrateV1 { file: PathBuf },
    /// Serve the read-only HTTP API
    #[cfg(feature = "api")]
    Serve {
        #[arg(long)]
        port: Option<u16>,
    },
}

fn load_keypair(path: &Path) -> Result<KeyPair, Box<dyn std::error::Error>> {
    let secret = fs::read_to_string(path).map_err(|e| {
        eprintln!("{}", "💡 Run 'domainchain keygen' to create a key".yellow());
        format!("No key found at {}: {}", path.display(), e)
    })?;
    Ok(KeyPair::from_secret_hex(secret.trim())?)
}

/// Sign `op` with the key's next unused nonce.
fn sign_next(
    registry: &Registry,
    keypair: &KeyPair,
    op: &Operation,
    payment: Amount,
) -> Result<SignedCall, Box<dyn std::error::Error>> {
    let nonce = registry.next_nonce(&keypair.principal());
    Ok(SignedCall::sign(keypair, op, payment, nonce)?)
}

fn open_registry(
    config: &Config,
    db_override: Option<String>,
) -> Result<(Registry, DatabaseHost), Box<dyn std::error::Error>> {
    let db_path = db_override.unwrap_or_else(|| config.database.path.clone());
    if let Some(parent) = Path::new(&db_path).parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let db = Arc::new(Database::open(&db_path)?);
    let registry = Registry::open(db.clone())?;
    Ok((registry, DatabaseHost::new(db)))
}

fn keygen(key_path: &Path, force: bool) -> Result<(), Box<dyn std::error::Error>> {
    if key_path.exists() && !force {
        return Err(format!(
            "Key already exists at {} (use --force to replace it)",
            key_path.display()
        )
        .into());
    }
    if let Some(parent) = key_path.parent() {
        fs::create_dir_all(parent)?;
    }
    let keypair = KeyPair::generate();
    fs::write(key_path, keypair.secret_hex())?;
    println!("{}", "🔑 Key generated".green().bold());
    println!("   File:      {}", key_path.display());
    println!("   Principal: {}", keypair.principal().to_hex().bright_cyan());
    Ok(())
}

fn parse_principal(hex: &str) -> Result<Principal, Box<dyn std::error::Error>> {
    Ok(Principal::from_hex(hex)?)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::WARN
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    let config = load_config(&cli.config)?;
    let key_path = cli.key.clone().unwrap_or_else(default_key_path);

    let (registry, host) = match cli.command {
        Command::Keygen { force } => return keygen(&key_path, force),
        _ => open_registry(&config, cli.db.clone())?,
    };

    match cli.command {
        // Needs no registry; handled above.
        Command::Keygen { .. } => {}
        Command::Init {
            price,
            admin,
            reward_bps,
        } => {
            let price = match price {
                Some(p) => parse_amount(&p)?,
                None => config.registry.initial_price()?,
            };
            let admin = match admin {
                Some(hex) => parse_principal(&hex)?,
                None => match config.registry.administrator()? {
                    Some(p) => p,
                    None => load_keypair(&key_path)?.principal(),
                },
            };
            let reward_bps = reward_bps.unwrap_or(config.registry.reward_bps);
            registry.configure_with_reward(price, admin, reward_bps)?;
            println!("{}", "✅ Registry configured".green().bold());
            println!("   Administrator: {}", admin.to_hex());
            println!("   Price:         {}", format_amount(price));
            println!("   Reward:        {} bps per ancestor", reward_bps);
        }
        Command::Buy {
            name,
            beneficiary,
            pay,
        } => {
            let keypair = load_keypair(&key_path)?;
            let name = DomainName::parse(&name)?;
            let beneficiary = match beneficiary {
                Some(hex) => parse_principal(&hex)?,
                None => keypair.principal(),
            };
            let payment = match pay {
                Some(p) => parse_amount(&p)?,
                None => registry.price()?,
            };
            let op = Operation::Purchase {
                name: name.clone(),
                beneficiary,
            };
            let call = sign_next(&registry, &keypair, &op, payment)?;
            let event = registry.purchase_signed(&call, &name, beneficiary)?;
            println!(
                "{} {} {}",
                "✅ Purchased".green().bold(),
                event.name.to_string().bright_cyan(),
                format!("(event #{})", event.sequence).dimmed()
            );
            println!("   Owner: {}", beneficiary.to_hex());
            println!("   Paid:  {}", format_amount(payment));
        }
        Command::WithdrawReward { name } => {
            let keypair = load_keypair(&key_path)?;
            let name = DomainName::parse(&name)?;
            let op = Operation::WithdrawReward { name: name.clone() };
            let call = sign_next(&registry, &keypair, &op, 0)?;
            let amount = registry.withdraw_domain_reward_signed(&call, &name, &host)?;
            println!(
                "{} {} from {}",
                "💸 Withdrew".green().bold(),
                format_amount(amount),
                name
            );
        }
        Command::WithdrawProtocol => {
            let keypair = load_keypair(&key_path)?;
            let call = sign_next(&registry, &keypair, &Operation::WithdrawProtocol, 0)?;
            let amount = registry.withdraw_protocol_signed(&call, &host)?;
            println!(
                "{} {} from the protocol pool",
                "💸 Withdrew".green().bold(),
                format_amount(amount)
            );
        }
        Command::UpdatePrice { price } => {
            let keypair = load_keypair(&key_path)?;
            let price = parse_amount(&price)?;
            let call = sign_next(&registry, &keypair, &Operation::UpdatePrice { price }, 0)?;
            registry.update_price_signed(&call, price)?;
            println!("{} {}", "✅ Price set to".green().bold(), format_amount(price));
        }
        Command::Owner { name } => {
            let name = DomainName::parse(&name)?;
            let registration = registry.registration(&name)?;
            println!("{}", registration.owner.to_hex());
            println!(
                "{}",
                format!("registered {}", registration.registered_at.to_rfc3339()).dimmed()
            );
        }
        Command::Balance { name } => {
            let name = DomainName::parse(&name)?;
            println!("{}", format_amount(registry.domain_owner_balance(&name)));
        }
        Command::ProtocolBalance => {
            let keypair = load_keypair(&key_path)?;
            println!(
                "{}",
                format_amount(registry.protocol_balance(&keypair.principal())?)
            );
        }
        Command::ContractBalance => {
            let keypair = load_keypair(&key_path)?;
            println!(
                "{}",
                format_amount(registry.contract_balance(&keypair.principal())?)
            );
        }
        Command::Count => println!("{}", registry.domain_count()),
        Command::Price => println!("{}", format_amount(registry.price()?)),
        Command::Events {
            registrant,
            from,
            to,
        } => {
            let mut filter = match registrant {
                Some(hex) => EventFilter::by_registrant(parse_principal(&hex)?),
                None => EventFilter::all(),
            }
            .from(from);
            if let Some(to) = to {
                filter = filter.to(to);
            }

            let events = registry.events(&filter);
            if events.is_empty() {
                println!("{}", "No matching events".yellow());
                return Ok(());
            }

            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec![
                    Cell::new("#").add_attribute(Attribute::Bold),
                    Cell::new("Name").add_attribute(Attribute::Bold),
                    Cell::new("Registrant").add_attribute(Attribute::Bold),
                    Cell::new("Beneficiary").add_attribute(Attribute::Bold),
                    Cell::new("Time").add_attribute(Attribute::Bold),
                ]);
            for event in &events {
                table.add_row(vec![
                    Cell::new(event.sequence),
                    Cell::new(event.name.as_str()),
                    Cell::new(&event.registrant.to_hex()[..16]),
                    Cell::new(&event.beneficiary.to_hex()[..16]),
                    Cell::new(event.timestamp.format("%Y-%m-%d %H:%M:%S")),
                ]);
            }
            println!("{table}");
            println!("{}", format!("{} event(s)", events.len()).dimmed());
        }
        Command::MigrateV1 { file } => {
            let json = fs::read_to_string(&file)?;
            let snapshot = upgrade_from_json(&json, Utc::now())?;
            let imported = snapshot.registrations.len();
            registry.import_snapshot(snapshot)?;
            println!(
                "{} {} name(s) from {}",
                "✅ Imported".green().bold(),
                imported,
                file.display()
            );
        }
        #[cfg(feature = "api")]
        Command::Serve { port } => {
            let port = port.unwrap_or(config.api.port);
            println!("🚀 API server listening on port {}", port);
            domainchain::api::run_api_server(registry, port).await?;
        }
    }

    Ok(())
}
