//! CLI front end: a thin shell around `Engine::dispatch`.
//!
//! Every command prints a JSON envelope on stdout; diagnostics go to
//! stderr. Exit codes: 0 success, 1 generic failure, 2 invalid input,
//! 3 not found, 4 physics violation.

use clap::{Parser, Subcommand};
use colored::Colorize;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::core::engine::{DispatchOptions, Engine};
use crate::core::error::ChoraError;
use crate::core::model::QueryFilter;
use crate::core::store::Store;
use crate::core::time::now_iso;
use crate::invitation::{self, Invitation};
use crate::keyring::{Keyring, SyncPolicy};
use crate::metabolism;
use crate::pulse::{Pulse, PulseConfig};

#[derive(Parser, Debug)]
#[clap(
    name = "chora",
    version = env!("CARGO_PKG_VERSION"),
    about = "An event-sourced graph virtual machine"
)]
struct Cli {
    /// Path to the graph database.
    #[clap(long, default_value = "chora.db", global = true)]
    db: PathBuf,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Initialize the database and pulse config
    Init,

    /// Dispatch an intent (protocol or primitive)
    #[clap(visible_alias = "i")]
    Invoke {
        intent: String,
        /// JSON object of inputs
        #[clap(long, default_value = "{}")]
        inputs: String,
        #[clap(long)]
        persona: Option<String>,
        /// Deadline for the whole dispatch
        #[clap(long)]
        timeout_seconds: Option<u64>,
    },

    /// List protocols and primitives
    Capabilities,

    /// Pulse: signal metabolism
    Pulse {
        #[clap(subcommand)]
        command: PulseCommand,
    },

    /// Entity access
    Entity {
        #[clap(subcommand)]
        command: EntityCommand,
    },

    /// 1-hop bond neighborhood of an entity
    Constellation { id: String },

    /// Ranked search (semantic when available, FTS5 otherwise)
    Search {
        query: String,
        #[clap(long)]
        r#type: Option<String>,
        #[clap(long, default_value_t = 10)]
        limit: u32,
    },

    /// Archive an entity, digesting its bonds into a learning
    Compost {
        id: String,
        #[clap(long)]
        force: bool,
    },

    /// Show the tail of the event log
    Events {
        #[clap(long, default_value_t = 20)]
        limit: u32,
    },

    /// Keyring: identity and circle bindings
    Keyring {
        #[clap(subcommand)]
        command: KeyringCommand,
    },

    /// Circle invitations
    Invite {
        #[clap(subcommand)]
        command: InviteCommand,
    },
}

#[derive(Subcommand, Debug)]
enum PulseCommand {
    /// Run one pulse now
    Run,
    /// Show what a pulse would process, without writes
    Preview,
    /// Recent pulse summaries
    Status {
        #[clap(long, default_value_t = 10)]
        limit: u32,
    },
    /// Run the pulse on its configured interval (blocking)
    Loop,
}

#[derive(Subcommand, Debug)]
enum EntityCommand {
    Get { id: String },
    Query {
        #[clap(long)]
        r#type: Option<String>,
        #[clap(long)]
        status: Option<String>,
        #[clap(long)]
        since: Option<String>,
        #[clap(long, default_value_t = 50)]
        limit: u32,
    },
}

#[derive(Subcommand, Debug)]
enum KeyringCommand {
    /// Show the keyring (keys stay opaque)
    Show {
        #[clap(long)]
        path: Option<PathBuf>,
    },
    /// Create a keyring for a user id
    Init {
        user_id: String,
        #[clap(long)]
        path: Option<PathBuf>,
    },
    /// Bind a circle with a sync policy
    Bind {
        circle_id: String,
        #[clap(long, default_value = "local-only")]
        policy: String,
        #[clap(long)]
        path: Option<PathBuf>,
    },
}

#[derive(Subcommand, Debug)]
enum InviteCommand {
    /// Seal a circle key for a recipient public key
    Create {
        username: String,
        circle_id: String,
        /// Recipient X25519 public key, base64
        #[clap(long)]
        recipient_b64: String,
        /// Circle key, base64 (defaults to the keyring binding)
        #[clap(long)]
        key_b64: Option<String>,
        #[clap(long, default_value = ".chora/access")]
        access_dir: PathBuf,
        #[clap(long)]
        keyring_path: Option<PathBuf>,
    },
    /// Decrypt an invitation with a private key
    Accept {
        file: PathBuf,
        /// Recipient X25519 private key, base64
        #[clap(long)]
        secret_b64: String,
    },
    /// List invited members of a circle
    Members {
        circle_id: String,
        #[clap(long, default_value = ".chora/access")]
        access_dir: PathBuf,
    },
}

fn envelope(cmd: &str, status: &str, extra: Value) -> Value {
    let mut base = json!({ "ts": now_iso(), "cmd": cmd, "status": status });
    if let (Some(obj), Some(extra_obj)) = (base.as_object_mut(), extra.as_object()) {
        for (k, v) in extra_obj {
            obj.insert(k.clone(), v.clone());
        }
    }
    base
}

fn print_envelope(cmd: &str, status: &str, extra: Value) {
    println!(
        "{}",
        serde_json::to_string_pretty(&envelope(cmd, status, extra)).unwrap_or_default()
    );
}

/// Run the CLI; returns the process exit code.
pub fn run() -> i32 {
    let cli = Cli::parse();
    match execute(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {}", "error:".bright_red(), e);
            e.kind().exit_code()
        }
    }
}

fn open_engine(db: &PathBuf) -> Result<Arc<Engine>, ChoraError> {
    let store = Store::open(db)?;
    Ok(Arc::new(Engine::new(store)))
}

fn execute(cli: Cli) -> Result<i32, ChoraError> {
    match cli.command {
        Command::Init => {
            let store = Store::open(&cli.db)?;
            let config_path = PulseConfig::path_for(&cli.db);
            if !config_path.exists() {
                PulseConfig::default().save(&config_path)?;
            }
            println!();
            println!(
                "  {} {}",
                "◉".bright_magenta().bold(),
                "C H O R A".bright_white().bold()
            );
            println!(
                "  {} graph store ready at {}",
                "●".bright_green(),
                store.path().display()
            );
            println!(
                "  {} pulse config at {}",
                "●".bright_green(),
                config_path.display()
            );
            if !store.fts_available() {
                println!(
                    "  {} FTS5 unavailable in this SQLite build; search degrades",
                    "⚠".bright_yellow()
                );
            }
            println!();
            Ok(0)
        }

        Command::Invoke {
            intent,
            inputs,
            persona,
            timeout_seconds,
        } => {
            let engine = open_engine(&cli.db)?;
            let inputs: Value = serde_json::from_str(&inputs)
                .map_err(|e| ChoraError::InvalidData(format!("inputs must be JSON: {}", e)))?;
            let opts = DispatchOptions {
                persona_id: persona,
                deadline: timeout_seconds.map(|s| Instant::now() + Duration::from_secs(s)),
                ..Default::default()
            };
            let result = engine.dispatch(&intent, inputs, opts);
            println!(
                "{}",
                serde_json::to_string_pretty(&result.to_value()).unwrap_or_default()
            );
            Ok(result
                .error_kind
                .map(|k| k.exit_code())
                .unwrap_or(0))
        }

        Command::Capabilities => {
            let engine = open_engine(&cli.db)?;
            let capabilities = engine.capabilities()?;
            let count = capabilities.len();
            print_envelope(
                "capabilities",
                "ok",
                json!({ "count": count, "capabilities": capabilities }),
            );
            Ok(0)
        }

        Command::Pulse { command } => {
            let engine = open_engine(&cli.db)?;
            let config = PulseConfig::load(&PulseConfig::path_for(&cli.db))?;
            let pulse = Pulse::new(engine, config);
            match command {
                PulseCommand::Run => {
                    let summary = pulse.run_once()?;
                    print_envelope("pulse.run", "ok", json!({ "summary": summary }));
                }
                PulseCommand::Preview => {
                    let preview = pulse.preview()?;
                    print_envelope("pulse.preview", "ok", json!({ "preview": preview }));
                }
                PulseCommand::Status { limit } => {
                    let status = pulse.status(limit)?;
                    print_envelope("pulse.status", "ok", json!({ "history": status }));
                }
                PulseCommand::Loop => {
                    pulse.run_loop()?;
                }
            }
            Ok(0)
        }

        Command::Entity { command } => {
            let engine = open_engine(&cli.db)?;
            match command {
                EntityCommand::Get { id } => {
                    let entity = engine.store().require_entity(&id)?;
                    print_envelope("entity.get", "ok", json!({ "entity": entity }));
                }
                EntityCommand::Query {
                    r#type,
                    status,
                    since,
                    limit,
                } => {
                    let rows = engine.store().query_entities(&QueryFilter {
                        entity_type: r#type,
                        status,
                        since,
                        limit: Some(limit),
                        ..Default::default()
                    })?;
                    let count = rows.len();
                    print_envelope(
                        "entity.query",
                        "ok",
                        json!({ "count": count, "rows": rows }),
                    );
                }
            }
            Ok(0)
        }

        Command::Constellation { id } => {
            let engine = open_engine(&cli.db)?;
            let constellation = engine.store().get_constellation(&id)?;
            print_envelope("constellation", "ok", json!({ "constellation": constellation }));
            Ok(0)
        }

        Command::Search { query, r#type, limit } => {
            let engine = open_engine(&cli.db)?;
            let results = crate::semantic::semantic_search(
                engine.store(),
                None,
                &query,
                r#type.as_deref(),
                limit,
            )?;
            print_envelope("search", "ok", results);
            Ok(0)
        }

        Command::Compost { id, force } => {
            let engine = open_engine(&cli.db)?;
            let result = metabolism::compost(engine.store(), &id, force)?;
            print_envelope("compost", "ok", result);
            Ok(0)
        }

        Command::Events { limit } => {
            let engine = open_engine(&cli.db)?;
            let events = engine.store().recent_events(limit)?;
            print_envelope("events", "ok", json!({ "events": events }));
            Ok(0)
        }

        Command::Keyring { command } => match command {
            KeyringCommand::Show { path } => {
                let path = path.unwrap_or_else(Keyring::default_path);
                let keyring = Keyring::load(&path)?;
                print_envelope(
                    "keyring.show",
                    "ok",
                    json!({ "path": path, "keyring": keyring }),
                );
                Ok(0)
            }
            KeyringCommand::Init { user_id, path } => {
                let path = path.unwrap_or_else(Keyring::default_path);
                Keyring::new(&user_id).save(&path)?;
                print_envelope("keyring.init", "ok", json!({ "path": path }));
                Ok(0)
            }
            KeyringCommand::Bind {
                circle_id,
                policy,
                path,
            } => {
                let path = path.unwrap_or_else(Keyring::default_path);
                let mut keyring = Keyring::load(&path)?;
                let policy = match policy.as_str() {
                    "cloud" => SyncPolicy::Cloud,
                    "local-only" => SyncPolicy::LocalOnly,
                    other => {
                        return Err(ChoraError::InvalidData(format!(
                            "policy must be cloud or local-only, got {}",
                            other
                        )))
                    }
                };
                keyring.bind(circle_id.as_str(), policy, None);
                keyring.save(&path)?;
                print_envelope(
                    "keyring.bind",
                    "ok",
                    json!({ "circle_id": circle_id, "path": path }),
                );
                Ok(0)
            }
        },

        Command::Invite { command } => match command {
            InviteCommand::Create {
                username,
                circle_id,
                recipient_b64,
                key_b64,
                access_dir,
                keyring_path,
            } => {
                use base64::Engine as _;
                let recipient_bytes: [u8; 32] = base64::engine::general_purpose::STANDARD
                    .decode(&recipient_b64)
                    .ok()
                    .and_then(|v| v.try_into().ok())
                    .ok_or_else(|| {
                        ChoraError::InvalidData("recipient key must be 32 base64 bytes".into())
                    })?;
                let recipient = x25519_dalek::PublicKey::from(recipient_bytes);

                let circle_key = match key_b64 {
                    Some(encoded) => base64::engine::general_purpose::STANDARD
                        .decode(&encoded)
                        .map_err(|e| ChoraError::InvalidData(format!("bad circle key: {}", e)))?,
                    None => {
                        let path = keyring_path.unwrap_or_else(Keyring::default_path);
                        Keyring::load(&path)?
                            .encryption_key(&circle_id)?
                            .ok_or_else(|| {
                                ChoraError::DependencyUnavailable(format!(
                                    "no encryption key bound for {}",
                                    circle_id
                                ))
                            })?
                    }
                };

                let invitation =
                    Invitation::create(&username, &circle_id, &circle_key, &recipient)?;
                let path = invitation.to_file(&access_dir)?;
                print_envelope("invite.create", "ok", json!({ "path": path }));
                Ok(0)
            }
            InviteCommand::Accept { file, secret_b64 } => {
                use base64::Engine as _;
                let secret_bytes: [u8; 32] = base64::engine::general_purpose::STANDARD
                    .decode(&secret_b64)
                    .ok()
                    .and_then(|v| v.try_into().ok())
                    .ok_or_else(|| {
                        ChoraError::InvalidData("secret key must be 32 base64 bytes".into())
                    })?;
                let secret = x25519_dalek::StaticSecret::from(secret_bytes);
                let invitation = Invitation::from_file(&file)?;
                let circle_key = invitation.accept(&secret)?;
                print_envelope(
                    "invite.accept",
                    "ok",
                    json!({
                        "circle_id": invitation.circle_id,
                        "circle_key_b64":
                            base64::engine::general_purpose::STANDARD.encode(circle_key),
                    }),
                );
                Ok(0)
            }
            InviteCommand::Members {
                circle_id,
                access_dir,
            } => {
                let members = invitation::list_members(&access_dir, &circle_id)?;
                print_envelope("invite.members", "ok", json!({ "members": members }));
                Ok(0)
            }
        },
    }
}
