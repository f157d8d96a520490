//! # Rusty-Consent Binary
//!
//! Assembles the consent core with the plugins selected at compile time and
//! exposes the lifecycle operations as subcommands. Results go to stdout as
//! JSON; logs go to stderr.

use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use configs::{LogFormat, LogSettings, Settings};
use rc_audit_jsonl::{JsonLinesAudit, TracingAudit};
use rc_core::translate::DecisionInput;
use rc_core::wire::conformance::GrantAll;
use rc_core::{
    AuditSink, CmpProfile, ConsentManager, ConsentStore, Identifier, LegalBasisPolicy,
    RequestMetadata, SubjectKey, Timeouts,
};
use rc_registry_json::JsonFileRegistry;
use secrecy::ExposeSecret;
use serde_json::Value;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

// Feature-gated imports
#[cfg(feature = "db-sqlite")]
use rc_db_sqlite::SqliteConsentStore;

#[cfg(feature = "store-memory")]
use rc_store_memory::MemoryConsentStore;

#[derive(Debug, Parser)]
#[command(name = "rusty-consent", version, about = "Consent lifecycle and wire-string tooling")]
struct Cli {
    /// Settings file; defaults to $RUSTY_CONSENT_CONFIG or ./rusty-consent.toml
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Record a new decision set, superseding the current one.
    Submit {
        site: String,
        user: String,
        /// Decision JSON, tagged `{"format": …, "decisions": …}` or a bare
        /// client/storage/wire payload. `-` reads stdin. Omit to record the
        /// minimal decision set.
        #[arg(long)]
        decisions: Option<String>,
        #[arg(long)]
        language: Option<String>,
        #[arg(long)]
        ip: Option<String>,
        #[arg(long)]
        user_agent: Option<String>,
        #[arg(long)]
        device_type: Option<String>,
        #[arg(long)]
        region: Option<String>,
    },
    /// Print the current valid record.
    Current { site: String, user: String },
    /// Check purposes and vendors against the current record.
    Verify {
        site: String,
        user: String,
        #[arg(long, value_delimiter = ',')]
        purposes: Vec<u32>,
        #[arg(long, value_delimiter = ',')]
        vendors: Vec<u32>,
    },
    /// Revoke the current valid record.
    Revoke { site: String, user: String },
    /// Records whose validity overlaps the window (RFC 3339 bounds).
    History {
        site: String,
        user: String,
        #[arg(long)]
        from: Option<DateTime<Utc>>,
        #[arg(long)]
        to: Option<DateTime<Utc>>,
    },
    /// Decode a wire string into client-format decisions.
    Decode { wire: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let settings = match &cli.config {
        Some(path) => Settings::load_from(path)?,
        None => Settings::load()?,
    };
    init_tracing(&settings.log);
    run(cli.command, &settings).await
}

async fn run(command: Command, settings: &Settings) -> anyhow::Result<()> {
    // Decoding needs no plugins.
    if let Command::Decode { wire } = &command {
        return print_json(&ConsentManager::decode_wire_string(wire)?);
    }

    let manager = build_manager(settings).await?;
    let result = execute(&manager, command).await;
    manager.flush_audit().await;
    result
}

async fn execute(manager: &ConsentManager, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Submit {
            site,
            user,
            decisions,
            language,
            ip,
            user_agent,
            device_type,
            region,
        } => {
            let input = decisions.map(read_decisions).transpose()?.flatten();
            let request = RequestMetadata {
                ip,
                user_agent,
                language,
                device_type,
                region,
            };
            let submission = manager
                .create(SubjectKey::new(site, user), input, request)
                .await?;
            print_json(&submission)
        }
        Command::Current { site, user } => print_json(&manager.get_current_consent(&site, &user).await?),
        Command::Verify {
            site,
            user,
            purposes,
            vendors,
        } => {
            let outcome = manager
                .verify_consent(&site, &user, &identifiers(&purposes)?, &identifiers(&vendors)?)
                .await?;
            print_json(&outcome)
        }
        Command::Revoke { site, user } => print_json(&manager.revoke_consent(&site, &user).await?),
        Command::History { site, user, from, to } => {
            let from = from.unwrap_or(DateTime::UNIX_EPOCH);
            let to = to.unwrap_or_else(Utc::now);
            print_json(&manager.get_history(&site, &user, from, to).await?)
        }
        Command::Decode { wire } => print_json(&ConsentManager::decode_wire_string(&wire)?),
    }
}

fn init_tracing(log: &LogSettings) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log.filter));
    let registry = tracing_subscriber::registry().with(filter);
    match log.format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init(),
        LogFormat::Pretty => registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init(),
    }
}

async fn build_manager(settings: &Settings) -> anyhow::Result<ConsentManager> {
    // 1. Registry
    let registry = JsonFileRegistry::load(&settings.registry.path).await?;

    // 2. Store
    let store = open_store(settings).await?;

    // 3. Audit
    let audit: Arc<dyn AuditSink> = match &settings.audit.path {
        Some(path) => Arc::new(JsonLinesAudit::open(path).await?),
        None => Arc::new(TracingAudit),
    };

    // 4. Policy and CMP identity
    let policy = LegalBasisPolicy {
        consent_only_purposes: identifiers(&settings.policy.consent_only_purposes)?
            .into_iter()
            .collect(),
        enforce_vendor_legitimate_interest: settings.policy.enforce_vendor_legitimate_interest,
    };
    let cmp = &settings.cmp;
    let profile = CmpProfile {
        cmp_id: cmp.id,
        cmp_version: cmp.version,
        consent_screen: cmp.consent_screen,
        consent_language: cmp.consent_language.to_ascii_uppercase(),
        policy_version: cmp.policy_version,
        publisher_country_code: cmp.publisher_country_code.as_ref().map(|c| c.to_ascii_uppercase()),
        is_service_specific: cmp.service_specific,
    };

    let mut manager = ConsentManager::new(Arc::new(registry), store, audit)
        .with_policy(policy)
        .with_profile(profile)
        .with_timeouts(Timeouts {
            registry: Duration::from_millis(settings.timeouts.registry_ms),
            store: Duration::from_millis(settings.timeouts.store_ms),
        });
    if settings.conformance.grant_all {
        manager = manager.with_conformance(Arc::new(GrantAll::from_explicit_opt_in()));
    }
    Ok(manager)
}

async fn open_store(settings: &Settings) -> anyhow::Result<Arc<dyn ConsentStore>> {
    let url = settings.database.url.expose_secret();

    if url.starts_with("memory:") {
        #[cfg(feature = "store-memory")]
        {
            info!("using in-memory consent store");
            return Ok(Arc::new(MemoryConsentStore::new()));
        }
        #[cfg(not(feature = "store-memory"))]
        bail!("database.url selects the memory store, but this build lacks the `store-memory` feature");
    }

    if url.starts_with("sqlite:") {
        #[cfg(feature = "db-sqlite")]
        {
            info!("using sqlite consent store");
            let store = SqliteConsentStore::new(url, settings.database.max_connections).await?;
            return Ok(Arc::new(store));
        }
        #[cfg(not(feature = "db-sqlite"))]
        bail!("database.url selects sqlite, but this build lacks the `db-sqlite` feature");
    }

    bail!("unsupported database.url scheme; expected `sqlite:` or `memory:`")
}

/// Accepts the tagged form first, then falls back to shape detection.
fn read_decisions(raw: String) -> anyhow::Result<Option<DecisionInput>> {
    let raw = if raw == "-" {
        let mut buffer = String::new();
        std::io::stdin()
            .read_to_string(&mut buffer)
            .context("reading decisions from stdin")?;
        buffer
    } else {
        raw
    };

    let value: Value = serde_json::from_str(&raw).context("decisions are not valid JSON")?;
    if value.get("format").is_some() {
        return Ok(Some(serde_json::from_value(value).context("invalid tagged decisions")?));
    }
    Ok(DecisionInput::from_untagged(value)?)
}

fn identifiers(raw: &[u32]) -> anyhow::Result<Vec<Identifier>> {
    raw.iter()
        .map(|n| Identifier::from_u32(*n).with_context(|| format!("identifier {n} must be non-zero")))
        .collect()
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tagged_decisions_from_the_command_line() {
        let input = read_decisions(
            r#"{"format":"client","decisions":{"purposes":{"1":true,"2":false}}}"#.to_string(),
        )
        .unwrap()
        .unwrap();
        let DecisionInput::Client(client) = input else {
            panic!("expected client input");
        };
        assert_eq!(client.purposes.len(), 2);
    }

    #[test]
    fn untagged_decisions_fall_back_to_shape_detection() {
        let input = read_decisions(r#"{"purpose":{"consents":{"1":true}}}"#.to_string())
            .unwrap()
            .unwrap();
        assert!(matches!(input, DecisionInput::Wire(_)));
    }
}
