//! CLI tool for operating the quota ledger
//!
//! # Usage
//!
//! ```bash
//! # Create the tables
//! quota-rs init
//!
//! # Create a root organization quota of 10 GB
//! quota-rs --user u1 --org o1 create-root Acme --kind organization --total-mb 10000
//!
//! # Give 2 GB of it to team T1
//! quota-rs --user u1 --org o1 allocate quota_xxx Platform --kind team --mb 2000 --target-id T1
//!
//! # Track usage against the team quota
//! quota-rs --user u1 --org o1 use quota_yyy vm-42 500 --reason "disk image"
//! ```

use anyhow::Context;
use clap::{Parser, Subcommand};
use quota_rs::config::{Config, LoggingConfig};
use quota_rs::ledger::{open_pool, QuotaKind, QuotaNode};
use quota_rs::oracle::{
    Actor, AuthorizationOracle, Capability, HttpAuthorizationOracle, MemoryOracle,
};
use quota_rs::quota::{
    AllocateRequest, CreateRootRequest, GrantRequest, QuotaManager, UsageRequest,
};
use serde::Serialize;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "quota-rs")]
#[command(about = "Manage hierarchical storage quotas", long_about = None)]
struct Cli {
    /// Configuration file (TOML); QUOTA__SECTION__KEY variables override it
    #[arg(short, long, default_value = "quota.toml")]
    config: PathBuf,

    /// Acting user id
    #[arg(long, global = true, default_value = "")]
    user: String,

    /// Acting user's organization id
    #[arg(long, global = true, default_value = "")]
    org: String,

    /// Team the acting user belongs to (repeatable)
    #[arg(long = "team", global = true)]
    teams: Vec<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the ledger tables (every other command also does this)
    Init,
    /// Create a root quota
    CreateRoot {
        name: String,
        #[arg(long, default_value = "")]
        description: String,
        #[arg(long, value_parser = parse_kind)]
        kind: QuotaKind,
        #[arg(long)]
        total_mb: i64,
        #[arg(long)]
        team_id: Option<String>,
    },
    /// Allocate a child quota from a parent
    Allocate {
        parent_id: String,
        name: String,
        #[arg(long, default_value = "")]
        description: String,
        #[arg(long, value_parser = parse_kind)]
        kind: QuotaKind,
        #[arg(long)]
        mb: i64,
        /// Team id of a team child
        #[arg(long, default_value = "")]
        target_id: String,
        /// User to make admin of the new quota (repeatable)
        #[arg(long = "admin")]
        admins: Vec<String>,
    },
    /// Release an empty quota back to its parent
    Release { quota_id: String },
    /// Allocate usage on a quota
    Use {
        quota_id: String,
        resource_id: String,
        mb: i64,
        #[arg(long, default_value = "")]
        reason: String,
    },
    /// Deallocate usage from a quota
    Free {
        quota_id: String,
        resource_id: String,
        mb: i64,
        #[arg(long, default_value = "")]
        reason: String,
    },
    /// Show a quota
    Get { quota_id: String },
    /// Grant capabilities on a quota to another user
    Grant {
        quota_id: String,
        target_user_id: String,
        #[arg(long = "capability", value_parser = parse_capability, required = true)]
        capabilities: Vec<Capability>,
    },
    /// Show the usage journal and audit trail of a quota
    History { quota_id: String },
    /// Show a quota and every live descendant
    Tree { quota_id: String },
}

fn parse_kind(s: &str) -> Result<QuotaKind, String> {
    QuotaKind::parse(s).map_err(|e| e.to_string())
}

fn parse_capability(s: &str) -> Result<Capability, String> {
    Capability::parse(s).ok_or_else(|| format!("unknown capability: {}", s))
}

/// A node together with its derived headroom
#[derive(Serialize)]
struct NodeReport<'a> {
    #[serde(flatten)]
    node: &'a QuotaNode,
    available_mb: i64,
}

impl<'a> From<&'a QuotaNode> for NodeReport<'a> {
    fn from(node: &'a QuotaNode) -> Self {
        Self {
            node,
            available_mb: node.available_mb(),
        }
    }
}

fn init_logging(config: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    match config.format.as_str() {
        "json" => builder.json().init(),
        "compact" => builder.compact().init(),
        _ => builder.pretty().init(),
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = Config::load(&cli.config).context("failed to load configuration")?;
    config.validate()?;
    init_logging(&config.logging);

    info!("Starting quota-rs");
    info!("  Database: {}", config.storage.database_url);

    let oracle: Arc<dyn AuthorizationOracle> = if config.auth.enabled {
        info!("  Authorization service: {}", config.auth.service_url);
        Arc::new(HttpAuthorizationOracle::from_config(&config.auth)?)
    } else {
        warn!("Authorization disabled, every capability check is allowed");
        Arc::new(MemoryOracle::permissive())
    };

    let pool = open_pool(&config.storage).await?;
    let manager = QuotaManager::new(pool, oracle);

    // Table creation is idempotent, so every command can run on a fresh database
    manager.init_db().await?;

    if cli.user.is_empty() && !matches!(cli.command, Commands::Init) {
        eprintln!("Error: --user is required");
        std::process::exit(1);
    }
    let actor = Actor {
        user_id: cli.user,
        organization_id: cli.org,
        team_ids: cli.teams,
    };

    match cli.command {
        Commands::Init => {
            println!("✓ Ledger tables initialized");
        }
        Commands::CreateRoot {
            name,
            description,
            kind,
            total_mb,
            team_id,
        } => {
            let request = CreateRootRequest {
                name,
                description,
                kind,
                total_mb,
                team_id,
            };
            let node = manager.create_root(&actor, request).await?;
            print_json(&NodeReport::from(&node))?;
        }
        Commands::Allocate {
            parent_id,
            name,
            description,
            kind,
            mb,
            target_id,
            admins,
        } => {
            let request = AllocateRequest {
                name,
                description,
                kind,
                allocate_mb: mb,
                target_id,
                admin_user_ids: admins,
            };
            let allocation = manager.allocate(&actor, &parent_id, request).await?;
            for failure in &allocation.follow_up_failures {
                eprintln!("warning: allocation committed, but {:?}", failure);
            }
            print_json(&json!({
                "node": NodeReport::from(&allocation.node),
                "follow_up_failures": allocation.follow_up_failures,
            }))?;
        }
        Commands::Release { quota_id } => {
            manager.release(&actor, &quota_id).await?;
            println!("✓ Quota {} released", quota_id);
        }
        Commands::Use {
            quota_id,
            resource_id,
            mb,
            reason,
        } => {
            let request = UsageRequest::new(&resource_id, mb, &reason);
            manager.allocate_usage(&actor, &quota_id, &request).await?;
            let node = manager.get_node(&actor, &quota_id).await?;
            print_json(&NodeReport::from(&node))?;
        }
        Commands::Free {
            quota_id,
            resource_id,
            mb,
            reason,
        } => {
            let request = UsageRequest::new(&resource_id, mb, &reason);
            manager.deallocate_usage(&actor, &quota_id, &request).await?;
            let node = manager.get_node(&actor, &quota_id).await?;
            print_json(&NodeReport::from(&node))?;
        }
        Commands::Get { quota_id } => {
            let node = manager.get_node(&actor, &quota_id).await?;
            print_json(&NodeReport::from(&node))?;
        }
        Commands::Grant {
            quota_id,
            target_user_id,
            capabilities,
        } => {
            let request = GrantRequest {
                target_user_id: target_user_id.clone(),
                capabilities,
            };
            manager.grant_capability(&actor, &quota_id, request).await?;
            println!("✓ Granted on {} to {}", quota_id, target_user_id);
        }
        Commands::History { quota_id } => {
            manager.get_node(&actor, &quota_id).await?;
            let usage = manager.usage_journal().for_node(&quota_id).await?;
            let audit = manager.audit_trail().for_node(&quota_id).await?;
            print_json(&json!({ "usage": usage, "audit": audit }))?;
        }
        Commands::Tree { quota_id } => {
            let node = manager.get_node(&actor, &quota_id).await?;
            let descendants = manager.store().subtree(&node).await?;
            let reports: Vec<NodeReport> = std::iter::once(&node)
                .chain(descendants.iter())
                .map(NodeReport::from)
                .collect();
            print_json(&reports)?;
        }
    }

    Ok(())
}
