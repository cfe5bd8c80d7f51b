//! Gatehouse admin CLI
//!
//! Bootstrap resources from a manifest, inspect the catalog, manage role
//! membership and run decisions against a local database.
//!
//! # Usage
//!
//! ```bash
//! GATEHOUSE_DATA_DIR=/var/lib/gatehouse gatehouse register resources.json
//! gatehouse create-permission dashboard.users manage
//! gatehouse create-role admin --permission 1
//! gatehouse grant-role u1 admin
//! gatehouse check u1 dashboard.users delete && echo allowed
//! ```
//!
//! `check` exits 0 on allow and 1 on deny. Logs go to stderr; `RUST_LOG`
//! controls verbosity.

use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use serde::Serialize;

use gatehouse_authz::{
    Action, Gatehouse, GatehouseConfig, PermissionId, Principal, PrincipalId, ResourceSpec,
    ResourceType,
};

#[derive(Parser)]
#[command(name = "gatehouse")]
#[command(about = "Administer and query a Gatehouse authorization store")]
#[command(version)]
struct Cli {
    /// Directory holding the database
    #[arg(long, global = true, env = "GATEHOUSE_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Deny every decision for inactive principals
    #[arg(long, global = true)]
    deny_inactive: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register resources from a JSON manifest (an array of resource specs)
    Register {
        #[arg(value_name = "MANIFEST")]
        manifest: PathBuf,
    },
    /// List registered resources
    Resources,
    /// List permissions
    Permissions,
    /// List roles
    Roles,
    /// Get or create the permission for a resource and action
    CreatePermission {
        resource_key: String,
        action: Action,
        /// Resource type; defaults to the registered resource's type
        #[arg(long = "type")]
        resource_type: Option<ResourceType>,
    },
    /// Create a role
    CreateRole {
        name: String,
        #[arg(long)]
        description: Option<String>,
        /// Permission id to include (repeatable)
        #[arg(long = "permission")]
        permissions: Vec<PermissionId>,
    },
    /// Add a principal to a role, creating the principal if needed
    GrantRole {
        principal: String,
        /// Role name (case-insensitive)
        role: String,
    },
    /// Decide whether a principal may perform an action on a resource
    Check {
        principal: String,
        resource_key: String,
        action: Action,
    },
    /// List resource keys a principal holds any grant on
    Accessible { principal: String },
}

fn main() -> anyhow::Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("gatehouse_store=info".parse()?)
                .add_directive("gatehouse_authz=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = GatehouseConfig::from_env();
    if let Some(data_dir) = cli.data_dir {
        config.data_dir = data_dir;
    }
    config.engine.deny_inactive_principals |= cli.deny_inactive;

    let gate = Gatehouse::open(&config)
        .with_context(|| format!("opening store in {}", config.data_dir.display()))?;
    let code = run(&gate, cli.command)?;
    gate.close()?;
    Ok(code)
}

fn run(gate: &Gatehouse, command: Commands) -> anyhow::Result<ExitCode> {
    match command {
        Commands::Register { manifest } => {
            let raw = fs::read_to_string(&manifest)
                .with_context(|| format!("reading {}", manifest.display()))?;
            let specs: Vec<ResourceSpec> = serde_json::from_str(&raw)
                .with_context(|| format!("parsing {}", manifest.display()))?;
            let registered = gate.register_resources(specs)?;
            tracing::info!(count = registered.len(), "manifest registered");
            print_json(&registered)?;
        }
        Commands::Resources => print_json(&gate.list_resources()?)?,
        Commands::Permissions => print_json(&gate.list_permissions()?)?,
        Commands::Roles => print_json(&gate.list_roles()?)?,
        Commands::CreatePermission {
            resource_key,
            action,
            resource_type,
        } => {
            let resource_type = match resource_type {
                Some(t) => t,
                None => match gate.registry().find_by_key(&resource_key)? {
                    Some(resource) => resource.resource_type,
                    None => bail!("resource {resource_key} is not registered; pass --type"),
                },
            };
            print_json(&gate.create_permission(&resource_key, resource_type, action)?)?;
        }
        Commands::CreateRole {
            name,
            description,
            permissions,
        } => {
            print_json(&gate.create_role(&name, description.as_deref(), permissions)?)?;
        }
        Commands::GrantRole { principal, role } => {
            let Some(role) = gate.roles().find_by_name(&role)? else {
                bail!("role {role} not found");
            };
            let id = PrincipalId::from(principal);
            let directory = gate.principals();
            if directory.get(&id)?.is_none() {
                directory.upsert(&Principal::new(id.clone()))?;
            }
            print_json(&directory.assign_role(&id, role.id)?)?;
        }
        Commands::Check {
            principal,
            resource_key,
            action,
        } => {
            let allowed = gate.can_perform(&PrincipalId::from(principal), &resource_key, action);
            println!("{}", if allowed { "allow" } else { "deny" });
            return Ok(if allowed {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            });
        }
        Commands::Accessible { principal } => {
            print_json(&gate.accessible_resources(&PrincipalId::from(principal)))?;
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
