// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! RPC host control tool
//!
//! Hosts the service types of an assembly manifest and calls running
//! endpoints.
//!
//! # Usage
//!
//! ```bash
//! # Host every service type listed by host.toml until Ctrl+C
//! rpchostctl host --config host.toml
//!
//! # Show what would be hosted
//! rpchostctl info --config host.toml
//!
//! # Call an operation
//! rpchostctl call --address http://localhost:8080/Demo.ICalculator \
//!     --contract Demo.ICalculator --operation Add --body '{"a": 1, "b": 2}'
//! ```
//!
//! Service types without a registered implementation are hosted with an
//! echo implementation that replies with the request body.

mod config;

use clap::{Parser, Subcommand};
use config::{ClientSection, HostFile};
use rpchost::{
    service_fn, ContractDescription, EndpointDescriptor, HostManager, ServiceAddress,
    ServiceAssembly, ServiceClient, ServiceModelConfig, ServiceTypeResolver, TypeRegistry,
};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// RPC endpoint host
#[derive(Parser, Debug)]
#[command(name = "rpchostctl")]
#[command(about = "Host RPC services and call running endpoints")]
#[command(version)]
struct Args {
    /// Log level (trace, debug, info, warn, error); defaults to RUST_LOG or the host file
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Open the listeners of a host file and serve until Ctrl+C
    Host {
        /// Host file path
        #[arg(short, long)]
        config: PathBuf,
    },

    /// Resolve the service types of a host file without opening them
    Info {
        /// Host file path
        #[arg(short, long)]
        config: PathBuf,
    },

    /// Invoke an operation on a running endpoint
    Call {
        /// Endpoint address
        #[arg(short, long)]
        address: String,

        /// Contract full name
        #[arg(long)]
        contract: String,

        /// Contract namespace, if not the default
        #[arg(long)]
        namespace: Option<String>,

        /// Operation name
        #[arg(short, long)]
        operation: String,

        /// JSON request body
        #[arg(short, long, default_value = "null")]
        body: String,

        /// Do not wait for a reply
        #[arg(long)]
        one_way: bool,

        /// Binding type name; derived from the address scheme if omitted
        #[arg(long)]
        binding: Option<String>,

        /// User name for user-name credentials
        #[arg(long, requires = "password")]
        user: Option<String>,

        /// Password for user-name credentials
        #[arg(long, requires = "user")]
        password: Option<String>,

        /// Host file providing client defaults
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Host file first, so its log level applies
    let host_file = match &args.command {
        Commands::Host { config } | Commands::Info { config } => Some(HostFile::from_file(config)?),
        Commands::Call { config, .. } => config.as_ref().map(HostFile::from_file).transpose()?,
    };

    init_logging(args.log_level.as_deref(), host_file.as_ref());

    match args.command {
        Commands::Host { .. } => match host_file {
            Some(file) => cmd_host(&file),
            None => Err("host file required".into()),
        },
        Commands::Info { .. } => match host_file {
            Some(file) => cmd_info(&file),
            None => Err("host file required".into()),
        },
        Commands::Call {
            address,
            contract,
            namespace,
            operation,
            body,
            one_way,
            binding,
            user,
            password,
            ..
        } => {
            let client_defaults = host_file.map(|f| f.client).unwrap_or_default();
            let request = CallRequest {
                address,
                contract,
                namespace,
                operation,
                body,
                one_way,
                binding,
                credentials: user.zip(password),
            };
            cmd_call(&request, &client_defaults)
        }
    }
}

fn init_logging(cli_level: Option<&str>, file: Option<&HostFile>) {
    let filter = match cli_level {
        Some(level) => EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info")),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            let level = file.map_or("info", |f| f.log_level.as_str());
            EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"))
        }),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// Register an echo implementation for every type of the manifest that has none.
fn register_echo_services(manifest: &Path) -> Result<(), rpchost::Error> {
    let registry = TypeRegistry::global();
    let assembly = ServiceAssembly::load_with_registry(manifest, &TypeRegistry::new())?;
    for ty in assembly.types() {
        if ty.is_abstract() || registry.get(ty.full_name()).is_some() {
            continue;
        }
        let name = ty.full_name().to_string();
        tracing::info!("No implementation for {}, serving echo", name);
        registry.register(ty.full_name(), move || {
            let name = name.clone();
            service_fn(move |op, body| {
                tracing::info!("{}.{}({})", name, op.name, body);
                Ok(body.clone())
            })
        });
    }
    Ok(())
}

fn cmd_host(file: &HostFile) -> Result<(), Box<dyn std::error::Error>> {
    register_echo_services(&file.assembly)?;

    let host = HostManager::with_options(file.host_options())?;
    host.events()
        .subscribe_lifecycle(|e| tracing::debug!("{}: {}", e.state, e.listener));
    host.events().receiving_request.subscribe(|e| {
        if let Some(message) = &e.message {
            tracing::debug!("<- [{}] {}", e.message_id, message.action);
        }
    });
    host.events().sending_reply.subscribe(|e| match &e.message {
        Some(message) => tracing::debug!("-> [{}] {}", e.message_id, message.action),
        None => tracing::debug!("-> [{}] (one-way)", e.message_id),
    });

    // Setup Ctrl+C handler
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })?;

    host.open()?;

    println!("RPC Host v{}", env!("CARGO_PKG_VERSION"));
    println!("=====================================");
    for info in host.get_host_info_list()? {
        println!("{}", info);
        for endpoint in &info.endpoints {
            println!("  {}", endpoint);
        }
    }
    println!();
    println!("Press Ctrl+C to stop...");

    while running.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_millis(200));
    }

    println!("\nShutting down...");
    host.dispose();
    Ok(())
}

fn cmd_info(file: &HostFile) -> Result<(), Box<dyn std::error::Error>> {
    let model = file
        .config_file
        .as_ref()
        .map(ServiceModelConfig::load)
        .transpose()?;
    let registry = TypeRegistry::new();
    let types = ServiceTypeResolver::new(&registry).load_candidate_types(&file.assembly, model.as_ref())?;
    let scheme = match (&file.address, file.port) {
        (Some(address), _) => Some(ServiceAddress::parse(address)?.scheme().to_string()),
        (None, Some(_)) => Some("http".to_string()),
        (None, None) => None,
    };

    println!("Assembly: {}", file.assembly.display());
    if let Some(path) = &file.config_file {
        println!("Config:   {}", path.display());
    }
    println!();

    for ty in types
        .iter()
        .filter(|t| file.service_type.as_deref().map_or(true, |n| n == t.full_name()))
    {
        println!("{} ({:?})", ty.full_name(), ty.instance_mode());

        if let Some(service) = model.as_ref().and_then(|m| m.service(ty.full_name())) {
            for base in &service.base_addresses {
                println!("  base {}", base);
            }
            for endpoint in &service.endpoints {
                println!(
                    "  endpoint '{}' {} {}",
                    endpoint.address, endpoint.binding, endpoint.contract
                );
            }
            continue;
        }

        let binding = match &scheme {
            Some(scheme) => ServiceTypeResolver::resolve_binding_for(
                &file
                    .binding
                    .clone()
                    .map(rpchost::BindingSource::Type)
                    .unwrap_or_default(),
                scheme,
            )
            .map(|b| b.kind.to_string())
            .unwrap_or_else(|e| format!("<{}>", e)),
            None => "-".to_string(),
        };
        for contract in ServiceTypeResolver::get_declared_contracts(ty)? {
            println!("  {} [{}]", contract.full_name(), binding);
            for op in contract.operations() {
                println!(
                    "    {}{} -> {}",
                    op.name,
                    if op.is_one_way { " (one-way)" } else { "" },
                    op.action
                );
            }
        }
    }
    Ok(())
}

struct CallRequest {
    address: String,
    contract: String,
    namespace: Option<String>,
    operation: String,
    body: String,
    one_way: bool,
    binding: Option<String>,
    credentials: Option<(String, String)>,
}

impl CallRequest {
    fn endpoint(&self, defaults: &ClientSection) -> Result<EndpointDescriptor, rpchost::Error> {
        let address = ServiceAddress::parse(&self.address)?;

        let mut contract = ContractDescription::new(&self.contract);
        if let Some(ns) = &self.namespace {
            contract = contract.with_namespace(ns);
        }
        contract = if self.one_way {
            contract.one_way_operation(&self.operation)
        } else {
            contract.operation(&self.operation)
        };

        let mut binding = match &self.binding {
            Some(name) => ServiceTypeResolver::resolve_binding(&rpchost::BindingSource::Type(
                name.clone(),
            ))?,
            None => ServiceTypeResolver::default_binding_for(address.scheme())?,
        };
        binding.send_timeout = defaults.send_timeout();
        binding.max_received_message_size = defaults.max_message_size;

        EndpointDescriptor::new(contract, binding, address)
    }
}

fn cmd_call(request: &CallRequest, defaults: &ClientSection) -> Result<(), Box<dyn std::error::Error>> {
    let body: Value = serde_json::from_str(&request.body)?;
    let mut client = ServiceClient::new(request.endpoint(defaults)?);
    if let Some((user, password)) = &request.credentials {
        client = client.with_credentials(user, password);
    }
    client
        .sending_request()
        .subscribe(|e| tracing::debug!("-> [{}] one_way={}", e.message_id, e.is_one_way));

    if request.one_way {
        client.send_one_way(&request.operation, body)?;
        println!("sent");
        return Ok(());
    }

    match client.call(&request.operation, body) {
        Ok(reply) => {
            println!("{}", serde_json::to_string_pretty(&reply)?);
            Ok(())
        }
        Err(rpchost::Error::Fault { code, reason }) => {
            eprintln!("Fault {}: {}", code, reason);
            std::process::exit(2);
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rpchost::{BindingKind, Service};

    fn request(address: &str) -> CallRequest {
        CallRequest {
            address: address.to_string(),
            contract: "Demo.ICalculator".to_string(),
            namespace: None,
            operation: "Add".to_string(),
            body: "null".to_string(),
            one_way: false,
            binding: None,
            credentials: None,
        }
    }

    #[test]
    fn test_call_endpoint_from_scheme() {
        let defaults = ClientSection {
            send_timeout_secs: 3,
            max_message_size: 1024,
        };
        let endpoint = request("net.tcp://localhost:9000/calc")
            .endpoint(&defaults)
            .unwrap();
        assert_eq!(endpoint.binding().kind, BindingKind::NetTcp);
        assert_eq!(endpoint.binding().send_timeout, Duration::from_secs(3));
        assert_eq!(endpoint.binding().max_received_message_size, 1024);
        let op = endpoint.contract().find_by_name("Add").unwrap();
        assert!(!op.is_one_way);
        assert!(op.action.ends_with("ICalculator/Add"));
    }

    #[test]
    fn test_call_endpoint_binding_must_match_scheme() {
        let mut req = request("http://localhost:9000/calc");
        req.binding = Some("netTcpBinding".into());
        assert!(req.endpoint(&ClientSection::default()).is_err());

        req.binding = Some("wsHttpBinding".into());
        req.one_way = true;
        req.namespace = Some("urn:demo".into());
        let endpoint = req.endpoint(&ClientSection::default()).unwrap();
        assert_eq!(endpoint.binding().kind, BindingKind::WsHttp);
        let op = endpoint.contract().find_by_name("Add").unwrap();
        assert!(op.is_one_way);
        assert!(op.action.starts_with("urn:demo/"));
    }

    #[test]
    fn test_echo_services_registered() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = dir.path().join("services.toml");
        std::fs::write(
            &manifest,
            r#"
[[contracts]]
full_name = "Ctl.IEcho"
operations = [{ name = "Echo" }]

[[types]]
full_name = "Ctl.Echo"
contracts = ["Ctl.IEcho"]

[[types]]
full_name = "Ctl.Base"
contracts = ["Ctl.IEcho"]
abstract = true
"#,
        )
        .unwrap();

        register_echo_services(&manifest).unwrap();
        let registry = TypeRegistry::global();
        assert!(registry.get("Ctl.Base").is_none());
        let activate = registry.get("Ctl.Echo").unwrap();
        let service = activate();
        let contract = ContractDescription::new("Ctl.IEcho").operation("Echo");
        let reply = service
            .invoke(&contract.operations()[0], &serde_json::json!({"x": 1}))
            .unwrap();
        assert_eq!(reply, serde_json::json!({"x": 1}));
    }
}
