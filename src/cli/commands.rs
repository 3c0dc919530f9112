use crate::config::ServiceConfig;
use crate::error::{DispatchError, RegistryError};
use crate::handler::{handler_fn, Handler};
use crate::registry::{discover_descriptors, HandlerRegistry};
use crate::router::{join_path, Router};
use clap::{Parser, Subcommand};
use http::Method;
use std::path::{Path, PathBuf};

/// Command-line interface for waypost services
#[derive(Parser)]
#[command(name = "waypost")]
#[command(about = "Inspect and check waypost handler trees", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Print the route table derived from the handler descriptors
    Routes {
        /// Service configuration file (YAML or JSON)
        #[arg(short, long, env = "WAYPOST_CONFIG")]
        config: PathBuf,
    },
    /// Parse every descriptor and compile its parameter schema
    Check {
        /// Service configuration file (YAML or JSON)
        #[arg(short, long, env = "WAYPOST_CONFIG")]
        config: PathBuf,
    },
}

/// Bind every descriptor to a placeholder so the tree can be inspected without handler code.
fn inspect_registry(config: &ServiceConfig) -> Result<HandlerRegistry, RegistryError> {
    let descriptors = discover_descriptors(&config.routing.api.location)?;
    let handlers = descriptors
        .into_iter()
        .map(|d| {
            Handler::bind(
                &d.routing_path,
                d.config,
                handler_fn(|_, _| Err(DispatchError::internal("not bound"))),
            )
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(HandlerRegistry::from_handlers(handlers))
}

/// Suffix of routes mounted only when the service is built with an authenticator.
const AUTH_ONLY: &str = " [requires authenticator]";

/// Route table lines: `VERB /path -> routing/path`, then socket events.
pub fn route_lines(config: &ServiceConfig) -> Result<Vec<String>, RegistryError> {
    let registry = inspect_registry(config)?;
    let api_path = config.routing.api.path.as_str();
    let router = Router::from_registry(&registry, api_path);

    let mut lines: Vec<String> = router
        .routes()
        .iter()
        .map(|route| {
            format!(
                "{} {} -> {}",
                route.method.as_ref().map(Method::as_str).unwrap_or("*"),
                route.pattern,
                route.target.routing_path().unwrap_or("-")
            )
        })
        .collect();

    if let Some(auth) = &config.authentication {
        let login = auth.login.mount_path().unwrap_or("login");
        let logout = auth.logout.mount_path().unwrap_or("logout");
        lines.push(format!(
            "POST {} -> login{}{AUTH_ONLY}",
            join_path(api_path, login),
            auth.login.api.as_deref().map(|a| format!(" ({a})")).unwrap_or_default()
        ));
        lines.push(format!(
            "* {} -> logout{}{AUTH_ONLY}",
            join_path(api_path, logout),
            auth.logout.api.as_deref().map(|a| format!(" ({a})")).unwrap_or_default()
        ));
    }

    for (routing_path, handler) in registry.all() {
        if let Some(event) = handler.config().event_name() {
            lines.push(format!("EVENT {event} -> {routing_path}"));
        }
    }
    Ok(lines)
}

/// Every descriptor or schema failure under the API location. Empty when the tree is valid.
pub fn check_tree(root: &Path) -> Vec<String> {
    let descriptors = match discover_descriptors(root) {
        Ok(descriptors) => descriptors,
        Err(e) => return vec![e.to_string()],
    };
    descriptors
        .into_iter()
        .filter_map(|d| {
            Handler::bind(
                &d.routing_path,
                d.config,
                handler_fn(|_, _| Ok(serde_json::Value::Null)),
            )
            .err()
            .map(|e| e.to_string())
        })
        .collect()
}

pub fn run_cli(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Routes { config } => {
            let config = ServiceConfig::load(&config)?;
            for line in route_lines(&config)? {
                println!("{line}");
            }
            Ok(())
        }
        Commands::Check { config } => {
            let config = ServiceConfig::load(&config)?;
            let failures = check_tree(&config.routing.api.location);
            if failures.is_empty() {
                println!("ok: {}", config.routing.api.location.display());
                Ok(())
            } else {
                for failure in &failures {
                    eprintln!("{failure}");
                }
                anyhow::bail!("{} descriptor(s) failed", failures.len())
            }
        }
    }
}
