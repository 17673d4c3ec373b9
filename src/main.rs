//! sockspilot CLI.
//!
//! `run` supervises a proxy session from a stored configuration; `check`
//! validates one; `pac` prints the PAC script; `rules` manages user routing
//! rules.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;

use sockspilot::config::{ProxyConfig, RoutingMode};
use sockspilot::monitor::{MonitorOptions, PathUpdate};
use sockspilot::orchestrator::Orchestrator;
use sockspilot::rules::{JsonRuleStore, ProxyRule, RuleAction, RuleEngine, RuleMatch};
use sockspilot::store::{state_dir, ConfigStore};
use sockspilot::supervisor::ProxySupervisor;

#[derive(Parser)]
#[command(name = "sockspilot", version, about = "Control plane for a local SOCKS/HTTP proxy client")]
struct Cli {
    /// Path to the named-configuration store file.
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    /// Path to the user rule file.
    #[arg(long, global = true)]
    rules: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a proxy session from a stored configuration and supervise it.
    Run {
        /// Name of the stored configuration; defaults to the selected one.
        #[arg(long)]
        config: Option<String>,
        /// Path to the proxy executable; resolved from PATH when omitted.
        #[arg(long)]
        binary: Option<PathBuf>,
        /// Disable automatic reconnection on network changes.
        #[arg(long)]
        no_auto_reconnect: bool,
    },
    /// Validate a stored configuration without starting anything.
    Check {
        /// Name of the stored configuration; defaults to the selected one.
        #[arg(long)]
        config: Option<String>,
    },
    /// Print the PAC script for the current rule set.
    Pac {
        /// Routing mode to embed: global | whitelist | blacklist.
        #[arg(long)]
        mode: Option<String>,
    },
    /// Manage user routing rules.
    Rules {
        #[command(subcommand)]
        command: RulesCommands,
    },
}

#[derive(Subcommand)]
enum RulesCommands {
    /// List builtin and user rules in priority order.
    List,
    /// Append a user rule (lowest priority).
    Add {
        /// Match kind: domain | ip | keyword | useragent.
        kind: String,
        /// Value the rule matches.
        value: String,
        /// Action: proxy | direct | reject.
        action: String,
        #[arg(long)]
        description: Option<String>,
    },
    /// Remove the user rule at the given index (as shown by `rules list`).
    Remove { index: usize },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let store_path = cli.store.unwrap_or_else(ConfigStore::default_path);
    let rules_path = cli
        .rules
        .unwrap_or_else(|| state_dir().join("user_rules.json"));

    match cli.command {
        Commands::Run {
            config,
            binary,
            no_auto_reconnect,
        } => run(store_path, rules_path, config, binary, no_auto_reconnect).await,
        Commands::Check { config } => check(store_path, config),
        Commands::Pac { mode } => pac(rules_path, mode),
        Commands::Rules { command } => handle_rules_command(command, rules_path),
    }
}

/// Load the named (or selected) configuration from the store.
fn load_config(store_path: PathBuf, name: Option<String>) -> Result<(String, ProxyConfig)> {
    let store = ConfigStore::open(&store_path);
    match name {
        Some(name) => {
            let config = store.get(&name).with_context(|| {
                format!("no configuration named '{name}' in {}", store_path.display())
            })?;
            Ok((name, config))
        }
        None => store.selected().with_context(|| {
            format!(
                "no configuration selected in {}; pass --config <name>",
                store_path.display()
            )
        }),
    }
}

async fn run(
    store_path: PathBuf,
    rules_path: PathBuf,
    config_name: Option<String>,
    binary: Option<PathBuf>,
    no_auto_reconnect: bool,
) -> Result<()> {
    let (name, config) = load_config(store_path, config_name)?;
    let engine = RuleEngine::with_store(config.mode, Arc::new(JsonRuleStore::new(&rules_path)))?;
    let binary = binary.unwrap_or_else(ProxySupervisor::resolve_binary);

    let options = MonitorOptions {
        auto_reconnect: !no_auto_reconnect,
        ..MonitorOptions::default()
    };
    let orchestrator = Orchestrator::new(binary, engine, options);

    // Forward session events to the log output.
    let mut status_rx = orchestrator.events().subscribe_status();
    tokio::spawn(async move {
        while let Ok(event) = status_rx.recv().await {
            tracing::info!("proxy status: {event:?}");
        }
    });
    let mut log_rx = orchestrator.events().subscribe_logs();
    tokio::spawn(async move {
        while let Ok(event) = log_rx.recv().await {
            tracing::info!(target: "proxy", "[{}] {}", event.level, event.message);
        }
    });

    let _bus_task = orchestrator.serve_bus();

    // Platform path-update integration is a collaborator; without one we
    // assume a satisfied wired path so the monitor has a defined state.
    let (path_tx, path_rx) = mpsc::channel::<PathUpdate>(16);
    let _watch_task = orchestrator.watch_path_updates(path_rx);
    let _ = path_tx.send(PathUpdate::on_ethernet()).await;

    orchestrator
        .start_session(config)
        .with_context(|| format!("failed to start session '{name}'"))?;
    tracing::info!("session '{name}' started; press Ctrl-C to stop");

    tokio::signal::ctrl_c().await.context("failed to wait for Ctrl-C")?;
    tracing::info!("stopping");
    orchestrator.shutdown();
    Ok(())
}

fn check(store_path: PathBuf, config_name: Option<String>) -> Result<()> {
    let (name, config) = load_config(store_path, config_name)?;
    config.validate()?;
    println!(
        "'{name}' is valid: {}:{} via {} on {}:{}",
        config.server, config.server_port, config.method, config.local_address, config.local_port
    );
    Ok(())
}

fn pac(rules_path: PathBuf, mode: Option<String>) -> Result<()> {
    let mut engine =
        RuleEngine::with_store(RoutingMode::default(), Arc::new(JsonRuleStore::new(&rules_path)))?;
    if let Some(mode) = mode {
        let mode = mode
            .parse::<RoutingMode>()
            .map_err(|e| anyhow::anyhow!(e))?;
        engine.set_mode(mode);
    }
    println!("{}", engine.generate_pac());
    Ok(())
}

fn handle_rules_command(command: RulesCommands, rules_path: PathBuf) -> Result<()> {
    let mut engine =
        RuleEngine::with_store(RoutingMode::default(), Arc::new(JsonRuleStore::new(&rules_path)))?;

    match command {
        RulesCommands::List => {
            println!("Builtin rules:");
            print_rules(engine.builtin_rules());
            println!();
            if engine.user_rules().is_empty() {
                println!("User rules: (none)");
            } else {
                println!("User rules ({}):", engine.user_rules().len());
                print_rules(engine.user_rules());
            }
        }
        RulesCommands::Add {
            kind,
            value,
            action,
            description,
        } => {
            let matcher = match kind.as_str() {
                "domain" => RuleMatch::Domain(value),
                "ip" => RuleMatch::IpRange(value),
                "keyword" => RuleMatch::Keyword(value),
                "useragent" => RuleMatch::UserAgent(value),
                other => bail!("unknown rule kind '{other}' (domain | ip | keyword | useragent)"),
            };
            let action = match action.as_str() {
                "proxy" => RuleAction::Proxy,
                "direct" => RuleAction::Direct,
                "reject" => RuleAction::Reject,
                other => bail!("unknown action '{other}' (proxy | direct | reject)"),
            };
            let mut rule = ProxyRule::new(matcher, action);
            rule.description = description;
            engine.add_user_rule(rule)?;
            println!("added; {} user rules", engine.user_rules().len());
        }
        RulesCommands::Remove { index } => {
            let removed = engine.remove_user_rule(index)?;
            println!("removed rule {index}: {removed:?}");
        }
    }
    Ok(())
}

fn print_rules(rules: &[ProxyRule]) {
    println!("  {:<4} {:<10} {:<30} {:<8} {}", "#", "KIND", "VALUE", "ACTION", "DESCRIPTION");
    for (i, rule) in rules.iter().enumerate() {
        let (kind, value) = match &rule.matcher {
            RuleMatch::Domain(v) => ("domain", v),
            RuleMatch::IpRange(v) => ("ip", v),
            RuleMatch::Keyword(v) => ("keyword", v),
            RuleMatch::UserAgent(v) => ("useragent", v),
        };
        let action = match rule.action {
            RuleAction::Proxy => "proxy",
            RuleAction::Direct => "direct",
            RuleAction::Reject => "reject",
        };
        println!(
            "  {:<4} {:<10} {:<30} {:<8} {}",
            i,
            kind,
            value,
            action,
            rule.description.as_deref().unwrap_or("-")
        );
    }
}
