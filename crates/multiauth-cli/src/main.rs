//! MultiAuth - authentication and identity hub
//!
//! Serves the MultiAuth API and runs one-off provider operations from the
//! command line.

use anyhow::Context;
use clap::{Parser, Subcommand};
use futures::TryStreamExt;
use multiauth_core::{Credentials, Criteria, IdentityInfo, MultiAuth, MultiAuthConfig, ProviderRegistry};
use multiauth_server::MultiAuthServer;
use multiauth_sql::{NewAccount, SqlStore};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "multiauth")]
#[command(author = "MultiAuth Team")]
#[command(version = multiauth_core::VERSION)]
#[command(about = "Authentication and identity hub", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Configuration file path
    #[arg(short, long, global = true, env = "MULTIAUTH_CONFIG", default_value = "multiauth.toml")]
    config: String,

    /// Bind address
    #[arg(long, env = "MULTIAUTH_BIND_ADDRESS")]
    bind: Option<String>,

    /// Port number
    #[arg(short, long, env = "MULTIAUTH_PORT")]
    port: Option<u16>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "MULTIAUTH_LOG_LEVEL", global = true)]
    log_level: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server
    Serve,

    /// Build every configured provider and report problems
    CheckConfig,

    /// Authenticate against an auth provider and print the identity
    Login {
        /// Auth provider name
        provider: String,

        username: String,

        #[arg(long, env = "MULTIAUTH_PASSWORD", hide_env_values = true)]
        password: String,
    },

    /// Search identities, e.g. `search name=Doe email=example.org`
    Search {
        /// key=value criteria
        criteria: Vec<String>,

        #[arg(long)]
        exact: bool,

        /// Restrict to these identity providers
        #[arg(long, value_delimiter = ',')]
        providers: Option<Vec<String>>,
    },

    /// List the members of a group, nested groups included
    GroupMembers {
        /// Identity provider name
        provider: String,

        group: String,
    },

    /// Create a local account in a SQL account store
    AddAccount {
        #[arg(long, env = "MULTIAUTH_DATABASE_URL")]
        database_url: String,

        /// Auth provider the login belongs to
        #[arg(long)]
        provider: String,

        identifier: String,

        #[arg(long, env = "MULTIAUTH_PASSWORD", hide_env_values = true)]
        password: String,

        #[arg(long)]
        name: Option<String>,

        #[arg(long)]
        email: Option<String>,

        #[arg(long)]
        affiliation: Option<String>,
    },

    /// Show version information
    Version,
}

/// Registry with every built-in provider type
fn build_registry() -> ProviderRegistry {
    let mut registry = ProviderRegistry::new();
    multiauth_ldap::register(&mut registry);
    multiauth_sql::register(&mut registry);
    registry
}

fn parse_criteria(items: &[String]) -> anyhow::Result<Criteria> {
    items
        .iter()
        .map(|item| {
            item.split_once('=')
                .map(|(key, value)| (key.to_string(), value.to_string()))
                .with_context(|| format!("Invalid criterion '{}', expected key=value", item))
        })
        .collect()
}

fn load_config(cli: &Cli) -> anyhow::Result<MultiAuthConfig> {
    let mut config = MultiAuthConfig::from_file(&cli.config)?;
    config.apply_env();

    if let Some(bind) = &cli.bind {
        config.server.bind_address = bind.clone();
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(level) = &cli.log_level {
        config.logging.level = level.clone();
    }

    Ok(config)
}

fn init_logging(level: &str, format: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let registry = tracing_subscriber::registry().with(filter);
    if format == "json" {
        registry.with(fmt::layer().json().with_target(true)).init();
    } else {
        registry.with(fmt::layer().with_target(true)).init();
    }
}

fn print_identity(identity: &IdentityInfo) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(identity)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    match &cli.command {
        None | Some(Commands::Version) => {
            println!("multiauth {}", multiauth_core::VERSION);
            return Ok(());
        }
        Some(Commands::AddAccount {
            database_url,
            provider,
            identifier,
            password,
            name,
            email,
            affiliation,
        }) => {
            init_logging(cli.log_level.as_deref().unwrap_or("info"), "pretty");
            let store = SqlStore::connect(database_url).await?;
            let user_id = store
                .create_account(&NewAccount {
                    provider: provider.clone(),
                    identifier: identifier.clone(),
                    password: password.clone(),
                    name: name.clone(),
                    email: email.clone(),
                    affiliation: affiliation.clone(),
                })
                .await?;
            println!("Created account '{}' for user {}", identifier, user_id);
            return Ok(());
        }
        Some(_) => {}
    }

    let config = load_config(&cli).with_context(|| format!("Failed to load {}", cli.config))?;
    init_logging(&config.logging.level, &config.logging.format);

    let multiauth = MultiAuth::from_config(&config, &build_registry())?;

    match cli.command {
        Some(Commands::Serve) => {
            info!("Starting MultiAuth server...");
            MultiAuthServer::new(config.server.clone(), multiauth).run().await?;
        }
        Some(Commands::CheckConfig) => {
            for provider in multiauth.auth_providers() {
                let links: Vec<&str> = multiauth
                    .links(provider.name())
                    .iter()
                    .map(|link| link.identity_provider.as_str())
                    .collect();
                println!("auth     {:<20} -> {}", provider.name(), links.join(", "));
            }
            for provider in multiauth.identity_providers() {
                println!("identity {:<20} {:?}", provider.name(), provider.capabilities());
            }
            println!("Configuration OK");
        }
        Some(Commands::Login {
            provider,
            username,
            password,
        }) => {
            let identity = multiauth.login(&provider, &Credentials::new(username, password)).await?;
            print_identity(&identity)?;
        }
        Some(Commands::Search {
            criteria,
            exact,
            providers,
        }) => {
            let criteria = parse_criteria(&criteria)?;
            let found = multiauth.search_identities(&criteria, exact, providers.as_deref()).await?;
            for identity in &found {
                print_identity(identity)?;
            }
            info!(count = found.len(), "Search finished");
        }
        Some(Commands::GroupMembers { provider, group }) => {
            let group = multiauth
                .get_group(&provider, &group)
                .await?
                .with_context(|| format!("No group '{}' in '{}'", group, provider))?;

            let mut members = group.members();
            while let Some(identity) = members.try_next().await? {
                println!("{}", identity.identifier());
            }
        }
        None | Some(Commands::Version) | Some(Commands::AddAccount { .. }) => {}
    }

    Ok(())
}
