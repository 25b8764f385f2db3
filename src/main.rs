mod cli;

use nova_stream::{config, resolver, server, ContentId};

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands};
use std::sync::Arc;

async fn start_server(
    host: Option<String>,
    port: Option<u16>,
    config_path: Option<&std::path::Path>,
) -> Result<()> {
    let mut config = config::load_config_or_default(config_path)?;

    // CLI flags win over the config file
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }
    config::validate_config(&config)?;

    tracing::info!("Starting nova-stream server");
    tracing::info!(
        "Server will listen on {}:{}",
        config.server.host,
        config.server.port
    );
    tracing::info!(
        command = %config.resolver.command,
        workers = config.scheduler.workers,
        "Resolver and scheduler configured"
    );

    server::start_server(config).await
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Respect RUST_LOG env var if set, otherwise use defaults based on verbose flag
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "nova_stream=trace,tower_http=debug".to_string()
        } else {
            "nova_stream=debug,tower_http=info".to_string()
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .init();

    match cli.command {
        Commands::Start { host, port } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(start_server(host, port, cli.config.as_deref()))
        }
        Commands::Resolve { id, json } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(resolve_one(&id, json, cli.config.as_deref()))
        }
        Commands::CheckTools => check_tools(cli.config.as_deref()),
        Commands::Validate {
            config: config_path,
        } => {
            let path = config_path.or(cli.config);
            validate_config(path.as_deref())
        }
        Commands::Version => {
            println!("nova-stream {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

async fn resolve_one(
    id: &str,
    json: bool,
    config_path: Option<&std::path::Path>,
) -> Result<()> {
    let config = config::load_config_or_default(config_path)?;
    let id = ContentId::parse(id)?;

    let resolver = Arc::new(resolver::CommandResolver::new(&config.resolver));
    let ctx = server::AppContext::new(config, resolver)?;

    let entry = ctx.coordinator.resolve(&id).await?;
    let metadata = ctx.coordinator.metadata(&id).await?;

    if json {
        let body = serde_json::json!({
            "id": id,
            "url": entry.url,
            "contentType": entry.content_type,
            "expiresAt": entry.expires_at,
            "metadata": metadata,
        });
        println!("{}", serde_json::to_string_pretty(&body)?);
    } else {
        println!("Id: {}", id);
        if let Some(ref metadata) = metadata {
            println!("Title: {}", metadata.title);
            if let Some(duration) = metadata.duration {
                let secs = duration as u64;
                println!("Duration: {:02}:{:02}", secs / 60, secs % 60);
            }
        }
        println!("Content-Type: {}", entry.content_type);
        println!("Expires: {}", entry.expires_at.to_rfc3339());
        println!("URL: {}", entry.url);
    }

    Ok(())
}

fn check_tools(config_path: Option<&std::path::Path>) -> Result<()> {
    println!("Checking external tools...\n");

    let config = config::load_config_or_default(config_path)?;
    let tool = resolver::check_tool(&config.resolver.command);

    let status = if tool.available { "✓" } else { "✗" };
    print!("{} {}", status, tool.name);

    if let Some(ref version) = tool.version {
        print!(" ({})", version);
    }

    if let Some(ref path) = tool.path {
        print!(" - {}", path.display());
    }

    println!();
    println!();
    if tool.available {
        println!("All required tools are available!");
    } else {
        println!("The extractor is missing. Install it or set resolver.command in the config.");
    }

    Ok(())
}

fn validate_config(path: Option<&std::path::Path>) -> Result<()> {
    match path {
        Some(p) => {
            println!("Validating config: {:?}", p);
            let config = config::load_config(p)?;
            println!("✓ Configuration is valid");
            print_summary(&config);
        }
        None => {
            println!("No config file specified, using defaults");
            let config = config::Config::default();
            println!("Default config:");
            print_summary(&config);
        }
    }

    Ok(())
}

fn print_summary(config: &config::Config) {
    println!("  Server: {}:{}", config.server.host, config.server.port);
    println!(
        "  Cache: {} urls / {} failures / {} metadata",
        config.cache.max_resolved, config.cache.max_failures, config.cache.max_metadata
    );
    println!(
        "  URL ttl: {}s, negative ttl: {}s / {}s",
        config.cache.success_ttl_secs, config.cache.empty_ttl_secs, config.cache.unavailable_ttl_secs
    );
    println!("  Scheduler workers: {}", config.scheduler.workers);
    println!("  Resolver: {}", config.resolver.command);
}
