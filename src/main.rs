use mcp_context::{
    config::Settings,
    error::{AppError, AppResult},
    initialize_logging,
    mcp::{ContextItem, MCPManager, WebSocketTransportFactory},
};
use serde::Serialize;
use std::{env, path::PathBuf, process, sync::Arc, time::Instant};
use tracing::{info, warn};

/// Subcommands understood by the binary
#[derive(Debug, PartialEq)]
enum Command {
    /// Handshake with every active server, then disconnect
    Probe,
    /// Send one user input item through the manager
    Send(String),
    /// Print the active server roster
    Servers,
}

#[tokio::main]
async fn main() -> AppResult<()> {
    // Parse command line arguments first (before logging to avoid noise)
    let args: Vec<String> = env::args().skip(1).collect();

    if args.iter().any(|a| a == "--version" || a == "-V") {
        println!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
        process::exit(0);
    }

    if args.is_empty() || args.iter().any(|a| a == "--help" || a == "-h") {
        print_help();
        process::exit(0);
    }

    let (config_path, command) = parse_args(&args)?;

    initialize_logging().map_err(|e| AppError::application(e.to_string()))?;
    let start_time = Instant::now();

    let settings = match config_path {
        Some(path) => Settings::load_from_file(path).await?,
        None => Settings::load().await?,
    };
    if settings.servers.is_empty() {
        warn!("No MCP servers configured");
    }

    let manager = MCPManager::with_factory(
        settings.servers,
        settings.client.client_info(),
        Arc::new(WebSocketTransportFactory),
    );

    match command {
        Command::Servers => print_json(&manager.active_servers())?,
        Command::Probe => {
            let results = manager.test_connections().await;
            print_json(&results)?;
        }
        Command::Send(text) => {
            let result = manager
                .process_context(&[ContextItem::user_input(text)])
                .await;
            manager.disconnect_all().await;
            print_json(&result)?;
        }
    }

    info!("Finished in {:?}", start_time.elapsed());
    Ok(())
}

fn parse_args(args: &[String]) -> AppResult<(Option<PathBuf>, Command)> {
    let mut config_path = None;
    let mut command = None;
    let mut iter = args.iter();

    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--config" | "-c" => {
                let path = iter
                    .next()
                    .ok_or_else(|| AppError::application("--config requires a path"))?;
                config_path = Some(PathBuf::from(path));
            }
            "probe" => command = Some(Command::Probe),
            "servers" => command = Some(Command::Servers),
            "send" => {
                let text = iter.by_ref().cloned().collect::<Vec<_>>().join(" ");
                if text.is_empty() {
                    return Err(AppError::application("send requires the text to deliver"));
                }
                command = Some(Command::Send(text));
            }
            other => {
                return Err(AppError::application(format!("Unknown argument: {}", other)));
            }
        }
    }

    let command = command.ok_or_else(|| AppError::application("No command given (see --help)"))?;
    Ok((config_path, command))
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> AppResult<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_help() {
    println!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
    println!("Model Context Protocol client: probe servers and send context updates");
    println!();
    println!("USAGE:");
    println!("    mcp-context [OPTIONS] <COMMAND>");
    println!();
    println!("COMMANDS:");
    println!("    probe           Handshake with every active server and report capabilities");
    println!("    send <TEXT>...  Send a user input item to every interested server");
    println!("    servers         List active servers in contact order");
    println!();
    println!("OPTIONS:");
    println!("    -c, --config <PATH>  Configuration file (default: ./mcp-context.toml)");
    println!("    -h, --help           Print help information");
    println!("    -V, --version        Print version information");
    println!();
    println!("ENVIRONMENT:");
    println!("    RUST_LOG             Log filter (default: mcp_context=info)");
    println!("    MCP_CONTEXT__*       Configuration overrides, `__` separates keys");
}
