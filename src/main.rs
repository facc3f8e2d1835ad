//! rcu - remote computer use
//!
//! Drives a remote Linux desktop over VNC (screen, pointer, keyboard) and SSH
//! (shell commands, xdotool, file edits) and exposes it to agents as an MCP
//! server.
//!
//! ## Modes
//!
//! **Default / `rcu mcp`**: MCP over stdin/stdout.
//!
//! **`rcu serve`**: MCP over Streamable HTTP at `/mcp`, with `/health`.
//!
//! **`rcu check`**: connect to VNC and SSH once, report, and exit.

use std::net::SocketAddr;
use std::sync::Arc;

use clap::{Parser as ClapParser, Subcommand};
use thiserror::Error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use rcu::{
    api,
    config::{Config, ConfigError, ConnectionArgs},
    context::RemoteDesktop,
    display::DisplaySession,
    mcp::RcuMcpServer,
    shell::{ShellSession, Xdotool},
};

/// rcu - remote computer use over VNC and SSH, served as MCP tools.
#[derive(ClapParser, Debug)]
#[command(name = "rcu", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    #[command(flatten)]
    conn: ConnectionArgs,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Serve MCP over stdin/stdout (the default)
    Mcp,

    /// Serve MCP over Streamable HTTP
    Serve {
        /// Address to bind the HTTP server
        #[arg(long, default_value = "127.0.0.1:8080")]
        bind: SocketAddr,

        /// Bearer token for non-localhost bindings (generated if absent)
        #[arg(long, env = "RCU_TOKEN", hide_env_values = true)]
        token: Option<String>,
    },

    /// Test the VNC and SSH connections, then exit
    Check {
        /// Only test the VNC connection
        #[arg(long, conflicts_with = "ssh_only")]
        vnc_only: bool,

        /// Only test the SSH connection
        #[arg(long)]
        ssh_only: bool,
    },
}

#[derive(Error, Debug)]
pub enum CliError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("mcp error: {0}")]
    Mcp(String),

    #[error("task join error: {0}")]
    TaskJoin(#[from] tokio::task::JoinError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0} connection check(s) failed")]
    CheckFailed(usize),
}

fn is_loopback(addr: &SocketAddr) -> bool {
    addr.ip().is_loopback()
}

fn resolve_token(bind: &SocketAddr, user_token: &Option<String>) -> Option<String> {
    if is_loopback(bind) {
        return user_token.clone();
    }
    match user_token {
        Some(token) => Some(token.clone()),
        None => {
            use rand::Rng;
            let token: String = rand::thread_rng()
                .sample_iter(&rand::distributions::Alphanumeric)
                .take(32)
                .map(char::from)
                .collect();
            eprintln!("rcu: API token (required for non-localhost): {}", token);
            Some(token)
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    let cli = Cli::parse();

    // stdout carries JSON-RPC in stdio mode
    match cli.command {
        None | Some(Commands::Mcp) => init_tracing_stderr(),
        _ => init_tracing(),
    }

    let config = Config::load(&cli.conn)?;

    match cli.command {
        None | Some(Commands::Mcp) => run_mcp(config).await,
        Some(Commands::Serve { bind, token }) => run_serve(config, bind, token).await,
        Some(Commands::Check { vnc_only, ssh_only }) => {
            run_check(config, !ssh_only, !vnc_only).await
        }
    }
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "rcu=info,tower_http=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Initialize tracing with stderr output.
///
/// MCP stdio mode uses stdout for the JSON-RPC protocol, so all tracing MUST
/// go to stderr to avoid corrupting the protocol stream.
fn init_tracing_stderr() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "rcu=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Build the desktop context and start connecting in the background.
///
/// Failed connections are only logged; tools reconnect on first use.
fn start_desktop(config: &Config) -> Arc<RemoteDesktop> {
    let desktop = Arc::new(RemoteDesktop::new(config));
    let connecting = desktop.clone();
    tokio::spawn(async move {
        let (vnc, ssh) = connecting.connect().await;
        tracing::info!(vnc, ssh, "startup connections attempted");
    });
    desktop
}

// ── MCP stdio mode ─────────────────────────────────────────────────

async fn run_mcp(config: Config) -> Result<(), CliError> {
    use rmcp::{transport::stdio, ServiceExt};

    let desktop = start_desktop(&config);
    tracing::info!(
        vnc = %format!("{}:{}", config.display.host, config.display.port),
        ssh = %format!("{}:{}", config.shell.host, config.shell.port),
        "rcu MCP server starting on stdio"
    );

    let service = RcuMcpServer::new(desktop.clone())
        .serve(stdio())
        .await
        .map_err(|e| CliError::Mcp(e.to_string()))?;

    tokio::select! {
        result = service.waiting() => {
            let reason = result?;
            tracing::info!(?reason, "MCP client disconnected");
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received Ctrl+C");
        }
    }

    desktop.shutdown().await;
    Ok(())
}

// ── HTTP mode ──────────────────────────────────────────────────────

async fn run_serve(
    config: Config,
    bind: SocketAddr,
    token: Option<String>,
) -> Result<(), CliError> {
    let token = resolve_token(&bind, &token);
    if token.is_some() {
        tracing::info!("auth token configured");
    }

    let desktop = start_desktop(&config);
    let state = api::AppState::new(desktop.clone());
    let app = api::router(state, api::RouterConfig { token });

    let listener = tokio::net::TcpListener::bind(bind).await?;
    tracing::info!(addr = %bind, "HTTP MCP server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("received Ctrl+C");
            }
        })
        .await?;

    desktop.shutdown().await;
    tracing::info!("rcu server exiting");
    Ok(())
}

// ── Connection check ───────────────────────────────────────────────

async fn run_check(config: Config, vnc: bool, ssh: bool) -> Result<(), CliError> {
    let mut failures = 0;
    if vnc && !check_vnc(&config).await {
        failures += 1;
    }
    if ssh && !check_ssh(&config).await {
        failures += 1;
    }
    if failures > 0 {
        return Err(CliError::CheckFailed(failures));
    }
    println!("all checks passed");
    Ok(())
}

async fn check_vnc(config: &Config) -> bool {
    let addr = format!("{}:{}", config.display.host, config.display.port);
    let display = DisplaySession::new(config.display.clone());
    if !display.connect().await {
        println!("VNC {addr}: connection failed");
        return false;
    }

    let ok = match display.capture_screenshot().await {
        Ok(img) => {
            println!("VNC {addr}: ok, framebuffer {}x{}", img.width(), img.height());
            let configured = (config.scaling.width, config.scaling.height);
            if (img.width(), img.height()) != configured {
                println!(
                    "VNC {addr}: warning, WIDTH/HEIGHT are {}x{} but the framebuffer is {}x{}",
                    configured.0,
                    configured.1,
                    img.width(),
                    img.height()
                );
            }
            true
        }
        Err(e) => {
            println!("VNC {addr}: screenshot failed: {e}");
            false
        }
    };
    display.disconnect().await;
    ok
}

async fn check_ssh(config: &Config) -> bool {
    let addr = format!("{}@{}:{}", config.shell.username, config.shell.host, config.shell.port);
    let shell = ShellSession::new(config.shell.clone());
    if !shell.connect().await {
        println!("SSH {addr}: connection failed");
        return false;
    }
    println!("SSH {addr}: connected");

    let mut ok = true;
    let which = shell.execute_command("which xdotool").await;
    if which.success && !which.output.trim().is_empty() {
        println!("SSH {addr}: xdotool at {}", which.output.trim());
    } else {
        println!("SSH {addr}: xdotool not found on the remote machine");
        ok = false;
    }

    let xdo = Xdotool::new(config.scaling.display_num);
    let location = shell.execute_command(&xdo.cmd("getmouselocation")).await;
    if location.success {
        println!("SSH {addr}: mouse at {}", location.output.trim());
    } else {
        println!(
            "SSH {addr}: xdotool cannot reach the display: {}",
            location.error.trim()
        );
        ok = false;
    }

    shell.disconnect().await;
    ok
}
