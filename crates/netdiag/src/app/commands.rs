use clap::Args;
use clap::Parser;
use clap::Subcommand;

const LONG_ABOUT: &str = "\
Serve network diagnostics (ping, traceroute, nslookup) over WebSocket.\n\
\n\
Clients connect to ws://HOST:PORT/ws and send JSON frames such as\n\
{\"type\":\"command\",\"id\":\"c1\",\"cmd\":\"ping\",\"args\":{\"host\":\"127.0.0.1\",\"count\":1}}.\n\
Output is streamed back as it is produced.";

const AFTER_LONG_HELP: &str = r#"ENVIRONMENT:
    NETDIAG_LISTEN             Bind address (default 127.0.0.1:3000)
    PORT                       Port on 127.0.0.1 when NETDIAG_LISTEN is unset
    NETDIAG_ALLOW_REMOTE       Permit binding a non-loopback address
    NETDIAG_MAX_CONNECTIONS    Concurrent WebSocket sessions (default 64)
    NETDIAG_EVENT_QUEUE        Per-session output queue capacity (default 128)
    NETDIAG_SEND_TIMEOUT_SECS  Per-frame send timeout (default 15)
    NETDIAG_PING_BIN           ping executable
    NETDIAG_TRACEROUTE_BIN     traceroute executable
    NETDIAG_NSLOOKUP_BIN       nslookup executable
    NETDIAG_LOG                Write logs to this file
    NETDIAG_LOG_FORMAT         text or json
    RUST_LOG                   Log filter

EXAMPLES:
    netdiag serve
    netdiag serve --listen 127.0.0.1:8080
    netdiag serve --listen 0.0.0.0:3000 --allow-remote"#;

#[derive(Debug, Parser)]
#[command(name = "netdiag")]
#[command(author, version, propagate_version = true)]
#[command(about = "Network diagnostics server streaming command output over WebSocket")]
#[command(long_about = LONG_ABOUT)]
#[command(after_long_help = AFTER_LONG_HELP)]
#[command(subcommand_required = true, arg_required_else_help = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable debug logging
    #[arg(short, long, global = true, help_heading = "Debug Options")]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run the WebSocket server until SIGINT/SIGTERM
    Serve(ServeArgs),
}

#[derive(Debug, Clone, Default, Args)]
pub struct ServeArgs {
    /// Address to bind, e.g. 127.0.0.1:3000
    #[arg(long, value_name = "ADDR")]
    pub listen: Option<String>,

    /// Allow binding a non-loopback address [env: NETDIAG_ALLOW_REMOTE]
    #[arg(long)]
    pub allow_remote: bool,

    /// Maximum concurrent WebSocket sessions [env: NETDIAG_MAX_CONNECTIONS]
    #[arg(long, value_name = "N")]
    pub max_connections: Option<usize>,
}
