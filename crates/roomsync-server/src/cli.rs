use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "roomsync-server", about = "Multi-account message replication engine")]
pub struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/roomsync.toml")]
    pub config: String,

    /// Run against the in-process sandbox platform instead of a live connector
    #[arg(long)]
    pub sandbox: bool,

    /// Push the configured admin permission profile once accounts are up
    #[arg(long)]
    pub apply_permissions: bool,

    /// Join every non-excluded account to this room link, then keep running
    #[arg(long)]
    pub join: Option<String>,

    /// Make every non-excluded account leave this room link, then keep running
    #[arg(long)]
    pub leave: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long)]
    pub json_logs: bool,
}
