//! Clap derive structures for the `loxone` CLI.

use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// loxone -- talk to a Loxone Miniserver from the command line
#[derive(Debug, Parser)]
#[command(
    name = "loxone",
    version,
    about = "Stream state changes, list controls and send commands to a Loxone Miniserver",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Miniserver profile to use
    #[arg(long, short = 'p', env = "LOXONE_PROFILE", global = true)]
    pub profile: Option<String>,

    /// Miniserver host or address (overrides profile)
    #[arg(long, short = 'H', env = "LOXONE_HOST", global = true)]
    pub host: Option<String>,

    /// Port (default 80, or 443 with --tls)
    #[arg(long, env = "LOXONE_PORT", global = true)]
    pub port: Option<u16>,

    /// Connect over wss:// / https://
    #[arg(long, global = true)]
    pub tls: bool,

    /// User name
    #[arg(long, short = 'u', env = "LOXONE_USERNAME", global = true)]
    pub username: Option<String>,

    /// Password (prompted for when missing)
    #[arg(long, env = "LOXONE_PASSWORD", global = true, hide_env_values = true)]
    pub password: Option<String>,

    /// Output format
    #[arg(long, short = 'o', env = "LOXONE_OUTPUT", default_value = "table", global = true)]
    pub output: OutputFormat,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,

    /// Verify TLS certificates against the system roots
    #[arg(long, global = true)]
    pub strict_tls: bool,

    /// Request timeout in seconds
    #[arg(long, env = "LOXONE_TIMEOUT", default_value = "10", global = true)]
    pub timeout: u64,
}

// ── Output Enum ──────────────────────────────────────────────────────

#[derive(Debug, Clone, ValueEnum)]
pub enum OutputFormat {
    /// Pretty table (default, interactive)
    Table,
    /// Pretty-printed JSON
    Json,
    /// One JSON document per line
    JsonCompact,
    /// Plain text, one value per line (scripting)
    Plain,
}

// ── Top-Level Command Enum ───────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Print state changes as they arrive
    #[command(alias = "watch")]
    Stream(StreamArgs),

    /// List the controls of the loaded structure
    #[command(alias = "ls")]
    Controls(ControlsArgs),

    /// Send a command to a control
    Send(SendArgs),

    /// Query the Miniserver without logging in
    Info,

    /// Manage configuration profiles
    Config(ConfigArgs),
}

// ── Subcommand args ──────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct StreamArgs {
    /// State identifiers to follow (all states when empty)
    pub states: Vec<String>,

    /// Stop after this many updates
    #[arg(long, short = 'n')]
    pub count: Option<usize>,
}

#[derive(Debug, Args)]
pub struct ControlsArgs {
    /// Only controls in this room (case-insensitive)
    #[arg(long, short = 'r')]
    pub room: Option<String>,

    /// Only controls of this type, e.g. Switch or Jalousie
    #[arg(long = "type", short = 't')]
    pub control_type: Option<String>,

    /// Only controls whose name contains this text
    #[arg(long, short = 'f')]
    pub filter: Option<String>,
}

#[derive(Debug, Args)]
pub struct SendArgs {
    /// Control identifier or (unique) name
    pub target: String,

    /// Command, e.g. on, off, pulse, or a value
    pub command: String,
}

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Print the config file path
    Path,

    /// List configured profiles
    Profiles,

    /// Create or replace a profile from --host / --username
    Init {
        /// Profile name
        #[arg(default_value = "default")]
        name: String,

        /// Read the password from this environment variable instead of storing it
        #[arg(long)]
        password_env: Option<String>,
    },
}
