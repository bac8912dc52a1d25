//! Clap derive structures for the `atmlink` CLI.
//!
//! Defines the command tree, global flags, and shared value enums.

use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// atmlink -- talk to an air-traffic simulation server
#[derive(Debug, Parser)]
#[command(
    name = "atmlink",
    version,
    about = "Watch and drive air-traffic simulations from the command line",
    long_about = "Connects to a simulation server over WebSocket, tracks whether a\n\
        simulation is actually live behind it, and sends stack commands.",
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
    /// Server profile to use
    #[arg(long, short = 'p', env = "ATMLINK_PROFILE", global = true)]
    pub profile: Option<String>,

    /// WebSocket URL of the server (overrides the profile)
    #[arg(long, short = 'u', env = "ATMLINK_URL", global = true)]
    pub url: Option<String>,

    /// Output format
    #[arg(long, short = 'o', default_value = "table", global = true)]
    pub output: OutputFormat,

    /// When to use color output
    #[arg(long, default_value = "auto", global = true)]
    pub color: ColorMode,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,

    /// Seconds to wait for the server
    #[arg(long, env = "ATMLINK_TIMEOUT", global = true)]
    pub timeout: Option<u64>,

    /// Session id; invocations sharing one run the startup check only once
    #[arg(long, env = "ATMLINK_SESSION", global = true)]
    pub session: Option<String>,
}

// ── Output & Color Enums ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Pretty table (default, interactive)
    Table,
    /// Pretty-printed JSON
    Json,
    /// Compact single-line JSON
    JsonCompact,
    /// Plain text, one value per line (scripting)
    Plain,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ColorMode {
    /// Auto-detect (color if terminal is interactive)
    Auto,
    /// Always emit color codes
    Always,
    /// Never emit color codes
    Never,
}

// ── Top-Level Command Enum ───────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Stream connection status, console output and shape counts
    #[command(alias = "w")]
    Watch(WatchArgs),

    /// Send one stack command to the active simulation
    Send(SendArgs),

    /// List simulation contexts, or switch the active one
    #[command(alias = "ctx")]
    Contexts(ContextsArgs),

    /// Manage the configuration file
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

// ── Command Arguments ────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct WatchArgs {
    /// Stop after this many seconds instead of waiting for Ctrl-C
    #[arg(long, short = 'd')]
    pub duration: Option<u64>,

    /// Do not print simulation console lines
    #[arg(long)]
    pub no_echo: bool,
}

#[derive(Debug, Args)]
pub struct SendArgs {
    /// The command, e.g. `CRE KL204 B738 52.3 4.7 90 FL100 250`
    #[arg(required = true, num_args = 1.., trailing_var_arg = true, allow_hyphen_values = true)]
    pub command: Vec<String>,

    /// Return as soon as the command is sent
    #[arg(long)]
    pub no_wait: bool,
}

#[derive(Debug, Args)]
pub struct ContextsArgs {
    /// Make this context the active one
    #[arg(long, short = 's', value_name = "ID")]
    pub select: Option<String>,

    /// Ask the server to start this many additional contexts
    #[arg(long, value_name = "COUNT", conflicts_with = "select")]
    pub add: Option<u32>,

    /// Server to start the new contexts on
    #[arg(long, requires = "add")]
    pub server: Option<String>,
}

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Write a starter config file (uses --url for the default profile)
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Display the resolved configuration
    Show,

    /// Print the config file location
    Path,
}

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}
