//! Command-line surface of the `everywhere` binary.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "everywhere",
    version,
    about = "Everywhere CLI - Manage your cloud sandboxes"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Authenticate with Everywhere
    Login(LoginArgs),
    /// Logout and clear local credentials
    Logout,
    /// Manage sandboxes
    #[command(subcommand, aliases = ["sandbox", "s"])]
    Sandboxes(SandboxCommand),
    /// Manage files in sandboxes
    #[command(subcommand)]
    Files(FilesCommand),
    /// Execute commands in a sandbox
    Exec(ExecArgs),
    /// Run Python in a sandbox, from a .py file or an inline code string
    Run(RunArgs),
    /// Manage CLI configuration
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Args, Debug, Default)]
pub struct LoginArgs {
    /// Authentication token
    pub token: Option<String>,
    /// Authentication token (alternative to the positional argument)
    #[arg(short = 't', long = "token", value_name = "TOKEN")]
    pub token_flag: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum SandboxCommand {
    /// List all sandboxes
    List,
    /// Create a sandbox
    Create(CreateArgs),
    /// Delete a sandbox
    Delete(DeleteArgs),
    /// Start a sandbox
    Start(NameArg),
    /// Stop a sandbox
    Stop(NameArg),
}

#[derive(Args, Debug, Default)]
pub struct CreateArgs {
    /// Sandbox name (auto-generated if empty)
    #[arg(short, long)]
    pub name: Option<String>,
    /// Upstream port
    #[arg(short, long)]
    pub port: Option<String>,
    /// Environment variables KEY=VALUE (repeatable)
    #[arg(short = 'e', long = "env", value_name = "KEY=VALUE")]
    pub env: Vec<String>,
}

#[derive(Args, Debug, Default)]
pub struct DeleteArgs {
    pub name: String,
    /// Force delete without confirmation
    #[arg(short, long)]
    pub force: bool,
}

#[derive(Args, Debug, Default)]
pub struct NameArg {
    pub name: String,
}

#[derive(Subcommand, Debug)]
pub enum FilesCommand {
    /// List files in a sandbox directory
    List(FilesListArgs),
    /// Download files from a sandbox as a zip archive
    Download(DownloadArgs),
    /// Create or update a file in a sandbox (content from --file or stdin)
    Update(UpdateArgs),
    /// Upload a directory or archive into a sandbox
    Upload(UploadArgs),
}

#[derive(Args, Debug)]
pub struct FilesListArgs {
    pub sandbox: String,
    /// Directory to list
    #[arg(long)]
    pub dir: Option<String>,
    /// Maximum depth to descend (0 lets the server decide)
    #[arg(long, default_value_t = 4)]
    pub max_depth: u32,
}

#[derive(Args, Debug, Default)]
pub struct DownloadArgs {
    pub sandbox: String,
    /// Output file path
    #[arg(short, long)]
    pub output: Option<PathBuf>,
    /// Only download this directory
    #[arg(long)]
    pub dir: Option<String>,
}

#[derive(Args, Debug, Default)]
pub struct UpdateArgs {
    pub sandbox: String,
    pub path: String,
    /// Read content from local file
    #[arg(short = 'f', long = "file")]
    pub file: Option<PathBuf>,
    /// Append to existing file instead of overwrite
    #[arg(short, long)]
    pub append: bool,
}

#[derive(Args, Debug)]
pub struct UploadArgs {
    pub sandbox: String,
    pub input: PathBuf,
    /// Target path in sandbox (directory to extract into)
    #[arg(short = 'p', long = "path", default_value = "/")]
    pub target: String,
    /// Archive format. Auto-detected by default
    #[arg(short, long, value_parser = ["zip", "tar.gz"])]
    pub format: Option<String>,
}

#[derive(Args, Debug)]
pub struct ExecArgs {
    pub command: String,
    /// Sandbox name (use 'auto' to create a temporary sandbox)
    #[arg(short, long, default_value = "auto")]
    pub sandbox: String,
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Path to a .py file, or inline Python code
    pub input: String,
    /// Sandbox name (use 'auto' to create a temporary sandbox)
    #[arg(short, long, default_value = "auto")]
    pub sandbox: String,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Show current configuration
    Show,
}
