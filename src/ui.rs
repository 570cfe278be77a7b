// UI layer: one handler per subcommand. Handlers check credentials, build an
// `ApiClient`, call exactly one API operation and print the result. Text goes
// to the `out` writer so the flows can be exercised without a terminal;
// interactive prompts use `dialoguer` and spinners use `indicatif`.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, BufRead, IsTerminal, Read, Write};
use std::path::{Path, PathBuf, MAIN_SEPARATOR};
use std::time::Duration;

use dialoguer::{Confirm, Password};
use indicatif::{ProgressBar, ProgressStyle};
use tabled::settings::Style;
use tabled::{Table, Tabled};
use tracing::info;

use crate::api::{ApiClient, CreateSandboxRequest, RemoteFile, Sandbox, WriteMode};
use crate::archive::UploadSource;
use crate::cli::{
    Command, ConfigCommand, CreateArgs, DeleteArgs, DownloadArgs, ExecArgs, FilesCommand,
    FilesListArgs, LoginArgs, RunArgs, SandboxCommand, UpdateArgs, UploadArgs,
};
use crate::config::Config;
use crate::error::{CliError, CliResult};

const PREVIEW_CHARS: usize = 100;

/// Route a parsed command to its handler.
pub fn dispatch(command: Command, config: &mut Config, out: &mut dyn Write) -> CliResult<()> {
    match command {
        Command::Login(args) => handle_login(config, args, out),
        Command::Logout => handle_logout(config, out),
        Command::Sandboxes(cmd) => match cmd {
            SandboxCommand::List => handle_sandbox_list(config, out),
            SandboxCommand::Create(args) => handle_sandbox_create(config, args, out),
            SandboxCommand::Delete(args) => handle_sandbox_delete(config, args, out),
            SandboxCommand::Start(args) => handle_sandbox_start(config, &args.name, out),
            SandboxCommand::Stop(args) => handle_sandbox_stop(config, &args.name, out),
        },
        Command::Files(cmd) => match cmd {
            FilesCommand::List(args) => handle_files_list(config, args, out),
            FilesCommand::Download(args) => handle_files_download(config, args, out),
            FilesCommand::Update(args) => handle_files_update(config, args, out),
            FilesCommand::Upload(args) => handle_files_upload(config, args, out),
        },
        Command::Exec(args) => handle_exec(config, args, out),
        Command::Run(args) => handle_run(config, args, out),
        Command::Config(ConfigCommand::Show) => handle_config_show(config, out),
    }
}

/// Client for commands that need credentials. Fails before any network
/// traffic when no token is stored.
fn authed_client(config: &Config) -> CliResult<ApiClient> {
    let token = config.require_auth()?;
    ApiClient::new(config.api_url(), Some(token.to_string()))
}

fn spinner(message: impl Into<String>) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    let style = ProgressStyle::with_template("{spinner} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner());
    spinner.set_style(style);
    spinner.set_message(message.into());
    spinner.enable_steady_tick(Duration::from_millis(100));
    spinner
}

fn handle_login(config: &mut Config, args: LoginArgs, out: &mut dyn Write) -> CliResult<()> {
    let token = match resolve_token(args.token, args.token_flag) {
        Some(token) => token,
        None => {
            let entered = Password::new()
                .with_prompt("Token")
                .allow_empty_password(true)
                .interact()
                .map_err(CliError::Terminal)?;
            entered.trim().to_string()
        }
    };
    if token.is_empty() {
        return Err(CliError::validation("token cannot be empty"));
    }

    writeln!(out, "Authenticating with provided token...")?;
    let client = ApiClient::new(config.api_url(), Some(token.clone()))?;
    let status = client.auth_status()?;
    if !status.authenticated {
        return Err(CliError::Authentication("invalid or expired token".into()));
    }

    config.set_credentials(&token, &status.user.email)?;
    info!(email = %status.user.email, "logged in");
    writeln!(
        out,
        "Successfully logged in as {} {} ({})",
        status.user.first_name, status.user.last_name, status.user.email
    )?;
    Ok(())
}

/// Positional token wins when non-blank, then the `--token` flag.
fn resolve_token(positional: Option<String>, flag: Option<String>) -> Option<String> {
    [positional, flag]
        .into_iter()
        .flatten()
        .map(|token| token.trim().to_string())
        .find(|token| !token.is_empty())
}

fn handle_logout(config: &mut Config, out: &mut dyn Write) -> CliResult<()> {
    config.clear_auth()?;
    info!("logged out");
    writeln!(out, "Successfully logged out")?;
    Ok(())
}

#[derive(Tabled)]
struct SandboxRow<'a> {
    #[tabled(rename = "NAME")]
    name: &'a str,
    #[tabled(rename = "STATUS")]
    status: &'a str,
    #[tabled(rename = "IP ADDRESS")]
    ip_address: &'a str,
    #[tabled(rename = "CREATED")]
    created_at: &'a str,
}

impl<'a> From<&'a Sandbox> for SandboxRow<'a> {
    fn from(sandbox: &'a Sandbox) -> Self {
        SandboxRow {
            name: &sandbox.name,
            status: &sandbox.status,
            ip_address: &sandbox.ip_address,
            created_at: &sandbox.created_at,
        }
    }
}

fn render_sandbox_table(sandboxes: &[Sandbox]) -> String {
    let rows = sandboxes.iter().map(SandboxRow::from);
    Table::new(rows).with(Style::blank()).to_string()
}

fn handle_sandbox_list(config: &Config, out: &mut dyn Write) -> CliResult<()> {
    let client = authed_client(config)?;
    let page = client.list_sandboxes()?;
    if page.items.is_empty() {
        writeln!(out, "No sandboxes found")?;
        return Ok(());
    }
    writeln!(out, "{}", render_sandbox_table(&page.items))?;
    Ok(())
}

/// Parse repeated `KEY=VALUE` flags. Splits on the first `=` and trims both
/// sides; a missing `=` or a blank key is rejected.
pub fn parse_env_pairs(pairs: &[String]) -> CliResult<BTreeMap<String, String>> {
    let mut secrets = BTreeMap::new();
    for kv in pairs {
        let (key, value) = kv.split_once('=').ok_or_else(|| {
            CliError::validation(format!("invalid env '{kv}' (expected KEY=VALUE)"))
        })?;
        let key = key.trim();
        if key.is_empty() {
            return Err(CliError::validation(format!("empty env key in '{kv}'")));
        }
        secrets.insert(key.to_string(), value.trim().to_string());
    }
    Ok(secrets)
}

fn handle_sandbox_create(config: &Config, args: CreateArgs, out: &mut dyn Write) -> CliResult<()> {
    let client = authed_client(config)?;
    let secrets = parse_env_pairs(&args.env)?;
    let secret_count = secrets.len();

    let req = CreateSandboxRequest {
        name: args.name.filter(|n| !n.is_empty()),
        port: args.port.filter(|p| !p.is_empty()),
        secrets: (!secrets.is_empty()).then_some(secrets),
    };
    let sandbox = client.create_sandbox(&req)?;
    info!(name = %sandbox.name, status = %sandbox.status, "sandbox created");

    writeln!(out, "Sandbox '{}' created", sandbox.name)?;
    writeln!(out, "Status: {}", sandbox.status)?;
    if !sandbox.ip_address.is_empty() {
        writeln!(out, "IP Address: {}", sandbox.ip_address)?;
    }
    if secret_count > 0 {
        writeln!(out, "Environment: {secret_count} variables")?;
    }
    Ok(())
}

fn handle_sandbox_delete(config: &Config, args: DeleteArgs, out: &mut dyn Write) -> CliResult<()> {
    config.require_auth()?;
    let name = args.name;

    if !args.force {
        let prompt = format!("Are you sure you want to delete sandbox '{name}'?");
        if !confirm(&prompt, out)? {
            writeln!(out, "Delete cancelled")?;
            return Ok(());
        }
    }

    authed_client(config)?.delete_sandbox(&name)?;
    info!(%name, "sandbox deleted");
    writeln!(out, "Sandbox '{name}' deleted")?;
    Ok(())
}

/// Ask a yes/no question, defaulting to no. Piped stdin is read as a line
/// so `echo y | everywhere sandboxes delete NAME` works without a terminal.
fn confirm(prompt: &str, out: &mut dyn Write) -> CliResult<bool> {
    let stdin = io::stdin();
    if stdin.is_terminal() {
        return Confirm::new()
            .with_prompt(prompt)
            .default(false)
            .interact()
            .map_err(CliError::Terminal);
    }
    write!(out, "{prompt} (y/N): ")?;
    out.flush()?;
    read_confirmation(&mut stdin.lock()).map_err(CliError::Terminal)
}

/// Only `y` or `yes` (any case) confirms; anything else, including EOF,
/// declines.
fn read_confirmation(input: &mut dyn BufRead) -> io::Result<bool> {
    let mut line = String::new();
    input.read_line(&mut line)?;
    Ok(matches!(
        line.trim().to_lowercase().as_str(),
        "y" | "yes"
    ))
}

fn handle_sandbox_start(config: &Config, name: &str, out: &mut dyn Write) -> CliResult<()> {
    authed_client(config)?.start_sandbox(name)?;
    writeln!(out, "Sandbox '{name}' started")?;
    Ok(())
}

fn handle_sandbox_stop(config: &Config, name: &str, out: &mut dyn Write) -> CliResult<()> {
    authed_client(config)?.stop_sandbox(name)?;
    writeln!(out, "Sandbox '{name}' stopped")?;
    Ok(())
}

/// Single-line preview: newlines flattened, capped at `PREVIEW_CHARS`.
fn content_preview(content: &str) -> String {
    let mut preview: String = content.chars().take(PREVIEW_CHARS).collect();
    if content.chars().count() > PREVIEW_CHARS {
        preview.push_str("...");
    }
    preview.replace('\n', " ")
}

fn render_file(file: &RemoteFile, out: &mut dyn Write) -> io::Result<()> {
    writeln!(out, "📄 {}", file.path)?;
    if !file.content.is_empty() {
        writeln!(out, "   Preview: {}", content_preview(&file.content))?;
    }
    writeln!(out)
}

fn handle_files_list(config: &Config, args: FilesListArgs, out: &mut dyn Write) -> CliResult<()> {
    let client = authed_client(config)?;
    let files = client.list_files(&args.sandbox, args.dir.as_deref(), args.max_depth)?;
    if files.is_empty() {
        writeln!(out, "No files found")?;
        return Ok(());
    }

    writeln!(out, "Files in sandbox '{}':\n", args.sandbox)?;
    for file in &files {
        render_file(file, out)?;
    }
    Ok(())
}

fn handle_files_download(
    config: &Config,
    args: DownloadArgs,
    out: &mut dyn Write,
) -> CliResult<()> {
    let client = authed_client(config)?;
    writeln!(out, "Downloading files from {}...", args.sandbox)?;

    let mut download = client.download_zip(&args.sandbox, args.dir.as_deref())?;
    let output = args
        .output
        .unwrap_or_else(|| PathBuf::from(&download.filename));
    let mut file = File::create(&output).map_err(|err| {
        CliError::filesystem(format!("failed to create output file {}", output.display()), err)
    })?;

    let progress = spinner(format!("Writing {}", output.display()));
    let written = io::copy(&mut download.body, &mut file);
    progress.finish_and_clear();
    let written = written.map_err(|err| {
        CliError::filesystem(format!("failed to write {}", output.display()), err)
    })?;

    info!(sandbox = %args.sandbox, bytes = written, path = %output.display(), "download complete");
    writeln!(out, "Downloaded {written} bytes to {}", output.display())?;
    Ok(())
}

fn handle_files_update(config: &Config, args: UpdateArgs, out: &mut dyn Write) -> CliResult<()> {
    let client = authed_client(config)?;
    let content = match &args.file {
        Some(path) => read_local_file(path)?,
        None => read_piped_stdin()?,
    };
    let mode = if args.append {
        WriteMode::Append
    } else {
        WriteMode::Overwrite
    };

    client.update_file(&args.sandbox, &args.path, &content, mode)?;
    writeln!(out, "Updated {} in sandbox '{}'", args.path, args.sandbox)?;
    Ok(())
}

fn read_local_file(path: &Path) -> CliResult<String> {
    fs::read_to_string(path).map_err(|err| {
        CliError::filesystem(format!("failed to read local file {}", path.display()), err)
    })
}

fn read_piped_stdin() -> CliResult<String> {
    let stdin = io::stdin();
    if stdin.is_terminal() {
        return Err(CliError::validation(
            "no input provided. Use --file or pipe content via stdin",
        ));
    }
    let mut content = String::new();
    stdin
        .lock()
        .read_to_string(&mut content)
        .map_err(|err| CliError::filesystem("failed to read from stdin", err))?;
    Ok(content)
}

fn handle_files_upload(config: &Config, args: UploadArgs, out: &mut dyn Write) -> CliResult<()> {
    let client = authed_client(config)?;
    upload(&client, &args, out)
}

/// Pack (if needed) and upload. The temporary archive, if one was built, is
/// owned by `source` and removed when this function returns.
pub fn upload(client: &ApiClient, args: &UploadArgs, out: &mut dyn Write) -> CliResult<()> {
    let source = UploadSource::prepare(&args.input)?;
    let format = args
        .format
        .clone()
        .unwrap_or_else(|| source.format().as_str().to_string());

    writeln!(
        out,
        "Uploading {} to {}:{} as {}...",
        source.path().display(),
        args.sandbox,
        args.target,
        format
    )?;
    let progress = spinner("Uploading...");
    let result = client.upload_archive(&args.sandbox, source.path(), &args.target, &format);
    progress.finish_and_clear();
    result?;

    info!(sandbox = %args.sandbox, target = %args.target, %format, "archive uploaded");
    writeln!(out, "Archive uploaded and extracted successfully")?;
    Ok(())
}

fn handle_exec(config: &Config, args: ExecArgs, out: &mut dyn Write) -> CliResult<()> {
    let client = authed_client(config)?;
    let output = client.run_command(Some(&args.sandbox), &args.command)?;
    writeln!(out, "{output}")?;
    Ok(())
}

/// What `run` was asked to execute.
#[derive(Debug, PartialEq, Eq)]
pub enum PythonSource {
    File(PathBuf),
    Inline(String),
}

/// Existing files must be `.py`; a missing path that looks like a file name
/// is an error rather than being sent as code.
pub fn classify_run_input(input: &str) -> CliResult<PythonSource> {
    let path = Path::new(input);
    match fs::metadata(path) {
        Ok(metadata) if metadata.is_dir() => Err(CliError::validation(format!(
            "file not found or is a directory: {input}"
        ))),
        Ok(_) => {
            let ext = path
                .extension()
                .map(|ext| format!(".{}", ext.to_string_lossy().to_lowercase()))
                .unwrap_or_default();
            if ext == ".py" {
                Ok(PythonSource::File(path.to_path_buf()))
            } else {
                Err(CliError::validation(format!(
                    "only Python .py files are supported. File extension '{ext}' is not supported"
                )))
            }
        }
        Err(_) => {
            if input.to_lowercase().ends_with(".py") || input.contains(MAIN_SEPARATOR) {
                Err(CliError::validation(format!(
                    "file not found or is a directory: {input}"
                )))
            } else {
                Ok(PythonSource::Inline(input.to_string()))
            }
        }
    }
}

fn handle_run(config: &Config, args: RunArgs, out: &mut dyn Write) -> CliResult<()> {
    let client = authed_client(config)?;
    let code = match classify_run_input(&args.input)? {
        PythonSource::File(path) => {
            let code = read_local_file(&path)?;
            writeln!(
                out,
                "Running {} as Python in sandbox '{}'...",
                path.display(),
                args.sandbox
            )?;
            code
        }
        PythonSource::Inline(code) => code,
    };

    let output = client.run_python(Some(&args.sandbox), &code, None)?;
    writeln!(out, "{output}")?;
    Ok(())
}

fn handle_config_show(config: &Config, out: &mut dyn Write) -> CliResult<()> {
    writeln!(out, "API Endpoint: {}", config.api_url())?;
    writeln!(out, "User Email: {}", config.user_email())?;
    writeln!(out, "Authenticated: {}", config.is_authenticated())?;
    Ok(())
}
