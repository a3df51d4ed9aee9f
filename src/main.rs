use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use console::style;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use unitgen_cli::config::Config;
use unitgen_cli::conflict::ConflictAction;
use unitgen_cli::output::{OutputHandler, TerminalSink};
use unitgen_cli::scan::collect_source_files;
use unitgen_cli::{
    ConfigProvider, GenerationError, HttpStreamClient, LocalFileStore, Orchestrator, RunOutcome,
    RunRequest, SingleJobTarget,
};

#[derive(Parser)]
#[command(name = "unitgen")]
#[command(about = "Generate unit tests for a project's source files with AI", long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Generate tests for every source file in a project
    Generate {
        /// Project root (defaults to the current directory)
        path: Option<PathBuf>,

        #[command(flatten)]
        options: RunOptions,

        /// Do not ask before starting
        #[arg(short, long)]
        yes: bool,
    },
    /// Generate tests for a single file
    Single {
        file: PathBuf,

        /// Project root (defaults to the current directory)
        #[arg(long)]
        root: Option<PathBuf>,

        #[command(flatten)]
        options: RunOptions,
    },
    /// List the files a batch run would process
    Files {
        path: Option<PathBuf>,
    },
    /// Show the configuration file, optionally writing the defaults
    Config {
        #[arg(long)]
        init: bool,
    },
}

#[derive(Args)]
struct RunOptions {
    /// Provider id (openai or gemini)
    #[arg(long)]
    provider: Option<String>,

    /// Model id
    #[arg(long)]
    model: Option<String>,

    /// Apply the conflict action without asking
    #[arg(long)]
    auto_write: bool,

    /// What to do with existing test files: ask, append, overwrite, skip
    #[arg(long)]
    conflict: Option<ConflictAction>,

    /// Read the prompt template from a file
    #[arg(long)]
    prompt_file: Option<PathBuf>,

    /// Print generated text while it streams
    #[arg(long)]
    preview: bool,
}

impl RunOptions {
    fn apply(&self, config: &mut Config) -> Result<()> {
        if let Some(provider) = &self.provider {
            config.ai.provider = provider.clone();
        }
        if let Some(model) = &self.model {
            config.ai.model = model.clone();
        }
        if self.auto_write {
            config.generation.auto_write = true;
        }
        if let Some(action) = self.conflict {
            config.generation.conflict_action = action;
        }
        if let Some(path) = &self.prompt_file {
            config.generation.prompt = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read prompt file {}", path.display()))?;
        }
        Ok(())
    }
}

fn init_logging(debug: bool) -> Result<()> {
    use tracing_subscriber::EnvFilter;

    let log_dir = Config::config_dir();
    std::fs::create_dir_all(&log_dir)?;
    let log_file = std::fs::File::create(log_dir.join("unitgen.log"))?;

    let default_level = if debug { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_env("UNITGEN_LOG").unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(log_file)
        .with_ansi(false)
        .init();
    Ok(())
}

fn project_root(path: Option<PathBuf>) -> Result<PathBuf> {
    let root = match path {
        Some(p) => p,
        None => std::env::current_dir()?,
    };
    root.canonicalize()
        .with_context(|| format!("project root {} does not exist", root.display()))
}

/// Directory to enumerate: the configured source root when it exists.
fn scan_root(config: &Config, root: &Path) -> PathBuf {
    let source_root = root.join(&config.naming.source_root);
    if source_root.is_dir() {
        source_root
    } else {
        root.to_path_buf()
    }
}

fn build_orchestrator(config: &Config, output: OutputHandler) -> Result<Arc<Orchestrator>> {
    let client = HttpStreamClient::from_config(config)?;
    Ok(Arc::new(Orchestrator::new(
        Arc::new(client),
        Arc::new(LocalFileStore::new()),
        Arc::new(TerminalSink::new(output)),
    )))
}

/// Cancel the run on Ctrl-C; it stops at the next safe point.
fn install_ctrl_c(orchestrator: &Arc<Orchestrator>) {
    let orchestrator = Arc::clone(orchestrator);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!(
                "\n{}",
                style("Cancelling after the current step...").yellow()
            );
            orchestrator.request_cancellation();
        }
    });
}

/// Keep answering conflict prompts until the run finishes or stops.
async fn follow_run(
    orchestrator: &Orchestrator,
    mut outcome: RunOutcome,
    prompt: &mut OutputHandler,
) -> Result<()> {
    loop {
        match outcome {
            RunOutcome::AwaitingDecision { output_path, .. } => {
                let choice = match prompt.ask_conflict_choice(&output_path) {
                    Ok(choice) => choice,
                    Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {
                        orchestrator.request_cancellation();
                        return Ok(());
                    }
                    Err(e) => return Err(e.into()),
                };
                outcome = orchestrator.resolve_conflict(choice).await?;
            }
            RunOutcome::Finished(_) | RunOutcome::Terminated(_) => return Ok(()),
        }
    }
}

async fn run_generate(
    path: Option<PathBuf>,
    options: RunOptions,
    yes: bool,
    debug: bool,
) -> Result<()> {
    let mut config = Config::load_or_default()?;
    options.apply(&mut config)?;
    let root = project_root(path)?;

    let files = collect_source_files(
        &scan_root(&config, &root),
        &config.ignore_list(),
        &config.generation.extensions,
        &config.naming.suffix,
    )?;

    let mut prompt = OutputHandler::new().with_debug(debug);
    if files.is_empty() {
        prompt.print_system("No source files found.")?;
        return Ok(());
    }

    if !yes {
        let question = format!("Generate tests for {} file(s) in {}?", files.len(), root.display());
        if !prompt.confirm(&question)? {
            return Ok(());
        }
    }

    let orchestrator = build_orchestrator(
        &config,
        OutputHandler::new().with_debug(debug).with_preview(options.preview),
    )?;
    install_ctrl_c(&orchestrator);

    let request = RunRequest {
        files,
        settings: config.session_settings(&root),
    };
    match orchestrator.start_batch(request).await {
        Ok(outcome) => follow_run(&orchestrator, outcome, &mut prompt).await,
        Err(GenerationError::InvalidRequest(message)) => {
            prompt.print_error(&message)?;
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

async fn run_single(
    file: PathBuf,
    root: Option<PathBuf>,
    options: RunOptions,
    debug: bool,
) -> Result<()> {
    let mut config = Config::load_or_default()?;
    options.apply(&mut config)?;
    let root = project_root(root)?;
    let file = file
        .canonicalize()
        .with_context(|| format!("{} does not exist", file.display()))?;

    let orchestrator = build_orchestrator(
        &config,
        OutputHandler::new().with_debug(debug).with_preview(options.preview),
    )?;
    install_ctrl_c(&orchestrator);

    let mut prompt = OutputHandler::new().with_debug(debug);
    let request = RunRequest {
        files: Vec::new(),
        settings: config.session_settings(&root),
    };
    match orchestrator
        .run_single_job(SingleJobTarget::File(file), request)
        .await
    {
        Ok(outcome) => follow_run(&orchestrator, outcome, &mut prompt).await,
        Err(GenerationError::InvalidRequest(message)) => {
            prompt.print_error(&message)?;
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

fn run_files(path: Option<PathBuf>) -> Result<()> {
    let config = Config::load_or_default()?;
    let root = project_root(path)?;
    let files = collect_source_files(
        &scan_root(&config, &root),
        &config.ignore_list(),
        &config.generation.extensions,
        &config.naming.suffix,
    )?;

    for file in &files {
        let display = file.strip_prefix(&root).unwrap_or(file);
        println!("{}", display.display());
    }
    println!("{}", style(format!("{} file(s)", files.len())).dim());
    Ok(())
}

fn run_config(init: bool) -> Result<()> {
    let path = Config::get_config_path();
    if init {
        if path.exists() {
            println!("{} already exists", path.display());
        } else {
            Config::default().save()?;
            println!("Wrote default configuration to {}", path.display());
        }
        return Ok(());
    }

    let mut config = Config::load_or_default()?;
    for key in [&mut config.ai.openai_api_key, &mut config.ai.gemini_api_key] {
        if !key.is_empty() {
            *key = "********".to_string();
        }
    }
    println!("{}", style(path.display()).dim());
    print!("{}", serde_yaml::to_string(&config)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.debug)?;

    match cli.command {
        Command::Generate { path, options, yes } => run_generate(path, options, yes, cli.debug).await,
        Command::Single { file, root, options } => run_single(file, root, options, cli.debug).await,
        Command::Files { path } => run_files(path),
        Command::Config { init } => run_config(init),
    }
}
