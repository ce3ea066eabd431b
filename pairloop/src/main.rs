//! `pairloop`: pack, ask, unpack, test, repeat.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing::debug;

use pairloop::console::{Console, OutputConfig};
use pairloop::core::progress::{format_cost, format_count};
use pairloop::error::ProviderError;
use pairloop::exit_codes;
use pairloop::io::chat_store::list_sessions;
use pairloop::io::config::{PairloopConfig, load_config, write_config};
use pairloop::io::gate::LineGate;
use pairloop::io::git::Git;
use pairloop::io::pack::pack;
use pairloop::io::paths::PairloopPaths;
use pairloop::io::provider::CommandStreamAdapter;
use pairloop::io::replay::ReplayAdapter;
use pairloop::io::stream::StreamAdapter;
use pairloop::io::test_runner::CommandTestRunner;
use pairloop::io::unpack::{UnpackOptions, parse_answer, unpack};
use pairloop::logging;
use pairloop::looping::{LoopStop, run_loop, session_usage};
use pairloop::session::Session;
use pairloop::step::{Orchestrator, StepResult};

#[derive(Parser)]
#[command(name = "pairloop", version, about = "AI pair-programming loop")]
struct Cli {
    /// Answer yes at every gate.
    #[arg(short, long, global = true)]
    yes: bool,
    /// Archive the current chat and start a new one.
    #[arg(long, global = true)]
    new: bool,
    /// Model id to start with.
    #[arg(long, global = true)]
    model: Option<String>,
    /// Provider of `--model`.
    #[arg(long, global = true)]
    provider: Option<String>,
    /// Verbose tracing and full error reports.
    #[arg(long, global = true)]
    debug: bool,
    /// One-line progress.
    #[arg(long, global = true)]
    tiny: bool,
    /// Replay recorded responses from a fixture directory instead of a provider.
    #[arg(long, global = true, value_name = "DIR")]
    replay: Option<PathBuf>,
    /// Project root.
    #[arg(long, global = true, value_name = "DIR", default_value = ".")]
    root: PathBuf,
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the chat loop (default). INPUT is a markdown file or raw text.
    Chat { input: Option<String> },
    /// Show the current and archived chats.
    List,
    /// Expand the checklist of a markdown file into file contents.
    Pack {
        input: String,
        /// Write the result here instead of stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Apply the files and commands of an answer.
    Unpack {
        answer: PathBuf,
        /// Only describe what would happen.
        #[arg(long)]
        dry: bool,
    },
    /// List the model catalog.
    Models { filter: Option<String> },
    /// Write `.pairloop/config.toml` with defaults.
    Init {
        /// Overwrite an existing config.
        #[arg(short, long)]
        force: bool,
    },
}

fn main() {
    let cli = Cli::parse();
    logging::init(cli.debug);
    match run(&cli) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            if cli.debug {
                eprintln!("Error: {err:?}");
            } else {
                eprintln!("Error: {err:#}");
            }
            if let Some(provider) = err.downcast_ref::<ProviderError>() {
                debug!(class = ?provider.class(), "fatal provider error");
            }
            std::process::exit(exit_codes::FATAL);
        }
    }
}

fn run(cli: &Cli) -> Result<i32> {
    match &cli.command {
        None => cmd_chat(cli, None),
        Some(Command::Chat { input }) => cmd_chat(cli, input.as_deref()),
        Some(Command::List) => cmd_list(cli),
        Some(Command::Pack { input, output }) => cmd_pack(cli, input, output.as_deref()),
        Some(Command::Unpack { answer, dry }) => cmd_unpack(cli, answer, *dry),
        Some(Command::Models { filter }) => cmd_models(cli, filter.as_deref()),
        Some(Command::Init { force }) => cmd_init(cli, *force),
    }
}

fn cmd_chat(cli: &Cli, input: Option<&str>) -> Result<i32> {
    let session = Session::open(&cli.root, cli.new)?;
    let text = input.map(|input| read_input(&cli.root, input)).transpose()?;
    match &cli.replay {
        Some(dir) => chat_with(cli, session, text, ReplayAdapter::new(dir)?),
        None => {
            let provider = &session.config.provider;
            if provider.command.is_empty() {
                bail!(
                    "no provider configured: set [provider].command in {} or pass --replay <DIR>",
                    session.paths.config_path.display()
                );
            }
            let adapter = CommandStreamAdapter::new(
                provider.command.clone(),
                &session.paths.root,
                provider.timeout(),
            );
            chat_with(cli, session, text, adapter)
        }
    }
}

fn chat_with<A: StreamAdapter>(
    cli: &Cli,
    session: Session,
    text: Option<String>,
    adapter: A,
) -> Result<i32> {
    let config = &session.config;
    let model = match (&cli.model, &cli.provider) {
        (Some(id), provider) => config.resolve_model(id, provider.as_deref())?,
        (None, Some(provider)) => config.resolve_model(&config.default_model, Some(provider))?,
        (None, None) => config.default_model_ref(),
    };
    let tests = CommandTestRunner::from_config(&session.config.test);
    let mut git = Git::new(&session.paths.root);
    let console = Console::stdout(OutputConfig {
        tiny: cli.tiny,
        debug: cli.debug,
    });
    let mut orchestrator = Orchestrator::new(session, adapter, tests, LineGate::stdio(), console);
    orchestrator.auto_confirm = cli.yes;
    orchestrator.model = model;

    let outcome = run_loop(&mut orchestrator, text, &mut git, |step| {
        if let StepResult::Replied { .. } = step.result {
            debug!(step = step.step, "user replied at the unpack gate");
        }
    })?;
    let (usage, cost) = session_usage(&orchestrator)?;
    let totals = format!(
        "{} steps, {} tokens, {}",
        outcome.steps_executed,
        format_count(usage.total_tokens()),
        format_cost(cost)
    );
    let code = match outcome.stop {
        LoopStop::Done => {
            let committed = if outcome.committed { ", committed" } else { "" };
            orchestrator.console.line(format!("Done: tests pass ({totals}{committed})"));
            exit_codes::OK
        }
        LoopStop::Cancelled { quiet: true } => exit_codes::OK,
        LoopStop::Cancelled { quiet: false } => {
            orchestrator.console.line(format!("Cancelled ({totals})"));
            exit_codes::OK
        }
        LoopStop::FailedBudget { fails, max_fails } => {
            orchestrator.console.line(format!(
                "Stuck: {fails} of {max_fails} allowed failing steps ({totals})"
            ));
            exit_codes::STUCK
        }
    };
    Ok(code)
}

/// `input` is a file path when one exists, raw text otherwise.
fn read_input(root: &Path, input: &str) -> Result<String> {
    for candidate in [PathBuf::from(input), root.join(input)] {
        if candidate.is_file() {
            return fs::read_to_string(&candidate)
                .with_context(|| format!("read {}", candidate.display()));
        }
    }
    Ok(input.to_string())
}

fn cmd_list(cli: &Cli) -> Result<i32> {
    let paths = PairloopPaths::new(&cli.root);
    let sessions = list_sessions(&paths)?;
    if sessions.is_empty() {
        println!("No chats yet.");
        return Ok(exit_codes::OK);
    }
    for session in sessions {
        let when = session.archived_at.as_deref().unwrap_or("current");
        println!(
            "{} | {} | {} messages | {} steps | {}",
            session.id,
            when,
            session.messages,
            session.steps,
            format_cost(session.cost)
        );
    }
    Ok(exit_codes::OK)
}

fn cmd_pack(cli: &Cli, input: &str, output: Option<&Path>) -> Result<i32> {
    let config = load_project_config(&cli.root)?;
    let text = read_input(&cli.root, input)?;
    let packed = pack(&text, &cli.root, &config.pack.ignore)?;
    for line in &packed.errors {
        eprintln!("! Could not read: {line}");
    }
    match output {
        Some(path) => {
            fs::write(path, &packed.text).with_context(|| format!("write {}", path.display()))?;
            println!(
                "Packed {} items into {}",
                packed.injected.len(),
                path.display()
            );
        }
        None => {
            let mut out = io::stdout().lock();
            out.write_all(packed.text.as_bytes()).context("write stdout")?;
        }
    }
    Ok(exit_codes::OK)
}

fn cmd_unpack(cli: &Cli, answer: &Path, dry: bool) -> Result<i32> {
    let config = load_project_config(&cli.root)?;
    let text =
        fs::read_to_string(answer).with_context(|| format!("read {}", answer.display()))?;
    let parsed = parse_answer(&text);
    let options = UnpackOptions {
        root: &cli.root,
        dry_run: dry,
        ignore: &config.pack.ignore,
        bash_timeout: config.test.timeout(),
    };
    for line in unpack(&parsed, options) {
        println!("{line}");
    }
    Ok(exit_codes::OK)
}

fn cmd_models(cli: &Cli, filter: Option<&str>) -> Result<i32> {
    let config = load_project_config(&cli.root)?;
    let filter = filter.map(str::to_lowercase);
    for model in &config.models {
        let name = model.model_ref().to_string().to_lowercase();
        if filter.as_deref().is_some_and(|f| !name.contains(f)) {
            continue;
        }
        let price = model.pricing.per_million();
        println!(
            "{:<40} {:<22} {:>10} ctx | ${:.2} / ${:.2} per 1M",
            model.id,
            model.provider,
            format_count(model.context_length),
            price.prompt,
            price.completion
        );
    }
    Ok(exit_codes::OK)
}

fn cmd_init(cli: &Cli, force: bool) -> Result<i32> {
    let paths = PairloopPaths::new(&cli.root);
    if paths.config_path.exists() && !force {
        println!("{} already exists", paths.config_path.display());
        return Ok(exit_codes::OK);
    }
    write_config(&paths.config_path, &PairloopConfig::default())?;
    println!("Wrote {}", paths.config_path.display());
    Ok(exit_codes::OK)
}

fn load_project_config(root: &Path) -> Result<PairloopConfig> {
    let paths = PairloopPaths::new(root);
    load_config(&paths.config_path).with_context(|| format!("load {}", paths.config_path.display()))
}
