//! CLI subcommand implementations.

use std::io::{self, BufRead, Write};
use std::path::Path;
use std::sync::atomic::Ordering;

use anyhow::Context;

use triage::cache::{DecodedImage, ImageLoader, Loader};
use triage::config::AppConfig;
use triage::error::TriageError;
use triage::scanner;
use triage::session::{Direction, Outcome, Session};

/// One line typed at the prompt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    Load,
    Undo,
    Move(Direction),
    Status,
    Help,
    Quit,
}

impl Command {
    /// Vim keys or full words, case-insensitive.
    pub fn parse(line: &str) -> Option<Command> {
        let cmd = match line.trim().to_lowercase().as_str() {
            "h" | "left" => Command::Move(Direction::Left),
            "l" | "right" => Command::Move(Direction::Right),
            "j" | "down" => Command::Move(Direction::Down),
            "k" | "u" | "undo" => Command::Undo,
            "r" | "load" | "reload" => Command::Load,
            "s" | "status" => Command::Status,
            "?" | "help" => Command::Help,
            "q" | "quit" | "exit" => Command::Quit,
            _ => return None,
        };
        Some(cmd)
    }
}

const HELP: &str = "\
  h, left     move to the left folder
  l, right    move to the right folder
  j, down     move to the down folder
  k, u, undo  undo the last move
  r, load     rescan the source folder
  s, status   cache and prefetch counters
  q, quit     exit";

/// Short description of a cached payload for the status line.
pub trait Describe {
    fn describe(&self) -> String;
}

impl Describe for DecodedImage {
    fn describe(&self) -> String {
        format!("{}x{}", self.width, self.height)
    }
}

impl Describe for Vec<u8> {
    fn describe(&self) -> String {
        format!("{} bytes", self.len())
    }
}

pub fn run(config: &AppConfig) -> anyhow::Result<()> {
    let session =
        Session::open(config.session_options(), ImageLoader).context("cannot start session")?;
    let stdin = io::stdin();
    let stdout = io::stdout();
    interact(&session, stdin.lock(), stdout.lock())
}

/// Load once, then execute commands from `input` until `quit` or EOF.
pub fn interact<L, R, W>(session: &Session<L>, input: R, mut out: W) -> anyhow::Result<()>
where
    L: Loader,
    L::Payload: Describe,
    R: BufRead,
    W: Write,
{
    let source = &session.options().source;
    if source.as_os_str().is_empty() {
        writeln!(out, "No source folder. Set SourcePath in the config or pass --source.")?;
    }
    execute(session, Command::Load, &mut out)?;

    for line in input.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match Command::parse(&line) {
            Some(Command::Quit) => break,
            Some(cmd) => execute(session, cmd, &mut out)?,
            None => writeln!(out, "unknown command {:?} (? for help)", line.trim())?,
        }
    }

    session.close();
    Ok(())
}

fn execute<L, W>(session: &Session<L>, cmd: Command, out: &mut W) -> anyhow::Result<()>
where
    L: Loader,
    L::Payload: Describe,
    W: Write,
{
    let result = match cmd {
        Command::Load => session.load(),
        Command::Undo => session.undo(),
        Command::Move(direction) => session.move_to(direction),
        Command::Status => return status(session, out),
        Command::Help => {
            writeln!(out, "{}", HELP)?;
            return Ok(());
        }
        Command::Quit => return Ok(()),
    };

    match result {
        Ok(Outcome::Busy) => writeln!(out, "busy")?,
        Ok(_) => {}
        Err(e @ TriageError::Exhausted { .. }) => writeln!(out, "error: {}", e)?,
        Err(e) => return Err(e.into()),
    }
    print_state(session, out)
}

fn print_state<L, W>(session: &Session<L>, out: &mut W) -> anyhow::Result<()>
where
    L: Loader,
    L::Payload: Describe,
    W: Write,
{
    let state = session.snapshot();
    match (&state.current_path, &state.current_image) {
        (Some(path), Some(payload)) => writeln!(
            out,
            "[{}] {} ({})",
            state.progress_text,
            path.display(),
            payload.describe()
        )?,
        _ => writeln!(out, "[{}] nothing left to sort", state.progress_text)?,
    }
    Ok(())
}

fn status<L: Loader, W: Write>(session: &Session<L>, out: &mut W) -> anyhow::Result<()> {
    let cache = session.cache();
    let stats = session.prefetch_stats();
    writeln!(out, "source:   {}", session.options().source.display())?;
    writeln!(
        out,
        "cache:    {} files, {} bytes (max {})",
        cache.len(),
        cache.resident_bytes(),
        cache.limits().max_entries
    )?;
    writeln!(
        out,
        "prefetch: {} loaded, {} skipped, {} failed, {} passes",
        stats.loaded.load(Ordering::Relaxed),
        stats.skipped.load(Ordering::Relaxed),
        stats.failed.load(Ordering::Relaxed),
        stats.passes.load(Ordering::Relaxed)
    )?;
    let last = stats.last_error();
    if !last.is_empty() {
        writeln!(out, "last err: {}", last)?;
    }
    Ok(())
}

pub fn scan(config: &AppConfig, path: Option<&Path>) {
    let root = match path.or(config.source_path.as_deref()) {
        Some(p) => p,
        None => {
            println!("No source folder. Set SourcePath in the config or pass a PATH.");
            return;
        }
    };
    let found = scanner::scan_candidates(root, config.max_candidates);
    for p in &found {
        println!("{}", p.display());
    }
    eprintln!("{} candidates", found.len());
}

pub fn show_config(path: &Path, config: &AppConfig) -> anyhow::Result<()> {
    println!("# {}", path.display());
    println!("{}", serde_json::to_string_pretty(config)?);
    Ok(())
}
