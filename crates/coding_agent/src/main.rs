use std::cell::RefCell;
use std::io::{self, BufRead, IsTerminal, Write};
use std::sync::Arc;

use anyhow::Context;
use coding_agent::commands::{parse_slash_command, SlashCommand, HELP_TEXT};
use coding_agent::config::AgentConfig;
use coding_agent::context::GitContextProvider;
use coding_agent::model_io::JsonlModelIoLogger;
use coding_agent::orchestrator::{Orchestrator, TurnOptions, TurnResult};
use coding_agent::providers;
use coding_agent::telemetry::TracingTelemetry;
use coding_agent::tools::BuiltinToolExecutor;
use tracing_subscriber::EnvFilter;

const STREAM_ENV_VAR: &str = "CODING_AGENT_STREAM";
const MODEL_IO_LOG_ENV_VAR: &str = "CODING_AGENT_MODEL_IO_LOG";

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();

    let config = AgentConfig::from_env().context("failed to load agent config")?;
    let provider = providers::provider_from_env().context("failed to initialize provider")?;
    let cwd = std::env::current_dir().context("failed to resolve working directory")?;
    let tools = BuiltinToolExecutor::new(&cwd).context("failed to prepare workspace tools")?;

    let mut orchestrator = Orchestrator::new(provider, config)
        .context("invalid agent config")?
        .with_tool_executor(Box::new(tools))
        .with_context_provider(Box::new(GitContextProvider::new(&cwd)))
        .with_telemetry(Arc::new(TracingTelemetry));

    if let Some(path) = env_value(MODEL_IO_LOG_ENV_VAR) {
        let logger = JsonlModelIoLogger::open(&path)
            .with_context(|| format!("failed to open model-io log at {path}"))?;
        orchestrator = orchestrator.with_model_io_logger(Arc::new(logger));
    }

    let stream = env_value(STREAM_ENV_VAR)
        .map(|value| !matches!(value.to_ascii_lowercase().as_str(), "0" | "false"))
        .unwrap_or(true);

    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = line.context("failed to read stdin")?;
        let (text, planning) = match parse_slash_command(&line) {
            Some(SlashCommand::Quit) => break,
            Some(SlashCommand::Help) => {
                eprintln!("{HELP_TEXT}");
                continue;
            }
            Some(SlashCommand::Unknown(command)) => {
                eprintln!("Unknown command: {command}. {HELP_TEXT}");
                continue;
            }
            Some(SlashCommand::Plan(text)) => (text, true),
            None => (line.trim().to_string(), false),
        };
        if text.is_empty() {
            continue;
        }

        let printer = RefCell::new(StreamPrinter::new(io::stdout(), io::stdout().is_terminal()));
        let mut on_delta = |delta: &str| {
            let _ = printer.borrow_mut().delta(delta);
        };
        let mut on_reset = |discarded: usize| {
            let _ = printer.borrow_mut().reset(discarded);
        };
        let mut on_plan = |plan: &coding_agent::planning::Plan| {
            eprintln!("Plan: {}", plan.goal);
            for (index, step) in plan.steps.iter().enumerate() {
                eprintln!("  {}. {step}", index + 1);
            }
        };
        let options = TurnOptions::new()
            .streaming(stream)
            .planning(planning)
            .on_text_delta(&mut on_delta)
            .on_stream_reset(&mut on_reset)
            .on_plan(&mut on_plan);

        let outcome = orchestrator.run_turn(&text, options);
        let mut printer = printer.into_inner();
        match outcome {
            Ok(result) => {
                printer.finish(&result.final_text)?;
                eprintln!("{}", latency_line(&result));
            }
            Err(error) => eprintln!("error: {error}"),
        }
    }

    Ok(())
}

/// Renders streamed text. On a terminal deltas are shown as they arrive and
/// retracted when the stream falls back; otherwise they are buffered so a
/// discarded attempt never reaches the output.
struct StreamPrinter<W: Write> {
    out: W,
    live: bool,
    deltas: Vec<String>,
}

impl<W: Write> StreamPrinter<W> {
    fn new(out: W, live: bool) -> Self {
        Self {
            out,
            live,
            deltas: Vec::new(),
        }
    }

    fn delta(&mut self, delta: &str) -> io::Result<()> {
        self.deltas.push(delta.to_string());
        if self.live {
            write!(self.out, "{delta}")?;
            self.out.flush()?;
        }
        Ok(())
    }

    fn reset(&mut self, discarded: usize) -> io::Result<()> {
        let keep = self.deltas.len().saturating_sub(discarded);
        let removed = self.deltas.split_off(keep).concat();
        if !self.live || removed.is_empty() {
            return Ok(());
        }
        if removed.contains('\n') {
            // Cursor movement cannot cross lines reliably; start fresh below.
            writeln!(self.out)?;
        } else {
            write!(self.out, "\x1b[{}D\x1b[K", removed.chars().count())?;
        }
        self.out.flush()
    }

    fn finish(&mut self, final_text: &str) -> io::Result<()> {
        let streamed = self.deltas.concat();
        if !self.live {
            write!(self.out, "{streamed}")?;
        }
        if !streamed.ends_with(final_text) {
            if !streamed.is_empty() {
                writeln!(self.out)?;
            }
            write!(self.out, "{final_text}")?;
        }
        writeln!(self.out)?;
        self.out.flush()
    }
}

fn latency_line(result: &TurnResult) -> String {
    let latency = &result.latency;
    format!(
        "[{}] model {}ms x{} | tools {}ms x{} ({} failed, {} rounds) | other {}ms | tokens {}",
        result.trace_id,
        latency.model_ms,
        latency.model_calls,
        latency.tool_ms,
        latency.tool_calls,
        latency.tool_failures,
        latency.tool_rounds,
        latency.other_ms,
        result.usage.total_tokens,
    )
}

fn env_value(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
