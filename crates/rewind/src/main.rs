//! A terminal front end for the `rewind` agent.

#[macro_use]
extern crate tracing;

use std::env;
use std::io::Write as _;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use owo_colors::OwoColorize;
use rewind::SessionBuilder;
use rewind::core::{AgentEvent, Turn, TurnOutcome};
use rewind_mcp::load_servers;
use rewind_openai_model::{API_KEY_VAR, OpenAIConfigBuilder, OpenAIProvider};
use tokio::io::{self, AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::select;
use tokio::signal::ctrl_c;

const MCP_CONFIG_VAR: &str = "REWIND_MCP_CONFIG";
const BAR_CHAR: &str = "▎";
const MAX_ARGUMENTS_WIDTH: usize = 80;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Column {
    LineStart,
    Reasoning,
    Content,
}

/// Streams turn events to the terminal.
struct Printer {
    style: ProgressStyle,
    spinner: Option<ProgressBar>,
    column: Column,
}

impl Printer {
    fn new() -> Self {
        let style = ProgressStyle::with_template("{spinner} {wide_msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏");
        Self {
            style,
            spinner: None,
            column: Column::LineStart,
        }
    }

    fn show_spinner(&mut self) {
        if self.column != Column::LineStart || self.spinner.is_some() {
            return;
        }
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(self.style.clone());
        spinner.set_message("🤔 Thinking...");
        spinner.enable_steady_tick(Duration::from_millis(100));
        self.spinner = Some(spinner);
    }

    fn hide_spinner(&mut self) {
        if let Some(spinner) = self.spinner.take() {
            spinner.finish_and_clear();
        }
    }

    fn end_line(&mut self) {
        if self.column != Column::LineStart {
            println!();
            self.column = Column::LineStart;
        }
    }

    fn print_event(&mut self, event: AgentEvent) {
        self.hide_spinner();
        match event {
            AgentEvent::ReasoningDelta(text) => {
                if self.column != Column::Reasoning {
                    self.end_line();
                    print!("{}", BAR_CHAR.bright_black());
                }
                print!("{}", text.dimmed());
                self.column = Column::Reasoning;
            }
            AgentEvent::ContentDelta(text) => {
                if self.column != Column::Content {
                    self.end_line();
                    print!("{}🤖 ", BAR_CHAR.bright_cyan());
                }
                print!("{}", text.bright_white());
                self.column = Column::Content;
            }
            AgentEvent::ToolCallStarted {
                name, arguments, ..
            } => {
                self.end_line();
                println!(
                    "{}🔧 {} {}",
                    BAR_CHAR.bright_yellow(),
                    name.yellow().bold(),
                    truncate(&arguments, MAX_ARGUMENTS_WIDTH).bright_black()
                );
            }
            AgentEvent::Error(message) => {
                self.end_line();
                println!("{}{}", BAR_CHAR.bright_red(), message.red());
            }
        }
        std::io::stdout().flush().ok();
        self.show_spinner();
    }

    fn print_outcome(&mut self, outcome: TurnOutcome) {
        self.hide_spinner();
        self.end_line();
        match outcome {
            TurnOutcome::Completed(summary) => {
                let usage = format!(
                    "({} rounds, {} tokens)",
                    summary.rounds, summary.usage.total_tokens
                );
                println!("{}", usage.bright_black());
            }
            TurnOutcome::Failed(err) => {
                println!("{}{}", BAR_CHAR.bright_red(), err.red());
            }
            TurnOutcome::Aborted => {
                println!(
                    "{}{}",
                    BAR_CHAR.bright_yellow(),
                    "cancelled, conversation rolled back".yellow()
                );
            }
        }
        println!();
    }
}

fn truncate(text: &str, width: usize) -> String {
    let mut chars = text.chars();
    let mut truncated: String = chars.by_ref().take(width).collect();
    if chars.next().is_some() {
        truncated.push('…');
    }
    truncated
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let Some(config) = OpenAIConfigBuilder::from_env() else {
        eprintln!("{API_KEY_VAR} environment variable is not set");
        return;
    };
    let model_provider = OpenAIProvider::new(config.build());

    let mut builder = SessionBuilder::with_model_provider(model_provider);
    if let Ok(path) = env::var(MCP_CONFIG_VAR) {
        match load_servers(&path) {
            Ok(servers) => builder = builder.with_mcp_servers(servers),
            Err(err) => {
                eprintln!("failed to load {path}: {err}");
                return;
            }
        }
    }
    let session = match builder.build() {
        Ok(session) => session,
        Err(err) => {
            eprintln!("failed to create the session: {err}");
            return;
        }
    };
    let tool_count = session.refresh_mcp_tools().await;
    if tool_count > 0 {
        println!("{}", format!("loaded {tool_count} MCP tools").bright_black());
    }

    let mut lines = BufReader::new(io::stdin()).lines();
    let mut printer = Printer::new();
    loop {
        print!("> ");
        std::io::stdout().flush().ok();

        let Some(line) = read_line(&mut lines).await else {
            break;
        };
        let line = line.trim();
        match line {
            "" => continue,
            "/exit" => break,
            "/clear" => {
                match session.clear().await {
                    Ok(()) => println!("{}", "session cleared".bright_black()),
                    Err(err) => println!("{}", err.red()),
                }
                continue;
            }
            _ => {}
        }

        let turn = match session.send_message(line).await {
            Ok(turn) => turn,
            Err(err) => {
                println!("{}", err.red());
                continue;
            }
        };
        run_turn(&session, turn, &mut printer).await;
    }

    session.shutdown().await;
}

async fn run_turn(
    session: &rewind::Session,
    mut turn: Turn,
    printer: &mut Printer,
) {
    printer.show_spinner();
    let mut cancelled = false;
    loop {
        select! {
            biased;
            _ = ctrl_c(), if !cancelled => {
                debug!("cancelling the turn");
                cancelled = true;
                if let Err(err) = session.cancel() {
                    warn!("failed to cancel: {err}");
                }
            }
            event = turn.next_event() => {
                let Some(event) = event else {
                    break;
                };
                printer.print_event(event);
            }
        }
    }
    printer.print_outcome(turn.outcome().await);
}

/// Reads a line from stdin, `None` on EOF, error or Ctrl-C.
async fn read_line(lines: &mut Lines<BufReader<Stdin>>) -> Option<String> {
    select! {
        line = lines.next_line() => match line {
            Ok(line) => line,
            Err(err) => {
                error!("error reading input: {err}");
                None
            }
        },
        _ = ctrl_c() => {
            println!();
            None
        }
    }
}
