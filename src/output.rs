use console::{style, Term};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{self, Write};
use std::time::Duration;

use crate::conflict::{ConflictChoice, Resolution};
use crate::error::FailureKind;
use crate::events::ProgressEvent;
use crate::session::{BatchSummary, SessionKind};

/// Prints progress events for the terminal front end.
pub struct OutputHandler {
    debug: bool,
    preview: bool,
    spinner: Option<ProgressBar>,
    current_name: String,
    printed_len: usize,
    total: usize,
}

impl OutputHandler {
    pub fn new() -> Self {
        Self {
            debug: false,
            preview: false,
            spinner: None,
            current_name: String::new(),
            printed_len: 0,
            total: 0,
        }
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Stream generated text to stdout instead of showing a spinner.
    pub fn with_preview(mut self, preview: bool) -> Self {
        self.preview = preview;
        self
    }

    pub fn is_debug(&self) -> bool {
        self.debug
    }

    pub fn handle_event(&mut self, event: &ProgressEvent) -> io::Result<()> {
        match event {
            ProgressEvent::RunStarted { kind, total } => {
                self.total = *total;
                let label = match kind {
                    SessionKind::Batch => format!("Generating tests for {} file(s)", total),
                    SessionKind::Single => "Generating tests for 1 file".to_string(),
                };
                println!("{}", style(label).cyan().bold());
            }
            ProgressEvent::JobStarted { index, name, output_path } => {
                self.current_name = name.clone();
                self.printed_len = 0;
                println!(
                    "{} {} {}",
                    style(format!("[{}/{}]", index + 1, self.total.max(1))).dim(),
                    style(name).bold(),
                    style(format!("-> {}", output_path)).dim()
                );
                if !self.preview {
                    self.start_spinner(name);
                }
            }
            ProgressEvent::Progress { text, .. } => {
                if self.preview {
                    self.print_streaming_delta(text)?;
                } else if let Some(spinner) = &self.spinner {
                    spinner.set_message(format!("{} ({} chars)", self.current_name, text.len()));
                }
            }
            ProgressEvent::JobCompleted { output_path, resolution, .. } => {
                self.finish_stream();
                let verb = match resolution {
                    Resolution::Append => "Appended to",
                    Resolution::Overwrite => "Overwrote",
                    _ => "Wrote",
                };
                println!("  {} {} {}", style("✔").green().bold(), verb, output_path);
            }
            ProgressEvent::JobSkipped { reason, .. } => {
                self.finish_stream();
                println!("  {} Skipped: {}", style("↷").yellow(), reason);
            }
            ProgressEvent::JobFailed { failure, .. } => {
                self.finish_stream();
                let marker = if failure.kind == FailureKind::Terminated {
                    style("■").yellow().bold()
                } else {
                    style("✘").red().bold()
                };
                let message = if self.debug {
                    failure.message.as_str()
                } else {
                    failure.message.lines().next().unwrap_or_default()
                };
                println!("  {} {}: {}", marker, failure.kind, message);
            }
            ProgressEvent::ConflictPending { output_path, .. } => {
                self.finish_stream();
                println!(
                    "  {} {} already exists",
                    style("?").magenta().bold(),
                    output_path
                );
            }
            ProgressEvent::Terminated { summary, .. } => {
                self.finish_stream();
                println!("{}", style("Run terminated").yellow().bold());
                self.print_summary(summary)?;
            }
            ProgressEvent::RunFinished { summary, .. } => {
                self.finish_stream();
                self.print_summary(summary)?;
            }
        }
        Ok(())
    }

    fn start_spinner(&mut self, name: &str) {
        let spinner = ProgressBar::new_spinner();
        if let Ok(spinner_style) = ProgressStyle::with_template("  {spinner:.cyan} {msg}") {
            spinner.set_style(spinner_style);
        }
        spinner.set_message(format!("{} (waiting for model)", name));
        spinner.enable_steady_tick(Duration::from_millis(100));
        self.spinner = Some(spinner);
    }

    fn finish_stream(&mut self) {
        if let Some(spinner) = self.spinner.take() {
            spinner.finish_and_clear();
        }
        if self.preview && self.printed_len > 0 {
            println!();
        }
        self.printed_len = 0;
    }

    /// Print only the part of the cumulative text not printed yet.
    fn print_streaming_delta(&mut self, text: &str) -> io::Result<()> {
        if let Some(delta) = text.get(self.printed_len..) {
            print!("{}", delta);
            io::stdout().flush()?;
        }
        self.printed_len = text.len();
        Ok(())
    }

    pub fn print_summary(&mut self, summary: &BatchSummary) -> io::Result<()> {
        println!(
            "{} completed, {} failed, {} skipped, {} not started",
            style(summary.completed).green().bold(),
            style(summary.failed).red().bold(),
            style(summary.skipped).yellow(),
            style(summary.pending).dim()
        );
        Ok(())
    }

    pub fn print_error(&mut self, content: &str) -> io::Result<()> {
        println!("{} {}", style("Error:").red().bold(), content);
        Ok(())
    }

    pub fn print_system(&mut self, content: &str) -> io::Result<()> {
        println!("{}", style(content).yellow().dim());
        Ok(())
    }

    /// y/N question on the terminal.
    pub fn confirm(&mut self, question: &str) -> io::Result<bool> {
        print!("{} {} ", style(question).bold(), style("[y/N]").dim());
        io::stdout().flush()?;
        let answer = Term::stdout().read_line()?;
        Ok(matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"))
    }

    /// Ask how to handle an existing output file.
    pub fn ask_conflict_choice(&mut self, output_path: &str) -> io::Result<ConflictChoice> {
        let term = Term::stdout();
        loop {
            print!(
                "  {} [{}]verwrite / [{}]ppend / [{}]kip: ",
                style(output_path).bold(),
                style("o").cyan().bold(),
                style("a").cyan().bold(),
                style("s").cyan().bold()
            );
            io::stdout().flush()?;
            let key = term.read_char()?;
            println!("{}", key);
            match key.to_ascii_lowercase() {
                '\u{3}' => return Err(io::Error::from(io::ErrorKind::Interrupted)),
                'o' => return Ok(ConflictChoice::Overwrite),
                'a' => return Ok(ConflictChoice::Append),
                's' => return Ok(ConflictChoice::Skip),
                _ => continue,
            }
        }
    }
}

impl Default for OutputHandler {
    fn default() -> Self {
        Self::new()
    }
}

/// `ProgressSink` that prints each event as it is emitted, so terminal output
/// stays in step with the run.
pub struct TerminalSink {
    handler: std::sync::Mutex<OutputHandler>,
}

impl TerminalSink {
    pub fn new(handler: OutputHandler) -> Self {
        Self {
            handler: std::sync::Mutex::new(handler),
        }
    }
}

impl crate::events::ProgressSink for TerminalSink {
    fn emit(&self, event: ProgressEvent) {
        let mut handler = self.handler.lock().unwrap_or_else(|e| e.into_inner());
        if let Err(e) = handler.handle_event(&event) {
            tracing::debug!(error = %e, "failed to print progress event");
        }
    }
}
