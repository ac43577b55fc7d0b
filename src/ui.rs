//! Terminal output: right-aligned colored labels, tables and timed steps.
//!
//! Activation and deactivation print the fragment path on stdout for the
//! wrapper script to read, so they call [`route_to_stderr`] before printing
//! anything else.

use anstyle::{AnsiColor, Style};
use is_terminal::IsTerminal;
use std::fmt::Display;
use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

const LABEL_WIDTH: usize = 12;

static STDERR_ONLY: AtomicBool = AtomicBool::new(false);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tone {
    Progress,
    Done,
    Note,
    Warning,
    Failure,
    Hint,
}

impl Tone {
    fn color(self) -> AnsiColor {
        match self {
            Tone::Progress => AnsiColor::Cyan,
            Tone::Done => AnsiColor::Green,
            Tone::Note => AnsiColor::Blue,
            Tone::Warning => AnsiColor::Yellow,
            Tone::Failure => AnsiColor::Red,
            Tone::Hint => AnsiColor::Magenta,
        }
    }

    fn to_stderr(self) -> bool {
        matches!(self, Tone::Warning | Tone::Failure | Tone::Hint)
            || STDERR_ONLY.load(Ordering::Relaxed)
    }
}

/// Send all further output to stderr
pub fn route_to_stderr() {
    STDERR_ONLY.store(true, Ordering::Relaxed);
}

fn emit(tone: Tone, label: &str, message: &str) {
    let to_stderr = tone.to_stderr();
    let colored = std::env::var_os("NO_COLOR").is_none()
        && if to_stderr {
            io::stderr().is_terminal()
        } else {
            io::stdout().is_terminal()
        };

    let style = Style::new().bold().fg_color(Some(tone.color().into()));
    let label = format!("{label:>LABEL_WIDTH$}");
    let label = if colored {
        format!("{}{label}{}", style.render(), style.render_reset())
    } else {
        label
    };

    let mut text = String::new();
    for (index, line) in message.lines().enumerate() {
        if index == 0 {
            text.push_str(&format!("{label} {line}\n"));
        } else {
            text.push_str(&format!("{:LABEL_WIDTH$} {line}\n", ""));
        }
    }
    if text.is_empty() {
        text = format!("{label}\n");
    }

    // Output is best effort; a closed pipe must not turn into a failure
    let _ = if to_stderr {
        io::stderr().lock().write_all(text.as_bytes())
    } else {
        io::stdout().lock().write_all(text.as_bytes())
    };
}

pub fn status(label: &str, message: impl Display) {
    emit(Tone::Progress, label, &message.to_string());
}

pub fn info(message: impl Display) {
    emit(Tone::Note, "Info", &message.to_string());
}

pub fn warn(message: impl Display) {
    emit(Tone::Warning, "Warning", &message.to_string());
}

/// Always written to stderr
pub fn error(message: impl Display) {
    emit(Tone::Failure, "[Error]", &message.to_string());
}

/// One-line pointer to where a failure originated
pub fn pointer(message: impl Display) {
    emit(Tone::Hint, "-->", &message.to_string());
}

pub fn success(label: &str, message: impl Display) {
    emit(Tone::Done, label, &message.to_string());
}

/// Print `rows` with aligned columns, each row under `label`
pub fn table(label: &str, rows: &[Vec<String>]) {
    for line in align(rows) {
        status(label, line);
    }
}

fn align(rows: &[Vec<String>]) -> Vec<String> {
    let columns = rows.iter().map(Vec::len).max().unwrap_or(0);
    let widths: Vec<usize> = (0..columns)
        .map(|column| {
            rows.iter()
                .filter_map(|row| row.get(column))
                .map(|cell| cell.chars().count())
                .max()
                .unwrap_or(0)
        })
        .collect();

    rows.iter()
        .map(|row| {
            let last = row.len().saturating_sub(1);
            row.iter()
                .enumerate()
                .map(|(column, cell)| {
                    if column == last {
                        cell.clone()
                    } else {
                        format!("{cell:<width$}", width = widths[column])
                    }
                })
                .collect::<Vec<_>>()
                .join("  ")
        })
        .collect()
}

fn elapsed(duration: Duration) -> String {
    let millis = duration.as_millis();
    match millis {
        0 => format!("{}µs", duration.as_micros()),
        1..=999 => format!("{millis}ms"),
        1_000..=59_999 => format!("{:.2}s", duration.as_secs_f64()),
        _ => {
            let (minutes, seconds) = (duration.as_secs() / 60, duration.as_secs() % 60);
            if seconds == 0 {
                format!("{minutes}m")
            } else {
                format!("{minutes}m {seconds}s")
            }
        }
    }
}

/// A long-running step reported when it starts and again when it ends.
///
/// Dropping an unfinished step reports it as interrupted.
pub struct Step {
    message: String,
    started: Instant,
    finished: bool,
}

impl Step {
    pub fn start(label: &str, message: impl Into<String>) -> Self {
        let message = message.into();
        emit(Tone::Progress, label, &message);
        Self {
            message,
            started: Instant::now(),
            finished: false,
        }
    }

    pub fn done(mut self, label: &str, detail: Option<&str>) {
        self.finished = true;
        let took = elapsed(self.started.elapsed());
        let message = match detail.filter(|detail| !detail.is_empty()) {
            Some(detail) => format!("{} {detail} in {took}", self.message),
            None => format!("{} in {took}", self.message),
        };
        emit(Tone::Done, label, &message);
    }

    pub fn failed(mut self, label: &str, error: impl Display) {
        self.finished = true;
        let took = elapsed(self.started.elapsed());
        emit(
            Tone::Failure,
            label,
            &format!("{} after {took}: {error}", self.message),
        );
    }
}

impl Drop for Step {
    fn drop(&mut self) {
        if !self.finished {
            emit(
                Tone::Warning,
                "Interrupted",
                &format!("{} did not finish", self.message),
            );
        }
    }
}
