//! Console Progress
//!
//! Renders pipeline progress updates as one line per step on stderr.

use console::style;

use crate::pipeline::{ProgressSink, ProgressUpdate};

const BAR_WIDTH: usize = 26;

pub struct ConsoleProgress {
    quiet: bool,
    width: usize,
}

impl ConsoleProgress {
    pub fn new(quiet: bool) -> Self {
        Self {
            quiet,
            width: BAR_WIDTH,
        }
    }

    pub fn with_width(mut self, width: usize) -> Self {
        self.width = width;
        self
    }

    pub fn render(&self, update: &ProgressUpdate) -> String {
        let counter = format!("[{:>2}/{}]", update.step, update.total_steps);
        format!(
            "{} {} {}",
            style(counter).dim(),
            render_progress_bar(update.step as usize, update.total_steps as usize, self.width),
            update.message
        )
    }
}

impl ProgressSink for ConsoleProgress {
    fn report(&self, update: &ProgressUpdate) {
        if !self.quiet {
            eprintln!("{}", self.render(update));
        }
    }
}

/// Render a simple progress bar
fn render_progress_bar(completed: usize, total: usize, width: usize) -> String {
    if total == 0 {
        return format!("[{}]", " ".repeat(width));
    }

    let progress = (completed as f32 / total as f32).min(1.0);
    let filled = (progress * width as f32) as usize;
    let empty = width.saturating_sub(filled);

    format!("[{}{}]", "█".repeat(filled), "░".repeat(empty))
}
