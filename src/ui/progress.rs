//! Spinners and progress bars with a CI fallback

use super::context::UiContext;
use console::style;
use indicatif::{ProgressBar, ProgressStyle};

/// Spinner for a single long-running task
pub struct TaskSpinner {
    spinner: Option<cliclack::ProgressBar>,
    interactive: bool,
}

impl TaskSpinner {
    pub fn new(ctx: &UiContext) -> Self {
        Self {
            spinner: None,
            interactive: ctx.use_fancy_output(),
        }
    }

    pub fn start(&mut self, message: &str) {
        if self.interactive {
            let spinner = cliclack::spinner();
            spinner.start(message);
            self.spinner = Some(spinner);
        } else {
            println!("{} {}", style("...").dim(), message);
        }
    }

    pub fn stop(&mut self, message: &str) {
        match self.spinner.take() {
            Some(spinner) => spinner.stop(message),
            None => println!("{} {}", style("[OK]").green(), message),
        }
    }

    pub fn stop_warn(&mut self, message: &str) {
        match self.spinner.take() {
            Some(spinner) => spinner.stop(format!("{} {}", style("!").yellow(), message)),
            None => println!("{} {}", style("[WARN]").yellow(), message),
        }
    }

    pub fn stop_error(&mut self, message: &str) {
        match self.spinner.take() {
            Some(spinner) => spinner.error(message),
            None => println!("{} {}", style("[FAIL]").red(), message),
        }
    }

    /// Remove the spinner without printing anything
    pub fn clear(&mut self) {
        if let Some(spinner) = self.spinner.take() {
            spinner.clear();
        }
    }
}

/// Counted progress over a known number of items, e.g. cache entries
pub struct ItemProgress {
    bar: Option<ProgressBar>,
}

impl ItemProgress {
    pub fn new(ctx: &UiContext, label: &str, total: u64) -> Self {
        if !ctx.use_fancy_output() {
            println!("{} {} ({} items)", style("...").dim(), label, total);
            return Self { bar: None };
        }

        let bar = ProgressBar::new(total);
        if let Ok(bar_style) = ProgressStyle::default_bar()
            .template("  {spinner:.magenta} {prefix} {bar:24.magenta/dim} {pos}/{len} {msg:.dim}")
        {
            bar.set_style(bar_style.progress_chars("━╸─"));
        }
        bar.set_prefix(label.to_string());
        Self { bar: Some(bar) }
    }

    /// Advance by one, showing `item` as the current message
    pub fn tick(&self, item: &str) {
        if let Some(bar) = &self.bar {
            bar.set_message(item.to_string());
            bar.inc(1);
        }
    }

    pub fn finish(&self) {
        if let Some(bar) = &self.bar {
            bar.finish_and_clear();
        }
    }
}
