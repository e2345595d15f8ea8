use indicatif::{ProgressBar, ProgressStyle};
use lmix_core::{ViewAction, ViewModel, ViewRenderer};

const BAR_TEMPLATE: &str = "{spinner:.green} {prefix:.bold} [{bar:40.cyan/blue}] {pos:>3}% {msg}";

/// Renders view models as a single progress bar line on stderr.
///
/// Headline changes are echoed above the bar so the transcript keeps the
/// upload and processing phases visible after the bar is cleared.
pub struct TerminalRenderer {
    bar: ProgressBar,
    headline: Option<String>,
    last_lines: Vec<String>,
}

impl TerminalRenderer {
    pub fn new() -> Self {
        let bar = ProgressBar::new(100);
        bar.set_style(
            ProgressStyle::with_template(BAR_TEMPLATE)
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );
        Self {
            bar,
            headline: None,
            last_lines: Vec::new(),
        }
    }

    fn announce(&mut self, model: &ViewModel) {
        if self.headline.as_deref() == Some(model.headline.as_str()) {
            return;
        }
        self.bar.println(&model.headline);
        self.headline = Some(model.headline.clone());
    }

    /// Remove the bar without printing a summary.
    pub fn clear(&self) {
        self.bar.finish_and_clear();
    }
}

impl Default for TerminalRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl ViewRenderer for TerminalRenderer {
    fn render(&mut self, model: &ViewModel) {
        // Terminal states are printed once by `finish`.
        if model
            .actions
            .iter()
            .any(|action| matches!(action, ViewAction::StartOver { .. }))
        {
            return;
        }
        self.announce(model);
        let detail = match model.progress.as_ref() {
            Some(progress) => {
                self.bar.set_prefix(progress.label.clone());
                self.bar.set_position(u64::from(progress.rounded()));
                self.bar
                    .set_message(model.lines.first().cloned().unwrap_or_default());
                model.lines.get(1..).unwrap_or_default()
            }
            None => model.lines.as_slice(),
        };
        for line in detail {
            if !self.last_lines.contains(line) {
                self.bar.println(format!("  {line}"));
            }
        }
        self.last_lines = model.lines.clone();
    }

    fn finish(&mut self, model: &ViewModel) {
        self.bar.finish_and_clear();
        eprintln!("{}", model.headline);
        for line in &model.lines {
            eprintln!("  {line}");
        }
        for action in &model.actions {
            if let ViewAction::Download { job_id } = action {
                eprintln!("  Download with: lmix download {job_id}");
            }
        }
    }
}
