//! Terminal host for the download controller.

use {
    crate::use_fancy_output,
    console::style,
    dialoguer::{Confirm, theme::ColorfulTheme},
    indicatif::{ProgressBar, ProgressStyle},
    log::{debug, warn},
    ridepull::{ControllerState, Host, Notice, Overwrite, Severity},
    std::{io::IsTerminal, path::Path, time::Duration},
};

/// Renders controller output on stderr and prints published rides to stdout.
pub struct ConsoleHost {
    quiet: bool,
    non_interactive: bool,
    /// Answer to give instead of prompting on a name conflict.
    overwrite: Option<Overwrite>,
    spinner: ProgressBar,
    /// Rides published during this run.
    pub rides: Vec<String>,
    /// Most recent driver status text.
    pub last_status: Option<String>,
}

impl ConsoleHost {
    /// Create a host.
    pub fn new(quiet: bool, non_interactive: bool, overwrite: Option<Overwrite>) -> Self {
        Self {
            quiet,
            non_interactive,
            overwrite,
            spinner: ProgressBar::hidden(),
            rides: Vec::new(),
            last_status: None,
        }
    }

    fn new_spinner(&self) -> ProgressBar {
        if self.quiet || !use_fancy_output() {
            return ProgressBar::hidden();
        }
        let pb = ProgressBar::new_spinner();
        let style = ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed_precise}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner());
        pb.set_style(style);
        pb.set_draw_target(indicatif::ProgressDrawTarget::stderr());
        pb.enable_steady_tick(Duration::from_millis(100));
        pb
    }

    fn prompt_overwrite(&self, path: &Path) -> bool {
        let prompt = format!(
            "{} appears to have already been downloaded. Overwrite the previous download?",
            path.display()
        );
        self.spinner.suspend(|| {
            Confirm::with_theme(&ColorfulTheme::default())
                .with_prompt(prompt)
                .default(false)
                .interact_opt()
                .unwrap_or_else(|e| {
                    warn!("Prompt failed: {e}");
                    None
                })
                .unwrap_or(false)
        })
    }
}

impl Host for ConsoleHost {
    fn add_ride(&mut self, file_name: &str) {
        println!("{file_name}");
        self.rides.push(file_name.to_string());
    }

    fn confirm_overwrite(&mut self, path: &Path) -> bool {
        match self.overwrite {
            Some(policy) => policy == Overwrite::Replace,
            None if self.non_interactive || !std::io::stdin().is_terminal() => {
                warn!(
                    "{} already exists; keeping it (pass --overwrite to replace)",
                    path.display()
                );
                false
            },
            None => self.prompt_overwrite(path),
        }
    }

    fn notify(&mut self, notice: Notice) {
        let (marker, title) = match notice.severity {
            Severity::Warning => (style("⚠").yellow(), style(notice.title).yellow().bold()),
            Severity::Error => (style("✗").red(), style(notice.title).red().bold()),
            Severity::Info if self.quiet => return,
            Severity::Info => (style("✓").green(), style(notice.title).bold()),
        };
        self.spinner.suspend(|| {
            eprintln!("{marker} {title}: {}", notice.message);
        });
    }

    fn status(&mut self, text: &str) {
        if self.last_status.as_deref() != Some(text) {
            debug!("{text}");
            self.spinner.set_message(text.to_string());
            self.last_status = Some(text.to_string());
        }
    }

    fn state_changed(&mut self, state: ControllerState) {
        match state {
            ControllerState::Downloading => {
                self.spinner = self.new_spinner();
            },
            ControllerState::Finalizing
            | ControllerState::Canceled
            | ControllerState::Failed
            | ControllerState::Idle => {
                self.spinner.finish_and_clear();
            },
            ControllerState::Scanning | ControllerState::Ready => {},
        }
    }
}
