use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::time::{Duration, Instant};

const TICK: Duration = Duration::from_millis(120);

#[derive(Clone, Copy, Debug)]
pub enum UiMode {
    Auto,
    Plain,
    Pretty,
}

/// Stage progress on stderr: spinners on a terminal, `==>` lines otherwise.
#[derive(Clone, Debug)]
pub struct Ui {
    mode: UiMode,
    is_tty: bool,
    disable_pretty: bool,
}

impl Ui {
    pub fn new(mode: UiMode, is_tty: bool, disable_pretty: bool) -> Self {
        Self {
            mode,
            is_tty,
            disable_pretty,
        }
    }

    pub fn from_args(ui_flag: Option<&str>, is_tty: bool, disable_pretty: bool) -> Self {
        let mode = match ui_flag {
            Some("plain") => UiMode::Plain,
            Some("pretty") => UiMode::Pretty,
            _ => UiMode::Auto,
        };
        Self::new(mode, is_tty, disable_pretty)
    }

    fn use_pretty(&self) -> bool {
        self.is_tty
            && match self.mode {
                UiMode::Pretty => true,
                UiMode::Auto => !self.disable_pretty,
                UiMode::Plain => false,
            }
    }

    fn spinner(template: &str) -> ProgressBar {
        let spinner = ProgressBar::new_spinner();
        spinner.set_draw_target(ProgressDrawTarget::stderr());
        spinner.enable_steady_tick(TICK);
        let style = ProgressStyle::with_template(template)
            .unwrap_or_else(|_| ProgressStyle::default_spinner());
        spinner.set_style(style);
        spinner
    }

    pub fn stage(&self, name: &str) -> StageGuard {
        if self.use_pretty() {
            let spinner = Self::spinner("{spinner} {msg}");
            spinner.set_message(format!("{name}…"));
            StageGuard::new(name.to_string(), Some(spinner))
        } else {
            eprintln!("==> {}", name);
            StageGuard::new(name.to_string(), None)
        }
    }

    /// A stage that counts analysed frames while it runs.
    pub fn frames(&self, name: &str) -> FrameCounter {
        let spinner = self.use_pretty().then(|| {
            let spinner = Self::spinner("{spinner} {prefix} {pos} frames {msg}");
            spinner.set_prefix(name.to_string());
            spinner
        });
        if spinner.is_none() {
            eprintln!("==> {}", name);
        }
        FrameCounter {
            stage: StageGuard::new(name.to_string(), spinner),
            frames: 0,
            defect_frames: 0,
        }
    }
}

pub struct StageGuard {
    name: String,
    start: Instant,
    spinner: Option<ProgressBar>,
}

impl StageGuard {
    fn new(name: String, spinner: Option<ProgressBar>) -> Self {
        Self {
            name,
            start: Instant::now(),
            spinner,
        }
    }
}

impl Drop for StageGuard {
    fn drop(&mut self) {
        let elapsed = self.start.elapsed();
        let message = format!("✔ {} ({})", self.name, format_duration(elapsed));
        if let Some(spinner) = &self.spinner {
            spinner.finish_with_message(message);
        } else {
            eprintln!("{message}");
        }
    }
}

pub struct FrameCounter {
    stage: StageGuard,
    frames: u64,
    defect_frames: u64,
}

impl FrameCounter {
    pub fn record(&mut self, has_defect: bool) {
        self.frames += 1;
        if has_defect {
            self.defect_frames += 1;
        }
        if let Some(spinner) = &self.stage.spinner {
            spinner.set_position(self.frames);
            spinner.set_message(format!("({} with defects)", self.defect_frames));
        }
    }
}

impl Drop for FrameCounter {
    fn drop(&mut self) {
        self.stage.name = format!(
            "{}: {} frames, {} with defects",
            self.stage.name, self.frames, self.defect_frames
        );
    }
}

fn format_duration(duration: Duration) -> String {
    if duration.as_secs() >= 1 {
        format!("{:.2}s", duration.as_secs_f64())
    } else {
        format!("{}ms", duration.as_millis())
    }
}
