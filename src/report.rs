use crate::types::UpdateOutcome;
use console::Style;

/// Where a tool stands relative to its latest release.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolStatus {
    Latest(String),
    Outdated { installed: String, latest: String },
    NotInstalled,
    NotSupported,
}

/// Output styling, built once from flags and settings and passed to
/// whatever prints.
#[derive(Debug, Clone, Copy)]
pub struct Palette {
    color: bool,
}

impl Palette {
    pub fn new(color: bool) -> Self {
        Self { color }
    }

    pub fn color(&self) -> bool {
        self.color
    }

    fn paint(&self, style: Style, text: &str) -> String {
        style.force_styling(self.color).apply_to(text).to_string()
    }

    fn green(&self, text: &str) -> String {
        self.paint(Style::new().green().bright(), text)
    }

    fn red(&self, text: &str) -> String {
        self.paint(Style::new().red(), text)
    }

    fn yellow(&self, text: &str) -> String {
        self.paint(Style::new().yellow().bright(), text)
    }

    fn gray(&self, text: &str) -> String {
        self.paint(Style::new().black().bright(), text)
    }

    pub fn status(&self, status: &ToolStatus) -> String {
        match status {
            ToolStatus::Latest(version) => {
                format!("({}) ({})", self.green("latest"), self.green(version))
            }
            ToolStatus::Outdated { installed, latest } => format!(
                "({}) ({}) ➡ ({})",
                self.red("outdated"),
                self.red(installed),
                self.green(latest)
            ),
            ToolStatus::NotInstalled => format!("({})", self.yellow("not installed")),
            ToolStatus::NotSupported => format!("({})", self.gray("not supported")),
        }
    }

    pub fn outcome(&self, tool: &str, outcome: &UpdateOutcome) -> String {
        let text = outcome.to_string();
        let painted = match outcome {
            UpdateOutcome::Installed(_) | UpdateOutcome::Updated(_) | UpdateOutcome::Removed => {
                self.green(&text)
            }
            UpdateOutcome::UpToDate(_) => text,
            UpdateOutcome::NotFound => self.yellow(&text),
            UpdateOutcome::Failed(_) => self.red(&text),
        };
        format!("{}: {}", tool, painted)
    }
}
