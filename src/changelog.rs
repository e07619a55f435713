//! Release note rendering.
//!
//! Rendering is best effort: [`display_text`] falls back to the raw markdown
//! whenever the renderer fails, so it can never fail an update.

use console::Style;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RenderError {
    #[error("unterminated code block starting at line {0}")]
    UnterminatedCodeBlock(usize),
}

pub trait MarkdownRenderer {
    fn render(&self, markdown: &str) -> Result<String, RenderError>;
}

/// Renders a markdown subset (headings, lists, emphasis, inline and fenced
/// code) for a terminal.
#[derive(Debug, Clone)]
pub struct TerminalRenderer {
    color: bool,
}

impl TerminalRenderer {
    pub fn new(color: bool) -> Self {
        Self { color }
    }

    fn style(&self) -> Style {
        Style::new().force_styling(self.color)
    }

    fn inline(&self, line: &str) -> String {
        let mut out = String::with_capacity(line.len());
        let mut rest = line;

        while !rest.is_empty() {
            if let Some(after) = rest.strip_prefix("**") {
                if let Some(end) = after.find("**") {
                    out.push_str(&self.style().bold().apply_to(&after[..end]).to_string());
                    rest = &after[end + 2..];
                    continue;
                }
            }
            if let Some(after) = rest.strip_prefix('`') {
                if let Some(end) = after.find('`') {
                    out.push_str(&self.style().cyan().apply_to(&after[..end]).to_string());
                    rest = &after[end + 1..];
                    continue;
                }
            }
            let mut chars = rest.chars();
            if let Some(c) = chars.next() {
                out.push(c);
            }
            rest = chars.as_str();
        }
        out
    }
}

impl MarkdownRenderer for TerminalRenderer {
    fn render(&self, markdown: &str) -> Result<String, RenderError> {
        let mut out = Vec::new();
        let mut fence_start = None;

        for (index, line) in markdown.lines().enumerate() {
            let trimmed = line.trim_start();

            if trimmed.starts_with("```") {
                fence_start = match fence_start {
                    Some(_) => None,
                    None => Some(index + 1),
                };
                continue;
            }
            if fence_start.is_some() {
                out.push(format!("    {}", self.style().dim().apply_to(line)));
                continue;
            }

            let hashes = trimmed.chars().take_while(|c| *c == '#').count();
            if (1..=6).contains(&hashes) && trimmed[hashes..].starts_with(' ') {
                let title = trimmed[hashes..].trim();
                let style = if hashes == 1 {
                    self.style().bold().underlined()
                } else {
                    self.style().bold()
                };
                out.push(style.apply_to(title).to_string());
                continue;
            }

            if let Some(item) = trimmed
                .strip_prefix("- ")
                .or_else(|| trimmed.strip_prefix("* "))
            {
                let indent = line.len() - trimmed.len();
                out.push(format!("{}  • {}", " ".repeat(indent), self.inline(item)));
                continue;
            }

            out.push(self.inline(line));
        }

        if let Some(line) = fence_start {
            return Err(RenderError::UnterminatedCodeBlock(line));
        }
        Ok(out.join("\n"))
    }
}

/// Rendered notes, or the raw markdown if rendering fails.
pub fn display_text<R: MarkdownRenderer>(renderer: &R, markdown: &str) -> String {
    match renderer.render(markdown) {
        Ok(rendered) => rendered,
        Err(e) => {
            tracing::warn!("Markdown rendering not supported: {}", e);
            markdown.to_string()
        }
    }
}
