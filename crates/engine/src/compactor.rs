//! Bounds the prior-result context handed back into prompts.
//!
//! Under budget the successful step results pass through verbatim, each
//! tagged with its step number and action. Over budget every source is
//! reduced to one digest line: structural kind, byte length, and a short
//! preview. The digest for N sources is at most N bounded lines plus a
//! header, whatever the size of the underlying data.

use taskpilot_core::ExecutionStep;

const MAX_ACTION_CHARS: usize = 64;

/// Coarse shape of a step result, used in digest lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    Array,
    Object,
    MultiLineText,
    LongText,
    ShortText,
}

impl ContentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Array => "array",
            Self::Object => "object",
            Self::MultiLineText => "multi-line-text",
            Self::LongText => "long-text",
            Self::ShortText => "short-text",
        }
    }

    fn of(value: &serde_json::Value, text: &str, preview_chars: usize) -> Self {
        match value {
            serde_json::Value::Array(_) => Self::Array,
            serde_json::Value::Object(_) => Self::Object,
            _ if text.contains('\n') => Self::MultiLineText,
            _ if text.chars().count() > preview_chars => Self::LongText,
            _ => Self::ShortText,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompactedContext {
    pub text: String,
    /// True when the sources were reduced to digest lines.
    pub compacted: bool,
    pub sources: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct ContextCompactor {
    budget_chars: usize,
    preview_chars: usize,
}

impl Default for ContextCompactor {
    fn default() -> Self {
        Self {
            budget_chars: 12_000,
            preview_chars: 100,
        }
    }
}

impl ContextCompactor {
    pub fn new(budget_chars: usize, preview_chars: usize) -> Self {
        Self {
            budget_chars,
            preview_chars: preview_chars.max(1),
        }
    }

    /// Compact the successful steps in `steps`.
    pub fn compact(&self, steps: &[ExecutionStep]) -> CompactedContext {
        let sources: Vec<&ExecutionStep> = steps.iter().filter(|s| s.success).collect();
        if sources.is_empty() {
            return CompactedContext {
                text: String::new(),
                compacted: false,
                sources: 0,
            };
        }

        let lossless = sources
            .iter()
            .map(|s| format!("[Step {}: {}]\n{}", s.step_number, s.plan.action, s.result_text()))
            .collect::<Vec<_>>()
            .join("\n\n");

        if lossless.chars().count() <= self.budget_chars {
            return CompactedContext {
                text: lossless,
                compacted: false,
                sources: sources.len(),
            };
        }

        let mut text = format!(
            "[{} prior results compacted; {} chars exceeded the {} char budget]",
            sources.len(),
            lossless.chars().count(),
            self.budget_chars
        );
        for step in &sources {
            text.push('\n');
            text.push_str(&self.digest_line(step));
        }

        CompactedContext {
            text,
            compacted: true,
            sources: sources.len(),
        }
    }

    fn digest_line(&self, step: &ExecutionStep) -> String {
        let content = step.result_text();
        let kind = ContentKind::of(&step.result, &content, self.preview_chars);
        format!(
            "- step {} ({}): {}, {} bytes, preview: {}",
            step.step_number,
            truncate(&step.plan.action, MAX_ACTION_CHARS),
            kind.as_str(),
            content.len(),
            preview(&content, self.preview_chars)
        )
    }

    /// Upper bound, in characters, on the compacted text for `sources` steps.
    /// Previews are cut by character, so multi-byte text can exceed this in bytes.
    pub fn digest_bound(&self, sources: usize) -> usize {
        // header + per line: fixed text, two numbers, action, kind, preview
        160 + sources * (96 + MAX_ACTION_CHARS + self.preview_chars + 3)
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}

fn preview(content: &str, max_chars: usize) -> String {
    let flat: String = content
        .chars()
        .map(|c| if c.is_whitespace() { ' ' } else { c })
        .collect();
    let flat = flat.trim();
    if flat.chars().count() > max_chars {
        format!("{}...", truncate(flat, max_chars))
    } else {
        flat.to_string()
    }
}
