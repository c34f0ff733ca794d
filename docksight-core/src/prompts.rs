use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PromptError {
    #[error("unknown placeholder `{{{{{placeholder}}}}}` in {template} template")]
    UnknownPlaceholder { template: &'static str, placeholder: String },
    #[error("cannot build a synthesis prompt from zero summaries")]
    NoSummaries,
}

/// Renders the text of every prompt the pipeline sends. Errors are passed
/// through the pipeline unchanged.
pub trait PromptBuilder: Send + Sync {
    fn system_prompt(&self, source_id: &str) -> Result<String, PromptError>;

    fn user_prompt(&self, source_id: &str, log_text: &str, record_count: usize) -> Result<String, PromptError>;

    /// `index` is 0-based; `total` is the number of chunks in the batch.
    fn chunk_prompt(
        &self,
        source_id: &str,
        chunk_text: &str,
        index: usize,
        total: usize,
    ) -> Result<String, PromptError>;

    fn synthesis_prompt(&self, source_id: &str, summaries: &[String]) -> Result<String, PromptError>;
}

/// Optional template overrides, as read from the `[prompts]` config table.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PromptTemplates {
    pub system: Option<String>,
    pub user: Option<String>,
    pub chunk: Option<String>,
    pub synthesis: Option<String>,
}

const DEFAULT_SYSTEM: &str = r#"You are an expert site reliability engineer analysing the logs of the container "{{container}}".

CORE PRINCIPLES:
1. Identify the ROOT CAUSE of failures, not just their symptoms
2. Distinguish application errors from infrastructure, configuration and external service problems
3. Treat "[REPEAT xN] message" lines as N consecutive copies of the same message
4. Be precise about uncertainty; never invent events that are not in the logs"#;

const DEFAULT_USER: &str = r#"Analyze the following {{count}} log lines from container "{{container}}".

```
{{logs}}```

Provide:
1. Overall health of the container
2. Errors and warnings, grouped by likely cause
3. The most probable root cause of any failure
4. Concrete, actionable recommendations"#;

const DEFAULT_CHUNK: &str = r#"This is part {{position}} of {{total}} of the logs from container "{{container}}". Other parts are summarized separately, so events may start before or continue after this excerpt.

```
{{logs}}```

Summarize the notable events, errors, warnings and anomalies in this part. Keep timestamps for anything important."#;

const DEFAULT_SYNTHESIS: &str = r#"The logs of container "{{container}}" were too large to analyze at once. Below are {{total}} summaries of consecutive parts, in chronological order.

{{summaries}}
Combine them into one coherent analysis covering:
1. Overall health of the container
2. Errors and warnings, grouped by likely cause
3. The most probable root cause of any failure
4. Concrete, actionable recommendations"#;

fn placeholder_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{\{\s*([A-Za-z_]+)\s*\}\}").expect("placeholder pattern is valid"))
}

/// Replace every `{{name}}` in `template` with its value from `vars`.
fn render(template_name: &'static str, template: &str, vars: &[(&str, &str)]) -> Result<String, PromptError> {
    let mut unknown: Option<String> = None;

    let rendered = placeholder_regex().replace_all(template, |caps: &Captures| {
        let name = &caps[1];
        match vars.iter().find(|(key, _)| *key == name) {
            Some((_, value)) => value.to_string(),
            None => {
                unknown.get_or_insert_with(|| name.to_string());
                String::new()
            }
        }
    });

    match unknown {
        Some(placeholder) => Err(PromptError::UnknownPlaceholder {
            template: template_name,
            placeholder,
        }),
        None => Ok(rendered.into_owned()),
    }
}

/// [`PromptBuilder`] backed by `{{placeholder}}` templates.
///
/// Placeholders: `container` everywhere; `logs` and `count` in the user
/// template; `logs`, `position` (1-based), `index` (0-based) and `total` in
/// the chunk template; `summaries` and `total` in the synthesis template.
#[derive(Debug, Clone)]
pub struct TemplatePrompts {
    system: String,
    user: String,
    chunk: String,
    synthesis: String,
}

impl TemplatePrompts {
    pub fn new() -> Self {
        Self {
            system: DEFAULT_SYSTEM.to_string(),
            user: DEFAULT_USER.to_string(),
            chunk: DEFAULT_CHUNK.to_string(),
            synthesis: DEFAULT_SYNTHESIS.to_string(),
        }
    }

    pub fn with_templates(mut self, templates: &PromptTemplates) -> Self {
        if let Some(system) = &templates.system {
            self.system = system.clone();
        }
        if let Some(user) = &templates.user {
            self.user = user.clone();
        }
        if let Some(chunk) = &templates.chunk {
            self.chunk = chunk.clone();
        }
        if let Some(synthesis) = &templates.synthesis {
            self.synthesis = synthesis.clone();
        }
        self
    }

    /// Render every template once with sample values so that a typo in a
    /// configured override is reported at startup rather than mid-analysis.
    pub fn validate(&self) -> Result<(), PromptError> {
        self.system_prompt("sample")?;
        self.user_prompt("sample", "line\n", 1)?;
        self.chunk_prompt("sample", "line\n", 0, 1)?;
        self.synthesis_prompt("sample", &["summary".to_string()])?;
        Ok(())
    }
}

impl Default for TemplatePrompts {
    fn default() -> Self {
        Self::new()
    }
}

impl PromptBuilder for TemplatePrompts {
    fn system_prompt(&self, source_id: &str) -> Result<String, PromptError> {
        render("system", &self.system, &[("container", source_id)])
    }

    fn user_prompt(&self, source_id: &str, log_text: &str, record_count: usize) -> Result<String, PromptError> {
        let count = record_count.to_string();
        render(
            "user",
            &self.user,
            &[("container", source_id), ("logs", log_text), ("count", &count)],
        )
    }

    fn chunk_prompt(
        &self,
        source_id: &str,
        chunk_text: &str,
        index: usize,
        total: usize,
    ) -> Result<String, PromptError> {
        let position = (index + 1).to_string();
        let index = index.to_string();
        let total = total.to_string();
        render(
            "chunk",
            &self.chunk,
            &[
                ("container", source_id),
                ("logs", chunk_text),
                ("position", &position),
                ("index", &index),
                ("total", &total),
            ],
        )
    }

    fn synthesis_prompt(&self, source_id: &str, summaries: &[String]) -> Result<String, PromptError> {
        if summaries.is_empty() {
            return Err(PromptError::NoSummaries);
        }

        let total = summaries.len();
        let mut joined = String::new();
        for (i, summary) in summaries.iter().enumerate() {
            joined.push_str(&format!("### Part {}/{}\n{}\n\n", i + 1, total, summary.trim_end()));
        }

        let total = total.to_string();
        render(
            "synthesis",
            &self.synthesis,
            &[("container", source_id), ("summaries", &joined), ("total", &total)],
        )
    }
}
