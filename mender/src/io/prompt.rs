//! Request rendering for the reasoning collaborator.
//!
//! User prompts are minijinja templates embedded at compile time; each agent
//! owns its system prompt.

use anyhow::Result;
use minijinja::{Environment, context};
use tracing::debug;

use crate::core::types::{Diagnostic, Feedback};

const AUDIT_TEMPLATE: &str = include_str!("prompts/audit.md");
const FIRST_FIX_TEMPLATE: &str = include_str!("prompts/first_fix.md");
const DEBUG_TEMPLATE: &str = include_str!("prompts/debug.md");
const RETRY_FIX_TEMPLATE: &str = include_str!("prompts/retry_fix.md");
const TEST_GENERATION_TEMPLATE: &str = include_str!("prompts/test_generation.md");
const VERDICT_TEMPLATE: &str = include_str!("prompts/verdict.md");

/// Source file being discussed in a request.
#[derive(Debug, Clone, Copy)]
pub struct SourceView<'a> {
    pub file_name: &'a str,
    /// Fence language tag, usually the file extension.
    pub language: &'a str,
    pub source: &'a str,
}

pub struct VerdictInputs<'a> {
    pub file_name: &'a str,
    pub score_before: f64,
    pub score_after: f64,
    pub tests_passed: bool,
    pub test_output: &'a str,
}

/// Template engine wrapper around minijinja.
pub struct PromptEngine {
    env: Environment<'static>,
}

impl Default for PromptEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl PromptEngine {
    pub fn new() -> Self {
        let mut env = Environment::new();
        for (name, source) in [
            ("audit", AUDIT_TEMPLATE),
            ("first_fix", FIRST_FIX_TEMPLATE),
            ("debug", DEBUG_TEMPLATE),
            ("retry_fix", RETRY_FIX_TEMPLATE),
            ("test_generation", TEST_GENERATION_TEMPLATE),
            ("verdict", VERDICT_TEMPLATE),
        ] {
            env.add_template(name, source)
                .expect("embedded prompt template should be valid");
        }
        Self { env }
    }

    pub fn render_audit(
        &self,
        view: SourceView<'_>,
        score: f64,
        diagnostics: &str,
    ) -> Result<String> {
        self.render(
            "audit",
            context! {
                file_name => view.file_name,
                language => view.language,
                source => view.source,
                score => format!("{score:.2}"),
                diagnostics => diagnostics.trim(),
            },
        )
    }

    pub fn render_first_fix(&self, view: SourceView<'_>, feedback: &Feedback) -> Result<String> {
        self.render(
            "first_fix",
            context! {
                file_name => view.file_name,
                language => view.language,
                source => view.source,
                issues => &feedback.issues,
                summary => non_blank(feedback.summary.as_deref()),
                semantic_analysis => non_blank(feedback.semantic_analysis.as_deref()),
            },
        )
    }

    pub fn render_debug(&self, view: SourceView<'_>, trace: &str) -> Result<String> {
        self.render(
            "debug",
            context! {
                file_name => view.file_name,
                language => view.language,
                source => view.source,
                trace => trace.trim(),
            },
        )
    }

    pub fn render_retry_fix(
        &self,
        view: SourceView<'_>,
        diagnostic: &Diagnostic,
        trace_excerpt: &str,
    ) -> Result<String> {
        self.render(
            "retry_fix",
            context! {
                file_name => view.file_name,
                language => view.language,
                source => view.source,
                diagnostic => diagnostic,
                trace => trace_excerpt.trim(),
            },
        )
    }

    pub fn render_test_generation(
        &self,
        view: SourceView<'_>,
        module_name: &str,
    ) -> Result<String> {
        self.render(
            "test_generation",
            context! {
                file_name => view.file_name,
                language => view.language,
                source => view.source,
                module_name => module_name,
            },
        )
    }

    pub fn render_verdict(&self, inputs: &VerdictInputs<'_>) -> Result<String> {
        self.render(
            "verdict",
            context! {
                file_name => inputs.file_name,
                score_before => format!("{:.2}", inputs.score_before),
                score_after => format!("{:.2}", inputs.score_after),
                // JSON spelling; minijinja prints bools as `True`/`False`.
                tests_passed => if inputs.tests_passed { "true" } else { "false" },
                test_output => inputs.test_output.trim(),
            },
        )
    }

    fn render(&self, name: &str, ctx: minijinja::Value) -> Result<String> {
        let rendered = self.env.get_template(name)?.render(ctx)?;
        debug!(template = name, chars = rendered.len(), "rendered prompt");
        Ok(rendered)
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|s| !s.is_empty())
}
