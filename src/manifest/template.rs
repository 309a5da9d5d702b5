//! Local template pass over manifests and embedded assets
//!
//! Uses minijinja with bracket delimiters so the local pass never collides
//! with the `{{ ... }}` placeholders cloud-init resolves on the node:
//! - Variables: `[[[ ... ]]]`
//! - Blocks: `[[% ... %]]`
//! - Comments: `[[# ... #]]`
//!
//! Paths may be written Go style with a leading dot (`[[[ .ClusterName ]]]`);
//! the dot is dropped before rendering.

use minijinja::syntax::SyntaxConfig;
use minijinja::{Environment, UndefinedBehavior};
use serde::Serialize;
use serde_json::{Map, Value};

use super::escape;
use crate::values::Values;
use crate::{Error, Result};

/// Key/value context for one render
#[derive(Clone, Debug, Default)]
pub struct TemplateContext {
    vars: Map<String, Value>,
}

impl TemplateContext {
    /// Context seeded from the operation's [`Values`] (PascalCase keys)
    pub fn from_values(values: &Values) -> Result<Self> {
        match serde_json::to_value(values)? {
            Value::Object(vars) => Ok(Self { vars }),
            other => Err(Error::template(
                "values",
                format!("expected an object, got {other}"),
            )),
        }
    }

    /// Add or replace a top-level key
    pub fn insert(&mut self, key: impl Into<String>, value: impl Serialize) -> Result<()> {
        self.vars.insert(key.into(), serde_json::to_value(value)?);
        Ok(())
    }

    /// Builder form of [`TemplateContext::insert`]
    pub fn with(mut self, key: impl Into<String>, value: impl Serialize) -> Result<Self> {
        self.insert(key, value)?;
        Ok(self)
    }
}

/// Delimiter flavor of an engine
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Flavor {
    Local,
    Helm,
}

impl Flavor {
    fn variable_start(self) -> &'static str {
        match self {
            Self::Local => "[[[",
            Self::Helm => "{{",
        }
    }

    fn variable_end(self) -> &'static str {
        match self {
            Self::Local => "]]]",
            Self::Helm => "}}",
        }
    }

    fn block(self) -> (&'static str, &'static str) {
        match self {
            Self::Local => ("[[%", "%]]"),
            Self::Helm => ("{%", "%}"),
        }
    }

    fn comment(self) -> (&'static str, &'static str) {
        match self {
            Self::Local => ("[[#", "#]]"),
            Self::Helm => ("{#", "#}"),
        }
    }
}

/// Template engine for local rendering
pub struct TemplateEngine {
    env: Environment<'static>,
    flavor: Flavor,
}

impl TemplateEngine {
    /// Engine for manifests and embedded assets (`[[[ ... ]]]`)
    pub fn local() -> Result<Self> {
        Self::build(Flavor::Local)
    }

    /// Engine for `HelmChartProxy` value templates (`{{ ... }}`)
    pub fn helm_values() -> Result<Self> {
        Self::build(Flavor::Helm)
    }

    fn build(flavor: Flavor) -> Result<Self> {
        let (block_start, block_end) = flavor.block();
        let (comment_start, comment_end) = flavor.comment();
        let syntax = SyntaxConfig::builder()
            .variable_delimiters(flavor.variable_start(), flavor.variable_end())
            .block_delimiters(block_start, block_end)
            .comment_delimiters(comment_start, comment_end)
            .build()
            .map_err(|e| Error::template("syntax", e))?;

        let mut env = Environment::new();
        env.set_syntax(syntax);
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        env.set_keep_trailing_newline(true);

        Ok(Self { env, flavor })
    }

    /// Render `template`, naming it `name` in errors
    ///
    /// With `escape` set, live `{{ ... }}` placeholders are made inert first
    /// so they survive cloud-init's pass on the bootstrap node.
    pub fn render(
        &self,
        name: &str,
        template: &str,
        ctx: &TemplateContext,
        escape: bool,
    ) -> Result<String> {
        let source = if escape && self.flavor == Flavor::Local {
            escape::escape(template)
        } else {
            template.to_string()
        };
        let normalized = normalize_go_paths(
            &source,
            self.flavor.variable_start(),
            self.flavor.variable_end(),
        );
        let normalized = normalize_go_paths(&normalized, self.flavor.block().0, self.flavor.block().1);

        self.env
            .render_str(&normalized, &ctx.vars)
            .map_err(|e| Error::template(name, render_message(&e)))
    }
}

fn render_message(err: &minijinja::Error) -> String {
    match err.detail() {
        Some(detail) => format!("{} ({detail})", err.kind()),
        None => err.to_string(),
    }
}

/// Drop the leading dot of Go-style paths inside every `open ... close` span.
fn normalize_go_paths(template: &str, open: &str, close: &str) -> String {
    let mut result = String::with_capacity(template.len());
    let mut remaining = template;

    while let Some(start) = remaining.find(open) {
        result.push_str(&remaining[..start + open.len()]);
        remaining = &remaining[start + open.len()..];

        match remaining.find(close) {
            Some(end) => {
                result.push_str(&strip_leading_dots(&remaining[..end]));
                result.push_str(close);
                remaining = &remaining[end + close.len()..];
            }
            None => {
                result.push_str(remaining);
                remaining = "";
            }
        }
    }

    result.push_str(remaining);
    result
}

/// Remove dots that start a path (`.A.b` -> `A.b`), leaving member access and
/// quoted strings alone.
fn strip_leading_dots(expr: &str) -> String {
    let mut result = String::with_capacity(expr.len());
    let mut chars = expr.chars().peekable();
    let mut in_single_quote = false;
    let mut in_double_quote = false;

    while let Some(ch) = chars.next() {
        match ch {
            '\'' if !in_double_quote => {
                in_single_quote = !in_single_quote;
                result.push(ch);
            }
            '"' if !in_single_quote => {
                in_double_quote = !in_double_quote;
                result.push(ch);
            }
            '.' if !in_single_quote && !in_double_quote => {
                let follows_operand = result
                    .chars()
                    .last()
                    .is_some_and(|c| c.is_alphanumeric() || c == '_' || c == ')' || c == ']');
                let starts_ident = chars
                    .peek()
                    .is_some_and(|c| c.is_alphabetic() || *c == '_');
                if follows_operand || !starts_ident {
                    result.push('.');
                }
            }
            _ => result.push(ch),
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn demo_context() -> TemplateContext {
        let values = Values::new("demo");
        TemplateContext::from_values(&values).unwrap()
    }

    #[test]
    fn renders_go_style_paths() {
        let engine = TemplateEngine::local().unwrap();
        let out = engine
            .render("t", "name: [[[ .ClusterName ]]]\n", &demo_context(), false)
            .unwrap();
        assert_eq!(out, "name: demo\n");
    }

    #[test]
    fn renders_nested_provider_keys() {
        let engine = TemplateEngine::local().unwrap();
        let ctx = demo_context()
            .with("Linode", serde_json::json!({"Token": "abc", "VPC": true}))
            .unwrap();
        let out = engine
            .render(
                "t",
                "[[% if .Linode.VPC %]]token=[[[ .Linode.Token ]]][[% endif %]]",
                &ctx,
                false,
            )
            .unwrap();
        assert_eq!(out, "token=abc");
    }

    /// Story: a control plane template mixes local and first-boot placeholders
    ///
    /// The local pass substitutes the cluster name and leaves the region
    /// lookup for cloud-init on the bootstrap node.
    #[test]
    fn story_first_boot_placeholders_survive_local_render() {
        let engine = TemplateEngine::local().unwrap();
        let template = "name: [[[ .ClusterName ]]]-control-plane\nregion: {{ ds.meta_data.region }}\n";

        let out = engine.render("cp.yaml", template, &demo_context(), true).unwrap();

        assert!(out.contains("name: demo-control-plane"));
        assert!(out.contains("{{ ds.meta_data.region }}"));
        assert!(!out.contains("[[["));
    }

    #[test]
    fn undefined_variables_fail_with_source_name() {
        let engine = TemplateEngine::local().unwrap();
        let err = engine
            .render("cluster.yaml", "[[[ .Missing ]]]", &demo_context(), false)
            .unwrap_err();
        match err {
            Error::Template { name, .. } => assert_eq!(name, "cluster.yaml"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn syntax_errors_fail() {
        let engine = TemplateEngine::local().unwrap();
        let result = engine.render("bad.yaml", "[[[ .ClusterName ", &demo_context(), false);
        assert!(matches!(result, Err(Error::Template { .. })));
    }

    #[test]
    fn quoted_dots_and_member_access_are_kept() {
        assert_eq!(strip_leading_dots(" .A.b | default('.x') "), " A.b | default('.x') ");
        assert_eq!(strip_leading_dots(" 1.5 "), " 1.5 ");
    }

    #[test]
    fn helm_flavor_renders_brace_templates() {
        let engine = TemplateEngine::helm_values().unwrap();
        let ctx = TemplateContext::default()
            .with("Cluster", serde_json::json!({"metadata": {"name": "demo"}}))
            .unwrap();
        let out = engine
            .render("values", "clusterName: {{ .Cluster.metadata.name }}", &ctx, false)
            .unwrap();
        assert_eq!(out, "clusterName: demo");
    }
}
