//! Evaluation contexts and the variable-rendering seam.
//!
//! The core never interprets template syntax itself: rendering is delegated
//! to a [`VariableRenderer`] supplied by the embedding runtime. The contexts
//! here carry the variables a renderer or a schedule condition can see.

use serde_json::{Map, Value};
use std::sync::Arc;

use crate::flow::Flow;

/// Error raised by a variable renderer.
#[derive(Debug, Clone, thiserror::Error)]
#[error("variable rendering failed: {message}")]
pub struct RenderError {
    /// Description of the rendering failure.
    pub message: String,
}

impl RenderError {
    /// Creates a new render error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Renders variable templates against a set of variables.
///
/// Implemented by the embedding runtime (e.g. over a template engine). The
/// core only calls it on strings and string-valued map entries.
pub trait VariableRenderer: Send + Sync + std::fmt::Debug {
    /// Renders a single template.
    ///
    /// # Errors
    ///
    /// Returns a [`RenderError`] when the template references unknown
    /// variables or is malformed.
    fn render(
        &self,
        template: &str,
        variables: &Map<String, Value>,
    ) -> std::result::Result<String, RenderError>;
}

/// A renderer that returns templates unchanged.
///
/// Useful for tests and for deployments without templated configuration.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityRenderer;

impl VariableRenderer for IdentityRenderer {
    fn render(
        &self,
        template: &str,
        _variables: &Map<String, Value>,
    ) -> std::result::Result<String, RenderError> {
        Ok(template.to_string())
    }
}

/// Per-evaluation runtime context: a renderer plus the variables it sees.
#[derive(Debug, Clone)]
pub struct RunContext {
    renderer: Arc<dyn VariableRenderer>,
    /// Variables visible to rendering.
    pub variables: Map<String, Value>,
}

impl RunContext {
    /// Creates a run context around the given renderer.
    #[must_use]
    pub fn new(renderer: Arc<dyn VariableRenderer>) -> Self {
        Self {
            renderer,
            variables: Map::new(),
        }
    }

    /// Creates a run context that renders templates verbatim.
    #[must_use]
    pub fn identity() -> Self {
        Self::new(Arc::new(IdentityRenderer))
    }

    /// Returns a copy with the given variables merged in (new keys win).
    #[must_use]
    pub fn with_variables(&self, extra: Map<String, Value>) -> Self {
        let mut ctx = self.clone();
        ctx.variables.extend(extra);
        ctx
    }

    /// Renders a single template against this context's variables.
    ///
    /// # Errors
    ///
    /// Propagates the renderer's [`RenderError`].
    pub fn render(&self, template: &str) -> std::result::Result<String, RenderError> {
        self.renderer.render(template, &self.variables)
    }

    /// Renders every string value of a map, recursing into nested objects.
    ///
    /// Non-string leaves pass through unchanged.
    ///
    /// # Errors
    ///
    /// Propagates the first [`RenderError`] encountered.
    pub fn render_map(
        &self,
        map: &Map<String, Value>,
    ) -> std::result::Result<Map<String, Value>, RenderError> {
        let mut rendered = Map::with_capacity(map.len());
        for (key, value) in map {
            rendered.insert(key.clone(), self.render_value(value)?);
        }
        Ok(rendered)
    }

    fn render_value(&self, value: &Value) -> std::result::Result<Value, RenderError> {
        match value {
            Value::String(s) => Ok(Value::String(self.render(s)?)),
            Value::Object(map) => Ok(Value::Object(self.render_map(map)?)),
            Value::Array(items) => Ok(Value::Array(
                items
                    .iter()
                    .map(|v| self.render_value(v))
                    .collect::<std::result::Result<_, _>>()?,
            )),
            other => Ok(other.clone()),
        }
    }
}

/// Context handed to schedule conditions.
///
/// Carries the flow being triggered, the run context, and the variables the
/// condition can inspect. Enrichment (e.g. injecting the schedule window)
/// produces a new context; the original is never mutated.
#[derive(Debug, Clone)]
pub struct ConditionContext {
    /// The rendering context.
    pub run_context: RunContext,
    /// The flow the trigger belongs to.
    pub flow: Flow,
    /// Variables visible to conditions.
    pub variables: Map<String, Value>,
}

impl ConditionContext {
    /// Creates a condition context for the given flow.
    #[must_use]
    pub fn new(run_context: RunContext, flow: Flow) -> Self {
        Self {
            run_context,
            flow,
            variables: Map::new(),
        }
    }

    /// Returns a copy with the given variables merged into both the
    /// condition-visible variables and the rendering context.
    #[must_use]
    pub fn with_variables(&self, extra: Map<String, Value>) -> Self {
        let mut ctx = self.clone();
        ctx.run_context = ctx.run_context.with_variables(extra.clone());
        ctx.variables.extend(extra);
        ctx
    }
}
