//! Layer registry and the textual topology linker.
//!
//! A topology expression is a whitespace-separated token stream with the
//! grammar `NAME | ( | ) | [+-*]NAME`. The walk keeps an explicit context
//! stack: `(` pushes the current layer, `)` pops it back, and a prefixed
//! name links the named layer to the layer on top of the stack — `+` as an
//! upper neighbor, `-` as the under neighbor, `*` bidirectionally (upper
//! neighbor of the context, context as its under layer). The linked layer
//! becomes current, so a following `(` nests directives beneath it.

use std::sync::Arc;

use crate::layer::Layer;

/// Fatal wiring failure: the stack cannot be built from this expression.
#[derive(Debug, thiserror::Error)]
pub enum ConfigurationError {
    #[error("layer `{0}` is already registered")]
    DuplicateLayer(String),
    #[error("unknown layer `{0}` in topology expression")]
    UnknownLayer(String),
    #[error("unbalanced parentheses in topology expression")]
    Unbalanced,
    #[error("`{0}` appears before any layer context is established")]
    MissingContext(String),
    #[error("unexpected token `{0}` in topology expression")]
    UnexpectedToken(String),
}

/// Registry of named layers. Owns the strong references; inter-layer links
/// are weak.
#[derive(Default)]
pub struct LayerStack {
    layers: Vec<Arc<dyn Layer>>,
}

impl LayerStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a layer under its own name. Names must be unique.
    pub fn register(&mut self, layer: Arc<dyn Layer>) -> Result<(), ConfigurationError> {
        if self.get(layer.name()).is_some() {
            return Err(ConfigurationError::DuplicateLayer(layer.name().to_owned()));
        }
        self.layers.push(layer);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Layer>> {
        self.layers.iter().find(|l| l.name() == name).cloned()
    }

    /// Wire the registered layers according to a topology expression.
    /// Consumed once at startup; any error leaves the wiring unusable.
    pub fn connect(&self, expression: &str) -> Result<(), ConfigurationError> {
        let mut stack: Vec<Arc<dyn Layer>> = Vec::new();
        let mut current: Option<Arc<dyn Layer>> = None;

        for token in expression.split_whitespace() {
            match token {
                "(" => {
                    let context = current
                        .clone()
                        .ok_or_else(|| ConfigurationError::MissingContext(token.to_owned()))?;
                    stack.push(context);
                }
                ")" => {
                    current = Some(stack.pop().ok_or(ConfigurationError::Unbalanced)?);
                }
                _ => {
                    let mode = token.chars().next().unwrap_or(' ');
                    if matches!(mode, '+' | '-' | '*') {
                        let name = &token[1..];
                        let layer = self
                            .get(name)
                            .ok_or_else(|| ConfigurationError::UnknownLayer(name.to_owned()))?;
                        let context = stack
                            .last()
                            .cloned()
                            .ok_or_else(|| ConfigurationError::MissingContext(token.to_owned()))?;
                        match mode {
                            '+' => context.links().add_upper(&layer),
                            '-' => context.links().set_under(&layer),
                            _ => {
                                context.links().add_upper(&layer);
                                layer.links().set_under(&context);
                            }
                        }
                        current = Some(layer);
                    } else if current.is_none() && stack.is_empty() {
                        // the first bare token establishes the root context
                        current = Some(
                            self.get(token)
                                .ok_or_else(|| ConfigurationError::UnknownLayer(token.to_owned()))?,
                        );
                    } else {
                        return Err(ConfigurationError::UnexpectedToken(token.to_owned()));
                    }
                }
            }
        }

        if stack.is_empty() {
            Ok(())
        } else {
            Err(ConfigurationError::Unbalanced)
        }
    }
}
