#![allow(dead_code)]

//! Resolution error types

use thiserror::Error;

/// Errors produced while resolving step references
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ResolveError {
    /// A `{{stepN.result...}}` reference points at a step with no usable result
    #[error("unresolved reference to step {step} at path '{path}'")]
    UnresolvedReference { step: u32, path: String },

    /// A `{{params.name}}` reference names a parameter that was never supplied
    #[error("unresolved parameter reference '{name}'")]
    UnresolvedParam { name: String },

    /// A path segment could not be parsed (e.g. unclosed bracket index)
    #[error("malformed path segment '{segment}' in reference to step {step}")]
    MalformedPath { step: u32, segment: String },
}

impl ResolveError {
    /// Create an unresolved step reference error
    pub fn unresolved(step: u32, path: impl Into<String>) -> Self {
        Self::UnresolvedReference {
            step,
            path: path.into(),
        }
    }

    /// Create an unresolved parameter error
    pub fn param(name: impl Into<String>) -> Self {
        Self::UnresolvedParam { name: name.into() }
    }

    /// Create a malformed path error
    pub fn malformed(step: u32, segment: impl Into<String>) -> Self {
        Self::MalformedPath {
            step,
            segment: segment.into(),
        }
    }
}
