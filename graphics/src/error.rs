//! Graphics error types.

use thiserror::Error;

use crate::types::ShaderStage;

/// Errors that can occur while loading effects, compiling shaders and
/// building bind tables.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphicsError {
    /// The backend compiler rejected a stage.
    #[error("{stage} shader `{entry_point}` failed to compile: {message}")]
    CompilationFailed {
        stage: ShaderStage,
        entry_point: String,
        message: String,
    },
    /// The stages compiled but the program could not be linked.
    #[error("program link failed: {0}")]
    LinkFailed(String),
    /// Compiled code could not be introspected.
    #[error("shader reflection failed: {0}")]
    ReflectionFailed(String),
    /// A shader variable or resource has no matching effect parameter.
    #[error("{stage} shader references `{name}` but the effect has no such parameter")]
    UnresolvedParameter { name: String, stage: ShaderStage },
    /// A value or shader slot does not fit the parameter's type.
    #[error("type mismatch for `{name}`: expected {expected}, found {found}")]
    TypeMismatch {
        name: String,
        expected: String,
        found: String,
    },
    /// An invalid parameter was provided.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    /// Failed to create a resource.
    #[error("resource creation failed: {0}")]
    ResourceCreationFailed(String),
    /// A requested feature is not supported.
    #[error("feature not supported: {0}")]
    FeatureNotSupported(String),
    /// An effect description is malformed.
    #[error("effect description error: {0}")]
    EffectParse(String),
    /// Settings could not be parsed.
    #[error("configuration error: {0}")]
    Config(String),
    /// An internal error occurred.
    #[error("internal error: {0}")]
    Internal(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = GraphicsError::LinkFailed("missing vertex stage".to_string());
        assert_eq!(err.to_string(), "program link failed: missing vertex stage");

        let err = GraphicsError::UnresolvedParameter {
            name: "exposure".to_string(),
            stage: ShaderStage::Pixel,
        };
        assert_eq!(
            err.to_string(),
            "pixel shader references `exposure` but the effect has no such parameter"
        );

        let err = GraphicsError::CompilationFailed {
            stage: ShaderStage::Vertex,
            entry_point: "DrawVS".to_string(),
            message: "syntax error".to_string(),
        };
        assert!(err.to_string().contains("DrawVS"));
    }
}
