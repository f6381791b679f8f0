//! Shader object settings.
//!
//! Settings are plain serde structs so tools can keep them in a TOML file:
//!
//! ```toml
//! unresolved = "skip"
//! use_shader_cache = true
//! log_generated_source = false
//! ```

use serde::{Deserialize, Serialize};

use crate::error::GraphicsError;

/// What to do when a shader declares a variable or resource that no effect
/// parameter provides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnresolvedPolicy {
    /// Fail the bind-table build and mark the shader object invalid.
    #[default]
    Error,
    /// Log a warning and leave the slot unbound (legacy content).
    Skip,
}

/// Settings applied when shader objects compile and build bind tables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShaderSettings {
    /// Handling of unresolved shader names.
    pub unresolved: UnresolvedPolicy,
    /// Reuse compiled stages and linked programs across passes.
    pub use_shader_cache: bool,
    /// Log the generated source of each compiled stage at debug level.
    pub log_generated_source: bool,
}

impl Default for ShaderSettings {
    fn default() -> Self {
        Self {
            unresolved: UnresolvedPolicy::Error,
            use_shader_cache: true,
            log_generated_source: false,
        }
    }
}

impl ShaderSettings {
    /// Create default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse settings from TOML text. Missing keys keep their defaults.
    pub fn from_toml_str(text: &str) -> Result<Self, GraphicsError> {
        toml::from_str(text).map_err(|e| GraphicsError::Config(e.to_string()))
    }

    /// Set the unresolved-name policy.
    pub fn with_unresolved(mut self, policy: UnresolvedPolicy) -> Self {
        self.unresolved = policy;
        self
    }

    /// Enable or disable the shader cache.
    pub fn with_shader_cache(mut self, enabled: bool) -> Self {
        self.use_shader_cache = enabled;
        self
    }

    /// Enable or disable logging of generated source.
    pub fn with_generated_source_logging(mut self, enabled: bool) -> Self {
        self.log_generated_source = enabled;
        self
    }
}
