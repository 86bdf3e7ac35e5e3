//! Configuration errors with actionable messages.
//!
//! Every variant carries enough context for an operator to fix the
//! deployment without reading the source.

use std::fmt;

/// Configuration errors with detailed, actionable messages.
///
/// Each error variant includes enough context for users to understand
/// what went wrong and how to fix it.
#[derive(Debug, Clone)]
pub enum ConfigurationError {
    /// Invalid configuration value.
    Invalid {
        /// What is wrong.
        message: String,
        /// How to fix it.
        fix_hint: String,
    },
    /// A required configuration is missing.
    MissingRequired {
        /// The missing setting name.
        setting: String,
        /// What feature requires this setting.
        context: String,
        /// Environment variable to set.
        env_var: String,
    },
    /// A feature is not available in the current configuration.
    FeatureUnavailable {
        /// The unavailable feature.
        feature: String,
        /// Why it's unavailable.
        reason: String,
        /// What to use instead.
        alternative: String,
    },
    /// A service connection failed.
    ConnectionFailed {
        /// The service that failed.
        service: String,
        /// The endpoint that was tried.
        endpoint: String,
        /// The error message.
        error: String,
        /// Troubleshooting steps.
        troubleshooting: String,
    },
    /// Multiple errors occurred.
    Multiple(Vec<ConfigurationError>),
}

impl std::error::Error for ConfigurationError {}

impl fmt::Display for ConfigurationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Invalid { message, fix_hint } => {
                write!(
                    f,
                    "Invalid configuration: {message}\n\nHow to fix: {fix_hint}"
                )
            }
            Self::MissingRequired {
                setting,
                context,
                env_var,
            } => {
                write!(
                    f,
                    "Missing required configuration: {setting}\n\n\
                    Required for: {context}\n\
                    Set via: {env_var}"
                )
            }
            Self::FeatureUnavailable {
                feature,
                reason,
                alternative,
            } => {
                write!(
                    f,
                    "Feature not available: {feature}\n\n\
                    Reason: {reason}\n\
                    Alternative: {alternative}"
                )
            }
            Self::ConnectionFailed {
                service,
                endpoint,
                error,
                troubleshooting,
            } => {
                write!(
                    f,
                    "Connection failed: {service}\n\n\
                    Endpoint: {endpoint}\n\
                    Error: {error}\n\n\
                    Check: {troubleshooting}"
                )
            }
            Self::Multiple(errors) => {
                writeln!(f, "Multiple configuration errors:")?;
                for (i, err) in errors.iter().enumerate() {
                    writeln!(f, "\n{}. {}", i + 1, err)?;
                }
                Ok(())
            }
        }
    }
}

impl ConfigurationError {
    /// Create an invalid configuration error.
    #[must_use]
    pub fn invalid(message: impl Into<String>, fix_hint: impl Into<String>) -> Self {
        Self::Invalid {
            message: message.into(),
            fix_hint: fix_hint.into(),
        }
    }

    /// Create a missing required configuration error.
    #[must_use]
    pub fn missing_required(
        setting: impl Into<String>,
        context: impl Into<String>,
        env_var: impl Into<String>,
    ) -> Self {
        Self::MissingRequired {
            setting: setting.into(),
            context: context.into(),
            env_var: env_var.into(),
        }
    }

    /// Create a feature unavailable error.
    #[must_use]
    pub fn feature_unavailable(
        feature: impl Into<String>,
        reason: impl Into<String>,
        alternative: impl Into<String>,
    ) -> Self {
        Self::FeatureUnavailable {
            feature: feature.into(),
            reason: reason.into(),
            alternative: alternative.into(),
        }
    }

    /// Create a connection failed error.
    #[must_use]
    pub fn connection_failed(
        service: impl Into<String>,
        endpoint: impl Into<String>,
        error: impl Into<String>,
        troubleshooting: impl Into<String>,
    ) -> Self {
        Self::ConnectionFailed {
            service: service.into(),
            endpoint: endpoint.into(),
            error: error.into(),
            troubleshooting: troubleshooting.into(),
        }
    }

    /// Create a multiple errors wrapper.
    #[must_use]
    pub fn multiple(errors: Vec<ConfigurationError>) -> Self {
        Self::Multiple(errors)
    }

    /// Check if this is a multiple errors wrapper.
    #[must_use]
    pub fn is_multiple(&self) -> bool {
        matches!(self, Self::Multiple(_))
    }

    /// Get the number of errors (1 for single errors, N for multiple).
    #[must_use]
    pub fn count(&self) -> usize {
        match self {
            Self::Multiple(errors) => errors.len(),
            _ => 1,
        }
    }
}

/// Result type for configuration validation.
pub type ConfigResult<T> = Result<T, ConfigurationError>;
