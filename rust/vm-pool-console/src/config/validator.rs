//! Configuration validation.
//!
//! Rejects setting combinations that would leave the console unusable,
//! reporting every problem at once with a hint on how to fix it.

use super::AppConfig;
use super::error::{ConfigResult, ConfigurationError};

/// Shortest accepted HS256 secret, in bytes.
pub const MIN_JWT_SECRET_LEN: usize = 32;

/// Checks an [`AppConfig`] before the server starts.
///
/// | Setting                       | Rule                                        |
/// |-------------------------------|---------------------------------------------|
/// | gateway                       | bearer tokens or remote-user must be on     |
/// | gateway.jwt_secret            | at least 32 bytes; needs the `gateway` feature |
/// | server.port, timeout_secs     | non-zero                                    |
/// | database.path                 | non-empty                                   |
/// | database.bootstrap_admin      | non-blank when set                          |
#[derive(Debug)]
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the entire application configuration.
    pub fn validate(config: &AppConfig) -> ConfigResult<()> {
        let mut errors = Vec::new();

        for check in [
            Self::validate_authentication(config),
            Self::validate_server(config),
            Self::validate_database(config),
        ] {
            match check {
                Ok(()) => {}
                Err(ConfigurationError::Multiple(errs)) => errors.extend(errs),
                Err(e) => errors.push(e),
            }
        }

        if errors.is_empty() {
            Ok(())
        } else if errors.len() == 1 {
            Err(errors.remove(0))
        } else {
            Err(ConfigurationError::multiple(errors))
        }
    }

    /// At least one way to identify users must be enabled.
    pub fn validate_authentication(config: &AppConfig) -> ConfigResult<()> {
        let gateway = &config.gateway;

        if gateway.jwt_enabled() {
            if !cfg!(feature = "gateway") {
                return Err(ConfigurationError::feature_unavailable(
                    "Bearer token authentication",
                    "The 'gateway' feature is not enabled in this build",
                    "Rebuild with --features gateway, or set POOL_CONSOLE__GATEWAY__TRUST_REMOTE_USER=true",
                ));
            }
            let len = gateway.jwt_secret.as_deref().map_or(0, str::len);
            if len < MIN_JWT_SECRET_LEN {
                return Err(ConfigurationError::invalid(
                    format!("gateway.jwt_secret is {len} bytes long"),
                    format!(
                        "Use a random secret of at least {MIN_JWT_SECRET_LEN} bytes in POOL_CONSOLE__GATEWAY__JWT_SECRET"
                    ),
                ));
            }
        } else if !gateway.trust_remote_user {
            return Err(ConfigurationError::missing_required(
                "gateway.jwt_secret or gateway.trust_remote_user",
                "Identifying the user behind each console request",
                "POOL_CONSOLE__GATEWAY__JWT_SECRET or POOL_CONSOLE__GATEWAY__TRUST_REMOTE_USER=true",
            ));
        }

        Ok(())
    }

    pub fn validate_server(config: &AppConfig) -> ConfigResult<()> {
        let mut errors = Vec::new();
        if config.server.port == 0 {
            errors.push(ConfigurationError::invalid(
                "server.port is 0",
                "Set POOL_CONSOLE__SERVER__PORT to a port between 1 and 65535",
            ));
        }
        if config.server.timeout_secs == 0 {
            errors.push(ConfigurationError::invalid(
                "server.timeout_secs is 0, every request would time out",
                "Set POOL_CONSOLE__SERVER__TIMEOUT_SECS to a positive number of seconds",
            ));
        }
        collect(errors)
    }

    pub fn validate_database(config: &AppConfig) -> ConfigResult<()> {
        let mut errors = Vec::new();
        if config.database.path.trim().is_empty() {
            errors.push(ConfigurationError::missing_required(
                "database.path",
                "Storing pools, VMs and permissions",
                "POOL_CONSOLE__DATABASE__PATH (use :memory: for a throwaway database)",
            ));
        }
        if config
            .database
            .bootstrap_admin
            .as_deref()
            .is_some_and(|admin| admin.trim().is_empty())
        {
            errors.push(ConfigurationError::invalid(
                "database.bootstrap_admin is blank",
                "Unset POOL_CONSOLE__DATABASE__BOOTSTRAP_ADMIN or set it to a user login",
            ));
        }
        collect(errors)
    }
}

fn collect(mut errors: Vec<ConfigurationError>) -> ConfigResult<()> {
    match errors.len() {
        0 => Ok(()),
        1 => Err(errors.remove(0)),
        _ => Err(ConfigurationError::multiple(errors)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn remote_user_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.gateway.trust_remote_user = true;
        config
    }

    #[test]
    fn test_remote_user_only_valid() {
        assert!(ConfigValidator::validate(&remote_user_config()).is_ok());
    }

    #[test]
    fn test_no_auth_method_invalid() {
        let err = ConfigValidator::validate(&AppConfig::default()).unwrap_err();
        assert!(matches!(err, ConfigurationError::MissingRequired { .. }));
        assert!(err.to_string().contains("TRUST_REMOTE_USER"));
    }

    #[cfg(feature = "gateway")]
    #[test]
    fn test_short_secret_invalid() {
        let mut config = AppConfig::default();
        config.gateway.jwt_secret = Some("short".to_string());
        let err = ConfigValidator::validate(&config).unwrap_err();
        assert!(err.to_string().contains("at least 32 bytes"));
    }

    #[cfg(feature = "gateway")]
    #[test]
    fn test_long_secret_valid() {
        let mut config = AppConfig::default();
        config.gateway.jwt_secret = Some("x".repeat(MIN_JWT_SECRET_LEN));
        assert!(ConfigValidator::validate(&config).is_ok());
    }

    #[test]
    fn test_reports_every_problem() {
        let mut config = remote_user_config();
        config.server.port = 0;
        config.server.timeout_secs = 0;
        config.database.path = String::new();
        let err = ConfigValidator::validate(&config).unwrap_err();
        assert!(err.is_multiple());
        assert_eq!(err.count(), 3);
    }

    #[test]
    fn test_blank_bootstrap_admin_invalid() {
        let mut config = remote_user_config();
        config.database.bootstrap_admin = Some("  ".to_string());
        let err = ConfigValidator::validate(&config).unwrap_err();
        assert!(err.to_string().contains("bootstrap_admin"));
    }
}
