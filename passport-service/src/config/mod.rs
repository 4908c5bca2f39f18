use serde::Deserialize;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;
use std::str::FromStr;

#[derive(Debug, Clone, Deserialize)]
pub struct PassportConfig {
    #[serde(flatten)]
    pub common: core_config::Config,
    pub environment: Environment,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub database: DatabaseConfig,
    /// OTP tickets fall back to process memory when unset.
    pub redis: Option<RedisConfig>,
    pub jwt: JwtConfig,
    pub smtp: SmtpConfig,
    /// SMS is only logged when unset.
    pub twilio: Option<TwilioConfig>,
    pub security: SecurityConfig,
    pub web_app_base_url: String,
    pub rate_limit: RateLimitConfig,
    pub bootstrap: Option<BootstrapConfig>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Dev,
    Prod,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub private_key_path: String,
    pub public_key_path: String,
    pub issuer: String,
    pub access_token_expiry_minutes: i64,
    pub refresh_token_expiry_days: i64,
    pub authorization_code_ttl_seconds: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub user: Option<String>,
    pub password: Option<String>,
    pub from: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TwilioConfig {
    pub account_sid: String,
    pub auth_token: String,
    pub from_number: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SecurityConfig {
    pub allowed_origins: Vec<String>,
    pub trusted_device_expiry_days: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    pub token_attempts: u32,
    pub token_window_seconds: u64,
    pub otp_attempts: u32,
    pub otp_window_seconds: u64,
    pub password_reset_attempts: u32,
    pub password_reset_window_seconds: u64,
    pub global_ip_limit: u32,
    pub global_ip_window_seconds: u64,
}

/// Seeded `passport_admin`, created at startup when absent.
#[derive(Debug, Clone, Deserialize)]
pub struct BootstrapConfig {
    pub tenant_slug: String,
    pub tenant_name: String,
    pub username: String,
    pub email: Option<String>,
    pub password: String,
}

impl PassportConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common_config = core_config::Config::load()?;

        let env_str = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string());
        let environment: Environment = env_str
            .parse()
            .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?;

        let is_prod = environment == Environment::Prod;

        let redis = get_optional_env("REDIS_URL").map(|url| RedisConfig { url });

        let twilio = match get_optional_env("TWILIO_ACCOUNT_SID") {
            Some(account_sid) => Some(TwilioConfig {
                account_sid,
                auth_token: get_env("TWILIO_AUTH_TOKEN", None, is_prod)?,
                from_number: get_env("TWILIO_FROM_NUMBER", None, is_prod)?,
            }),
            None => None,
        };

        let bootstrap = match get_optional_env("BOOTSTRAP_ADMIN_USERNAME") {
            Some(username) => Some(BootstrapConfig {
                tenant_slug: get_env("BOOTSTRAP_TENANT_SLUG", Some("passport"), is_prod)?,
                tenant_name: get_env("BOOTSTRAP_TENANT_NAME", Some("Passport"), is_prod)?,
                username,
                email: get_optional_env("BOOTSTRAP_ADMIN_EMAIL"),
                password: get_env("BOOTSTRAP_ADMIN_PASSWORD", None, is_prod)?,
            }),
            None => None,
        };

        let config = PassportConfig {
            common: common_config,
            environment: environment.clone(),
            service_name: get_env("SERVICE_NAME", Some("passport-service"), is_prod)?,
            service_version: get_env("SERVICE_VERSION", Some(env!("CARGO_PKG_VERSION")), is_prod)?,
            log_level: get_env("LOG_LEVEL", Some("info"), is_prod)?,
            otlp_endpoint: get_optional_env("OTLP_ENDPOINT"),
            database: DatabaseConfig {
                url: get_env("DATABASE_URL", None, is_prod)?,
                max_connections: parse_env("DATABASE_MAX_CONNECTIONS", "10", is_prod)?,
                min_connections: parse_env("DATABASE_MIN_CONNECTIONS", "1", is_prod)?,
            },
            redis,
            jwt: JwtConfig {
                private_key_path: get_env("JWT_PRIVATE_KEY_PATH", None, is_prod)?,
                public_key_path: get_env("JWT_PUBLIC_KEY_PATH", None, is_prod)?,
                issuer: get_env("JWT_ISSUER", Some("passport"), is_prod)?,
                access_token_expiry_minutes: parse_env(
                    "JWT_ACCESS_TOKEN_EXPIRY_MINUTES",
                    "60",
                    is_prod,
                )?,
                refresh_token_expiry_days: parse_env("JWT_REFRESH_TOKEN_EXPIRY_DAYS", "30", is_prod)?,
                authorization_code_ttl_seconds: parse_env("AUTH_CODE_TTL_SECONDS", "60", is_prod)?,
            },
            smtp: SmtpConfig {
                host: get_env("SMTP_HOST", Some("localhost"), is_prod)?,
                port: parse_env("SMTP_PORT", "587", is_prod)?,
                user: get_optional_env("SMTP_USER"),
                password: get_optional_env("SMTP_PASSWORD"),
                from: get_env("SMTP_FROM", Some("Passport <no-reply@localhost>"), is_prod)?,
            },
            twilio,
            security: SecurityConfig {
                allowed_origins: get_env("ALLOWED_ORIGINS", Some("http://localhost:3000"), is_prod)?
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect(),
                trusted_device_expiry_days: parse_env("TRUSTED_DEVICE_EXPIRY_DAYS", "30", is_prod)?,
            },
            web_app_base_url: get_env("WEB_APP_BASE_URL", Some("http://localhost:3000"), is_prod)?,
            rate_limit: RateLimitConfig {
                token_attempts: parse_env("RATE_LIMIT_TOKEN_ATTEMPTS", "10", is_prod)?,
                token_window_seconds: parse_env("RATE_LIMIT_TOKEN_WINDOW_SECONDS", "60", is_prod)?,
                otp_attempts: parse_env("RATE_LIMIT_OTP_ATTEMPTS", "5", is_prod)?,
                otp_window_seconds: parse_env("RATE_LIMIT_OTP_WINDOW_SECONDS", "300", is_prod)?,
                password_reset_attempts: parse_env(
                    "RATE_LIMIT_PASSWORD_RESET_ATTEMPTS",
                    "3",
                    is_prod,
                )?,
                password_reset_window_seconds: parse_env(
                    "RATE_LIMIT_PASSWORD_RESET_WINDOW_SECONDS",
                    "3600",
                    is_prod,
                )?,
                global_ip_limit: parse_env("RATE_LIMIT_GLOBAL_IP_LIMIT", "100", is_prod)?,
                global_ip_window_seconds: parse_env(
                    "RATE_LIMIT_GLOBAL_IP_WINDOW_SECONDS",
                    "60",
                    is_prod,
                )?,
            },
            bootstrap,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.common.port == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "PORT must be greater than 0"
            )));
        }

        if self.jwt.access_token_expiry_minutes <= 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "JWT_ACCESS_TOKEN_EXPIRY_MINUTES must be positive"
            )));
        }

        if self.jwt.refresh_token_expiry_days <= 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "JWT_REFRESH_TOKEN_EXPIRY_DAYS must be positive"
            )));
        }

        if self.jwt.authorization_code_ttl_seconds <= 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "AUTH_CODE_TTL_SECONDS must be positive"
            )));
        }

        if self.security.trusted_device_expiry_days <= 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "TRUSTED_DEVICE_EXPIRY_DAYS must be positive"
            )));
        }

        if self.environment == Environment::Prod {
            if self.security.allowed_origins.iter().any(|o| o == "*") {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "Wildcard CORS origin not allowed in production"
                )));
            }

            if self.twilio.is_none() {
                tracing::warn!("TWILIO_ACCOUNT_SID not set - OTP codes will only be logged");
            }
        }

        Ok(())
    }
}

/// Secrets (no default) are always required; defaults only apply outside prod
/// for variables that have one.
fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AppError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => match default {
            Some(def) => {
                if is_prod {
                    tracing::debug!(key, "Using default value in production");
                }
                Ok(def.to_string())
            }
            None => Err(AppError::ConfigError(anyhow::anyhow!(
                "{} is required but not set",
                key
            ))),
        },
    }
}

fn get_optional_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_env<T>(key: &str, default: &str, is_prod: bool) -> Result<T, AppError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    get_env(key, Some(default), is_prod)?
        .parse()
        .map_err(|e: T::Err| AppError::ConfigError(anyhow::anyhow!("{}: {}", key, e)))
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dev" => Ok(Environment::Dev),
            "prod" => Ok(Environment::Prod),
            _ => Err(format!("Invalid environment: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_environment_parsing() {
        assert_eq!("PROD".parse::<Environment>().unwrap(), Environment::Prod);
        assert_eq!("dev".parse::<Environment>().unwrap(), Environment::Dev);
        assert!("staging".parse::<Environment>().is_err());
    }

    #[test]
    fn test_parse_env_uses_default_when_unset() {
        let value: i64 = parse_env("PASSPORT_TEST_UNSET_KNOB", "42", false).unwrap();
        assert_eq!(value, 42);
    }

    #[test]
    fn test_missing_secret_is_an_error() {
        assert!(get_env("PASSPORT_TEST_UNSET_SECRET", None, false).is_err());
    }
}
