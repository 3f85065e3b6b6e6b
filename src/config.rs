/// Configuration management for Estate Gate
use crate::error::{EstateError, EstateResult};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

/// Main server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub service: ServiceConfig,
    pub storage: StorageConfig,
    pub authentication: AuthConfig,
    pub registration: RegistrationConfig,
    pub email: Option<EmailConfig>,
    pub payments: PaymentConfig,
    pub rate_limit: RateLimitConfig,
    pub logging: LoggingConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub hostname: String,
    pub port: u16,
    /// Public base URL used in links sent to users
    pub public_url: Option<String>,
    pub estate_name: String,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_directory: PathBuf,
    pub database: PathBuf,
}

/// Authentication configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    pub jwt_secret: String,
    /// Session lifetime in seconds
    pub session_ttl: i64,
    /// E-mails that register with the unrestricted `super` role
    pub super_admin_emails: Vec<String>,
}

/// OTP-gated registration configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrationConfig {
    /// OTP lifetime in seconds
    pub otp_ttl: i64,
    pub otp_max_attempts: i64,
    /// OTP requests allowed per e-mail per hour
    pub otp_requests_per_hour: u32,
}

/// Email configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailConfig {
    pub smtp_url: String,
    pub from_address: String,
}

/// Subscription pricing and payment gateway configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentConfig {
    /// Price of one month-unit, in whole currency units
    pub monthly_price: i64,
    pub currency: String,
    pub gateway: Option<GatewayConfig>,
}

/// Flutterwave credentials
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    pub secret_key: String,
    pub base_url: String,
    pub redirect_url: String,
    /// Shared secret Flutterwave sends in the `verif-hash` webhook header
    pub webhook_hash: Option<String>,
}

/// Rate limiting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub authenticated_rps: u32,
    pub unauthenticated_rps: u32,
    pub burst_size: u32,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_list(key: &str) -> Vec<String> {
    env::var(key)
        .unwrap_or_default()
        .split(',')
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}

impl ServerConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> EstateResult<Self> {
        dotenv::dotenv().ok();

        let hostname = env::var("ESTATE_HOSTNAME").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("ESTATE_PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse()
            .map_err(|_| EstateError::Validation("Invalid port number".to_string()))?;
        let public_url = env::var("ESTATE_PUBLIC_URL").ok();
        let estate_name = env::var("ESTATE_NAME").unwrap_or_else(|_| "Estate Gate".to_string());

        let data_directory: PathBuf = env::var("ESTATE_DATA_DIRECTORY")
            .unwrap_or_else(|_| "./data".to_string())
            .into();
        let database = env::var("ESTATE_DATABASE_LOCATION")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_directory.join("estate.sqlite"));

        let jwt_secret = env::var("ESTATE_JWT_SECRET")
            .map_err(|_| EstateError::Validation("JWT secret required".to_string()))?;
        let session_ttl = env_or("ESTATE_SESSION_TTL", 7 * 24 * 3600);
        let super_admin_emails = env_list("ESTATE_SUPER_ADMIN_EMAILS");

        let email = if let Ok(smtp_url) = env::var("ESTATE_EMAIL_SMTP_URL") {
            Some(EmailConfig {
                smtp_url,
                from_address: env::var("ESTATE_EMAIL_FROM_ADDRESS")
                    .unwrap_or_else(|_| format!("noreply@{}", hostname)),
            })
        } else {
            None
        };

        let gateway = if let Ok(secret_key) = env::var("ESTATE_FLUTTERWAVE_SECRET_KEY") {
            Some(GatewayConfig {
                secret_key,
                base_url: env::var("ESTATE_FLUTTERWAVE_BASE_URL")
                    .unwrap_or_else(|_| "https://api.flutterwave.com/v3".to_string()),
                redirect_url: env::var("ESTATE_PAYMENT_REDIRECT_URL")
                    .unwrap_or_else(|_| format!("http://{}:{}/payment/callback", hostname, port)),
                webhook_hash: env::var("ESTATE_FLUTTERWAVE_WEBHOOK_HASH").ok(),
            })
        } else {
            None
        };

        Ok(ServerConfig {
            service: ServiceConfig {
                hostname,
                port,
                public_url,
                estate_name,
            },
            storage: StorageConfig {
                data_directory,
                database,
            },
            authentication: AuthConfig {
                jwt_secret,
                session_ttl,
                super_admin_emails,
            },
            registration: RegistrationConfig {
                otp_ttl: env_or("ESTATE_OTP_TTL", 600),
                otp_max_attempts: env_or("ESTATE_OTP_MAX_ATTEMPTS", 5),
                otp_requests_per_hour: env_or("ESTATE_OTP_REQUESTS_PER_HOUR", 5),
            },
            email,
            payments: PaymentConfig {
                monthly_price: env_or("ESTATE_MONTHLY_PRICE", 5000),
                currency: env::var("ESTATE_CURRENCY").unwrap_or_else(|_| "NGN".to_string()),
                gateway,
            },
            rate_limit: RateLimitConfig {
                enabled: env_or("ESTATE_RATE_LIMITS_ENABLED", true),
                authenticated_rps: env_or("ESTATE_RATE_LIMIT_AUTHENTICATED_RPS", 50),
                unauthenticated_rps: env_or("ESTATE_RATE_LIMIT_UNAUTHENTICATED_RPS", 10),
                burst_size: env_or("ESTATE_RATE_LIMIT_BURST", 25),
            },
            logging: LoggingConfig {
                level: env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
                json: env::var("ESTATE_LOG_FORMAT")
                    .map(|v| v.eq_ignore_ascii_case("json"))
                    .unwrap_or(false),
            },
        })
    }

    /// Validate configuration
    pub fn validate(&self) -> EstateResult<()> {
        if self.service.hostname.is_empty() {
            return Err(EstateError::Validation("Hostname cannot be empty".to_string()));
        }

        if self.authentication.jwt_secret.len() < 32 {
            return Err(EstateError::Validation(
                "JWT secret must be at least 32 characters".to_string(),
            ));
        }

        if self.payments.monthly_price <= 0 {
            return Err(EstateError::Validation(
                "Monthly price must be positive".to_string(),
            ));
        }

        Ok(())
    }

    /// Base URL used when building links for users
    pub fn public_url(&self) -> String {
        self.service
            .public_url
            .clone()
            .unwrap_or_else(|| format!("http://{}:{}", self.service.hostname, self.service.port))
    }

    /// Whether an e-mail registers with the super role
    pub fn is_super_admin_email(&self, email: &str) -> bool {
        let email = email.trim().to_lowercase();
        self.authentication.super_admin_emails.iter().any(|e| *e == email)
    }
}

#[cfg(test)]
pub(crate) fn test_config() -> ServerConfig {
    ServerConfig {
        service: ServiceConfig {
            hostname: "localhost".to_string(),
            port: 8080,
            public_url: None,
            estate_name: "Test Estate".to_string(),
        },
        storage: StorageConfig {
            data_directory: PathBuf::from("./data"),
            database: PathBuf::from(":memory:"),
        },
        authentication: AuthConfig {
            jwt_secret: "test-secret-key-for-testing-only-0123".to_string(),
            session_ttl: 3600,
            super_admin_emails: vec!["root@estate.test".to_string()],
        },
        registration: RegistrationConfig {
            otp_ttl: 600,
            otp_max_attempts: 3,
            otp_requests_per_hour: 5,
        },
        email: None,
        payments: PaymentConfig {
            monthly_price: 5000,
            currency: "NGN".to_string(),
            gateway: None,
        },
        rate_limit: RateLimitConfig {
            enabled: false,
            authenticated_rps: 50,
            unauthenticated_rps: 10,
            burst_size: 25,
        },
        logging: LoggingConfig {
            level: "info".to_string(),
            json: false,
        },
    }
}
