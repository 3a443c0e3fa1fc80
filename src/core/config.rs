//! Environment-driven application configuration.

use std::env;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
}

#[derive(Clone, Debug)]
pub struct AuthConfig {
    pub jwt_secret: String,
    /// Token lifetime in seconds.
    pub token_ttl: i64,
    /// Credentials for the admin account seeded on an empty directory.
    pub bootstrap_admin_email: String,
    pub bootstrap_admin_password: String,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let host = env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = env::var("SERVER_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(8080);
        let url = env::var("DATABASE_URL")
            .unwrap_or_else(|_| "postgres://erpuser:@localhost:5432/erpserver".to_string());
        let jwt_secret =
            env::var("JWT_SECRET").unwrap_or_else(|_| "insecure-dev-secret".to_string());
        let token_ttl = env::var("TOKEN_TTL_SECONDS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(86_400);
        let bootstrap_admin_email =
            env::var("ADMIN_EMAIL").unwrap_or_else(|_| "admin@localhost".to_string());
        let bootstrap_admin_password =
            env::var("ADMIN_PASSWORD").unwrap_or_else(|_| "admin".to_string());

        Self {
            server: ServerConfig { host, port },
            database: DatabaseConfig { url },
            auth: AuthConfig {
                jwt_secret,
                token_ttl,
                bootstrap_admin_email,
                bootstrap_admin_password,
            },
        }
    }
}
