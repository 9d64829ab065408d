//! Server configuration from the environment.

/// Runtime configuration for the server binary.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// TCP port to listen on.
    pub port: u16,
    /// Path of the SQLite database file.
    pub db_path: String,
    /// Operator username to seed at startup, if set.
    pub admin_user: Option<String>,
    /// Operator password to seed at startup, if set.
    pub admin_password: Option<String>,
}

impl ServerConfig {
    /// Reads configuration from `PORT`, `DB_PATH`, `ADMIN_USER` and
    /// `ADMIN_PASSWORD`, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            port: std::env::var("PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.port),
            db_path: std::env::var("DB_PATH").unwrap_or(defaults.db_path),
            admin_user: std::env::var("ADMIN_USER").ok(),
            admin_password: std::env::var("ADMIN_PASSWORD").ok(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            db_path: "nestlog.db".into(),
            admin_user: None,
            admin_password: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 8080);
        assert_eq!(config.db_path, "nestlog.db");
        assert!(config.admin_user.is_none());
    }
}
