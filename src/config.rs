use std::env;
use std::net::SocketAddr;

const DEFAULT_DB_PATH: &str = "database/tracker.db";
const DEFAULT_BIND: &str = "127.0.0.1:3000";
const DEFAULT_SMTP_HOST: &str = "smtp.gmail.com";
const DEFAULT_SMTP_PORT: u16 = 465;
const DEFAULT_ADMIN_PASSWORD: &str = "admin123";

/// Runtime settings, read from `TRACKER_*` environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub db_path: String,
    pub bind: SocketAddr,
    pub smtp_host: String,
    pub smtp_port: u16,
    /// Account notifications are sent from; mail is disabled when unset
    pub sender_mail: Option<String>,
    pub sender_password: Option<String>,
    /// Recipient of registration and deletion-request notices
    pub admin_mail: Option<String>,
    /// Password given to the seeded administrator on first start
    pub admin_password: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            db_path: DEFAULT_DB_PATH.to_string(),
            bind: SocketAddr::from(([127, 0, 0, 1], 3000)),
            smtp_host: DEFAULT_SMTP_HOST.to_string(),
            smtp_port: DEFAULT_SMTP_PORT,
            sender_mail: None,
            sender_password: None,
            admin_mail: None,
            admin_password: DEFAULT_ADMIN_PASSWORD.to_string(),
        }
    }
}

impl Config {
    /// Build the configuration from the process environment
    ///
    /// # Errors
    /// * Returns an error if `TRACKER_BIND` or `TRACKER_SMTP_PORT` cannot be parsed
    pub fn from_env() -> Result<Self, String> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let defaults = Config::default();

        let bind = get("TRACKER_BIND")
            .unwrap_or_else(|| DEFAULT_BIND.to_string())
            .parse::<SocketAddr>()
            .map_err(|e| format!("Invalid TRACKER_BIND: {}", e))?;

        let smtp_port = match get("TRACKER_SMTP_PORT") {
            Some(port) => port
                .parse::<u16>()
                .map_err(|e| format!("Invalid TRACKER_SMTP_PORT: {}", e))?,
            None => defaults.smtp_port,
        };

        Ok(Config {
            db_path: get("TRACKER_DB_PATH").unwrap_or(defaults.db_path),
            bind,
            smtp_host: get("TRACKER_SMTP_HOST").unwrap_or(defaults.smtp_host),
            smtp_port,
            sender_mail: get("TRACKER_SENDER_MAIL"),
            // App passwords are often pasted in space-separated groups
            sender_password: get("TRACKER_SENDER_PASSWORD").map(|p| p.replace(' ', "")),
            admin_mail: get("TRACKER_ADMIN_MAIL"),
            admin_password: get("TRACKER_ADMIN_PASSWORD").unwrap_or(defaults.admin_password),
        })
    }

    pub fn mail_enabled(&self) -> bool {
        self.sender_mail.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<Config, String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_nothing_is_set() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.db_path, "database/tracker.db");
        assert_eq!(config.bind.port(), 3000);
        assert_eq!(config.smtp_host, "smtp.gmail.com");
        assert_eq!(config.smtp_port, 465);
        assert!(!config.mail_enabled());
        assert_eq!(config.admin_password, "admin123");
    }

    #[test]
    fn sender_password_spaces_are_stripped() {
        let config = config_from(&[
            ("TRACKER_SENDER_MAIL", "tracker@example.com"),
            ("TRACKER_SENDER_PASSWORD", "abcd efgh ijkl"),
        ])
        .unwrap();
        assert!(config.mail_enabled());
        assert_eq!(config.sender_password.as_deref(), Some("abcdefghijkl"));
    }

    #[test]
    fn bad_port_is_reported() {
        let err = config_from(&[("TRACKER_SMTP_PORT", "smtp")]).unwrap_err();
        assert!(err.contains("TRACKER_SMTP_PORT"));
    }
}
