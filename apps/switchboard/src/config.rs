use std::env;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    /// Root for received binary payloads (screenshots, audio, photos, files).
    pub data_dir: PathBuf,
    pub operator_email: String,
    pub operator_password: String,
    pub operator_name: String,
    /// When true (the historical behavior) a new controller registration
    /// silently supersedes the current one; when false the incumbent is kept
    /// and the newcomer is rejected.
    pub controller_takeover: bool,
    /// Write received binary payloads under `data_dir`.
    pub archive: bool,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            port: env::var("SWITCHBOARD_PORT")
                .or_else(|_| env::var("PORT"))
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(3001),
            data_dir: env::var("SWITCHBOARD_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("received_data")),
            operator_email: env::var("SWITCHBOARD_OPERATOR_EMAIL")
                .unwrap_or_else(|_| "admin@switchboard.local".to_string()),
            operator_password: env::var("SWITCHBOARD_OPERATOR_PASSWORD")
                .unwrap_or_else(|_| "switchboard-dev-password".to_string()),
            operator_name: env::var("SWITCHBOARD_OPERATOR_NAME")
                .unwrap_or_else(|_| "Operator".to_string()),
            controller_takeover: env::var("SWITCHBOARD_CONTROLLER_TAKEOVER")
                .map(|value| truthy(&value))
                .unwrap_or(true),
            archive: env::var("SWITCHBOARD_ARCHIVE")
                .map(|value| truthy(&value))
                .unwrap_or(true),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 3001,
            data_dir: PathBuf::from("received_data"),
            operator_email: "admin@switchboard.local".to_string(),
            operator_password: "switchboard-dev-password".to_string(),
            operator_name: "Operator".to_string(),
            controller_takeover: true,
            archive: true,
        }
    }
}

fn truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
