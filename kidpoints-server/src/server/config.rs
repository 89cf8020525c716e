use kidpoints_shared::auth::Role;
use serde::Deserialize;
use std::{env, fs, path::Path};

use crate::engine::InvitationPolicy;
use crate::engine::invitations::DEFAULT_TTL_HOURS;

pub const DEFAULT_LISTEN_PORT: u16 = 5252;
/// One year.
pub const MAX_INVITATION_TTL_HOURS: i64 = 24 * 365;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub jwt_secret: String,
    #[serde(default)]
    pub listen_port: Option<u16>,
    #[serde(default)]
    pub dev_cors_origin: Option<String>,
    #[serde(default = "default_invitation_ttl_hours")]
    pub invitation_ttl_hours: i64,
    #[serde(default)]
    pub users: Vec<UserConfig>,
    #[serde(default)]
    pub relationships: Vec<RelationshipConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserConfig {
    pub username: String,
    #[serde(default)]
    pub display_name: Option<String>,
    pub password_hash: String, // bcrypt hash
    pub role: Role,
}

/// Links a parent account to a child account, both by username.
#[derive(Debug, Clone, Deserialize)]
pub struct RelationshipConfig {
    pub parent: String,
    pub child: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

fn default_invitation_ttl_hours() -> i64 {
    DEFAULT_TTL_HOURS
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let path = env::var("CONFIG_PATH").unwrap_or_else(|_| "config.yaml".to_string());
        Self::load_from_path(path)
    }

    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(&path)?;
        Self::from_yaml(&text)
    }

    pub fn from_yaml(text: &str) -> Result<Self, ConfigError> {
        let cfg: AppConfig = serde_yaml::from_str(text)?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.jwt_secret.trim().is_empty() {
            return Err(ConfigError::Invalid("jwt_secret must not be empty".into()));
        }
        if !(0..=MAX_INVITATION_TTL_HOURS).contains(&self.invitation_ttl_hours) {
            return Err(ConfigError::Invalid(format!(
                "invitation_ttl_hours must be between 0 and {MAX_INVITATION_TTL_HOURS}"
            )));
        }
        for (i, u) in self.users.iter().enumerate() {
            if self.users[..i].iter().any(|o| o.username == u.username) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate username {}",
                    u.username
                )));
            }
        }
        Ok(())
    }

    pub fn invitation_policy(&self) -> InvitationPolicy {
        InvitationPolicy {
            ttl: chrono::Duration::hours(self.invitation_ttl_hours),
            ..InvitationPolicy::default()
        }
    }

    /// `PORT` env overrides `listen_port`.
    pub fn effective_port(&self) -> u16 {
        env::var("PORT")
            .ok()
            .and_then(|s| s.parse::<u16>().ok())
            .or(self.listen_port)
            .unwrap_or(DEFAULT_LISTEN_PORT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
jwt_secret: "s3cret"
listen_port: 6000
users:
  - username: mum
    display_name: Mum
    password_hash: "$2b$12$abc"
    role: parent
  - username: tim
    password_hash: "$2b$12$def"
    role: child
relationships:
  - parent: mum
    child: tim
"#;

    #[test]
    fn parses_users_and_relationships() {
        let cfg = AppConfig::from_yaml(SAMPLE).unwrap();
        assert_eq!(cfg.listen_port, Some(6000));
        assert_eq!(cfg.invitation_ttl_hours, 48);
        assert_eq!(cfg.users.len(), 2);
        assert_eq!(cfg.users[0].role, Role::Parent);
        assert_eq!(cfg.users[1].display_name, None);
        assert_eq!(cfg.relationships[0].parent, "mum");
        assert_eq!(cfg.invitation_policy().ttl, chrono::Duration::hours(48));
    }

    #[test]
    fn rejects_duplicate_usernames() {
        let text = r#"
jwt_secret: x
users:
  - { username: a, password_hash: h, role: parent }
  - { username: a, password_hash: h, role: child }
"#;
        assert!(matches!(
            AppConfig::from_yaml(text),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn invitation_ttl_is_bounded() {
        for hours in ["-1", "8761", "9223372036854775807"] {
            let text = format!("jwt_secret: x\ninvitation_ttl_hours: {hours}\n");
            assert!(
                matches!(AppConfig::from_yaml(&text), Err(ConfigError::Invalid(_))),
                "{hours}"
            );
        }
        let cfg = AppConfig::from_yaml("jwt_secret: x\ninvitation_ttl_hours: 8760\n").unwrap();
        assert_eq!(cfg.invitation_policy().ttl, chrono::Duration::days(365));
    }

    #[test]
    fn rejects_unknown_role() {
        let text = "jwt_secret: x\nusers:\n  - { username: a, password_hash: h, role: boss }\n";
        assert!(matches!(AppConfig::from_yaml(text), Err(ConfigError::Yaml(_))));
    }
}
