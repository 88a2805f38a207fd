//! TOML-backed settings for planner tiers, conversation limits, and
//! telemetry. Every section falls back to sensible defaults, so a missing
//! file or a partial one is never an error; applications override only
//! what they care about.

use std::fs;
use std::path::Path;

use anyhow::Result;
use serde::{Deserialize, Serialize};

// ── Planner tiers ────────────────────────────────────────────────────────────

/// One chat-client tier: a model with a retry budget. Tiers are attempted in
/// declaration order until one produces an accepted plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TierSettings {
    pub model: String,
    pub max_attempts: u32,
    pub base_url: String,
    /// Environment variable holding the bearer token for this tier's
    /// endpoint. Empty means the endpoint is unauthenticated.
    pub api_key_env: String,
}

impl Default for TierSettings {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            max_attempts: 2,
            base_url: "https://api.openai.com/v1".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerSettings {
    /// First entry is the default tier; the rest are fallbacks, in order.
    pub tiers: Vec<TierSettings>,
    /// Retain the rendered prompt on every formulation result, not just on
    /// dry runs.
    pub capture_prompts: bool,
}

impl Default for PlannerSettings {
    fn default() -> Self {
        Self {
            tiers: vec![TierSettings::default()],
            capture_prompts: false,
        }
    }
}

// ── Conversation ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversationSettings {
    /// How many prior working contexts a conversation retains.
    pub max_history_size: usize,
    /// Fill the integrity-hash field when serializing state blobs.
    pub hash_blobs: bool,
}

impl Default for ConversationSettings {
    fn default() -> Self {
        Self {
            max_history_size: 10,
            hash_blobs: true,
        }
    }
}

// ── Telemetry ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetrySettings {
    pub log_level: String,
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

// ── Top level ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub planner: PlannerSettings,
    pub conversation: ConversationSettings,
    pub telemetry: TelemetrySettings,
}

impl Settings {
    /// Load settings from a TOML file, falling back to full defaults when
    /// the file does not exist.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        match fs::read_to_string(path) {
            Ok(raw) => Ok(toml::from_str(&raw)?),
            Err(_) => Ok(Self::default()),
        }
    }

    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }
        let rendered = toml::to_string_pretty(self)?;
        fs::write(path, rendered)?;
        Ok(())
    }

    /// The default tier's model id, for display.
    pub fn default_model(&self) -> Option<&str> {
        self.planner.tiers.first().map(|t| t.model.as_str())
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let settings = Settings::load_from("/definitely/not/here.toml").unwrap();
        assert_eq!(settings.planner.tiers.len(), 1);
        assert_eq!(settings.planner.tiers[0].max_attempts, 2);
        assert_eq!(settings.conversation.max_history_size, 10);
        assert_eq!(settings.telemetry.log_level, "info");
    }

    #[test]
    fn partial_file_keeps_defaults_for_missing_sections() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("planwright.toml");
        fs::write(
            &path,
            r#"
[conversation]
max_history_size = 3
"#,
        )
        .unwrap();
        let settings = Settings::load_from(&path).unwrap();
        assert_eq!(settings.conversation.max_history_size, 3);
        assert!(settings.conversation.hash_blobs);
        assert_eq!(settings.default_model(), Some("gpt-4o-mini"));
    }

    #[test]
    fn tiers_round_trip_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("planwright.toml");
        let mut settings = Settings::default();
        settings.planner.tiers = vec![
            TierSettings {
                model: "primary".to_string(),
                max_attempts: 2,
                ..TierSettings::default()
            },
            TierSettings {
                model: "fallback".to_string(),
                max_attempts: 1,
                ..TierSettings::default()
            },
        ];
        settings.save_to(&path).unwrap();

        let reloaded = Settings::load_from(&path).unwrap();
        let models: Vec<_> = reloaded.planner.tiers.iter().map(|t| t.model.as_str()).collect();
        assert_eq!(models, vec!["primary", "fallback"]);
        assert_eq!(reloaded.planner.tiers[1].max_attempts, 1);
    }

    #[test]
    fn save_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("planwright.toml");
        Settings::default().save_to(&path).unwrap();
        assert!(path.exists());
    }
}
