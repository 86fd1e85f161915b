use serde::Deserialize;
use std::path::{Path, PathBuf};
use taskmesh_llm::ModelConfig;
use taskmesh_orchestrator::{CompletionPolicy, OrchestratorSettings};

/// Environment variable that fills an empty `model.api_key`.
pub const API_KEY_ENV: &str = "TASKMESH_API_KEY";

#[derive(Debug, Clone, Deserialize)]
pub struct TaskmeshConfig {
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default)]
    pub orchestration: OrchestrationConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for TaskmeshConfig {
    fn default() -> Self {
        Self {
            model: ModelConfig::default(),
            data_dir: default_data_dir(),
            orchestration: OrchestrationConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct OrchestrationConfig {
    #[serde(default)]
    pub completion_policy: CompletionPolicy,
    #[serde(default = "default_true")]
    pub write_iteration_artifacts: bool,
}

impl Default for OrchestrationConfig {
    fn default() -> Self {
        Self {
            completion_policy: CompletionPolicy::default(),
            write_iteration_artifacts: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub format: LogFormat,
    /// Filter directive used when `RUST_LOG` is unset.
    pub level: Option<String>,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn default_true() -> bool {
    true
}

impl TaskmeshConfig {
    /// Reads the TOML file at `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let config = match std::fs::read_to_string(path) {
            Ok(text) => Self::from_toml(&text).map_err(|e| {
                anyhow::anyhow!("Invalid config file '{}': {e}", path.display())
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Self::default()
            }
            Err(e) => {
                return Err(anyhow::anyhow!(
                    "Failed to read config file '{}': {e}",
                    path.display()
                ))
            }
        };
        Ok(config.with_api_key_fallback(std::env::var(API_KEY_ENV).ok()))
    }

    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Uses `key` only when the file left `model.api_key` empty.
    pub fn with_api_key_fallback(mut self, key: Option<String>) -> Self {
        if self.model.api_key.is_empty() {
            if let Some(key) = key.filter(|k| !k.is_empty()) {
                self.model.api_key = key;
            }
        }
        self
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("taskmesh.db")
    }

    pub fn output_dir(&self) -> PathBuf {
        self.data_dir.join("output")
    }

    pub fn settings(&self) -> OrchestratorSettings {
        OrchestratorSettings {
            completion_policy: self.orchestration.completion_policy,
            write_iteration_artifacts: self.orchestration.write_iteration_artifacts,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use taskmesh_llm::LlmProvider;

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = TaskmeshConfig::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.data_dir, PathBuf::from("./data"));
        assert_eq!(config.model.provider, LlmProvider::Ollama);
        assert_eq!(config.logging.format, LogFormat::Pretty);
        assert!(config.orchestration.write_iteration_artifacts);
        assert_eq!(
            config.orchestration.completion_policy,
            CompletionPolicy::AllSubtasks
        );
    }

    #[test]
    fn test_full_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("taskmesh.toml");
        std::fs::write(
            &path,
            r#"
data_dir = "/var/lib/taskmesh"

[model]
provider = "groq"
model_id = "llama-3.3-70b-versatile"
api_key = "gsk-file"
timeout_secs = 30

[orchestration]
completion_policy = "first_signal"
write_iteration_artifacts = false

[logging]
format = "json"
level = "debug"
"#,
        )
        .unwrap();

        let config = TaskmeshConfig::load(&path).unwrap();
        assert_eq!(config.model.provider, LlmProvider::Groq);
        assert_eq!(config.model.api_key, "gsk-file");
        assert_eq!(config.model.timeout_secs, 30);
        assert_eq!(
            config.database_path(),
            PathBuf::from("/var/lib/taskmesh/taskmesh.db")
        );
        assert_eq!(config.output_dir(), PathBuf::from("/var/lib/taskmesh/output"));
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.logging.level.as_deref(), Some("debug"));

        let settings = config.settings();
        assert_eq!(settings.completion_policy, CompletionPolicy::FirstSignal);
        assert!(!settings.write_iteration_artifacts);
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[model]\nprovider = \"carrier-pigeon\"\n").unwrap();
        let err = TaskmeshConfig::load(&path).unwrap_err();
        assert!(err.to_string().contains("Invalid config file"));
    }

    #[test]
    fn test_api_key_fallback() {
        let config = TaskmeshConfig::from_toml("").unwrap();
        let config = config.with_api_key_fallback(Some("env-key".into()));
        assert_eq!(config.model.api_key, "env-key");

        let config = TaskmeshConfig::from_toml("[model]\napi_key = \"file-key\"\n").unwrap();
        let config = config.with_api_key_fallback(Some("env-key".into()));
        assert_eq!(config.model.api_key, "file-key");

        let config = TaskmeshConfig::from_toml("").unwrap();
        assert!(config.with_api_key_fallback(Some(String::new())).model.api_key.is_empty());
    }
}
