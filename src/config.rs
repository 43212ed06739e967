//! Configuração do pacekeeper carregada a partir de `pacekeeper.toml`.
//!
//! A struct [`Settings`] contém todos os parâmetros configuráveis.
//! Valores não presentes no arquivo usam defaults sensíveis.
//! A variável de ambiente `PACEKEEPER_SAFETY_LEVEL` tem precedência sobre o arquivo.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{PacerError, Result};
use crate::limiter::{ActionType, RateLimitConfig, SafetyLevel, SafetyProfile};
use crate::orchestrator::{RunOptions, UncleanPolicy};
use crate::schedule::ScheduleConfig;
use crate::workflow::RetryConfig;

/// Nome do arquivo procurado no diretório atual.
pub const DEFAULT_CONFIG_FILE: &str = "pacekeeper.toml";

/// Variável de ambiente que sobrescreve `safety_level`.
pub const SAFETY_LEVEL_ENV: &str = "PACEKEEPER_SAFETY_LEVEL";

/// Configuração de nível superior carregada de `pacekeeper.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Preset de limites e sessão.
    #[serde(default)]
    pub safety_level: SafetyLevel,

    /// Diretório com `limiter_state.json` e `workflows.db`.
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,

    /// Espera máxima (minutos) antes de abandonar o ciclo atual.
    #[serde(default = "default_max_wait_minutes")]
    pub max_wait_minutes: u64,

    /// Respeita a janela diária de trabalho e o almoço.
    #[serde(default = "default_respect_schedule")]
    pub respect_schedule: bool,

    /// O que fazer com um workflow encontrado em andamento na inicialização.
    #[serde(default)]
    pub unclean_policy: UncleanPolicy,

    /// Itens com falha seguidos antes de marcar o workflow como falho.
    #[serde(default = "default_max_consecutive_failures")]
    pub max_consecutive_failures: u32,

    /// Backoff exponencial para falhas de sistema.
    #[serde(default)]
    pub retry: RetryConfig,

    /// Janela de trabalho, almoço e rajadas.
    #[serde(default)]
    pub schedule: ScheduleConfig,

    /// Substituições completas por tipo de ação.
    #[serde(default)]
    pub limits: LimitOverrides,
}

/// Tabela `[limits.<ação>]`. Cada entrada substitui o preset inteiro daquela ação.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LimitOverrides {
    pub connect: Option<RateLimitConfig>,
    pub message: Option<RateLimitConfig>,
    pub search: Option<RateLimitConfig>,
}

impl LimitOverrides {
    fn get(&self, action: ActionType) -> Option<&RateLimitConfig> {
        match action {
            ActionType::Connect => self.connect.as_ref(),
            ActionType::Message => self.message.as_ref(),
            ActionType::Search => self.search.as_ref(),
        }
    }
}

// Diretório de estado padrão: ".pacekeeper".
fn default_state_dir() -> PathBuf {
    PathBuf::from(".pacekeeper")
}

// Teto de espera padrão: 30 minutos.
fn default_max_wait_minutes() -> u64 {
    30
}

fn default_respect_schedule() -> bool {
    true
}

fn default_max_consecutive_failures() -> u32 {
    3
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            safety_level: SafetyLevel::default(),
            state_dir: default_state_dir(),
            max_wait_minutes: default_max_wait_minutes(),
            respect_schedule: default_respect_schedule(),
            unclean_policy: UncleanPolicy::default(),
            max_consecutive_failures: default_max_consecutive_failures(),
            retry: RetryConfig::default(),
            schedule: ScheduleConfig::default(),
            limits: LimitOverrides::default(),
        }
    }
}

impl Settings {
    /// Carrega a configuração de `pacekeeper.toml` no diretório atual.
    /// Usa valores padrão se o arquivo não existir.
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new(DEFAULT_CONFIG_FILE))?.with_env_override(std::env::var(SAFETY_LEVEL_ENV).ok())
    }

    /// Como [`load`](Self::load), mas lendo de um caminho explícito.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)?;
        Ok(toml::from_str::<Settings>(&contents)?)
    }

    /// Aplica o valor de `PACEKEEPER_SAFETY_LEVEL`, se houver.
    pub fn with_env_override(mut self, safety_level: Option<String>) -> Result<Self> {
        // Variável de ambiente tem precedência sobre o arquivo de configuração.
        if let Some(level) = safety_level
            && !level.trim().is_empty()
        {
            self.safety_level = level.parse()?;
        }
        Ok(self)
    }

    /// Resolve o preset do nível de segurança, aplica `[limits.*]` e valida tudo.
    pub fn profile(&self) -> Result<SafetyProfile> {
        let mut profile = SafetyProfile::for_level(self.safety_level);
        for action in ActionType::ALL {
            if let Some(config) = self.limits.get(action) {
                profile.limits.set(action, config.clone());
            }
        }
        profile.limits.validate()?;
        self.schedule.validate()?;
        if self.max_consecutive_failures < 1 {
            return Err(PacerError::Config("max_consecutive_failures must be at least 1".into()));
        }
        Ok(profile)
    }

    /// Opções do orquestrador para uma sessão com a política dada.
    pub fn run_options(&self, profile: &SafetyProfile) -> RunOptions {
        RunOptions {
            respect_schedule: self.respect_schedule,
            unclean_policy: self.unclean_policy,
            max_consecutive_failures: self.max_consecutive_failures,
            retry: self.retry.clone(),
            session: profile.session.clone(),
        }
    }

    pub fn max_wait(&self) -> Duration {
        Duration::from_secs(self.max_wait_minutes.saturating_mul(60))
    }

    pub fn limiter_state_path(&self) -> PathBuf {
        self.state_dir.join("limiter_state.json")
    }

    pub fn workflows_db_path(&self) -> PathBuf {
        self.state_dir.join("workflows.db")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn default_config_values() {
        let settings = Settings::default();
        assert_eq!(settings.safety_level, SafetyLevel::Conservative);
        assert_eq!(settings.state_dir, PathBuf::from(".pacekeeper"));
        assert_eq!(settings.max_wait(), Duration::from_secs(30 * 60));
        assert!(settings.respect_schedule);
        assert_eq!(settings.unclean_policy, UncleanPolicy::Resume);
        assert_eq!(settings.retry.max_retries, 3);
        assert_eq!(settings.workflows_db_path(), PathBuf::from(".pacekeeper/workflows.db"));
    }

    #[test]
    fn deserialize_partial_toml() {
        let toml_str = r#"
            safety_level = "moderate"
            unclean_policy = "fail"

            [schedule]
            start_hour = 8
            work_days = ["Mon", "Wed"]

            [retry]
            base_delay_ms = 500
        "#;
        let settings: Settings = toml::from_str(toml_str).unwrap();
        assert_eq!(settings.safety_level, SafetyLevel::Moderate);
        assert_eq!(settings.unclean_policy, UncleanPolicy::Fail);
        assert_eq!(settings.schedule.start_hour, 8);
        assert_eq!(settings.schedule.end_hour, 17);
        assert_eq!(settings.schedule.work_days.len(), 2);
        assert_eq!(settings.retry.base_delay_ms, 500);
        assert_eq!(settings.retry.max_retries, 3);
        assert_eq!(settings.max_consecutive_failures, 3);
    }

    #[test]
    fn limit_override_replaces_one_action() {
        let toml_str = r#"
            [limits.connect]
            daily_limit = 7
            hourly_limit = 2
            min_interval_seconds = 40
            max_interval_seconds = 80
            burst_limit = 4
            burst_cooldown_seconds = 300
            cooldown_threshold = 7
            cooldown_minutes = 5
        "#;
        let settings: Settings = toml::from_str(toml_str).unwrap();
        let profile = settings.profile().unwrap();
        assert_eq!(profile.limits.connect.daily_limit, 7);
        let preset = SafetyProfile::for_level(SafetyLevel::Conservative);
        assert_eq!(profile.limits.message, preset.limits.message);
    }

    #[test]
    fn invalid_override_is_a_config_error() {
        let toml_str = r#"
            [limits.search]
            daily_limit = 10
            hourly_limit = 2
            min_interval_seconds = 90
            max_interval_seconds = 30
            burst_limit = 3
            burst_cooldown_seconds = 60
            cooldown_threshold = 10
            cooldown_minutes = 1
        "#;
        let settings: Settings = toml::from_str(toml_str).unwrap();
        assert!(matches!(settings.profile(), Err(PacerError::Config(_))));
    }

    #[test]
    fn env_override_wins_over_file() {
        let settings = Settings::default()
            .with_env_override(Some("aggressive".into()))
            .unwrap();
        assert_eq!(settings.safety_level, SafetyLevel::Aggressive);

        let unchanged = Settings::default().with_env_override(Some("  ".into())).unwrap();
        assert_eq!(unchanged.safety_level, SafetyLevel::Conservative);

        assert!(Settings::default().with_env_override(Some("reckless".into())).is_err());
    }

    #[test]
    fn load_falls_back_to_defaults() {
        let dir = TempDir::new().unwrap();
        let settings = Settings::load_from(&dir.path().join("pacekeeper.toml")).unwrap();
        assert_eq!(settings.max_wait_minutes, 30);
    }

    #[test]
    fn load_reads_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("pacekeeper.toml");
        std::fs::write(&path, "max_wait_minutes = 5\nrespect_schedule = false\n").unwrap();
        let settings = Settings::load_from(&path).unwrap();
        assert_eq!(settings.max_wait(), Duration::from_secs(300));
        assert!(!settings.respect_schedule);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("pacekeeper.toml");
        std::fs::write(&path, "max_wait_minutes = \"soon\"").unwrap();
        assert!(matches!(Settings::load_from(&path), Err(PacerError::Toml(_))));
    }
}
