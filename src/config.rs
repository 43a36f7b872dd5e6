//! Configuração do codemorph carregada a partir de `codemorph.toml`.
//!
//! A struct [`CodemorphConfig`] contém todos os parâmetros configuráveis.
//! Valores não presentes no arquivo usam defaults sensíveis.
//! As variáveis de ambiente `CODEMORPH_ENDPOINT` e `CODEMORPH_API_TOKEN` têm
//! precedência sobre o arquivo.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::orchestrator::OrchestratorSettings;

const CONFIG_FILE: &str = "codemorph.toml";

/// Configuração de nível superior carregada de `codemorph.toml`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CodemorphConfig {
    /// URL base do serviço de transformação.
    pub endpoint: String,

    /// Token de acesso enviado como `Bearer`.
    pub api_token: String,

    /// Intervalo entre consultas de status, em milissegundos.
    pub poll_interval_ms: u64,

    /// Tempo máximo de espera pelo plano, em segundos.
    pub plan_timeout_secs: u64,

    /// Tempo máximo de espera pela conclusão do job, em segundos.
    pub job_timeout_secs: u64,

    /// Pausa entre o início do job e a primeira consulta.
    pub start_delay_ms: u64,

    /// Intervalo do indicador de progresso.
    pub progress_interval_ms: u64,

    /// Intervenções permitidas por job.
    pub max_hil_cycles: u32,

    /// Executável do Maven usado durante as intervenções.
    pub maven_command: String,

    /// Diretório onde resumos de plano e logs de build são gravados.
    pub output_dir: PathBuf,
}

impl Default for CodemorphConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:8420".to_string(),
            api_token: String::new(),
            poll_interval_ms: 5_000,
            plan_timeout_secs: 60 * 60,
            job_timeout_secs: 8 * 60 * 60,
            start_delay_ms: 2_000,
            progress_interval_ms: 1_000,
            max_hil_cycles: 3,
            maven_command: "mvn".to_string(),
            output_dir: PathBuf::from(".codemorph"),
        }
    }
}

impl CodemorphConfig {
    /// Carrega a configuração de `path`, ou de `codemorph.toml` no diretório
    /// atual. Um arquivo explícito precisa existir; o padrão é opcional.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None if Path::new(CONFIG_FILE).exists() => Self::from_file(Path::new(CONFIG_FILE))?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        toml::from_str(&contents).with_context(|| format!("invalid config in {}", path.display()))
    }

    // Variáveis de ambiente não vazias substituem os valores do arquivo.
    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(endpoint) = var("CODEMORPH_ENDPOINT")
            && !endpoint.is_empty()
        {
            self.endpoint = endpoint;
        }
        if let Some(token) = var("CODEMORPH_API_TOKEN")
            && !token.is_empty()
        {
            self.api_token = token;
        }
    }

    /// Converte para os parâmetros de tempo do orquestrador.
    pub fn orchestrator_settings(&self) -> OrchestratorSettings {
        OrchestratorSettings {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            plan_timeout: Duration::from_secs(self.plan_timeout_secs),
            job_timeout: Duration::from_secs(self.job_timeout_secs),
            start_delay: Duration::from_millis(self.start_delay_ms),
            progress_interval: Duration::from_millis(self.progress_interval_ms),
            max_hil_cycles: self.max_hil_cycles,
            output_dir: self.output_dir.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_values() {
        let config = CodemorphConfig::default();
        assert_eq!(config.endpoint, "http://127.0.0.1:8420");
        assert_eq!(config.poll_interval_ms, 5_000);
        assert_eq!(config.max_hil_cycles, 3);
        assert_eq!(config.maven_command, "mvn");
        assert!(config.api_token.is_empty());
    }

    #[test]
    fn deserialize_partial_toml() {
        let toml_str = r#"
            api_token = "tok-123"
            max_hil_cycles = 5
        "#;
        let config: CodemorphConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.api_token, "tok-123");
        assert_eq!(config.max_hil_cycles, 5);
        assert_eq!(config.job_timeout_secs, 8 * 60 * 60);
        assert_eq!(config.output_dir, PathBuf::from(".codemorph"));
    }

    #[test]
    fn env_overrides_file_values() {
        let mut config = CodemorphConfig::default();
        config.apply_env(|key| match key {
            "CODEMORPH_ENDPOINT" => Some("https://svc.example".into()),
            "CODEMORPH_API_TOKEN" => Some(String::new()),
            _ => None,
        });
        assert_eq!(config.endpoint, "https://svc.example");
        assert!(config.api_token.is_empty());
    }

    #[test]
    fn load_reads_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        std::fs::write(&path, "poll_interval_ms = 250\n").unwrap();
        let config = CodemorphConfig::load(Some(&path)).unwrap();
        assert_eq!(config.poll_interval_ms, 250);
    }

    #[test]
    fn load_fails_for_missing_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(CodemorphConfig::load(Some(&dir.path().join("absent.toml"))).is_err());
    }

    #[test]
    fn settings_use_configured_durations() {
        let config = CodemorphConfig {
            poll_interval_ms: 10,
            plan_timeout_secs: 2,
            ..CodemorphConfig::default()
        };
        let settings = config.orchestrator_settings();
        assert_eq!(settings.poll_interval, Duration::from_millis(10));
        assert_eq!(settings.plan_timeout, Duration::from_secs(2));
        assert_eq!(settings.max_hil_cycles, 3);
    }
}
