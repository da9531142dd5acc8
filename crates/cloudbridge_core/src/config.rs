//! Configuração unificada via TOML.
//!
//! Um único `config.toml` ao lado do executável; seções ausentes usam os
//! valores padrão do Raspberry Pi de produção.

use crate::aggregator::AggregatorPolicy;
use crate::error::BridgeError;
use crate::types::Qos;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Porta serial onde o coordenador XBee está ligado.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    /// Caminho do dispositivo (ex: "/dev/ttyUSB0")
    pub port: String,
    pub baud_rate: u32,
    /// Timeout de leitura; define a frequência de checagem do shutdown
    pub read_timeout_ms: u64,
    /// Modo API com escape (AP=2)
    pub escaped: bool,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: "/dev/ttyUSB0".into(),
            baud_rate: 9600,
            read_timeout_ms: 500,
            escaped: true,
        }
    }
}

/// Algoritmo de assinatura do JWT.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum JwtAlgorithm {
    #[default]
    RS256,
    ES256,
}

/// Registro do dispositivo no Cloud IoT e parâmetros do bridge MQTT.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CloudConfig {
    pub project_id: String,
    pub region: String,
    pub registry_id: String,
    pub device_id: String,
    pub mqtt_host: String,
    pub mqtt_port: u16,
    /// Chave privada PEM usada para assinar o JWT
    pub private_key_path: String,
    pub algorithm: JwtAlgorithm,
    /// Certificados raiz PEM do bridge
    pub root_cert_path: String,
    /// Validade do JWT em minutos
    pub token_ttl_minutes: u64,
    pub keep_alive_secs: u64,
    pub qos: Qos,
    /// Espera máxima pelo primeiro ConnAck
    pub connect_timeout_secs: u64,
}

impl Default for CloudConfig {
    fn default() -> Self {
        Self {
            project_id: "tranquil-garage-284216".into(),
            region: "europe-west1".into(),
            registry_id: "Raspberrypi".into(),
            device_id: "rpi".into(),
            mqtt_host: "mqtt.googleapis.com".into(),
            mqtt_port: 8883,
            private_key_path: "/home/pi/xbee-code/rsa_private.pem".into(),
            algorithm: JwtAlgorithm::RS256,
            root_cert_path: "/home/pi/xbee-code/roots.pem".into(),
            token_ttl_minutes: 60,
            keep_alive_secs: 60,
            qos: Qos::AtLeastOnce,
            connect_timeout_secs: 5,
        }
    }
}

impl CloudConfig {
    /// Client id exigido pelo bridge MQTT do Cloud IoT.
    pub fn client_id(&self) -> String {
        format!(
            "projects/{}/locations/{}/registries/{}/devices/{}",
            self.project_id, self.region, self.registry_id, self.device_id
        )
    }

    /// Tópico de eventos de telemetria.
    pub fn telemetry_topic(&self) -> String {
        format!("/devices/{}/events", self.device_id)
    }

    /// Tópico de configuração enviado pela nuvem.
    pub fn config_topic(&self) -> String {
        format!("/devices/{}/config", self.device_id)
    }
}

/// Checagem de conectividade antes de conectar ao broker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub probe_host: String,
    pub probe_port: u16,
    pub probe_timeout_secs: f64,
    pub retry_interval_secs: f64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            probe_host: "www.google.com".into(),
            probe_port: 80,
            probe_timeout_secs: 3.0,
            retry_interval_secs: 5.0,
        }
    }
}

/// Destinos de log.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Arquivo de log append-only (vazio = apenas stdout)
    pub file_path: String,
    /// Filtro padrão quando `RUST_LOG` não está definido
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            file_path: "handler_log.txt".into(),
            level: "info".into(),
        }
    }
}

/// Reinício supervisionado do link serial.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    pub restart_delay_secs: f64,
    /// 0 = reinicia indefinidamente
    pub max_restarts: u32,
    /// Capacidade do channel entre leitura e agregação
    pub channel_capacity: usize,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            restart_delay_secs: 5.0,
            max_restarts: 0,
            channel_capacity: 64,
        }
    }
}

/// Durações em segundos precisam ser finitas e maiores que zero.
fn is_positive_secs(secs: f64) -> bool {
    secs.is_finite() && secs > 0.0
}

/// Configuração raiz do gateway.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub serial: SerialConfig,
    pub cloud: CloudConfig,
    pub policy: AggregatorPolicy,
    pub network: NetworkConfig,
    pub logging: LoggingConfig,
    pub supervisor: SupervisorConfig,
}

impl AppConfig {
    /// Carrega configuração de um arquivo TOML.
    pub fn load(path: &Path) -> Self {
        if path.exists() {
            match std::fs::read_to_string(path) {
                Ok(content) => match toml::from_str::<AppConfig>(&content) {
                    Ok(config) => {
                        info!("Configuração carregada de {}", path.display());
                        return config;
                    }
                    Err(e) => {
                        warn!("Erro ao parsear {}: {}", path.display(), e);
                    }
                },
                Err(e) => {
                    warn!("Erro ao ler {}: {}", path.display(), e);
                }
            }
        }

        info!("Usando configuração padrão");
        AppConfig::default()
    }

    /// Salva configuração em arquivo TOML.
    pub fn save(&self, path: &Path) -> Result<(), BridgeError> {
        let content =
            toml::to_string_pretty(self).map_err(|e| BridgeError::Config(e.to_string()))?;
        std::fs::write(path, content).map_err(|e| BridgeError::Config(e.to_string()))?;
        info!("Configuração salva em {}", path.display());
        Ok(())
    }

    /// Retorna o caminho padrão do config.toml.
    pub fn default_path() -> PathBuf {
        let exe_dir = std::env::current_exe()
            .map(|p| p.parent().unwrap_or(Path::new(".")).to_path_buf())
            .unwrap_or_else(|_| PathBuf::from("."));
        exe_dir.join("config.toml")
    }

    /// Valida a configuração e retorna lista de erros.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.serial.port.is_empty() {
            errors.push("Porta serial não pode ser vazia".into());
        }
        if self.serial.baud_rate == 0 {
            errors.push("Baud rate não pode ser 0".into());
        }
        if self.serial.read_timeout_ms == 0 {
            errors.push("Timeout de leitura serial não pode ser 0".into());
        }
        if self.cloud.mqtt_port == 0 {
            errors.push("Porta MQTT não pode ser 0".into());
        }
        if self.cloud.device_id.is_empty() || self.cloud.project_id.is_empty() {
            errors.push("project_id e device_id são obrigatórios".into());
        }
        if self.cloud.token_ttl_minutes == 0 || self.cloud.token_ttl_minutes > 24 * 60 {
            errors.push(format!(
                "Validade do token inválida: {} min (1–1440)",
                self.cloud.token_ttl_minutes
            ));
        }
        if self.policy.debounce_frames == 0 {
            errors.push("debounce_frames deve ser ≥ 1".into());
        }
        if self.policy.humidity_label == self.policy.temperature_label {
            errors.push("Labels de umidade e temperatura devem ser diferentes".into());
        }
        let retry = self.network.retry_interval_secs;
        if !is_positive_secs(retry) || retry < 0.1 {
            errors.push(format!("Intervalo de retry inválido: {retry} (mínimo 0.1)"));
        }
        if !is_positive_secs(self.network.probe_timeout_secs) {
            errors.push(format!(
                "Timeout da sonda de rede inválido: {}",
                self.network.probe_timeout_secs
            ));
        }
        if !is_positive_secs(self.supervisor.restart_delay_secs) {
            errors.push(format!(
                "Atraso de reinício inválido: {}",
                self.supervisor.restart_delay_secs
            ));
        }
        if self.supervisor.channel_capacity == 0 {
            errors.push("Capacidade do channel não pode ser 0".into());
        }

        errors
    }
}
