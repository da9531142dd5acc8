//! # Cloudbridge Gateway
//!
//! Lê frames dos sensores XBee pela serial e publica a telemetria de
//! temperatura/umidade no Cloud IoT via MQTT (TLS + JWT).
//!
//! ## Uso
//! ```bash
//! cloudbridge_gateway                          # config.toml ao lado do executável
//! cloudbridge_gateway --config /etc/bridge.toml
//! ```

mod auth;
mod logging;
mod mqtt;
mod network;
mod serial;
mod supervisor;
mod xbee;

use anyhow::{Context, bail};
use auth::JwtAuth;
use cloudbridge_core::aggregator::TelemetryAggregator;
use cloudbridge_core::config::AppConfig;
use cloudbridge_core::pipeline::ShutdownFlag;
use mqtt::MqttPublisher;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use supervisor::RestartPolicy;
use tracing::{error, info, warn};

fn config_path_from_args() -> PathBuf {
    let args: Vec<String> = std::env::args().collect();
    args.iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(PathBuf::from)
        .unwrap_or_else(AppConfig::default_path)
}

fn main() -> anyhow::Result<()> {
    // ── Carregar config ──
    let config_path = config_path_from_args();
    let config = AppConfig::load(&config_path);

    // ── Logging ──
    logging::init(&config.logging);

    // Salva config padrão se não existir
    if !config_path.exists() {
        if let Err(e) = config.save(&config_path) {
            warn!("Não foi possível salvar config padrão: {e}");
        }
    }

    let errors = config.validate();
    if !errors.is_empty() {
        for e in &errors {
            error!("Config: {e}");
        }
        bail!("Configuração inválida em {}", config_path.display());
    }

    let cloud = &config.cloud;
    let topic = cloud.telemetry_topic();
    let shutdown = ShutdownFlag::new();

    // ── Banner ──
    println!();
    println!("══════════════════════════════════════════════");
    println!("   📡 CLOUDBRIDGE GATEWAY – ATIVO");
    println!("══════════════════════════════════════════════");
    println!("  Serial:    {} @ {}", config.serial.port, config.serial.baud_rate);
    println!("  Broker:    {}:{}", cloud.mqtt_host, cloud.mqtt_port);
    println!("  Tópico:    {topic}");
    println!("  Política:  {:?}", config.policy.mode);
    println!("══════════════════════════════════════════════");
    println!();

    // ── Rede ──
    if !network::wait_for_network(&config.network, &shutdown) {
        return Ok(());
    }

    // ── MQTT ──
    let auth = Arc::new(JwtAuth::from_config(cloud).context("Falha ao criar JWT")?);
    let publisher = MqttPublisher::connect(cloud, auth, shutdown.clone())
        .context("Falha ao iniciar cliente MQTT")?;

    if !publisher.wait_for_connection(Duration::from_secs(cloud.connect_timeout_secs)) {
        warn!(
            "Sem ConnAck em {}s; seguindo com reconexão em segundo plano",
            cloud.connect_timeout_secs
        );
    }

    // ── Loop principal ──
    let mut aggregator = TelemetryAggregator::new(topic, config.policy.clone());
    let policy = RestartPolicy::from(&config.supervisor);

    let outcome = supervisor::supervise(
        || serial::open_serial(&config.serial),
        &mut aggregator,
        &publisher,
        cloud.qos,
        &policy,
        &shutdown,
    );

    shutdown.request();
    publisher.disconnect();

    match outcome {
        Ok(()) => {
            info!("Gateway encerrado");
            Ok(())
        }
        Err(e) => {
            error!("Gateway abortado: {e}");
            Err(e).context("Link serial perdido")
        }
    }
}
