//! Abertura da porta serial do coordenador XBee.

use crate::xbee::XBeeReader;
use cloudbridge_core::config::SerialConfig;
use cloudbridge_core::error::BridgeError;
use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};
use std::time::Duration;
use tracing::info;

/// Fonte de frames sobre a porta serial.
pub type SerialFrameSource = XBeeReader<Box<dyn SerialPort>>;

/// Abre a porta 8N1 com timeout de leitura. Falha aqui é `FatalFault`:
/// o supervisor tenta novamente após o atraso configurado.
pub fn open_serial(cfg: &SerialConfig) -> Result<SerialFrameSource, BridgeError> {
    let port = serialport::new(&cfg.port, cfg.baud_rate)
        .data_bits(DataBits::Eight)
        .parity(Parity::None)
        .stop_bits(StopBits::One)
        .flow_control(FlowControl::None)
        .timeout(Duration::from_millis(cfg.read_timeout_ms))
        .open()
        .map_err(|e| BridgeError::FatalFault(format!("Erro USB em {}: {e}", cfg.port)))?;

    info!(
        "Porta serial {} aberta ({} baud, API {})",
        cfg.port,
        cfg.baud_rate,
        if cfg.escaped { "com escape" } else { "sem escape" }
    );
    Ok(XBeeReader::new(port, cfg.escaped))
}
