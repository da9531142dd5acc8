//! Inicialização do tracing: stdout e arquivo de log append-only.

use cloudbridge_core::config::LoggingConfig;
use std::fs::{File, OpenOptions};
use std::io;
use std::sync::Mutex;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;

fn open_log_file(path: &str) -> io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

/// Instala o subscriber global. `RUST_LOG` tem precedência sobre o nível
/// configurado; falha ao abrir o arquivo apenas desativa esse destino.
pub fn init(cfg: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cfg.level.as_str()));

    let (file, file_error) = if cfg.file_path.is_empty() {
        (None, None)
    } else {
        match open_log_file(&cfg.file_path) {
            Ok(file) => (Some(file), None),
            Err(e) => (None, Some(e)),
        }
    };

    let file_layer = file.map(|file| {
        fmt::layer()
            .with_ansi(false)
            .with_target(false)
            .with_writer(Mutex::new(file))
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(file_layer)
        .init();

    if let Some(e) = file_error {
        warn!("Não foi possível abrir {}: {e}", cfg.file_path);
    } else if !cfg.file_path.is_empty() {
        info!("Log iniciado em {}", cfg.file_path);
    }
}
