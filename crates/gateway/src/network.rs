//! Espera por conectividade antes de abrir a sessão MQTT.

use cloudbridge_core::config::NetworkConfig;
use cloudbridge_core::pipeline::ShutdownFlag;
use std::io;
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;
use tracing::{debug, info};

/// Tenta uma conexão TCP com `host:port` dentro do timeout.
pub fn probe(host: &str, port: u16, timeout: Duration) -> io::Result<()> {
    let mut last_err = io::Error::new(io::ErrorKind::NotFound, format!("{host} sem endereço"));
    for addr in (host, port).to_socket_addrs()? {
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(_) => return Ok(()),
            Err(e) => last_err = e,
        }
    }
    Err(last_err)
}

/// Bloqueia até a rede responder. Retorna `false` se o shutdown foi pedido.
pub fn wait_for_network(cfg: &NetworkConfig, shutdown: &ShutdownFlag) -> bool {
    let timeout = Duration::from_secs_f64(cfg.probe_timeout_secs);
    let retry = Duration::from_secs_f64(cfg.retry_interval_secs);

    loop {
        match probe(&cfg.probe_host, cfg.probe_port, timeout) {
            Ok(()) => {
                info!("Rede disponível ({}:{})", cfg.probe_host, cfg.probe_port);
                return true;
            }
            Err(e) => {
                debug!("Sonda de rede falhou: {e}");
                info!("Aguardando conexão de rede...");
            }
        }
        if shutdown.sleep(retry) {
            return false;
        }
    }
}
