//! Reinício supervisionado da fonte de frames.
//!
//! Quando o link serial cai (`FatalFault`), a porta é reaberta após um
//! atraso. O estado do agregador é preservado entre reinícios. O limite de
//! reinícios vale para falhas consecutivas: uma sessão que entregou frames
//! zera a contagem.

use cloudbridge_core::aggregator::TelemetryAggregator;
use cloudbridge_core::config::SupervisorConfig;
use cloudbridge_core::error::BridgeError;
use cloudbridge_core::pipeline::{self, ShutdownFlag};
use cloudbridge_core::source::FrameSource;
use cloudbridge_core::transport::Publisher;
use cloudbridge_core::types::{Qos, RawFrame};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{error, info, warn};

/// Política de reinício.
#[derive(Debug, Clone)]
pub struct RestartPolicy {
    pub delay: Duration,
    /// Falhas consecutivas toleradas; 0 = sem limite
    pub max_restarts: u32,
    pub channel_capacity: usize,
}

impl From<&SupervisorConfig> for RestartPolicy {
    fn from(cfg: &SupervisorConfig) -> Self {
        Self {
            delay: Duration::from_secs_f64(cfg.restart_delay_secs),
            max_restarts: cfg.max_restarts,
            channel_capacity: cfg.channel_capacity,
        }
    }
}

/// Marca se a sessão atual chegou a entregar algum frame.
struct SessionSource<S> {
    inner: S,
    delivered: Arc<AtomicBool>,
}

impl<S: FrameSource> FrameSource for SessionSource<S> {
    fn next_frame(&mut self) -> Result<Option<RawFrame>, BridgeError> {
        let frame = self.inner.next_frame()?;
        if frame.is_some() {
            self.delivered.store(true, Ordering::Relaxed);
        }
        Ok(frame)
    }
}

/// Abre a fonte e roda o pipeline até shutdown; reabre após falhas fatais.
pub fn supervise<S, F, P>(
    mut open_source: F,
    aggregator: &mut TelemetryAggregator,
    publisher: &P,
    qos: Qos,
    policy: &RestartPolicy,
    shutdown: &ShutdownFlag,
) -> Result<(), BridgeError>
where
    F: FnMut() -> Result<S, BridgeError>,
    S: FrameSource + Send + 'static,
    P: Publisher + ?Sized,
{
    let mut restarts = 0u32;

    while !shutdown.is_requested() {
        let delivered = Arc::new(AtomicBool::new(false));
        let outcome = match open_source() {
            Ok(inner) => pipeline::run(
                SessionSource {
                    inner,
                    delivered: delivered.clone(),
                },
                aggregator,
                publisher,
                qos,
                policy.channel_capacity,
                shutdown,
            ),
            Err(e) => Err(e),
        };

        match outcome {
            Ok(_) => break,
            Err(e) if e.is_fatal() => {
                if delivered.load(Ordering::Relaxed) {
                    restarts = 0;
                }
                restarts += 1;
                if policy.max_restarts > 0 && restarts > policy.max_restarts {
                    error!("Limite de {} reinícios atingido: {e}", policy.max_restarts);
                    return Err(e);
                }
                warn!(
                    "{e}. Tentando reconectar em {:.1}s (reinício #{restarts})",
                    policy.delay.as_secs_f64()
                );
                if shutdown.sleep(policy.delay) {
                    break;
                }
            }
            Err(e) => return Err(e),
        }
    }

    info!("Supervisor encerrado");
    Ok(())
}
