//! Pipeline de ingestão: thread de leitura → channel → decodificação e
//! agregação → publicação.
//!
//! A leitura serial é bloqueante e roda na thread `frame-reader`; o consumo
//! acontece na thread chamadora, estritamente em ordem de chegada. O
//! [`ShutdownFlag`] é checado entre leituras e entre recebimentos.

use crate::aggregator::{Decision, TelemetryAggregator};
use crate::error::BridgeError;
use crate::protocol::decode_frame;
use crate::source::FrameSource;
use crate::transport::Publisher;
use crate::types::{PublishEvent, Qos, RawFrame};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Intervalo de checagem do shutdown enquanto o channel está vazio.
const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Sinal de cancelamento cooperativo compartilhado entre threads.
#[derive(Debug, Clone, Default)]
pub struct ShutdownFlag(Arc<AtomicBool>);

impl ShutdownFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Dorme em fatias curtas. Retorna `true` se o shutdown foi pedido.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        while !self.is_requested() {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            std::thread::sleep((deadline - now).min(POLL_INTERVAL));
        }
        true
    }
}

/// Mensagem da thread de leitura para o consumidor.
#[derive(Debug, Clone)]
pub enum ReaderEvent {
    Frame(RawFrame),
    /// A fonte reportou perda do link; a thread de leitura terminou
    Fault(String),
}

/// Inicia a thread de leitura. Retorna o receiver do channel.
pub fn spawn_frame_reader<S>(
    source: S,
    capacity: usize,
    shutdown: ShutdownFlag,
) -> Result<(Receiver<ReaderEvent>, JoinHandle<()>), BridgeError>
where
    S: FrameSource + Send + 'static,
{
    let (tx, rx) = bounded::<ReaderEvent>(capacity);

    let handle = std::thread::Builder::new()
        .name("frame-reader".into())
        .spawn(move || reader_loop(source, &tx, &shutdown))
        .map_err(|e| BridgeError::FatalFault(format!("Falha ao criar thread de leitura: {e}")))?;

    Ok((rx, handle))
}

fn reader_loop<S: FrameSource>(mut source: S, tx: &Sender<ReaderEvent>, shutdown: &ShutdownFlag) {
    while !shutdown.is_requested() {
        match source.next_frame() {
            Ok(Some(frame)) => {
                debug!("Frame recebido ({} bytes)", frame.rf_data.len());
                if tx.send(ReaderEvent::Frame(frame)).is_err() {
                    debug!("Consumidor encerrado, parando leitura");
                    return;
                }
            }
            Ok(None) => {
                // Timeout normal, continua
            }
            Err(e) => {
                error!("Erro na leitura de frames: {e}");
                let reason = match e {
                    BridgeError::FatalFault(reason) => reason,
                    other => other.to_string(),
                };
                let _ = tx.send(ReaderEvent::Fault(reason));
                return;
            }
        }
    }
    info!("Leitura de frames encerrada (shutdown)");
}

/// Contadores do pipeline para o resumo nos logs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub frames: u64,
    pub malformed: u64,
    pub published: u64,
    pub publish_failures: u64,
}

/// Consumidor: decodifica, agrega e publica.
pub struct Pipeline<'a, P: Publisher + ?Sized> {
    aggregator: &'a mut TelemetryAggregator,
    publisher: &'a P,
    qos: Qos,
    stats: PipelineStats,
}

impl<'a, P: Publisher + ?Sized> Pipeline<'a, P> {
    pub fn new(aggregator: &'a mut TelemetryAggregator, publisher: &'a P, qos: Qos) -> Self {
        Self {
            aggregator,
            publisher,
            qos,
            stats: PipelineStats::default(),
        }
    }

    pub fn stats(&self) -> PipelineStats {
        self.stats
    }

    /// Processa um frame. Anomalias de dados nunca interrompem o consumo.
    pub fn handle_frame(&mut self, frame: &RawFrame) -> Option<PublishEvent> {
        self.stats.frames += 1;

        let unit = match decode_frame(frame) {
            Ok(unit) => unit,
            Err(e) => {
                self.stats.malformed += 1;
                warn!("Frame ignorado: {e}");
                return None;
            }
        };

        match self.aggregator.step(&unit) {
            Decision::Publish(event) => {
                info!("{} → {}", event.payload, event.topic);
                match self.publisher.publish_event(&event, self.qos) {
                    Ok(()) => self.stats.published += 1,
                    Err(e) => {
                        self.stats.publish_failures += 1;
                        warn!("Publicação não entregue: {e}");
                    }
                }
                Some(event)
            }
            Decision::Unchanged { payload } => {
                debug!("Valores inalterados: {payload}");
                None
            }
            Decision::WaitingForData => {
                info!("Aguardando dados");
                None
            }
        }
    }

    /// Consome o channel até shutdown, fim da leitura ou falha fatal.
    pub fn consume(
        &mut self,
        rx: &Receiver<ReaderEvent>,
        shutdown: &ShutdownFlag,
    ) -> Result<(), BridgeError> {
        loop {
            if shutdown.is_requested() {
                return Ok(());
            }
            match rx.recv_timeout(POLL_INTERVAL) {
                Ok(ReaderEvent::Frame(frame)) => {
                    self.handle_frame(&frame);
                }
                Ok(ReaderEvent::Fault(reason)) => {
                    return Err(BridgeError::FatalFault(reason));
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => return Ok(()),
            }
        }
    }
}

/// Roda leitura e consumo até shutdown ou falha fatal da fonte.
pub fn run<S, P>(
    source: S,
    aggregator: &mut TelemetryAggregator,
    publisher: &P,
    qos: Qos,
    capacity: usize,
    shutdown: &ShutdownFlag,
) -> Result<PipelineStats, BridgeError>
where
    S: FrameSource + Send + 'static,
    P: Publisher + ?Sized,
{
    let (rx, handle) = spawn_frame_reader(source, capacity, shutdown.clone())?;

    let mut pipeline = Pipeline::new(aggregator, publisher, qos);
    let outcome = pipeline.consume(&rx, shutdown);
    let stats = pipeline.stats();

    // Libera uma thread de leitura eventualmente bloqueada em `send`
    drop(rx);
    if handle.join().is_err() {
        return Err(BridgeError::FatalFault("Thread de leitura abortou".into()));
    }

    info!(
        "Pipeline encerrado: {} frames, {} publicados, {} malformados, {} falhas de publicação",
        stats.frames, stats.published, stats.malformed, stats.publish_failures
    );
    outcome.map(|()| stats)
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::AggregatorPolicy;
    use crate::types::DecodedUnit;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    const TOPIC: &str = "/devices/rpi/events";

    struct ScriptedSource {
        script: VecDeque<Result<Option<RawFrame>, BridgeError>>,
    }

    impl ScriptedSource {
        fn new(script: Vec<Result<Option<RawFrame>, BridgeError>>) -> Self {
            Self {
                script: script.into(),
            }
        }
    }

    impl FrameSource for ScriptedSource {
        fn next_frame(&mut self) -> Result<Option<RawFrame>, BridgeError> {
            match self.script.pop_front() {
                Some(step) => step,
                None => {
                    std::thread::sleep(Duration::from_millis(5));
                    Ok(None)
                }
            }
        }
    }

    #[derive(Default)]
    struct RecordingPublisher {
        offline: bool,
        sent: Mutex<Vec<(String, String, Qos)>>,
    }

    impl Publisher for RecordingPublisher {
        fn publish(&self, topic: &str, payload: &str, qos: Qos) -> Result<(), BridgeError> {
            if self.offline {
                return Err(BridgeError::TransportUnavailable("offline".into()));
            }
            self.sent
                .lock()
                .unwrap()
                .push((topic.into(), payload.into(), qos));
            Ok(())
        }

        fn is_connected(&self) -> bool {
            !self.offline
        }
    }

    fn text(s: &str) -> Result<Option<RawFrame>, BridgeError> {
        Ok(Some(RawFrame::new(s.as_bytes())))
    }

    fn value(v: f32) -> Result<Option<RawFrame>, BridgeError> {
        Ok(Some(RawFrame::new(v.to_ne_bytes().to_vec())))
    }

    fn session() -> Vec<Result<Option<RawFrame>, BridgeError>> {
        vec![
            text("Temperature:"),
            value(22.1),
            Ok(None),
            text("Humidity:"),
            value(60.0),
        ]
    }

    #[test]
    fn fault_surfaces_as_fatal_after_frames() {
        let mut script = session();
        script.push(Err(BridgeError::FatalFault("USB desconectado".into())));

        let mut agg = TelemetryAggregator::new(TOPIC, AggregatorPolicy::debounced());
        let publisher = RecordingPublisher::default();
        let shutdown = ShutdownFlag::new();

        let result = run(
            ScriptedSource::new(script),
            &mut agg,
            &publisher,
            Qos::AtLeastOnce,
            8,
            &shutdown,
        );

        assert!(matches!(result, Err(BridgeError::FatalFault(ref r)) if r.contains("USB")));
        let sent = publisher.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, TOPIC);
        assert_eq!(sent[0].1, r#"{ "temperature": 22.1, "humidity": 60.0 }"#);
        assert_eq!(sent[0].2, Qos::AtLeastOnce);
    }

    #[test]
    fn shutdown_stops_both_threads() {
        let mut agg = TelemetryAggregator::new(TOPIC, AggregatorPolicy::debounced());
        let publisher = RecordingPublisher::default();
        let shutdown = ShutdownFlag::new();

        let trigger = shutdown.clone();
        let stopper = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(100));
            trigger.request();
        });

        let stats = run(
            ScriptedSource::new(session()),
            &mut agg,
            &publisher,
            Qos::AtLeastOnce,
            8,
            &shutdown,
        )
        .unwrap();
        stopper.join().unwrap();

        assert_eq!(stats.frames, 4);
        assert_eq!(stats.published, 1);
        // O estado sobrevive ao pipeline
        assert_eq!(agg.state().current_humidity, 60.0);
    }

    #[test]
    fn malformed_frames_are_skipped() {
        let mut agg = TelemetryAggregator::new(TOPIC, AggregatorPolicy::debounced());
        let publisher = RecordingPublisher::default();
        let mut pipeline = Pipeline::new(&mut agg, &publisher, Qos::AtLeastOnce);

        assert!(pipeline.handle_frame(&RawFrame::new(vec![0xC3, 0x28])).is_none());
        assert!(pipeline.handle_frame(&RawFrame::new(b"Humidity:".as_slice())).is_none());
        let stats = pipeline.stats();
        assert_eq!(stats.frames, 2);
        assert_eq!(stats.malformed, 1);
        // Frame malformado não conta na janela do agregador
        assert_eq!(agg.state().frames_since_last_emit, 1);
        assert_eq!(agg.state().current_label, "Humidity:");
    }

    #[test]
    fn publish_failure_does_not_stop_consumption() {
        let mut agg = TelemetryAggregator::new(TOPIC, AggregatorPolicy::debounced());
        let publisher = RecordingPublisher {
            offline: true,
            ..Default::default()
        };
        let mut pipeline = Pipeline::new(&mut agg, &publisher, Qos::AtLeastOnce);

        let frames = [
            RawFrame::new(b"Temperature:".as_slice()),
            RawFrame::new(22.1f32.to_ne_bytes().to_vec()),
            RawFrame::new(b"Humidity:".as_slice()),
            RawFrame::new(60.0f32.to_ne_bytes().to_vec()),
        ];
        let events: Vec<_> = frames.iter().filter_map(|f| pipeline.handle_frame(f)).collect();

        assert_eq!(events.len(), 1);
        let stats = pipeline.stats();
        assert_eq!(stats.publish_failures, 1);
        assert_eq!(stats.published, 0);
    }

    #[test]
    fn sleep_is_interrupted_by_shutdown() {
        let shutdown = ShutdownFlag::new();
        assert!(!shutdown.sleep(Duration::from_millis(10)));

        shutdown.request();
        let start = Instant::now();
        assert!(shutdown.sleep(Duration::from_secs(30)));
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn reader_forwards_in_order() {
        let shutdown = ShutdownFlag::new();
        let (rx, handle) = spawn_frame_reader(
            ScriptedSource::new(vec![
                text("Temperature:"),
                value(19.5),
                Err(BridgeError::FatalFault("EOF".into())),
            ]),
            4,
            shutdown,
        )
        .unwrap();

        let events: Vec<_> = rx.iter().collect();
        handle.join().unwrap();

        assert_eq!(events.len(), 3);
        assert!(matches!(&events[0], ReaderEvent::Frame(f) if f.rf_data == b"Temperature:"));
        match &events[1] {
            ReaderEvent::Frame(f) => assert_eq!(
                decode_frame(f).unwrap(),
                DecodedUnit::sample(19.5)
            ),
            other => panic!("esperado frame, recebido {other:?}"),
        }
        assert!(matches!(&events[2], ReaderEvent::Fault(r) if r.contains("EOF")));
    }
}
