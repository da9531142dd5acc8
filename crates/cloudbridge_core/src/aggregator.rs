//! Agregador de telemetria – decide quando um snapshot é novo o bastante
//! para ser publicado.
//!
//! Duas políticas coexistem em campo:
//!
//! - **Debounced**: gates de plausibilidade por magnitude e janela mínima de
//!   frames entre publicações.
//! - **Immediate**: sem gates, publica sempre que o payload muda.
//!
//! Os gates só funcionam porque temperatura e umidade ocupam faixas
//! numéricas disjuntas no ambiente instalado. Com os valores padrão,
//! qualquer temperatura ≥ 40 ou umidade ≤ 40 é descartada em silêncio.

use crate::error::BridgeError;
use crate::protocol::encode_payload;
use crate::types::{DecodedUnit, PublishEvent};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Política de publicação.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyMode {
    #[default]
    Debounced,
    Immediate,
}

/// Parâmetros da máquina de estados do agregador.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregatorPolicy {
    pub mode: PolicyMode,
    /// Label que precede amostras de umidade
    pub humidity_label: String,
    /// Label que precede amostras de temperatura
    pub temperature_label: String,
    /// Liga os gates de plausibilidade por magnitude
    pub plausibility_gates: bool,
    /// Umidade só é aceita se for estritamente maior que este valor
    pub humidity_min: f64,
    /// Temperatura só é aceita se for estritamente menor que este valor
    pub temperature_max: f64,
    /// Frames mínimos entre duas publicações (e tamanho da janela do contador)
    pub debounce_frames: u32,
}

impl Default for AggregatorPolicy {
    fn default() -> Self {
        Self::debounced()
    }
}

impl AggregatorPolicy {
    /// Política com gates `>40` / `<40` e janela de 4 frames.
    pub fn debounced() -> Self {
        Self {
            mode: PolicyMode::Debounced,
            humidity_label: "Humidity:".into(),
            temperature_label: "Temperature:".into(),
            plausibility_gates: true,
            humidity_min: 40.0,
            temperature_max: 40.0,
            debounce_frames: 4,
        }
    }

    /// Política sem gates que publica a cada mudança de payload.
    pub fn immediate() -> Self {
        Self {
            mode: PolicyMode::Immediate,
            plausibility_gates: false,
            ..Self::debounced()
        }
    }

    fn humidity_passes(&self, value: f64) -> bool {
        !self.plausibility_gates || value > self.humidity_min
    }

    fn temperature_passes(&self, value: f64) -> bool {
        !self.plausibility_gates || value < self.temperature_max
    }
}

/// Estado corrente dos sensores. Criado zerado, vive o processo inteiro.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SensorState {
    /// Último label visto; vazio = ainda sem classificação
    pub current_label: String,
    pub current_temperature: f64,
    pub previous_temperature: f64,
    pub current_humidity: f64,
    pub previous_humidity: f64,
    pub frames_since_last_emit: u32,
    /// Último payload publicado
    pub last_payload: Option<String>,
}

/// Resultado da decisão de publicação de um frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Publish(PublishEvent),
    /// Há label, mas o snapshot não se qualifica
    Unchanged { payload: String },
    /// Nenhum label recebido ainda
    WaitingForData,
}

impl Decision {
    pub fn into_event(self) -> Option<PublishEvent> {
        match self {
            Decision::Publish(event) => Some(event),
            _ => None,
        }
    }
}

/// Máquina de estados que consome [`DecodedUnit`]s em ordem de chegada.
#[derive(Debug, Clone)]
pub struct TelemetryAggregator {
    topic: String,
    policy: AggregatorPolicy,
    state: SensorState,
}

impl TelemetryAggregator {
    pub fn new(topic: impl Into<String>, policy: AggregatorPolicy) -> Self {
        Self {
            topic: topic.into(),
            policy,
            state: SensorState::default(),
        }
    }

    pub fn state(&self) -> &SensorState {
        &self.state
    }

    pub fn policy(&self) -> &AggregatorPolicy {
        &self.policy
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Processa uma unidade e retorna o evento, se houver publicação.
    pub fn process(&mut self, unit: &DecodedUnit) -> Option<PublishEvent> {
        self.step(unit).into_event()
    }

    /// Processa uma unidade e retorna a decisão completa.
    pub fn step(&mut self, unit: &DecodedUnit) -> Decision {
        match unit {
            DecodedUnit::Label { text } => {
                self.state.current_label.clone_from(text);
            }
            DecodedUnit::Sample { value } => {
                if let Err(e) = self.assign(*value) {
                    debug!("{e}");
                }
            }
        }

        self.state.frames_since_last_emit += 1;
        self.decide()
    }

    fn assign(&mut self, value: f64) -> Result<(), BridgeError> {
        let state = &mut self.state;
        let policy = &self.policy;
        let reject = |reason: String| BridgeError::UnclassifiedSample { value, reason };

        if state.current_label.is_empty() {
            return Err(reject("nenhum label recebido".into()));
        }

        if state.current_label == policy.humidity_label {
            if !policy.humidity_passes(value) {
                return Err(reject(format!("umidade ≤ {}", policy.humidity_min)));
            }
            if state.current_humidity == value {
                return Err(reject("umidade repetida".into()));
            }
            state.current_humidity = value;
            Ok(())
        } else if state.current_label == policy.temperature_label {
            if !policy.temperature_passes(value) {
                return Err(reject(format!("temperatura ≥ {}", policy.temperature_max)));
            }
            if state.current_temperature == value {
                return Err(reject("temperatura repetida".into()));
            }
            state.current_temperature = value;
            Ok(())
        } else {
            Err(reject(format!("label desconhecido {:?}", state.current_label)))
        }
    }

    fn decide(&mut self) -> Decision {
        let window_full = self.state.frames_since_last_emit >= self.policy.debounce_frames;

        if self.state.current_label.is_empty() {
            if window_full {
                self.state.frames_since_last_emit = 0;
            }
            return Decision::WaitingForData;
        }

        let state = &self.state;
        let payload = encode_payload(state.current_temperature, state.current_humidity);
        let both_positive = state.current_temperature > 0.0 && state.current_humidity > 0.0;

        let emit = match self.policy.mode {
            PolicyMode::Debounced => {
                let changed = state.current_temperature != state.previous_temperature
                    || state.current_humidity != state.previous_humidity;
                changed && both_positive && window_full
            }
            PolicyMode::Immediate => {
                both_positive && state.last_payload.as_deref() != Some(payload.as_str())
            }
        };

        if emit {
            let state = &mut self.state;
            state.frames_since_last_emit = 0;
            state.previous_temperature = state.current_temperature;
            state.previous_humidity = state.current_humidity;
            state.last_payload = Some(payload.clone());
            return Decision::Publish(PublishEvent {
                topic: self.topic.clone(),
                payload,
            });
        }

        if window_full {
            self.state.frames_since_last_emit = 0;
        }
        Decision::Unchanged { payload }
    }
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::decode_payload;

    const TOPIC: &str = "/devices/rpi/events";

    fn label(text: &str) -> DecodedUnit {
        DecodedUnit::label(text)
    }

    fn sample(value: f64) -> DecodedUnit {
        DecodedUnit::sample(value)
    }

    fn feed(agg: &mut TelemetryAggregator, units: &[DecodedUnit]) -> Vec<PublishEvent> {
        units.iter().filter_map(|u| agg.process(u)).collect()
    }

    #[test]
    fn starts_zeroed_and_waiting() {
        let mut agg = TelemetryAggregator::new(TOPIC, AggregatorPolicy::default());
        assert_eq!(agg.state(), &SensorState::default());
        assert_eq!(agg.step(&sample(21.0)), Decision::WaitingForData);
        assert_eq!(agg.state().current_temperature, 0.0);
    }

    #[test]
    fn publishes_on_fourth_frame() {
        let mut agg = TelemetryAggregator::new(TOPIC, AggregatorPolicy::debounced());
        let events = feed(
            &mut agg,
            &[
                label("Temperature:"),
                sample(22.1),
                label("Humidity:"),
                sample(60.0),
            ],
        );
        assert_eq!(
            events,
            vec![PublishEvent {
                topic: TOPIC.into(),
                payload: r#"{ "temperature": 22.1, "humidity": 60.0 }"#.into(),
            }]
        );
        assert_eq!(agg.state().frames_since_last_emit, 0);
        assert_eq!(agg.state().previous_temperature, 22.1);
        assert_eq!(agg.state().previous_humidity, 60.0);
    }

    #[test]
    fn repeated_temperature_does_not_republish() {
        let mut agg = TelemetryAggregator::new(TOPIC, AggregatorPolicy::debounced());
        let events = feed(
            &mut agg,
            &[
                label("Temperature:"),
                sample(21.5),
                label("Humidity:"),
                sample(55.0),
                label("Temperature:"),
                sample(21.5),
            ],
        );
        // Única publicação no frame 4; a repetição de 21.5 não gera outra
        assert_eq!(events.len(), 1);
        assert_eq!(agg.state().current_temperature, 21.5);
        assert_eq!(agg.state().frames_since_last_emit, 2);
    }

    #[test]
    fn equal_sample_leaves_state_unchanged() {
        let mut agg = TelemetryAggregator::new(TOPIC, AggregatorPolicy::debounced());
        agg.process(&label("Temperature:"));
        agg.process(&sample(23.4));
        let before = agg.state().current_temperature;
        agg.process(&sample(23.4));
        assert_eq!(agg.state().current_temperature, before);
        assert_eq!(agg.state().current_humidity, 0.0);
    }

    #[test]
    fn debounce_holds_until_window_is_full() {
        let mut agg = TelemetryAggregator::new(TOPIC, AggregatorPolicy::debounced());
        // Primeira publicação
        let first = feed(
            &mut agg,
            &[
                label("Humidity:"),
                sample(50.0),
                label("Temperature:"),
                sample(20.0),
            ],
        );
        assert_eq!(first.len(), 1);

        // Três amostras qualificadas mudando de valor: ainda dentro da janela
        assert!(agg.process(&sample(20.5)).is_none());
        assert!(agg.process(&sample(21.0)).is_none());
        agg.process(&label("Humidity:"));
        assert_eq!(agg.state().current_humidity, 50.0);
        // Quarto frame após a última publicação
        let event = agg.process(&sample(52.0)).expect("deveria publicar");
        let reading = decode_payload(&event.payload).unwrap();
        assert_eq!(reading.temperature, 21.0);
        assert_eq!(reading.humidity, 52.0);
    }

    #[test]
    fn window_resets_without_emit() {
        let mut agg = TelemetryAggregator::new(TOPIC, AggregatorPolicy::debounced());
        // Umidade ainda zero: nada a publicar, contador volta a zero no 4º frame
        feed(
            &mut agg,
            &[label("Temperature:"), sample(20.0), sample(20.1), sample(20.2)],
        );
        assert_eq!(agg.state().frames_since_last_emit, 0);
        agg.process(&sample(20.3));
        assert_eq!(agg.state().frames_since_last_emit, 1);
    }

    #[test]
    fn waiting_for_data_also_resets_window() {
        let mut agg = TelemetryAggregator::new(TOPIC, AggregatorPolicy::debounced());
        for _ in 0..4 {
            assert_eq!(agg.step(&sample(10.0)), Decision::WaitingForData);
        }
        assert_eq!(agg.state().frames_since_last_emit, 0);
    }

    #[test]
    fn humidity_gate_drops_low_value() {
        let mut agg = TelemetryAggregator::new(TOPIC, AggregatorPolicy::debounced());
        agg.process(&label("Humidity:"));
        agg.process(&sample(35.0));
        assert_eq!(agg.state().current_humidity, 0.0);
        agg.process(&sample(40.0));
        assert_eq!(agg.state().current_humidity, 0.0);
        agg.process(&sample(40.01));
        assert_eq!(agg.state().current_humidity, 40.01);
    }

    #[test]
    fn temperature_gate_drops_high_value() {
        let mut agg = TelemetryAggregator::new(TOPIC, AggregatorPolicy::debounced());
        agg.process(&label("Temperature:"));
        agg.process(&sample(45.0));
        assert_eq!(agg.state().current_temperature, 0.0);
    }

    #[test]
    fn unknown_label_drops_sample() {
        let mut agg = TelemetryAggregator::new(TOPIC, AggregatorPolicy::debounced());
        agg.process(&label("Pressure:"));
        let decision = agg.step(&sample(21.0));
        assert_eq!(
            decision,
            Decision::Unchanged {
                payload: r#"{ "temperature": 0.0, "humidity": 0.0 }"#.into()
            }
        );
        assert_eq!(agg.state().current_temperature, 0.0);
        assert_eq!(agg.state().current_humidity, 0.0);
    }

    #[test]
    fn rejected_samples_are_unclassified() {
        let mut agg = TelemetryAggregator::new(TOPIC, AggregatorPolicy::debounced());
        assert!(matches!(
            agg.assign(21.0),
            Err(BridgeError::UnclassifiedSample { value, .. }) if value == 21.0
        ));

        agg.process(&label("Temperature:"));
        assert!(matches!(
            agg.assign(45.0),
            Err(BridgeError::UnclassifiedSample { ref reason, .. }) if reason.contains("40")
        ));
        assert!(agg.assign(22.1).is_ok());
        assert!(matches!(
            agg.assign(22.1),
            Err(BridgeError::UnclassifiedSample { ref reason, .. }) if reason.contains("repetida")
        ));

        agg.process(&label("Pressure:"));
        let err = agg.assign(1013.0).unwrap_err();
        assert!(!err.is_fatal());
        assert!(err.to_string().contains("Pressure:"));
    }

    #[test]
    fn immediate_publishes_every_change() {
        let mut agg = TelemetryAggregator::new(TOPIC, AggregatorPolicy::immediate());
        let events = feed(
            &mut agg,
            &[
                label("Temperature:"),
                sample(45.0),
                label("Humidity:"),
                sample(30.0),
                label("Temperature:"),
                sample(45.0),
                sample(46.0),
            ],
        );
        // Sem gates: 45/30 publica no frame 4, 46/30 no frame 7
        let payloads: Vec<_> = events.iter().map(|e| e.payload.as_str()).collect();
        assert_eq!(
            payloads,
            vec![
                r#"{ "temperature": 45.0, "humidity": 30.0 }"#,
                r#"{ "temperature": 46.0, "humidity": 30.0 }"#,
            ]
        );
    }

    #[test]
    fn immediate_requires_both_positive() {
        let mut agg = TelemetryAggregator::new(TOPIC, AggregatorPolicy::immediate());
        let events = feed(&mut agg, &[label("Temperature:"), sample(-5.0)]);
        assert!(events.is_empty());
        assert_eq!(agg.state().current_temperature, -5.0);
    }

    #[test]
    fn custom_labels_are_honoured() {
        let policy = AggregatorPolicy {
            humidity_label: "H".into(),
            temperature_label: "T".into(),
            debounce_frames: 1,
            ..AggregatorPolicy::debounced()
        };
        let mut agg = TelemetryAggregator::new(TOPIC, policy);
        let events = feed(&mut agg, &[label("T"), sample(18.0), label("H"), sample(70.0)]);
        assert_eq!(events.len(), 1);
        assert_eq!(
            events[0].payload,
            r#"{ "temperature": 18.0, "humidity": 70.0 }"#
        );
    }
}
