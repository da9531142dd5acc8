//! Protocolo dos sensores e formato do payload publicado.
//!
//! O firmware dos sensores intercala, no mesmo canal e sem byte de tipo,
//! tags de texto e floats crus:
//!
//! ```text
//! "Temperature:"  →  [f32 ne 4 bytes]  →  "Humidity:"  →  [f32 ne 4 bytes] …
//! ```
//!
//! O discriminador é o próprio conteúdo: exatamente 4 bytes que formam um
//! float finito viram [`DecodedUnit::Sample`]; o resto é texto UTF-8 e vira
//! [`DecodedUnit::Label`]. Uma tag de 4 bytes seria lida como número.

use crate::error::BridgeError;
use crate::types::{DecodedUnit, RawFrame, TelemetryReading};

/// Tamanho de uma amostra numérica (f32).
pub const SAMPLE_SIZE: usize = 4;

/// Classifica um frame bruto em amostra ou label.
pub fn decode_frame(raw: &RawFrame) -> Result<DecodedUnit, BridgeError> {
    if let Some(value) = parse_sample(&raw.rf_data) {
        return Ok(DecodedUnit::Sample {
            value: round2(value),
        });
    }

    match std::str::from_utf8(&raw.rf_data) {
        Ok(text) => Ok(DecodedUnit::Label { text: text.into() }),
        Err(e) => Err(BridgeError::MalformedFrame {
            len: raw.rf_data.len(),
            reason: e.to_string(),
        }),
    }
}

fn parse_sample(data: &[u8]) -> Option<f32> {
    let bytes: [u8; SAMPLE_SIZE] = data.try_into().ok()?;
    let value = f32::from_ne_bytes(bytes);
    value.is_finite().then_some(value)
}

/// Arredonda para 2 casas pela representação decimal, como o firmware exibe.
pub fn round2(value: f32) -> f64 {
    let widened = f64::from(value);
    format!("{widened:.2}").parse().unwrap_or(widened)
}

/// Monta o payload JSON publicado na nuvem.
///
/// Os números sempre mantêm parte fracionária (`60.0`, nunca `60`).
pub fn encode_payload(temperature: f64, humidity: f64) -> String {
    format!("{{ \"temperature\": {temperature:?}, \"humidity\": {humidity:?} }}")
}

/// Lê de volta um payload produzido por [`encode_payload`].
pub fn decode_payload(payload: &str) -> Result<TelemetryReading, serde_json::Error> {
    serde_json::from_str(payload)
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────
