//! Tipos trocados entre a fonte de frames, o núcleo e o transporte.

use serde::{Deserialize, Serialize};

// ──────────────────────────────────────────────
// Frame bruto
// ──────────────────────────────────────────────

/// Registro já desenquadrado vindo da malha de rádio.
///
/// Apenas `rf_data` é interpretado pelo núcleo; os endereços de origem
/// servem para diagnóstico nos logs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawFrame {
    /// Payload opaco do rádio
    pub rf_data: Vec<u8>,
    /// Endereço 64-bit do rádio remetente
    pub source_addr64: Option<u64>,
    /// Endereço de rede 16-bit do rádio remetente
    pub source_addr16: Option<u16>,
}

impl RawFrame {
    pub fn new(rf_data: impl Into<Vec<u8>>) -> Self {
        Self {
            rf_data: rf_data.into(),
            ..Default::default()
        }
    }
}

// ──────────────────────────────────────────────
// Unidade decodificada
// ──────────────────────────────────────────────

/// Resultado da heurística de decodificação: texto de classificação
/// ou valor numérico.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedUnit {
    /// Tag que classifica a próxima amostra (ex: `"Temperature:"`)
    Label { text: String },
    /// Float de 4 bytes arredondado para 2 casas
    Sample { value: f64 },
}

impl DecodedUnit {
    pub fn label(text: impl Into<String>) -> Self {
        DecodedUnit::Label { text: text.into() }
    }

    pub fn sample(value: f64) -> Self {
        DecodedUnit::Sample { value }
    }
}

// ──────────────────────────────────────────────
// Publicação
// ──────────────────────────────────────────────

/// Nível de garantia de entrega do transporte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Qos {
    AtMostOnce,
    #[default]
    AtLeastOnce,
    ExactlyOnce,
}

/// Snapshot pronto para ser entregue ao transporte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishEvent {
    pub topic: String,
    /// JSON `{ "temperature": t, "humidity": h }`
    pub payload: String,
}

/// Forma parseada de um payload publicado.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TelemetryReading {
    pub temperature: f64,
    pub humidity: f64,
}
