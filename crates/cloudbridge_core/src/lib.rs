//! # Cloudbridge Core
//!
//! Núcleo da ponte XBee → Cloud IoT: decodificação dos frames dos sensores,
//! de-duplicação da telemetria e configuração TOML.
//!
//! ## Módulos
//! - [`types`] – Frame bruto, unidade decodificada, evento de publicação
//! - [`protocol`] – Heurística label/amostra e formato do payload JSON
//! - [`aggregator`] – Máquina de estados que decide quando publicar
//! - [`pipeline`] – Thread de leitura, channel e consumo sequencial
//! - [`source`] / [`transport`] – Interfaces dos colaboradores externos
//! - [`config`] – Configuração unificada via TOML
//! - [`error`] – Taxonomia de erros

pub mod aggregator;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod protocol;
pub mod source;
pub mod transport;
pub mod types;

// Re-exports convenientes
pub use aggregator::{AggregatorPolicy, Decision, PolicyMode, SensorState, TelemetryAggregator};
pub use config::AppConfig;
pub use error::BridgeError;
pub use pipeline::{PipelineStats, ShutdownFlag};
pub use protocol::{decode_frame, decode_payload, encode_payload};
pub use source::FrameSource;
pub use transport::{AuthSupplier, Publisher};
pub use types::{DecodedUnit, PublishEvent, Qos, RawFrame, TelemetryReading};
