//! Colaboradores de transporte: publicação e credenciais.

use crate::error::BridgeError;
use crate::types::{PublishEvent, Qos};

/// Entrega payloads ao broker. Fire-and-forget: o ack não é aguardado.
pub trait Publisher {
    /// Enfileira a publicação. Sem conexão retorna
    /// [`BridgeError::TransportUnavailable`].
    fn publish(&self, topic: &str, payload: &str, qos: Qos) -> Result<(), BridgeError>;

    fn is_connected(&self) -> bool;

    fn publish_event(&self, event: &PublishEvent, qos: Qos) -> Result<(), BridgeError> {
        self.publish(&event.topic, &event.payload, qos)
    }
}

/// Fornece a credencial (token assinado com validade) usada como senha
/// do transporte. O núcleo nunca a consulta diretamente.
pub trait AuthSupplier {
    fn current_token(&self) -> Result<String, BridgeError>;
}
