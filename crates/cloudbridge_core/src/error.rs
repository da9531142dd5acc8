//! Taxonomia de erros da ponte.
//!
//! Anomalias de dados (`MalformedFrame`, `UnclassifiedSample`) são absorvidas
//! pelo núcleo. Apenas `FatalFault` deve encerrar ou reiniciar o processo.

/// Erros do núcleo e dos colaboradores.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// Frame não é float de 4 bytes nem texto UTF-8 válido.
    #[error("Frame malformado ({len} bytes): {reason}")]
    MalformedFrame { len: usize, reason: String },

    /// Amostra sem label reconhecido, fora do gate de plausibilidade
    /// ou repetida.
    #[error("Amostra não classificada ({value}): {reason}")]
    UnclassifiedSample { value: f64, reason: String },

    /// Publicação tentada sem conexão com o broker.
    #[error("Transporte indisponível: {0}")]
    TransportUnavailable(String),

    /// A fonte de frames perdeu o link físico.
    #[error("Falha fatal na fonte de frames: {0}")]
    FatalFault(String),

    /// Falha ao criar a credencial do transporte.
    #[error("Erro de autenticação: {0}")]
    Auth(String),

    #[error("Configuração inválida: {0}")]
    Config(String),
}

impl BridgeError {
    /// `true` apenas para erros que exigem reabrir a fonte ou encerrar.
    pub fn is_fatal(&self) -> bool {
        matches!(self, BridgeError::FatalFault(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_fatal_fault_is_fatal() {
        assert!(BridgeError::FatalFault("usb".into()).is_fatal());
        assert!(!BridgeError::TransportUnavailable("offline".into()).is_fatal());
        assert!(
            !BridgeError::MalformedFrame {
                len: 2,
                reason: "utf-8".into()
            }
            .is_fatal()
        );
    }

    #[test]
    fn messages_carry_context() {
        let err = BridgeError::UnclassifiedSample {
            value: 35.0,
            reason: "gate".into(),
        };
        assert!(err.to_string().contains("35"));
    }
}
