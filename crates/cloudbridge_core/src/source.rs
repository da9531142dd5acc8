//! Fonte de frames desenquadrados (rádio/serial).

use crate::error::BridgeError;
use crate::types::RawFrame;

/// Produz frames já desenquadrados, um por vez, em ordem de chegada.
///
/// - `Ok(Some(frame))` – frame recebido
/// - `Ok(None)` – o timeout de leitura expirou sem frame (espera bloqueante)
/// - `Err(BridgeError::FatalFault)` – link físico perdido
pub trait FrameSource {
    fn next_frame(&mut self) -> Result<Option<RawFrame>, BridgeError>;
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn next_frame(&mut self) -> Result<Option<RawFrame>, BridgeError> {
        (**self).next_frame()
    }
}
