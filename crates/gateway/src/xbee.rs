//! Desenquadramento de frames API do XBee (ZigBee).
//!
//! ```text
//! ┌──────────┬────────────┬──────────────────────┬──────────┐
//! │ 0x7E (1) │ Len BE (2) │ Tipo(1) + Dados (N)  │ Cksum(1) │
//! └──────────┴────────────┴──────────────────────┴──────────┘
//! ```
//!
//! - Checksum: `0xFF - (soma dos bytes de tipo+dados & 0xFF)`
//! - Modo com escape (AP=2): `0x7D` indica que o próximo byte vem XOR `0x20`;
//!   um `0x7E` cru sempre inicia um novo frame
//! - Apenas pacotes recebidos (`0x90`, `0x91`) carregam `rf_data`

use cloudbridge_core::error::BridgeError;
use cloudbridge_core::source::FrameSource;
use cloudbridge_core::types::RawFrame;
use std::collections::VecDeque;
use std::io::{ErrorKind, Read};
use tracing::{debug, warn};

pub const START_DELIMITER: u8 = 0x7E;
const ESCAPE: u8 = 0x7D;
const ESCAPE_XOR: u8 = 0x20;

/// ZigBee Receive Packet.
pub const ZIGBEE_RX: u8 = 0x90;
/// ZigBee Explicit Rx Indicator.
pub const EXPLICIT_RX: u8 = 0x91;

/// Maior frame aceito; acima disso o length é tratado como lixo.
const MAX_FRAME_LEN: usize = 512;

/// Cabeçalho antes do `rf_data`: addr64(8) addr16(2) options(1).
const RX_HEADER: usize = 11;
/// addr64(8) addr16(2) src_ep(1) dst_ep(1) cluster(2) profile(2) options(1).
const EXPLICIT_RX_HEADER: usize = 17;

/// Erros de desenquadramento. Nenhum é fatal: o frame é descartado.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DeframeError {
    #[error("Checksum inválido: 0x{actual:02X} (esperado 0x{expected:02X})")]
    Checksum { expected: u8, actual: u8 },

    #[error("Length inválido: {0}")]
    InvalidLength(usize),

    #[error("Frame 0x{frame_type:02X} curto demais ({len} bytes)")]
    TooShort { frame_type: u8, len: usize },

    #[error("Frame truncado por novo delimitador")]
    Truncated,
}

/// Frame API já validado.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiFrame {
    pub frame_type: u8,
    /// Bytes após o tipo, sem checksum
    pub data: Vec<u8>,
}

/// Calcula o checksum de `tipo + dados`.
pub fn checksum(frame_data: &[u8]) -> u8 {
    0xFF - frame_data.iter().fold(0u8, |acc, b| acc.wrapping_add(*b))
}

#[derive(Debug)]
enum State {
    Idle,
    LengthHigh,
    LengthLow { high: u8 },
    Data { len: usize, buf: Vec<u8> },
    Checksum { buf: Vec<u8> },
}

/// Máquina de estados alimentada byte a byte; sobrevive a leituras
/// parciais entre timeouts da porta serial.
#[derive(Debug)]
pub struct Deframer {
    escaped: bool,
    escape_next: bool,
    state: State,
}

impl Deframer {
    pub fn new(escaped: bool) -> Self {
        Self {
            escaped,
            escape_next: false,
            state: State::Idle,
        }
    }

    /// Consome um byte cru. Retorna um resultado ao completar (ou abortar)
    /// um frame.
    pub fn push(&mut self, raw: u8) -> Option<Result<ApiFrame, DeframeError>> {
        if raw == START_DELIMITER && (self.escaped || matches!(self.state, State::Idle)) {
            let truncated = !matches!(self.state, State::Idle);
            self.state = State::LengthHigh;
            self.escape_next = false;
            return truncated.then_some(Err(DeframeError::Truncated));
        }

        let byte = if self.escaped {
            if raw == ESCAPE {
                self.escape_next = true;
                return None;
            }
            if std::mem::take(&mut self.escape_next) {
                raw ^ ESCAPE_XOR
            } else {
                raw
            }
        } else {
            raw
        };

        match std::mem::replace(&mut self.state, State::Idle) {
            State::Idle => None,
            State::LengthHigh => {
                self.state = State::LengthLow { high: byte };
                None
            }
            State::LengthLow { high } => {
                let len = usize::from(u16::from_be_bytes([high, byte]));
                if len == 0 || len > MAX_FRAME_LEN {
                    return Some(Err(DeframeError::InvalidLength(len)));
                }
                self.state = State::Data {
                    len,
                    buf: Vec::with_capacity(len),
                };
                None
            }
            State::Data { len, mut buf } => {
                buf.push(byte);
                self.state = if buf.len() == len {
                    State::Checksum { buf }
                } else {
                    State::Data { len, buf }
                };
                None
            }
            State::Checksum { mut buf } => {
                let expected = checksum(&buf);
                if byte != expected {
                    return Some(Err(DeframeError::Checksum {
                        expected,
                        actual: byte,
                    }));
                }
                let data = buf.split_off(1);
                Some(Ok(ApiFrame {
                    frame_type: buf[0],
                    data,
                }))
            }
        }
    }
}

/// Extrai o `rf_data` de um pacote recebido. Outros tipos retornam `None`.
pub fn parse_rx_packet(frame: &ApiFrame) -> Result<Option<RawFrame>, DeframeError> {
    let header = match frame.frame_type {
        ZIGBEE_RX => RX_HEADER,
        EXPLICIT_RX => EXPLICIT_RX_HEADER,
        _ => return Ok(None),
    };

    let data = &frame.data;
    if data.len() < header {
        return Err(DeframeError::TooShort {
            frame_type: frame.frame_type,
            len: data.len(),
        });
    }

    let mut addr64 = [0u8; 8];
    addr64.copy_from_slice(&data[..8]);

    Ok(Some(RawFrame {
        rf_data: data[header..].to_vec(),
        source_addr64: Some(u64::from_be_bytes(addr64)),
        source_addr16: Some(u16::from_be_bytes([data[8], data[9]])),
    }))
}

/// [`FrameSource`] sobre qualquer leitor de bytes (porta serial, arquivo…).
pub struct XBeeReader<R> {
    inner: R,
    deframer: Deframer,
    pending: VecDeque<u8>,
    buf: [u8; 256],
}

impl<R: Read> XBeeReader<R> {
    pub fn new(inner: R, escaped: bool) -> Self {
        Self {
            inner,
            deframer: Deframer::new(escaped),
            pending: VecDeque::new(),
            buf: [0u8; 256],
        }
    }

    fn drain_pending(&mut self) -> Option<RawFrame> {
        while let Some(byte) = self.pending.pop_front() {
            let Some(result) = self.deframer.push(byte) else {
                continue;
            };
            match result.and_then(|frame| {
                let frame_type = frame.frame_type;
                parse_rx_packet(&frame).map(|raw| (frame_type, raw))
            }) {
                Ok((_, Some(raw))) => return Some(raw),
                Ok((frame_type, None)) => {
                    debug!("Frame API 0x{frame_type:02X} ignorado");
                }
                Err(e) => warn!("Frame XBee descartado: {e}"),
            }
        }
        None
    }
}

impl<R: Read> FrameSource for XBeeReader<R> {
    fn next_frame(&mut self) -> Result<Option<RawFrame>, BridgeError> {
        loop {
            if let Some(raw) = self.drain_pending() {
                return Ok(Some(raw));
            }

            match self.inner.read(&mut self.buf) {
                Ok(0) => return Err(BridgeError::FatalFault("Link serial encerrado (EOF)".into())),
                Ok(n) => self.pending.extend(&self.buf[..n]),
                Err(e) if e.kind() == ErrorKind::TimedOut || e.kind() == ErrorKind::WouldBlock => {
                    return Ok(None);
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => return Err(BridgeError::FatalFault(format!("Erro de leitura serial: {e}"))),
            }
        }
    }
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────
