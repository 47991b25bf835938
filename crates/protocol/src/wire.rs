//! Wire-Format fuer byte-orientierte Signaling-Kanaele
//!
//! Browser sprechen Text-Nachrichten ueber einen nachrichtenorientierten
//! Kanal. Fuer Tests und fuer Transporte ohne eigene Nachrichtengrenzen wird
//! jede Text-Nachricht als Frame uebertragen:
//!
//! ```text
//! +--------+--------+--------+--------+----...----+
//! | Laenge (u32 BE)                   | UTF-8 Text |
//! +--------+--------+--------+--------+----...----+
//! ```
//!
//! Der Decoder liefert den Rohtext und nicht die geparste Nachricht, damit
//! der Orchestrator auch auf ungueltiges JSON mit einer Fehlernachricht
//! antworten kann.

use bytes::{Buf, BufMut, BytesMut};
use std::io;
use tokio_util::codec::{Decoder, Encoder};

use crate::signaling::ServerMessage;

/// Standard-maximale Frame-Groesse (1 MB)
pub const DEFAULT_MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Groesse des Laengen-Felds in Bytes
pub const LENGTH_FIELD_SIZE: usize = 4;

/// tokio-util Codec fuer Signaling-Text-Frames
///
/// Dekodiert zu `String`, kodiert `ServerMessage` als JSON.
#[derive(Debug, Clone)]
pub struct SignalingCodec {
    max_frame_size: usize,
}

impl SignalingCodec {
    pub fn new() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }

    pub fn with_max_size(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }

    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    fn frame_schreiben(&self, payload: &[u8], dst: &mut BytesMut) -> io::Result<()> {
        if payload.len() > self.max_frame_size {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "Nachricht zu gross: {} Bytes (Maximum: {} Bytes)",
                    payload.len(),
                    self.max_frame_size
                ),
            ));
        }
        dst.reserve(LENGTH_FIELD_SIZE + payload.len());
        dst.put_u32(payload.len() as u32);
        dst.put_slice(payload);
        Ok(())
    }
}

impl Default for SignalingCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for SignalingCodec {
    type Item = String;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < LENGTH_FIELD_SIZE {
            return Ok(None);
        }

        let length = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;
        if length > self.max_frame_size {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "Frame zu gross: {} Bytes (Maximum: {} Bytes)",
                    length, self.max_frame_size
                ),
            ));
        }

        let total_size = LENGTH_FIELD_SIZE + length;
        if src.len() < total_size {
            src.reserve(total_size - src.len());
            return Ok(None);
        }

        src.advance(LENGTH_FIELD_SIZE);
        let payload = src.split_to(length);

        String::from_utf8(payload.to_vec())
            .map(Some)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, format!("Kein UTF-8: {e}")))
    }
}

impl Encoder<ServerMessage> for SignalingCodec {
    type Error = io::Error;

    fn encode(&mut self, item: ServerMessage, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let json = serde_json::to_vec(&item).map_err(|e| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("JSON-Serialisierung fehlgeschlagen: {e}"),
            )
        })?;
        self.frame_schreiben(&json, dst)
    }
}

/// Rohtext kodieren (Client-Seite, Tests)
impl Encoder<&str> for SignalingCodec {
    type Error = io::Error;

    fn encode(&mut self, item: &str, dst: &mut BytesMut) -> Result<(), Self::Error> {
        self.frame_schreiben(item.as_bytes(), dst)
    }
}
