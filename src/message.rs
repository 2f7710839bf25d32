use thiserror::Error;

/// Bytes taken by the send timestamp at the start of every ping.
pub const TIMESTAMP_LENGTH: usize = 8;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MessageError {
    #[error("message of {0} bytes cannot hold an 8 byte timestamp")]
    TooShort(usize),
}

/// Writes the send time as little-endian at offset 0. The rest of the
/// buffer is left as is.
pub fn encode(buffer: &mut [u8], send_time_nanos: u64) -> Result<(), MessageError> {
    let len = buffer.len();
    let head = buffer
        .get_mut(..TIMESTAMP_LENGTH)
        .ok_or(MessageError::TooShort(len))?;
    head.copy_from_slice(&send_time_nanos.to_le_bytes());
    Ok(())
}

pub fn decode(buffer: &[u8]) -> Result<u64, MessageError> {
    let head: [u8; TIMESTAMP_LENGTH] = buffer
        .get(..TIMESTAMP_LENGTH)
        .and_then(|bytes| bytes.try_into().ok())
        .ok_or(MessageError::TooShort(buffer.len()))?;
    Ok(u64::from_le_bytes(head))
}

/// Fixed-size outbound ping buffer, reused for every message.
#[derive(Debug, Clone)]
pub struct PingMessage {
    buffer: Vec<u8>,
}

impl PingMessage {
    pub fn new(length: usize) -> Result<Self, MessageError> {
        if length < TIMESTAMP_LENGTH {
            return Err(MessageError::TooShort(length));
        }
        Ok(Self {
            buffer: vec![0u8; length],
        })
    }

    pub fn stamp(&mut self, send_time_nanos: u64) {
        // length checked in new()
        self.buffer[..TIMESTAMP_LENGTH].copy_from_slice(&send_time_nanos.to_le_bytes());
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }
}
