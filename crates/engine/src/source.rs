#![forbid(unsafe_code)]

use crate::EngineError;
use std::io::{ErrorKind, Read};

/// Reads a byte source into one reusable fixed-capacity buffer.
pub struct ChunkReader<R> {
    reader: R,
    buf: Vec<u8>,
    bytes_read: u64,
    chunks: u64,
}

impl<R: Read> ChunkReader<R> {
    pub fn new(reader: R, capacity: usize) -> Self {
        Self {
            reader,
            buf: vec![0; capacity.max(1)],
            bytes_read: 0,
            chunks: 0,
        }
    }

    /// Next chunk, or `None` at end of stream. The slice is only valid until
    /// the following call.
    pub fn next_chunk(&mut self) -> std::io::Result<Option<&[u8]>> {
        loop {
            match self.reader.read(&mut self.buf) {
                Ok(0) => return Ok(None),
                Ok(n) => {
                    self.bytes_read += n as u64;
                    self.chunks += 1;
                    return Ok(Some(&self.buf[..n]));
                }
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(err),
            }
        }
    }

    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    pub fn chunks(&self) -> u64 {
        self.chunks
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }
}

/// Opens the payload at `url` as a streaming body.
pub fn open_http(url: &str) -> Result<Box<dyn Read + Send + Sync + 'static>, EngineError> {
    let response = ureq::get(url)
        .call()
        .map_err(|err| EngineError::http(url, err))?;
    tracing::info!(
        url,
        status = response.status(),
        content_type = response.content_type(),
        "payload stream opened"
    );
    Ok(response.into_reader())
}

/// Asks the generator behind `url` to prepare `count` synthetic records.
/// The payload itself is fetched separately.
pub fn trigger_generation(url: &str, count: u64) -> Result<(), EngineError> {
    let response = ureq::post(url)
        .send_json(serde_json::json!({ "num": count }))
        .map_err(|err| EngineError::http(url, err))?;
    let reply: serde_json::Value = response
        .into_json()
        .map_err(|err| EngineError::http(url, err))?;
    interpret_generator_reply(&reply)?;
    tracing::info!(url, count, "generator finished");
    Ok(())
}

fn interpret_generator_reply(reply: &serde_json::Value) -> Result<(), EngineError> {
    match reply.as_str() {
        Some("success") => Ok(()),
        Some(other) => Err(EngineError::Generator(other.to_string())),
        None => Err(EngineError::Generator(format!("unexpected reply: {reply}"))),
    }
}
