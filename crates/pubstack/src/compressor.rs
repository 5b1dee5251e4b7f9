// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! In-memory gzip accumulator backing a single event channel.

use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::{self, Write};

/// Accumulator owned by exactly one event channel.
pub trait BatchBuffer: Send {
    /// Appends one serialized event.
    fn write(&mut self, event: &[u8]) -> io::Result<()>;

    /// Encoded bytes accumulated since the last [`BatchBuffer::finish`].
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the finished batch and leaves a fresh, empty accumulator behind.
    fn finish(&mut self) -> io::Result<Vec<u8>>;
}

/// Accumulates newline-delimited events into one growing gzip stream.
///
/// A failed write may leave part of a record in the stream, so the whole batch
/// is discarded by the next [`BatchBuffer::finish`].
pub struct GzipBuffer {
    encoder: GzEncoder<Vec<u8>>,
    level: Compression,
    broken: bool,
}

fn discarded() -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidData,
        "batch discarded after a failed write",
    )
}

impl GzipBuffer {
    pub fn new(level: Compression) -> Self {
        Self {
            encoder: GzEncoder::new(Vec::new(), level),
            level,
            broken: false,
        }
    }
}

impl BatchBuffer for GzipBuffer {
    /// Appends one event, terminating it with `\n` when it is not already.
    ///
    /// The encoder is sync-flushed so `len` tracks the event.
    fn write(&mut self, event: &[u8]) -> io::Result<()> {
        if self.broken {
            return Err(discarded());
        }

        let result = if event.ends_with(b"\n") {
            self.encoder.write_all(event)
        } else {
            let mut line = Vec::with_capacity(event.len() + 1);
            line.extend_from_slice(event);
            line.push(b'\n');
            self.encoder.write_all(&line)
        }
        .and_then(|()| self.encoder.flush());

        if result.is_err() {
            self.broken = true;
        }
        result
    }

    fn len(&self) -> usize {
        self.encoder.get_ref().len()
    }

    /// Finalizes the gzip stream so the intake receives a complete member.
    ///
    /// Fails without returning any bytes when a write failed since the last finish.
    fn finish(&mut self) -> io::Result<Vec<u8>> {
        let encoder = std::mem::replace(
            &mut self.encoder,
            GzEncoder::new(Vec::new(), self.level),
        );
        if std::mem::take(&mut self.broken) {
            return Err(discarded());
        }
        encoder.finish()
    }
}

impl Default for GzipBuffer {
    fn default() -> Self {
        Self::new(Compression::default())
    }
}

#[cfg(test)]
pub(crate) fn gunzip(payload: &[u8]) -> String {
    use flate2::read::GzDecoder;
    use std::io::Read;

    let mut decoder = GzDecoder::new(payload);
    let mut decoded = String::new();
    decoder
        .read_to_string(&mut decoded)
        .expect("payload is not valid gzip");
    decoded
}
