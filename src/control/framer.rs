//! Line framing for the serial control channel

use tracing::{debug, warn};

/// Receives complete command lines. Runs in the byte-reception context.
pub trait CommandHandler {
    fn handle(&mut self, line: &[u8]);
}

impl<F> CommandHandler for F
where
    F: FnMut(&[u8]),
{
    fn handle(&mut self, line: &[u8]) {
        self(line)
    }
}

/// Accumulates bytes into newline-delimited commands.
///
/// A `\r` or `\n` ends a line; an empty line is ignored. When the buffer
/// fills without a terminator its content is dispatched as-is, so malformed
/// input can never wedge the channel.
pub struct LineFramer<H> {
    buf: Box<[u8]>,
    pos: usize,
    handler: H,
}

impl<H: CommandHandler> LineFramer<H> {
    pub fn new(capacity: usize, handler: H) -> Self {
        Self {
            buf: vec![0u8; capacity.max(1)].into_boxed_slice(),
            pos: 0,
            handler,
        }
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Bytes waiting for a terminator.
    pub fn pending(&self) -> &[u8] {
        &self.buf[..self.pos]
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }

    /// Feed one received chunk.
    pub fn push(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            if byte == b'\n' || byte == b'\r' {
                self.dispatch();
                continue;
            }

            self.buf[self.pos] = byte;
            self.pos += 1;

            if self.pos == self.buf.len() {
                warn!(
                    "control line exceeded {} bytes without terminator, flushing",
                    self.buf.len()
                );
                self.dispatch();
            }
        }
    }

    fn dispatch(&mut self) {
        if self.pos == 0 {
            return;
        }
        debug!("control command: {} bytes", self.pos);
        self.handler.handle(&self.buf[..self.pos]);
        self.pos = 0;
    }
}
