use bytes::{BufMut, BytesMut};
use std::io;
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("line exceeds {max_bytes} bytes without a terminator")]
    LineTooLong { max_bytes: usize },
    #[error("transport error: {0}")]
    Io(#[from] io::Error),
}

/// Splits a byte stream into `\n`-terminated lines of at most `max_bytes`
/// (terminator excluded). Partial lines stay buffered across reads.
#[derive(Debug, Clone)]
pub struct LineCodec {
    max_bytes: usize,
    // Bytes before this index were already scanned and hold no terminator.
    next_index: usize,
}

impl LineCodec {
    pub fn new(max_bytes: usize) -> Self {
        Self {
            max_bytes,
            next_index: 0,
        }
    }
}

impl Decoder for LineCodec {
    type Item = String;
    type Error = FrameError;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<String>, FrameError> {
        let scan_to = buf.len().min(self.max_bytes + 1);
        let start = self.next_index.min(scan_to);

        match buf[start..scan_to].iter().position(|b| *b == b'\n') {
            Some(offset) => {
                let newline = start + offset;
                self.next_index = 0;
                let line = buf.split_to(newline + 1);
                Ok(Some(String::from_utf8_lossy(&line[..newline]).into_owned()))
            }
            None if buf.len() > self.max_bytes => Err(FrameError::LineTooLong {
                max_bytes: self.max_bytes,
            }),
            None => {
                self.next_index = scan_to;
                Ok(None)
            }
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<String>, FrameError> {
        if let Some(line) = self.decode(buf)? {
            return Ok(Some(line));
        }

        // An unterminated tail at end of stream is not a line.
        buf.clear();
        self.next_index = 0;
        Ok(None)
    }
}

impl<T: AsRef<str>> Encoder<T> for LineCodec {
    type Error = FrameError;

    fn encode(&mut self, line: T, dst: &mut BytesMut) -> Result<(), FrameError> {
        let line = line.as_ref();
        if line.len() > self.max_bytes || line.contains('\n') {
            return Err(FrameError::LineTooLong {
                max_bytes: self.max_bytes,
            });
        }

        dst.reserve(line.len() + 1);
        dst.put_slice(line.as_bytes());
        dst.put_u8(b'\n');
        Ok(())
    }
}
