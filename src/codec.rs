use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::Error;

/// Newline framing used on both sides of the relay.
///
/// Decoding splits on `\n`, strips one trailing `\r`, and requires valid
/// UTF-8; the delimiter is not included in the yielded lines. Encoding
/// writes the line followed by `\n`.
#[derive(Debug, Clone, Default)]
pub struct LineCodec {
    /// How far we have looked for a newline into the buffer.
    cursor: usize,
}

impl LineCodec {
    /// Create a new codec.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Decoder for LineCodec {
    type Item = String;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let read_to = src.len();

        let look_at = &src[self.cursor..read_to];

        if let Some(position) = look_at.iter().position(|&byte| byte == b'\n') {
            // Since we might "start late" in the buffer (from the cursor),
            // the "global" position within the buffer has to be calculated.
            let actual_position = self.cursor + position;

            // Next time we need to start over.
            self.cursor = 0;

            let mut line = src.split_to(actual_position);

            // Discard the newline by advancing the source buffer beyond it.
            src.advance(1);

            if line.last() == Some(&b'\r') {
                line.truncate(line.len() - 1);
            }

            Ok(Some(String::from_utf8(line[..].to_vec())?))
        } else {
            // We did not find a full frame.
            // The next time we are called the same buffer `src` will be
            // provided to us (same starting point), but possibly with more
            // data. Since our job is to find the delimiter, we don't need
            // to re-read the bytes we have already looked at.
            self.cursor = read_to;

            Ok(None)
        }
    }
}

impl Encoder<String> for LineCodec {
    type Error = Error;

    fn encode(&mut self, item: String, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.extend_from_slice(item.as_bytes());
        dst.extend_from_slice(b"\n");
        Ok(())
    }
}
