use tokio_util::bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use crate::error::{CResult, Error};
use crate::wire::message::Message;

/// Max frame size accepted on decode. A decode that would exceed this is a
/// protocol error rather than an attempt to allocate an attacker-controlled
/// amount of memory.
const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

/// Frames a `Message` as a 4-byte big-endian length prefix followed by its
/// bincode payload, the same length-prefix-then-payload shape the
/// teacher's `BytesCodec` uses, generalized to a streaming
/// `tokio_util::codec` pair so it composes with `Framed`.
#[derive(Clone, Copy, Default)]
pub struct MessageCodec;

impl MessageCodec {
    pub fn new() -> Self {
        MessageCodec
    }
}

impl Encoder<Message> for MessageCodec {
    type Error = Error;

    fn encode(&mut self, msg: Message, dst: &mut BytesMut) -> CResult<()> {
        let payload = bincode::serialize(&msg)?;
        if payload.len() > MAX_FRAME_LEN {
            return Err(Error::Protocol(format!("frame too large: {} bytes", payload.len())));
        }
        dst.reserve(4 + payload.len());
        dst.put_u32(payload.len() as u32);
        dst.put_slice(&payload);
        Ok(())
    }
}

impl Decoder for MessageCodec {
    type Item = Message;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> CResult<Option<Message>> {
        if src.len() < 4 {
            return Ok(None);
        }
        let len = u32::from_be_bytes(src[..4].try_into().unwrap()) as usize;
        if len > MAX_FRAME_LEN {
            return Err(Error::Protocol(format!("frame too large: {len} bytes")));
        }
        if src.len() < 4 + len {
            src.reserve(4 + len - src.len());
            return Ok(None);
        }

        src.advance(4);
        let payload = src.split_to(len);
        let msg = bincode::deserialize(&payload)?;
        Ok(Some(msg))
    }
}
