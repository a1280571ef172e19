//! Frame codec (panic-free).
//!
//! Wire layout: `[opcode: u32 LE][length: u32 LE][length bytes of UTF-8 JSON]`.
//! Parsing never indexes the buffer directly; it goes through `Buf` after a
//! `remaining()` check.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::error::Result;

/// Header size: opcode + length.
pub const HEADER_LEN: usize = 8;

/// Largest payload accepted from the peer.
pub const MAX_PAYLOAD_LEN: u32 = 16 * 1024 * 1024;

/// Frame opcodes defined by the peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Opcode {
    Handshake = 0,
    Frame = 1,
    Close = 2,
    Ping = 3,
    Pong = 4,
}

impl Opcode {
    pub fn as_u32(self) -> u32 {
        self as u32
    }
}

impl TryFrom<u32> for Opcode {
    type Error = CodecError;

    fn try_from(value: u32) -> std::result::Result<Self, Self::Error> {
        match value {
            0 => Ok(Opcode::Handshake),
            1 => Ok(Opcode::Frame),
            2 => Ok(Opcode::Close),
            3 => Ok(Opcode::Ping),
            4 => Ok(Opcode::Pong),
            other => Err(CodecError::UnknownOpcode(other)),
        }
    }
}

/// Codec failures.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Fewer than [`HEADER_LEN`] bytes were supplied
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    /// The header parsed but the body is not valid JSON.
    ///
    /// `opcode` is kept so callers can log partial diagnostics.
    #[error("invalid payload (opcode {opcode:?}): {reason}")]
    InvalidPayload { opcode: Option<u32>, reason: String },

    /// Declared length is above [`MAX_PAYLOAD_LEN`]
    #[error("frame payload of {0} bytes exceeds limit")]
    FrameTooLarge(u32),

    /// Opcode outside the protocol's range
    #[error("unknown opcode {0}")]
    UnknownOpcode(u32),
}

impl CodecError {
    /// Opcode recovered before the failure, if any
    pub fn opcode(&self) -> Option<u32> {
        match self {
            CodecError::InvalidPayload { opcode, .. } => *opcode,
            CodecError::UnknownOpcode(opcode) => Some(*opcode),
            _ => None,
        }
    }
}

/// One protocol frame.
///
/// The length field is derived from `payload`, so `length == payload.len()`
/// holds by construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub opcode: u32,
    pub payload: Bytes,
}

impl Frame {
    /// Serialize `payload` as JSON into a new frame
    pub fn new<T: Serialize + ?Sized>(
        opcode: Opcode,
        payload: &T,
    ) -> std::result::Result<Self, CodecError> {
        let body = serde_json::to_vec(payload).map_err(|e| CodecError::InvalidPayload {
            opcode: Some(opcode.as_u32()),
            reason: e.to_string(),
        })?;
        Ok(Self {
            opcode: opcode.as_u32(),
            payload: Bytes::from(body),
        })
    }

    /// Payload length as written in the header
    fn len(&self) -> u32 {
        self.payload.len() as u32
    }

    /// Known opcode, if any
    pub fn kind(&self) -> Option<Opcode> {
        Opcode::try_from(self.opcode).ok()
    }

    /// Parse the payload. An empty payload decodes to `Value::Null`.
    pub fn json(&self) -> std::result::Result<Value, CodecError> {
        parse_body(self.opcode, &self.payload)
    }

    /// Header followed by payload
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(HEADER_LEN + self.payload.len());
        buf.put_u32_le(self.opcode);
        buf.put_u32_le(self.len());
        buf.put_slice(&self.payload);
        buf.freeze()
    }

    /// Split one complete frame off the front of `buf`.
    ///
    /// Returns `Ok(None)` while `buf` holds less than a full frame; partial
    /// data stays in `buf` for the next call.
    pub fn parse(buf: &mut BytesMut) -> std::result::Result<Option<Self>, CodecError> {
        if buf.len() < HEADER_LEN {
            return Ok(None);
        }

        let mut header = &buf[..HEADER_LEN];
        let opcode = header.get_u32_le();
        let length = header.get_u32_le();
        if length > MAX_PAYLOAD_LEN {
            return Err(CodecError::FrameTooLarge(length));
        }

        let total = HEADER_LEN + length as usize;
        if buf.len() < total {
            buf.reserve(total - buf.len());
            return Ok(None);
        }

        let mut frame = buf.split_to(total);
        frame.advance(HEADER_LEN);
        Ok(Some(Self {
            opcode,
            payload: frame.freeze(),
        }))
    }

    /// Write the frame and flush.
    pub async fn write_to<W>(&self, writer: &mut W) -> Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        writer.write_all(&self.to_bytes()).await?;
        writer.flush().await?;
        Ok(())
    }
}

/// Encode `payload` as a complete frame (header + JSON body).
pub fn encode<T: Serialize + ?Sized>(
    opcode: Opcode,
    payload: &T,
) -> std::result::Result<Bytes, CodecError> {
    Ok(Frame::new(opcode, payload)?.to_bytes())
}

/// Decode a complete frame from `data`.
///
/// Fails with [`CodecError::MalformedFrame`] when fewer than 8 bytes are
/// supplied and with [`CodecError::InvalidPayload`] (opcode retained) when the
/// declared body is missing or not JSON.
pub fn decode(data: &[u8]) -> std::result::Result<(u32, Value), CodecError> {
    let mut buf = data;
    if buf.remaining() < HEADER_LEN {
        return Err(CodecError::MalformedFrame(format!(
            "expected at least {HEADER_LEN} header bytes, got {}",
            buf.remaining()
        )));
    }

    let opcode = buf.get_u32_le();
    let length = buf.get_u32_le() as usize;
    if buf.remaining() < length {
        return Err(CodecError::InvalidPayload {
            opcode: Some(opcode),
            reason: format!(
                "declared {length} payload bytes, only {} available",
                buf.remaining()
            ),
        });
    }

    let payload = parse_body(opcode, &buf[..length])?;
    Ok((opcode, payload))
}

fn parse_body(opcode: u32, body: &[u8]) -> std::result::Result<Value, CodecError> {
    if body.is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_slice(body).map_err(|e| CodecError::InvalidPayload {
        opcode: Some(opcode),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_encode_writes_little_endian_header() {
        // テスト項目: ヘッダが (opcode, length) のリトルエンディアンで書き込まれる
        // given (前提条件):
        let payload = json!({"cmd": "GET_VOICE_SETTINGS"});

        // when (操作):
        let bytes = encode(Opcode::Frame, &payload).unwrap();

        // then (期待する結果):
        let body = serde_json::to_vec(&payload).unwrap();
        assert_eq!(&bytes[..4], &1u32.to_le_bytes());
        assert_eq!(&bytes[4..8], &(body.len() as u32).to_le_bytes());
        assert_eq!(&bytes[8..], body.as_slice());
    }

    #[test]
    fn test_decode_round_trips_command_and_handshake() {
        // テスト項目: encode した frame を decode すると元の opcode と payload に戻る
        // given (前提条件):
        let cases = [
            (Opcode::Handshake, json!({"v": 1, "client_id": "1234"})),
            (
                Opcode::Frame,
                json!({"cmd": "SET_VOICE_SETTINGS", "nonce": "n1", "args": {"mute": true}}),
            ),
            (Opcode::Pong, json!(null)),
        ];

        for (opcode, payload) in cases {
            // when (操作):
            let bytes = encode(opcode, &payload).unwrap();
            let decoded = decode(&bytes).unwrap();

            // then (期待する結果):
            assert_eq!(decoded, (opcode.as_u32(), payload));
        }
    }

    #[test]
    fn test_decode_rejects_short_input() {
        // テスト項目: 8 バイト未満の入力は MalformedFrame になる
        // given (前提条件):
        let inputs: [&[u8]; 3] = [&[], &[1, 0, 0], &[1, 0, 0, 0, 2, 0, 0]];

        for input in inputs {
            // when (操作):
            let result = decode(input);

            // then (期待する結果):
            assert!(matches!(result, Err(CodecError::MalformedFrame(_))));
        }
    }

    #[test]
    fn test_decode_invalid_json_keeps_opcode() {
        // テスト項目: JSON として不正な payload でも opcode は保持される
        // given (前提条件):
        let mut data = Vec::new();
        data.extend_from_slice(&3u32.to_le_bytes());
        data.extend_from_slice(&5u32.to_le_bytes());
        data.extend_from_slice(b"{nope");

        // when (操作):
        let result = decode(&data);

        // then (期待する結果):
        let err = result.unwrap_err();
        assert!(matches!(err, CodecError::InvalidPayload { .. }));
        assert_eq!(err.opcode(), Some(3));
    }

    #[test]
    fn test_decode_truncated_body_is_invalid_payload() {
        // テスト項目: 宣言長より短い body は InvalidPayload になる
        // given (前提条件):
        let mut bytes = encode(Opcode::Frame, &json!({"cmd": "X"})).unwrap().to_vec();
        bytes.truncate(bytes.len() - 2);

        // when (操作):
        let result = decode(&bytes);

        // then (期待する結果):
        assert!(matches!(
            result,
            Err(CodecError::InvalidPayload {
                opcode: Some(1),
                ..
            })
        ));
    }

    #[test]
    fn test_decode_empty_payload_is_null() {
        // テスト項目: 長さ 0 の payload は Null として扱われる
        // given (前提条件):
        let mut data = Vec::new();
        data.extend_from_slice(&2u32.to_le_bytes());
        data.extend_from_slice(&0u32.to_le_bytes());

        // when (操作):
        let result = decode(&data).unwrap();

        // then (期待する結果):
        assert_eq!(result, (2, Value::Null));
    }

    #[test]
    fn test_opcode_try_from_unknown() {
        // テスト項目: 範囲外の opcode は UnknownOpcode になる
        // given (前提条件):
        let raw = 9u32;

        // when (操作):
        let result = Opcode::try_from(raw);

        // then (期待する結果):
        assert!(matches!(result, Err(CodecError::UnknownOpcode(9))));
        assert_eq!(Opcode::try_from(3).unwrap(), Opcode::Ping);
    }

    #[tokio::test]
    async fn test_frame_write_then_parse_over_stream() {
        // テスト項目: ストリーム越しに書き込んだ frame を分割受信しても復元できる
        // given (前提条件):
        use tokio::io::AsyncReadExt;
        let (mut client, mut server) = tokio::io::duplex(1024);
        let frame = Frame::new(Opcode::Frame, &json!({"cmd": "AUTHENTICATE"})).unwrap();
        frame.write_to(&mut client).await.unwrap();
        drop(client);

        // when (操作):
        let mut raw = Vec::new();
        server.read_to_end(&mut raw).await.unwrap();
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&raw[..5]);
        let partial = Frame::parse(&mut buf).unwrap();
        buf.extend_from_slice(&raw[5..]);
        let complete = Frame::parse(&mut buf).unwrap();

        // then (期待する結果):
        assert_eq!(partial, None);
        let received = complete.unwrap();
        assert_eq!(received, frame);
        assert_eq!(received.kind(), Some(Opcode::Frame));
        assert_eq!(received.json().unwrap()["cmd"], "AUTHENTICATE");
        assert!(buf.is_empty());
    }

    #[test]
    fn test_parse_leaves_following_frame_in_buffer() {
        // テスト項目: 連続した frame は 1 つずつ取り出される
        // given (前提条件):
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&encode(Opcode::Ping, &json!({"n": 1})).unwrap());
        buf.extend_from_slice(&encode(Opcode::Frame, &json!({"n": 2})).unwrap());

        // when (操作):
        let first = Frame::parse(&mut buf).unwrap().unwrap();
        let second = Frame::parse(&mut buf).unwrap().unwrap();

        // then (期待する結果):
        assert_eq!(first.kind(), Some(Opcode::Ping));
        assert_eq!(second.json().unwrap()["n"], 2);
        assert_eq!(Frame::parse(&mut buf).unwrap(), None);
    }

    #[test]
    fn test_parse_rejects_oversized_length() {
        // テスト項目: 上限を超える宣言長の frame は FrameTooLarge で拒否される
        // given (前提条件):
        let mut buf = BytesMut::new();
        buf.put_u32_le(1);
        buf.put_u32_le(MAX_PAYLOAD_LEN + 1);

        // when (操作):
        let result = Frame::parse(&mut buf);

        // then (期待する結果):
        assert!(matches!(result, Err(CodecError::FrameTooLarge(_))));
    }
}
