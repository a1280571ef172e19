//! Wire protocol: 8-byte header framing and the JSON payloads it carries.

pub mod codec;
pub mod message;

pub use codec::{CodecError, Frame, HEADER_LEN, MAX_PAYLOAD_LEN, Opcode, decode, encode};
pub use message::{CommandPayload, Handshake, RpcMessage};
