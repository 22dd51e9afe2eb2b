mod hex;
pub mod thread_id;

pub use hex::decode_hex;
pub use hex::decode_hex_buf;
pub use hex::DecodeHexBufError;
