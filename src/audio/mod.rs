pub mod buffer;
pub mod codec;

pub use buffer::{AudioBuffer, PcmFormat};
pub use codec::Codec;
