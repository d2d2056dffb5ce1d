pub mod message;
pub mod codec;

pub use codec::MessageCodec;
pub use message::{Entry, Message, Observed, ReadRange};
