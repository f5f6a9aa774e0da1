//! Bayeux protocol types
//!
//! Message envelope, channel naming rules and the JSON wire codec.

pub mod channels;
pub mod codec;
pub mod messages;

pub use channels::{channel_matches, is_meta, ChannelError};
pub use codec::{decode, encode, encode_one, DecodeFailure, DecodedFrame};
pub use messages::{Advice, Message, ReconnectAdvice};
