//! Wire codec
//!
//! Converts update records and client commands to and from wire frames.
//!
//! ## Formats
//!
//! - **JSON**: one object per text frame, `{"k", "v", "n"}` value updates and
//!   `{"r", "a"}` connection status. Optional `"t"` type labels.
//! - **CBOR**: the same maps encoded as binary frames, with native byte
//!   strings for raw values and support for the `{"a"}` reconnect command.
//!
//! Which variant is spoken is a deployment choice captured by
//! [`CodecConfig`], not a property of the session.

mod cbor;
mod codec;
mod json;
mod message;

pub use codec::{Codec, CodecConfig, WireFormat};
pub use message::{ClientCommand, Frame, UpdateRecord};
