// loxone-api: Async Rust protocol client for the Loxone Miniserver websocket API

pub mod auth;
pub mod codec;
pub mod crypto;
pub mod error;
pub mod identifier;
pub mod link;
pub mod discovery;
pub mod response;
pub mod transport;

pub use auth::{Credentials, KeyInfo, Permission, TokenGrant};
pub use codec::{EventTable, Frame, FrameKind, StateUpdate, StateValue};
pub use crypto::{CommandCipher, HashAlg, SessionKey};
pub use error::{AuthError, CodecError, Error, HandshakeError};
pub use identifier::Identifier;
pub use link::{EventSink, Link};
pub use discovery::{MiniserverInfo, DiscoveryClient};
pub use response::LlResponse;
pub use transport::{TlsMode, TransportConfig};
