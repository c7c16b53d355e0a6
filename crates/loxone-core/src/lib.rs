// loxone-core: Session lifecycle, structure model and state dispatch on top of loxone-api.

pub mod command;
pub mod config;
pub mod controller;
pub mod dispatch;
pub mod error;
pub mod model;
pub mod session;
pub mod token;

// ── Primary re-exports ──────────────────────────────────────────────
pub use command::CommandSender;
pub use config::{ControllerConfig, ReconnectConfig, Timeouts, TlsVerification};
pub use controller::Controller;
pub use dispatch::{DispatchedUpdate, DispatchedValue, Dispatcher, Subscription};
pub use error::{CommandError, ConnectionError, CoreError, StructureError};
pub use session::{ConnectionState, SessionLease, SessionSnapshot};

pub use model::{
    CategoryDescriptor, ControlDescriptor, ControlType, RoomDescriptor, StructureDocument,
    ValueKind,
};

// Protocol types consumers need without depending on loxone-api directly.
pub use loxone_api::{Credentials, Identifier, LlResponse, Permission};
