//! Miniserver wire codec: message headers, frames, event tables and
//! outbound command paths.

mod command;
mod event_table;
mod frame;
mod header;

pub use command::{MAX_COMMAND_LEN, encode_command};
pub use event_table::{
    EventIter, EventTable, MAX_TEXT_EVENT_LEN, StateUpdate, StateValue, TableLayout,
    decode_event_table, encode_text_events, encode_value_events,
};
pub use frame::{Frame, FrameCodec, MAX_PAYLOAD_LEN, decode_frame};
pub use header::{FrameKind, HEADER_LEN, Header};
