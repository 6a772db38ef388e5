//! Session orchestration.

mod manager;
mod session;

pub use manager::{
    DialogManager, DialogManagerBuilder, MoveOptions, INACTIVE, INTENT, MESSAGE_TEXT,
    REQUESTED_STATE, SCHEDULE, TEST_RECORD,
};
pub use session::{ChatSession, MessageType};
