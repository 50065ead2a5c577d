//! Per-call state: the transition table, the call session object and its
//! signaling operations.

pub mod error;
pub mod session;
pub mod state;

pub use error::CallError;
pub use session::Call;
pub use state::{CallState, CallTransition};

use rand::RngCore;

/// Random 32-hex-char identifier, used for call and leg ids.
pub fn generate_call_id() -> String {
    let mut bytes = [0u8; 16];
    rand::rng().fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{b:02X}")).collect()
}
