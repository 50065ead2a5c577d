use crate::calls::state::CallState;
use crate::wire::WireMessage;
use std::sync::Arc;
use tokio::sync::broadcast;

// The size of the broadcast channel buffer.
const CHANNEL_CAPACITY: usize = 100;

/// Session-level connection established and logged in.
#[derive(Debug, Clone)]
pub struct Connected {
    pub session_id: String,
}

#[derive(Debug, Clone)]
pub struct Disconnected;

/// The reconnection control loop has started.
#[derive(Debug, Clone)]
pub struct Reconnecting;

/// The bounded reconnection window expired; dropped calls stay dropped.
#[derive(Debug, Clone)]
pub struct ReconnectFailed;

#[derive(Debug, Clone)]
pub struct IncomingCall {
    pub call_id: String,
    pub caller_name: Option<String>,
    pub caller_number: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CallStateChanged {
    pub call_id: String,
    pub previous: CallState,
    pub state: CallState,
}

// Macro to generate EventBus fields and constructor
macro_rules! define_event_bus {
    ($(($field:ident, $type:ty)),* $(,)?) => {
        /// Typed event bus with a separate broadcast channel per event
        /// type. Subscribers take only the channels they care about;
        /// dropping a receiver is the unsubscribe.
        #[derive(Debug)]
        pub struct EventBus {
            $(
                pub $field: broadcast::Sender<$type>,
            )*
        }

        impl EventBus {
            pub fn new() -> Self {
                Self {
                    $(
                        $field: broadcast::channel(CHANNEL_CAPACITY).0,
                    )*
                }
            }
        }
    };
}

define_event_bus! {
    // Session events
    (connected, Arc<Connected>),
    (disconnected, Arc<Disconnected>),
    (reconnecting, Arc<Reconnecting>),
    (reconnect_failed, Arc<ReconnectFailed>),

    // Call events
    (incoming_call, Arc<IncomingCall>),
    (call_state, Arc<CallStateChanged>),

    // Raw server events, for listeners outside the engine
    (notification, Arc<WireMessage>),
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
