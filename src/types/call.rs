use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CallDirection {
    Inbound,
    Outbound,
}

/// Kind of network the device is currently on. A change of kind while the
/// connection still looks alive is treated as a brief loss-then-recovery,
/// because radio handoffs silently break the media path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NetworkKind {
    #[default]
    Unknown,
    Wired,
    Wifi,
    Cellular,
}
