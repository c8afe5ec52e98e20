//! Close status codes (RFC6455 section 7.4.1).

/// Normal closure.
pub const NORMAL: u16 = 1000;
/// Endpoint is going away (server shutdown).
pub const GOING_AWAY: u16 = 1001;
/// Generic protocol violation.
pub const PROTOCOL_ERROR: u16 = 1002;
/// Received a data type that cannot be accepted.
pub const UNSUPPORTED_DATA: u16 = 1003;
/// No status code was present in the CLOSE frame. Never sent on the wire.
pub const NO_STATUS: u16 = 1005;
/// Connection dropped without a CLOSE frame. Never sent on the wire.
pub const ABNORMAL: u16 = 1006;
/// Text payload was not valid UTF-8.
pub const INVALID_PAYLOAD: u16 = 1007;
/// Frame exceeded the configured size limit.
pub const MESSAGE_TOO_BIG: u16 = 1009;
/// Unexpected server-side condition.
pub const INTERNAL_ERROR: u16 = 1011;
