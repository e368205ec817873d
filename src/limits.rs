use crate::model::Ms;

pub const MAX_NAME_LEN: usize = 200;
pub const MAX_CALLSIGN_LEN: usize = 32;
pub const MAX_CODE_LEN: usize = 32;
pub const MAX_CID_DIGITS: usize = 10;
pub const MAX_BOOKINGS_PER_CALLSIGN: usize = 50_000;
pub const MAX_ORGANIZATIONS: usize = 10_000;

/// Accepted resource-name suffixes (position types).
pub const CALLSIGN_SUFFIXES: [&str; 7] = ["_DEL", "_GND", "_TWR", "_APP", "_DEP", "_CTR", "_FSS"];

/// Lifetime of an OAuth session and of both auth cookies.
pub const SESSION_TTL_MS: Ms = 24 * 60 * 60 * 1000;

/// Lifetime of a CSRF state token between redirect and callback.
pub const STATE_TOKEN_TTL_MS: Ms = 5 * 60 * 1000;

/// Random bytes behind API keys, session ids and state tokens (hex-encoded).
pub const TOKEN_BYTES: usize = 32;

pub const ROSTER_PAGE_SIZE: usize = 100;
/// Hard stop for runaway pagination on a misbehaving upstream.
pub const MAX_ROSTER_PAGES: usize = 1_000;
