//! Core constants shared by every tapsign crate.
//!
//! Values here describe the tap-driven token workflow itself (secret
//! policy, link timing, identifier shapes) and are independent of any
//! specific token vendor.
//!
//! # Usage
//!
//! ```
//! use tapsign_core::constants::*;
//!
//! assert_eq!(DEFAULT_MAX_SECRET_ATTEMPTS, 3);
//! assert!(MIN_CVC_LENGTH <= MAX_SECRET_LENGTH);
//! ```

// ============================================================================
// Secret policy
// ============================================================================

/// Consecutive wrong secrets tolerated before the flow locks out.
pub const DEFAULT_MAX_SECRET_ATTEMPTS: u8 = 3;

/// Maximum accepted secret length in bytes.
pub const MAX_SECRET_LENGTH: usize = 32;

/// Minimum number of digits in a card verification code.
pub const MIN_CVC_LENGTH: usize = 6;

// ============================================================================
// Link timing
// ============================================================================

/// Timeout applied to the tag link when a session is opened (milliseconds).
pub const DEFAULT_TRANSCEIVE_TIMEOUT_MS: u64 = 1000;

/// Consecutive lost sessions re-prompted before the loss is surfaced.
pub const DEFAULT_MAX_DISCONNECT_RETRIES: u8 = 2;

/// Bounded capacity of event channels between tasks.
pub const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 32;

// ============================================================================
// Identifiers
// ============================================================================

/// Master key fingerprint length in hex characters (4 bytes).
pub const FINGERPRINT_HEX_LENGTH: usize = 8;

/// Maximum wallet identifier length.
pub const MAX_WALLET_ID_LENGTH: usize = 64;

/// Request code value meaning "nothing armed".
pub const DISARMED_REQUEST_CODE: u16 = 0;
