//! Exit codes for hascopectl.
//!
//! Scripts and agents branch on these; keep them stable.

/// Success, including empty result sets.
pub const EXIT_SUCCESS: i32 = 0;

/// Unexpected failure.
pub const EXIT_GENERAL_ERROR: i32 = 1;

/// Invalid flag combination or argument value.
pub const EXIT_USAGE: i32 = 2;

/// Configuration missing or invalid.
pub const EXIT_CONFIG: i32 = 3;

/// Neither the store nor the live fallback could serve the request.
pub const EXIT_STORE_UNAVAILABLE: i32 = 4;
