//! CLI Exit Code Registry
//!
//! Single source of truth for the `cashplan` exit codes. Exit codes
//! are part of the shell contract — scripts rely on them.
//!
//! | Code | Description                                    |
//! |------|------------------------------------------------|
//! | 0    | Success                                        |
//! | 1    | General error (unspecified)                    |
//! | 2    | CLI usage error (bad args)                     |
//! | 3    | IO error (cannot read/write a file)            |
//! | 4    | Snapshot parse error                           |
//! | 5    | Settings parse error                           |
//! | 6    | Validation findings (`validate` only)          |

/// Success - command completed without errors.
pub const EXIT_SUCCESS: u8 = 0;

/// General error - unspecified failure.
/// Avoid using this; prefer a specific error code.
pub const EXIT_ERROR: u8 = 1;

/// Usage error - bad arguments, missing required options.
pub const EXIT_USAGE: u8 = 2;

/// Cannot read an input file or write an output file.
pub const EXIT_IO: u8 = 3;

/// Snapshot JSON could not be decoded.
pub const EXIT_SNAPSHOT_PARSE: u8 = 4;

/// Settings (TOML file or embedded object) could not be decoded.
pub const EXIT_SETTINGS_PARSE: u8 = 5;

/// `cashplan validate` found milestone or settings violations.
pub const EXIT_VALIDATION: u8 = 6;
