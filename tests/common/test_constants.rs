//! Constants shared across behavioural tests.

/// A fixed 32-byte encryption key in hex, matching the generated key length.
pub const TEST_KEY_HEX: &str = "aab2c3d4e5f60718293a4b5c6d7e8f90a1b2c3d4e5f60718293a4b5c6d7e8fbb";

/// Deployment-wide backend password used in fixtures.
pub const TEST_PASSWORD: &str = "pw123";

/// Minimal base template contents used in fixtures.
pub const BASE_CONTENT: &str = "root = \"/\"\n";
