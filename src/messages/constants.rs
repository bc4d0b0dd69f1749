//! PostgreSQL protocol constants.

/// Protocol version 3.0.
pub const PROTOCOL_VERSION: i32 = 196608;

/// Magic code of the SSLRequest message sent before startup.
pub const SSL_REQUEST_CODE: i32 = 80877103;

// Authentication request codes carried in 'R' messages.
pub const AUTHENTICATION_SUCCESSFUL: i32 = 0;
pub const AUTHENTICATION_CLEAR_PASSWORD: i32 = 3;
pub const MD5_ENCRYPTED_PASSWORD: i32 = 5;
pub const SASL: i32 = 10;
pub const SASL_CONTINUE: i32 = 11;
pub const SASL_FINAL: i32 = 12;

pub const SCRAM_SHA_256: &str = "SCRAM-SHA-256";

// Backend message codes.
pub const MESSAGE_AUTHENTICATION: u8 = b'R';
pub const MESSAGE_PARAMETER_STATUS: u8 = b'S';
pub const MESSAGE_BACKEND_KEY_DATA: u8 = b'K';
pub const MESSAGE_READY_FOR_QUERY: u8 = b'Z';
pub const MESSAGE_ROW_DESCRIPTION: u8 = b'T';
pub const MESSAGE_DATA_ROW: u8 = b'D';
pub const MESSAGE_COMMAND_COMPLETE: u8 = b'C';
pub const MESSAGE_EMPTY_QUERY_RESPONSE: u8 = b'I';
pub const MESSAGE_ERROR_RESPONSE: u8 = b'E';
pub const MESSAGE_NOTICE_RESPONSE: u8 = b'N';
pub const MESSAGE_NOTIFICATION_RESPONSE: u8 = b'A';
pub const MESSAGE_TERMINATOR: u8 = 0;

/// Upper bound on a single backend message. Larger messages indicate a
/// desynchronized stream.
pub const MAX_MESSAGE_SIZE: i32 = 256 * 1024 * 1024;
