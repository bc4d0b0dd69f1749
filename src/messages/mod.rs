// Helper functions to build, send, and parse PostgreSQL protocol messages.

// Declare submodules
pub mod constants;
pub mod error;
pub mod protocol;
pub mod socket;
pub mod types;

// Re-export public items
pub use error::PgErrorMsg;
pub use protocol::{
    md5_hash_password, md5_hash_second_pass, md5_password_message, password_message,
    sasl_initial_response, sasl_response, simple_query, ssl_request, startup, terminate,
};
pub use socket::{read_message_body, read_message_header, write_all_flush};
pub use types::{parse_data_row, parse_row_description, BytesMutReader, FieldDescription};

// Re-export protocol constants
pub use constants::*;
