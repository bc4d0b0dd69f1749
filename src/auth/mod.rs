pub mod scram;

pub use scram::ScramSha256;
