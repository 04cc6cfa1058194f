//! Core data types, line parsers and the packet wire format for wxlog
//!
//! This crate is free of I/O: it turns raw station lines into records and
//! records into the fixed binary packets consumed by downstream readers.

pub mod compass;
pub mod packet;
pub mod parser;
pub mod pipeline;
pub mod timestamp;
pub mod types;

pub use compass::*;
pub use packet::*;
pub use parser::*;
pub use pipeline::*;
pub use timestamp::*;
pub use types::*;
