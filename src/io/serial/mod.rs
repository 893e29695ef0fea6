// src/io/serial/mod.rs
//
// Serial telemetry acquisition.
//
// - framer: `$...\n` frame extraction and sample decoding
// - reader: the connection state machine and the worker thread that runs it
// - utils: line settings and port enumeration

pub mod framer;
pub mod reader;
pub mod utils;

pub use framer::{decode, extract, to_sample};
pub use utils::list_ports;
