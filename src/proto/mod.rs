//! Pieces of the HTTP/1.1 wire protocol the hub speaks: bounded read
//! staging, incremental message parsing, and response serialization.

pub(crate) mod io;
pub(crate) mod parse;
pub(crate) mod reply;
