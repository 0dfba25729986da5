//! Local line transport.

mod line;

pub use line::{single_line, LineReader, LineWriter};
