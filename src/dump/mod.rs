//! The external dump process: binary, arguments, and output format

mod args;
mod binary;
mod values;

pub use args::{DUMP_OPTIONS, dump_args};
pub use binary::{DumpBinary, MIN_VERSION, parse_version};
pub use values::parse_values;
