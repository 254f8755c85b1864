//! Data input and output
//!
//! - [`io`]: CSV readers and writers for quotes, fits, densities and labels
//! - [`store`]: the on-disk layout shared by the pipeline stages

pub mod io;
pub mod store;

pub use io::{apply_quote_filter, read_quotes, read_quotes_from};
pub use store::OutputStore;
