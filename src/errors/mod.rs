pub mod types;

pub use types::ScanError;
