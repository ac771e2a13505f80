pub mod schema;
pub mod types;
pub mod validate;

pub use types::{RawScanConfig, ScanConfig, ScannerFlags};
pub use validate::validate;
