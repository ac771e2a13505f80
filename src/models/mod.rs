pub mod endpoint;
pub mod log;
pub mod question;
pub mod vulnerability;

pub use endpoint::*;
pub use log::*;
pub use question::*;
pub use vulnerability::*;
