pub mod error;
pub mod fetch;
pub mod ftp;
pub mod output;
pub mod process;
pub mod registry;
pub mod retry;

pub use error::ScrapeError;
