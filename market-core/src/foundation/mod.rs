pub mod error;
pub mod types;

pub use error::{MarketError, Result};
pub use types::{FilePath, PeerId, GIB};
