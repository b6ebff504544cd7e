pub mod digest;
pub mod error;

pub use digest::Digest;
pub use error::{Result, ScourError};
