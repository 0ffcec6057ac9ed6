pub mod error;

pub use error::{MqError, Result};
