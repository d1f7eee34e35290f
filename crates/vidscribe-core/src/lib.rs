pub mod client;
pub mod cost;
pub mod debug;
pub mod error;
pub mod pipeline;
pub mod request;
pub mod sampler;
pub mod video;

pub use error::{Error, Result};
