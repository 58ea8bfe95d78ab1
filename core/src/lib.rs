pub mod error;
pub mod item;
pub mod request;
pub mod response;
pub mod spider;

pub use error::{Error, Result};
pub use item::{DynamicItem, Item};
pub use request::{Fingerprint, Method, Request};
pub use response::Response;
pub use spider::{ParseOutput, Spider};

/// Re-export commonly used crates
pub use async_trait::async_trait;
pub use serde;
pub use serde_json;
pub use url;
