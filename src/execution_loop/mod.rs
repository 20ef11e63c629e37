pub mod error_classifier;
pub mod r#loop;
pub mod response;

pub use error_classifier::*;
pub use r#loop::*;
pub use response::*;
