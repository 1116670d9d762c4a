pub mod clock;
pub mod config;
pub mod errors;
pub mod models;
pub mod traits;

pub use clock::*;
pub use config::*;
pub use errors::*;
pub use models::*;
pub use traits::*;
