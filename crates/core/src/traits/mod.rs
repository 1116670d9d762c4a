pub mod collaborators;
pub mod history;
pub mod repository;

pub use collaborators::*;
pub use history::*;
pub use repository::*;
