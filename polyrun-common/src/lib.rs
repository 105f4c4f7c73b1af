pub mod language;
pub mod messages;
pub mod types;

pub use language::*;
pub use messages::*;
pub use types::*;
