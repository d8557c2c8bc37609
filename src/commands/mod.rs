//! CLI commands implementation

pub mod add;
pub mod collections;
pub mod documents;
pub mod init;
pub mod status;

pub use add::*;
pub use collections::*;
pub use documents::*;
pub use init::*;
pub use status::*;
