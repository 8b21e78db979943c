//! CLI commands implementation

pub mod convert;
pub mod daemon;
pub mod export;
pub mod extract;
pub mod init;
pub mod list;

pub use convert::*;
pub use daemon::*;
pub use export::*;
pub use extract::*;
pub use init::*;
pub use list::*;
