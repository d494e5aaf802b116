pub mod identity;
pub mod session;

pub use identity::*;
pub use session::*;
