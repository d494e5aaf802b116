mod sessions;
mod utils;

pub use utils::*;
