pub mod info;
pub mod session;
pub mod utils;
