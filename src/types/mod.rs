mod models;
mod realtime;
mod status;

pub use models::*;
pub use realtime::*;
pub use status::*;
