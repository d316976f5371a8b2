mod envelope;
mod messages;

pub use envelope::*;
pub use messages::*;
