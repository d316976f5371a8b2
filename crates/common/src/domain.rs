mod envelope;
mod event;
mod expression;
mod outcome;
mod point;
mod result;
mod rule;
mod time;

pub use envelope::*;
pub use event::*;
pub use expression::*;
pub use outcome::*;
pub use point::*;
pub use result::*;
pub use rule::*;
pub use time::*;
