pub mod event;
pub mod frame;
pub mod tail;

pub use event::{parse_line, DetectionEvent, ParseError};
pub use frame::{assemble, Frames};
pub use tail::{LineHandler, PollOutcome, TailReader};
