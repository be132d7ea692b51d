pub mod codec;
pub mod input;
pub mod screen;
pub mod server;
pub mod vt;

pub use screen::{make_viewport_snapshot, ScreenBuffer, ScreenBufferSnapshot};
pub use server::{dispatch_message, ApiMessage, DispatchOutcome, ServerState};
pub use vt::Interpreter;
