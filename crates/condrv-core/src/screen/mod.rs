mod buffer;
mod cursor;
mod snapshot;

pub use buffer::{Cell, SavedCursor, ScreenBuffer};
pub use cursor::Cursor;
pub use snapshot::{make_viewport_snapshot, ScreenBufferSnapshot};
