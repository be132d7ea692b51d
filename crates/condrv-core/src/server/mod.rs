mod alias;
mod dispatch;
mod handlers;
mod state;
pub mod wire;

pub use alias::AliasStore;
pub use dispatch::{dispatch_message, ApiMessage, Completion, DispatchOutcome};
pub use state::{Connection, Handle, HandleKind, PendingRequest, ScreenEntry, ServerState};
