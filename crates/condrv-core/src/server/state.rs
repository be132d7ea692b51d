//! The single mutable root of the console server.
//!
//! Connections, handles, and screen buffers live in id-keyed tables owned
//! here; requests reference them by 32-bit object id, never by pointer.

use std::collections::HashMap;

use condrv_common::types::{InputMode, OutputMode};
use tracing::{debug, info};

use crate::codec::CodePage;
use crate::input::InputHandle;
use crate::screen::ScreenBuffer;
use crate::server::alias::AliasStore;
use crate::server::wire::ConnectionInformation;
use crate::vt::Interpreter;

use condrv_common::types::Coord;

/// Default screen dimensions for implicitly-created buffers
const DEFAULT_COLUMNS: i16 = 80;
const DEFAULT_ROWS: i16 = 25;

/// One client connection and the pair of object ids minted for it
#[derive(Debug, Clone, Copy)]
pub struct Connection {
    pub process: u32,
    pub thread: u32,
    pub input: u32,
    pub output: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleKind {
    Input,
    Output,
}

/// One entry of the object table
#[derive(Debug)]
pub struct Handle {
    pub connection: u32,
    pub kind: HandleKind,
    /// Present on input handles
    pub input: Option<InputHandle>,
    /// Screen buffer id, present on output handles
    pub screen: Option<u32>,
}

/// A screen buffer paired with the interpreter state of its output stream
pub struct ScreenEntry {
    pub buffer: ScreenBuffer,
    pub interpreter: Interpreter,
    /// Trailing partial multi-byte sequence from an ANSI write
    pub write_partial: Vec<u8>,
}

impl ScreenEntry {
    fn new(size: Coord) -> Self {
        Self {
            buffer: ScreenBuffer::new(size),
            interpreter: Interpreter::new(),
            write_partial: Vec::new(),
        }
    }
}

/// A request identifier parked by a reply-pending handler
#[derive(Debug, Clone, Copy)]
pub struct PendingRequest {
    pub object: u32,
    pub cancelled: bool,
}

/// All server state; lives for the life of the process
pub struct ServerState {
    pub(crate) connections: HashMap<u32, Connection>,
    pub(crate) handles: HashMap<u32, Handle>,
    pub(crate) screens: HashMap<u32, ScreenEntry>,
    pub(crate) pending: HashMap<u64, PendingRequest>,
    pub(crate) active_screen: u32,
    pub(crate) input_mode: InputMode,
    pub(crate) output_mode: OutputMode,
    pub(crate) input_code_page: CodePage,
    pub(crate) output_code_page: CodePage,
    pub(crate) title: String,
    pub(crate) original_title: String,
    pub(crate) aliases: AliasStore,
    next_id: u32,
}

impl ServerState {
    pub fn new() -> Self {
        let mut state = Self {
            connections: HashMap::new(),
            handles: HashMap::new(),
            screens: HashMap::new(),
            pending: HashMap::new(),
            active_screen: 0,
            input_mode: InputMode::PROCESSED_INPUT
                | InputMode::LINE_INPUT
                | InputMode::ECHO_INPUT
                | InputMode::INSERT_MODE,
            output_mode: OutputMode::default(),
            input_code_page: CodePage::utf8(),
            output_code_page: CodePage::utf8(),
            title: String::new(),
            original_title: String::new(),
            aliases: AliasStore::new(),
            next_id: 1,
        };
        let screen_id = state.alloc_id();
        state
            .screens
            .insert(screen_id, ScreenEntry::new(Coord::new(DEFAULT_COLUMNS, DEFAULT_ROWS)));
        state.active_screen = screen_id;
        state
    }

    fn alloc_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    // --- connections ------------------------------------------------------

    /// Service a CONNECT: mint a connection plus its input and output
    /// handles, bound to the active screen buffer
    pub fn connect(&mut self, process: u32, thread: u32) -> ConnectionInformation {
        let connection_id = self.alloc_id();
        let input_id = self.alloc_id();
        let output_id = self.alloc_id();

        self.handles.insert(
            input_id,
            Handle {
                connection: connection_id,
                kind: HandleKind::Input,
                input: Some(InputHandle::new()),
                screen: None,
            },
        );
        self.handles.insert(
            output_id,
            Handle {
                connection: connection_id,
                kind: HandleKind::Output,
                input: None,
                screen: Some(self.active_screen),
            },
        );
        self.connections.insert(
            connection_id,
            Connection {
                process,
                thread,
                input: input_id,
                output: output_id,
            },
        );

        info!(
            "Connected process {} (objects {}/{})",
            process, input_id, output_id
        );
        ConnectionInformation {
            process,
            input: input_id,
            output: output_id,
        }
    }

    /// Tear down every connection owned by `process`; returns the object
    /// ids released so the dispatcher can cancel their pending requests
    pub fn disconnect(&mut self, process: u32) -> Vec<u32> {
        let doomed: Vec<u32> = self
            .connections
            .iter()
            .filter(|(_, c)| c.process == process)
            .map(|(&id, _)| id)
            .collect();

        let mut released = Vec::new();
        for connection_id in doomed {
            if let Some(connection) = self.connections.remove(&connection_id) {
                info!("Disconnected process {}", connection.process);
                for object in [connection.input, connection.output] {
                    if self.handles.remove(&object).is_some() {
                        released.push(object);
                    }
                }
            }
            // Secondary handles made by CREATE_OBJECT
            let extra: Vec<u32> = self
                .handles
                .iter()
                .filter(|(_, h)| h.connection == connection_id)
                .map(|(&id, _)| id)
                .collect();
            for object in extra {
                self.handles.remove(&object);
                released.push(object);
            }
        }
        released
    }

    /// CREATE_OBJECT: an extra handle for the process's connection.
    /// Output handles get a fresh screen buffer.
    pub fn create_object(&mut self, process: u32, kind: HandleKind) -> Option<u32> {
        let connection_id = self
            .connections
            .iter()
            .find(|(_, c)| c.process == process)
            .map(|(&id, _)| id)?;

        let object = self.alloc_id();
        match kind {
            HandleKind::Input => {
                self.handles.insert(
                    object,
                    Handle {
                        connection: connection_id,
                        kind,
                        input: Some(InputHandle::new()),
                        screen: None,
                    },
                );
            }
            HandleKind::Output => {
                let screen_id = self.alloc_id();
                self.screens
                    .insert(screen_id, ScreenEntry::new(Coord::new(DEFAULT_COLUMNS, DEFAULT_ROWS)));
                self.handles.insert(
                    object,
                    Handle {
                        connection: connection_id,
                        kind,
                        input: None,
                        screen: Some(screen_id),
                    },
                );
            }
        }
        debug!("Created {:?} object {}", kind, object);
        Some(object)
    }

    /// CLOSE_OBJECT: drop the handle; per-handle transient state goes with
    /// it. Screen buffers outlive handles here (ownership is external).
    pub fn close_object(&mut self, object: u32) -> bool {
        self.handles.remove(&object).is_some()
    }

    // --- lookups ----------------------------------------------------------

    pub fn find_object(&mut self, object: u32) -> Option<&mut Handle> {
        self.handles.get_mut(&object)
    }

    /// Validate that `object` is a handle of `kind` owned by `process`
    pub(crate) fn validate_handle(&self, object: u32, process: u32, kind: HandleKind) -> bool {
        let Some(handle) = self.handles.get(&object) else {
            return false;
        };
        if handle.kind != kind {
            return false;
        }
        self.connections
            .get(&handle.connection)
            .map(|c| c.process == process)
            .unwrap_or(false)
    }

    // --- pending ledger ---------------------------------------------------

    pub(crate) fn park_request(&mut self, identifier: u64, object: u32) {
        self.pending.insert(
            identifier,
            PendingRequest {
                object,
                cancelled: false,
            },
        );
    }

    pub(crate) fn unpark_request(&mut self, identifier: u64) {
        self.pending.remove(&identifier);
    }

    pub(crate) fn request_cancelled(&self, identifier: u64) -> bool {
        self.pending
            .get(&identifier)
            .map(|p| p.cancelled)
            .unwrap_or(false)
    }

    /// Mark every parked request on `object` so its next re-dispatch
    /// completes unsuccessfully
    pub(crate) fn cancel_requests_for(&mut self, object: u32) {
        for request in self.pending.values_mut() {
            if request.object == object {
                request.cancelled = true;
            }
        }
    }

    // --- global settings --------------------------------------------------

    pub fn input_mode(&self) -> InputMode {
        self.input_mode
    }

    pub fn set_input_mode(&mut self, mode: u32) {
        self.input_mode = InputMode::from_bits_retain(mode);
    }

    pub fn output_mode(&self) -> OutputMode {
        self.output_mode
    }

    pub fn set_output_mode(&mut self, mode: u32) {
        self.output_mode = OutputMode::from_bits_retain(mode);
    }

    pub fn input_code_page(&self) -> u32 {
        self.input_code_page.id()
    }

    pub fn set_input_code_page(&mut self, code_page: u32) {
        self.input_code_page = CodePage::new(code_page);
    }

    pub fn output_code_page(&self) -> u32 {
        self.output_code_page.id()
    }

    pub fn set_output_code_page(&mut self, code_page: u32) {
        self.output_code_page = CodePage::new(code_page);
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn original_title(&self) -> &str {
        &self.original_title
    }

    pub fn set_title(&mut self, title: String) {
        if self.original_title.is_empty() {
            self.original_title = title.clone();
        }
        self.title = title;
    }

    pub fn aliases(&self) -> &AliasStore {
        &self.aliases
    }

    pub fn aliases_mut(&mut self) -> &mut AliasStore {
        &mut self.aliases
    }

    /// The screen buffer a RAW_WRITE lands on
    pub fn active_screen(&self) -> &ScreenEntry {
        &self.screens[&self.active_screen]
    }
}

impl Default for ServerState {
    fn default() -> Self {
        Self::new()
    }
}
