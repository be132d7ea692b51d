//! The packet dispatch engine.
//!
//! `dispatch_message` decodes a request descriptor, routes it to a
//! handler, and produces a completion record through the transport. A
//! handler that cannot finish returns reply-pending: the request
//! identifier is parked in the ledger and the same identifier re-enters
//! later, resuming from per-handle continuation state. Dispatch is not
//! re-entrant and never blocks.

use condrv_common::error::CommResult;
use condrv_common::traits::{DeviceComm, HostIo, IoComplete};
use condrv_common::types::{IoStatus, Status};
use tracing::{debug, trace};

use crate::server::handlers::{self, HandlerOutcome, ReadParams, RequestCtx};
use crate::server::state::{HandleKind, ServerState};
use crate::server::wire::*;

/// Finalized status and response bytes of one request
#[derive(Debug, Clone, Default)]
pub struct Completion {
    pub io_status: IoStatus,
    pub write: Vec<u8>,
}

/// What `dispatch_message` tells the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchOutcome {
    pub reply_pending: bool,
}

fn done() -> DispatchOutcome {
    DispatchOutcome {
        reply_pending: false,
    }
}

fn pending() -> DispatchOutcome {
    DispatchOutcome {
        reply_pending: true,
    }
}

/// One in-flight request: the descriptor plus the transport that owns its
/// buffers. The completion is retained for inspection after dispatch.
pub struct ApiMessage<'a, C: DeviceComm> {
    comm: &'a mut C,
    descriptor: IoDescriptor,
    completion: Completion,
}

impl<'a, C: DeviceComm> ApiMessage<'a, C> {
    pub fn new(comm: &'a mut C, descriptor: IoDescriptor) -> Self {
        Self {
            comm,
            descriptor,
            completion: Completion::default(),
        }
    }

    pub fn descriptor(&self) -> &IoDescriptor {
        &self.descriptor
    }

    pub fn completion(&self) -> &Completion {
        &self.completion
    }
}

fn complete<C: DeviceComm>(
    message: &mut ApiMessage<'_, C>,
    status: Status,
    information: u32,
    write: Vec<u8>,
) -> CommResult<()> {
    if !write.is_empty() {
        message.comm.write_output(0, &write)?;
    }
    message.completion = Completion {
        io_status: IoStatus::new(status, information),
        write,
    };
    message.comm.complete_io(IoComplete {
        io_status: message.completion.io_status,
        write: &message.completion.write,
    })
}

/// Service one request. Transport and host failures surface as `Err`; the
/// transport treats those as soft failures with no completion produced.
pub fn dispatch_message<C: DeviceComm, H: HostIo>(
    state: &mut ServerState,
    message: &mut ApiMessage<'_, C>,
    host: &mut H,
) -> CommResult<DispatchOutcome> {
    let descriptor = *message.descriptor();
    trace!(
        "Dispatch id={} function={} object={}",
        descriptor.identifier,
        descriptor.function,
        descriptor.object
    );

    // A parked request whose handle went away completes unsuccessfully on
    // its next re-entry
    if state.request_cancelled(descriptor.identifier) {
        state.unpark_request(descriptor.identifier);
        complete(message, Status::Unsuccessful, 0, Vec::new())?;
        return Ok(done());
    }

    match descriptor.function {
        CONSOLE_IO_CONNECT => {
            let info = state.connect(descriptor.process, descriptor.object);
            let write = info.encode();
            let information = write.len() as u32;
            complete(message, Status::Success, information, write)?;
            Ok(done())
        }

        CONSOLE_IO_DISCONNECT => {
            let released = state.disconnect(descriptor.process);
            for object in released {
                state.cancel_requests_for(object);
            }
            complete(message, Status::Success, 0, Vec::new())?;
            Ok(done())
        }

        CONSOLE_IO_CREATE_OBJECT => {
            if (descriptor.input_size as usize) < CreateObjectMsg::SIZE {
                complete(message, Status::InvalidParameter, 0, Vec::new())?;
                return Ok(done());
            }
            let mut bytes = vec![0u8; CreateObjectMsg::SIZE];
            message.comm.read_input(0, &mut bytes)?;
            let Some(msg) = CreateObjectMsg::decode(&bytes) else {
                complete(message, Status::InvalidParameter, 0, Vec::new())?;
                return Ok(done());
            };
            let kind = match msg.object_type {
                OBJECT_TYPE_INPUT => HandleKind::Input,
                OBJECT_TYPE_OUTPUT => HandleKind::Output,
                _ => {
                    complete(message, Status::InvalidParameter, 0, Vec::new())?;
                    return Ok(done());
                }
            };
            match state.create_object(descriptor.process, kind) {
                Some(object) => complete(message, Status::Success, object, Vec::new())?,
                None => complete(message, Status::InvalidHandle, 0, Vec::new())?,
            }
            Ok(done())
        }

        CONSOLE_IO_CLOSE_OBJECT => {
            state.cancel_requests_for(descriptor.object);
            if state.close_object(descriptor.object) {
                complete(message, Status::Success, 0, Vec::new())?;
            } else {
                complete(message, Status::InvalidHandle, 0, Vec::new())?;
            }
            Ok(done())
        }

        CONSOLE_IO_RAW_READ => raw_read(state, message, host),
        CONSOLE_IO_RAW_WRITE => raw_write(state, message, host),
        CONSOLE_IO_RAW_FLUSH => raw_flush(state, message, host),
        CONSOLE_IO_USER_DEFINED => user_defined(state, message, host),

        other => {
            debug!("Unknown function code {}", other);
            complete(message, Status::InvalidParameter, 0, Vec::new())?;
            Ok(done())
        }
    }
}

/// RAW_READ: a ReadConsoleA without a descriptor; the whole output buffer
/// is payload
fn raw_read<C: DeviceComm, H: HostIo>(
    state: &mut ServerState,
    message: &mut ApiMessage<'_, C>,
    host: &mut H,
) -> CommResult<DispatchOutcome> {
    let descriptor = *message.descriptor();
    if !state.validate_handle(descriptor.object, descriptor.process, HandleKind::Input) {
        complete(message, Status::InvalidHandle, 0, Vec::new())?;
        return Ok(done());
    }

    let input_mode = state.input_mode;
    let input_cp = state.input_code_page;
    let active = state.active_screen;
    let handle = state.handles.get_mut(&descriptor.object).expect("validated");
    let input = handle.input.as_mut().expect("input handle");
    let screen = state.screens.get_mut(&active).expect("active screen");

    let params = ReadParams {
        unicode: false,
        budget: descriptor.output_size as usize,
        process: descriptor.process,
    };

    match handlers::service_read(input_mode, input_cp, input, screen, host, &params)? {
        handlers::ReadOutcome::Pending => {
            state.park_request(descriptor.identifier, descriptor.object);
            Ok(pending())
        }
        handlers::ReadOutcome::Complete { status, payload } => {
            state.unpark_request(descriptor.identifier);
            let information = if status == Status::Success {
                payload.len() as u32
            } else {
                0
            };
            complete(message, status, information, payload)?;
            Ok(done())
        }
    }
}

/// RAW_WRITE: the payload is text for the active output, interpreted and
/// forwarded to the renderer
fn raw_write<C: DeviceComm, H: HostIo>(
    state: &mut ServerState,
    message: &mut ApiMessage<'_, C>,
    host: &mut H,
) -> CommResult<DispatchOutcome> {
    let descriptor = *message.descriptor();
    if !state.validate_handle(descriptor.object, descriptor.process, HandleKind::Output) {
        complete(message, Status::InvalidHandle, 0, Vec::new())?;
        return Ok(done());
    }

    let mut payload = vec![0u8; descriptor.input_size as usize];
    message.comm.read_input(0, &mut payload)?;

    let output_mode = state.output_mode;
    let output_cp = state.output_code_page;
    let screen_id = state.handles[&descriptor.object].screen.expect("output handle");
    let screen = state.screens.get_mut(&screen_id).expect("bound screen");

    let mut bytes = std::mem::take(&mut screen.write_partial);
    bytes.extend_from_slice(&payload);
    let (units, consumed) = crate::codec::decode_stream(output_cp, &bytes);
    screen.write_partial = bytes[consumed..].to_vec();

    let vt_enabled = output_mode.contains(condrv_common::types::OutputMode::VIRTUAL_TERMINAL_PROCESSING);
    screen
        .interpreter
        .write_units(&mut screen.buffer, &units, vt_enabled, host);
    let title_change = screen.interpreter.take_title_change();

    host.write_output_bytes(&payload)?;

    if let Some(title) = title_change {
        state.set_title(title);
    }

    complete(message, Status::Success, payload.len() as u32, Vec::new())?;
    Ok(done())
}

fn raw_flush<C: DeviceComm, H: HostIo>(
    state: &mut ServerState,
    message: &mut ApiMessage<'_, C>,
    host: &mut H,
) -> CommResult<DispatchOutcome> {
    let descriptor = *message.descriptor();
    if !state.validate_handle(descriptor.object, descriptor.process, HandleKind::Input) {
        complete(message, Status::InvalidHandle, 0, Vec::new())?;
        return Ok(done());
    }
    if let Some(handle) = state.find_object(descriptor.object) {
        if let Some(input) = handle.input.as_mut() {
            input.reset();
        }
    }
    host.flush_input_buffer()?;
    complete(message, Status::Success, 0, Vec::new())?;
    Ok(done())
}

fn user_defined<C: DeviceComm, H: HostIo>(
    state: &mut ServerState,
    message: &mut ApiMessage<'_, C>,
    host: &mut H,
) -> CommResult<DispatchOutcome> {
    let descriptor = *message.descriptor();
    let input_size = descriptor.input_size as usize;

    if input_size < MSG_HEADER_SIZE {
        complete(message, Status::InvalidParameter, 0, Vec::new())?;
        return Ok(done());
    }

    let mut header_bytes = [0u8; MSG_HEADER_SIZE];
    message.comm.read_input(0, &mut header_bytes)?;
    let Some(header) = MsgHeader::decode(&header_bytes) else {
        complete(message, Status::InvalidParameter, 0, Vec::new())?;
        return Ok(done());
    };

    let api_size = header.api_descriptor_size as usize;
    if MSG_HEADER_SIZE + api_size > input_size {
        complete(message, Status::InvalidParameter, 0, Vec::new())?;
        return Ok(done());
    }

    let mut descriptor_bytes = vec![0u8; api_size];
    if api_size > 0 {
        message.comm.read_input(MSG_HEADER_SIZE as u64, &mut descriptor_bytes)?;
    }

    let payload_len = input_size - MSG_HEADER_SIZE - api_size;
    let mut payload = vec![0u8; payload_len];
    if payload_len > 0 {
        message
            .comm
            .read_input((MSG_HEADER_SIZE + api_size) as u64, &mut payload)?;
    }

    let ctx = RequestCtx {
        identifier: descriptor.identifier,
        process: descriptor.process,
        object: descriptor.object,
        output_budget: (descriptor.output_size as usize).saturating_sub(api_size),
    };

    let Some(api) = ApiNumber::from_u32(header.api_number) else {
        debug!("Unknown API number {:#010x}", header.api_number);
        complete(message, Status::Unsuccessful, 0, vec![0u8; api_size])?;
        return Ok(done());
    };

    if api.is_deprecated() {
        debug!("Deprecated API {:?} completes as not implemented", api);
        complete(message, Status::NotImplemented, 0, vec![0u8; api_size])?;
        return Ok(done());
    }

    let outcome = match api {
        ApiNumber::GetConsoleCp => handlers::get_cp(state, &ctx, &descriptor_bytes)?,
        ApiNumber::GetConsoleMode => handlers::get_mode(state, &ctx, &descriptor_bytes)?,
        ApiNumber::SetConsoleMode => handlers::set_mode(state, &ctx, &descriptor_bytes)?,
        ApiNumber::GetNumberOfInputEvents => {
            handlers::get_number_of_input_events(state, host, &ctx, &descriptor_bytes)?
        }
        ApiNumber::GetConsoleInput => {
            handlers::get_console_input(state, host, &ctx, &descriptor_bytes)?
        }
        ApiNumber::ReadConsole => handlers::read_console(state, host, &ctx, &descriptor_bytes)?,
        ApiNumber::WriteConsole => {
            handlers::write_console(state, host, &ctx, &descriptor_bytes, &payload)?
        }
        ApiNumber::GetLangId => handlers::get_lang_id(state, &ctx, &descriptor_bytes)?,

        ApiNumber::FillConsoleOutput => {
            handlers::fill_console_output(state, &ctx, &descriptor_bytes)?
        }
        ApiNumber::GenerateCtrlEvent => {
            handlers::generate_ctrl_event(state, host, &ctx, &descriptor_bytes)?
        }
        ApiNumber::SetActiveScreenBuffer => {
            handlers::set_active_screen_buffer(state, &ctx, &descriptor_bytes)?
        }
        ApiNumber::FlushInputBuffer => {
            handlers::flush_input_buffer(state, host, &ctx, &descriptor_bytes)?
        }
        ApiNumber::SetCp => handlers::set_cp(state, &ctx, &descriptor_bytes)?,
        ApiNumber::GetCursorInfo => handlers::get_cursor_info(state, &ctx, &descriptor_bytes)?,
        ApiNumber::SetCursorInfo => handlers::set_cursor_info(state, &ctx, &descriptor_bytes)?,
        ApiNumber::GetScreenBufferInfo => {
            handlers::get_screen_buffer_info(state, &ctx, &descriptor_bytes)?
        }
        ApiNumber::SetScreenBufferInfo => {
            handlers::set_screen_buffer_info(state, &ctx, &descriptor_bytes)?
        }
        ApiNumber::SetScreenBufferSize => {
            handlers::set_screen_buffer_size(state, &ctx, &descriptor_bytes)?
        }
        ApiNumber::SetCursorPosition => {
            handlers::set_cursor_position(state, &ctx, &descriptor_bytes)?
        }
        ApiNumber::GetLargestWindowSize => {
            handlers::get_largest_window_size(state, &ctx, &descriptor_bytes)?
        }
        ApiNumber::ScrollScreenBuffer => {
            handlers::scroll_screen_buffer(state, &ctx, &descriptor_bytes)?
        }
        ApiNumber::SetTextAttribute => {
            handlers::set_text_attribute(state, &ctx, &descriptor_bytes)?
        }
        ApiNumber::SetWindowInfo => handlers::set_window_info(state, &ctx, &descriptor_bytes)?,
        ApiNumber::ReadConsoleOutputString => {
            handlers::read_console_output_string(state, &ctx, &descriptor_bytes)?
        }
        ApiNumber::WriteConsoleInput => {
            handlers::write_console_input(state, &ctx, &descriptor_bytes, &payload)?
        }
        ApiNumber::WriteConsoleOutput => {
            handlers::write_console_output(state, &ctx, &descriptor_bytes, &payload)?
        }
        ApiNumber::WriteConsoleOutputString => {
            handlers::write_console_output_string(state, &ctx, &descriptor_bytes, &payload)?
        }
        ApiNumber::ReadConsoleOutput => {
            handlers::read_console_output(state, &ctx, &descriptor_bytes)?
        }
        ApiNumber::GetTitle => handlers::get_title(state, &ctx, &descriptor_bytes)?,
        ApiNumber::SetTitle => handlers::set_title(state, &ctx, &descriptor_bytes, &payload)?,

        ApiNumber::AddAlias => handlers::add_alias(state, &ctx, &descriptor_bytes, &payload)?,
        ApiNumber::GetAlias => handlers::get_alias(state, &ctx, &descriptor_bytes, &payload)?,
        ApiNumber::GetAliasesLength => {
            handlers::get_aliases_length(state, &ctx, &descriptor_bytes, &payload)?
        }
        ApiNumber::GetAliasExesLength => {
            handlers::get_alias_exes_length(state, &ctx, &descriptor_bytes)?
        }
        ApiNumber::GetAliases => handlers::get_aliases(state, &ctx, &descriptor_bytes, &payload)?,
        ApiNumber::GetAliasExes => handlers::get_alias_exes(state, &ctx, &descriptor_bytes)?,

        other => {
            debug!("API {:?} has no handler", other);
            complete(message, Status::Unsuccessful, 0, vec![0u8; api_size])?;
            return Ok(done());
        }
    };

    match outcome {
        HandlerOutcome::Pending => {
            state.park_request(descriptor.identifier, descriptor.object);
            Ok(pending())
        }
        HandlerOutcome::Complete {
            status,
            descriptor: mut response_descriptor,
            payload: mut response_payload,
        } => {
            state.unpark_request(descriptor.identifier);
            response_descriptor.resize(api_size, 0);
            response_payload.truncate(ctx.output_budget);

            let mut write = response_descriptor;
            write.extend_from_slice(&response_payload);
            let information = if status == Status::Success {
                write.len() as u32
            } else {
                0
            };
            complete(message, status, information, write)?;
            Ok(done())
        }
    }
}
