//! USER_DEFINED API handlers.
//!
//! Every handler validates its handle, mutates server state, and returns a
//! `HandlerOutcome`: either a completed descriptor + inline payload, or
//! reply-pending when a read must wait for more host input. Handlers never
//! panic and never call `wait_for_input`.

use condrv_common::error::CommResult;
use condrv_common::traits::HostIo;
use condrv_common::types::{
    CharAttributes, Coord, InputMode, InputRecord, OutputMode, ReadFlags, SmallRect, Status,
    CONSOLE_CTRL_BREAK_FLAG, CONSOLE_CTRL_C_FLAG, CTRL_BREAK_EVENT, CTRL_C_EVENT,
};
use tracing::debug;

use crate::codec::{self, CodePage};
use crate::input::{pump_input, InputHandle, LineEvent};
use crate::screen::Cell;
use crate::server::state::{HandleKind, ScreenEntry, ServerState};
use crate::server::wire::*;

/// Immutable request facts shared by every handler
pub(crate) struct RequestCtx {
    pub identifier: u64,
    pub process: u32,
    pub object: u32,
    /// Bytes available for the inline output payload
    pub output_budget: usize,
}

pub(crate) enum HandlerOutcome {
    Complete {
        status: Status,
        descriptor: Vec<u8>,
        payload: Vec<u8>,
    },
    Pending,
}

fn fail(status: Status) -> HandlerOutcome {
    HandlerOutcome::Complete {
        status,
        descriptor: Vec::new(),
        payload: Vec::new(),
    }
}

fn invalid_parameter() -> HandlerOutcome {
    fail(Status::InvalidParameter)
}

fn invalid_handle() -> HandlerOutcome {
    fail(Status::InvalidHandle)
}

fn success(descriptor: Vec<u8>, payload: Vec<u8>) -> HandlerOutcome {
    HandlerOutcome::Complete {
        status: Status::Success,
        descriptor,
        payload,
    }
}

// --- wire string helpers -------------------------------------------------

fn decode_wire_string(bytes: &[u8], unicode: bool, code_page: CodePage) -> String {
    if unicode {
        let units: Vec<u16> = bytes
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        String::from_utf16_lossy(&units)
    } else {
        let (units, _) = codec::decode_stream(code_page, bytes);
        String::from_utf16_lossy(&units)
    }
}

fn encode_wire_string(text: &str, unicode: bool, code_page: CodePage) -> Vec<u8> {
    if unicode {
        text.encode_utf16().flat_map(u16::to_le_bytes).collect()
    } else {
        let units: Vec<u16> = text.encode_utf16().collect();
        let (bytes, _) = codec::encode_units(code_page, &units, usize::MAX);
        bytes
    }
}

fn units_to_le_bytes(units: &[u16]) -> Vec<u8> {
    units.iter().flat_map(|u| u.to_le_bytes()).collect()
}

// --- the shared read engine ----------------------------------------------

pub(crate) struct ReadParams {
    pub unicode: bool,
    pub budget: usize,
    pub process: u32,
}

pub(crate) enum ReadOutcome {
    Complete { status: Status, payload: Vec<u8> },
    Pending,
}

/// Translate queued UTF-16 units into client bytes, respecting the byte
/// budget, never splitting a scalar, and parking the overflow in the
/// handle's tail (or `pending_wchar` for a split surrogate pair).
fn deliver_units(
    handle: &mut InputHandle,
    units: Vec<u16>,
    unicode: bool,
    code_page: CodePage,
    budget: usize,
) -> ReadOutcome {
    if units.is_empty() {
        return ReadOutcome::Complete {
            status: Status::Success,
            payload: Vec::new(),
        };
    }

    if unicode {
        let fit = budget / 2;
        if fit == 0 {
            for unit in units.into_iter().rev() {
                handle.delivery_tail.push_front(unit);
            }
            return ReadOutcome::Complete {
                status: Status::BufferTooSmall,
                payload: Vec::new(),
            };
        }
        if fit >= units.len() {
            return ReadOutcome::Complete {
                status: Status::Success,
                payload: units_to_le_bytes(&units),
            };
        }

        // A surrogate pair split by the budget delivers its high half now
        // and parks the low half for the next read
        let mut cut = fit;
        let mut parked_low = None;
        if (0xD800..0xDC00).contains(&units[fit - 1])
            && (0xDC00..0xE000).contains(&units[fit])
        {
            parked_low = Some(units[fit]);
            cut = fit + 1;
        }
        let payload = units_to_le_bytes(&units[..fit]);
        handle.pending_wchar = parked_low;
        for unit in units[cut..].iter().rev() {
            handle.delivery_tail.push_front(*unit);
        }
        ReadOutcome::Complete {
            status: Status::Success,
            payload,
        }
    } else {
        let (payload, consumed) = codec::encode_units(code_page, &units, budget);
        if consumed == 0 {
            // The first scalar does not fit; leave it unconsumed
            for unit in units.into_iter().rev() {
                handle.delivery_tail.push_front(unit);
            }
            return ReadOutcome::Complete {
                status: Status::BufferTooSmall,
                payload: Vec::new(),
            };
        }
        for unit in units[consumed..].iter().rev() {
            handle.delivery_tail.push_front(*unit);
        }
        ReadOutcome::Complete {
            status: Status::Success,
            payload,
        }
    }
}

/// The cooked-or-raw read shared by ReadConsole and RAW_READ
pub(crate) fn service_read<H: HostIo>(
    input_mode: InputMode,
    input_cp: CodePage,
    handle: &mut InputHandle,
    screen: &mut ScreenEntry,
    host: &mut H,
    params: &ReadParams,
) -> CommResult<ReadOutcome> {
    // A previous completion left bytes behind; drain them without
    // touching the host
    if handle.pending_wchar.is_some() || !handle.delivery_tail.is_empty() {
        let mut units = Vec::new();
        if let Some(low) = handle.pending_wchar.take() {
            units.push(low);
        }
        units.extend(handle.delivery_tail.drain(..));
        return Ok(deliver_units(
            handle,
            units,
            params.unicode,
            input_cp,
            params.budget,
        ));
    }

    if host.input_disconnected() {
        handle.pending_line = None;
        return Ok(ReadOutcome::Complete {
            status: Status::Unsuccessful,
            payload: Vec::new(),
        });
    }

    let report = pump_input(handle, input_cp, input_mode, params.process, host)?;
    if report.saw_ctrl_break {
        handle.pending_line = None;
        return Ok(ReadOutcome::Complete {
            status: Status::Alerted,
            payload: Vec::new(),
        });
    }

    if input_mode.contains(InputMode::LINE_INPUT) {
        service_cooked_read(input_mode, input_cp, handle, screen, host, params, report.saw_ctrl_c)
    } else {
        service_raw_read(input_mode, input_cp, handle, params)
    }
}

fn service_raw_read(
    input_mode: InputMode,
    input_cp: CodePage,
    handle: &mut InputHandle,
    params: &ReadParams,
) -> CommResult<ReadOutcome> {
    let processed = input_mode.contains(InputMode::PROCESSED_INPUT);
    let mut units = Vec::new();
    let mut end_of_file = false;

    while let Some(unit) = handle.front_char_unit() {
        if processed && unit == 0x1A {
            // Ctrl+Z: an EOF marker once everything before it is delivered
            if units.is_empty() {
                handle.pop_char_unit();
                end_of_file = true;
            }
            break;
        }
        handle.pop_char_unit();
        units.push(unit);
    }

    if units.is_empty() {
        if end_of_file {
            return Ok(ReadOutcome::Complete {
                status: Status::Success,
                payload: Vec::new(),
            });
        }
        return Ok(ReadOutcome::Pending);
    }

    Ok(deliver_units(
        handle,
        units,
        params.unicode,
        input_cp,
        params.budget,
    ))
}

fn service_cooked_read<H: HostIo>(
    input_mode: InputMode,
    input_cp: CodePage,
    handle: &mut InputHandle,
    screen: &mut ScreenEntry,
    host: &mut H,
    params: &ReadParams,
    saw_ctrl_c: bool,
) -> CommResult<ReadOutcome> {
    if saw_ctrl_c {
        // The line under edit is abandoned
        handle.pending_line = None;
        return Ok(ReadOutcome::Complete {
            status: Status::Alerted,
            payload: Vec::new(),
        });
    }

    let processed = input_mode.contains(InputMode::PROCESSED_INPUT);
    let echo_on = input_mode.contains(InputMode::ECHO_INPUT);

    let mut editor = handle.pending_line.take().unwrap_or_default();
    let mut completed = false;

    'records: while let Some(record) = handle.records.pop_front() {
        let InputRecord::Key(key) = record else {
            continue;
        };
        if !key.key_down {
            continue;
        }
        for _ in 0..key.repeat_count.max(1) {
            let (echo_text, event) = editor.apply_key(&key);
            if echo_on && !echo_text.is_empty() {
                screen
                    .interpreter
                    .write_str(&mut screen.buffer, &echo_text, host);
                host.write_output_bytes(echo_text.as_bytes())?;
            }
            if event == LineEvent::Completed {
                completed = true;
                break 'records;
            }
        }
    }

    if !completed {
        handle.pending_line = Some(editor);
        return Ok(ReadOutcome::Pending);
    }

    if echo_on {
        screen.interpreter.write_str(&mut screen.buffer, "\r\n", host);
        host.write_output_bytes(b"\r\n")?;
    }

    let units = editor.take_line(processed);
    Ok(deliver_units(
        handle,
        units,
        params.unicode,
        input_cp,
        params.budget,
    ))
}

// --- input APIs -----------------------------------------------------------

pub(crate) fn read_console<H: HostIo>(
    state: &mut ServerState,
    host: &mut H,
    ctx: &RequestCtx,
    descriptor: &[u8],
) -> CommResult<HandlerOutcome> {
    let Some(mut msg) = ReadConsoleMsg::decode(descriptor) else {
        return Ok(invalid_parameter());
    };
    if !state.validate_handle(ctx.object, ctx.process, HandleKind::Input) {
        return Ok(invalid_handle());
    }

    let input_mode = state.input_mode;
    let input_cp = state.input_code_page;
    let active = state.active_screen;
    let handle = state.handles.get_mut(&ctx.object).expect("validated");
    let input = handle.input.as_mut().expect("input handle");
    let screen = state.screens.get_mut(&active).expect("active screen");

    let params = ReadParams {
        unicode: msg.unicode,
        budget: ctx.output_budget,
        process: ctx.process,
    };

    match service_read(input_mode, input_cp, input, screen, host, &params)? {
        ReadOutcome::Pending => Ok(HandlerOutcome::Pending),
        ReadOutcome::Complete { status, payload } => {
            msg.num_bytes = payload.len() as u32;
            Ok(HandlerOutcome::Complete {
                status,
                descriptor: msg.encode(),
                payload,
            })
        }
    }
}

pub(crate) fn get_console_input<H: HostIo>(
    state: &mut ServerState,
    host: &mut H,
    ctx: &RequestCtx,
    descriptor: &[u8],
) -> CommResult<HandlerOutcome> {
    let Some(mut msg) = GetConsoleInputMsg::decode(descriptor) else {
        return Ok(invalid_parameter());
    };
    if !state.validate_handle(ctx.object, ctx.process, HandleKind::Input) {
        return Ok(invalid_handle());
    }
    let flags = ReadFlags::from_bits_retain(msg.flags);

    let input_mode = state.input_mode;
    let input_cp = state.input_code_page;
    let handle = state.handles.get_mut(&ctx.object).expect("validated");
    let input = handle.input.as_mut().expect("input handle");

    if host.input_disconnected() {
        return Ok(fail(Status::Unsuccessful));
    }

    let report = pump_input(input, input_cp, input_mode, ctx.process, host)?;
    if report.saw_ctrl_break {
        msg.num_records = 0;
        return Ok(HandlerOutcome::Complete {
            status: Status::Alerted,
            descriptor: msg.encode(),
            payload: Vec::new(),
        });
    }

    let capacity = ctx.output_budget / InputRecord::WIRE_SIZE;
    let available = input.records.len();
    let count = available.min(capacity);

    if count == 0 && available == 0 {
        if flags.contains(condrv_common::types::ReadFlags::NO_WAIT) {
            msg.num_records = 0;
            return Ok(success(msg.encode(), Vec::new()));
        }
        return Ok(HandlerOutcome::Pending);
    }

    let mut payload = Vec::with_capacity(count * InputRecord::WIRE_SIZE);
    if flags.contains(ReadFlags::NO_REMOVE) {
        for record in input.records.iter().take(count) {
            encode_record_for_client(*record, msg.unicode, input_cp, &mut payload);
        }
    } else {
        for _ in 0..count {
            let record = input.records.pop_front().expect("counted");
            encode_record_for_client(record, msg.unicode, input_cp, &mut payload);
        }
    }

    msg.num_records = count as u32;
    Ok(success(msg.encode(), payload))
}

/// Records cross the wire as written except that ANSI readers get the
/// key's character converted to the input code page's single byte
fn encode_record_for_client(
    record: InputRecord,
    unicode: bool,
    code_page: CodePage,
    out: &mut Vec<u8>,
) {
    let record = if unicode {
        record
    } else {
        match record {
            InputRecord::Key(mut key) => {
                if key.unicode_char != 0 {
                    let (bytes, _) = codec::encode_units(code_page, &[key.unicode_char], 4);
                    key.unicode_char = bytes.first().copied().map(u16::from).unwrap_or(u16::from(b'?'));
                }
                InputRecord::Key(key)
            }
            other => other,
        }
    };
    record.encode(out);
}

pub(crate) fn get_number_of_input_events<H: HostIo>(
    state: &mut ServerState,
    host: &mut H,
    ctx: &RequestCtx,
    descriptor: &[u8],
) -> CommResult<HandlerOutcome> {
    let Some(mut msg) = EventsMsg::decode(descriptor) else {
        return Ok(invalid_parameter());
    };
    if !state.validate_handle(ctx.object, ctx.process, HandleKind::Input) {
        return Ok(invalid_handle());
    }
    let input_mode = state.input_mode;
    let input_cp = state.input_code_page;
    let handle = state.handles.get_mut(&ctx.object).expect("validated");
    let input = handle.input.as_mut().expect("input handle");

    pump_input(input, input_cp, input_mode, ctx.process, host)?;
    msg.ready_events = input.records.len() as u32;
    Ok(success(msg.encode(), Vec::new()))
}

pub(crate) fn write_console_input(
    state: &mut ServerState,
    ctx: &RequestCtx,
    descriptor: &[u8],
    payload: &[u8],
) -> CommResult<HandlerOutcome> {
    let Some(mut msg) = WriteConsoleInputMsg::decode(descriptor) else {
        return Ok(invalid_parameter());
    };
    if !state.validate_handle(ctx.object, ctx.process, HandleKind::Input) {
        return Ok(invalid_handle());
    }
    let input_cp = state.input_code_page;
    let handle = state.handles.get_mut(&ctx.object).expect("validated");
    let input = handle.input.as_mut().expect("input handle");

    let wanted = msg.num_records as usize;
    let mut decoded = Vec::new();
    let mut cursor = payload;
    while decoded.len() < wanted {
        match InputRecord::decode(&mut cursor) {
            Some(record) => {
                let record = if msg.unicode {
                    record
                } else {
                    widen_ansi_record(record, input_cp)
                };
                decoded.push(record);
            }
            None => break,
        }
    }

    let written = decoded.len();
    if msg.append {
        input.records.extend(decoded);
    } else {
        for record in decoded.into_iter().rev() {
            input.records.push_front(record);
        }
    }

    msg.num_records = written as u32;
    Ok(success(msg.encode(), Vec::new()))
}

/// ANSI writers supply the character as a code-page byte
fn widen_ansi_record(record: InputRecord, code_page: CodePage) -> InputRecord {
    match record {
        InputRecord::Key(mut key) => {
            if key.unicode_char != 0 {
                let byte = (key.unicode_char & 0xFF) as u8;
                if let codec::Decoded::Scalar(ch, _) = codec::decode_one(code_page, &[byte]) {
                    key.unicode_char = ch as u16;
                }
            }
            InputRecord::Key(key)
        }
        other => other,
    }
}

pub(crate) fn flush_input_buffer<H: HostIo>(
    state: &mut ServerState,
    host: &mut H,
    ctx: &RequestCtx,
    descriptor: &[u8],
) -> CommResult<HandlerOutcome> {
    if !state.validate_handle(ctx.object, ctx.process, HandleKind::Input) {
        return Ok(invalid_handle());
    }
    let handle = state.handles.get_mut(&ctx.object).expect("validated");
    if let Some(input) = handle.input.as_mut() {
        input.reset();
    }
    host.flush_input_buffer()?;
    Ok(success(descriptor.to_vec(), Vec::new()))
}

pub(crate) fn generate_ctrl_event<H: HostIo>(
    state: &mut ServerState,
    host: &mut H,
    ctx: &RequestCtx,
    descriptor: &[u8],
) -> CommResult<HandlerOutcome> {
    let Some(msg) = GenerateCtrlEventMsg::decode(descriptor) else {
        return Ok(invalid_parameter());
    };
    let _ = state;
    let flags = match msg.event_type {
        CTRL_C_EVENT => CONSOLE_CTRL_C_FLAG,
        CTRL_BREAK_EVENT => CONSOLE_CTRL_BREAK_FLAG,
        _ => return Ok(invalid_parameter()),
    };
    let target = if msg.process_group == 0 {
        ctx.process
    } else {
        msg.process_group
    };
    host.send_end_task(target, msg.event_type, flags)?;
    Ok(success(msg.encode(), Vec::new()))
}

// --- output APIs ----------------------------------------------------------

/// Decode a WriteConsole payload into UTF-16 units, carrying a partial
/// trailing multi-byte sequence across calls
fn decode_write_payload(screen: &mut ScreenEntry, payload: &[u8], unicode: bool, cp: CodePage) -> Vec<u16> {
    if unicode {
        payload
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect()
    } else {
        let mut bytes = std::mem::take(&mut screen.write_partial);
        bytes.extend_from_slice(payload);
        let (units, consumed) = codec::decode_stream(cp, &bytes);
        screen.write_partial = bytes[consumed..].to_vec();
        units
    }
}

pub(crate) fn write_console<H: HostIo>(
    state: &mut ServerState,
    host: &mut H,
    ctx: &RequestCtx,
    descriptor: &[u8],
    payload: &[u8],
) -> CommResult<HandlerOutcome> {
    let Some(mut msg) = WriteConsoleMsg::decode(descriptor) else {
        return Ok(invalid_parameter());
    };
    if !state.validate_handle(ctx.object, ctx.process, HandleKind::Output) {
        return Ok(invalid_handle());
    }
    let output_mode = state.output_mode;
    let output_cp = state.output_code_page;
    let screen_id = state.handles[&ctx.object].screen.expect("output handle");
    let screen = state.screens.get_mut(&screen_id).expect("bound screen");

    let units = decode_write_payload(screen, payload, msg.unicode, output_cp);
    let vt_enabled = output_mode.contains(OutputMode::VIRTUAL_TERMINAL_PROCESSING);
    screen
        .interpreter
        .write_units(&mut screen.buffer, &units, vt_enabled, host);
    let title_change = screen.interpreter.take_title_change();

    // Forward to the renderer: ANSI passes through, UTF-16 re-encodes
    if msg.unicode {
        let (bytes, _) = codec::encode_units(CodePage::utf8(), &units, usize::MAX);
        host.write_output_bytes(&bytes)?;
    } else {
        host.write_output_bytes(payload)?;
    }

    if let Some(title) = title_change {
        state.set_title(title);
    }

    msg.num_bytes = payload.len() as u32;
    Ok(success(msg.encode(), Vec::new()))
}

pub(crate) fn fill_console_output(
    state: &mut ServerState,
    ctx: &RequestCtx,
    descriptor: &[u8],
) -> CommResult<HandlerOutcome> {
    let Some(mut msg) = FillConsoleOutputMsg::decode(descriptor) else {
        return Ok(invalid_parameter());
    };
    if !state.validate_handle(ctx.object, ctx.process, HandleKind::Output) {
        return Ok(invalid_handle());
    }
    let screen_id = state.handles[&ctx.object].screen.expect("output handle");
    let screen = state.screens.get_mut(&screen_id).expect("bound screen");

    let count = msg.length as usize;
    let written = match msg.element_type {
        FILL_ELEMENT_CHARACTER => {
            screen
                .buffer
                .fill_characters(msg.write_coord, msg.element, count)
        }
        FILL_ELEMENT_ATTRIBUTE => screen.buffer.fill_attributes(
            msg.write_coord,
            CharAttributes::from_bits_retain(msg.element),
            count,
        ),
        _ => return Ok(invalid_parameter()),
    };

    msg.length = written as u32;
    Ok(success(msg.encode(), Vec::new()))
}

pub(crate) fn read_console_output_string(
    state: &mut ServerState,
    ctx: &RequestCtx,
    descriptor: &[u8],
) -> CommResult<HandlerOutcome> {
    let Some(mut msg) = OutputStringMsg::decode(descriptor) else {
        return Ok(invalid_parameter());
    };
    if !state.validate_handle(ctx.object, ctx.process, HandleKind::Output) {
        return Ok(invalid_handle());
    }
    let output_cp = state.output_code_page;
    let screen_id = state.handles[&ctx.object].screen.expect("output handle");
    let screen = state.screens.get_mut(&screen_id).expect("bound screen");

    let requested = msg.num_records as usize;
    let (payload, read) = match msg.string_type {
        CONSOLE_ATTRIBUTE => {
            let max = requested.min(ctx.output_budget / 2);
            let attrs = screen.buffer.read_output_attributes(msg.coord, max);
            (units_to_le_bytes(&attrs), attrs.len())
        }
        CONSOLE_REAL_UNICODE | CONSOLE_FALSE_UNICODE => {
            let max = requested.min(ctx.output_budget / 2);
            let chars = screen.buffer.read_output_characters(msg.coord, max);
            (units_to_le_bytes(&chars), chars.len())
        }
        CONSOLE_ASCII => {
            let max = requested.min(ctx.output_budget);
            let chars = screen.buffer.read_output_characters(msg.coord, max);
            let mut bytes = Vec::with_capacity(chars.len());
            for unit in &chars {
                let (encoded, _) = codec::encode_units(output_cp, &[*unit], 4);
                bytes.push(encoded.first().copied().unwrap_or(b'?'));
            }
            (bytes, chars.len())
        }
        _ => return Ok(invalid_parameter()),
    };

    msg.num_records = read as u32;
    Ok(success(msg.encode(), payload))
}

pub(crate) fn write_console_output_string(
    state: &mut ServerState,
    ctx: &RequestCtx,
    descriptor: &[u8],
    payload: &[u8],
) -> CommResult<HandlerOutcome> {
    let Some(mut msg) = OutputStringMsg::decode(descriptor) else {
        return Ok(invalid_parameter());
    };
    if !state.validate_handle(ctx.object, ctx.process, HandleKind::Output) {
        return Ok(invalid_handle());
    }
    let output_cp = state.output_code_page;
    let screen_id = state.handles[&ctx.object].screen.expect("output handle");
    let screen = state.screens.get_mut(&screen_id).expect("bound screen");

    let written = match msg.string_type {
        CONSOLE_ATTRIBUTE => {
            let attrs: Vec<u16> = payload
                .chunks_exact(2)
                .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
                .collect();
            screen.buffer.write_output_attributes(msg.coord, &attrs)
        }
        CONSOLE_REAL_UNICODE | CONSOLE_FALSE_UNICODE => {
            let chars: Vec<u16> = payload
                .chunks_exact(2)
                .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
                .collect();
            screen.buffer.write_output_characters(msg.coord, &chars)
        }
        CONSOLE_ASCII => {
            let (units, _) = codec::decode_stream(output_cp, payload);
            screen.buffer.write_output_characters(msg.coord, &units)
        }
        _ => return Ok(invalid_parameter()),
    };

    msg.num_records = written as u32;
    Ok(success(msg.encode(), Vec::new()))
}

pub(crate) fn write_console_output(
    state: &mut ServerState,
    ctx: &RequestCtx,
    descriptor: &[u8],
    payload: &[u8],
) -> CommResult<HandlerOutcome> {
    let Some(mut msg) = OutputGridMsg::decode(descriptor) else {
        return Ok(invalid_parameter());
    };
    if !state.validate_handle(ctx.object, ctx.process, HandleKind::Output) {
        return Ok(invalid_handle());
    }
    let screen_id = state.handles[&ctx.object].screen.expect("output handle");
    let screen = state.screens.get_mut(&screen_id).expect("bound screen");

    let region = msg.region;
    let width = region.width();
    let height = region.height();
    if width == 0 || height == 0 {
        msg.region = SmallRect::new(0, 0, -1, -1);
        return Ok(success(msg.encode(), Vec::new()));
    }
    if payload.len() < width * height * 4 {
        return Ok(invalid_parameter());
    }

    let size = screen.buffer.size();
    let clipped = SmallRect::new(
        region.left.max(0),
        region.top.max(0),
        region.right.min(size.x - 1),
        region.bottom.min(size.y - 1),
    );
    for y in clipped.top..=clipped.bottom {
        for x in clipped.left..=clipped.right {
            let index = ((y - region.top) as usize * width + (x - region.left) as usize) * 4;
            let ch = u16::from_le_bytes([payload[index], payload[index + 1]]);
            let attrs = u16::from_le_bytes([payload[index + 2], payload[index + 3]]);
            screen
                .buffer
                .write_cell(Coord::new(x, y), ch, CharAttributes::from_bits_retain(attrs));
        }
    }

    msg.region = clipped;
    Ok(success(msg.encode(), Vec::new()))
}

pub(crate) fn read_console_output(
    state: &mut ServerState,
    ctx: &RequestCtx,
    descriptor: &[u8],
) -> CommResult<HandlerOutcome> {
    let Some(mut msg) = OutputGridMsg::decode(descriptor) else {
        return Ok(invalid_parameter());
    };
    if !state.validate_handle(ctx.object, ctx.process, HandleKind::Output) {
        return Ok(invalid_handle());
    }
    let screen_id = state.handles[&ctx.object].screen.expect("output handle");
    let screen = state.screens.get_mut(&screen_id).expect("bound screen");

    let region = msg.region;
    let width = region.width();
    let height = region.height();
    if width == 0 || height == 0 {
        msg.region = SmallRect::new(0, 0, -1, -1);
        return Ok(success(msg.encode(), Vec::new()));
    }
    if width * height * 4 > ctx.output_budget {
        return Ok(fail(Status::BufferTooSmall));
    }

    let defaults = screen.buffer.default_text_attributes();
    let mut payload = Vec::with_capacity(width * height * 4);
    for y in region.top..=region.bottom {
        for x in region.left..=region.right {
            let cell = screen
                .buffer
                .cell_at(Coord::new(x, y))
                .unwrap_or(Cell::blank(defaults));
            payload.extend_from_slice(&cell.ch.to_le_bytes());
            payload.extend_from_slice(&cell.attrs.bits().to_le_bytes());
        }
    }

    Ok(success(msg.encode(), payload))
}

pub(crate) fn scroll_screen_buffer(
    state: &mut ServerState,
    ctx: &RequestCtx,
    descriptor: &[u8],
) -> CommResult<HandlerOutcome> {
    let Some(msg) = ScrollScreenBufferMsg::decode(descriptor) else {
        return Ok(invalid_parameter());
    };
    if !state.validate_handle(ctx.object, ctx.process, HandleKind::Output) {
        return Ok(invalid_handle());
    }
    let output_cp = state.output_code_page;
    let screen_id = state.handles[&ctx.object].screen.expect("output handle");
    let screen = state.screens.get_mut(&screen_id).expect("bound screen");

    let fill_unit = if msg.unicode {
        msg.fill_char
    } else {
        let byte = (msg.fill_char & 0xFF) as u8;
        match codec::decode_one(output_cp, &[byte]) {
            codec::Decoded::Scalar(ch, _) => ch as u16,
            codec::Decoded::Incomplete => u16::from(b' '),
        }
    };
    let fill = Cell::new(fill_unit, CharAttributes::from_bits_retain(msg.fill_attrs));
    let clip = msg.use_clip.then_some(msg.clip_rect);
    screen
        .buffer
        .scroll_rect(msg.scroll_rect, msg.destination, clip, fill);

    Ok(success(msg.encode(), Vec::new()))
}

pub(crate) fn set_screen_buffer_size(
    state: &mut ServerState,
    ctx: &RequestCtx,
    descriptor: &[u8],
) -> CommResult<HandlerOutcome> {
    let Some(msg) = ScreenBufferSizeMsg::decode(descriptor) else {
        return Ok(invalid_parameter());
    };
    if !state.validate_handle(ctx.object, ctx.process, HandleKind::Output) {
        return Ok(invalid_handle());
    }
    let screen_id = state.handles[&ctx.object].screen.expect("output handle");
    let screen = state.screens.get_mut(&screen_id).expect("bound screen");

    if !screen.buffer.set_size(msg.size) {
        return Ok(invalid_parameter());
    }
    Ok(success(msg.encode(), Vec::new()))
}

pub(crate) fn get_screen_buffer_info(
    state: &mut ServerState,
    ctx: &RequestCtx,
    descriptor: &[u8],
) -> CommResult<HandlerOutcome> {
    let Some(mut msg) = ScreenBufferInfoMsg::decode(descriptor) else {
        return Ok(invalid_parameter());
    };
    if !state.validate_handle(ctx.object, ctx.process, HandleKind::Output) {
        return Ok(invalid_handle());
    }
    let screen_id = state.handles[&ctx.object].screen.expect("output handle");
    let screen = &state.screens[&screen_id];

    msg.size = screen.buffer.size();
    msg.cursor_position = screen.buffer.cursor_position();
    msg.attributes = screen.buffer.attributes().bits();
    msg.window_rect = screen.buffer.window_rect();
    msg.max_window = screen.buffer.max_window();
    Ok(success(msg.encode(), Vec::new()))
}

pub(crate) fn set_screen_buffer_info(
    state: &mut ServerState,
    ctx: &RequestCtx,
    descriptor: &[u8],
) -> CommResult<HandlerOutcome> {
    let Some(msg) = ScreenBufferInfoMsg::decode(descriptor) else {
        return Ok(invalid_parameter());
    };
    if !state.validate_handle(ctx.object, ctx.process, HandleKind::Output) {
        return Ok(invalid_handle());
    }
    let screen_id = state.handles[&ctx.object].screen.expect("output handle");
    let screen = state.screens.get_mut(&screen_id).expect("bound screen");

    if !screen.buffer.set_size(msg.size) {
        return Ok(invalid_parameter());
    }
    screen.buffer.set_cursor_position(msg.cursor_position);
    let attrs = CharAttributes::from_bits_retain(msg.attributes);
    screen.buffer.set_attributes(attrs);
    screen.buffer.set_default_text_attributes(attrs);
    screen.buffer.set_window_rect(msg.window_rect);
    Ok(success(msg.encode(), Vec::new()))
}

pub(crate) fn set_cursor_position(
    state: &mut ServerState,
    ctx: &RequestCtx,
    descriptor: &[u8],
) -> CommResult<HandlerOutcome> {
    let Some(msg) = CursorPositionMsg::decode(descriptor) else {
        return Ok(invalid_parameter());
    };
    if !state.validate_handle(ctx.object, ctx.process, HandleKind::Output) {
        return Ok(invalid_handle());
    }
    let screen_id = state.handles[&ctx.object].screen.expect("output handle");
    let screen = state.screens.get_mut(&screen_id).expect("bound screen");

    let size = screen.buffer.size();
    let pos = msg.position;
    if pos.x < 0 || pos.y < 0 || pos.x >= size.x || pos.y >= size.y {
        return Ok(invalid_parameter());
    }
    screen.buffer.set_cursor_position(pos);
    Ok(success(msg.encode(), Vec::new()))
}

pub(crate) fn set_text_attribute(
    state: &mut ServerState,
    ctx: &RequestCtx,
    descriptor: &[u8],
) -> CommResult<HandlerOutcome> {
    let Some(msg) = TextAttributeMsg::decode(descriptor) else {
        return Ok(invalid_parameter());
    };
    if !state.validate_handle(ctx.object, ctx.process, HandleKind::Output) {
        return Ok(invalid_handle());
    }
    let screen_id = state.handles[&ctx.object].screen.expect("output handle");
    let screen = state.screens.get_mut(&screen_id).expect("bound screen");

    let attrs = CharAttributes::from_bits_retain(msg.attributes);
    screen.buffer.set_attributes(attrs);
    screen.buffer.set_default_text_attributes(attrs);
    Ok(success(msg.encode(), Vec::new()))
}

pub(crate) fn get_cursor_info(
    state: &mut ServerState,
    ctx: &RequestCtx,
    descriptor: &[u8],
) -> CommResult<HandlerOutcome> {
    let Some(mut msg) = CursorInfoMsg::decode(descriptor) else {
        return Ok(invalid_parameter());
    };
    if !state.validate_handle(ctx.object, ctx.process, HandleKind::Output) {
        return Ok(invalid_handle());
    }
    let screen_id = state.handles[&ctx.object].screen.expect("output handle");
    let screen = &state.screens[&screen_id];

    msg.size = screen.buffer.cursor_size();
    msg.visible = screen.buffer.cursor_visible();
    Ok(success(msg.encode(), Vec::new()))
}

pub(crate) fn set_cursor_info(
    state: &mut ServerState,
    ctx: &RequestCtx,
    descriptor: &[u8],
) -> CommResult<HandlerOutcome> {
    let Some(msg) = CursorInfoMsg::decode(descriptor) else {
        return Ok(invalid_parameter());
    };
    if !state.validate_handle(ctx.object, ctx.process, HandleKind::Output) {
        return Ok(invalid_handle());
    }
    if msg.size == 0 || msg.size > 100 {
        return Ok(invalid_parameter());
    }
    let screen_id = state.handles[&ctx.object].screen.expect("output handle");
    let screen = state.screens.get_mut(&screen_id).expect("bound screen");

    screen.buffer.set_cursor_size(msg.size);
    screen.buffer.set_cursor_visible(msg.visible);
    Ok(success(msg.encode(), Vec::new()))
}

pub(crate) fn get_largest_window_size(
    state: &mut ServerState,
    ctx: &RequestCtx,
    descriptor: &[u8],
) -> CommResult<HandlerOutcome> {
    let Some(mut msg) = ScreenBufferSizeMsg::decode(descriptor) else {
        return Ok(invalid_parameter());
    };
    if !state.validate_handle(ctx.object, ctx.process, HandleKind::Output) {
        return Ok(invalid_handle());
    }
    let screen_id = state.handles[&ctx.object].screen.expect("output handle");
    msg.size = state.screens[&screen_id].buffer.max_window();
    Ok(success(msg.encode(), Vec::new()))
}

pub(crate) fn set_window_info(
    state: &mut ServerState,
    ctx: &RequestCtx,
    descriptor: &[u8],
) -> CommResult<HandlerOutcome> {
    let Some(msg) = WindowInfoMsg::decode(descriptor) else {
        return Ok(invalid_parameter());
    };
    if !state.validate_handle(ctx.object, ctx.process, HandleKind::Output) {
        return Ok(invalid_handle());
    }
    let screen_id = state.handles[&ctx.object].screen.expect("output handle");
    let screen = state.screens.get_mut(&screen_id).expect("bound screen");

    let rect = if msg.absolute {
        msg.window
    } else {
        let current = screen.buffer.window_rect();
        SmallRect::new(
            current.left + msg.window.left,
            current.top + msg.window.top,
            current.right + msg.window.right,
            current.bottom + msg.window.bottom,
        )
    };
    if !screen.buffer.set_window_rect(rect) {
        return Ok(invalid_parameter());
    }
    Ok(success(msg.encode(), Vec::new()))
}

pub(crate) fn set_active_screen_buffer(
    state: &mut ServerState,
    ctx: &RequestCtx,
    descriptor: &[u8],
) -> CommResult<HandlerOutcome> {
    if !state.validate_handle(ctx.object, ctx.process, HandleKind::Output) {
        return Ok(invalid_handle());
    }
    let screen_id = state.handles[&ctx.object].screen.expect("output handle");
    state.active_screen = screen_id;
    debug!("Active screen buffer is now {}", screen_id);
    Ok(success(descriptor.to_vec(), Vec::new()))
}

// --- modes, code pages, titles ---------------------------------------------

pub(crate) fn get_mode(
    state: &mut ServerState,
    ctx: &RequestCtx,
    descriptor: &[u8],
) -> CommResult<HandlerOutcome> {
    let Some(mut msg) = ModeMsg::decode(descriptor) else {
        return Ok(invalid_parameter());
    };
    let Some(handle) = state.handles.get(&ctx.object) else {
        return Ok(invalid_handle());
    };
    if !state.validate_handle(ctx.object, ctx.process, handle.kind) {
        return Ok(invalid_handle());
    }
    msg.mode = match handle.kind {
        HandleKind::Input => state.input_mode.bits(),
        HandleKind::Output => state.output_mode.bits(),
    };
    Ok(success(msg.encode(), Vec::new()))
}

pub(crate) fn set_mode(
    state: &mut ServerState,
    ctx: &RequestCtx,
    descriptor: &[u8],
) -> CommResult<HandlerOutcome> {
    let Some(msg) = ModeMsg::decode(descriptor) else {
        return Ok(invalid_parameter());
    };
    let Some(handle) = state.handles.get(&ctx.object) else {
        return Ok(invalid_handle());
    };
    let kind = handle.kind;
    if !state.validate_handle(ctx.object, ctx.process, kind) {
        return Ok(invalid_handle());
    }
    match kind {
        HandleKind::Input => state.set_input_mode(msg.mode),
        HandleKind::Output => {
            state.set_output_mode(msg.mode);
            let mode = state.output_mode;
            let screen_id = state.handles[&ctx.object].screen.expect("output handle");
            let screen = state.screens.get_mut(&screen_id).expect("bound screen");
            screen
                .buffer
                .set_newline_auto_return(!mode.contains(OutputMode::DISABLE_NEWLINE_AUTO_RETURN));
            screen
                .buffer
                .set_autowrap(mode.contains(OutputMode::WRAP_AT_EOL_OUTPUT));
        }
    }
    Ok(success(msg.encode(), Vec::new()))
}

pub(crate) fn get_cp(
    state: &mut ServerState,
    ctx: &RequestCtx,
    descriptor: &[u8],
) -> CommResult<HandlerOutcome> {
    let Some(mut msg) = CodePageMsg::decode(descriptor) else {
        return Ok(invalid_parameter());
    };
    let _ = ctx;
    msg.code_page = if msg.output != 0 {
        state.output_code_page()
    } else {
        state.input_code_page()
    };
    Ok(success(msg.encode(), Vec::new()))
}

pub(crate) fn set_cp(
    state: &mut ServerState,
    ctx: &RequestCtx,
    descriptor: &[u8],
) -> CommResult<HandlerOutcome> {
    let Some(msg) = CodePageMsg::decode(descriptor) else {
        return Ok(invalid_parameter());
    };
    let _ = ctx;
    if msg.code_page == 0 {
        return Ok(invalid_parameter());
    }
    if msg.output != 0 {
        state.set_output_code_page(msg.code_page);
    } else {
        state.set_input_code_page(msg.code_page);
    }
    Ok(success(msg.encode(), Vec::new()))
}

pub(crate) fn get_lang_id(
    state: &mut ServerState,
    ctx: &RequestCtx,
    descriptor: &[u8],
) -> CommResult<HandlerOutcome> {
    let Some(mut msg) = LangIdMsg::decode(descriptor) else {
        return Ok(invalid_parameter());
    };
    let _ = ctx;
    msg.lang_id = match state.output_code_page() {
        932 => 0x0411,
        936 => 0x0804,
        949 => 0x0412,
        950 => 0x0404,
        _ => 0,
    };
    Ok(success(msg.encode(), Vec::new()))
}

pub(crate) fn get_title(
    state: &mut ServerState,
    ctx: &RequestCtx,
    descriptor: &[u8],
) -> CommResult<HandlerOutcome> {
    let Some(mut msg) = TitleMsg::decode(descriptor) else {
        return Ok(invalid_parameter());
    };
    let output_cp = state.output_code_page;
    let title = if msg.original {
        state.original_title().to_string()
    } else {
        state.title().to_string()
    };

    let mut bytes = encode_wire_string(&title, msg.unicode, output_cp);
    let mut limit = ctx.output_budget;
    if msg.unicode {
        limit &= !1;
    }
    bytes.truncate(limit);
    msg.length = bytes.len() as u32;
    Ok(success(msg.encode(), bytes))
}

pub(crate) fn set_title(
    state: &mut ServerState,
    ctx: &RequestCtx,
    descriptor: &[u8],
    payload: &[u8],
) -> CommResult<HandlerOutcome> {
    let Some(msg) = TitleMsg::decode(descriptor) else {
        return Ok(invalid_parameter());
    };
    let _ = ctx;
    let output_cp = state.output_code_page;
    let length = (msg.length as usize).min(payload.len());
    let title = decode_wire_string(&payload[..length], msg.unicode, output_cp);
    state.set_title(title);
    Ok(success(msg.encode(), Vec::new()))
}

// --- aliases ----------------------------------------------------------------

pub(crate) fn add_alias(
    state: &mut ServerState,
    ctx: &RequestCtx,
    descriptor: &[u8],
    payload: &[u8],
) -> CommResult<HandlerOutcome> {
    let Some(msg) = AliasMsg::decode(descriptor) else {
        return Ok(invalid_parameter());
    };
    let _ = ctx;
    let source_len = msg.source_length as usize;
    let target_len = msg.target_length as usize;
    let exe_len = msg.exe_length as usize;
    if source_len == 0 || exe_len == 0 || source_len + target_len + exe_len > payload.len() {
        return Ok(invalid_parameter());
    }

    let input_cp = state.input_code_page;
    let source = decode_wire_string(&payload[..source_len], msg.unicode, input_cp);
    let target = decode_wire_string(
        &payload[source_len..source_len + target_len],
        msg.unicode,
        input_cp,
    );
    let exe = decode_wire_string(
        &payload[source_len + target_len..source_len + target_len + exe_len],
        msg.unicode,
        input_cp,
    );

    state.aliases_mut().add(&exe, &source, &target);
    Ok(success(msg.encode(), Vec::new()))
}

pub(crate) fn get_alias(
    state: &mut ServerState,
    ctx: &RequestCtx,
    descriptor: &[u8],
    payload: &[u8],
) -> CommResult<HandlerOutcome> {
    let Some(mut msg) = AliasMsg::decode(descriptor) else {
        return Ok(invalid_parameter());
    };
    let source_len = msg.source_length as usize;
    let exe_len = msg.exe_length as usize;
    if source_len == 0 || exe_len == 0 || source_len + exe_len > payload.len() {
        return Ok(invalid_parameter());
    }

    let input_cp = state.input_code_page;
    let source = decode_wire_string(&payload[..source_len], msg.unicode, input_cp);
    let exe = decode_wire_string(&payload[source_len..source_len + exe_len], msg.unicode, input_cp);

    let Some(target) = state.aliases().get(&exe, &source) else {
        return Ok(fail(Status::Unsuccessful));
    };

    // Serialized form carries the terminator
    let mut terminated = target.to_string();
    terminated.push('\0');
    let bytes = encode_wire_string(&terminated, msg.unicode, input_cp);

    let capacity = (msg.target_length as usize).min(ctx.output_budget);
    if bytes.len() > capacity {
        return Ok(fail(Status::BufferTooSmall));
    }

    msg.target_length = bytes.len() as u16;
    Ok(success(msg.encode(), bytes))
}

pub(crate) fn get_aliases_length(
    state: &mut ServerState,
    ctx: &RequestCtx,
    descriptor: &[u8],
    payload: &[u8],
) -> CommResult<HandlerOutcome> {
    let Some(mut msg) = AliasesMsg::decode(descriptor) else {
        return Ok(invalid_parameter());
    };
    let _ = ctx;
    let input_cp = state.input_code_page;
    let exe = decode_wire_string(payload, msg.unicode, input_cp);
    let units = state.aliases().aliases_length(&exe);
    msg.length = (units * if msg.unicode { 2 } else { 1 }) as u32;
    Ok(success(msg.encode(), Vec::new()))
}

pub(crate) fn get_aliases(
    state: &mut ServerState,
    ctx: &RequestCtx,
    descriptor: &[u8],
    payload: &[u8],
) -> CommResult<HandlerOutcome> {
    let Some(mut msg) = AliasesMsg::decode(descriptor) else {
        return Ok(invalid_parameter());
    };
    let input_cp = state.input_code_page;
    let exe = decode_wire_string(payload, msg.unicode, input_cp);
    let units = state.aliases().serialize_aliases(&exe);

    let bytes = if msg.unicode {
        units_to_le_bytes(&units)
    } else {
        let (encoded, _) = codec::encode_units(input_cp, &units, usize::MAX);
        encoded
    };

    let capacity = (msg.length as usize).min(ctx.output_budget);
    if bytes.len() > capacity {
        return Ok(fail(Status::BufferTooSmall));
    }

    msg.length = bytes.len() as u32;
    Ok(success(msg.encode(), bytes))
}

pub(crate) fn get_alias_exes_length(
    state: &mut ServerState,
    ctx: &RequestCtx,
    descriptor: &[u8],
) -> CommResult<HandlerOutcome> {
    let Some(mut msg) = AliasesMsg::decode(descriptor) else {
        return Ok(invalid_parameter());
    };
    let _ = ctx;
    let units = state.aliases().exes_length();
    msg.length = (units * if msg.unicode { 2 } else { 1 }) as u32;
    Ok(success(msg.encode(), Vec::new()))
}

pub(crate) fn get_alias_exes(
    state: &mut ServerState,
    ctx: &RequestCtx,
    descriptor: &[u8],
) -> CommResult<HandlerOutcome> {
    let Some(mut msg) = AliasesMsg::decode(descriptor) else {
        return Ok(invalid_parameter());
    };
    let input_cp = state.input_code_page;
    let units = state.aliases().serialize_exes();

    let bytes = if msg.unicode {
        units_to_le_bytes(&units)
    } else {
        let (encoded, _) = codec::encode_units(input_cp, &units, usize::MAX);
        encoded
    };

    let capacity = (msg.length as usize).min(ctx.output_budget);
    if bytes.len() > capacity {
        return Ok(fail(Status::BufferTooSmall));
    }

    msg.length = bytes.len() as u32;
    Ok(success(msg.encode(), bytes))
}
