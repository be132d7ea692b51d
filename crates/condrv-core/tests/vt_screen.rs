//! End-to-end VT scenarios driven through WriteConsole dispatch: SGR
//! attribute mapping, the alternate buffer, DSR-CPR answers, and the
//! delayed-wrap latch.

mod common;

use common::*;
use condrv_common::traits::HostIo;
use condrv_common::types::{Coord, Status};
use condrv_core::server::wire::*;
use condrv_core::{dispatch_message, ApiMessage, ServerState};

fn setup_vt(pid: u32) -> (ServerState, StrictHost, ConnectionInformation) {
    let mut state = ServerState::new();
    let mut host = StrictHost::default();
    let info = connect(&mut state, &mut host, pid, pid + 1);
    state.set_input_code_page(65001);
    state.set_input_mode(0);
    // processed + wrap + virtual terminal processing
    state.set_output_mode(0x0007);
    (state, host, info)
}

fn write_text(
    state: &mut ServerState,
    host: &mut StrictHost,
    info: &ConnectionInformation,
    identifier: u64,
    text: &str,
) {
    let payload = utf16_bytes(text);
    let msg = WriteConsoleMsg {
        num_bytes: payload.len() as u32,
        unicode: true,
    };
    let (mut comm, descriptor) = user_defined(
        identifier,
        info.process,
        info.output,
        ApiNumber::WriteConsole,
        &msg.encode(),
        &payload,
        0,
    );
    let mut message = ApiMessage::new(&mut comm, descriptor);
    let outcome = dispatch_message(state, &mut message, host).expect("write dispatch");
    assert!(!outcome.reply_pending);
    assert_eq!(message.completion().io_status.status, Status::Success);
}

fn read_attrs(
    state: &mut ServerState,
    host: &mut StrictHost,
    info: &ConnectionInformation,
    identifier: u64,
    coord: Coord,
    count: usize,
) -> Vec<u16> {
    let msg = OutputStringMsg {
        coord,
        string_type: CONSOLE_ATTRIBUTE,
        num_records: count as u32,
    };
    let (mut comm, descriptor) = user_defined(
        identifier,
        info.process,
        info.output,
        ApiNumber::ReadConsoleOutputString,
        &msg.encode(),
        &[],
        count * 2,
    );
    let mut message = ApiMessage::new(&mut comm, descriptor);
    dispatch_message(state, &mut message, host).expect("read attrs");
    drop(message);
    le_units(&comm.output[OutputStringMsg::SIZE..])
}

fn read_chars(
    state: &mut ServerState,
    host: &mut StrictHost,
    info: &ConnectionInformation,
    identifier: u64,
    coord: Coord,
    count: usize,
) -> String {
    let msg = OutputStringMsg {
        coord,
        string_type: CONSOLE_REAL_UNICODE,
        num_records: count as u32,
    };
    let (mut comm, descriptor) = user_defined(
        identifier,
        info.process,
        info.output,
        ApiNumber::ReadConsoleOutputString,
        &msg.encode(),
        &[],
        count * 2,
    );
    let mut message = ApiMessage::new(&mut comm, descriptor);
    dispatch_message(state, &mut message, host).expect("read chars");
    drop(message);
    String::from_utf16_lossy(&le_units(&comm.output[OutputStringMsg::SIZE..]))
}

#[test]
fn test_sgr_reverse_video_attribute_mapping() {
    let (mut state, mut host, info) = setup_vt(2001);

    write_text(&mut state, &mut host, &info, 700, "A\x1b[7mB\x1b[27mC");

    let attrs = read_attrs(&mut state, &mut host, &info, 701, Coord::new(0, 0), 3);
    assert_eq!(attrs, vec![0x07, 0x07 | 0x4000, 0x07]);
}

#[test]
fn test_sgr_underline_and_truecolor() {
    let (mut state, mut host, info) = setup_vt(2002);

    write_text(
        &mut state,
        &mut host,
        &info,
        710,
        "\x1b[4;38;2;250;5;5mX\x1b[0mY",
    );

    let attrs = read_attrs(&mut state, &mut host, &info, 711, Coord::new(0, 0), 2);
    // Bright red foreground with the underscore bit, then defaults
    assert_eq!(attrs[0], 0x0C | 0x8000);
    assert_eq!(attrs[1], 0x07);
}

#[test]
fn test_alternate_buffer_1049_round_trip() {
    let (mut state, mut host, info) = setup_vt(2003);

    write_text(&mut state, &mut host, &info, 720, "A\x1b[2;3H");
    write_text(&mut state, &mut host, &info, 721, "\x1b[?1049hB");
    assert_eq!(
        read_chars(&mut state, &mut host, &info, 722, Coord::new(0, 0), 1),
        "B"
    );

    write_text(&mut state, &mut host, &info, 723, "\x1b[?1049lC");
    assert_eq!(
        read_chars(&mut state, &mut host, &info, 724, Coord::new(0, 0), 1),
        "A"
    );
    assert_eq!(
        read_chars(&mut state, &mut host, &info, 725, Coord::new(2, 1), 1),
        "C"
    );
}

#[test]
fn test_dsr_cpr_answer_is_readable_from_input() {
    let (mut state, mut host, info) = setup_vt(2004);
    host.answer_queries = true;

    write_text(&mut state, &mut host, &info, 730, "A\x1b[6nB");

    // The report entered the host input stream; a raw read returns it
    let mut comm = MemoryComm::default();
    let descriptor = IoDescriptor {
        identifier: 731,
        function: CONSOLE_IO_RAW_READ,
        process: info.process,
        object: info.input,
        input_size: 0,
        output_size: 16,
    };
    let mut message = ApiMessage::new(&mut comm, descriptor);
    let outcome = dispatch_message(&mut state, &mut message, &mut host).unwrap();
    assert!(!outcome.reply_pending);
    assert_eq!(message.completion().io_status.information, 6);
    drop(message);
    assert_eq!(comm.output, b"\x1b[1;2R".to_vec());
}

#[test]
fn test_dsr_cpr_dropped_when_queries_unanswered() {
    let (mut state, mut host, info) = setup_vt(2005);
    host.answer_queries = false;

    write_text(&mut state, &mut host, &info, 740, "\x1b[6n");
    assert_eq!(host.input_bytes_available(), 0);
}

#[test]
fn test_delayed_wrap_cr_keeps_next_printable_on_same_row() {
    let (mut state, mut host, info) = setup_vt(2006);

    // Shrink the buffer so the last column is nearby
    let msg = ScreenBufferSizeMsg {
        size: Coord::new(4, 5),
    };
    let (mut comm, descriptor) = user_defined(
        750,
        info.process,
        info.output,
        ApiNumber::SetScreenBufferSize,
        &msg.encode(),
        &[],
        0,
    );
    let mut message = ApiMessage::new(&mut comm, descriptor);
    dispatch_message(&mut state, &mut message, &mut host).unwrap();
    drop(message);

    write_text(&mut state, &mut host, &info, 751, "abcd\rZ");
    assert_eq!(
        read_chars(&mut state, &mut host, &info, 752, Coord::new(0, 0), 4),
        "Zbcd"
    );
    assert_eq!(
        read_chars(&mut state, &mut host, &info, 753, Coord::new(0, 1), 1),
        " "
    );
}

#[test]
fn test_osc_title_reaches_get_title() {
    let (mut state, mut host, info) = setup_vt(2007);

    write_text(&mut state, &mut host, &info, 760, "\x1b]2;osc title\x07");

    let msg = TitleMsg {
        length: 0,
        unicode: true,
        original: false,
    };
    let (mut comm, descriptor) = user_defined(
        761,
        info.process,
        info.output,
        ApiNumber::GetTitle,
        &msg.encode(),
        &[],
        64,
    );
    let mut message = ApiMessage::new(&mut comm, descriptor);
    dispatch_message(&mut state, &mut message, &mut host).unwrap();
    drop(message);

    let out = TitleMsg::decode(&comm.output[..TitleMsg::SIZE]).unwrap();
    let units = le_units(&comm.output[TitleMsg::SIZE..TitleMsg::SIZE + out.length as usize]);
    assert_eq!(String::from_utf16_lossy(&units), "osc title");
}

#[test]
fn test_vt_writes_forward_to_renderer() {
    let (mut state, mut host, info) = setup_vt(2008);

    write_text(&mut state, &mut host, &info, 770, "plain");
    assert_eq!(host.written, b"plain".to_vec());
}

#[test]
fn test_ris_resets_screen_and_modes_idempotently() {
    let (mut state, mut host, info) = setup_vt(2009);

    write_text(&mut state, &mut host, &info, 780, "junk\x1b[7m\x1b[2;4r");
    write_text(&mut state, &mut host, &info, 781, "\x1bc");
    let after_once = read_chars(&mut state, &mut host, &info, 782, Coord::new(0, 0), 4);
    assert_eq!(after_once, "    ");

    write_text(&mut state, &mut host, &info, 783, "\x1bc");
    let after_twice = read_chars(&mut state, &mut host, &info, 784, Coord::new(0, 0), 4);
    assert_eq!(after_once, after_twice);

    let buffer = &state.active_screen().buffer;
    assert_eq!(buffer.cursor_position(), Coord::new(0, 0));
    assert_eq!(buffer.scroll_region(), None);
    assert_eq!(buffer.attributes().bits(), 0x07);
}
