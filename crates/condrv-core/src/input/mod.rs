//! Per-handle input state and the record pump.
//!
//! Host bytes drain into a per-handle pending buffer, strictly consumed
//! from the front. The pump classifies the front of that buffer into
//! input records, applying processed-input control semantics (Ctrl+C,
//! Ctrl+Break) as a side effect.

use std::collections::VecDeque;

use condrv_common::error::CommResult;
use condrv_common::traits::HostIo;
use condrv_common::types::{
    vk, InputMode, InputRecord, KeyEventRecord, CONSOLE_CTRL_BREAK_FLAG, CONSOLE_CTRL_C_FLAG,
    CTRL_BREAK_EVENT, CTRL_C_EVENT,
};
use condrv_parser::input::{classify, InputSeq};
use tracing::{debug, trace};

use crate::codec::{self, CodePage, Decoded};

pub mod editor;

pub use editor::{LineEditor, LineEvent};

/// Mutable state owned by one input handle
#[derive(Debug, Default)]
pub struct InputHandle {
    /// Decoded records waiting for a reader
    pub records: VecDeque<InputRecord>,
    /// Bytes drained from the host but not yet decodable
    pub pending_input_bytes: VecDeque<u8>,
    /// Low surrogate awaiting delivery after a split pair
    pub pending_wchar: Option<u16>,
    /// Cooked read in progress, parked between dispatches
    pub pending_line: Option<LineEditor>,
    /// Completed cooked line that outgrew the caller's buffer
    pub delivery_tail: VecDeque<u16>,
}

impl InputHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop all transient state (handle close, queue flush)
    pub fn reset(&mut self) {
        self.records.clear();
        self.pending_input_bytes.clear();
        self.pending_wchar = None;
        self.pending_line = None;
        self.delivery_tail.clear();
    }

    /// Discard leading records that cannot yield a character for a
    /// ReadConsole-style reader (key-ups, arrow keys, mouse events)
    pub fn skip_non_text_records(&mut self) {
        while let Some(front) = self.records.front() {
            let keep = matches!(
                front,
                InputRecord::Key(key) if key.key_down && key.unicode_char != 0
            );
            if keep {
                break;
            }
            trace!("Discarding non-text input record {:?}", front);
            self.records.pop_front();
        }
    }

    /// Character unit at the front of the queue, if any
    pub fn front_char_unit(&mut self) -> Option<u16> {
        self.skip_non_text_records();
        self.records.front().and_then(|record| match record {
            InputRecord::Key(key) => Some(key.unicode_char),
            _ => None,
        })
    }

    /// Consume one character unit, honoring repeat counts
    pub fn pop_char_unit(&mut self) -> Option<u16> {
        self.skip_non_text_records();
        match self.records.front_mut() {
            Some(InputRecord::Key(key)) => {
                let unit = key.unicode_char;
                if key.repeat_count > 1 {
                    key.repeat_count -= 1;
                } else {
                    self.records.pop_front();
                }
                Some(unit)
            }
            _ => None,
        }
    }
}

/// Control events observed while pumping
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PumpReport {
    pub saw_ctrl_c: bool,
    pub saw_ctrl_break: bool,
}

/// Drain every available host byte into the handle, then decode as many
/// complete records as the pending buffer holds. Split sequences stay
/// pending; filtered sequences vanish; processed-input Ctrl+C and
/// Ctrl+Break fire their side effects here.
pub fn pump_input<H: HostIo>(
    handle: &mut InputHandle,
    code_page: CodePage,
    mode: InputMode,
    process_id: u32,
    host: &mut H,
) -> CommResult<PumpReport> {
    let available = host.input_bytes_available();
    if available > 0 {
        let mut incoming = vec![0u8; available];
        let copied = host.read_input_bytes(&mut incoming)?;
        handle.pending_input_bytes.extend(&incoming[..copied]);
        trace!("Drained {} host bytes", copied);
    }

    let processed = mode.contains(InputMode::PROCESSED_INPUT);
    let mut report = PumpReport::default();

    loop {
        let bytes = handle.pending_input_bytes.make_contiguous();
        if bytes.is_empty() {
            break;
        }

        match classify(bytes) {
            InputSeq::Incomplete => break,
            InputSeq::Ignored { consumed } => {
                debug!("Dropping filtered input sequence ({} bytes)", consumed);
                drain(handle, consumed);
            }
            InputSeq::Passthrough { consumed } => {
                // DSR answers reach the reader as their literal bytes
                for _ in 0..consumed {
                    let byte = handle.pending_input_bytes.pop_front().expect("classified");
                    handle
                        .records
                        .push_back(InputRecord::Key(KeyEventRecord::from_char_unit(u16::from(
                            byte,
                        ))));
                }
            }
            InputSeq::Win32Key { consumed, key } => {
                drain(handle, consumed);
                if handle_control(&key, processed, process_id, host, &mut report)? {
                    if report.saw_ctrl_break {
                        flush_queue(handle, host)?;
                        break;
                    }
                    continue;
                }
                handle.records.push_back(InputRecord::Key(key));
            }
            InputSeq::NotSequence => {
                if bytes[0] == 0x1B {
                    // Escape key on its own
                    drain(handle, 1);
                    handle
                        .records
                        .push_back(InputRecord::Key(KeyEventRecord::from_char_unit(0x1B)));
                    continue;
                }
                match codec::decode_one(code_page, bytes) {
                    Decoded::Incomplete => break,
                    Decoded::Scalar(ch, len) => {
                        drain(handle, len);
                        if processed && ch == '\x03' {
                            debug!("Ctrl+C byte consumed from input stream");
                            host.send_end_task(process_id, CTRL_C_EVENT, CONSOLE_CTRL_C_FLAG)?;
                            report.saw_ctrl_c = true;
                            continue;
                        }
                        for unit in codec::units_of_char(ch) {
                            handle
                                .records
                                .push_back(InputRecord::Key(KeyEventRecord::from_char_unit(unit)));
                        }
                    }
                }
            }
        }
    }

    Ok(report)
}

/// Apply processed-input semantics to a decoded win32 key record.
/// Returns true when the record was consumed by a control action.
fn handle_control<H: HostIo>(
    key: &KeyEventRecord,
    processed: bool,
    process_id: u32,
    host: &mut H,
    report: &mut PumpReport,
) -> CommResult<bool> {
    if !processed || !key.key_down {
        return Ok(false);
    }

    if key.control_key_state.ctrl_pressed() && key.virtual_key_code == vk::VK_CANCEL {
        debug!("Ctrl+Break record consumed from input stream");
        host.send_end_task(process_id, CTRL_BREAK_EVENT, CONSOLE_CTRL_BREAK_FLAG)?;
        report.saw_ctrl_break = true;
        return Ok(true);
    }

    if key.unicode_char == 0x03 {
        debug!("Ctrl+C record consumed from input stream");
        host.send_end_task(process_id, CTRL_C_EVENT, CONSOLE_CTRL_C_FLAG)?;
        report.saw_ctrl_c = true;
        return Ok(true);
    }

    Ok(false)
}

/// Ctrl+Break empties both the local queue and the host's buffer
fn flush_queue<H: HostIo>(handle: &mut InputHandle, host: &mut H) -> CommResult<()> {
    handle.records.clear();
    handle.pending_input_bytes.clear();
    handle.delivery_tail.clear();
    handle.pending_wchar = None;
    host.flush_input_buffer()
}

fn drain(handle: &mut InputHandle, count: usize) {
    for _ in 0..count {
        handle.pending_input_bytes.pop_front();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use condrv_common::error::CommResult;

    #[derive(Default)]
    struct QueueHost {
        queue: Vec<u8>,
        offset: usize,
        flushed: bool,
        end_tasks: Vec<(u32, u32, u32)>,
    }

    impl QueueHost {
        fn with_bytes(bytes: &[u8]) -> Self {
            Self {
                queue: bytes.to_vec(),
                ..Default::default()
            }
        }
    }

    impl HostIo for QueueHost {
        fn write_output_bytes(&mut self, bytes: &[u8]) -> CommResult<usize> {
            Ok(bytes.len())
        }
        fn read_input_bytes(&mut self, dest: &mut [u8]) -> CommResult<usize> {
            let remaining = self.queue.len() - self.offset;
            let copied = remaining.min(dest.len());
            dest[..copied].copy_from_slice(&self.queue[self.offset..self.offset + copied]);
            self.offset += copied;
            Ok(copied)
        }
        fn peek_input_bytes(&mut self, dest: &mut [u8]) -> CommResult<usize> {
            let remaining = self.queue.len() - self.offset;
            let copied = remaining.min(dest.len());
            dest[..copied].copy_from_slice(&self.queue[self.offset..self.offset + copied]);
            Ok(copied)
        }
        fn input_bytes_available(&self) -> usize {
            self.queue.len() - self.offset
        }
        fn inject_input_bytes(&mut self, bytes: &[u8]) -> bool {
            self.queue.extend_from_slice(bytes);
            true
        }
        fn flush_input_buffer(&mut self) -> CommResult<()> {
            self.queue.clear();
            self.offset = 0;
            self.flushed = true;
            Ok(())
        }
        fn vt_should_answer_queries(&self) -> bool {
            true
        }
        fn wait_for_input(&mut self, _timeout_ms: u32) -> CommResult<bool> {
            Ok(false)
        }
        fn input_disconnected(&self) -> bool {
            false
        }
        fn send_end_task(&mut self, pid: u32, event: u32, flags: u32) -> CommResult<()> {
            self.end_tasks.push((pid, event, flags));
            Ok(())
        }
    }

    fn pump(handle: &mut InputHandle, host: &mut QueueHost, mode: InputMode) -> PumpReport {
        pump_input(handle, CodePage::utf8(), mode, 42, host).unwrap()
    }

    #[test]
    fn test_plain_bytes_become_key_records() {
        let mut handle = InputHandle::new();
        let mut host = QueueHost::with_bytes(b"ab");
        pump(&mut handle, &mut host, InputMode::empty());

        assert_eq!(handle.records.len(), 2);
        assert_eq!(handle.pop_char_unit(), Some(u16::from(b'a')));
        assert_eq!(handle.pop_char_unit(), Some(u16::from(b'b')));
        assert_eq!(handle.pop_char_unit(), None);
    }

    #[test]
    fn test_split_utf8_stays_pending() {
        let mut handle = InputHandle::new();
        let mut host = QueueHost::with_bytes(&[0xC3]);
        pump(&mut handle, &mut host, InputMode::empty());

        assert!(handle.records.is_empty());
        assert_eq!(handle.pending_input_bytes.len(), 1);
        assert_eq!(host.input_bytes_available(), 0);

        host.queue.push(0xA9);
        pump(&mut handle, &mut host, InputMode::empty());
        assert!(handle.pending_input_bytes.is_empty());
        assert_eq!(handle.pop_char_unit(), Some(0x00E9));
    }

    #[test]
    fn test_win32_sequence_decodes_to_one_record() {
        let mut handle = InputHandle::new();
        let mut host = QueueHost::with_bytes(b"\x1b[65;0;97;1;0;1_");
        pump(&mut handle, &mut host, InputMode::empty());

        assert_eq!(handle.records.len(), 1);
        match handle.records.front().unwrap() {
            InputRecord::Key(key) => {
                assert_eq!(key.virtual_key_code, 65);
                assert_eq!(key.unicode_char, u16::from(b'a'));
            }
            other => panic!("Unexpected record {:?}", other),
        }
    }

    #[test]
    fn test_filtered_sequences_are_consumed() {
        let mut handle = InputHandle::new();
        let mut host = QueueHost::with_bytes(b"\x1b[?62;c\x1b[I\x1b[O\x1b[Ax");
        pump(&mut handle, &mut host, InputMode::empty());

        assert_eq!(handle.records.len(), 1);
        assert_eq!(handle.pop_char_unit(), Some(u16::from(b'x')));
        assert!(handle.pending_input_bytes.is_empty());
    }

    #[test]
    fn test_ctrl_c_byte_fires_end_task_and_is_dropped() {
        let mut handle = InputHandle::new();
        let mut host = QueueHost::with_bytes(&[0x58, 0x03, 0x59]);
        let report = pump(&mut handle, &mut host, InputMode::PROCESSED_INPUT);

        assert!(report.saw_ctrl_c);
        assert_eq!(host.end_tasks, vec![(42, CTRL_C_EVENT, CONSOLE_CTRL_C_FLAG)]);
        assert_eq!(handle.pop_char_unit(), Some(u16::from(b'X')));
        assert_eq!(handle.pop_char_unit(), Some(u16::from(b'Y')));
        assert_eq!(handle.pop_char_unit(), None);
    }

    #[test]
    fn test_ctrl_c_passes_through_without_processed_input() {
        let mut handle = InputHandle::new();
        let mut host = QueueHost::with_bytes(&[0x03]);
        let report = pump(&mut handle, &mut host, InputMode::empty());

        assert!(!report.saw_ctrl_c);
        assert!(host.end_tasks.is_empty());
        assert_eq!(handle.pop_char_unit(), Some(0x03));
    }

    #[test]
    fn test_ctrl_break_flushes_queue() {
        let mut handle = InputHandle::new();
        let mut host = QueueHost::with_bytes(b"AB\x1b[3;0;0;1;8;1_CD");
        let report = pump(&mut handle, &mut host, InputMode::PROCESSED_INPUT);

        assert!(report.saw_ctrl_break);
        assert!(host.flushed);
        assert!(handle.records.is_empty());
        assert!(handle.pending_input_bytes.is_empty());
        assert_eq!(
            host.end_tasks,
            vec![(42, CTRL_BREAK_EVENT, CONSOLE_CTRL_BREAK_FLAG)]
        );
    }

    #[test]
    fn test_cursor_position_report_delivered_byte_for_byte() {
        let mut handle = InputHandle::new();
        let mut host = QueueHost::with_bytes(b"\x1b[1;2R");
        pump(&mut handle, &mut host, InputMode::empty());

        let mut delivered = Vec::new();
        while let Some(unit) = handle.pop_char_unit() {
            delivered.push(unit as u8);
        }
        assert_eq!(delivered, b"\x1b[1;2R".to_vec());
    }

    #[test]
    fn test_repeat_count_expands_on_pop() {
        let mut handle = InputHandle::new();
        let mut host = QueueHost::with_bytes(b"\x1b[65;0;97;1;0;3_");
        pump(&mut handle, &mut host, InputMode::empty());

        assert_eq!(handle.pop_char_unit(), Some(u16::from(b'a')));
        assert_eq!(handle.pop_char_unit(), Some(u16::from(b'a')));
        assert_eq!(handle.pop_char_unit(), Some(u16::from(b'a')));
        assert_eq!(handle.pop_char_unit(), None);
    }

    #[test]
    fn test_arrow_records_are_skipped_for_text_readers() {
        let mut handle = InputHandle::new();
        let mut host = QueueHost::with_bytes(b"\x1b[38;0;0;1;0;1_\x1b[65;0;97;1;0;1_");
        pump(&mut handle, &mut host, InputMode::empty());

        assert_eq!(handle.records.len(), 2);
        assert_eq!(handle.pop_char_unit(), Some(u16::from(b'a')));
        assert!(handle.records.is_empty());
    }
}
