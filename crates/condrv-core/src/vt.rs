//! VT output interpreter: applies parsed output events to a screen buffer.
//!
//! The interpreter consumes UTF-16 units from WriteConsole (and the line
//! editor's echo). With virtual-terminal processing enabled the units run
//! through the `vte` state machine; without it only the classic control
//! bytes (CR, LF, BS, HT) keep their meaning and everything else prints.

use condrv_common::traits::{
    ControlByte, CsiSequence, EraseScope, EscSequence, HostIo, OscSequence, OutputEvent,
    SgrAttribute, SgrColor, TerminalMode,
};
use condrv_common::types::{color_channels, CharAttributes, ColorRef, Coord};
use condrv_parser::VtParser;
use tracing::{debug, trace};

use crate::codec;
use crate::screen::ScreenBuffer;

const TAB_WIDTH: i16 = 8;

/// Stateful interpreter bound to one screen buffer's output stream.
/// Parser state persists across writes so split sequences resume.
pub struct Interpreter {
    parser: VtParser,
    title_change: Option<String>,
}

impl Interpreter {
    pub fn new() -> Self {
        Self {
            parser: VtParser::new(),
            title_change: None,
        }
    }

    /// Title set by an OSC in the most recent write, if any
    pub fn take_title_change(&mut self) -> Option<String> {
        self.title_change.take()
    }

    /// Write UTF-16 units at the cursor. `vt_enabled` reflects
    /// ENABLE_VIRTUAL_TERMINAL_PROCESSING on the owning output handle.
    pub fn write_units<H: HostIo>(
        &mut self,
        buffer: &mut ScreenBuffer,
        units: &[u16],
        vt_enabled: bool,
        host: &mut H,
    ) {
        let text: String = char::decode_utf16(units.iter().copied())
            .map(|r| r.unwrap_or(char::REPLACEMENT_CHARACTER))
            .collect();

        if !vt_enabled {
            self.write_degraded(buffer, &text);
            return;
        }

        // C1 controls arrive as single code points; the byte-level state
        // machine only sees their ESC-prefixed aliases, so rewrite them.
        let mut bytes = Vec::with_capacity(text.len());
        for ch in text.chars() {
            let code = ch as u32;
            if (0x80..=0x9F).contains(&code) {
                bytes.push(0x1B);
                bytes.push((code - 0x40) as u8);
            } else {
                let mut utf8 = [0u8; 4];
                bytes.extend_from_slice(ch.encode_utf8(&mut utf8).as_bytes());
            }
        }

        for event in self.parser.parse(&bytes) {
            self.apply_event(buffer, event, host);
        }
    }

    /// Convenience for server-generated echo text
    pub fn write_str<H: HostIo>(&mut self, buffer: &mut ScreenBuffer, text: &str, host: &mut H) {
        let units: Vec<u16> = text.encode_utf16().collect();
        self.write_units(buffer, &units, true, host);
    }

    /// Classic console path: CR, LF, BS, HT act; everything else prints
    fn write_degraded(&mut self, buffer: &mut ScreenBuffer, text: &str) {
        for ch in text.chars() {
            match ch {
                '\r' => self.carriage_return(buffer),
                '\n' => {
                    let auto_return = buffer.newline_auto_return();
                    self.line_feed(buffer, auto_return);
                }
                '\x08' => self.cursor_back(buffer, 1),
                '\t' => self.tab(buffer),
                _ => self.print_char(buffer, ch),
            }
        }
    }

    fn apply_event<H: HostIo>(
        &mut self,
        buffer: &mut ScreenBuffer,
        event: OutputEvent,
        host: &mut H,
    ) {
        trace!("Applying output event: {:?}", event);
        match event {
            OutputEvent::Text(text) => {
                for ch in text.chars() {
                    self.print_char(buffer, ch);
                }
            }
            OutputEvent::Control(control) => self.apply_control(buffer, control),
            OutputEvent::Csi(csi) => self.apply_csi(buffer, csi, host),
            OutputEvent::Esc(esc) => self.apply_esc(buffer, esc),
            OutputEvent::Osc(OscSequence::SetTitle(title)) => {
                self.title_change = Some(title);
            }
        }
    }

    fn apply_control(&mut self, buffer: &mut ScreenBuffer, control: ControlByte) {
        match control {
            ControlByte::Bell => {}
            ControlByte::Backspace => self.cursor_back(buffer, 1),
            ControlByte::Tab => self.tab(buffer),
            ControlByte::LineFeed | ControlByte::VerticalTab | ControlByte::FormFeed => {
                let auto_return = buffer.newline_auto_return();
                self.line_feed(buffer, auto_return);
            }
            ControlByte::CarriageReturn => self.carriage_return(buffer),
        }
    }

    // --- printing ---------------------------------------------------------

    fn print_char(&mut self, buffer: &mut ScreenBuffer, ch: char) {
        for unit in codec::units_of_char(ch) {
            self.print_unit(buffer, unit);
        }
    }

    fn print_unit(&mut self, buffer: &mut ScreenBuffer, unit: u16) {
        if buffer.delayed_wrap() && buffer.autowrap() {
            // Consume the latch: first column of the next row, scrolling
            // the region when the cursor sits on the bottom margin
            let pos = buffer.cursor_position();
            let (_, bottom) = buffer.margins();
            if pos.y == bottom {
                buffer.scroll_region_up(1);
                buffer.set_cursor_position(Coord::new(0, pos.y));
            } else {
                buffer.set_cursor_position(Coord::new(0, (pos.y + 1).min(buffer.height() - 1)));
            }
        }

        let pos = buffer.cursor_position();
        if buffer.insert_mode() {
            buffer.insert_chars(pos, 1);
        }
        let attrs = buffer.attributes();
        buffer.write_cell(pos, unit, attrs);

        if pos.x == buffer.width() - 1 {
            if buffer.autowrap() {
                buffer.set_delayed_wrap(true);
            }
        } else {
            buffer.set_cursor_position(Coord::new(pos.x + 1, pos.y));
        }
    }

    fn carriage_return(&mut self, buffer: &mut ScreenBuffer) {
        let pos = buffer.cursor_position();
        buffer.set_cursor_position(Coord::new(0, pos.y));
    }

    /// LF; `auto_return` additionally resets the column (CRLF coupling)
    fn line_feed(&mut self, buffer: &mut ScreenBuffer, auto_return: bool) {
        let pos = buffer.cursor_position();
        let (_, bottom) = buffer.margins();
        let x = if auto_return { 0 } else { pos.x };
        if pos.y == bottom {
            buffer.scroll_region_up(1);
            buffer.set_cursor_position(Coord::new(x, pos.y));
        } else {
            buffer.set_cursor_position(Coord::new(x, (pos.y + 1).min(buffer.height() - 1)));
        }
    }

    fn reverse_line_feed(&mut self, buffer: &mut ScreenBuffer) {
        let pos = buffer.cursor_position();
        let (top, _) = buffer.margins();
        if pos.y == top {
            buffer.scroll_region_down(1);
            buffer.set_cursor_position(pos);
        } else {
            buffer.set_cursor_position(Coord::new(pos.x, (pos.y - 1).max(0)));
        }
    }

    fn tab(&mut self, buffer: &mut ScreenBuffer) {
        let pos = buffer.cursor_position();
        let next = ((pos.x / TAB_WIDTH) + 1) * TAB_WIDTH;
        buffer.set_cursor_position(Coord::new(next.min(buffer.width() - 1), pos.y));
    }

    // --- cursor motion ----------------------------------------------------

    fn cursor_up(&mut self, buffer: &mut ScreenBuffer, count: u16) {
        let pos = buffer.cursor_position();
        let (top, _) = buffer.margins();
        let floor = if pos.y >= top { top } else { 0 };
        let y = (i32::from(pos.y) - i32::from(count)).max(i32::from(floor));
        buffer.set_cursor_position(Coord::new(pos.x, y as i16));
    }

    fn cursor_down(&mut self, buffer: &mut ScreenBuffer, count: u16) {
        let pos = buffer.cursor_position();
        let (_, bottom) = buffer.margins();
        let ceiling = if pos.y <= bottom {
            bottom
        } else {
            buffer.height() - 1
        };
        let y = (i32::from(pos.y) + i32::from(count)).min(i32::from(ceiling));
        buffer.set_cursor_position(Coord::new(pos.x, y as i16));
    }

    fn cursor_forward(&mut self, buffer: &mut ScreenBuffer, count: u16) {
        let pos = buffer.cursor_position();
        let x = (i32::from(pos.x) + i32::from(count)).min(i32::from(buffer.width() - 1));
        buffer.set_cursor_position(Coord::new(x as i16, pos.y));
    }

    fn cursor_back(&mut self, buffer: &mut ScreenBuffer, count: u16) {
        let pos = buffer.cursor_position();
        let x = (i32::from(pos.x) - i32::from(count)).max(0);
        buffer.set_cursor_position(Coord::new(x as i16, pos.y));
    }

    /// CUP/HVP; 1-based, row relative to the top margin under DECOM
    fn cursor_position(&mut self, buffer: &mut ScreenBuffer, row: u16, col: u16) {
        let (top, bottom) = buffer.margins();
        let y = if buffer.origin_mode() {
            (i32::from(top) + i32::from(row) - 1).clamp(i32::from(top), i32::from(bottom))
        } else {
            (i32::from(row) - 1).clamp(0, i32::from(buffer.height() - 1))
        };
        let x = (i32::from(col) - 1).clamp(0, i32::from(buffer.width() - 1));
        buffer.set_cursor_position(Coord::new(x as i16, y as i16));
    }

    fn cursor_home(&mut self, buffer: &mut ScreenBuffer) {
        let (top, _) = buffer.margins();
        let y = if buffer.origin_mode() { top } else { 0 };
        buffer.set_cursor_position(Coord::new(0, y));
    }

    // --- CSI dispatch -----------------------------------------------------

    fn apply_csi<H: HostIo>(&mut self, buffer: &mut ScreenBuffer, csi: CsiSequence, host: &mut H) {
        match csi {
            CsiSequence::CursorUp(n) => self.cursor_up(buffer, n),
            CsiSequence::CursorDown(n) => self.cursor_down(buffer, n),
            CsiSequence::CursorForward(n) => self.cursor_forward(buffer, n),
            CsiSequence::CursorBack(n) => self.cursor_back(buffer, n),
            CsiSequence::CursorNextLine(n) => {
                self.cursor_down(buffer, n);
                self.carriage_return(buffer);
            }
            CsiSequence::CursorPreviousLine(n) => {
                self.cursor_up(buffer, n);
                self.carriage_return(buffer);
            }
            CsiSequence::CursorColumn(col) => {
                let pos = buffer.cursor_position();
                let x = (i32::from(col) - 1).clamp(0, i32::from(buffer.width() - 1));
                buffer.set_cursor_position(Coord::new(x as i16, pos.y));
            }
            CsiSequence::CursorPosition { row, col } => self.cursor_position(buffer, row, col),

            CsiSequence::EraseDisplay(scope) => self.erase_display(buffer, scope),
            CsiSequence::EraseLine(scope) => self.erase_line(buffer, scope),

            CsiSequence::InsertLines(n) => {
                let pos = buffer.cursor_position();
                buffer.insert_lines(pos.y, clamp_count(n));
            }
            CsiSequence::DeleteLines(n) => {
                let pos = buffer.cursor_position();
                buffer.delete_lines(pos.y, clamp_count(n));
            }
            CsiSequence::ScrollUp(n) => buffer.scroll_region_up(clamp_count(n)),
            CsiSequence::ScrollDown(n) => buffer.scroll_region_down(clamp_count(n)),
            CsiSequence::InsertChars(n) => {
                let pos = buffer.cursor_position();
                buffer.insert_chars(pos, clamp_count(n));
            }
            CsiSequence::DeleteChars(n) => {
                let pos = buffer.cursor_position();
                buffer.delete_chars(pos, clamp_count(n));
            }
            CsiSequence::EraseChars(n) => {
                let pos = buffer.cursor_position();
                buffer.erase_chars(pos, clamp_count(n));
            }

            CsiSequence::SetGraphicsRendition(attrs) => self.apply_sgr(buffer, &attrs),

            CsiSequence::SetMode(modes) => {
                for mode in modes {
                    self.set_mode(buffer, mode, true);
                }
            }
            CsiSequence::ResetMode(modes) => {
                for mode in modes {
                    self.set_mode(buffer, mode, false);
                }
            }

            CsiSequence::SetScrollRegion { top, bottom } => {
                let top = if top == 0 { 1 } else { top } as i16;
                let bottom = if bottom == 0 {
                    buffer.height()
                } else {
                    (bottom as i16).min(buffer.height())
                };
                let region = if top == 1 && bottom == buffer.height() {
                    None
                } else {
                    Some((top - 1, bottom - 1))
                };
                if buffer.set_scroll_region(region) {
                    self.cursor_home(buffer);
                }
            }

            CsiSequence::SaveCursor => buffer.save_cursor(),
            CsiSequence::RestoreCursor => buffer.restore_cursor(),

            CsiSequence::SoftReset => {
                buffer.set_insert_mode(false);
                buffer.set_origin_mode(false);
                buffer.set_autowrap(true);
                let defaults = buffer.default_text_attributes();
                buffer.set_attributes(defaults);
                buffer.set_scroll_region(None);
                buffer.reset_saved_cursor();
                buffer.set_cursor_visible(true);
            }

            CsiSequence::DeviceStatusReport(kind) => {
                if kind == 6 {
                    self.report_cursor_position(buffer, host);
                } else {
                    debug!("Ignoring DSR {}", kind);
                }
            }
        }
    }

    /// DSR-CPR: answer `ESC [ r ; c R` into the input stream, 1-based and
    /// margin-relative under DECOM. Dropped when queries are unanswered.
    fn report_cursor_position<H: HostIo>(&mut self, buffer: &ScreenBuffer, host: &mut H) {
        if !host.vt_should_answer_queries() {
            return;
        }
        let pos = buffer.cursor_position();
        let (top, _) = buffer.margins();
        let row = if buffer.origin_mode() {
            pos.y - top + 1
        } else {
            pos.y + 1
        };
        let response = format!("\x1b[{};{}R", row, pos.x + 1);
        if !host.inject_input_bytes(response.as_bytes()) {
            debug!("Host refused DSR-CPR injection");
        }
    }

    fn apply_esc(&mut self, buffer: &mut ScreenBuffer, esc: EscSequence) {
        match esc {
            EscSequence::Index => self.line_feed(buffer, false),
            EscSequence::NextLine => self.line_feed(buffer, true),
            EscSequence::ReverseIndex => self.reverse_line_feed(buffer),
            EscSequence::SaveCursor => buffer.save_cursor(),
            EscSequence::RestoreCursor => buffer.restore_cursor(),
            EscSequence::Reset => buffer.reset(),
            EscSequence::ScreenAlignmentTest => self.screen_alignment_test(buffer),
            EscSequence::DesignateCharset(designator, charset) => {
                if designator == b'(' {
                    buffer.set_charset(charset);
                }
            }
        }
    }

    /// DECALN: fill with `E`, drop margins and origin, clear the rendition
    /// bits, cursor home
    fn screen_alignment_test(&mut self, buffer: &mut ScreenBuffer) {
        let defaults = buffer.default_text_attributes();
        let total = buffer.width() as usize * buffer.height() as usize;
        buffer.fill_characters(Coord::new(0, 0), u16::from(b'E'), total);
        buffer.fill_attributes(Coord::new(0, 0), defaults, total);
        buffer.set_scroll_region(None);
        buffer.set_origin_mode(false);
        let attrs = buffer.attributes()
            & !(CharAttributes::REVERSE_VIDEO | CharAttributes::UNDERSCORE);
        buffer.set_attributes(attrs);
        buffer.set_cursor_position(Coord::new(0, 0));
    }

    fn erase_display(&mut self, buffer: &mut ScreenBuffer, scope: EraseScope) {
        let attrs = buffer.attributes();
        let pos = buffer.cursor_position();
        let width = buffer.width() as usize;
        let total = width * buffer.height() as usize;
        let cursor_index = pos.y as usize * width + pos.x as usize;
        match scope {
            EraseScope::ToEnd => {
                buffer.fill_characters(pos, u16::from(b' '), total - cursor_index);
                buffer.fill_attributes(pos, attrs, total - cursor_index);
            }
            EraseScope::ToStart => {
                buffer.fill_characters(Coord::new(0, 0), u16::from(b' '), cursor_index + 1);
                buffer.fill_attributes(Coord::new(0, 0), attrs, cursor_index + 1);
            }
            EraseScope::All => {
                buffer.fill_characters(Coord::new(0, 0), u16::from(b' '), total);
                buffer.fill_attributes(Coord::new(0, 0), attrs, total);
            }
            // No scrollback in this model
            EraseScope::Scrollback => {}
        }
    }

    fn erase_line(&mut self, buffer: &mut ScreenBuffer, scope: EraseScope) {
        let attrs = buffer.attributes();
        let pos = buffer.cursor_position();
        let width = buffer.width();
        let (start, count) = match scope {
            EraseScope::ToEnd => (pos, (width - pos.x) as usize),
            EraseScope::ToStart => (Coord::new(0, pos.y), pos.x as usize + 1),
            EraseScope::All | EraseScope::Scrollback => (Coord::new(0, pos.y), width as usize),
        };
        buffer.fill_characters(start, u16::from(b' '), count);
        buffer.fill_attributes(start, attrs, count);
    }

    fn set_mode(&mut self, buffer: &mut ScreenBuffer, mode: TerminalMode, enabled: bool) {
        match mode {
            TerminalMode::Insert => buffer.set_insert_mode(enabled),
            TerminalMode::AutoWrap => buffer.set_autowrap(enabled),
            TerminalMode::ShowCursor => buffer.set_cursor_visible(enabled),
            TerminalMode::Origin => {
                buffer.set_origin_mode(enabled);
                self.cursor_home(buffer);
            }
            TerminalMode::AlternateScreen => {
                if enabled {
                    buffer.enter_alt_screen();
                } else {
                    buffer.exit_alt_screen();
                }
            }
            TerminalMode::AlternateScreenClear => {
                if enabled {
                    buffer.enter_alt_cells();
                } else {
                    buffer.exit_alt_cells();
                }
            }
            TerminalMode::SaveCursorForAlt => {
                if enabled {
                    buffer.save_cursor();
                } else {
                    buffer.restore_cursor();
                }
            }
        }
    }

    // --- SGR ---------------------------------------------------------------

    fn apply_sgr(&mut self, buffer: &mut ScreenBuffer, attrs: &[SgrAttribute]) {
        let defaults = buffer.default_text_attributes();
        let table = buffer.color_table();
        let mut current = buffer.attributes();

        for attr in attrs {
            match *attr {
                SgrAttribute::Reset => current = defaults,
                SgrAttribute::Bold => current |= CharAttributes::FG_INTENSITY,
                SgrAttribute::NoBold => current &= !CharAttributes::FG_INTENSITY,
                SgrAttribute::Underline => current |= CharAttributes::UNDERSCORE,
                SgrAttribute::NoUnderline => current &= !CharAttributes::UNDERSCORE,
                SgrAttribute::Reverse => current |= CharAttributes::REVERSE_VIDEO,
                SgrAttribute::NoReverse => current &= !CharAttributes::REVERSE_VIDEO,
                SgrAttribute::Foreground(color) => {
                    let index = Self::palette_index(color, defaults.foreground_index(), &table);
                    current = current.with_foreground_index(index as u16);
                }
                SgrAttribute::Background(color) => {
                    let index = Self::palette_index(color, defaults.background_index(), &table);
                    current = current.with_background_index(index as u16);
                }
            }
        }

        buffer.set_attributes(current);
    }

    /// Resolve an SGR color operand to a 0..16 palette index. Normal
    /// variants clear the intensity bit; bright variants set it.
    fn palette_index(color: SgrColor, default_index: usize, table: &[ColorRef; 16]) -> usize {
        match color {
            SgrColor::Basic(n) => ansi_to_attr_index(n) as usize,
            SgrColor::Bright(n) => ansi_to_attr_index(n) as usize | 0x8,
            SgrColor::Indexed(n) => match n {
                0..=7 => ansi_to_attr_index(n) as usize,
                8..=15 => ansi_to_attr_index(n - 8) as usize | 0x8,
                _ => {
                    let (r, g, b) = xterm_cube_color(n);
                    nearest_palette_index(table, r, g, b)
                }
            },
            SgrColor::Rgb(r, g, b) => nearest_palette_index(table, r, g, b),
            SgrColor::Default => default_index,
        }
    }
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new()
    }
}

fn clamp_count(n: u16) -> i16 {
    n.min(i16::MAX as u16) as i16
}

/// ANSI color order keeps red in bit 0; the attribute nibble keeps blue
/// there. Swap the outer bits.
fn ansi_to_attr_index(n: u8) -> u8 {
    ((n & 0x1) << 2) | (n & 0x2) | ((n & 0x4) >> 2)
}

/// RGB of an xterm 256-palette index above the basic 16
fn xterm_cube_color(index: u8) -> (u8, u8, u8) {
    if index >= 232 {
        let gray = 8 + 10 * (index - 232);
        (gray, gray, gray)
    } else {
        let value = index - 16;
        let channel = |v: u8| if v == 0 { 0 } else { 55 + 40 * v };
        (
            channel(value / 36),
            channel((value / 6) % 6),
            channel(value % 6),
        )
    }
}

/// Nearest palette entry by Euclidean RGB distance
fn nearest_palette_index(table: &[ColorRef; 16], r: u8, g: u8, b: u8) -> usize {
    let mut best = 0;
    let mut best_distance = u32::MAX;
    for (index, &entry) in table.iter().enumerate() {
        let (er, eg, eb) = color_channels(entry);
        let dr = i32::from(er) - i32::from(r);
        let dg = i32::from(eg) - i32::from(g);
        let db = i32::from(eb) - i32::from(b);
        let distance = (dr * dr + dg * dg + db * db) as u32;
        if distance < best_distance {
            best_distance = distance;
            best = index;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use condrv_common::error::CommResult;
    use condrv_common::types::DEFAULT_COLOR_TABLE;

    /// Minimal host that records injected input
    #[derive(Default)]
    struct TestHost {
        injected: Vec<u8>,
        answer_queries: bool,
    }

    impl HostIo for TestHost {
        fn write_output_bytes(&mut self, bytes: &[u8]) -> CommResult<usize> {
            Ok(bytes.len())
        }
        fn read_input_bytes(&mut self, _dest: &mut [u8]) -> CommResult<usize> {
            Ok(0)
        }
        fn peek_input_bytes(&mut self, _dest: &mut [u8]) -> CommResult<usize> {
            Ok(0)
        }
        fn input_bytes_available(&self) -> usize {
            0
        }
        fn inject_input_bytes(&mut self, bytes: &[u8]) -> bool {
            self.injected.extend_from_slice(bytes);
            true
        }
        fn flush_input_buffer(&mut self) -> CommResult<()> {
            Ok(())
        }
        fn vt_should_answer_queries(&self) -> bool {
            self.answer_queries
        }
        fn wait_for_input(&mut self, _timeout_ms: u32) -> CommResult<bool> {
            Ok(false)
        }
        fn input_disconnected(&self) -> bool {
            false
        }
        fn send_end_task(&mut self, _pid: u32, _event: u32, _flags: u32) -> CommResult<()> {
            Ok(())
        }
    }

    fn write(interp: &mut Interpreter, buffer: &mut ScreenBuffer, text: &str, host: &mut TestHost) {
        let units: Vec<u16> = text.encode_utf16().collect();
        interp.write_units(buffer, &units, true, host);
    }

    fn row_text(buffer: &ScreenBuffer, y: i16, len: usize) -> String {
        let units = buffer.read_output_characters(Coord::new(0, y), len);
        String::from_utf16_lossy(&units)
    }

    #[test]
    fn test_plain_text_advances_cursor() {
        let mut interp = Interpreter::new();
        let mut buffer = ScreenBuffer::new(Coord::new(20, 5));
        let mut host = TestHost::default();

        write(&mut interp, &mut buffer, "Hi", &mut host);
        assert_eq!(row_text(&buffer, 0, 2), "Hi");
        assert_eq!(buffer.cursor_position(), Coord::new(2, 0));
    }

    #[test]
    fn test_delayed_wrap_holds_until_next_printable() {
        let mut interp = Interpreter::new();
        let mut buffer = ScreenBuffer::new(Coord::new(3, 3));
        let mut host = TestHost::default();

        write(&mut interp, &mut buffer, "abc", &mut host);
        // The cursor stays in the last column, latch set
        assert_eq!(buffer.cursor_position(), Coord::new(2, 0));
        assert!(buffer.delayed_wrap());

        write(&mut interp, &mut buffer, "d", &mut host);
        assert_eq!(row_text(&buffer, 1, 1), "d");
        assert_eq!(buffer.cursor_position(), Coord::new(1, 1));
    }

    #[test]
    fn test_cr_after_last_column_stays_on_row() {
        let mut interp = Interpreter::new();
        let mut buffer = ScreenBuffer::new(Coord::new(3, 3));
        let mut host = TestHost::default();

        write(&mut interp, &mut buffer, "abc\rZ", &mut host);
        assert_eq!(row_text(&buffer, 0, 3), "Zbc");
        assert_eq!(buffer.cursor_position(), Coord::new(1, 0));
    }

    #[test]
    fn test_cup_and_erase_display() {
        let mut interp = Interpreter::new();
        let mut buffer = ScreenBuffer::new(Coord::new(10, 4));
        let mut host = TestHost::default();

        write(&mut interp, &mut buffer, "AAAA\r\nBBBB", &mut host);
        write(&mut interp, &mut buffer, "\x1b[1;1H\x1b[0J", &mut host);
        assert_eq!(row_text(&buffer, 0, 4), "    ");
        assert_eq!(row_text(&buffer, 1, 4), "    ");
        // ED does not move the cursor
        assert_eq!(buffer.cursor_position(), Coord::new(0, 0));
    }

    #[test]
    fn test_erase_line_scopes() {
        let mut interp = Interpreter::new();
        let mut buffer = ScreenBuffer::new(Coord::new(6, 2));
        let mut host = TestHost::default();

        write(&mut interp, &mut buffer, "abcdef", &mut host);
        write(&mut interp, &mut buffer, "\x1b[1;3H\x1b[1K", &mut host);
        assert_eq!(row_text(&buffer, 0, 6), "   def");

        write(&mut interp, &mut buffer, "\x1b[0K", &mut host);
        assert_eq!(row_text(&buffer, 0, 6), "      ");
    }

    #[test]
    fn test_scroll_region_confines_linefeed() {
        let mut interp = Interpreter::new();
        let mut buffer = ScreenBuffer::new(Coord::new(2, 4));
        let mut host = TestHost::default();

        for (y, ch) in ["A", "B", "C", "D"].iter().enumerate() {
            write(
                &mut interp,
                &mut buffer,
                &format!("\x1b[{};1H{}", y + 1, ch),
                &mut host,
            );
        }

        // Region rows 2..3 (1-based); cursor lands at its top
        write(&mut interp, &mut buffer, "\x1b[2;3r", &mut host);
        assert_eq!(buffer.cursor_position(), Coord::new(0, 0));

        write(&mut interp, &mut buffer, "\x1b[3;1H\n", &mut host);
        assert_eq!(row_text(&buffer, 0, 1), "A");
        assert_eq!(row_text(&buffer, 1, 1), "C");
        assert_eq!(row_text(&buffer, 2, 1), " ");
        assert_eq!(row_text(&buffer, 3, 1), "D");
    }

    #[test]
    fn test_origin_mode_addresses_relative_to_margin() {
        let mut interp = Interpreter::new();
        let mut buffer = ScreenBuffer::new(Coord::new(10, 6));
        let mut host = TestHost::default();

        write(&mut interp, &mut buffer, "\x1b[3;5r\x1b[?6h", &mut host);
        write(&mut interp, &mut buffer, "\x1b[1;1HX", &mut host);
        assert_eq!(row_text(&buffer, 2, 1), "X");

        // Rows clamp inside the margins under DECOM
        write(&mut interp, &mut buffer, "\x1b[9;1HY", &mut host);
        assert_eq!(row_text(&buffer, 4, 1), "Y");
    }

    #[test]
    fn test_decsc_decrc_round_trip() {
        let mut interp = Interpreter::new();
        let mut buffer = ScreenBuffer::new(Coord::new(10, 4));
        let mut host = TestHost::default();

        write(&mut interp, &mut buffer, "\x1b[2;3H\x1b[7m\x1b7", &mut host);
        write(&mut interp, &mut buffer, "\x1b[0m\x1b[4;1H", &mut host);
        write(&mut interp, &mut buffer, "\x1b8", &mut host);

        assert_eq!(buffer.cursor_position(), Coord::new(2, 1));
        assert!(buffer.attributes().contains(CharAttributes::REVERSE_VIDEO));
    }

    #[test]
    fn test_ris_is_idempotent() {
        let mut interp = Interpreter::new();
        let mut buffer = ScreenBuffer::new(Coord::new(8, 4));
        let mut host = TestHost::default();

        write(&mut interp, &mut buffer, "junk\x1b[7m\x1b[2;4r", &mut host);
        write(&mut interp, &mut buffer, "\x1bc", &mut host);
        let once = (
            buffer.cursor_position(),
            buffer.attributes(),
            buffer.scroll_region(),
            row_text(&buffer, 0, 8),
        );

        write(&mut interp, &mut buffer, "\x1bc", &mut host);
        let twice = (
            buffer.cursor_position(),
            buffer.attributes(),
            buffer.scroll_region(),
            row_text(&buffer, 0, 8),
        );
        assert_eq!(once, twice);
        assert_eq!(once.0, Coord::new(0, 0));
    }

    #[test]
    fn test_sgr_reverse_underline_and_clears() {
        let mut interp = Interpreter::new();
        let mut buffer = ScreenBuffer::new(Coord::new(10, 2));
        let mut host = TestHost::default();

        write(&mut interp, &mut buffer, "A\x1b[7mB\x1b[27mC", &mut host);
        let attrs = buffer.read_output_attributes(Coord::new(0, 0), 3);
        assert_eq!(attrs[0], 0x07);
        assert_eq!(attrs[1], 0x07 | CharAttributes::REVERSE_VIDEO.bits());
        assert_eq!(attrs[2], 0x07);

        write(&mut interp, &mut buffer, "\x1b[4mU\x1b[24m", &mut host);
        let attrs = buffer.read_output_attributes(Coord::new(3, 0), 1);
        assert_eq!(attrs[0], 0x07 | CharAttributes::UNDERSCORE.bits());
    }

    #[test]
    fn test_sgr_basic_and_bright_colors() {
        let mut interp = Interpreter::new();
        let mut buffer = ScreenBuffer::new(Coord::new(10, 2));
        let mut host = TestHost::default();

        // ANSI red maps to the attribute red bit
        write(&mut interp, &mut buffer, "\x1b[31mX", &mut host);
        assert_eq!(buffer.attributes().foreground_index(), 0x4);

        write(&mut interp, &mut buffer, "\x1b[94mX", &mut host);
        assert_eq!(buffer.attributes().foreground_index(), 0x9);

        // Dropping back to the normal variant clears the intensity bit
        write(&mut interp, &mut buffer, "\x1b[34mX", &mut host);
        assert_eq!(buffer.attributes().foreground_index(), 0x1);

        write(&mut interp, &mut buffer, "\x1b[103mX", &mut host);
        assert_eq!(buffer.attributes().background_index(), 0xE);
        write(&mut interp, &mut buffer, "\x1b[43mX", &mut host);
        assert_eq!(buffer.attributes().background_index(), 0x6);
    }

    #[test]
    fn test_sgr_truecolor_maps_to_nearest_palette_entry() {
        let mut interp = Interpreter::new();
        let mut buffer = ScreenBuffer::new(Coord::new(10, 2));
        let mut host = TestHost::default();

        write(&mut interp, &mut buffer, "\x1b[38;2;250;5;5mX", &mut host);
        // Bright red in the default table
        assert_eq!(buffer.attributes().foreground_index(), 0xC);

        write(&mut interp, &mut buffer, "\x1b[38;5;196mX", &mut host);
        assert_eq!(buffer.attributes().foreground_index(), 0xC);

        write(&mut interp, &mut buffer, "\x1b[38;5;12mX", &mut host);
        assert_eq!(buffer.attributes().foreground_index(), 0x9);
    }

    #[test]
    fn test_alternate_buffer_1049() {
        let mut interp = Interpreter::new();
        let mut buffer = ScreenBuffer::new(Coord::new(6, 3));
        let mut host = TestHost::default();

        write(&mut interp, &mut buffer, "A\x1b[2;3H", &mut host);
        write(&mut interp, &mut buffer, "\x1b[?1049h", &mut host);
        assert_eq!(buffer.cursor_position(), Coord::new(0, 0));
        write(&mut interp, &mut buffer, "B", &mut host);
        assert_eq!(row_text(&buffer, 0, 1), "B");

        write(&mut interp, &mut buffer, "\x1b[?1049l", &mut host);
        assert_eq!(row_text(&buffer, 0, 1), "A");
        assert_eq!(buffer.cursor_position(), Coord::new(2, 1));
        write(&mut interp, &mut buffer, "C", &mut host);
        let units = buffer.read_output_characters(Coord::new(2, 1), 1);
        assert_eq!(units[0], u16::from(b'C'));
    }

    #[test]
    fn test_dsr_cpr_injects_answer() {
        let mut interp = Interpreter::new();
        let mut buffer = ScreenBuffer::new(Coord::new(10, 4));
        let mut host = TestHost {
            answer_queries: true,
            ..Default::default()
        };

        write(&mut interp, &mut buffer, "A\x1b[6nB", &mut host);
        assert_eq!(host.injected, b"\x1b[1;2R");

        // With queries off the report is dropped
        let mut silent = TestHost::default();
        write(&mut interp, &mut buffer, "\x1b[6n", &mut silent);
        assert!(silent.injected.is_empty());
    }

    #[test]
    fn test_decaln_fills_with_e() {
        let mut interp = Interpreter::new();
        let mut buffer = ScreenBuffer::new(Coord::new(4, 2));
        let mut host = TestHost::default();

        write(&mut interp, &mut buffer, "\x1b[2;2r\x1b#8", &mut host);
        assert_eq!(row_text(&buffer, 0, 4), "EEEE");
        assert_eq!(row_text(&buffer, 1, 4), "EEEE");
        assert_eq!(buffer.scroll_region(), None);
        assert_eq!(buffer.cursor_position(), Coord::new(0, 0));
    }

    #[test]
    fn test_insert_mode_shifts_row() {
        let mut interp = Interpreter::new();
        let mut buffer = ScreenBuffer::new(Coord::new(6, 2));
        let mut host = TestHost::default();

        write(&mut interp, &mut buffer, "abcd\x1b[1;1H\x1b[4hXY", &mut host);
        assert_eq!(row_text(&buffer, 0, 6), "XYabcd");
        write(&mut interp, &mut buffer, "\x1b[4l", &mut host);
        assert!(!buffer.insert_mode());
    }

    #[test]
    fn test_osc_title_is_surfaced() {
        let mut interp = Interpreter::new();
        let mut buffer = ScreenBuffer::new(Coord::new(6, 2));
        let mut host = TestHost::default();

        write(&mut interp, &mut buffer, "\x1b]2;hello\x07", &mut host);
        assert_eq!(interp.take_title_change(), Some("hello".to_string()));
        assert_eq!(interp.take_title_change(), None);
    }

    #[test]
    fn test_degraded_mode_prints_escapes_verbatim() {
        let mut interp = Interpreter::new();
        let mut buffer = ScreenBuffer::new(Coord::new(10, 2));
        let mut host = TestHost::default();

        let units: Vec<u16> = "a\x1b[1mb".encode_utf16().collect();
        interp.write_units(&mut buffer, &units, false, &mut host);

        let row = buffer.read_output_characters(Coord::new(0, 0), 6);
        assert_eq!(row[0], u16::from(b'a'));
        assert_eq!(row[1], 0x1B);
        assert_eq!(row[2], u16::from(b'['));
        assert_eq!(row[3], u16::from(b'1'));
        assert_eq!(row[4], u16::from(b'm'));
        assert_eq!(row[5], u16::from(b'b'));
    }

    #[test]
    fn test_newline_auto_return_gates_column_reset() {
        let mut interp = Interpreter::new();
        let mut buffer = ScreenBuffer::new(Coord::new(10, 4));
        let mut host = TestHost::default();

        write(&mut interp, &mut buffer, "ab\n", &mut host);
        assert_eq!(buffer.cursor_position(), Coord::new(0, 1));

        buffer.set_newline_auto_return(false);
        write(&mut interp, &mut buffer, "cd\n", &mut host);
        assert_eq!(buffer.cursor_position(), Coord::new(2, 2));
    }

    #[test]
    fn test_nearest_palette_helpers() {
        assert_eq!(ansi_to_attr_index(1), 0x4);
        assert_eq!(ansi_to_attr_index(4), 0x1);
        assert_eq!(ansi_to_attr_index(3), 0x6);

        let idx = nearest_palette_index(&DEFAULT_COLOR_TABLE, 255, 255, 255);
        assert_eq!(idx, 15);
        let idx = nearest_palette_index(&DEFAULT_COLOR_TABLE, 10, 10, 10);
        assert_eq!(idx, 0);

        assert_eq!(xterm_cube_color(196), (255, 0, 0));
        assert_eq!(xterm_cube_color(232), (8, 8, 8));
    }
}
