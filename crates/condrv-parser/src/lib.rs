use condrv_common::traits::{
    ControlByte, CsiSequence, EraseScope, EscSequence, OscSequence, OutputEvent, SgrAttribute,
    SgrColor, TerminalMode,
};
use tracing::{debug, trace};
use vte::{Params, Parser, Perform};

pub mod input;

/// VTE-based ANSI/VT parser for the console's outbound text stream
pub struct VtParser {
    parser: Parser,
    performer: EventCollector,
}

impl VtParser {
    pub fn new() -> Self {
        Self {
            parser: Parser::new(),
            performer: EventCollector::new(),
        }
    }

    /// Feed bytes through the state machine and return the events they
    /// completed. Partial sequences stay latched inside the state machine
    /// until later calls finish them.
    pub fn parse(&mut self, data: &[u8]) -> Vec<OutputEvent> {
        self.performer.events.clear();

        for &byte in data {
            self.parser.advance(&mut self.performer, byte);
        }

        self.performer.flush_text();
        std::mem::take(&mut self.performer.events)
    }
}

impl Default for VtParser {
    fn default() -> Self {
        Self::new()
    }
}

/// VTE performer that translates callbacks into typed output events
struct EventCollector {
    events: Vec<OutputEvent>,
    current_text: String,
}

impl EventCollector {
    fn new() -> Self {
        Self {
            events: Vec::new(),
            current_text: String::new(),
        }
    }

    /// Flush any accumulated text as a Text event
    fn flush_text(&mut self) {
        if !self.current_text.is_empty() {
            let text = std::mem::take(&mut self.current_text);
            self.events.push(OutputEvent::Text(text));
        }
    }

    /// Single numeric parameter with a default, treating 0 as absent
    fn get_param(&self, params: &Params, index: usize, default: u16) -> u16 {
        params
            .iter()
            .nth(index)
            .map(|p| p[0])
            .filter(|&v| v > 0)
            .unwrap_or(default)
    }

    /// Raw numeric parameter where 0 is meaningful (ED/EL, DECSTBM)
    fn get_raw_param(&self, params: &Params, index: usize) -> u16 {
        params.iter().nth(index).map(|p| p[0]).unwrap_or(0)
    }

    fn parse_sgr_params(&self, params: &Params) -> Vec<SgrAttribute> {
        let params_vec: Vec<u16> = params.iter().map(|p| p[0]).collect();
        if params_vec.is_empty() {
            return vec![SgrAttribute::Reset];
        }

        let mut attrs = Vec::new();
        let mut i = 0;
        while i < params_vec.len() {
            match params_vec[i] {
                0 => attrs.push(SgrAttribute::Reset),
                1 => attrs.push(SgrAttribute::Bold),
                4 => attrs.push(SgrAttribute::Underline),
                7 => attrs.push(SgrAttribute::Reverse),
                22 => attrs.push(SgrAttribute::NoBold),
                24 => attrs.push(SgrAttribute::NoUnderline),
                27 => attrs.push(SgrAttribute::NoReverse),

                n @ 30..=37 => {
                    attrs.push(SgrAttribute::Foreground(SgrColor::Basic((n - 30) as u8)))
                }
                39 => attrs.push(SgrAttribute::Foreground(SgrColor::Default)),
                n @ 40..=47 => {
                    attrs.push(SgrAttribute::Background(SgrColor::Basic((n - 40) as u8)))
                }
                49 => attrs.push(SgrAttribute::Background(SgrColor::Default)),
                n @ 90..=97 => {
                    attrs.push(SgrAttribute::Foreground(SgrColor::Bright((n - 90) as u8)))
                }
                n @ 100..=107 => {
                    attrs.push(SgrAttribute::Background(SgrColor::Bright((n - 100) as u8)))
                }

                sel @ (38 | 48) => {
                    let color = match params_vec.get(i + 1) {
                        Some(5) => {
                            let index = params_vec.get(i + 2).copied().unwrap_or(0);
                            i += 2;
                            Some(SgrColor::Indexed(index.min(255) as u8))
                        }
                        Some(2) if i + 4 < params_vec.len() => {
                            let r = params_vec[i + 2].min(255) as u8;
                            let g = params_vec[i + 3].min(255) as u8;
                            let b = params_vec[i + 4].min(255) as u8;
                            i += 4;
                            Some(SgrColor::Rgb(r, g, b))
                        }
                        _ => None,
                    };
                    if let Some(color) = color {
                        if sel == 38 {
                            attrs.push(SgrAttribute::Foreground(color));
                        } else {
                            attrs.push(SgrAttribute::Background(color));
                        }
                    }
                }

                other => debug!("Unhandled SGR parameter: {}", other),
            }
            i += 1;
        }

        attrs
    }

    fn decode_mode(&self, param: u16, private: bool) -> Option<TerminalMode> {
        if private {
            match param {
                6 => Some(TerminalMode::Origin),
                7 => Some(TerminalMode::AutoWrap),
                25 => Some(TerminalMode::ShowCursor),
                1047 => Some(TerminalMode::AlternateScreenClear),
                1048 => Some(TerminalMode::SaveCursorForAlt),
                1049 => Some(TerminalMode::AlternateScreen),
                other => {
                    debug!("Unhandled DEC private mode: {}", other);
                    None
                }
            }
        } else {
            match param {
                4 => Some(TerminalMode::Insert),
                other => {
                    debug!("Unhandled ANSI mode: {}", other);
                    None
                }
            }
        }
    }
}

impl Perform for EventCollector {
    fn print(&mut self, c: char) {
        trace!("VTE print: {:?}", c);
        self.current_text.push(c);
    }

    fn execute(&mut self, byte: u8) {
        trace!("VTE execute: 0x{:02x}", byte);
        self.flush_text();

        match byte {
            0x07 => self.events.push(OutputEvent::Control(ControlByte::Bell)),
            0x08 => self.events.push(OutputEvent::Control(ControlByte::Backspace)),
            0x09 => self.events.push(OutputEvent::Control(ControlByte::Tab)),
            0x0A => self.events.push(OutputEvent::Control(ControlByte::LineFeed)),
            0x0B => self.events.push(OutputEvent::Control(ControlByte::VerticalTab)),
            0x0C => self.events.push(OutputEvent::Control(ControlByte::FormFeed)),
            0x0D => self
                .events
                .push(OutputEvent::Control(ControlByte::CarriageReturn)),
            _ => debug!("Unhandled execute byte: 0x{:02x}", byte),
        }
    }

    fn hook(&mut self, params: &Params, intermediates: &[u8], ignore: bool, action: char) {
        // DCS strings are consumed without effect
        trace!(
            "VTE hook: params={:?}, intermediates={:?}, ignore={}, action={}",
            params.iter().collect::<Vec<_>>(),
            intermediates,
            ignore,
            action
        );
        self.flush_text();
    }

    fn put(&mut self, byte: u8) {
        trace!("VTE put: 0x{:02x}", byte);
    }

    fn unhook(&mut self) {
        trace!("VTE unhook");
    }

    fn osc_dispatch(&mut self, params: &[&[u8]], bell_terminated: bool) {
        trace!(
            "VTE OSC: params={}, bell_terminated={}",
            params.len(),
            bell_terminated
        );
        self.flush_text();

        if params.is_empty() {
            return;
        }

        let osc_num = std::str::from_utf8(params[0])
            .ok()
            .and_then(|s| s.parse::<u32>().ok());

        match osc_num {
            Some(0 | 2 | 21) => {
                let title = params
                    .get(1)
                    .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
                    .unwrap_or_default();
                self.events
                    .push(OutputEvent::Osc(OscSequence::SetTitle(title)));
            }
            _ => debug!("Unhandled OSC sequence: {:?}", osc_num),
        }
    }

    fn csi_dispatch(&mut self, params: &Params, intermediates: &[u8], ignore: bool, action: char) {
        trace!(
            "VTE CSI: params={:?}, intermediates={:?}, ignore={}, action={}",
            params.iter().collect::<Vec<_>>(),
            intermediates,
            ignore,
            action
        );
        self.flush_text();

        if ignore {
            return;
        }

        let private = intermediates.first() == Some(&b'?');

        match action {
            'A' => {
                let n = self.get_param(params, 0, 1);
                self.events.push(OutputEvent::Csi(CsiSequence::CursorUp(n)));
            }
            'B' => {
                let n = self.get_param(params, 0, 1);
                self.events.push(OutputEvent::Csi(CsiSequence::CursorDown(n)));
            }
            'C' => {
                let n = self.get_param(params, 0, 1);
                self.events
                    .push(OutputEvent::Csi(CsiSequence::CursorForward(n)));
            }
            'D' => {
                let n = self.get_param(params, 0, 1);
                self.events.push(OutputEvent::Csi(CsiSequence::CursorBack(n)));
            }
            'E' => {
                let n = self.get_param(params, 0, 1);
                self.events
                    .push(OutputEvent::Csi(CsiSequence::CursorNextLine(n)));
            }
            'F' => {
                let n = self.get_param(params, 0, 1);
                self.events
                    .push(OutputEvent::Csi(CsiSequence::CursorPreviousLine(n)));
            }
            'G' => {
                let col = self.get_param(params, 0, 1);
                self.events
                    .push(OutputEvent::Csi(CsiSequence::CursorColumn(col)));
            }
            'H' | 'f' => {
                let row = self.get_param(params, 0, 1);
                let col = self.get_param(params, 1, 1);
                self.events
                    .push(OutputEvent::Csi(CsiSequence::CursorPosition { row, col }));
            }

            'J' => {
                let scope = match self.get_raw_param(params, 0) {
                    0 => EraseScope::ToEnd,
                    1 => EraseScope::ToStart,
                    2 => EraseScope::All,
                    3 => EraseScope::Scrollback,
                    _ => EraseScope::ToEnd,
                };
                self.events
                    .push(OutputEvent::Csi(CsiSequence::EraseDisplay(scope)));
            }
            'K' => {
                let scope = match self.get_raw_param(params, 0) {
                    0 => EraseScope::ToEnd,
                    1 => EraseScope::ToStart,
                    2 => EraseScope::All,
                    _ => EraseScope::ToEnd,
                };
                self.events
                    .push(OutputEvent::Csi(CsiSequence::EraseLine(scope)));
            }

            'L' => {
                let n = self.get_param(params, 0, 1);
                self.events
                    .push(OutputEvent::Csi(CsiSequence::InsertLines(n)));
            }
            'M' => {
                let n = self.get_param(params, 0, 1);
                self.events
                    .push(OutputEvent::Csi(CsiSequence::DeleteLines(n)));
            }
            'S' => {
                let n = self.get_param(params, 0, 1);
                self.events.push(OutputEvent::Csi(CsiSequence::ScrollUp(n)));
            }
            'T' => {
                let n = self.get_param(params, 0, 1);
                self.events.push(OutputEvent::Csi(CsiSequence::ScrollDown(n)));
            }
            '@' => {
                let n = self.get_param(params, 0, 1);
                self.events
                    .push(OutputEvent::Csi(CsiSequence::InsertChars(n)));
            }
            'P' => {
                let n = self.get_param(params, 0, 1);
                self.events
                    .push(OutputEvent::Csi(CsiSequence::DeleteChars(n)));
            }
            'X' => {
                let n = self.get_param(params, 0, 1);
                self.events.push(OutputEvent::Csi(CsiSequence::EraseChars(n)));
            }

            'm' => {
                let attrs = self.parse_sgr_params(params);
                self.events
                    .push(OutputEvent::Csi(CsiSequence::SetGraphicsRendition(attrs)));
            }

            'h' => {
                let modes: Vec<_> = params
                    .iter()
                    .filter_map(|p| self.decode_mode(p[0], private))
                    .collect();
                if !modes.is_empty() {
                    self.events.push(OutputEvent::Csi(CsiSequence::SetMode(modes)));
                }
            }
            'l' => {
                let modes: Vec<_> = params
                    .iter()
                    .filter_map(|p| self.decode_mode(p[0], private))
                    .collect();
                if !modes.is_empty() {
                    self.events
                        .push(OutputEvent::Csi(CsiSequence::ResetMode(modes)));
                }
            }

            'r' => {
                let top = self.get_raw_param(params, 0);
                let bottom = self.get_raw_param(params, 1);
                self.events
                    .push(OutputEvent::Csi(CsiSequence::SetScrollRegion { top, bottom }));
            }

            's' => self.events.push(OutputEvent::Csi(CsiSequence::SaveCursor)),
            'u' => self
                .events
                .push(OutputEvent::Csi(CsiSequence::RestoreCursor)),

            'p' if intermediates == b"!" => {
                self.events.push(OutputEvent::Csi(CsiSequence::SoftReset));
            }

            'n' => {
                let n = self.get_raw_param(params, 0);
                self.events
                    .push(OutputEvent::Csi(CsiSequence::DeviceStatusReport(n)));
            }

            _ => debug!("Unhandled CSI sequence: {}", action),
        }
    }

    fn esc_dispatch(&mut self, intermediates: &[u8], ignore: bool, byte: u8) {
        trace!(
            "VTE ESC: intermediates={:?}, ignore={}, byte=0x{:02x}",
            intermediates,
            ignore,
            byte
        );
        self.flush_text();

        if ignore {
            return;
        }

        match (intermediates.first(), byte) {
            (Some(b'#'), b'8') => self
                .events
                .push(OutputEvent::Esc(EscSequence::ScreenAlignmentTest)),
            (Some(&designator @ (b'(' | b')' | b'*' | b'+')), charset) => self
                .events
                .push(OutputEvent::Esc(EscSequence::DesignateCharset(
                    designator, charset,
                ))),
            (None, b'D') => self.events.push(OutputEvent::Esc(EscSequence::Index)),
            (None, b'E') => self.events.push(OutputEvent::Esc(EscSequence::NextLine)),
            (None, b'M') => self
                .events
                .push(OutputEvent::Esc(EscSequence::ReverseIndex)),
            (None, b'7') => self.events.push(OutputEvent::Esc(EscSequence::SaveCursor)),
            (None, b'8') => self
                .events
                .push(OutputEvent::Esc(EscSequence::RestoreCursor)),
            (None, b'c') => self.events.push(OutputEvent::Esc(EscSequence::Reset)),
            _ => debug!("Unhandled ESC sequence: 0x{:02x}", byte),
        }
    }
}
