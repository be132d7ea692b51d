use bitflags::bitflags;
use bytes::{Buf, BufMut};
use serde::{Deserialize, Serialize};

/// Cell coordinate inside a screen buffer (0-indexed)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Coord {
    pub x: i16,
    pub y: i16,
}

impl Coord {
    pub fn new(x: i16, y: i16) -> Self {
        Self { x, y }
    }
}

/// Inclusive rectangle in buffer coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SmallRect {
    pub left: i16,
    pub top: i16,
    pub right: i16,
    pub bottom: i16,
}

impl SmallRect {
    pub fn new(left: i16, top: i16, right: i16, bottom: i16) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    /// Width in cells; zero when the rect is degenerate
    pub fn width(&self) -> usize {
        let w = i32::from(self.right) - i32::from(self.left) + 1;
        if w <= 0 {
            0
        } else {
            w as usize
        }
    }

    /// Height in cells; zero when the rect is degenerate
    pub fn height(&self) -> usize {
        let h = i32::from(self.bottom) - i32::from(self.top) + 1;
        if h <= 0 {
            0
        } else {
            h as usize
        }
    }

    pub fn contains(&self, coord: Coord) -> bool {
        coord.x >= self.left && coord.x <= self.right && coord.y >= self.top && coord.y <= self.bottom
    }
}

/// NT status values the completion record is allowed to carry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u32)]
pub enum Status {
    Success = 0x0000_0000,
    Alerted = 0x0000_0101,
    Unsuccessful = 0xC000_0001,
    NotImplemented = 0xC000_0002,
    InvalidHandle = 0xC000_0008,
    InvalidParameter = 0xC000_000D,
    BufferTooSmall = 0xC000_0023,
}

impl Status {
    pub fn as_u32(self) -> u32 {
        self as u32
    }

    pub fn is_success(self) -> bool {
        matches!(self, Status::Success | Status::Alerted)
    }
}

impl Default for Status {
    fn default() -> Self {
        Status::Success
    }
}

/// `{Status, Information}` pair written back to the client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct IoStatus {
    pub status: Status,
    pub information: u32,
}

impl IoStatus {
    pub fn new(status: Status, information: u32) -> Self {
        Self {
            status,
            information,
        }
    }

    pub fn success(information: u32) -> Self {
        Self::new(Status::Success, information)
    }
}

bitflags! {
    /// 16-bit cell attribute word: low nibble foreground, next nibble
    /// background, then the COMMON_LVB group.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct CharAttributes: u16 {
        const FG_BLUE = 0x0001;
        const FG_GREEN = 0x0002;
        const FG_RED = 0x0004;
        const FG_INTENSITY = 0x0008;
        const BG_BLUE = 0x0010;
        const BG_GREEN = 0x0020;
        const BG_RED = 0x0040;
        const BG_INTENSITY = 0x0080;
        const LEADING_BYTE = 0x0100;
        const TRAILING_BYTE = 0x0200;
        const GRID_HORIZONTAL = 0x0400;
        const GRID_LVERTICAL = 0x0800;
        const GRID_RVERTICAL = 0x1000;
        const REVERSE_VIDEO = 0x4000;
        const UNDERSCORE = 0x8000;
    }
}

impl CharAttributes {
    pub const FG_MASK: u16 = 0x000F;
    pub const BG_MASK: u16 = 0x00F0;

    /// Palette index (0..16) selected by the foreground nibble
    pub fn foreground_index(self) -> usize {
        (self.bits() & Self::FG_MASK) as usize
    }

    /// Palette index (0..16) selected by the background nibble
    pub fn background_index(self) -> usize {
        ((self.bits() & Self::BG_MASK) >> 4) as usize
    }

    pub fn with_foreground_index(self, index: u16) -> Self {
        Self::from_bits_retain((self.bits() & !Self::FG_MASK) | (index & 0x000F))
    }

    pub fn with_background_index(self, index: u16) -> Self {
        Self::from_bits_retain((self.bits() & !Self::BG_MASK) | ((index & 0x000F) << 4))
    }
}

impl Default for CharAttributes {
    fn default() -> Self {
        // Light gray on black, the classic console default
        CharAttributes::FG_BLUE | CharAttributes::FG_GREEN | CharAttributes::FG_RED
    }
}

bitflags! {
    /// Console input mode word (per input handle set, stored globally)
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
    pub struct InputMode: u32 {
        const PROCESSED_INPUT = 0x0001;
        const LINE_INPUT = 0x0002;
        const ECHO_INPUT = 0x0004;
        const WINDOW_INPUT = 0x0008;
        const MOUSE_INPUT = 0x0010;
        const INSERT_MODE = 0x0020;
        const QUICK_EDIT_MODE = 0x0040;
        const EXTENDED_FLAGS = 0x0080;
        const AUTO_POSITION = 0x0100;
        const VIRTUAL_TERMINAL_INPUT = 0x0200;
    }
}

bitflags! {
    /// Console output mode word
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct OutputMode: u32 {
        const PROCESSED_OUTPUT = 0x0001;
        const WRAP_AT_EOL_OUTPUT = 0x0002;
        const VIRTUAL_TERMINAL_PROCESSING = 0x0004;
        const DISABLE_NEWLINE_AUTO_RETURN = 0x0008;
        const LVB_GRID_WORLDWIDE = 0x0010;
    }
}

impl Default for OutputMode {
    fn default() -> Self {
        OutputMode::PROCESSED_OUTPUT | OutputMode::WRAP_AT_EOL_OUTPUT
    }
}

bitflags! {
    /// Modifier and toggle state carried by keyboard events
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
    pub struct ControlKeyState: u32 {
        const RIGHT_ALT_PRESSED = 0x0001;
        const LEFT_ALT_PRESSED = 0x0002;
        const RIGHT_CTRL_PRESSED = 0x0004;
        const LEFT_CTRL_PRESSED = 0x0008;
        const SHIFT_PRESSED = 0x0010;
        const NUMLOCK_ON = 0x0020;
        const SCROLLLOCK_ON = 0x0040;
        const CAPSLOCK_ON = 0x0080;
        const ENHANCED_KEY = 0x0100;
    }
}

impl ControlKeyState {
    pub fn ctrl_pressed(self) -> bool {
        self.intersects(ControlKeyState::LEFT_CTRL_PRESSED | ControlKeyState::RIGHT_CTRL_PRESSED)
    }
}

bitflags! {
    /// Flags on the GetConsoleInput message; Peek is NO_REMOVE | NO_WAIT
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
    pub struct ReadFlags: u32 {
        const NO_REMOVE = 0x0001;
        const NO_WAIT = 0x0002;
    }
}

/// Virtual key codes the server cares about
pub mod vk {
    pub const VK_CANCEL: u16 = 0x03;
    pub const VK_BACK: u16 = 0x08;
    pub const VK_TAB: u16 = 0x09;
    pub const VK_RETURN: u16 = 0x0D;
    pub const VK_ESCAPE: u16 = 0x1B;
    pub const VK_END: u16 = 0x23;
    pub const VK_HOME: u16 = 0x24;
    pub const VK_LEFT: u16 = 0x25;
    pub const VK_UP: u16 = 0x26;
    pub const VK_RIGHT: u16 = 0x27;
    pub const VK_DOWN: u16 = 0x28;
    pub const VK_INSERT: u16 = 0x2D;
    pub const VK_DELETE: u16 = 0x2E;
}

/// Control event types delivered through `send_end_task`
pub const CTRL_C_EVENT: u32 = 0;
pub const CTRL_BREAK_EVENT: u32 = 1;

/// Flags accompanying `send_end_task`
pub const CONSOLE_CTRL_C_FLAG: u32 = 0x0001;
pub const CONSOLE_CTRL_BREAK_FLAG: u32 = 0x0002;

/// Keyboard payload of an input record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct KeyEventRecord {
    pub key_down: bool,
    pub repeat_count: u16,
    pub virtual_key_code: u16,
    pub virtual_scan_code: u16,
    pub unicode_char: u16,
    pub control_key_state: ControlKeyState,
}

impl KeyEventRecord {
    /// Key-down record for a single decoded character
    pub fn from_char_unit(unit: u16) -> Self {
        Self {
            key_down: true,
            repeat_count: 1,
            virtual_key_code: 0,
            virtual_scan_code: 0,
            unicode_char: unit,
            control_key_state: ControlKeyState::empty(),
        }
    }
}

/// Mouse payload of an input record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MouseEventRecord {
    pub position: Coord,
    pub button_state: u32,
    pub control_key_state: ControlKeyState,
    pub event_flags: u32,
}

/// One entry of the console input queue. Serialized form is the fixed
/// 20-byte wire record (event type word, pad, 16-byte payload).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InputRecord {
    Key(KeyEventRecord),
    Mouse(MouseEventRecord),
    WindowBufferSize(Coord),
    Menu(u32),
    Focus(bool),
}

pub const KEY_EVENT: u16 = 0x0001;
pub const MOUSE_EVENT: u16 = 0x0002;
pub const WINDOW_BUFFER_SIZE_EVENT: u16 = 0x0004;
pub const MENU_EVENT: u16 = 0x0008;
pub const FOCUS_EVENT: u16 = 0x0010;

impl InputRecord {
    /// Serialized size of every record
    pub const WIRE_SIZE: usize = 20;

    pub fn key(key: KeyEventRecord) -> Self {
        InputRecord::Key(key)
    }

    pub fn event_type(&self) -> u16 {
        match self {
            InputRecord::Key(_) => KEY_EVENT,
            InputRecord::Mouse(_) => MOUSE_EVENT,
            InputRecord::WindowBufferSize(_) => WINDOW_BUFFER_SIZE_EVENT,
            InputRecord::Menu(_) => MENU_EVENT,
            InputRecord::Focus(_) => FOCUS_EVENT,
        }
    }

    pub fn as_key(&self) -> Option<&KeyEventRecord> {
        match self {
            InputRecord::Key(key) => Some(key),
            _ => None,
        }
    }

    pub fn encode(&self, out: &mut impl BufMut) {
        out.put_u16_le(self.event_type());
        out.put_u16_le(0);
        match self {
            InputRecord::Key(key) => {
                out.put_u32_le(u32::from(key.key_down));
                out.put_u16_le(key.repeat_count);
                out.put_u16_le(key.virtual_key_code);
                out.put_u16_le(key.virtual_scan_code);
                out.put_u16_le(key.unicode_char);
                out.put_u32_le(key.control_key_state.bits());
            }
            InputRecord::Mouse(mouse) => {
                out.put_i16_le(mouse.position.x);
                out.put_i16_le(mouse.position.y);
                out.put_u32_le(mouse.button_state);
                out.put_u32_le(mouse.control_key_state.bits());
                out.put_u32_le(mouse.event_flags);
            }
            InputRecord::WindowBufferSize(size) => {
                out.put_i16_le(size.x);
                out.put_i16_le(size.y);
                out.put_bytes(0, 12);
            }
            InputRecord::Menu(command_id) => {
                out.put_u32_le(*command_id);
                out.put_bytes(0, 12);
            }
            InputRecord::Focus(set) => {
                out.put_u32_le(u32::from(*set));
                out.put_bytes(0, 12);
            }
        }
    }

    /// Decode one wire record; `None` when the event type is unknown or the
    /// input is short.
    pub fn decode(buf: &mut impl Buf) -> Option<Self> {
        if buf.remaining() < Self::WIRE_SIZE {
            return None;
        }
        let event_type = buf.get_u16_le();
        let _pad = buf.get_u16_le();
        match event_type {
            KEY_EVENT => {
                let key_down = buf.get_u32_le() != 0;
                let repeat_count = buf.get_u16_le();
                let virtual_key_code = buf.get_u16_le();
                let virtual_scan_code = buf.get_u16_le();
                let unicode_char = buf.get_u16_le();
                let control_key_state = ControlKeyState::from_bits_retain(buf.get_u32_le());
                Some(InputRecord::Key(KeyEventRecord {
                    key_down,
                    repeat_count,
                    virtual_key_code,
                    virtual_scan_code,
                    unicode_char,
                    control_key_state,
                }))
            }
            MOUSE_EVENT => {
                let x = buf.get_i16_le();
                let y = buf.get_i16_le();
                let button_state = buf.get_u32_le();
                let control_key_state = ControlKeyState::from_bits_retain(buf.get_u32_le());
                let event_flags = buf.get_u32_le();
                Some(InputRecord::Mouse(MouseEventRecord {
                    position: Coord::new(x, y),
                    button_state,
                    control_key_state,
                    event_flags,
                }))
            }
            WINDOW_BUFFER_SIZE_EVENT => {
                let x = buf.get_i16_le();
                let y = buf.get_i16_le();
                buf.advance(12);
                Some(InputRecord::WindowBufferSize(Coord::new(x, y)))
            }
            MENU_EVENT => {
                let command_id = buf.get_u32_le();
                buf.advance(12);
                Some(InputRecord::Menu(command_id))
            }
            FOCUS_EVENT => {
                let set = buf.get_u32_le() != 0;
                buf.advance(12);
                Some(InputRecord::Focus(set))
            }
            _ => {
                buf.advance(16);
                None
            }
        }
    }
}

/// 0x00BBGGRR color reference, as the renderer consumes it
pub type ColorRef = u32;

pub const fn rgb(r: u8, g: u8, b: u8) -> ColorRef {
    (r as u32) | ((g as u32) << 8) | ((b as u32) << 16)
}

pub fn color_channels(color: ColorRef) -> (u8, u8, u8) {
    (
        (color & 0xFF) as u8,
        ((color >> 8) & 0xFF) as u8,
        ((color >> 16) & 0xFF) as u8,
    )
}

/// The classic 16-entry console palette, indexed by attribute nibble
pub const DEFAULT_COLOR_TABLE: [ColorRef; 16] = [
    rgb(0, 0, 0),
    rgb(0, 0, 128),
    rgb(0, 128, 0),
    rgb(0, 128, 128),
    rgb(128, 0, 0),
    rgb(128, 0, 128),
    rgb(128, 128, 0),
    rgb(192, 192, 192),
    rgb(128, 128, 128),
    rgb(0, 0, 255),
    rgb(0, 255, 0),
    rgb(0, 255, 255),
    rgb(255, 0, 0),
    rgb(255, 0, 255),
    rgb(255, 255, 0),
    rgb(255, 255, 255),
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rect_dimensions() {
        let rect = SmallRect::new(2, 1, 6, 3);
        assert_eq!(rect.width(), 5);
        assert_eq!(rect.height(), 3);

        let degenerate = SmallRect::new(5, 5, 2, 2);
        assert_eq!(degenerate.width(), 0);
        assert_eq!(degenerate.height(), 0);
    }

    #[test]
    fn test_attribute_nibbles() {
        let attrs = CharAttributes::from_bits_retain(0x1E);
        assert_eq!(attrs.foreground_index(), 0xE);
        assert_eq!(attrs.background_index(), 0x1);

        let swapped = attrs.with_foreground_index(0x7).with_background_index(0x0);
        assert_eq!(swapped.bits(), 0x07);
    }

    #[test]
    fn test_key_record_round_trip() {
        let record = InputRecord::Key(KeyEventRecord {
            key_down: true,
            repeat_count: 1,
            virtual_key_code: 65,
            virtual_scan_code: 30,
            unicode_char: u16::from(b'a'),
            control_key_state: ControlKeyState::SHIFT_PRESSED,
        });

        let mut wire = Vec::new();
        record.encode(&mut wire);
        assert_eq!(wire.len(), InputRecord::WIRE_SIZE);

        let decoded = InputRecord::decode(&mut wire.as_slice()).unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    fn test_default_attributes_are_light_gray() {
        assert_eq!(CharAttributes::default().bits(), 0x07);
    }
}
