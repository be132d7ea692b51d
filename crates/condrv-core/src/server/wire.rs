//! Wire layouts for the device protocol: the request descriptor, the
//! USER_DEFINED message header, and the per-API descriptor structures.
//! Everything is little-endian; decode failures surface as
//! STATUS_INVALID_PARAMETER at the dispatcher.

use bytes::{Buf, BufMut};
use condrv_common::types::{Coord, SmallRect};

/// Size of the `{ApiNumber, ApiDescriptorSize}` header that leads every
/// USER_DEFINED payload
pub const MSG_HEADER_SIZE: usize = 8;

/// Packet function codes
pub const CONSOLE_IO_CONNECT: u32 = 1;
pub const CONSOLE_IO_DISCONNECT: u32 = 2;
pub const CONSOLE_IO_CREATE_OBJECT: u32 = 3;
pub const CONSOLE_IO_CLOSE_OBJECT: u32 = 4;
pub const CONSOLE_IO_RAW_READ: u32 = 5;
pub const CONSOLE_IO_RAW_WRITE: u32 = 6;
pub const CONSOLE_IO_RAW_FLUSH: u32 = 7;
pub const CONSOLE_IO_USER_DEFINED: u32 = 8;

/// Object types for CREATE_OBJECT
pub const OBJECT_TYPE_INPUT: u32 = 1;
pub const OBJECT_TYPE_OUTPUT: u32 = 2;

/// Element selectors for FillConsoleOutput
pub const FILL_ELEMENT_CHARACTER: u32 = 0;
pub const FILL_ELEMENT_ATTRIBUTE: u32 = 1;

/// String types for Read/WriteConsoleOutputString
pub const CONSOLE_ASCII: u32 = 1;
pub const CONSOLE_REAL_UNICODE: u32 = 2;
pub const CONSOLE_FALSE_UNICODE: u32 = 3;
pub const CONSOLE_ATTRIBUTE: u32 = 4;

/// The request descriptor delivered by the transport
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IoDescriptor {
    /// Unique per outstanding request; the continuation key
    pub identifier: u64,
    pub function: u32,
    pub process: u32,
    pub object: u32,
    pub input_size: u32,
    pub output_size: u32,
}

/// `{ApiNumber, ApiDescriptorSize}` header of a USER_DEFINED payload
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MsgHeader {
    pub api_number: u32,
    pub api_descriptor_size: u32,
}

impl MsgHeader {
    pub fn decode(mut bytes: &[u8]) -> Option<Self> {
        if bytes.len() < MSG_HEADER_SIZE {
            return None;
        }
        Some(Self {
            api_number: bytes.get_u32_le(),
            api_descriptor_size: bytes.get_u32_le(),
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(MSG_HEADER_SIZE);
        out.put_u32_le(self.api_number);
        out.put_u32_le(self.api_descriptor_size);
        out
    }
}

const fn api(layer: u32, index: u32) -> u32 {
    (layer << 24) | index
}

macro_rules! api_numbers {
    ($(($variant:ident, $layer:expr, $index:expr)),+ $(,)?) => {
        /// API numbers accepted by the USER_DEFINED dispatcher, grouped in
        /// the three historical layers
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u32)]
        pub enum ApiNumber {
            $($variant = api($layer, $index)),+
        }

        impl ApiNumber {
            pub fn from_u32(value: u32) -> Option<Self> {
                match value {
                    $(v if v == api($layer, $index) => Some(Self::$variant),)+
                    _ => None,
                }
            }

            pub fn as_u32(self) -> u32 {
                self as u32
            }
        }
    };
}

api_numbers! {
    // Layer 1
    (GetConsoleCp, 1, 0),
    (GetConsoleMode, 1, 1),
    (SetConsoleMode, 1, 2),
    (GetNumberOfInputEvents, 1, 3),
    (GetConsoleInput, 1, 4),
    (ReadConsole, 1, 5),
    (WriteConsole, 1, 6),
    // index 7 is NotifyLastClose, which this server does not accept
    (GetLangId, 1, 8),
    (MapBitmap, 1, 9),
    // Layer 2
    (FillConsoleOutput, 2, 0),
    (GenerateCtrlEvent, 2, 1),
    (SetActiveScreenBuffer, 2, 2),
    (FlushInputBuffer, 2, 3),
    (SetCp, 2, 4),
    (GetCursorInfo, 2, 5),
    (SetCursorInfo, 2, 6),
    (GetScreenBufferInfo, 2, 7),
    (SetScreenBufferInfo, 2, 8),
    (SetScreenBufferSize, 2, 9),
    (SetCursorPosition, 2, 10),
    (GetLargestWindowSize, 2, 11),
    (ScrollScreenBuffer, 2, 12),
    (SetTextAttribute, 2, 13),
    (SetWindowInfo, 2, 14),
    (ReadConsoleOutputString, 2, 15),
    (WriteConsoleInput, 2, 16),
    (WriteConsoleOutput, 2, 17),
    (WriteConsoleOutputString, 2, 18),
    (ReadConsoleOutput, 2, 19),
    (GetTitle, 2, 20),
    (SetTitle, 2, 21),
    // Layer 3
    (GetMouseInfo, 3, 0),
    (GetFontInfo, 3, 1),
    (SetIcon, 3, 2),
    (InvalidateBitmapRect, 3, 3),
    (VdmOperation, 3, 4),
    (SetHardwareState, 3, 5),
    (GetHardwareState, 3, 6),
    (GetDisplayMode, 3, 7),
    (AddAlias, 3, 8),
    (GetAlias, 3, 9),
    (GetAliasesLength, 3, 10),
    (GetAliasExesLength, 3, 11),
    (GetAliases, 3, 12),
    (GetAliasExes, 3, 13),
    (ShowCursor, 3, 14),
    (SetPalette, 3, 15),
    (SetMenuClose, 3, 16),
}

impl ApiNumber {
    /// APIs retired with the hardware console; they complete with
    /// STATUS_NOT_IMPLEMENTED and a zero-filled descriptor
    pub fn is_deprecated(self) -> bool {
        matches!(
            self,
            ApiNumber::MapBitmap
                | ApiNumber::GetMouseInfo
                | ApiNumber::GetFontInfo
                | ApiNumber::SetIcon
                | ApiNumber::InvalidateBitmapRect
                | ApiNumber::VdmOperation
                | ApiNumber::SetHardwareState
                | ApiNumber::GetHardwareState
                | ApiNumber::GetDisplayMode
                | ApiNumber::ShowCursor
                | ApiNumber::SetPalette
                | ApiNumber::SetMenuClose
        )
    }
}

fn get_coord(bytes: &mut &[u8]) -> Coord {
    let x = bytes.get_i16_le();
    let y = bytes.get_i16_le();
    Coord::new(x, y)
}

fn put_coord(out: &mut Vec<u8>, coord: Coord) {
    out.put_i16_le(coord.x);
    out.put_i16_le(coord.y);
}

fn get_rect(bytes: &mut &[u8]) -> SmallRect {
    let left = bytes.get_i16_le();
    let top = bytes.get_i16_le();
    let right = bytes.get_i16_le();
    let bottom = bytes.get_i16_le();
    SmallRect::new(left, top, right, bottom)
}

fn put_rect(out: &mut Vec<u8>, rect: SmallRect) {
    out.put_i16_le(rect.left);
    out.put_i16_le(rect.top);
    out.put_i16_le(rect.right);
    out.put_i16_le(rect.bottom);
}

/// Blob appended to a CONNECT completion
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionInformation {
    pub process: u32,
    pub input: u32,
    pub output: u32,
}

impl ConnectionInformation {
    pub const SIZE: usize = 12;

    pub fn decode(mut bytes: &[u8]) -> Option<Self> {
        if bytes.len() < Self::SIZE {
            return None;
        }
        Some(Self {
            process: bytes.get_u32_le(),
            input: bytes.get_u32_le(),
            output: bytes.get_u32_le(),
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::SIZE);
        out.put_u32_le(self.process);
        out.put_u32_le(self.input);
        out.put_u32_le(self.output);
        out
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CreateObjectMsg {
    pub object_type: u32,
}

impl CreateObjectMsg {
    pub const SIZE: usize = 4;

    pub fn decode(mut bytes: &[u8]) -> Option<Self> {
        if bytes.len() < Self::SIZE {
            return None;
        }
        Some(Self {
            object_type: bytes.get_u32_le(),
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::SIZE);
        out.put_u32_le(self.object_type);
        out
    }
}

/// GetCP / SetCP; `output` selects the output code page
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CodePageMsg {
    pub code_page: u32,
    pub output: u32,
}

impl CodePageMsg {
    pub const SIZE: usize = 8;

    pub fn decode(mut bytes: &[u8]) -> Option<Self> {
        if bytes.len() < Self::SIZE {
            return None;
        }
        Some(Self {
            code_page: bytes.get_u32_le(),
            output: bytes.get_u32_le(),
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::SIZE);
        out.put_u32_le(self.code_page);
        out.put_u32_le(self.output);
        out
    }
}

/// GetMode / SetMode
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ModeMsg {
    pub mode: u32,
}

impl ModeMsg {
    pub const SIZE: usize = 4;

    pub fn decode(mut bytes: &[u8]) -> Option<Self> {
        if bytes.len() < Self::SIZE {
            return None;
        }
        Some(Self {
            mode: bytes.get_u32_le(),
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::SIZE);
        out.put_u32_le(self.mode);
        out
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EventsMsg {
    pub ready_events: u32,
}

impl EventsMsg {
    pub const SIZE: usize = 4;

    pub fn decode(mut bytes: &[u8]) -> Option<Self> {
        if bytes.len() < Self::SIZE {
            return None;
        }
        Some(Self {
            ready_events: bytes.get_u32_le(),
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::SIZE);
        out.put_u32_le(self.ready_events);
        out
    }
}

/// GetConsoleInput; Peek is `flags` NO_REMOVE | NO_WAIT
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GetConsoleInputMsg {
    pub num_records: u32,
    pub flags: u32,
    pub unicode: bool,
}

impl GetConsoleInputMsg {
    pub const SIZE: usize = 12;

    pub fn decode(mut bytes: &[u8]) -> Option<Self> {
        if bytes.len() < Self::SIZE {
            return None;
        }
        Some(Self {
            num_records: bytes.get_u32_le(),
            flags: bytes.get_u32_le(),
            unicode: bytes.get_u32_le() & 0xFF != 0,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::SIZE);
        out.put_u32_le(self.num_records);
        out.put_u32_le(self.flags);
        out.put_u32_le(u32::from(self.unicode));
        out
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadConsoleMsg {
    pub unicode: bool,
    pub process_control_z: bool,
    pub exe_name_length: u16,
    pub initial_num_bytes: u32,
    pub ctrl_wakeup_mask: u32,
    pub control_key_state: u32,
    pub num_bytes: u32,
}

impl ReadConsoleMsg {
    pub const SIZE: usize = 20;

    pub fn decode(mut bytes: &[u8]) -> Option<Self> {
        if bytes.len() < Self::SIZE {
            return None;
        }
        Some(Self {
            unicode: bytes.get_u8() != 0,
            process_control_z: bytes.get_u8() != 0,
            exe_name_length: bytes.get_u16_le(),
            initial_num_bytes: bytes.get_u32_le(),
            ctrl_wakeup_mask: bytes.get_u32_le(),
            control_key_state: bytes.get_u32_le(),
            num_bytes: bytes.get_u32_le(),
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::SIZE);
        out.put_u8(u8::from(self.unicode));
        out.put_u8(u8::from(self.process_control_z));
        out.put_u16_le(self.exe_name_length);
        out.put_u32_le(self.initial_num_bytes);
        out.put_u32_le(self.ctrl_wakeup_mask);
        out.put_u32_le(self.control_key_state);
        out.put_u32_le(self.num_bytes);
        out
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteConsoleMsg {
    pub num_bytes: u32,
    pub unicode: bool,
}

impl WriteConsoleMsg {
    pub const SIZE: usize = 8;

    pub fn decode(mut bytes: &[u8]) -> Option<Self> {
        if bytes.len() < Self::SIZE {
            return None;
        }
        Some(Self {
            num_bytes: bytes.get_u32_le(),
            unicode: bytes.get_u32_le() & 0xFF != 0,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::SIZE);
        out.put_u32_le(self.num_bytes);
        out.put_u32_le(u32::from(self.unicode));
        out
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LangIdMsg {
    pub lang_id: u16,
}

impl LangIdMsg {
    pub const SIZE: usize = 4;

    pub fn decode(mut bytes: &[u8]) -> Option<Self> {
        if bytes.len() < Self::SIZE {
            return None;
        }
        Some(Self {
            lang_id: bytes.get_u16_le(),
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::SIZE);
        out.put_u16_le(self.lang_id);
        out.put_u16_le(0);
        out
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FillConsoleOutputMsg {
    pub write_coord: Coord,
    pub element_type: u32,
    pub element: u16,
    pub length: u32,
}

impl FillConsoleOutputMsg {
    pub const SIZE: usize = 16;

    pub fn decode(mut bytes: &[u8]) -> Option<Self> {
        if bytes.len() < Self::SIZE {
            return None;
        }
        let write_coord = get_coord(&mut bytes);
        let element_type = bytes.get_u32_le();
        let element = bytes.get_u16_le();
        let _pad = bytes.get_u16_le();
        let length = bytes.get_u32_le();
        Some(Self {
            write_coord,
            element_type,
            element,
            length,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::SIZE);
        put_coord(&mut out, self.write_coord);
        out.put_u32_le(self.element_type);
        out.put_u16_le(self.element);
        out.put_u16_le(0);
        out.put_u32_le(self.length);
        out
    }
}

/// Read/WriteConsoleOutputString
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutputStringMsg {
    pub coord: Coord,
    pub string_type: u32,
    pub num_records: u32,
}

impl OutputStringMsg {
    pub const SIZE: usize = 12;

    pub fn decode(mut bytes: &[u8]) -> Option<Self> {
        if bytes.len() < Self::SIZE {
            return None;
        }
        let coord = get_coord(&mut bytes);
        Some(Self {
            coord,
            string_type: bytes.get_u32_le(),
            num_records: bytes.get_u32_le(),
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::SIZE);
        put_coord(&mut out, self.coord);
        out.put_u32_le(self.string_type);
        out.put_u32_le(self.num_records);
        out
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScrollScreenBufferMsg {
    pub scroll_rect: SmallRect,
    pub clip_rect: SmallRect,
    pub use_clip: bool,
    pub destination: Coord,
    pub fill_char: u16,
    pub fill_attrs: u16,
    pub unicode: bool,
}

impl ScrollScreenBufferMsg {
    pub const SIZE: usize = 32;

    pub fn decode(mut bytes: &[u8]) -> Option<Self> {
        if bytes.len() < Self::SIZE {
            return None;
        }
        let scroll_rect = get_rect(&mut bytes);
        let clip_rect = get_rect(&mut bytes);
        let use_clip = bytes.get_u32_le() != 0;
        let destination = get_coord(&mut bytes);
        let fill_char = bytes.get_u16_le();
        let fill_attrs = bytes.get_u16_le();
        let unicode = bytes.get_u32_le() & 0xFF != 0;
        Some(Self {
            scroll_rect,
            clip_rect,
            use_clip,
            destination,
            fill_char,
            fill_attrs,
            unicode,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::SIZE);
        put_rect(&mut out, self.scroll_rect);
        put_rect(&mut out, self.clip_rect);
        out.put_u32_le(u32::from(self.use_clip));
        put_coord(&mut out, self.destination);
        out.put_u16_le(self.fill_char);
        out.put_u16_le(self.fill_attrs);
        out.put_u32_le(u32::from(self.unicode));
        out
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScreenBufferSizeMsg {
    pub size: Coord,
}

impl ScreenBufferSizeMsg {
    pub const SIZE: usize = 4;

    pub fn decode(mut bytes: &[u8]) -> Option<Self> {
        if bytes.len() < Self::SIZE {
            return None;
        }
        Some(Self {
            size: get_coord(&mut bytes),
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::SIZE);
        put_coord(&mut out, self.size);
        out
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScreenBufferInfoMsg {
    pub size: Coord,
    pub cursor_position: Coord,
    pub attributes: u16,
    pub window_rect: SmallRect,
    pub max_window: Coord,
}

impl ScreenBufferInfoMsg {
    pub const SIZE: usize = 24;

    pub fn decode(mut bytes: &[u8]) -> Option<Self> {
        if bytes.len() < Self::SIZE {
            return None;
        }
        let size = get_coord(&mut bytes);
        let cursor_position = get_coord(&mut bytes);
        let attributes = bytes.get_u16_le();
        let _pad = bytes.get_u16_le();
        let window_rect = get_rect(&mut bytes);
        let max_window = get_coord(&mut bytes);
        Some(Self {
            size,
            cursor_position,
            attributes,
            window_rect,
            max_window,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::SIZE);
        put_coord(&mut out, self.size);
        put_coord(&mut out, self.cursor_position);
        out.put_u16_le(self.attributes);
        out.put_u16_le(0);
        put_rect(&mut out, self.window_rect);
        put_coord(&mut out, self.max_window);
        out
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CursorPositionMsg {
    pub position: Coord,
}

impl CursorPositionMsg {
    pub const SIZE: usize = 4;

    pub fn decode(mut bytes: &[u8]) -> Option<Self> {
        if bytes.len() < Self::SIZE {
            return None;
        }
        Some(Self {
            position: get_coord(&mut bytes),
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::SIZE);
        put_coord(&mut out, self.position);
        out
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TextAttributeMsg {
    pub attributes: u16,
}

impl TextAttributeMsg {
    pub const SIZE: usize = 4;

    pub fn decode(mut bytes: &[u8]) -> Option<Self> {
        if bytes.len() < Self::SIZE {
            return None;
        }
        Some(Self {
            attributes: bytes.get_u16_le(),
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::SIZE);
        out.put_u16_le(self.attributes);
        out.put_u16_le(0);
        out
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CursorInfoMsg {
    pub size: u32,
    pub visible: bool,
}

impl CursorInfoMsg {
    pub const SIZE: usize = 8;

    pub fn decode(mut bytes: &[u8]) -> Option<Self> {
        if bytes.len() < Self::SIZE {
            return None;
        }
        Some(Self {
            size: bytes.get_u32_le(),
            visible: bytes.get_u32_le() & 0xFF != 0,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::SIZE);
        out.put_u32_le(self.size);
        out.put_u32_le(u32::from(self.visible));
        out
    }
}

/// GetTitle / SetTitle; `length` counts payload bytes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TitleMsg {
    pub length: u32,
    pub unicode: bool,
    pub original: bool,
}

impl TitleMsg {
    pub const SIZE: usize = 12;

    pub fn decode(mut bytes: &[u8]) -> Option<Self> {
        if bytes.len() < Self::SIZE {
            return None;
        }
        Some(Self {
            length: bytes.get_u32_le(),
            unicode: bytes.get_u32_le() & 0xFF != 0,
            original: bytes.get_u32_le() & 0xFF != 0,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::SIZE);
        out.put_u32_le(self.length);
        out.put_u32_le(u32::from(self.unicode));
        out.put_u32_le(u32::from(self.original));
        out
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteConsoleInputMsg {
    pub num_records: u32,
    pub append: bool,
    pub unicode: bool,
}

impl WriteConsoleInputMsg {
    pub const SIZE: usize = 12;

    pub fn decode(mut bytes: &[u8]) -> Option<Self> {
        if bytes.len() < Self::SIZE {
            return None;
        }
        Some(Self {
            num_records: bytes.get_u32_le(),
            append: bytes.get_u32_le() & 0xFF != 0,
            unicode: bytes.get_u32_le() & 0xFF != 0,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::SIZE);
        out.put_u32_le(self.num_records);
        out.put_u32_le(u32::from(self.append));
        out.put_u32_le(u32::from(self.unicode));
        out
    }
}

/// Write/ReadConsoleOutput (the CHAR_INFO grid forms)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutputGridMsg {
    pub region: SmallRect,
    pub unicode: bool,
}

impl OutputGridMsg {
    pub const SIZE: usize = 12;

    pub fn decode(mut bytes: &[u8]) -> Option<Self> {
        if bytes.len() < Self::SIZE {
            return None;
        }
        let region = get_rect(&mut bytes);
        Some(Self {
            region,
            unicode: bytes.get_u32_le() & 0xFF != 0,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::SIZE);
        put_rect(&mut out, self.region);
        out.put_u32_le(u32::from(self.unicode));
        out
    }
}

/// SetWindowInfo; `absolute` false treats the rect as deltas
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WindowInfoMsg {
    pub absolute: bool,
    pub window: SmallRect,
}

impl WindowInfoMsg {
    pub const SIZE: usize = 12;

    pub fn decode(mut bytes: &[u8]) -> Option<Self> {
        if bytes.len() < Self::SIZE {
            return None;
        }
        let absolute = bytes.get_u32_le() & 0xFF != 0;
        let window = get_rect(&mut bytes);
        Some(Self { absolute, window })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::SIZE);
        out.put_u32_le(u32::from(self.absolute));
        put_rect(&mut out, self.window);
        out
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GenerateCtrlEventMsg {
    pub event_type: u32,
    pub process_group: u32,
}

impl GenerateCtrlEventMsg {
    pub const SIZE: usize = 8;

    pub fn decode(mut bytes: &[u8]) -> Option<Self> {
        if bytes.len() < Self::SIZE {
            return None;
        }
        Some(Self {
            event_type: bytes.get_u32_le(),
            process_group: bytes.get_u32_le(),
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::SIZE);
        out.put_u32_le(self.event_type);
        out.put_u32_le(self.process_group);
        out
    }
}

/// AddAlias / GetAlias; the inline payload carries source, then target
/// (AddAlias only), then exe, each `*_length` bytes long
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AliasMsg {
    pub source_length: u16,
    pub target_length: u16,
    pub exe_length: u16,
    pub unicode: bool,
}

impl AliasMsg {
    pub const SIZE: usize = 8;

    pub fn decode(mut bytes: &[u8]) -> Option<Self> {
        if bytes.len() < Self::SIZE {
            return None;
        }
        Some(Self {
            source_length: bytes.get_u16_le(),
            target_length: bytes.get_u16_le(),
            exe_length: bytes.get_u16_le(),
            unicode: bytes.get_u16_le() & 0xFF != 0,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::SIZE);
        out.put_u16_le(self.source_length);
        out.put_u16_le(self.target_length);
        out.put_u16_le(self.exe_length);
        out.put_u16_le(u16::from(self.unicode));
        out
    }
}

/// GetAliasesLength / GetAliases / GetAliasExesLength / GetAliasExes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AliasesMsg {
    pub length: u32,
    pub unicode: bool,
}

impl AliasesMsg {
    pub const SIZE: usize = 8;

    pub fn decode(mut bytes: &[u8]) -> Option<Self> {
        if bytes.len() < Self::SIZE {
            return None;
        }
        Some(Self {
            length: bytes.get_u32_le(),
            unicode: bytes.get_u32_le() & 0xFF != 0,
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::SIZE);
        out.put_u32_le(self.length);
        out.put_u32_le(u32::from(self.unicode));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_number_round_trip() {
        for api in [
            ApiNumber::GetConsoleCp,
            ApiNumber::ReadConsole,
            ApiNumber::SetTitle,
            ApiNumber::GetAliasExes,
            ApiNumber::VdmOperation,
        ] {
            assert_eq!(ApiNumber::from_u32(api.as_u32()), Some(api));
        }
        assert_eq!(ApiNumber::from_u32(0xDEAD_BEEF), None);
    }

    #[test]
    fn test_layering() {
        assert_eq!(ApiNumber::GetConsoleCp.as_u32(), 0x0100_0000);
        assert_eq!(ApiNumber::ReadConsole.as_u32(), 0x0100_0005);
        assert_eq!(ApiNumber::FillConsoleOutput.as_u32(), 0x0200_0000);
        assert_eq!(ApiNumber::AddAlias.as_u32(), 0x0300_0008);
    }

    #[test]
    fn test_deprecated_set() {
        assert!(ApiNumber::VdmOperation.is_deprecated());
        assert!(ApiNumber::SetIcon.is_deprecated());
        assert!(ApiNumber::MapBitmap.is_deprecated());
        assert!(!ApiNumber::ReadConsole.is_deprecated());
        assert!(!ApiNumber::AddAlias.is_deprecated());
    }

    #[test]
    fn test_read_console_msg_round_trip() {
        let msg = ReadConsoleMsg {
            unicode: true,
            process_control_z: false,
            exe_name_length: 14,
            initial_num_bytes: 0,
            ctrl_wakeup_mask: 0,
            control_key_state: 0,
            num_bytes: 64,
        };
        let encoded = msg.encode();
        assert_eq!(encoded.len(), ReadConsoleMsg::SIZE);
        assert_eq!(ReadConsoleMsg::decode(&encoded), Some(msg));
    }

    #[test]
    fn test_scroll_msg_round_trip() {
        let msg = ScrollScreenBufferMsg {
            scroll_rect: SmallRect::new(0, 0, 9, 4),
            clip_rect: SmallRect::new(1, 1, 8, 3),
            use_clip: true,
            destination: Coord::new(0, 2),
            fill_char: u16::from(b'.'),
            fill_attrs: 0x07,
            unicode: true,
        };
        let encoded = msg.encode();
        assert_eq!(encoded.len(), ScrollScreenBufferMsg::SIZE);
        assert_eq!(ScrollScreenBufferMsg::decode(&encoded), Some(msg));
    }

    #[test]
    fn test_short_buffers_fail_decode() {
        assert_eq!(ReadConsoleMsg::decode(&[0u8; 4]), None);
        assert_eq!(MsgHeader::decode(&[0u8; 7]), None);
        assert_eq!(AliasMsg::decode(&[0u8; 7]), None);
    }
}
