use crate::error::CommResult;
use crate::types::IoStatus;

/// Completion handed to the transport after a request is serviced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IoComplete<'a> {
    pub io_status: IoStatus,
    pub write: &'a [u8],
}

/// Transport collaborator: moves request payload bytes in and completion
/// bytes out. Implementations are a real device driver channel or an
/// in-memory scratchpad for tests.
pub trait DeviceComm {
    /// Copy `dest.len()` payload bytes starting at `offset` into `dest`
    fn read_input(&mut self, offset: u64, dest: &mut [u8]) -> CommResult<()>;

    /// Copy `src` into the response payload at `offset`, growing it as needed
    fn write_output(&mut self, offset: u64, src: &[u8]) -> CommResult<()>;

    /// Finalize the request with a status and the accumulated write buffer
    fn complete_io(&mut self, completion: IoComplete<'_>) -> CommResult<()>;
}

/// Host I/O collaborator: the renderer/pty side of the console. The core
/// requires nothing beyond these methods.
pub trait HostIo {
    fn write_output_bytes(&mut self, bytes: &[u8]) -> CommResult<usize>;

    /// Consuming read of host input bytes; returns the count copied
    fn read_input_bytes(&mut self, dest: &mut [u8]) -> CommResult<usize>;

    /// Non-consuming read of host input bytes
    fn peek_input_bytes(&mut self, dest: &mut [u8]) -> CommResult<usize>;

    fn input_bytes_available(&self) -> usize;

    /// Append bytes to the host's logical input stream (DSR responses)
    fn inject_input_bytes(&mut self, bytes: &[u8]) -> bool;

    fn flush_input_buffer(&mut self) -> CommResult<()>;

    /// Whether VT queries (DSR, DA) should receive answers
    fn vt_should_answer_queries(&self) -> bool;

    fn wait_for_input(&mut self, timeout_ms: u32) -> CommResult<bool>;

    fn input_disconnected(&self) -> bool;

    /// Deliver a console control event (Ctrl+C / Ctrl+Break) to a client
    fn send_end_task(&mut self, process_id: u32, event_type: u32, ctrl_flags: u32)
        -> CommResult<()>;
}

/// Events produced by the VT output parser
#[derive(Debug, Clone, PartialEq)]
pub enum OutputEvent {
    Text(String),
    Control(ControlByte),
    Csi(CsiSequence),
    Osc(OscSequence),
    Esc(EscSequence),
}

/// C0 bytes with classic console semantics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlByte {
    Bell,
    Backspace,
    Tab,
    LineFeed,
    VerticalTab,
    FormFeed,
    CarriageReturn,
}

/// Control Sequence Introducer dispatches the interpreter understands
#[derive(Debug, Clone, PartialEq)]
pub enum CsiSequence {
    CursorUp(u16),
    CursorDown(u16),
    CursorForward(u16),
    CursorBack(u16),
    CursorNextLine(u16),
    CursorPreviousLine(u16),
    CursorColumn(u16),
    CursorPosition { row: u16, col: u16 },

    EraseDisplay(EraseScope),
    EraseLine(EraseScope),

    InsertLines(u16),
    DeleteLines(u16),
    ScrollUp(u16),
    ScrollDown(u16),
    InsertChars(u16),
    DeleteChars(u16),
    EraseChars(u16),

    SetGraphicsRendition(Vec<SgrAttribute>),

    SetMode(Vec<TerminalMode>),
    ResetMode(Vec<TerminalMode>),

    SetScrollRegion { top: u16, bottom: u16 },

    SaveCursor,
    RestoreCursor,
    SoftReset,

    /// DSR; only parameter 6 (cursor position report) is answered
    DeviceStatusReport(u16),
}

/// Scope selector shared by ED and EL
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EraseScope {
    ToEnd,
    ToStart,
    All,
    Scrollback,
}

/// SGR parameters after extended-color folding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SgrAttribute {
    Reset,
    Bold,
    NoBold,
    Underline,
    NoUnderline,
    Reverse,
    NoReverse,
    Foreground(SgrColor),
    Background(SgrColor),
}

/// Color operand of an SGR foreground/background parameter. `Basic` and
/// `Bright` carry the ANSI index (0..8, red bit 0x1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SgrColor {
    Basic(u8),
    Bright(u8),
    Indexed(u8),
    Rgb(u8, u8, u8),
    Default,
}

/// ANSI and DEC private modes reachable through CSI h/l
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalMode {
    Insert,
    AutoWrap,
    ShowCursor,
    Origin,
    AlternateScreen,
    AlternateScreenClear,
    SaveCursorForAlt,
}

/// Operating System Command dispatches
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OscSequence {
    SetTitle(String),
}

/// ESC dispatches (no CSI)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EscSequence {
    Index,
    NextLine,
    ReverseIndex,
    SaveCursor,
    RestoreCursor,
    Reset,
    ScreenAlignmentTest,
    /// `ESC ( x` and friends; recorded, no cell effect
    DesignateCharset(u8, u8),
}
