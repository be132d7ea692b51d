//! Cooked ReadConsole line editor.
//!
//! Holds the line being edited between dispatches: the continuation state
//! of a blocked cooked read. Editing keys mutate the buffer and produce an
//! echo string (VT-encoded) the caller feeds through the interpreter when
//! ENABLE_ECHO_INPUT is set.

use condrv_common::types::{vk, KeyEventRecord};
use tracing::trace;

/// What a key did to the line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineEvent {
    /// Still editing
    Pending,
    /// Carriage return arrived; the line is finished
    Completed,
}

/// Line-editing state for one cooked read
#[derive(Debug, Default)]
pub struct LineEditor {
    buffer: Vec<u16>,
    insertion_point: usize,
    overwrite: bool,
}

fn cub(n: usize) -> String {
    if n == 0 {
        String::new()
    } else {
        format!("\x1b[{}D", n)
    }
}

fn cuf(n: usize) -> String {
    if n == 0 {
        String::new()
    } else {
        format!("\x1b[{}C", n)
    }
}

impl LineEditor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn buffer(&self) -> &[u16] {
        &self.buffer
    }

    pub fn insertion_point(&self) -> usize {
        self.insertion_point
    }

    pub fn overwrite(&self) -> bool {
        self.overwrite
    }

    /// Consume the editor, yielding the finished line plus its terminator:
    /// CRLF under processed input, bare CR otherwise
    pub fn take_line(mut self, processed: bool) -> Vec<u16> {
        self.buffer.push(0x0D);
        if processed {
            self.buffer.push(0x0A);
        }
        self.buffer
    }

    /// Text of the tail from the insertion point, for echo redraws
    fn tail_text(&self, from: usize) -> String {
        String::from_utf16_lossy(&self.buffer[from..])
    }

    /// Apply one key-down record. Returns the echo string and whether the
    /// line completed.
    pub fn apply_key(&mut self, key: &KeyEventRecord) -> (String, LineEvent) {
        trace!(
            "Line editor key: vk={} uc={:#x} point={}",
            key.virtual_key_code,
            key.unicode_char,
            self.insertion_point
        );

        match key.virtual_key_code {
            vk::VK_LEFT => {
                if self.insertion_point > 0 {
                    self.insertion_point -= 1;
                    return (cub(1), LineEvent::Pending);
                }
                return (String::new(), LineEvent::Pending);
            }
            vk::VK_RIGHT => {
                if self.insertion_point < self.buffer.len() {
                    self.insertion_point += 1;
                    return (cuf(1), LineEvent::Pending);
                }
                return (String::new(), LineEvent::Pending);
            }
            vk::VK_HOME => {
                return if key.control_key_state.ctrl_pressed() {
                    self.kill_to_start()
                } else {
                    let echo = cub(self.insertion_point);
                    self.insertion_point = 0;
                    (echo, LineEvent::Pending)
                };
            }
            vk::VK_END => {
                return if key.control_key_state.ctrl_pressed() {
                    self.kill_to_end()
                } else {
                    let echo = cuf(self.buffer.len() - self.insertion_point);
                    self.insertion_point = self.buffer.len();
                    (echo, LineEvent::Pending)
                };
            }
            vk::VK_INSERT => {
                self.overwrite = !self.overwrite;
                return (String::new(), LineEvent::Pending);
            }
            vk::VK_DELETE => return self.delete_right(),
            vk::VK_ESCAPE => return self.clear_line(),
            _ => {}
        }

        match key.unicode_char {
            0x0D => (String::new(), LineEvent::Completed),
            0x08 => self.backspace(),
            0x1B => self.clear_line(),
            unit if unit >= 0x20 || unit == 0x09 => self.insert(unit),
            _ => (String::new(), LineEvent::Pending),
        }
    }

    fn insert(&mut self, unit: u16) -> (String, LineEvent) {
        let mut echo = String::new();
        if self.overwrite && self.insertion_point < self.buffer.len() {
            self.buffer[self.insertion_point] = unit;
            echo.extend(String::from_utf16_lossy(&[unit]).chars());
        } else {
            self.buffer.insert(self.insertion_point, unit);
            echo.extend(String::from_utf16_lossy(&[unit]).chars());
            // Repaint the shifted tail, then step back over it
            let tail = self.tail_text(self.insertion_point + 1);
            echo.push_str(&tail);
            echo.push_str(&cub(tail.chars().count()));
        }
        self.insertion_point += 1;
        (echo, LineEvent::Pending)
    }

    fn backspace(&mut self) -> (String, LineEvent) {
        if self.insertion_point == 0 {
            return (String::new(), LineEvent::Pending);
        }
        self.insertion_point -= 1;
        self.buffer.remove(self.insertion_point);

        let tail = self.tail_text(self.insertion_point);
        let mut echo = String::from("\x08");
        echo.push_str(&tail);
        echo.push(' ');
        echo.push_str(&cub(tail.chars().count() + 1));
        (echo, LineEvent::Pending)
    }

    fn delete_right(&mut self) -> (String, LineEvent) {
        if self.insertion_point >= self.buffer.len() {
            return (String::new(), LineEvent::Pending);
        }
        self.buffer.remove(self.insertion_point);

        let tail = self.tail_text(self.insertion_point);
        let mut echo = tail.clone();
        echo.push(' ');
        echo.push_str(&cub(tail.chars().count() + 1));
        (echo, LineEvent::Pending)
    }

    /// Ctrl+Home: delete from the start of the line to the point
    fn kill_to_start(&mut self) -> (String, LineEvent) {
        let removed = self.insertion_point;
        if removed == 0 {
            return (String::new(), LineEvent::Pending);
        }
        self.buffer.drain(..removed);
        self.insertion_point = 0;

        let tail = self.tail_text(0);
        let mut echo = cub(removed);
        echo.push_str(&tail);
        echo.push_str(&" ".repeat(removed));
        echo.push_str(&cub(tail.chars().count() + removed));
        (echo, LineEvent::Pending)
    }

    /// Ctrl+End: delete from the point to the end of the line
    fn kill_to_end(&mut self) -> (String, LineEvent) {
        let removed = self.buffer.len() - self.insertion_point;
        if removed == 0 {
            return (String::new(), LineEvent::Pending);
        }
        self.buffer.truncate(self.insertion_point);

        let mut echo = " ".repeat(removed);
        echo.push_str(&cub(removed));
        (echo, LineEvent::Pending)
    }

    /// Escape: wipe the whole line
    fn clear_line(&mut self) -> (String, LineEvent) {
        let length = self.buffer.len();
        let point = self.insertion_point;
        self.buffer.clear();
        self.insertion_point = 0;

        let mut echo = cub(point);
        echo.push_str(&" ".repeat(length));
        echo.push_str(&cub(length));
        (echo, LineEvent::Pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use condrv_common::types::ControlKeyState;

    fn key_char(unit: u16) -> KeyEventRecord {
        KeyEventRecord::from_char_unit(unit)
    }

    fn key_vk(code: u16) -> KeyEventRecord {
        KeyEventRecord {
            key_down: true,
            repeat_count: 1,
            virtual_key_code: code,
            virtual_scan_code: 0,
            unicode_char: 0,
            control_key_state: ControlKeyState::empty(),
        }
    }

    fn key_ctrl_vk(code: u16) -> KeyEventRecord {
        KeyEventRecord {
            control_key_state: ControlKeyState::LEFT_CTRL_PRESSED,
            ..key_vk(code)
        }
    }

    fn type_str(editor: &mut LineEditor, text: &str) {
        for unit in text.encode_utf16() {
            editor.apply_key(&key_char(unit));
        }
    }

    fn line_text(editor: &LineEditor) -> String {
        String::from_utf16_lossy(editor.buffer())
    }

    #[test]
    fn test_typing_appends() {
        let mut editor = LineEditor::new();
        type_str(&mut editor, "hello");
        assert_eq!(line_text(&editor), "hello");
        assert_eq!(editor.insertion_point(), 5);
    }

    #[test]
    fn test_insert_in_middle_shifts_tail() {
        let mut editor = LineEditor::new();
        type_str(&mut editor, "helo");
        editor.apply_key(&key_vk(vk::VK_LEFT));
        let (echo, _) = editor.apply_key(&key_char(u16::from(b'l')));
        assert_eq!(line_text(&editor), "hello");
        // Echo repaints the shifted tail and steps back over it
        assert_eq!(echo, "lo\x1b[1D");
    }

    #[test]
    fn test_overwrite_mode_replaces() {
        let mut editor = LineEditor::new();
        type_str(&mut editor, "abc");
        editor.apply_key(&key_vk(vk::VK_HOME));
        editor.apply_key(&key_vk(vk::VK_INSERT));
        type_str(&mut editor, "XY");
        assert_eq!(line_text(&editor), "XYc");
    }

    #[test]
    fn test_backspace_deletes_left() {
        let mut editor = LineEditor::new();
        type_str(&mut editor, "abc");
        let (echo, _) = editor.apply_key(&key_char(0x08));
        assert_eq!(line_text(&editor), "ab");
        assert_eq!(echo, "\x08 \x1b[1D");

        // Backspace in the middle repaints the tail
        editor.apply_key(&key_vk(vk::VK_LEFT));
        let (echo, _) = editor.apply_key(&key_char(0x08));
        assert_eq!(line_text(&editor), "b");
        assert_eq!(echo, "\x08b \x1b[2D");
    }

    #[test]
    fn test_delete_right() {
        let mut editor = LineEditor::new();
        type_str(&mut editor, "abc");
        editor.apply_key(&key_vk(vk::VK_HOME));
        editor.apply_key(&key_vk(vk::VK_DELETE));
        assert_eq!(line_text(&editor), "bc");
        assert_eq!(editor.insertion_point(), 0);
    }

    #[test]
    fn test_home_end_navigation() {
        let mut editor = LineEditor::new();
        type_str(&mut editor, "abcd");

        let (echo, _) = editor.apply_key(&key_vk(vk::VK_HOME));
        assert_eq!(editor.insertion_point(), 0);
        assert_eq!(echo, "\x1b[4D");

        let (echo, _) = editor.apply_key(&key_vk(vk::VK_END));
        assert_eq!(editor.insertion_point(), 4);
        assert_eq!(echo, "\x1b[4C");
    }

    #[test]
    fn test_ctrl_home_kills_to_start() {
        let mut editor = LineEditor::new();
        type_str(&mut editor, "abcd");
        editor.apply_key(&key_vk(vk::VK_LEFT));
        editor.apply_key(&key_vk(vk::VK_LEFT));
        editor.apply_key(&key_ctrl_vk(vk::VK_HOME));
        assert_eq!(line_text(&editor), "cd");
        assert_eq!(editor.insertion_point(), 0);
    }

    #[test]
    fn test_ctrl_end_kills_to_end() {
        let mut editor = LineEditor::new();
        type_str(&mut editor, "abcd");
        editor.apply_key(&key_vk(vk::VK_LEFT));
        editor.apply_key(&key_vk(vk::VK_LEFT));
        editor.apply_key(&key_ctrl_vk(vk::VK_END));
        assert_eq!(line_text(&editor), "ab");
        assert_eq!(editor.insertion_point(), 2);
    }

    #[test]
    fn test_escape_clears_line() {
        let mut editor = LineEditor::new();
        type_str(&mut editor, "abcd");
        let (echo, _) = editor.apply_key(&key_vk(vk::VK_ESCAPE));
        assert!(line_text(&editor).is_empty());
        assert_eq!(echo, "\x1b[4D    \x1b[4D");
    }

    #[test]
    fn test_carriage_return_completes() {
        let mut editor = LineEditor::new();
        type_str(&mut editor, "ok");
        let (_, event) = editor.apply_key(&key_char(0x0D));
        assert_eq!(event, LineEvent::Completed);

        let units = editor.take_line(true);
        assert_eq!(units, vec![u16::from(b'o'), u16::from(b'k'), 0x0D, 0x0A]);
    }

    #[test]
    fn test_take_line_without_processed_input() {
        let mut editor = LineEditor::new();
        type_str(&mut editor, "x");
        editor.apply_key(&key_char(0x0D));
        let units = editor.take_line(false);
        assert_eq!(units, vec![u16::from(b'x'), 0x0D]);
    }
}
