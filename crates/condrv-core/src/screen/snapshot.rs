use condrv_common::error::{win32, CommResult, DeviceCommError};
use condrv_common::types::{ColorRef, Coord, SmallRect};
use serde::{Deserialize, Serialize};

use super::buffer::ScreenBuffer;

/// Immutable copy of the viewport, handed to the embedding renderer.
/// `revision` lets the renderer skip redraws when nothing changed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScreenBufferSnapshot {
    pub revision: u64,
    pub window_rect: SmallRect,
    pub buffer_size: Coord,
    pub viewport_size: Coord,
    pub cursor_position: Coord,
    pub cursor_visible: bool,
    pub cursor_size: u32,
    pub default_attributes: u16,
    pub color_table: [ColorRef; 16],
    pub text: Vec<u16>,
    pub attributes: Vec<u16>,
}

/// Copy the window-rect cells out of `buffer`, row by row. Rows clipped by
/// the buffer edge fill with blanks and the default attributes.
pub fn make_viewport_snapshot(buffer: &ScreenBuffer) -> CommResult<ScreenBufferSnapshot> {
    let window_rect = buffer.window_rect();
    let viewport_w = window_rect.width();
    let viewport_h = window_rect.height();

    let cell_count = viewport_w
        .checked_mul(viewport_h)
        .ok_or_else(|| DeviceCommError::new("Viewport dimensions overflow", win32::ERROR_ARITHMETIC_OVERFLOW))?;

    let default_attributes = buffer.default_text_attributes().bits();
    let mut snapshot = ScreenBufferSnapshot {
        revision: buffer.revision(),
        window_rect,
        buffer_size: buffer.size(),
        viewport_size: Coord::new(viewport_w as i16, viewport_h as i16),
        cursor_position: buffer.cursor_position(),
        cursor_visible: buffer.cursor_visible(),
        cursor_size: buffer.cursor_size(),
        default_attributes,
        color_table: buffer.color_table(),
        text: vec![u16::from(b' '); cell_count],
        attributes: vec![default_attributes; cell_count],
    };

    for row in 0..viewport_h {
        let origin = Coord::new(window_rect.left, window_rect.top + row as i16);
        let offset = row * viewport_w;

        let text = buffer.read_output_characters(origin, viewport_w);
        let attrs = buffer.read_output_attributes(origin, viewport_w);
        snapshot.text[offset..offset + text.len()].copy_from_slice(&text);
        snapshot.attributes[offset..offset + attrs.len()].copy_from_slice(&attrs);
    }

    Ok(snapshot)
}

#[cfg(test)]
mod tests {
    use super::*;
    use condrv_common::types::CharAttributes;

    fn make_buffer(size: Coord) -> ScreenBuffer {
        ScreenBuffer::new(size)
    }

    #[test]
    fn test_viewport_snapshot_reads_correct_subrect() {
        let mut buffer = make_buffer(Coord::new(10, 5));
        for y in 0..5i16 {
            for x in 0..10i16 {
                let ch = u16::from(b'!') + (y * 10 + x) as u16;
                assert!(buffer.write_cell(
                    Coord::new(x, y),
                    ch,
                    CharAttributes::from_bits_retain(0x07)
                ));
            }
        }

        let rect = SmallRect::new(2, 1, 6, 3);
        assert!(buffer.set_window_rect(rect));

        let snap = make_viewport_snapshot(&buffer).unwrap();
        assert_eq!(snap.window_rect, rect);
        assert_eq!(snap.viewport_size, Coord::new(5, 3));
        assert_eq!(snap.text.len(), 15);

        for row in 0..3i16 {
            for col in 0..5i16 {
                let y = rect.top + row;
                let x = rect.left + col;
                let expected = u16::from(b'!') + (y * 10 + x) as u16;
                let index = row as usize * 5 + col as usize;
                assert_eq!(snap.text[index], expected);
            }
        }
    }

    #[test]
    fn test_snapshot_includes_attributes_and_color_table() {
        let mut buffer = make_buffer(Coord::new(10, 5));

        let mut table = [0u32; 16];
        for (i, entry) in table.iter_mut().enumerate() {
            let level = (i * 10) as u8;
            *entry = condrv_common::types::rgb(level, level, level);
        }
        buffer.set_color_table(table);

        let rect = SmallRect::new(2, 1, 6, 3);
        assert!(buffer.set_window_rect(rect));

        for y in rect.top..=rect.bottom {
            for x in rect.left..=rect.right {
                assert!(buffer.write_cell(
                    Coord::new(x, y),
                    u16::from(b'X'),
                    CharAttributes::from_bits_retain(0x1E)
                ));
            }
        }

        let snap = make_viewport_snapshot(&buffer).unwrap();
        assert_eq!(snap.color_table, table);
        assert_eq!(snap.attributes.len(), snap.text.len());
        assert_eq!(snap.attributes.len(), 15);
        assert!(snap.attributes.iter().all(|&attr| attr == 0x1E));
    }
}
