use condrv_common::types::{CharAttributes, ColorRef, Coord, SmallRect, DEFAULT_COLOR_TABLE};
use tracing::debug;

use super::cursor::Cursor;

/// One character cell: a UTF-16 unit plus its attribute word
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cell {
    pub ch: u16,
    pub attrs: CharAttributes,
}

impl Cell {
    pub fn new(ch: u16, attrs: CharAttributes) -> Self {
        Self { ch, attrs }
    }

    pub fn blank(attrs: CharAttributes) -> Self {
        Self::new(u16::from(b' '), attrs)
    }
}

/// Cursor state captured by DECSC and restored by DECRC
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SavedCursor {
    pub position: Coord,
    pub attributes: CharAttributes,
    pub origin_mode: bool,
    pub charset: u8,
    pub delayed_wrap: bool,
}

impl Default for SavedCursor {
    fn default() -> Self {
        Self {
            position: Coord::new(0, 0),
            attributes: CharAttributes::default(),
            origin_mode: false,
            charset: b'B',
            delayed_wrap: false,
        }
    }
}

/// Main-screen state parked while the 1049 alternate buffer is active
#[derive(Debug, Clone)]
struct MainScreenSave {
    cells: Vec<Cell>,
    cursor: Cursor,
    attributes: CharAttributes,
    saved_cursor: SavedCursor,
    delayed_wrap: bool,
}

/// 2-D cell grid with cursor, viewport, margins, and alternate-buffer
/// pairing. Every mutation bumps a monotonic revision counter so external
/// snapshots can cheaply detect staleness.
#[derive(Debug, Clone)]
pub struct ScreenBuffer {
    width: i16,
    height: i16,
    cells: Vec<Cell>,
    cursor: Cursor,
    window_rect: SmallRect,
    max_window: Coord,
    attributes: CharAttributes,
    default_attributes: CharAttributes,
    color_table: [ColorRef; 16],
    scroll_region: Option<(i16, i16)>,
    autowrap: bool,
    origin_mode: bool,
    insert_mode: bool,
    delayed_wrap: bool,
    newline_auto_return: bool,
    charset: u8,
    saved_cursor: SavedCursor,
    main_saved: Option<Box<MainScreenSave>>,
    alt_cells_saved: Option<Vec<Cell>>,
    revision: u64,
}

impl ScreenBuffer {
    /// Create a buffer whose viewport spans the whole grid
    pub fn new(size: Coord) -> Self {
        let width = size.x.max(1);
        let height = size.y.max(1);
        let attrs = CharAttributes::default();
        Self {
            width,
            height,
            cells: vec![Cell::blank(attrs); width as usize * height as usize],
            cursor: Cursor::new(),
            window_rect: SmallRect::new(0, 0, width - 1, height - 1),
            max_window: Coord::new(width, height),
            attributes: attrs,
            default_attributes: attrs,
            color_table: DEFAULT_COLOR_TABLE,
            scroll_region: None,
            autowrap: true,
            origin_mode: false,
            insert_mode: false,
            delayed_wrap: false,
            newline_auto_return: true,
            charset: b'B',
            saved_cursor: SavedCursor::default(),
            main_saved: None,
            alt_cells_saved: None,
            revision: 0,
        }
    }

    fn touch(&mut self) {
        self.revision += 1;
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn size(&self) -> Coord {
        Coord::new(self.width, self.height)
    }

    pub fn width(&self) -> i16 {
        self.width
    }

    pub fn height(&self) -> i16 {
        self.height
    }

    fn index(&self, coord: Coord) -> Option<usize> {
        if coord.x < 0 || coord.y < 0 || coord.x >= self.width || coord.y >= self.height {
            None
        } else {
            Some(coord.y as usize * self.width as usize + coord.x as usize)
        }
    }

    // --- cell primitives -------------------------------------------------

    pub fn write_cell(&mut self, coord: Coord, ch: u16, attrs: CharAttributes) -> bool {
        match self.index(coord) {
            Some(i) => {
                self.cells[i] = Cell::new(ch, attrs);
                self.touch();
                true
            }
            None => false,
        }
    }

    pub fn cell_at(&self, coord: Coord) -> Option<Cell> {
        self.index(coord).map(|i| self.cells[i])
    }

    /// Linear read of characters starting at `origin`, wrapping across row
    /// ends and clipped to the end of the buffer
    pub fn read_output_characters(&self, origin: Coord, count: usize) -> Vec<u16> {
        let Some(start) = self.index(origin) else {
            return Vec::new();
        };
        let end = (start + count).min(self.cells.len());
        self.cells[start..end].iter().map(|c| c.ch).collect()
    }

    /// Linear read of attribute words starting at `origin`
    pub fn read_output_attributes(&self, origin: Coord, count: usize) -> Vec<u16> {
        let Some(start) = self.index(origin) else {
            return Vec::new();
        };
        let end = (start + count).min(self.cells.len());
        self.cells[start..end].iter().map(|c| c.attrs.bits()).collect()
    }

    /// Linear write of characters, preserving each cell's attributes;
    /// returns the count actually stored
    pub fn write_output_characters(&mut self, origin: Coord, chars: &[u16]) -> usize {
        let Some(start) = self.index(origin) else {
            return 0;
        };
        let avail = self.cells.len() - start;
        let written = chars.len().min(avail);
        for (i, &ch) in chars[..written].iter().enumerate() {
            self.cells[start + i].ch = ch;
        }
        if written != 0 {
            self.touch();
        }
        written
    }

    /// Linear write of attribute words, preserving each cell's character
    pub fn write_output_attributes(&mut self, origin: Coord, attrs: &[u16]) -> usize {
        let Some(start) = self.index(origin) else {
            return 0;
        };
        let avail = self.cells.len() - start;
        let written = attrs.len().min(avail);
        for (i, &word) in attrs[..written].iter().enumerate() {
            self.cells[start + i].attrs = CharAttributes::from_bits_retain(word);
        }
        if written != 0 {
            self.touch();
        }
        written
    }

    pub fn fill_characters(&mut self, origin: Coord, ch: u16, count: usize) -> usize {
        let Some(start) = self.index(origin) else {
            return 0;
        };
        let end = (start + count).min(self.cells.len());
        for cell in &mut self.cells[start..end] {
            cell.ch = ch;
        }
        if end != start {
            self.touch();
        }
        end - start
    }

    pub fn fill_attributes(&mut self, origin: Coord, attrs: CharAttributes, count: usize) -> usize {
        let Some(start) = self.index(origin) else {
            return 0;
        };
        let end = (start + count).min(self.cells.len());
        for cell in &mut self.cells[start..end] {
            cell.attrs = attrs;
        }
        if end != start {
            self.touch();
        }
        end - start
    }

    /// Fill a linear span with a whole cell
    pub fn fill_cells(&mut self, origin: Coord, fill: Cell, count: usize) -> usize {
        let Some(start) = self.index(origin) else {
            return 0;
        };
        let end = (start + count).min(self.cells.len());
        for cell in &mut self.cells[start..end] {
            *cell = fill;
        }
        if end != start {
            self.touch();
        }
        end - start
    }

    /// Blank the whole grid with the given attributes
    pub fn clear_all(&mut self, attrs: CharAttributes) {
        let blank = Cell::blank(attrs);
        for cell in &mut self.cells {
            *cell = blank;
        }
        self.touch();
    }

    // --- rectangle copy --------------------------------------------------

    /// Copy `src` so its top-left lands on `dest`. Cells of `src` left
    /// uncovered by the moved block receive `fill`; `clip` further bounds
    /// every write. The copy is staged so overlapping rects are safe.
    pub fn scroll_rect(
        &mut self,
        src: SmallRect,
        dest: Coord,
        clip: Option<SmallRect>,
        fill: Cell,
    ) {
        let bounds = SmallRect::new(0, 0, self.width - 1, self.height - 1);
        let clip = match clip {
            Some(c) => SmallRect::new(
                c.left.max(bounds.left),
                c.top.max(bounds.top),
                c.right.min(bounds.right),
                c.bottom.min(bounds.bottom),
            ),
            None => bounds,
        };
        if src.width() == 0 || src.height() == 0 {
            return;
        }

        // Stage the source block before any writes land
        let mut staged = Vec::with_capacity(src.width() * src.height());
        for y in src.top..=src.bottom {
            for x in src.left..=src.right {
                staged.push(self.cell_at(Coord::new(x, y)).unwrap_or(fill));
            }
        }

        // Blank the source, bounded by the clip rect
        for y in src.top..=src.bottom {
            for x in src.left..=src.right {
                let coord = Coord::new(x, y);
                if clip.contains(coord) {
                    if let Some(i) = self.index(coord) {
                        self.cells[i] = fill;
                    }
                }
            }
        }

        // Land the staged block at the destination
        for (offset, cell) in staged.into_iter().enumerate() {
            let dy = (offset / src.width()) as i16;
            let dx = (offset % src.width()) as i16;
            let coord = Coord::new(dest.x + dx, dest.y + dy);
            if clip.contains(coord) {
                if let Some(i) = self.index(coord) {
                    self.cells[i] = cell;
                }
            }
        }

        self.touch();
    }

    // --- margins and margin-aware line operations ------------------------

    /// Current scroll region as inclusive rows, defaulting to the full grid
    pub fn margins(&self) -> (i16, i16) {
        match self.scroll_region {
            Some((top, bottom)) => (top.clamp(0, self.height - 1), bottom.clamp(0, self.height - 1)),
            None => (0, self.height - 1),
        }
    }

    pub fn scroll_region(&self) -> Option<(i16, i16)> {
        self.scroll_region
    }

    /// DECSTBM; `None` restores the default full-screen region. Rejects a
    /// region of fewer than two rows, per the DEC rule.
    pub fn set_scroll_region(&mut self, region: Option<(i16, i16)>) -> bool {
        if let Some((top, bottom)) = region {
            if top < 0 || bottom >= self.height || top >= bottom {
                debug!("Rejecting scroll region {}..{}", top, bottom);
                return false;
            }
        }
        self.scroll_region = region;
        self.touch();
        true
    }

    fn copy_row(&mut self, from: i16, to: i16) {
        let width = self.width as usize;
        let from_start = from as usize * width;
        let to_start = to as usize * width;
        let (src, dst) = if from_start < to_start {
            let (a, b) = self.cells.split_at_mut(to_start);
            (&a[from_start..from_start + width], &mut b[..width])
        } else {
            let (a, b) = self.cells.split_at_mut(from_start);
            (&b[..width], &mut a[to_start..to_start + width])
        };
        dst.copy_from_slice(src);
    }

    fn blank_row(&mut self, row: i16, fill: Cell) {
        let width = self.width as usize;
        let start = row as usize * width;
        for cell in &mut self.cells[start..start + width] {
            *cell = fill;
        }
    }

    /// Shift rows `top..=bottom` up by `count`, blanking the bottom rows
    fn shift_rows_up(&mut self, top: i16, bottom: i16, count: i16, fill: Cell) {
        let count = count.clamp(0, bottom - top + 1);
        for row in top..=bottom - count {
            self.copy_row(row + count, row);
        }
        for row in (bottom - count + 1)..=bottom {
            self.blank_row(row, fill);
        }
        self.touch();
    }

    fn shift_rows_down(&mut self, top: i16, bottom: i16, count: i16, fill: Cell) {
        let count = count.clamp(0, bottom - top + 1);
        for row in (top + count..=bottom).rev() {
            self.copy_row(row - count, row);
        }
        for row in top..top + count {
            self.blank_row(row, fill);
        }
        self.touch();
    }

    /// Scroll the scroll region up (SU / pan at bottom margin)
    pub fn scroll_region_up(&mut self, count: i16) {
        let (top, bottom) = self.margins();
        if count > 0 {
            self.shift_rows_up(top, bottom, count, Cell::blank(self.attributes));
        }
    }

    /// Scroll the scroll region down (SD / reverse index at top margin)
    pub fn scroll_region_down(&mut self, count: i16) {
        let (top, bottom) = self.margins();
        if count > 0 {
            self.shift_rows_down(top, bottom, count, Cell::blank(self.attributes));
        }
    }

    /// IL at `row`: open `count` blank lines, pushing rows toward the
    /// bottom margin. No effect outside the scroll region.
    pub fn insert_lines(&mut self, row: i16, count: i16) {
        let (top, bottom) = self.margins();
        if row < top || row > bottom || count <= 0 {
            return;
        }
        self.shift_rows_down(row, bottom, count, Cell::blank(self.attributes));
    }

    /// DL at `row`: remove `count` lines, pulling rows up from the bottom
    /// margin
    pub fn delete_lines(&mut self, row: i16, count: i16) {
        let (top, bottom) = self.margins();
        if row < top || row > bottom || count <= 0 {
            return;
        }
        self.shift_rows_up(row, bottom, count, Cell::blank(self.attributes));
    }

    // --- row-local character operations ----------------------------------

    /// ICH: open blanks at the cursor cell, shifting the rest of the row
    /// right (cells shifted past the row end are lost)
    pub fn insert_chars(&mut self, at: Coord, count: i16) {
        let Some(_) = self.index(at) else { return };
        let count = (count.max(0) as usize).min((self.width - at.x) as usize);
        if count == 0 {
            return;
        }
        let row_start = at.y as usize * self.width as usize;
        let from = row_start + at.x as usize;
        let row_end = row_start + self.width as usize;
        self.cells.copy_within(from..row_end - count, from + count);
        let blank = Cell::blank(self.attributes);
        for cell in &mut self.cells[from..from + count] {
            *cell = blank;
        }
        self.touch();
    }

    /// DCH: close up `count` cells at the cursor, blanking the row tail
    pub fn delete_chars(&mut self, at: Coord, count: i16) {
        let Some(_) = self.index(at) else { return };
        let count = (count.max(0) as usize).min((self.width - at.x) as usize);
        if count == 0 {
            return;
        }
        let row_start = at.y as usize * self.width as usize;
        let from = row_start + at.x as usize;
        let row_end = row_start + self.width as usize;
        self.cells.copy_within(from + count..row_end, from);
        let blank = Cell::blank(self.attributes);
        for cell in &mut self.cells[row_end - count..row_end] {
            *cell = blank;
        }
        self.touch();
    }

    /// ECH: blank `count` cells from the cursor without shifting
    pub fn erase_chars(&mut self, at: Coord, count: i16) {
        let count = (count.max(0) as usize).min((self.width - at.x).max(0) as usize);
        self.fill_cells(at, Cell::blank(self.attributes), count);
    }

    // --- cursor ----------------------------------------------------------

    pub fn cursor_position(&self) -> Coord {
        self.cursor.position()
    }

    /// Clamp into the grid and clear the delayed-wrap latch: every
    /// explicit cursor motion does both
    pub fn set_cursor_position(&mut self, position: Coord) {
        let clamped = Coord::new(
            position.x.clamp(0, self.width - 1),
            position.y.clamp(0, self.height - 1),
        );
        self.cursor.set_position(clamped);
        self.delayed_wrap = false;
        self.touch();
    }

    pub fn cursor_visible(&self) -> bool {
        self.cursor.visible()
    }

    pub fn set_cursor_visible(&mut self, visible: bool) {
        self.cursor.set_visible(visible);
        self.touch();
    }

    pub fn cursor_size(&self) -> u32 {
        self.cursor.size()
    }

    pub fn set_cursor_size(&mut self, size: u32) {
        self.cursor.set_size(size);
        self.touch();
    }

    // --- attributes and palette ------------------------------------------

    pub fn attributes(&self) -> CharAttributes {
        self.attributes
    }

    pub fn set_attributes(&mut self, attrs: CharAttributes) {
        self.attributes = attrs;
        self.touch();
    }

    pub fn default_text_attributes(&self) -> CharAttributes {
        self.default_attributes
    }

    pub fn set_default_text_attributes(&mut self, attrs: CharAttributes) {
        self.default_attributes = attrs;
        self.touch();
    }

    pub fn color_table(&self) -> [ColorRef; 16] {
        self.color_table
    }

    pub fn set_color_table(&mut self, table: [ColorRef; 16]) {
        self.color_table = table;
        self.touch();
    }

    // --- viewport ---------------------------------------------------------

    pub fn window_rect(&self) -> SmallRect {
        self.window_rect
    }

    pub fn set_window_rect(&mut self, rect: SmallRect) -> bool {
        if rect.width() == 0
            || rect.height() == 0
            || rect.left < 0
            || rect.top < 0
            || rect.right >= self.width
            || rect.bottom >= self.height
        {
            return false;
        }
        self.window_rect = rect;
        self.touch();
        true
    }

    pub fn max_window(&self) -> Coord {
        self.max_window
    }

    /// Resize the grid, preserving the overlapping cells; the cursor and
    /// viewport are clamped into the new bounds
    pub fn set_size(&mut self, size: Coord) -> bool {
        let width = size.x;
        let height = size.y;
        if width <= 0 || height <= 0 {
            return false;
        }
        let mut cells = vec![Cell::blank(self.default_attributes); width as usize * height as usize];
        for y in 0..height.min(self.height) {
            for x in 0..width.min(self.width) {
                let old = self.cells[y as usize * self.width as usize + x as usize];
                cells[y as usize * width as usize + x as usize] = old;
            }
        }
        self.cells = cells;
        self.width = width;
        self.height = height;
        self.max_window = Coord::new(width, height);
        self.window_rect = SmallRect::new(
            self.window_rect.left.clamp(0, width - 1),
            self.window_rect.top.clamp(0, height - 1),
            self.window_rect.right.clamp(0, width - 1),
            self.window_rect.bottom.clamp(0, height - 1),
        );
        let cursor = self.cursor.position();
        self.cursor
            .set_position(Coord::new(cursor.x.clamp(0, width - 1), cursor.y.clamp(0, height - 1)));
        self.scroll_region = None;
        self.touch();
        true
    }

    // --- VT mode flags ----------------------------------------------------

    pub fn autowrap(&self) -> bool {
        self.autowrap
    }

    pub fn set_autowrap(&mut self, on: bool) {
        self.autowrap = on;
        if !on {
            self.delayed_wrap = false;
        }
        self.touch();
    }

    pub fn origin_mode(&self) -> bool {
        self.origin_mode
    }

    pub fn set_origin_mode(&mut self, on: bool) {
        self.origin_mode = on;
        self.touch();
    }

    pub fn insert_mode(&self) -> bool {
        self.insert_mode
    }

    pub fn set_insert_mode(&mut self, on: bool) {
        self.insert_mode = on;
        self.touch();
    }

    pub fn delayed_wrap(&self) -> bool {
        self.delayed_wrap
    }

    pub fn set_delayed_wrap(&mut self, on: bool) {
        self.delayed_wrap = on;
    }

    pub fn newline_auto_return(&self) -> bool {
        self.newline_auto_return
    }

    pub fn set_newline_auto_return(&mut self, on: bool) {
        self.newline_auto_return = on;
        self.touch();
    }

    pub fn charset(&self) -> u8 {
        self.charset
    }

    pub fn set_charset(&mut self, charset: u8) {
        self.charset = charset;
    }

    // --- saved cursor (DECSC / DECRC) ------------------------------------

    pub fn save_cursor(&mut self) {
        self.saved_cursor = SavedCursor {
            position: self.cursor.position(),
            attributes: self.attributes,
            origin_mode: self.origin_mode,
            charset: self.charset,
            delayed_wrap: self.delayed_wrap,
        };
    }

    pub fn restore_cursor(&mut self) {
        let saved = self.saved_cursor;
        self.set_cursor_position(saved.position);
        self.attributes = saved.attributes;
        self.origin_mode = saved.origin_mode;
        self.charset = saved.charset;
        self.delayed_wrap = saved.delayed_wrap;
        self.touch();
    }

    pub fn reset_saved_cursor(&mut self) {
        self.saved_cursor = SavedCursor::default();
    }

    /// RIS: drop every mode, margin, save, and cell back to power-on state
    pub fn reset(&mut self) {
        self.attributes = self.default_attributes;
        self.scroll_region = None;
        self.autowrap = true;
        self.origin_mode = false;
        self.insert_mode = false;
        self.delayed_wrap = false;
        self.newline_auto_return = true;
        self.charset = b'B';
        self.saved_cursor = SavedCursor::default();
        self.main_saved = None;
        self.alt_cells_saved = None;
        let blank = Cell::blank(self.attributes);
        for cell in &mut self.cells {
            *cell = blank;
        }
        self.cursor = Cursor::new();
        self.touch();
    }

    // --- alternate buffer -------------------------------------------------

    pub fn alt_screen_active(&self) -> bool {
        self.main_saved.is_some()
    }

    /// DECSET 1049: park the main screen whole (cells, cursor, attributes,
    /// saved cursor, wrap latch), then present a cleared grid with the
    /// cursor home. Re-entering while active is a no-op.
    pub fn enter_alt_screen(&mut self) {
        if self.main_saved.is_some() {
            return;
        }
        let blank = Cell::blank(self.attributes);
        let cells = std::mem::replace(
            &mut self.cells,
            vec![blank; self.width as usize * self.height as usize],
        );
        self.main_saved = Some(Box::new(MainScreenSave {
            cells,
            cursor: self.cursor,
            attributes: self.attributes,
            saved_cursor: self.saved_cursor,
            delayed_wrap: self.delayed_wrap,
        }));
        self.cursor.set_position(Coord::new(0, 0));
        self.delayed_wrap = false;
        self.touch();
    }

    /// DECRST 1049: restore the parked main screen verbatim
    pub fn exit_alt_screen(&mut self) {
        let Some(saved) = self.main_saved.take() else {
            return;
        };
        self.cells = saved.cells;
        self.cursor = saved.cursor;
        self.attributes = saved.attributes;
        self.saved_cursor = saved.saved_cursor;
        self.delayed_wrap = saved.delayed_wrap;
        self.touch();
    }

    /// DECSET 1047: swap cell contents only; the cursor stays put
    pub fn enter_alt_cells(&mut self) {
        if self.alt_cells_saved.is_some() {
            return;
        }
        let blank = Cell::blank(self.attributes);
        let cells = std::mem::replace(
            &mut self.cells,
            vec![blank; self.width as usize * self.height as usize],
        );
        self.alt_cells_saved = Some(cells);
        self.touch();
    }

    /// DECRST 1047
    pub fn exit_alt_cells(&mut self) {
        if let Some(cells) = self.alt_cells_saved.take() {
            self.cells = cells;
            self.touch();
        }
    }
}
