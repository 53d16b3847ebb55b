//! Keypad model: the twelve DTMF symbols, the button grid layout, and
//! pointer hit-testing. Layout is computed once at loop start and never
//! re-laid-out on resize.

use std::fmt;
use std::time::{Duration, Instant};

use ratatui::layout::Rect;

/// Row-major label sequence of the standard telephone keypad.
pub const KEY_SYMBOLS: [char; 12] = [
    '1', '2', '3', '4', '5', '6', '7', '8', '9', '*', '0', '#',
];

const ROWS: u16 = 4;
const COLS: u16 = 3;
/// Gap between buttons and around the grid, in terminal cells.
const GRID_MARGIN: u16 = 1;
/// Rows reserved above the grid for the header line.
const HEADER_ROWS: u16 = 2;

/// How long a button stays visually pressed after activation.
pub const PRESS_HOLD: Duration = Duration::from_millis(120);

/// One of `0-9`, `*`, `#`. Guaranteed valid at construction, so the rest of
/// the code never re-checks the symbol set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DtmfKey(char);

impl DtmfKey {
    pub fn from_char(ch: char) -> Option<Self> {
        KEY_SYMBOLS.contains(&ch).then_some(Self(ch))
    }

    pub fn as_char(self) -> char {
        self.0
    }
}

impl fmt::Display for DtmfKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyButton {
    pub key: DtmfKey,
    pub area: Rect,
    pressed_until: Option<Instant>,
}

impl KeyButton {
    pub fn press(&mut self, now: Instant) {
        self.pressed_until = Some(now + PRESS_HOLD);
    }

    pub fn is_pressed(&self, now: Instant) -> bool {
        self.pressed_until.is_some_and(|until| now < until)
    }

    pub fn contains(&self, column: u16, row: u16) -> bool {
        column >= self.area.x
            && column < self.area.x + self.area.width
            && row >= self.area.y
            && row < self.area.y + self.area.height
    }
}

/// 4x3 grid of uniform square cells with fixed margins, centered
/// horizontally under the header. Deterministic for a given area.
pub fn compute_layout(area: Rect) -> Vec<KeyButton> {
    let avail_w = area.width.saturating_sub((COLS + 1) * GRID_MARGIN);
    let avail_h = area
        .height
        .saturating_sub(HEADER_ROWS + (ROWS + 1) * GRID_MARGIN);
    let size = (avail_w / COLS).min(avail_h / ROWS).max(1);

    let grid_w = COLS * size + (COLS - 1) * GRID_MARGIN;
    let x0 = area.x + area.width.saturating_sub(grid_w) / 2;
    let y0 = area.y + HEADER_ROWS + GRID_MARGIN;

    let mut buttons = Vec::with_capacity(KEY_SYMBOLS.len());
    for r in 0..ROWS {
        for c in 0..COLS {
            let label = KEY_SYMBOLS[(r * COLS + c) as usize];
            let key = DtmfKey::from_char(label).expect("KEY_SYMBOLS is the allowed set");
            buttons.push(KeyButton {
                key,
                area: Rect::new(
                    x0 + c * (size + GRID_MARGIN),
                    y0 + r * (size + GRID_MARGIN),
                    size,
                    size,
                ),
                pressed_until: None,
            });
        }
    }
    buttons
}

/// First button containing the point wins; buttons never overlap, so the
/// order only matters for determinism.
pub fn hit_test(buttons: &[KeyButton], column: u16, row: u16) -> Option<DtmfKey> {
    buttons
        .iter()
        .find(|b| b.contains(column, row))
        .map(|b| b.key)
}
