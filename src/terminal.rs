use crossterm::{
    cursor::{Hide, MoveTo, Show},
    event::{poll, read, DisableMouseCapture, EnableMouseCapture, Event},
    execute, queue,
    style::{Attribute, Color, Print, ResetColor, SetAttribute, SetBackgroundColor, SetForegroundColor},
    terminal::{
        disable_raw_mode, enable_raw_mode, size, Clear, ClearType, EnterAlternateScreen,
        LeaveAlternateScreen,
    },
};
use std::io::{self, stdout, Write};
use std::time::Duration;

/// Terminal abstraction for rendering
pub struct Terminal {
    width: u16,
    height: u16,
    buffer: Vec<Vec<Cell>>,
}

/// A single cell in the terminal buffer
#[derive(Clone, PartialEq)]
pub struct Cell {
    pub ch: char,
    pub fg: Option<Color>,
    pub bg: Option<Color>,
    pub bold: bool,
}

impl Default for Cell {
    fn default() -> Self {
        Self {
            ch: ' ',
            fg: None,
            bg: None,
            bold: false,
        }
    }
}

impl Terminal {
    /// Enter raw mode on the alternate screen with mouse reporting on
    pub fn new() -> io::Result<Self> {
        let (width, height) = size()?;

        enable_raw_mode()?;
        execute!(stdout(), EnterAlternateScreen, EnableMouseCapture, Hide)?;

        Ok(Self {
            width,
            height,
            buffer: vec![vec![Cell::default(); width as usize]; height as usize],
        })
    }

    /// Get terminal dimensions
    pub fn size(&self) -> (u16, u16) {
        (self.width, self.height)
    }

    pub fn resize(&mut self, width: u16, height: u16) {
        self.width = width;
        self.height = height;
        self.buffer = vec![vec![Cell::default(); width as usize]; height as usize];
    }

    /// Clear the buffer
    pub fn clear(&mut self) {
        for row in &mut self.buffer {
            for cell in row {
                *cell = Cell::default();
            }
        }
    }

    /// Clear the actual terminal
    pub fn clear_screen(&self) -> io::Result<()> {
        execute!(stdout(), Clear(ClearType::All))?;
        Ok(())
    }

    /// Set a character at position with optional color
    pub fn set(&mut self, x: i32, y: i32, ch: char, fg: Option<Color>, bold: bool) {
        self.set_with_bg(x, y, ch, fg, None, bold);
    }

    pub fn set_with_bg(&mut self, x: i32, y: i32, ch: char, fg: Option<Color>, bg: Option<Color>, bold: bool) {
        if x >= 0 && x < self.width as i32 && y >= 0 && y < self.height as i32 {
            self.buffer[y as usize][x as usize] = Cell { ch, fg, bg, bold };
        }
    }

    /// Set a string starting at position, clipped to the row
    pub fn set_str(&mut self, x: i32, y: i32, s: &str, fg: Option<Color>, bold: bool) {
        for (i, ch) in s.chars().enumerate() {
            self.set(x + i as i32, y, ch, fg, bold);
        }
    }

    /// Render the entire buffer to screen
    pub fn present(&self) -> io::Result<()> {
        let mut out = stdout().lock();

        for (y, row) in self.buffer.iter().enumerate() {
            queue!(out, MoveTo(0, y as u16))?;

            for cell in row {
                if cell.bold {
                    queue!(out, SetAttribute(Attribute::Bold))?;
                }
                if let Some(color) = cell.bg {
                    queue!(out, SetBackgroundColor(color))?;
                }
                if let Some(color) = cell.fg {
                    queue!(out, SetForegroundColor(color))?;
                }
                queue!(out, Print(cell.ch))?;
                if cell.fg.is_some() || cell.bg.is_some() {
                    queue!(out, ResetColor)?;
                }
                if cell.bold {
                    queue!(out, SetAttribute(Attribute::Reset))?;
                }
            }
        }

        out.flush()
    }

    /// Next input event if one arrives within `timeout`
    pub fn next_event(&self, timeout: Duration) -> io::Result<Option<Event>> {
        if poll(timeout)? {
            return Ok(Some(read()?));
        }
        Ok(None)
    }
}

impl Drop for Terminal {
    fn drop(&mut self) {
        let _ = execute!(stdout(), DisableMouseCapture, Show, LeaveAlternateScreen);
        let _ = disable_raw_mode();
    }
}

/// Helper to create RGB colors
pub fn rgb(r: u8, g: u8, b: u8) -> Color {
    Color::Rgb { r, g, b }
}
