//! Terminal live view. Each character cell shows two vertically stacked
//! pixels using an upper half-block glyph in 24-bit colour.

use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::style::{Color, Print, ResetColor, SetBackgroundColor, SetForegroundColor};
use crossterm::terminal::{self, EnterAlternateScreen, LeaveAlternateScreen};
use crossterm::{cursor, execute, queue};
use digit_hw::{Frame, FrameView, ViewControl};
use std::io::{self, Stdout, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

static HOOK_INSTALLED: AtomicBool = AtomicBool::new(false);

/// Full-screen preview. Restores the terminal on drop.
pub struct TerminalView {
    out: Stdout,
    title: String,
    active: bool,
}

impl TerminalView {
    pub fn enter(title: impl Into<String>) -> io::Result<Self> {
        install_panic_hook();
        let mut out = io::stdout();
        terminal::enable_raw_mode()?;
        execute!(out, EnterAlternateScreen, cursor::Hide)?;
        Ok(Self {
            out,
            title: title.into(),
            active: true,
        })
    }

    fn restore(&mut self) -> io::Result<()> {
        if self.active {
            self.active = false;
            restore_terminal()?;
        }
        Ok(())
    }
}

impl Drop for TerminalView {
    fn drop(&mut self) {
        let _ = self.restore();
    }
}

impl FrameView for TerminalView {
    fn render(&mut self, frame: &Frame) -> io::Result<ViewControl> {
        let (cols, rows) = terminal::size()?;
        // Top row is the status line.
        let (w, h) = fit(frame.width, frame.height, cols as u32, rows.saturating_sub(1) as u32 * 2);

        queue!(
            self.out,
            cursor::MoveTo(0, 0),
            ResetColor,
            terminal::Clear(terminal::ClearType::CurrentLine),
            Print(format!(
                "{}  {}x{}  #{}  [Esc/q to quit]",
                self.title, frame.width, frame.height, frame.sequence
            ))
        )?;

        for cell_y in 0..h / 2 {
            queue!(self.out, cursor::MoveTo(0, cell_y as u16 + 1))?;
            for x in 0..w {
                let top = sample(frame, x, cell_y * 2, w, h);
                let bottom = sample(frame, x, cell_y * 2 + 1, w, h);
                queue!(
                    self.out,
                    SetForegroundColor(rgb(top)),
                    SetBackgroundColor(rgb(bottom)),
                    Print('▀')
                )?;
            }
            queue!(self.out, ResetColor)?;
        }
        self.out.flush()?;

        while event::poll(Duration::ZERO)? {
            if let Event::Key(key) = event::read()? {
                if is_quit(&key) {
                    return Ok(ViewControl::Stop);
                }
            }
        }
        Ok(ViewControl::Continue)
    }
}

/// Largest size with the frame's aspect ratio inside `max_w x max_h` pixels.
fn fit(frame_w: u32, frame_h: u32, max_w: u32, max_h: u32) -> (u32, u32) {
    if frame_w == 0 || frame_h == 0 || max_w == 0 || max_h < 2 {
        return (0, 0);
    }
    let (fw, fh, mw, mh) = (frame_w as u64, frame_h as u64, max_w as u64, max_h as u64);
    let (w, h) = if mw * fh <= mh * fw {
        (mw, mw * fh / fw)
    } else {
        (mh * fw / fh, mh)
    };
    ((w as u32).clamp(1, max_w), (h as u32).clamp(2, max_h))
}

/// Nearest-neighbour sample of output pixel (x, y) in a `w x h` view.
fn sample(frame: &Frame, x: u32, y: u32, w: u32, h: u32) -> [u8; 3] {
    let sx = (x as u64 * frame.width as u64 / w as u64) as u32;
    let sy = (y as u64 * frame.height as u64 / h as u64) as u32;
    frame.pixel(sx.min(frame.width - 1), sy.min(frame.height - 1))
}

fn rgb([r, g, b]: [u8; 3]) -> Color {
    Color::Rgb { r, g, b }
}

fn is_quit(key: &KeyEvent) -> bool {
    if key.kind != KeyEventKind::Press {
        return false;
    }
    match key.code {
        KeyCode::Esc | KeyCode::Char('q') => true,
        KeyCode::Char('c') => key.modifiers.contains(KeyModifiers::CONTROL),
        _ => false,
    }
}

fn restore_terminal() -> io::Result<()> {
    execute!(io::stdout(), ResetColor, cursor::Show, LeaveAlternateScreen)?;
    terminal::disable_raw_mode()
}

/// Restore the terminal before the default panic message is printed.
fn install_panic_hook() {
    if HOOK_INSTALLED.swap(true, Ordering::SeqCst) {
        return;
    }
    let original_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let _ = restore_terminal();
        original_hook(info);
    }));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fit_keeps_aspect() {
        // 480x640 portrait frame into an 80x48 pixel area (80x24 terminal).
        assert_eq!(fit(480, 640, 80, 48), (36, 48));
        // Landscape limited by width.
        assert_eq!(fit(640, 480, 64, 100), (64, 48));
    }

    #[test]
    fn test_fit_degenerate() {
        assert_eq!(fit(640, 480, 0, 48), (0, 0));
        assert_eq!(fit(640, 480, 80, 1), (0, 0));
    }

    #[test]
    fn test_sample_corners() {
        let mut data = vec![0u8; 4 * 4 * 3];
        // Bottom-right pixel red.
        data[(15 * 3)..(15 * 3 + 3)].copy_from_slice(&[255, 0, 0]);
        let frame = Frame::from_rgb(data, 4, 4, 0).unwrap();

        assert_eq!(sample(&frame, 0, 0, 2, 2), [0, 0, 0]);
        assert_eq!(sample(&frame, 1, 1, 2, 2), [0, 0, 0]);
        assert_eq!(sample(&frame, 3, 3, 4, 4), [255, 0, 0]);
    }

    #[test]
    fn test_quit_keys() {
        assert!(is_quit(&KeyEvent::new(KeyCode::Esc, KeyModifiers::NONE)));
        assert!(is_quit(&KeyEvent::new(KeyCode::Char('q'), KeyModifiers::NONE)));
        assert!(is_quit(&KeyEvent::new(KeyCode::Char('c'), KeyModifiers::CONTROL)));
        assert!(!is_quit(&KeyEvent::new(KeyCode::Char('c'), KeyModifiers::NONE)));
        assert!(!is_quit(&KeyEvent::new(KeyCode::Enter, KeyModifiers::NONE)));
    }
}
