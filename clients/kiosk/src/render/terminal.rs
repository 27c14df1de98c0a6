use std::io::{stdout, Stdout, Write};
use std::time::{Duration, Instant};

use crossterm::{
    cursor, execute, queue,
    style::{Color, Print, ResetColor, SetForegroundColor},
    terminal::{self, Clear, ClearType},
};

use crate::render::{DisplayView, RenderError, Renderer};
use crate::runtime::BlockReason;

const LITE_FPS_CAP: u32 = 20;

/// Renders [`DisplayView`]s to the local terminal. Stands in for the
/// browser-canvas renderer the original UI targets; kept deliberately
/// simple (no marquee animation thread) since a kiosk terminal has no
/// `requestAnimationFrame` — each draw just reflects the latest tick.
pub struct TerminalRenderer {
    out: Stdout,
    lite_mode: bool,
    last_frame: Option<Instant>,
}

impl TerminalRenderer {
    pub fn new(lite_mode: bool) -> Result<Self, RenderError> {
        terminal::enable_raw_mode().map_err(|e| RenderError::Backend(e.to_string()))?;
        let mut out = stdout();
        execute!(out, terminal::EnterAlternateScreen, cursor::Hide)
            .map_err(|e| RenderError::Backend(e.to_string()))?;
        Ok(Self { out, lite_mode, last_frame: None })
    }

    /// In lite mode, skip the draw entirely if we're being asked to render
    /// faster than the FPS cap allows (`spec.md` §4.8 "Rendering").
    fn should_skip_frame(&self) -> bool {
        if !self.lite_mode {
            return false;
        }
        let min_interval = Duration::from_secs_f64(1.0 / LITE_FPS_CAP as f64);
        matches!(self.last_frame, Some(last) if last.elapsed() < min_interval)
    }

    fn begin_frame(&mut self) -> Result<(), RenderError> {
        queue!(self.out, Clear(ClearType::All), cursor::MoveTo(0, 0))
            .map_err(|e| RenderError::Backend(e.to_string()))
    }

    fn end_frame(&mut self) -> Result<(), RenderError> {
        self.out.flush().map_err(|e| RenderError::Backend(e.to_string()))?;
        self.last_frame = Some(Instant::now());
        Ok(())
    }

    fn accent(&mut self, view: &DisplayView) -> Result<(), RenderError> {
        let color = parse_hex_color(&view.accent_color).unwrap_or(Color::Blue);
        queue!(self.out, SetForegroundColor(color)).map_err(|e| RenderError::Backend(e.to_string()))
    }
}

impl Renderer for TerminalRenderer {
    fn render(&mut self, view: &DisplayView) -> Result<(), RenderError> {
        if self.should_skip_frame() {
            return Ok(());
        }
        self.begin_frame()?;
        self.accent(view)?;
        queue!(self.out, Print(format!("{}\r\n", view.headline)))
            .map_err(|e| RenderError::Backend(e.to_string()))?;
        queue!(self.out, ResetColor).map_err(|e| RenderError::Backend(e.to_string()))?;

        let mins = view.countdown_seconds / 60;
        let secs = view.countdown_seconds % 60;
        queue!(self.out, Print(format!("{mins:02}:{secs:02} remaining\r\n")))
            .map_err(|e| RenderError::Backend(e.to_string()))?;
        queue!(self.out, Print(progress_bar(view.progress_fraction)))
            .map_err(|e| RenderError::Backend(e.to_string()))?;

        if let Some(period) = &view.current_period {
            queue!(self.out, Print(format!("now: {} — {}\r\n", period.class, period.subject)))
                .map_err(|e| RenderError::Backend(e.to_string()))?;
        }
        if let Some(next) = &view.next_period {
            queue!(self.out, Print(format!("next: {} — {}\r\n", next.class, next.subject)))
                .map_err(|e| RenderError::Backend(e.to_string()))?;
        }

        if view.day_over {
            queue!(self.out, Print("-- day complete --\r\n"))
                .map_err(|e| RenderError::Backend(e.to_string()))?;
        } else {
            for entry in &view.standby {
                queue!(self.out, Print(format!("  standby: {} {}\r\n", entry.class, entry.subject)))
                    .map_err(|e| RenderError::Backend(e.to_string()))?;
            }
        }

        if let Some(a) = &view.active_announcement {
            queue!(self.out, Print(format!("[announcement] {}: {}\r\n", a.title, a.body)))
                .map_err(|e| RenderError::Backend(e.to_string()))?;
        }
        if let Some(e) = &view.active_excellence {
            queue!(self.out, Print(format!("[excellence] {}: {}\r\n", e.name, e.reason)))
                .map_err(|e| RenderError::Backend(e.to_string()))?;
        }

        self.end_frame()
    }

    fn render_loading(&mut self) -> Result<(), RenderError> {
        self.begin_frame()?;
        queue!(self.out, Print("loading…\r\n")).map_err(|e| RenderError::Backend(e.to_string()))?;
        self.end_frame()
    }

    fn render_blocked(&mut self, reason: BlockReason) -> Result<(), RenderError> {
        self.begin_frame()?;
        queue!(self.out, SetForegroundColor(Color::Red)).map_err(|e| RenderError::Backend(e.to_string()))?;
        let message = match reason {
            BlockReason::ScreenUnknown => "this screen token is unknown or inactive",
            BlockReason::ScreenBound => "this screen is already bound to another device",
            BlockReason::DeviceRequired => "a device id is required to display this screen",
        };
        queue!(self.out, Print(format!("display blocked: {message}\r\n")))
            .map_err(|e| RenderError::Backend(e.to_string()))?;
        queue!(self.out, ResetColor).map_err(|e| RenderError::Backend(e.to_string()))?;
        self.end_frame()
    }
}

impl Drop for TerminalRenderer {
    fn drop(&mut self) {
        let _ = execute!(self.out, cursor::Show, terminal::LeaveAlternateScreen);
        let _ = terminal::disable_raw_mode();
    }
}

fn progress_bar(fraction: f32) -> String {
    const WIDTH: usize = 30;
    let filled = ((fraction.clamp(0.0, 1.0)) * WIDTH as f32).round() as usize;
    format!("[{}{}]\r\n", "#".repeat(filled), "-".repeat(WIDTH - filled))
}

fn parse_hex_color(hex: &str) -> Option<Color> {
    let hex = hex.strip_prefix('#')?;
    if hex.len() != 6 {
        return None;
    }
    let r = u8::from_str_radix(&hex[0..2], 16).ok()?;
    let g = u8::from_str_radix(&hex[2..4], 16).ok()?;
    let b = u8::from_str_radix(&hex[4..6], 16).ok()?;
    Some(Color::Rgb { r, g, b })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_colors_parse_to_rgb() {
        assert_eq!(parse_hex_color("#2563eb"), Some(Color::Rgb { r: 0x25, g: 0x63, b: 0xeb }));
        assert_eq!(parse_hex_color("not-a-color"), None);
    }

    #[test]
    fn progress_bar_fills_proportionally() {
        assert_eq!(progress_bar(0.0), format!("[{}]\r\n", "-".repeat(30)));
        assert_eq!(progress_bar(1.0), format!("[{}]\r\n", "#".repeat(30)));
    }
}
