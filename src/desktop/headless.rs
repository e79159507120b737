//! Desktop without a display server
//!
//! Keeps cursor and clipboard state in memory and logs injected input. Used
//! when no display backend is attached to the process.

use std::path::PathBuf;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::trace;

use super::{drop_files, CursorImage, DesktopManager, ScreenSize};
use crate::config::DesktopConfig;
use crate::error::Result;

/// 1x1 transparent PNG
const BLANK_CURSOR: &[u8] = &[
    0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x48, 0x44, 0x52,
    0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x06, 0x00, 0x00, 0x00, 0x1F, 0x15, 0xC4,
    0x89, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x44, 0x41, 0x54, 0x78, 0x9C, 0x63, 0x00, 0x01, 0x00, 0x00,
    0x05, 0x00, 0x01, 0x0D, 0x0A, 0x2D, 0xB4, 0x00, 0x00, 0x00, 0x00, 0x49, 0x45, 0x4E, 0x44, 0xAE,
    0x42, 0x60, 0x82,
];

pub struct HeadlessDesktop {
    screen: ScreenSize,
    drop_delay: Duration,
    cursor: Mutex<(i32, i32)>,
    clipboard: Mutex<String>,
    cursor_tx: broadcast::Sender<u64>,
    clipboard_tx: broadcast::Sender<()>,
}

impl HeadlessDesktop {
    pub fn new(config: &DesktopConfig) -> Self {
        let (cursor_tx, _) = broadcast::channel(8);
        let (clipboard_tx, _) = broadcast::channel(8);
        Self {
            screen: ScreenSize {
                width: config.width,
                height: config.height,
                rate: config.rate,
            },
            drop_delay: Duration::from_millis(config.drop_delay_ms),
            cursor: Mutex::new((0, 0)),
            clipboard: Mutex::new(String::new()),
            cursor_tx,
            clipboard_tx,
        }
    }

    /// Drop `files` at (`x`, `y`) with the configured pause between steps
    pub async fn drop_files(&self, x: i32, y: i32, files: &[PathBuf]) -> Result<()> {
        drop_files(self, x, y, files, self.drop_delay).await
    }

    fn clamp(&self, x: i32, y: i32) -> (i32, i32) {
        (
            x.clamp(0, self.screen.width.saturating_sub(1) as i32),
            y.clamp(0, self.screen.height.saturating_sub(1) as i32),
        )
    }
}

impl DesktopManager for HeadlessDesktop {
    fn screen_size(&self) -> Option<ScreenSize> {
        Some(self.screen)
    }

    fn screen_configurations(&self) -> Vec<ScreenSize> {
        vec![self.screen]
    }

    fn cursor_position(&self) -> (i32, i32) {
        *self.cursor.lock()
    }

    fn cursor_image(&self) -> Result<CursorImage> {
        Ok(CursorImage {
            width: 1,
            height: 1,
            x: 0,
            y: 0,
            image: Bytes::from_static(BLANK_CURSOR),
            serial: 0,
        })
    }

    fn subscribe_cursor_changes(&self) -> broadcast::Receiver<u64> {
        self.cursor_tx.subscribe()
    }

    fn subscribe_clipboard(&self) -> broadcast::Receiver<()> {
        self.clipboard_tx.subscribe()
    }

    fn clipboard_text(&self) -> Result<String> {
        Ok(self.clipboard.lock().clone())
    }

    fn set_clipboard_text(&self, text: &str) -> Result<()> {
        *self.clipboard.lock() = text.to_string();
        let _ = self.clipboard_tx.send(());
        Ok(())
    }

    fn move_to(&self, x: i32, y: i32) {
        *self.cursor.lock() = self.clamp(x, y);
    }

    fn scroll(&self, dx: i32, dy: i32) {
        trace!("scroll {} {}", dx, dy);
    }

    fn button_down(&self, code: u32) -> Result<()> {
        trace!("button down {}", code);
        Ok(())
    }

    fn button_up(&self, code: u32) -> Result<()> {
        trace!("button up {}", code);
        Ok(())
    }

    fn key_down(&self, code: u32) -> Result<()> {
        trace!("key down {:#x}", code);
        Ok(())
    }

    fn key_up(&self, code: u32) -> Result<()> {
        trace!("key up {:#x}", code);
        Ok(())
    }

    fn open_drag_window(&self, files: &[PathBuf]) -> Result<()> {
        trace!("drag window with {} files", files.len());
        Ok(())
    }

    fn close_drag_window(&self) {}
}
