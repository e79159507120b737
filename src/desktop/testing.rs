//! Recording desktop for tests

use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::broadcast;

use super::{CursorImage, DesktopManager, ScreenSize};
use crate::error::Result;

pub(crate) struct FakeDesktop {
    calls: Mutex<Vec<String>>,
    cursor: Mutex<(i32, i32)>,
    cursor_image: Mutex<CursorImage>,
    clipboard: Mutex<String>,
    screen_known: Mutex<bool>,
    cursor_tx: broadcast::Sender<u64>,
    clipboard_tx: broadcast::Sender<()>,
}

impl FakeDesktop {
    pub(crate) fn new() -> Arc<Self> {
        let (cursor_tx, _) = broadcast::channel(8);
        let (clipboard_tx, _) = broadcast::channel(8);
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            cursor: Mutex::new((0, 0)),
            cursor_image: Mutex::new(Self::image(1)),
            clipboard: Mutex::new(String::new()),
            screen_known: Mutex::new(true),
            cursor_tx,
            clipboard_tx,
        })
    }

    pub(crate) fn image(serial: u64) -> CursorImage {
        CursorImage {
            width: 16,
            height: 16,
            x: 1,
            y: 2,
            image: Bytes::from(vec![serial as u8; 4]),
            serial,
        }
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    /// Swap the cursor bitmap and announce it
    pub(crate) fn change_cursor(&self, serial: u64) {
        *self.cursor_image.lock() = Self::image(serial);
        let _ = self.cursor_tx.send(serial);
    }

    /// Change the clipboard from the desktop side
    pub(crate) fn change_clipboard(&self, text: &str) {
        *self.clipboard.lock() = text.to_string();
        let _ = self.clipboard_tx.send(());
    }

    /// Report no screen size, as a desktop without a display would
    pub(crate) fn lose_screen(&self) {
        *self.screen_known.lock() = false;
    }

    fn record(&self, call: String) {
        self.calls.lock().push(call);
    }
}

impl DesktopManager for FakeDesktop {
    fn screen_size(&self) -> Option<ScreenSize> {
        if !*self.screen_known.lock() {
            return None;
        }
        Some(ScreenSize {
            width: 1920,
            height: 1080,
            rate: 60,
        })
    }

    fn screen_configurations(&self) -> Vec<ScreenSize> {
        vec![
            ScreenSize {
                width: 1920,
                height: 1080,
                rate: 60,
            },
            ScreenSize {
                width: 1280,
                height: 720,
                rate: 30,
            },
        ]
    }

    fn cursor_position(&self) -> (i32, i32) {
        *self.cursor.lock()
    }

    fn cursor_image(&self) -> Result<CursorImage> {
        Ok(self.cursor_image.lock().clone())
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
        self.record(format!("clipboard:{}", text));
        *self.clipboard.lock() = text.to_string();
        Ok(())
    }

    fn move_to(&self, x: i32, y: i32) {
        self.record(format!("move:{},{}", x, y));
        *self.cursor.lock() = (x, y);
    }

    fn scroll(&self, dx: i32, dy: i32) {
        self.record(format!("scroll:{},{}", dx, dy));
    }

    fn button_down(&self, code: u32) -> Result<()> {
        self.record(format!("button_down:{}", code));
        Ok(())
    }

    fn button_up(&self, code: u32) -> Result<()> {
        self.record(format!("button_up:{}", code));
        Ok(())
    }

    fn key_down(&self, code: u32) -> Result<()> {
        self.record(format!("key_down:{}", code));
        Ok(())
    }

    fn key_up(&self, code: u32) -> Result<()> {
        self.record(format!("key_up:{}", code));
        Ok(())
    }

    fn open_drag_window(&self, files: &[PathBuf]) -> Result<()> {
        self.record(format!("drag_open:{}", files.len()));
        Ok(())
    }

    fn close_drag_window(&self) {
        self.record("drag_close".to_string());
    }
}
