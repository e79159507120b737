//! Desktop seam
//!
//! Input injection, screen configuration and clipboard access are provided by
//! the host environment through [`DesktopManager`].

mod file_drop;
mod headless;
#[cfg(test)]
pub(crate) mod testing;

pub use file_drop::{drop_files, DROP_DELAY};
pub use headless::HeadlessDesktop;

use std::path::PathBuf;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::error::Result;

/// Current screen mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScreenSize {
    pub width: u32,
    pub height: u32,
    pub rate: u16,
}

/// A cursor bitmap with its hotspot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CursorImage {
    pub width: u16,
    pub height: u16,
    pub x: u16,
    pub y: u16,
    /// PNG encoded bitmap
    pub image: Bytes,
    /// Changes whenever the bitmap changes
    pub serial: u64,
}

pub trait DesktopManager: Send + Sync {
    fn screen_size(&self) -> Option<ScreenSize>;

    /// Screen modes the display supports
    fn screen_configurations(&self) -> Vec<ScreenSize>;

    fn cursor_position(&self) -> (i32, i32);

    fn cursor_image(&self) -> Result<CursorImage>;

    /// Emits the new cursor serial whenever the cursor bitmap changes
    fn subscribe_cursor_changes(&self) -> broadcast::Receiver<u64>;

    /// Emits whenever the desktop clipboard changes
    fn subscribe_clipboard(&self) -> broadcast::Receiver<()>;

    fn clipboard_text(&self) -> Result<String>;

    fn set_clipboard_text(&self, text: &str) -> Result<()>;

    fn move_to(&self, x: i32, y: i32);

    fn scroll(&self, dx: i32, dy: i32);

    fn button_down(&self, code: u32) -> Result<()>;

    fn button_up(&self, code: u32) -> Result<()>;

    fn key_down(&self, code: u32) -> Result<()>;

    fn key_up(&self, code: u32) -> Result<()>;

    /// Show a window offering `files` as a drag source
    fn open_drag_window(&self, files: &[PathBuf]) -> Result<()>;

    fn close_drag_window(&self);
}
