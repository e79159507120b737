use std::path::PathBuf;
use std::time::Duration;

use tokio::time::sleep;
use tracing::debug;

use super::DesktopManager;
use crate::error::Result;

/// Default pause between the synthetic drag steps
pub const DROP_DELAY: Duration = Duration::from_millis(100);

/// Drop `files` onto the desktop at (`x`, `y`)
///
/// A drag window holding the files is opened at the top-left corner and a
/// button-1 drag from there to the target is synthesized. The pauses give the
/// window manager time to react between steps.
pub async fn drop_files(
    desktop: &dyn DesktopManager,
    x: i32,
    y: i32,
    files: &[PathBuf],
    delay: Duration,
) -> Result<()> {
    debug!("Dropping {} files at {}x{}", files.len(), x, y);
    desktop.open_drag_window(files)?;

    sleep(delay).await;
    desktop.move_to(10, 10);
    let result = desktop.button_down(1);
    if let Err(e) = result {
        desktop.close_drag_window();
        return Err(e);
    }
    desktop.move_to(x, y);
    sleep(delay).await;
    desktop.move_to(x, y);
    sleep(delay).await;
    let result = desktop.button_up(1);

    desktop.close_drag_window();
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::desktop::testing::FakeDesktop;

    #[tokio::test(start_paused = true)]
    async fn test_drag_sequence() {
        let desktop = FakeDesktop::new();
        let files = vec![PathBuf::from("/tmp/a.txt")];

        let started = tokio::time::Instant::now();
        drop_files(desktop.as_ref(), 300, 200, &files, DROP_DELAY).await.unwrap();

        assert_eq!(
            desktop.calls(),
            vec![
                "drag_open:1",
                "move:10,10",
                "button_down:1",
                "move:300,200",
                "move:300,200",
                "button_up:1",
                "drag_close",
            ]
        );
        assert_eq!(started.elapsed(), DROP_DELAY * 3);
    }
}
