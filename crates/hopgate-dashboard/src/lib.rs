pub mod app;

use std::io;
use std::sync::Arc;

use color_eyre::Result;
use crossterm::{
    event::{DisableMouseCapture, EnableMouseCapture},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::prelude::*;
use tokio_util::sync::CancellationToken;

use hopgate_proxy::Engine;

use crate::app::App;

fn init_terminal() -> Result<Terminal<CrosstermBackend<io::Stdout>>> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let terminal = Terminal::new(backend)?;
    Ok(terminal)
}

fn restore_terminal(terminal: &mut Terminal<CrosstermBackend<io::Stdout>>) -> Result<()> {
    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture,
    )?;
    terminal.show_cursor()?;
    Ok(())
}

/// Runs the read-only dashboard until the user presses `q`/`Esc` or
/// `shutdown` is cancelled, then restores the terminal.
pub async fn run(engine: Arc<Engine>, shutdown: CancellationToken) -> Result<()> {
    let mut terminal = init_terminal()?;
    let mut app = App::new(engine);

    let result = app.run(&mut terminal, shutdown).await;

    restore_terminal(&mut terminal)?;
    result
}
