use std::io;
use std::sync::Arc;
use std::time::Duration;

use color_eyre::Result;
use crossterm::event::{self, Event as CrosstermEvent, KeyCode};
use ratatui::prelude::*;
use ratatui::widgets::{Block, Borders, Cell, Row, Table};
use tokio_util::sync::CancellationToken;

use hopgate_proxy::Engine;

const TICK: Duration = Duration::from_millis(250);

struct TunnelRow {
    name: String,
    labels: String,
    latency: String,
    down: u64,
    up: u64,
}

struct BridgeRow {
    id: String,
    dst: String,
    status: String,
}

/// Read-only observer over a running `Engine`: no wizard flow, just two
/// tables refreshed on a tick. Mirrors the teacher's `App::run` draw loop
/// shape without any of its screen-navigation state machine.
pub struct App {
    engine: Arc<Engine>,
    should_quit: bool,
    tunnels: Vec<TunnelRow>,
    bridges: Vec<BridgeRow>,
}

impl App {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            engine,
            should_quit: false,
            tunnels: Vec::new(),
            bridges: Vec::new(),
        }
    }

    pub async fn run(
        &mut self,
        terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
        shutdown: CancellationToken,
    ) -> Result<()> {
        loop {
            self.refresh().await;
            terminal.draw(|f| self.draw(f))?;

            if event::poll(TICK).unwrap_or(false) {
                if let Ok(CrosstermEvent::Key(key)) = event::read() {
                    match key.code {
                        KeyCode::Char('q') | KeyCode::Esc => self.should_quit = true,
                        _ => {}
                    }
                }
            }

            if self.should_quit || shutdown.is_cancelled() {
                return Ok(());
            }
        }
    }

    async fn refresh(&mut self) {
        let mut tunnels = Vec::new();
        self.engine.range_tunnels(|name, tunnel| {
            tunnels.push((name.to_string(), tunnel.clone()));
        });

        let mut rows = Vec::with_capacity(tunnels.len());
        for (name, tunnel) in tunnels {
            let labels = tunnel.labels().await.join(",");
            rows.push(TunnelRow {
                name,
                labels,
                latency: tunnel.latency().to_string(),
                down: tunnel.down_bytes(),
                up: tunnel.up_bytes(),
            });
        }
        rows.sort_by(|a, b| a.name.cmp(&b.name));
        self.tunnels = rows;

        let mut bridges = Vec::new();
        self.engine.range_bridges(|id, entry| {
            bridges.push(BridgeRow {
                id: id.to_string(),
                dst: entry.dst_addr.clone(),
                status: entry.handle.status().to_string(),
            });
        });
        bridges.sort_by(|a, b| a.id.cmp(&b.id));
        self.bridges = bridges;
    }

    fn draw(&self, frame: &mut Frame) {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
            .split(frame.area());

        frame.render_widget(self.tunnels_table(), chunks[0]);
        frame.render_widget(self.bridges_table(), chunks[1]);
    }

    fn tunnels_table(&self) -> Table<'_> {
        let header = Row::new(vec!["name", "labels", "latency", "down", "up"])
            .style(Style::default().add_modifier(Modifier::BOLD));
        let rows = self.tunnels.iter().map(|t| {
            Row::new(vec![
                Cell::from(t.name.clone()),
                Cell::from(t.labels.clone()),
                Cell::from(t.latency.clone()),
                Cell::from(t.down.to_string()),
                Cell::from(t.up.to_string()),
            ])
        });
        Table::new(
            rows,
            [
                Constraint::Length(16),
                Constraint::Length(24),
                Constraint::Length(10),
                Constraint::Length(12),
                Constraint::Length(12),
            ],
        )
        .header(header)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title(" tunnels ")
                .border_style(Style::default().fg(Color::Cyan)),
        )
    }

    fn bridges_table(&self) -> Table<'_> {
        let header = Row::new(vec!["id", "destination", "status"])
            .style(Style::default().add_modifier(Modifier::BOLD));
        let rows = self.bridges.iter().map(|b| {
            Row::new(vec![
                Cell::from(b.id.clone()),
                Cell::from(b.dst.clone()),
                Cell::from(b.status.clone()),
            ])
        });
        Table::new(
            rows,
            [
                Constraint::Length(18),
                Constraint::Length(32),
                Constraint::Length(14),
            ],
        )
        .header(header)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title(" active bridges ")
                .border_style(Style::default().fg(Color::Green)),
        )
    }
}
