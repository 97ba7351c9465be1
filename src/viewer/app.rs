use std::io;

use anyhow::Result;
use crossterm::ExecutableCommand;
use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use crossterm::terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode};
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Direction, Layout};
use tracing::debug;

use crate::genealogy::{GenealogyModel, Lineage, Track};
use crate::metrics::{AggregateCalculator, LineageSeries};
use crate::viewer::render::{LineageTreeView, SeriesView, render_status_bar};

/// What the main pane shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewMode {
    /// Indented pre-order tree of the selected lineage
    Tree,
    /// Attribute sparklines per track
    Series,
}

/// Application state for the TUI viewer.
///
/// The model is read-only; only the selection and scroll state change.
pub struct App {
    pub model: GenealogyModel,
    /// Index into `model.lineages()`.
    pub lineage_idx: usize,
    /// Row of the selected track within the lineage tree.
    pub track_cursor: usize,
    /// Index into `model.frame_list()`.
    pub frame_cursor: usize,
    pub scroll_y: usize,
    pub view_mode: ViewMode,
    pub aggregate: AggregateCalculator,
    pub should_quit: bool,
}

impl App {
    pub fn new(model: GenealogyModel, max_depth: Option<usize>) -> Self {
        Self {
            model,
            lineage_idx: 0,
            track_cursor: 0,
            frame_cursor: 0,
            scroll_y: 0,
            view_mode: ViewMode::Tree,
            aggregate: AggregateCalculator::new().with_max_depth(max_depth),
            should_quit: false,
        }
    }

    pub fn selected_lineage(&self) -> Option<&Lineage> {
        self.model.lineages().get(self.lineage_idx)
    }

    /// Tracks of the selected lineage in display order.
    pub fn tree_rows(&self) -> Vec<&Track> {
        match self.selected_lineage() {
            Some(lineage) => self
                .model
                .lineage_tracks(&lineage.lineage_id, self.aggregate.max_depth)
                .collect(),
            None => Vec::new(),
        }
    }

    pub fn selected_track(&self) -> Option<&Track> {
        self.tree_rows().get(self.track_cursor).copied()
    }

    pub fn current_frame(&self) -> Option<i64> {
        self.model.frame_list().get(self.frame_cursor).copied()
    }

    pub fn series(&self) -> Option<LineageSeries> {
        let lineage = self.selected_lineage()?;
        let selected = self.selected_track().map(|t| t.track_id.as_str());
        self.aggregate
            .lineage_series(&self.model, &lineage.lineage_id, selected)
    }

    pub fn next_lineage(&mut self) {
        let count = self.model.lineages().len();
        if count > 0 {
            self.lineage_idx = (self.lineage_idx + 1) % count;
            self.reset_track();
        }
    }

    pub fn prev_lineage(&mut self) {
        let count = self.model.lineages().len();
        if count > 0 {
            self.lineage_idx = (self.lineage_idx + count - 1) % count;
            self.reset_track();
        }
    }

    fn reset_track(&mut self) {
        self.track_cursor = 0;
        self.scroll_y = 0;
    }

    pub fn next_track(&mut self) {
        let max = self.tree_rows().len().saturating_sub(1);
        self.track_cursor = (self.track_cursor + 1).min(max);
        self.keep_cursor_visible();
    }

    pub fn prev_track(&mut self) {
        self.track_cursor = self.track_cursor.saturating_sub(1);
        self.keep_cursor_visible();
    }

    fn keep_cursor_visible(&mut self) {
        if self.track_cursor < self.scroll_y {
            self.scroll_y = self.track_cursor;
        }
    }

    pub fn next_frame(&mut self) {
        let max = self.model.frame_list().len().saturating_sub(1);
        self.frame_cursor = (self.frame_cursor + 1).min(max);
    }

    pub fn prev_frame(&mut self) {
        self.frame_cursor = self.frame_cursor.saturating_sub(1);
    }

    /// Move the frame cursor to the first frame of the selected track.
    pub fn follow_track(&mut self) {
        let frame_col = &self.model.headers().frame;
        let Some(first) = self.selected_track().and_then(|t| {
            t.cells
                .iter()
                .find_map(|c| c.num(frame_col).and_then(crate::genealogy::frame_number))
        }) else {
            return;
        };
        if let Ok(pos) = self.model.frame_list().binary_search(&first) {
            debug!(frame = first, "following track");
            self.frame_cursor = pos;
        }
    }

    pub fn toggle_view(&mut self) {
        self.view_mode = match self.view_mode {
            ViewMode::Tree => ViewMode::Series,
            ViewMode::Series => ViewMode::Tree,
        };
    }

    /// Handle a key event.
    pub fn handle_key(&mut self, code: KeyCode) -> Result<()> {
        match code {
            KeyCode::Char('q') | KeyCode::Esc => self.should_quit = true,
            KeyCode::Char('n') | KeyCode::PageDown => self.next_lineage(),
            KeyCode::Char('p') | KeyCode::PageUp => self.prev_lineage(),
            KeyCode::Down => self.next_track(),
            KeyCode::Up => self.prev_track(),
            KeyCode::Right => self.next_frame(),
            KeyCode::Left => self.prev_frame(),
            KeyCode::Char('f') => self.follow_track(),
            KeyCode::Char('s') => self.toggle_view(),
            _ => {}
        }
        Ok(())
    }

    /// Run the TUI event loop.
    pub fn run_tui(&mut self) -> Result<()> {
        enable_raw_mode()?;
        io::stdout().execute(EnterAlternateScreen)?;
        let backend = CrosstermBackend::new(io::stdout());
        let mut terminal = Terminal::new(backend)?;

        while !self.should_quit {
            let series = match self.view_mode {
                ViewMode::Series => self.series(),
                ViewMode::Tree => None,
            };

            terminal.draw(|frame| {
                let chunks = Layout::default()
                    .direction(Direction::Vertical)
                    .constraints([Constraint::Min(5), Constraint::Length(1)])
                    .split(frame.area());

                // Keep the cursor on screen; borders take two rows.
                let visible = chunks[0].height.saturating_sub(2) as usize;
                if visible > 0 && self.track_cursor >= self.scroll_y + visible {
                    self.scroll_y = self.track_cursor + 1 - visible;
                }

                let current_frame = self.current_frame();
                let cells_in_frame = current_frame.map_or(0, |f| self.model.cells_at_frame(f).count());
                let selected = self.selected_track().map(|t| t.track_id.as_str());
                let lineage = self
                    .selected_lineage()
                    .map(|l| (l.lineage_id.as_str(), self.lineage_idx, self.model.lineages().len()));

                let status = render_status_bar(lineage, current_frame, cells_in_frame, selected);
                frame.render_widget(status, chunks[1]);

                match (&series, self.selected_lineage()) {
                    (Some(series), _) => {
                        let view = SeriesView {
                            series,
                            scroll_y: self.scroll_y,
                        };
                        frame.render_widget(view, chunks[0]);
                    }
                    (None, Some(lineage)) => {
                        let tree = LineageTreeView {
                            model: &self.model,
                            lineage_id: &lineage.lineage_id,
                            selected_track: selected,
                            frame: current_frame,
                            max_depth: self.aggregate.max_depth,
                            scroll_y: self.scroll_y,
                        };
                        frame.render_widget(tree, chunks[0]);
                    }
                    (None, None) => {}
                }
            })?;

            if event::poll(std::time::Duration::from_millis(100))?
                && let Event::Key(key) = event::read()?
                && key.kind == KeyEventKind::Press
            {
                self.handle_key(key.code)?;
            }
        }

        disable_raw_mode()?;
        io::stdout().execute(LeaveAlternateScreen)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::genealogy::GenealogyBuilder;
    use crate::table::{HeaderMap, RawRecord, RawValue};

    fn row(id: &str, parent: &str, frame: f64) -> RawRecord {
        RawRecord::new()
            .with("id", RawValue::Text(id.into()))
            .with("parent", RawValue::Text(parent.into()))
            .with("time", RawValue::Number(frame))
            .with("frame", RawValue::Number(frame))
            .with("mass", RawValue::Number(frame + 1.0))
    }

    /// Lineages a -> (b, c) and x.
    fn make_test_app() -> App {
        let rows = vec![
            row("a", "", 0.0),
            row("x", "", 0.0),
            row("a", "", 1.0),
            row("b", "a", 2.0),
            row("c", "a", 3.0),
        ];
        let model = GenealogyBuilder::new()
            .init(&rows, &[], &HeaderMap::default())
            .unwrap();
        App::new(model, None)
    }

    #[test]
    fn test_app_creation() {
        let app = make_test_app();
        assert_eq!(app.selected_lineage().unwrap().lineage_id, "a");
        assert_eq!(app.selected_track().unwrap().track_id, "a");
        assert_eq!(app.current_frame(), Some(0));
        assert!(!app.should_quit);
    }

    #[test]
    fn test_track_navigation() {
        let mut app = make_test_app();
        let ids: Vec<&str> = app.tree_rows().iter().map(|t| t.track_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);

        app.handle_key(KeyCode::Down).unwrap();
        app.handle_key(KeyCode::Down).unwrap();
        app.handle_key(KeyCode::Down).unwrap();
        assert_eq!(app.selected_track().unwrap().track_id, "c");
        app.handle_key(KeyCode::Up).unwrap();
        assert_eq!(app.selected_track().unwrap().track_id, "b");
    }

    #[test]
    fn test_lineage_navigation_wraps() {
        let mut app = make_test_app();
        app.handle_key(KeyCode::Down).unwrap();
        app.handle_key(KeyCode::Char('n')).unwrap();
        assert_eq!(app.selected_lineage().unwrap().lineage_id, "x");
        assert_eq!(app.track_cursor, 0);
        app.handle_key(KeyCode::Char('n')).unwrap();
        assert_eq!(app.selected_lineage().unwrap().lineage_id, "a");
        app.handle_key(KeyCode::Char('p')).unwrap();
        assert_eq!(app.selected_lineage().unwrap().lineage_id, "x");
    }

    #[test]
    fn test_frame_scrubbing_clamps() {
        let mut app = make_test_app();
        app.handle_key(KeyCode::Left).unwrap();
        assert_eq!(app.current_frame(), Some(0));
        for _ in 0..10 {
            app.handle_key(KeyCode::Right).unwrap();
        }
        assert_eq!(app.current_frame(), Some(3));
    }

    #[test]
    fn test_follow_track() {
        let mut app = make_test_app();
        app.handle_key(KeyCode::Down).unwrap();
        app.handle_key(KeyCode::Down).unwrap();
        app.handle_key(KeyCode::Char('f')).unwrap();
        assert_eq!(app.current_frame(), Some(3));
    }

    #[test]
    fn test_series_mutes_siblings() {
        let mut app = make_test_app();
        app.handle_key(KeyCode::Down).unwrap();
        app.handle_key(KeyCode::Char('s')).unwrap();
        assert_eq!(app.view_mode, ViewMode::Series);

        let series = app.series().unwrap();
        let muted: Vec<&str> = series
            .tracks
            .iter()
            .filter(|t| t.muted)
            .map(|t| t.track_id.as_str())
            .collect();
        assert_eq!(muted, vec!["c"]);
    }

    #[test]
    fn test_handle_key_quit() {
        let mut app = make_test_app();
        app.handle_key(KeyCode::Char('q')).unwrap();
        assert!(app.should_quit);
    }
}
