use ratatui::buffer::Buffer;
use ratatui::layout::Rect;
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Paragraph, Widget};

use crate::genealogy::{GenealogyModel, Track};
use crate::metrics::{LineageSeries, SeriesPoint};

const SPARK_LEVELS: [char; 8] = ['▁', '▂', '▃', '▄', '▅', '▆', '▇', '█'];

/// Color a track by its generation, cycling through a small palette.
pub fn generation_color(generation: usize) -> Color {
    match generation % 6 {
        0 => Color::Green,
        1 => Color::Cyan,
        2 => Color::Blue,
        3 => Color::Magenta,
        4 => Color::Yellow,
        _ => Color::Red,
    }
}

/// One row of the lineage tree.
///
/// `related` is false for tracks that are neither ancestors nor descendants
/// of the selected track; those are dimmed.
pub fn render_tree_line(
    track: &Track,
    depth: usize,
    selected: bool,
    related: bool,
    in_frame: bool,
) -> Line<'static> {
    let base = if related {
        Style::default().fg(generation_color(track.generation()))
    } else {
        Style::default().fg(Color::DarkGray)
    };
    let id_style = if selected {
        base.add_modifier(Modifier::REVERSED | Modifier::BOLD)
    } else {
        base
    };

    let marker = if in_frame { "●" } else { "○" };
    let branch = if depth == 0 { "" } else { "└─" };

    Line::from(vec![
        Span::raw("  ".repeat(depth.saturating_sub(1))),
        Span::styled(branch.to_string(), base),
        Span::styled(format!("{marker} "), base),
        Span::styled(track.track_id.clone(), id_style),
        Span::styled(
            format!("  len {} gen {}", track.len(), track.generation()),
            Style::default().fg(Color::DarkGray),
        ),
    ])
}

/// Sparkline of a series squeezed or stretched to `width` columns.
pub fn render_sparkline(points: &[SeriesPoint], range: Option<(f64, f64)>, width: usize, color: Color) -> Line<'static> {
    if points.is_empty() || width == 0 {
        return Line::from(Vec::new());
    }
    let (lo, hi) = range.unwrap_or((0.0, 1.0));
    let span = hi - lo;

    let columns = width.min(points.len());
    let text: String = (0..columns)
        .map(|col| {
            let p = &points[col * points.len() / columns];
            let level = if span > 0.0 {
                (((p.value - lo) / span) * (SPARK_LEVELS.len() - 1) as f64).round() as usize
            } else {
                SPARK_LEVELS.len() / 2
            };
            SPARK_LEVELS[level.min(SPARK_LEVELS.len() - 1)]
        })
        .collect();

    Line::from(Span::styled(text, Style::default().fg(color)))
}

/// Pre-order tree of one lineage.
pub struct LineageTreeView<'a> {
    pub model: &'a GenealogyModel,
    pub lineage_id: &'a str,
    pub selected_track: Option<&'a str>,
    pub frame: Option<i64>,
    pub max_depth: Option<usize>,
    pub scroll_y: usize,
}

impl Widget for LineageTreeView<'_> {
    fn render(self, area: Rect, buf: &mut Buffer) {
        let block = Block::default()
            .title(format!(" lineage {} ", self.lineage_id))
            .borders(Borders::ALL);
        let inner = block.inner(area);
        block.render(area, buf);

        let rows = self
            .model
            .lineage_tracks(self.lineage_id, self.max_depth)
            .with_depth()
            .skip(self.scroll_y)
            .take(inner.height as usize);

        for (y, (track, depth)) in (inner.y..).zip(rows) {
            let related = self
                .selected_track
                .is_none_or(|s| self.model.is_direct_relation(s, &track.track_id));
            let in_frame = self
                .frame
                .is_some_and(|f| self.model.track_cell_at_frame(&track.track_id, f).is_some());
            let line = render_tree_line(
                track,
                depth,
                self.selected_track == Some(track.track_id.as_str()),
                related,
                in_frame,
            );
            buf.set_line(inner.x, y, &line, inner.width);
        }
    }
}

/// One sparkline per track of a lineage.
pub struct SeriesView<'a> {
    pub series: &'a LineageSeries,
    pub scroll_y: usize,
}

impl Widget for SeriesView<'_> {
    fn render(self, area: Rect, buf: &mut Buffer) {
        let title = match self.series.value_range {
            Some((lo, hi)) => format!(" {} [{lo:.2} .. {hi:.2}] ", self.series.attribute),
            None => format!(" {} (no data) ", self.series.attribute),
        };
        let block = Block::default().title(title).borders(Borders::ALL);
        let inner = block.inner(area);
        block.render(area, buf);

        let label_width = self
            .series
            .tracks
            .iter()
            .map(|t| t.track_id.len())
            .max()
            .unwrap_or(0)
            + 2;
        let spark_width = (inner.width as usize).saturating_sub(label_width);

        let rows = self.series.tracks.iter().skip(self.scroll_y).take(inner.height as usize);
        for (y, track) in (inner.y..).zip(rows) {
            let color = if track.muted {
                Color::DarkGray
            } else {
                generation_color(track.generation)
            };
            let label = Span::styled(
                format!("{:<label_width$}", track.track_id),
                Style::default().fg(color),
            );
            buf.set_line(inner.x, y, &Line::from(label), inner.width);

            let spark = render_sparkline(&track.points, self.series.value_range, spark_width, color);
            let x = inner.x + label_width.min(inner.width as usize) as u16;
            buf.set_line(x, y, &spark, spark_width as u16);
        }
    }
}

/// Render a status bar with summary information.
pub fn render_status_bar(
    lineage: Option<(&str, usize, usize)>,
    frame: Option<i64>,
    cells_in_frame: usize,
    track: Option<&str>,
) -> Paragraph<'static> {
    let bar = Style::default().fg(Color::White).bg(Color::DarkGray);

    let lineage_label = match lineage {
        Some((id, pos, total)) => format!(" Lineage: {id} ({}/{total}) ", pos + 1),
        None => " Lineage: - ".to_string(),
    };
    let frame_label = match frame {
        Some(f) => format!(" Frame: {f} ({cells_in_frame} cells) "),
        None => " Frame: - ".to_string(),
    };

    let mut parts = vec![Span::styled(lineage_label, bar), Span::styled(frame_label, bar)];

    if let Some(id) = track {
        parts.push(Span::styled(
            format!(" Track: {id} "),
            Style::default().fg(Color::Cyan).bg(Color::DarkGray),
        ));
    }

    parts.push(Span::styled(
        " [q]uit [n/p]lineage [↑↓]track [←→]frame [f]ollow [s]eries ".to_string(),
        Style::default().fg(Color::Yellow).bg(Color::DarkGray),
    ));

    Paragraph::new(Line::from(parts))
}
