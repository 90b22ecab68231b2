use ratatui::{
    layout::{Constraint, Direction, Layout},
    style::{Color, Style},
    widgets::{Block, Borders, Gauge, List, ListItem, ListState, Paragraph, Wrap},
    Frame,
};
use heat_atlas::{PipelineStatus, format_mentions, sentiment_category};

use crate::map_draw::{MapView, category_color};
use crate::state::{AppState, Panel};

fn panel_block(title: &str, active: bool) -> Block<'_> {
    let style = if active { Style::default().fg(Color::Red) } else { Style::default() };
    Block::default().borders(Borders::ALL).title(title).border_style(style)
}

pub fn draw(f: &mut Frame, state: &AppState) {
    let chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage(22),
            Constraint::Percentage(58),
            Constraint::Percentage(20),
        ].as_ref())
        .split(f.area());

    // Left: associated terms
    let items: Vec<ListItem> = state.terms
        .iter()
        .map(|t| {
            let mark = if t.enabled { "[x]" } else { "[ ]" };
            ListItem::new(format!("{} {} ({})", mark, t.name, format_mentions(t.mentions)))
        })
        .collect();
    let mut list_state = ListState::default();
    if !state.terms.is_empty() {
        list_state.select(Some(state.selected));
    }
    let list = List::new(items)
        .block(panel_block("Associated terms", state.active_panel == Panel::Terms))
        .highlight_symbol(">> ")
        .highlight_style(Style::default().fg(Color::Red));
    f.render_stateful_widget(list, chunks[0], &mut list_state);

    // Center: clustered markers
    let points = state.pipeline.renderer().points();
    let view = MapView::new(&points, state.viewport.bbox);
    let title = format!(
        "{} | zoom {} | {} clusters",
        state.selection.category.as_deref().unwrap_or("no category"),
        state.viewport.zoom,
        view.cluster_count()
    );
    view.render(f, chunks[1], &title);

    // Right: info, sentiment, progress
    let right_chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Min(6),
            Constraint::Length(3),
            Constraint::Length(3),
        ].as_ref())
        .split(chunks[2]);

    let status = match state.status {
        PipelineStatus::Ready => "ready",
        PipelineStatus::Loading => "loading",
        PipelineStatus::Loaded => "loaded",
        PipelineStatus::Failed => "failed",
    };
    let info_text = format!("Status: {}\nTiles: {}\n\n{}", status, state.tile_count, state.info);
    let info = Paragraph::new(info_text)
        .block(Block::default().borders(Borders::ALL).title("Info"))
        .wrap(Wrap { trim: true });
    f.render_widget(info, right_chunks[0]);

    let dashboard = state.pipeline.publisher();
    let score = dashboard.sentiment_score().unwrap_or(0.0).clamp(0.0, 100.0);
    let color = category_color(sentiment_category(score));
    let sentiment = Gauge::default()
        .block(Block::default().borders(Borders::ALL).title("Avg sentiment"))
        .gauge_style(Style::default().fg(color))
        .percent(score.round() as u16);
    f.render_widget(sentiment, right_chunks[1]);

    let progress = Gauge::default()
        .block(Block::default().borders(Borders::ALL).title("Progress"))
        .gauge_style(Style::default().fg(Color::Green))
        .percent(u16::from(dashboard.progress()));
    f.render_widget(progress, right_chunks[2]);
}
