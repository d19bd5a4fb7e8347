use ratatui::layout::{Alignment, Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Clear, List, ListItem, ListState, Paragraph};

use super::picker::{HostPicker, PickerView, SessionMode};
use crate::config::HostDescriptor;
use crate::config::host::DEFAULT_PORT;

const LIST_HINTS: &str = "Enter: Open  K/↑: Up  J/↓: Down  /: Search  Esc: Back  Q: Quit";
const SEARCH_HINTS: &str = "Enter: Open first match  Esc: Clear search";
const ACTION_HINTS: &str = "Enter: Connect  K/↑ J/↓: Choose  Esc: Back";

/// Row text for one entry: `+ name` for groups, `name - user@host` for leaves.
pub fn host_label(host: &HostDescriptor) -> String {
    if host.is_group() {
        return format!("+ {}", host.name);
    }
    if host.port == DEFAULT_PORT {
        format!("{} - {}@{}", host.name, host.user, host.host)
    } else {
        format!("{} - {}@{}:{}", host.name, host.user, host.host, host.port)
    }
}

pub fn breadcrumb_title(crumbs: &[&str]) -> String {
    if crumbs.is_empty() {
        "Hosts".to_string()
    } else {
        format!("Path: {}", crumbs.join(" / "))
    }
}

pub fn draw_picker(frame: &mut ratatui::Frame<'_>, picker: &HostPicker) {
    let search_on = !picker.search().is_off();
    let layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Min(1),
            Constraint::Length(if search_on { 3 } else { 0 }),
            Constraint::Length(1),
        ])
        .split(frame.area());

    draw_list(frame, layout[0], picker);

    if search_on {
        let style = if picker.search().is_on() {
            Style::default().fg(Color::Cyan)
        } else {
            Style::default().fg(Color::Gray)
        };
        let input = Paragraph::new(format!("/{}", picker.search().query())).block(
            Block::default()
                .borders(Borders::ALL)
                .title("Search")
                .style(style),
        );
        frame.render_widget(input, layout[1]);
    }

    let hints = match picker.view() {
        PickerView::Action { .. } => ACTION_HINTS,
        PickerView::List if picker.search().is_on() => SEARCH_HINTS,
        PickerView::List => LIST_HINTS,
    };
    draw_footer(frame, layout[2], hints);

    if let PickerView::Action { cursor } = picker.view() {
        draw_action_popup(frame, picker, cursor);
    }
}

fn draw_list(frame: &mut ratatui::Frame<'_>, area: Rect, picker: &HostPicker) {
    let visible = picker.visible();
    let items: Vec<ListItem> = visible
        .iter()
        .map(|host| {
            let style = if host.is_group() {
                Style::default().fg(Color::Yellow)
            } else {
                Style::default()
            };
            ListItem::new(Line::from(Span::styled(host_label(host), style)))
        })
        .collect();

    let title = format!(
        "{} ({}/{})",
        breadcrumb_title(&picker.breadcrumb()),
        if visible.is_empty() {
            0
        } else {
            picker.selected() + 1
        },
        visible.len()
    );
    let list = List::new(items)
        .block(Block::default().borders(Borders::ALL).title(title))
        .highlight_style(
            Style::default()
                .fg(Color::Cyan)
                .add_modifier(Modifier::BOLD),
        )
        .highlight_symbol("▶ ");

    let selected = (!visible.is_empty()).then_some(picker.selected());
    frame.render_stateful_widget(list, area, &mut ListState::default().with_selected(selected));
}

fn draw_footer(frame: &mut ratatui::Frame<'_>, area: Rect, hints: &str) {
    let footer = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Min(10), Constraint::Length(20)])
        .split(area);
    let dim = Style::default()
        .fg(Color::White)
        .add_modifier(Modifier::DIM);

    frame.render_widget(
        Paragraph::new(Line::from(Span::styled(hints, dim))).alignment(Alignment::Left),
        footer[0],
    );
    frame.render_widget(
        Paragraph::new(Line::from(Span::styled(
            format!("hopshell v{}", env!("CARGO_PKG_VERSION")),
            dim,
        )))
        .alignment(Alignment::Right),
        footer[1],
    );
}

fn draw_action_popup(frame: &mut ratatui::Frame<'_>, picker: &HostPicker, cursor: usize) {
    let title = picker
        .selected_host()
        .map(|h| h.name.clone())
        .unwrap_or_default();
    let area = centered(frame.area(), 30, 4);
    let items: Vec<ListItem> = SessionMode::ALL
        .iter()
        .map(|mode| ListItem::new(mode.to_string()))
        .collect();
    let list = List::new(items)
        .block(Block::default().borders(Borders::ALL).title(title))
        .highlight_style(
            Style::default()
                .fg(Color::Cyan)
                .add_modifier(Modifier::BOLD),
        )
        .highlight_symbol("▶ ");

    frame.render_widget(Clear, area);
    frame.render_stateful_widget(
        list,
        area,
        &mut ListState::default().with_selected(Some(cursor)),
    );
}

fn centered(area: Rect, width: u16, height: u16) -> Rect {
    let width = width.min(area.width);
    let height = height.min(area.height);
    Rect {
        x: area.x + (area.width - width) / 2,
        y: area.y + (area.height - height) / 2,
        width,
        height,
    }
}
