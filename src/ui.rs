use ratatui::{
  Frame,
  layout::{Alignment, Constraint, Layout, Rect},
  style::{Color, Modifier, Style, Stylize},
  text::{Line, Span},
  widgets::{Block, BorderType, List, ListItem, Padding, Paragraph},
};

use crate::app::{App, AppMode};
use crate::coordinator::PlaybackState;
use crate::item::{Item, Resolution};
use crate::queue::Row;

// --- Palette ---

const BG: Color = Color::Rgb(0x1e, 0x1e, 0x2e);
const STRIPE_BG: Color = Color::Rgb(0x24, 0x24, 0x36);
const FG: Color = Color::Rgb(0xcd, 0xd6, 0xf4);
const MUTED: Color = Color::Rgb(0x7f, 0x84, 0x9c);
const ACCENT: Color = Color::Rgb(0xf5, 0xc2, 0xe7);
const BORDER: Color = Color::Rgb(0x45, 0x47, 0x5a);
const HIGHLIGHT_FG: Color = Color::Rgb(0x1e, 0x1e, 0x2e);
const HIGHLIGHT_BG: Color = Color::Rgb(0xb4, 0xbe, 0xfe);
const ACTIVE: Color = Color::Rgb(0xa6, 0xe3, 0xa1);
const MARKED: Color = Color::Rgb(0xf9, 0xe2, 0xaf);
const STATUS: Color = Color::Rgb(0x89, 0xdc, 0xeb);
const ERROR: Color = Color::Rgb(0xf3, 0x8b, 0xa8);
const KEY_FG: Color = Color::Rgb(0x1e, 0x1e, 0x2e);
const KEY_BG: Color = Color::Rgb(0x7f, 0x84, 0x9c);

// --- Helpers ---

/// Compute the display width of the first `n` chars (accounting for double-width CJK).
pub fn display_width(s: &str, n: usize) -> usize {
  use unicode_width::UnicodeWidthChar;
  s.chars().take(n).map(|c| c.width().unwrap_or(0)).sum()
}

/// Truncate a string to `max_width` characters, appending "…" if truncated.
fn truncate_str(s: &str, max_width: usize) -> String {
  if s.chars().count() <= max_width {
    s.to_string()
  } else {
    let truncated: String = s.chars().take(max_width.saturating_sub(1)).collect();
    format!("{}…", truncated)
  }
}

fn resolution_glyph(resolution: &Resolution) -> &'static str {
  match resolution {
    Resolution::Unresolved => " ",
    Resolution::Resolving => "…",
    Resolution::Resolved(_) => "✓",
    Resolution::Failed(_) => "✗",
  }
}

/// Right-hand metadata column: "author · duration · views · date".
fn item_details(item: &Item) -> String {
  let views = item.meta.view_count.map(|v| format!("{} views", v));
  [item.meta.author.clone(), item.meta.duration.clone(), views, item.meta.upload_date.clone()]
    .into_iter()
    .flatten()
    .collect::<Vec<_>>()
    .join(" · ")
}

// --- UI Rendering ---

pub fn ui(frame: &mut Frame, app: &mut App) {
  frame.render_widget(Block::default().style(Style::default().bg(BG)), frame.area());

  let [header_area, main_area, status_area, input_area, footer_area] = Layout::vertical([
    Constraint::Length(1),
    Constraint::Min(3),
    Constraint::Length(1),
    Constraint::Length(3),
    Constraint::Length(1),
  ])
  .areas(frame.area());

  render_header(frame, app, header_area);
  if app.engine.queue().row_count() == 0 {
    render_welcome(frame, main_area);
  } else {
    render_queue(frame, app, main_area);
  }
  render_status(frame, app, status_area);
  render_input(frame, app, input_area);
  render_footer(frame, app, footer_area);
}

fn render_header(frame: &mut Frame, app: &App, area: Rect) {
  let mut spans = vec![Span::styled(" ▶ ypq ", Style::default().fg(ACCENT).add_modifier(Modifier::BOLD))];
  if let Some(item) = app.engine.active_item() {
    let label = match app.engine.state() {
      PlaybackState::Idle if app.engine.is_stopped() => "stopped",
      PlaybackState::Idle => "ended",
      state => state.label(),
    };
    spans.push(Span::styled(format!("{}: ", label), Style::default().fg(MUTED)));
    let width = area.width.saturating_sub(30) as usize;
    spans.push(Span::styled(truncate_str(item.title(), width), Style::default().fg(FG)));
  }
  frame.render_widget(Line::from(spans), area);

  let version = format!("v{} ", env!("CARGO_PKG_VERSION"));
  let right = Line::from(Span::styled(&version, Style::default().fg(MUTED)));
  let right_area =
    Rect { x: area.x + area.width.saturating_sub(version.len() as u16), width: version.len() as u16, ..area };
  frame.render_widget(right, right_area);
}

fn render_welcome(frame: &mut Frame, area: Rect) {
  let text = vec![
    Line::from(""),
    Line::from(Span::styled("▶  Welcome to ypq", Style::default().fg(ACCENT).add_modifier(Modifier::BOLD))),
    Line::from(""),
    Line::from(Span::styled("Search YouTube and play the results back to back.", Style::default().fg(FG))),
    Line::from(""),
    Line::from(Span::styled("Type a query or paste a link below and press Enter.", Style::default().fg(MUTED))),
  ];
  let paragraph = Paragraph::new(text)
    .alignment(Alignment::Center)
    .block(Block::bordered().border_type(BorderType::Rounded).border_style(Style::default().fg(BORDER)));
  frame.render_widget(paragraph, area);
}

fn render_queue(frame: &mut Frame, app: &mut App, area: Rect) {
  let queue = app.engine.queue();
  let active = queue.active_index();
  let fetching = app.engine.is_fetching();
  // Inner width: area minus 2 borders minus 2 chars for highlight symbol ("▶ ") minus 4 marker columns
  let inner_w = area.width.saturating_sub(8) as usize;

  let items: Vec<ListItem> = (0..queue.row_count())
    .filter_map(|i| queue.row(i).map(|row| (i, row)))
    .map(|(i, row)| {
      let bg = if i % 2 == 1 { STRIPE_BG } else { BG };
      let line = match row {
        Row::LoadMore => {
          let label = if fetching { "Loading…" } else { "Load more…" };
          Line::from(Span::styled(format!("    {}", label), Style::default().fg(MUTED).add_modifier(Modifier::ITALIC)))
        }
        Row::Item(item) => {
          let is_active = active == Some(i);
          let is_marked = app.marked.contains(&item.id);
          let fg = if is_active { ACTIVE } else { FG };
          let right = item_details(item);
          let right_w = right.chars().count();
          let title_max = if right.is_empty() { inner_w } else { inner_w.saturating_sub(right_w + 2) };
          let title = truncate_str(item.title(), title_max);
          let gap = inner_w.saturating_sub(title.chars().count() + right_w);
          Line::from(vec![
            Span::styled(if is_active { "♪" } else { " " }, Style::default().fg(ACTIVE)),
            Span::styled(if is_marked { "*" } else { " " }, Style::default().fg(MARKED)),
            Span::styled(resolution_glyph(&item.resolution), Style::default().fg(MUTED)),
            Span::raw(" "),
            Span::styled(title, Style::default().fg(fg)),
            Span::raw(" ".repeat(gap)),
            Span::styled(right, Style::default().fg(MUTED)),
          ])
        }
      };
      ListItem::new(line).bg(bg)
    })
    .collect();

  let sort = app.engine.session().and_then(|s| s.params()).map(|p| p.sort).unwrap_or(app.sort);
  let title = format!(" Queue: {} videos · {} ", queue.len(), sort);
  let border = if app.mode == AppMode::Queue { ACCENT } else { BORDER };
  let list = List::new(items)
    .block(
      Block::bordered()
        .title(title)
        .title_style(Style::default().fg(ACCENT).add_modifier(Modifier::BOLD))
        .border_type(BorderType::Rounded)
        .border_style(Style::default().fg(border)),
    )
    .highlight_symbol("▶ ")
    .highlight_style(Style::default().fg(HIGHLIGHT_FG).bg(HIGHLIGHT_BG).add_modifier(Modifier::BOLD));

  frame.render_stateful_widget(list, area, &mut app.list_state);
}

fn render_status(frame: &mut Frame, app: &App, area: Rect) {
  let (text, style) = if let Some(err) = &app.last_error {
    (format!(" ⚠  {}", err), Style::default().fg(ERROR))
  } else if let Some(msg) = &app.status_message {
    (format!(" ⏳ {}", msg), Style::default().fg(STATUS))
  } else if let Some(msg) = &app.info_message {
    (format!(" ℹ  {}", msg), Style::default().fg(MUTED))
  } else {
    match app.engine.state() {
      PlaybackState::Idle => (" Ready".to_string(), Style::default().fg(MUTED)),
      state => (format!(" ♪ {}", state.label()), Style::default().fg(STATUS)),
    }
  };
  frame.render_widget(Paragraph::new(text).style(style), area);
}

fn render_input(frame: &mut Frame, app: &mut App, area: Rect) {
  let border_color = if app.mode == AppMode::Input { ACCENT } else { BORDER };
  let input_block = Block::bordered()
    .title(" Search YouTube or paste a link ")
    .title_style(Style::default().fg(border_color))
    .border_type(BorderType::Rounded)
    .border_style(Style::default().fg(border_color))
    .padding(Padding::horizontal(1));

  let inner_w = area.width.saturating_sub(4) as usize;
  let cursor_col = display_width(&app.input, app.cursor_position);

  if cursor_col < app.input_scroll {
    app.input_scroll = cursor_col;
  } else if cursor_col >= app.input_scroll + inner_w {
    app.input_scroll = cursor_col.saturating_sub(inner_w) + 1;
  }

  let visible: String = app
    .input
    .chars()
    .scan(0usize, |col, c| {
      let w = unicode_width::UnicodeWidthChar::width(c).unwrap_or(0);
      let start = *col;
      *col += w;
      Some((start, *col, c))
    })
    .skip_while(|(_, end, _)| *end <= app.input_scroll)
    .take_while(|(start, _, _)| *start < app.input_scroll + inner_w)
    .map(|(_, _, c)| c)
    .collect();

  let paragraph = Paragraph::new(visible).style(Style::default().fg(FG)).block(input_block);
  frame.render_widget(paragraph, area);

  if app.mode == AppMode::Input {
    let cursor_x = area.x + 2 + (cursor_col - app.input_scroll) as u16;
    frame.set_cursor_position((cursor_x, area.y + 1));
  }
}

fn render_footer(frame: &mut Frame, app: &App, area: Rect) {
  let playing = !app.engine.state().is_idle();
  let keys: Vec<(&str, &str)> = match app.mode {
    AppMode::Input => {
      let mut k = vec![("Enter", "Search"), ("^r", "Sort")];
      if playing {
        k.push(("^s", "Stop"));
      }
      if app.engine.queue().row_count() > 0 {
        k.push(("Tab", "Queue"));
      } else {
        k.push(("Esc", "Quit"));
      }
      k
    }
    AppMode::Queue => {
      let mut k = vec![("Enter", "Play"), ("m", "Mark"), ("J/K", "Move"), ("d", "Remove")];
      if playing {
        let pause_label = if matches!(app.engine.state(), PlaybackState::Paused(_)) { "Resume" } else { "Pause" };
        k.push(("Space", pause_label));
        k.push(("n", "Next"));
        k.push(("^s", "Stop"));
        k.push(("^o", "Web"));
      }
      k.push(("^r", "Sort"));
      k.push(("/", "Search"));
      k
    }
  };

  let spans: Vec<Span> = keys
    .iter()
    .enumerate()
    .flat_map(|(i, (key, action))| {
      let mut s = vec![
        Span::styled(format!(" {} ", key), Style::default().fg(KEY_FG).bg(KEY_BG)),
        Span::styled(format!(" {} ", action), Style::default().fg(MUTED)),
      ];
      if i < keys.len() - 1 {
        s.push(Span::raw("  "));
      }
      s
    })
    .collect();

  frame.render_widget(Line::from(spans), area);
}
