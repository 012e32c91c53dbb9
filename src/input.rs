use anyhow::Result;
use ratatui::crossterm::event::{self, KeyCode, KeyModifiers};

use crate::app::{App, AppMode};
use crate::queue::Direction;

// --- Helpers ---

/// Convert a char index to a byte offset within the string.
pub fn char_to_byte_index(s: &str, char_idx: usize) -> usize {
  s.char_indices().nth(char_idx).map_or(s.len(), |(i, _)| i)
}

// --- Event Handling ---

pub async fn handle_key_event(app: &mut App, key: event::KeyEvent) -> Result<()> {
  if key.modifiers.contains(KeyModifiers::CONTROL) {
    match key.code {
      KeyCode::Char('c') => {
        app.should_quit = true;
        return Ok(());
      }
      KeyCode::Char('s') => {
        app.stop().await;
        return Ok(());
      }
      KeyCode::Char('o') => {
        app.open_web_page().await;
        return Ok(());
      }
      KeyCode::Char('r') => {
        app.cycle_sort().await;
        return Ok(());
      }
      _ => {}
    }
  }

  match app.mode {
    AppMode::Input => handle_input_key(app, key).await,
    AppMode::Queue => handle_queue_key(app, key).await,
  }
  Ok(())
}

async fn handle_input_key(app: &mut App, key: event::KeyEvent) {
  app.clear_error();
  match key.code {
    KeyCode::Enter => {
      app.submit().await;
    }
    KeyCode::Char(c) => {
      let byte_idx = char_to_byte_index(&app.input, app.cursor_position);
      app.input.insert(byte_idx, c);
      app.cursor_position += 1;
    }
    KeyCode::Backspace => {
      if app.cursor_position > 0 {
        app.cursor_position -= 1;
        let byte_idx = char_to_byte_index(&app.input, app.cursor_position);
        app.input.remove(byte_idx);
      }
    }
    KeyCode::Delete => {
      if app.cursor_position < app.input.chars().count() {
        let byte_idx = char_to_byte_index(&app.input, app.cursor_position);
        app.input.remove(byte_idx);
      }
    }
    KeyCode::Left => {
      app.cursor_position = app.cursor_position.saturating_sub(1);
    }
    KeyCode::Right => {
      if app.cursor_position < app.input.chars().count() {
        app.cursor_position += 1;
      }
    }
    KeyCode::Home => {
      app.cursor_position = 0;
    }
    KeyCode::End => {
      app.cursor_position = app.input.chars().count();
    }
    KeyCode::Esc => {
      if !app.input.is_empty() {
        app.input.clear();
        app.cursor_position = 0;
        app.input_scroll = 0;
      } else if !app.engine.queue().is_empty() {
        app.mode = AppMode::Queue;
      } else {
        app.should_quit = true;
      }
    }
    KeyCode::Down | KeyCode::Tab => {
      if app.engine.queue().row_count() > 0 {
        app.mode = AppMode::Queue;
      }
    }
    _ => {}
  }
}

async fn handle_queue_key(app: &mut App, key: event::KeyEvent) {
  let shift = key.modifiers.contains(KeyModifiers::SHIFT);
  match key.code {
    KeyCode::Enter => app.activate_cursor().await,
    KeyCode::Char(' ') => app.toggle_pause().await,
    KeyCode::Char('n') => app.skip().await,
    KeyCode::Char('m') => app.toggle_mark(),
    KeyCode::Char('d') | KeyCode::Delete => app.remove_selection().await,
    KeyCode::Char('K') => app.move_selection(Direction::Up).await,
    KeyCode::Char('J') => app.move_selection(Direction::Down).await,
    KeyCode::Up if shift => app.move_selection(Direction::Up).await,
    KeyCode::Down if shift => app.move_selection(Direction::Down).await,
    KeyCode::Down | KeyCode::Char('j') => app.move_cursor(true),
    KeyCode::Up | KeyCode::Char('k') => app.move_cursor(false),
    KeyCode::Char('l') => app.load_more(),
    KeyCode::Char('u') => app.show_stream_url(),
    KeyCode::Char('c') => app.open_channel_page(),
    KeyCode::Char('/') | KeyCode::Tab => app.mode = AppMode::Input,
    KeyCode::Esc => {
      if app.marked.is_empty() {
        app.mode = AppMode::Input;
      } else {
        app.marked.clear();
      }
    }
    KeyCode::Char('q') => app.should_quit = true,
    _ => {}
  }
}
