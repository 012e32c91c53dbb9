//! Ordered playback queue.
//!
//! Owns the items, the active row and the trailing "load more" sentinel. Every structural
//! change is recorded as a [`QueueEvent`] in an outbox that the engine drains after each
//! call, so observers see changes in the order they happened.

use std::collections::BTreeSet;
use std::fmt;
use std::ops::Range;

use snafu::ensure;
use tracing::debug;

use crate::error::{InvalidMoveSnafu, OutOfRangeSnafu, QueueError};
use crate::item::{Item, ItemId, Metadata, Resolution};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
  Up,
  Down,
}

impl fmt::Display for Direction {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Direction::Up => f.write_str("up"),
      Direction::Down => f.write_str("down"),
    }
  }
}

/// What sits at a given row of the list presentation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Row<'a> {
  Item(&'a Item),
  LoadMore,
}

/// Structural-change notifications, in emission order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueEvent {
  Reset,
  Appended { range: Range<usize> },
  /// Indices as they were before removal, highest first.
  Removed { indices: Vec<usize> },
  Moved { ids: Vec<ItemId>, direction: Direction },
  ActiveChanged { index: Option<usize>, id: Option<ItemId> },
  /// Resolution state of an item changed (no structural change).
  Updated { id: ItemId },
  SentinelChanged { visible: bool },
}

#[derive(Debug, Default)]
pub struct QueueModel {
  items: Vec<Item>,
  active: Option<usize>,
  has_more: bool,
  next_id: u64,
  outbox: Vec<QueueEvent>,
}

impl QueueModel {
  pub fn new() -> Self {
    Self::default()
  }

  // --- Accessors ---

  /// Number of playable items (the sentinel is not counted).
  pub fn len(&self) -> usize {
    self.items.len()
  }

  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }

  /// Number of rows the list presents, including the sentinel when visible.
  pub fn row_count(&self) -> usize {
    self.items.len() + usize::from(self.has_more)
  }

  pub fn row(&self, index: usize) -> Option<Row<'_>> {
    match self.get(index) {
      Some(item) => Some(Row::Item(item)),
      None if self.has_more() && index == self.len() => Some(Row::LoadMore),
      None => None,
    }
  }

  pub fn items(&self) -> &[Item] {
    &self.items
  }

  pub fn get(&self, index: usize) -> Option<&Item> {
    self.items.get(index)
  }

  pub fn item(&self, id: ItemId) -> Option<&Item> {
    self.items().iter().find(|item| item.id == id)
  }

  pub fn index_of(&self, id: ItemId) -> Option<usize> {
    self.items.iter().position(|item| item.id == id)
  }

  pub fn active_index(&self) -> Option<usize> {
    self.active
  }

  pub fn active_item(&self) -> Option<&Item> {
    self.active.and_then(|i| self.get(i))
  }

  pub fn active_id(&self) -> Option<ItemId> {
    self.active_item().map(|item| item.id)
  }

  pub fn has_more(&self) -> bool {
    self.has_more
  }

  /// Items remaining after the active one, or `None` when nothing is active.
  pub fn remaining_after_active(&self) -> Option<usize> {
    self.active.map(|i| self.items.len() - i - 1)
  }

  // --- Mutations ---

  pub fn reset(&mut self) {
    self.items.clear();
    self.active = None;
    self.has_more = false;
    self.outbox.push(QueueEvent::Reset);
  }

  /// Toggle the trailing "load more" row.
  pub fn set_has_more(&mut self, has_more: bool) {
    if self.has_more != has_more {
      self.has_more = has_more;
      self.outbox.push(QueueEvent::SentinelChanged { visible: has_more });
    }
  }

  /// Append a page at the tail. Returns the ids assigned to the new items.
  pub fn append(&mut self, page: Vec<Metadata>) -> Vec<ItemId> {
    let start = self.items.len();
    let ids: Vec<ItemId> = page
      .into_iter()
      .map(|meta| {
        self.next_id += 1;
        let id = ItemId(self.next_id);
        self.items.push(Item::new(id, meta));
        id
      })
      .collect();
    if !ids.is_empty() {
      self.outbox.push(QueueEvent::Appended { range: start..self.items.len() });
    }
    ids
  }

  /// Make `index` the active item. Re-activating the current row is a no-op and emits
  /// nothing, so selection restores after a drag never restart resolution.
  pub fn set_active(&mut self, index: usize) -> Result<(), QueueError> {
    ensure!(index < self.items.len(), OutOfRangeSnafu { index, len: self.items.len() });
    if self.active == Some(index) {
      return Ok(());
    }
    self.active = Some(index);
    self.push_active_changed();
    Ok(())
  }

  /// Remove the given rows. Sentinel rows are ignored; any other invalid row rejects the call.
  ///
  /// When the active item is removed, the first surviving item that followed it becomes
  /// active, else the last surviving item before it, else nothing.
  pub fn remove(&mut self, indices: &[usize]) -> Result<(), QueueError> {
    let len = self.items.len();
    let mut doomed = BTreeSet::new();
    for &index in indices {
      if index < len {
        doomed.insert(index);
      } else if !(self.has_more && index == len) {
        return OutOfRangeSnafu { index, len }.fail();
      }
    }
    if doomed.is_empty() {
      return Ok(());
    }

    let old_active = self.active;
    let replacement = old_active.filter(|a| doomed.contains(a)).and_then(|a| {
      let after = (a + 1..len).find(|i| !doomed.contains(i));
      let before = (0..a).rev().find(|i| !doomed.contains(i));
      after.or(before).map(|i| self.items[i].id)
    });

    let removed: Vec<usize> = doomed.iter().rev().copied().collect();
    for &index in &removed {
      self.items.remove(index);
    }
    debug!(count = removed.len(), remaining = self.items.len(), "queue: removed rows");
    self.outbox.push(QueueEvent::Removed { indices: removed });

    match old_active {
      Some(a) if doomed.contains(&a) => {
        self.active = replacement.and_then(|id| self.index_of(id));
        self.push_active_changed();
      }
      Some(a) => {
        self.active = Some(a - doomed.range(..a).count());
      }
      None => {}
    }
    Ok(())
  }

  /// Move every selected item one slot in `direction`, keeping their relative order.
  /// Either the whole selection moves or nothing does. Returns the new indices.
  pub fn move_rows(&mut self, indices: &[usize], direction: Direction) -> Result<Vec<usize>, QueueError> {
    let len = self.items.len();
    let mut selected = BTreeSet::new();
    for &index in indices {
      if index < len {
        selected.insert(index);
      } else if !(self.has_more && index == len) {
        return InvalidMoveSnafu { indices: indices.to_vec(), direction, reason: "row out of range" }.fail();
      }
    }
    let (Some(&first), Some(&last)) = (selected.first(), selected.last()) else {
      return Ok(Vec::new());
    };
    let blocked = match direction {
      Direction::Up => first == 0,
      Direction::Down => last + 1 == len,
    };
    ensure!(!blocked, InvalidMoveSnafu { indices: indices.to_vec(), direction, reason: "selection is at the edge" });

    let active_id = self.active_id();
    let ids: Vec<ItemId> = selected.iter().map(|&i| self.items[i].id).collect();
    let moved: Vec<usize> = match direction {
      Direction::Up => selected
        .iter()
        .map(|&i| {
          self.items.swap(i - 1, i);
          i - 1
        })
        .collect(),
      Direction::Down => {
        let mut moved: Vec<usize> = selected
          .iter()
          .rev()
          .map(|&i| {
            self.items.swap(i, i + 1);
            i + 1
          })
          .collect();
        moved.reverse();
        moved
      }
    };
    self.active = active_id.and_then(|id| self.index_of(id));
    self.outbox.push(QueueEvent::Moved { ids, direction });
    Ok(moved)
  }

  /// Index immediately after the active item, if there is one.
  pub fn next_index(&self) -> Option<usize> {
    self.active.map(|i| i + 1).filter(|&next| next < self.items.len())
  }

  /// Current indices of the given items, in the order given. Unknown ids are skipped.
  pub fn restore_selection(&self, ids: &[ItemId]) -> Vec<usize> {
    ids.iter().filter_map(|&id| self.index_of(id)).collect()
  }

  /// Record a resolution state change. Returns false if the item is gone.
  pub fn set_resolution(&mut self, id: ItemId, resolution: Resolution) -> bool {
    let Some(item) = self.items.iter_mut().find(|item| item.id == id) else {
      return false;
    };
    item.resolution = resolution;
    self.outbox.push(QueueEvent::Updated { id });
    true
  }

  /// Take all events recorded since the last drain.
  pub fn drain_events(&mut self) -> Vec<QueueEvent> {
    std::mem::take(&mut self.outbox)
  }

  fn push_active_changed(&mut self) {
    let id = self.active_id();
    self.outbox.push(QueueEvent::ActiveChanged { index: self.active, id });
  }
}
