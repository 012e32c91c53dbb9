use snafu::Snafu;

use crate::queue::Direction;

pub type Result<T> = std::result::Result<T, Error>;

/// Contract violations on queue calls. These are caller bugs, never user-facing.
#[derive(Snafu, Debug)]
#[snafu(visibility(pub))]
pub enum QueueError {
  #[snafu(display("Row {index} is not a playable item (queue holds {len} items)"))]
  OutOfRange {
    index: usize,
    len: usize,
    #[snafu(implicit)]
    loc: snafu::Location,
  },
  #[snafu(display("Cannot move rows {indices:?} {direction}: {reason}"))]
  InvalidMove {
    indices: Vec<usize>,
    direction: Direction,
    reason: &'static str,
    #[snafu(implicit)]
    loc: snafu::Location,
  },
}

/// Errors the engine reports to its caller. Async failures (fetch, resolution, playback)
/// are recovered inside the engine and surface as events instead.
#[derive(Snafu, Debug)]
#[snafu(visibility(pub))]
pub enum Error {
  #[snafu(transparent)]
  Queue { source: QueueError },
  #[snafu(display("Enter a search term."))]
  EmptyQuery {
    #[snafu(implicit)]
    loc: snafu::Location,
  },
  #[snafu(display("No video link found in {text:?}"))]
  UnrecognizedSource {
    text: String,
    #[snafu(implicit)]
    loc: snafu::Location,
  },
  #[snafu(display("No search to re-sort"))]
  NoActiveSearch {
    #[snafu(implicit)]
    loc: snafu::Location,
  },
}

impl Error {
  /// Whether the error stems from a queue contract violation rather than user input.
  pub fn is_contract_violation(&self) -> bool {
    matches!(self, Error::Queue { .. })
  }
}
