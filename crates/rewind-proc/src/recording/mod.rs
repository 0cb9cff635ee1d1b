mod position;

use std::path::{Path, PathBuf};

use indexmap::IndexMap;

pub use self::position::Position;
use crate::{Checkpoint, Direction, Error};

/// Recording controller of a replayable target.
///
/// It keeps track of the checkpoints set by the user, of the execution
/// direction, and resolves [restart positions](Position). Checkpoint IDs are
/// allocated from a counter, so an ID is never reused within a session, even
/// after the checkpoint is cleared.
#[derive(Debug)]
pub struct RecordingController {
    /// Directory of the recorded trace.
    tracedir: PathBuf,

    /// Current execution direction.
    direction: Direction,

    /// Checkpoints, in creation order.
    checkpoints: IndexMap<u64, Checkpoint>,

    /// ID of the next checkpoint.
    next_checkpoint_id: u64,
}

/// Point of a recording to restart from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RestartPoint {
    /// The beginning of the recording.
    Beginning,

    /// A checkpoint.
    Checkpoint(Checkpoint),

    /// An event number.
    Event(u64),
}

impl RecordingController {
    /// Creates the recording controller of the trace stored in `tracedir`.
    pub fn new(tracedir: impl Into<PathBuf>) -> Self {
        Self {
            tracedir: tracedir.into(),
            direction: Direction::Forward,
            checkpoints: IndexMap::new(),
            next_checkpoint_id: 1,
        }
    }

    /// Returns the directory of the recorded trace.
    pub fn tracedir(&self) -> &Path {
        &self.tracedir
    }

    /// Returns the current execution direction.
    pub const fn direction(&self) -> Direction {
        self.direction
    }

    /// Changes the execution direction.
    pub fn set_direction(&mut self, direction: Direction) {
        if self.direction != direction {
            tracing::debug!(%direction, "direction changed");
        }

        self.direction = direction;
    }

    /// Adds a checkpoint at the position `when`, and returns its ID.
    pub fn add_checkpoint(&mut self, when: impl Into<String>, label: impl Into<String>) -> u64 {
        let id = self.next_checkpoint_id;
        self.next_checkpoint_id += 1;

        let checkpoint = Checkpoint {
            id,
            when: when.into(),
            label: label.into(),
        };

        tracing::debug!(id, when = %checkpoint.when, label = %checkpoint.label, "checkpoint added");

        self.checkpoints.insert(id, checkpoint);

        id
    }

    /// Returns the checkpoint with the given ID.
    pub fn checkpoint(&self, id: u64) -> crate::Result<&Checkpoint> {
        self.checkpoints.get(&id).ok_or(Error::UnknownCheckpoint(id))
    }

    /// Returns all the checkpoints, in creation order.
    pub fn checkpoints(&self) -> Vec<Checkpoint> {
        self.checkpoints.values().cloned().collect()
    }

    /// Returns the most recently created checkpoint which is still set.
    pub fn last_checkpoint(&self) -> Option<&Checkpoint> {
        self.checkpoints.values().next_back()
    }

    /// Removes the checkpoint with the given ID.
    pub fn clear_checkpoint(&mut self, id: u64) -> crate::Result<()> {
        if self.checkpoints.shift_remove(&id).is_none() {
            return Err(Error::UnknownCheckpoint(id));
        }

        tracing::debug!(id, "checkpoint cleared");

        Ok(())
    }

    /// Resolves a restart position.
    ///
    /// The last checkpoint resolves to the beginning of the recording when no
    /// checkpoint is set.
    pub fn resolve(&self, pos: Position) -> crate::Result<RestartPoint> {
        match pos {
            Position::LastCheckpoint => Ok(self
                .last_checkpoint()
                .cloned()
                .map_or(RestartPoint::Beginning, RestartPoint::Checkpoint)),
            Position::Checkpoint(id) => self.checkpoint(id).cloned().map(RestartPoint::Checkpoint),
            Position::Event(n) => Ok(RestartPoint::Event(n)),
        }
    }
}
