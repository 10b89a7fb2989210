//! Write primitives and ordered command batches.

/// A single write primitive.
///
/// Fields and members are already-encoded byte sequences; `key` is the store
/// key naming the whole collection.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Set one hash field.
    HSet {
        key: String,
        field: Vec<u8>,
        value: Vec<u8>,
    },
    /// Delete one hash field.
    HDel { key: String, field: Vec<u8> },
    /// Add one set member.
    SAdd { key: String, member: Vec<u8> },
    /// Remove one set member.
    SRem { key: String, member: Vec<u8> },
    /// Add or re-score one sorted-set member.
    ZAdd {
        key: String,
        score: f64,
        member: Vec<u8>,
    },
    /// Remove one sorted-set member.
    ZRem { key: String, member: Vec<u8> },
    /// Append bytes to a string value, creating it if missing.
    Append { key: String, value: Vec<u8> },
    /// Delete the key, whatever it holds.
    Del { key: String },
}

impl Command {
    /// The store key this command targets.
    #[must_use]
    pub fn key(&self) -> &str {
        match self {
            Self::HSet { key, .. }
            | Self::HDel { key, .. }
            | Self::SAdd { key, .. }
            | Self::SRem { key, .. }
            | Self::ZAdd { key, .. }
            | Self::ZRem { key, .. }
            | Self::Append { key, .. }
            | Self::Del { key } => key,
        }
    }

    /// Protocol name of the primitive, for logs.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::HSet { .. } => "HSET",
            Self::HDel { .. } => "HDEL",
            Self::SAdd { .. } => "SADD",
            Self::SRem { .. } => "SREM",
            Self::ZAdd { .. } => "ZADD",
            Self::ZRem { .. } => "ZREM",
            Self::Append { .. } => "APPEND",
            Self::Del { .. } => "DEL",
        }
    }
}

/// An ordered group of commands sent in one round trip.
///
/// Used both for the buffered writes of an open batch (sent with
/// [`Connection::pipeline`](super::Connection::pipeline)) and for atomic
/// blocks (sent with [`Connection::atomic`](super::Connection::atomic)).
/// A batch that is dropped without being sent is simply discarded.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Batch {
    commands: Vec<Command>,
}

impl Batch {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            commands: Vec::with_capacity(capacity),
        }
    }

    /// Appends a command; commands execute in push order.
    pub fn push(&mut self, command: Command) {
        self.commands.push(command);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    #[must_use]
    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    #[must_use]
    pub fn into_commands(self) -> Vec<Command> {
        self.commands
    }
}

impl Extend<Command> for Batch {
    fn extend<I: IntoIterator<Item = Command>>(&mut self, iter: I) {
        self.commands.extend(iter);
    }
}

impl FromIterator<Command> for Batch {
    fn from_iter<I: IntoIterator<Item = Command>>(iter: I) -> Self {
        Self {
            commands: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for Batch {
    type Item = Command;
    type IntoIter = std::vec::IntoIter<Command>;

    fn into_iter(self) -> Self::IntoIter {
        self.commands.into_iter()
    }
}
