/// Row lifecycle as recorded by the causal-length clock row.
///
/// The stored counter is parity coded: odd means the row is live, even means
/// it is tombstoned. `Absent` means no causal-length row has been written
/// for the key yet (inserted and never updated or deleted).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Absent,
    Live(i64),
    Tombstoned(i64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowEvent {
    Insert,
    Update,
    Delete,
    /// A peer's causal length for the same key.
    RemoteApply(i64),
}

impl Lifecycle {
    pub fn from_causal_length(counter: Option<i64>) -> Self {
        match counter {
            None => Self::Absent,
            Some(n) if n % 2 == 0 => Self::Tombstoned(n),
            Some(n) => Self::Live(n),
        }
    }

    pub fn causal_length(&self) -> Option<i64> {
        match self {
            Self::Absent => None,
            Self::Live(n) | Self::Tombstoned(n) => Some(*n),
        }
    }

    pub fn is_tombstoned(&self) -> bool {
        matches!(self, Self::Tombstoned(_))
    }

    /// The state the generated triggers leave behind after `event`.
    pub fn transition(self, event: RowEvent) -> Self {
        match (self, event) {
            (Self::Absent, RowEvent::Insert) => Self::Absent,
            (Self::Absent, RowEvent::Update) => Self::Live(1),
            (Self::Absent, RowEvent::Delete) => Self::Tombstoned(2),
            (Self::Tombstoned(n), RowEvent::Insert | RowEvent::Update) => Self::Live(n + 1),
            (Self::Live(n), RowEvent::Insert | RowEvent::Update) => Self::Live(n),
            (Self::Live(n) | Self::Tombstoned(n), RowEvent::Delete) => {
                Self::from_causal_length(Some(n + 1))
            }
            (current, RowEvent::RemoteApply(remote)) => {
                let local = current.causal_length().unwrap_or(0);
                if remote > local {
                    Self::from_causal_length(Some(remote))
                } else {
                    current
                }
            }
        }
    }
}
