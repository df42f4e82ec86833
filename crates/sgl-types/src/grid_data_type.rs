use serde::{Deserialize, Serialize};

/// Derived attributes whose latest value is found by null-skipping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GridDataType {
    Ccv,
    Rmv,
    Frequency,
    Amplitude,
    GpsMode,
    Temperature,
    Mdp,
    Cca,
}

impl GridDataType {
    /// Every variant, in persisted bitmap order.
    pub const ALL: [Self; 8] = [
        Self::Ccv,
        Self::Rmv,
        Self::Frequency,
        Self::Amplitude,
        Self::GpsMode,
        Self::Temperature,
        Self::Mdp,
        Self::Cca,
    ];

    /// Position of this variant in [`GridDataType::ALL`].
    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Self::Ccv => 0,
            Self::Rmv => 1,
            Self::Frequency => 2,
            Self::Amplitude => 3,
            Self::GpsMode => 4,
            Self::Temperature => 5,
            Self::Mdp => 6,
            Self::Cca => 7,
        }
    }
}
