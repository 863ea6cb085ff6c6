//! Progress events for the step indicator.

use serde::{Deserialize, Serialize};

/// Percent reported once every stage has finished.
pub const COMPLETE_PERCENT: u8 = 100;

/// One progress report: the stage just reached and the overall percent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Progress {
    /// Name of the stage just reached (`"complete"` at 100%).
    pub stage: &'static str,
    /// Overall percent, `0..=100`.
    pub percent: u8,
}

impl Progress {
    /// The indicator step this percent falls in.
    #[must_use]
    pub const fn step(&self) -> ProgressStep {
        ProgressStep::from_percent(self.percent)
    }
}

/// The four steps shown by the progress indicator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ProgressStep {
    /// Step 1.
    Analyzing,
    /// Step 2.
    RemovingBackground,
    /// Step 3.
    Enhancing,
    /// Step 4.
    Finalizing,
}

impl ProgressStep {
    /// All steps in display order.
    pub const ALL: [Self; 4] = [
        Self::Analyzing,
        Self::RemovingBackground,
        Self::Enhancing,
        Self::Finalizing,
    ];

    /// Step for an overall percent: `min(percent / 25 + 1, 4)`.
    #[must_use]
    pub const fn from_percent(percent: u8) -> Self {
        match percent / 25 {
            0 => Self::Analyzing,
            1 => Self::RemovingBackground,
            2 => Self::Enhancing,
            _ => Self::Finalizing,
        }
    }

    /// One-based step number.
    #[must_use]
    pub const fn number(self) -> u8 {
        match self {
            Self::Analyzing => 1,
            Self::RemovingBackground => 2,
            Self::Enhancing => 3,
            Self::Finalizing => 4,
        }
    }

    /// Label shown next to the step.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Analyzing => "Analyzing image",
            Self::RemovingBackground => "Removing background",
            Self::Enhancing => "Enhancing signature",
            Self::Finalizing => "Finalizing",
        }
    }
}

impl std::fmt::Display for ProgressStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}
