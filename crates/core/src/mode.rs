use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Which store is authoritative for reads and which receive writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Mode {
    /// Base orchestrator: reads from unified, writes legacy (when capable) then unified.
    #[default]
    Mode0,
    /// Legacy only; the unified store is never called.
    Mode1,
    /// Writes both; reads prefer unified and fall back to legacy.
    Mode2,
    /// Unified authoritative; legacy receives best-effort mirrored writes.
    Mode3,
}

impl Mode {
    pub const ALL: [Mode; 4] = [Mode::Mode0, Mode::Mode1, Mode::Mode2, Mode::Mode3];

    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Mode0 => "mode0",
            Mode::Mode1 => "mode1",
            Mode::Mode2 => "mode2",
            Mode::Mode3 => "mode3",
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            Mode::Mode0 => 0,
            Mode::Mode1 => 1,
            Mode::Mode2 => 2,
            Mode::Mode3 => 3,
        }
    }

    pub fn from_u8(v: u8) -> Option<Mode> {
        Mode::ALL.get(v as usize).copied()
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid mode {0:?} (expect 0-3 or mode0-mode3)")]
pub struct ModeParseError(pub String);

impl FromStr for Mode {
    type Err = ModeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let t = s.trim().to_ascii_lowercase();
        let digits = t.strip_prefix("mode").unwrap_or(&t);
        digits
            .parse::<u8>()
            .ok()
            .and_then(Mode::from_u8)
            .ok_or_else(|| ModeParseError(s.to_string()))
    }
}
