//! Deciding what to do with generated content when the target file exists.

use serde::{Deserialize, Serialize};

/// Configured default for an existing output file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictAction {
    #[default]
    Ask,
    Append,
    Overwrite,
    Skip,
}

impl std::str::FromStr for ConflictAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ask" => Ok(ConflictAction::Ask),
            "append" => Ok(ConflictAction::Append),
            "overwrite" => Ok(ConflictAction::Overwrite),
            "skip" => Ok(ConflictAction::Skip),
            other => Err(format!("unknown conflict action: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ConflictPolicy {
    pub auto_write: bool,
    pub conflict_action: ConflictAction,
}

/// What the orchestrator does with a finished job's content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Write,
    Append,
    Overwrite,
    Skip,
    AskUser,
}

/// A human decision for a job parked on a conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConflictChoice {
    Overwrite,
    Append,
    Skip,
}

impl ConflictChoice {
    pub const ALL: [ConflictChoice; 3] = [
        ConflictChoice::Overwrite,
        ConflictChoice::Append,
        ConflictChoice::Skip,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            ConflictChoice::Overwrite => "Overwrite",
            ConflictChoice::Append => "Append",
            ConflictChoice::Skip => "Skip",
        }
    }
}

impl From<ConflictChoice> for Resolution {
    fn from(choice: ConflictChoice) -> Self {
        match choice {
            ConflictChoice::Overwrite => Resolution::Overwrite,
            ConflictChoice::Append => Resolution::Append,
            ConflictChoice::Skip => Resolution::Skip,
        }
    }
}

/// Decide the next action for a job whose content is ready.
///
/// Interactive mode always defers to a human when the file exists. In
/// auto-write mode `Ask` has nobody to ask and is treated as `Skip`.
pub fn resolve(output_exists: bool, policy: &ConflictPolicy) -> Resolution {
    if !output_exists {
        return Resolution::Write;
    }
    if !policy.auto_write {
        return Resolution::AskUser;
    }
    match policy.conflict_action {
        ConflictAction::Append => Resolution::Append,
        ConflictAction::Overwrite => Resolution::Overwrite,
        ConflictAction::Skip | ConflictAction::Ask => Resolution::Skip,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ACTIONS: [ConflictAction; 4] = [
        ConflictAction::Ask,
        ConflictAction::Append,
        ConflictAction::Overwrite,
        ConflictAction::Skip,
    ];

    #[test]
    fn missing_output_is_always_written() {
        for auto_write in [false, true] {
            for conflict_action in ACTIONS {
                let policy = ConflictPolicy { auto_write, conflict_action };
                assert_eq!(resolve(false, &policy), Resolution::Write);
            }
        }
    }

    #[test]
    fn interactive_mode_always_asks() {
        for conflict_action in ACTIONS {
            let policy = ConflictPolicy { auto_write: false, conflict_action };
            assert_eq!(resolve(true, &policy), Resolution::AskUser);
        }
    }

    #[test]
    fn auto_write_follows_configured_action() {
        let cases = [
            (ConflictAction::Append, Resolution::Append),
            (ConflictAction::Overwrite, Resolution::Overwrite),
            (ConflictAction::Skip, Resolution::Skip),
            (ConflictAction::Ask, Resolution::Skip),
        ];
        for (conflict_action, expected) in cases {
            let policy = ConflictPolicy { auto_write: true, conflict_action };
            assert_eq!(resolve(true, &policy), expected);
        }
    }

    #[test]
    fn parses_actions_case_insensitively() {
        assert_eq!("Append".parse::<ConflictAction>(), Ok(ConflictAction::Append));
        assert_eq!("SKIP".parse::<ConflictAction>(), Ok(ConflictAction::Skip));
        assert!("merge".parse::<ConflictAction>().is_err());
    }
}
