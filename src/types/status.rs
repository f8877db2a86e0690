use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle of a project. Moves forward only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    Open,
    InProgress,
    Completed,
}

impl ProjectStatus {
    /// Returns true if `next` is strictly later in the lifecycle.
    /// open -> completed is allowed; any step backwards is not.
    #[must_use]
    pub fn can_transition_to(self, next: ProjectStatus) -> bool {
        next > self
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "open" => Some(Self::Open),
            "in_progress" => Some(Self::InProgress),
            "completed" => Some(Self::Completed),
            _ => None,
        }
    }
}

impl fmt::Display for ProjectStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of an application. Decided exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplicationStatus {
    #[default]
    Pending,
    Accepted,
    Rejected,
}

impl ApplicationStatus {
    #[must_use]
    pub fn can_transition_to(self, next: ApplicationStatus) -> bool {
        self == Self::Pending && next != Self::Pending
    }

    /// Rejected applications do not block a new application to the same project.
    #[must_use]
    pub const fn is_active(self) -> bool {
        !matches!(self, Self::Rejected)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "accepted" => Some(Self::Accepted),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }
}

impl fmt::Display for ApplicationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberRole {
    Creator,
    Member,
}

impl MemberRole {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Creator => "creator",
            Self::Member => "member",
        }
    }
}

impl fmt::Display for MemberRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_project_status_moves_forward_only() {
        assert!(ProjectStatus::Open.can_transition_to(ProjectStatus::InProgress));
        assert!(ProjectStatus::Open.can_transition_to(ProjectStatus::Completed));
        assert!(ProjectStatus::InProgress.can_transition_to(ProjectStatus::Completed));
        assert!(!ProjectStatus::Completed.can_transition_to(ProjectStatus::Open));
        assert!(!ProjectStatus::InProgress.can_transition_to(ProjectStatus::InProgress));
    }

    #[test]
    fn test_application_decided_once() {
        assert!(ApplicationStatus::Pending.can_transition_to(ApplicationStatus::Accepted));
        assert!(ApplicationStatus::Pending.can_transition_to(ApplicationStatus::Rejected));
        assert!(!ApplicationStatus::Accepted.can_transition_to(ApplicationStatus::Rejected));
        assert!(!ApplicationStatus::Rejected.can_transition_to(ApplicationStatus::Accepted));
        assert!(!ApplicationStatus::Pending.can_transition_to(ApplicationStatus::Pending));
    }

    #[test]
    fn test_status_wire_names() {
        assert_eq!(
            serde_json::to_string(&ProjectStatus::InProgress).unwrap(),
            "\"in_progress\""
        );
        assert_eq!(ProjectStatus::parse("in_progress"), Some(ProjectStatus::InProgress));
        assert_eq!(ApplicationStatus::parse("nope"), None);
    }
}
