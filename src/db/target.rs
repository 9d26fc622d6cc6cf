//! Logical database routing.

use serde::Serialize;

/// The logical database a statement is routed to.
///
/// Census, street-network and business-registry layers live in the General
/// database; public-works records live in the Secondary database. Every query
/// call names its target explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseTarget {
    General,
    Secondary,
}

impl DatabaseTarget {
    /// Both targets, in initialization order.
    pub const ALL: [DatabaseTarget; 2] = [DatabaseTarget::General, DatabaseTarget::Secondary];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::General => "general",
            Self::Secondary => "secondary",
        }
    }
}

impl std::fmt::Display for DatabaseTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
