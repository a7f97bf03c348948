//! Immutable history snapshots of statistical units.

use serde::{Deserialize, Serialize};

use crate::types::{DbId, Timestamp};
use crate::unit::StatUnit;

/// Why a snapshot was written. Discriminants match `change_reasons` seed rows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeReason {
    #[default]
    Create = 1,
    Edit = 2,
    Delete = 3,
    Undelete = 4,
}

impl ChangeReason {
    pub fn id(self) -> i16 {
        self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            1 => Some(Self::Create),
            2 => Some(Self::Edit),
            3 => Some(Self::Delete),
            4 => Some(Self::Undelete),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Edit => "edit",
            Self::Delete => "delete",
            Self::Undelete => "undelete",
        }
    }
}

impl std::fmt::Display for ChangeReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One immutable state of a unit.
///
/// `parent_id` is the live unit's RegId. It is `0` while the snapshot is
/// staged for a unit that has not been persisted yet; the bulk buffer fills
/// it in after the unit row is written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistorySnapshot {
    pub id: DbId,
    pub parent_id: DbId,
    pub state: StatUnit,
    pub start_period: Timestamp,
    pub end_period: Timestamp,
    pub change_reason: ChangeReason,
    pub edit_comment: Option<String>,
    pub user_id: String,
}

impl HistorySnapshot {
    /// Snapshot `state` as it stood from its own start period until `until`.
    pub fn of(
        state: &StatUnit,
        until: Timestamp,
        reason: ChangeReason,
        comment: Option<String>,
        user_id: &str,
    ) -> Self {
        Self {
            id: 0,
            parent_id: state.reg_id,
            state: state.clone(),
            start_period: state.start_period,
            end_period: until,
            change_reason: reason,
            edit_comment: comment,
            user_id: user_id.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::unit::UnitType;
    use chrono::{Duration, Utc};

    #[test]
    fn snapshot_spans_prior_period() {
        let start = Utc::now() - Duration::days(3);
        let mut unit = StatUnit::new(UnitType::LegalUnit, start);
        unit.reg_id = 41;
        let now = Utc::now();
        let snap = HistorySnapshot::of(&unit, now, ChangeReason::Edit, None, "u1");
        assert_eq!(snap.parent_id, 41);
        assert_eq!(snap.start_period, start);
        assert_eq!(snap.end_period, now);
        assert_eq!(snap.change_reason, ChangeReason::Edit);
    }

    #[test]
    fn change_reason_ids() {
        for r in [
            ChangeReason::Create,
            ChangeReason::Edit,
            ChangeReason::Delete,
            ChangeReason::Undelete,
        ] {
            assert_eq!(ChangeReason::from_id(r.id()), Some(r));
        }
    }
}
