//! Domain records for races, entries, results and votes.

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};

/// Implements text round-tripping (`as_str`/`parse`) plus SQLite conversion
/// for a fieldless enum stored as TEXT.
macro_rules! text_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }

            pub fn parse(s: &str) -> Option<Self> {
                match s {
                    $($text => Some($name::$variant),)+
                    _ => None,
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl ToSql for $name {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.as_str()))
            }
        }

        impl FromSql for $name {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                let text = value.as_str()?;
                $name::parse(text).ok_or_else(|| {
                    FromSqlError::Other(format!("unknown {}: {}", stringify!($name), text).into())
                })
            }
        }
    };
}

/// Race grade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Grade {
    #[serde(rename = "none")]
    None,
    G1,
    G2,
    G3,
    #[serde(rename = "OP")]
    Open,
    #[serde(rename = "L")]
    Listed,
}

text_enum!(Grade {
    None => "none",
    G1 => "G1",
    G2 => "G2",
    G3 => "G3",
    Open => "OP",
    Listed => "L",
});

/// Race lifecycle. Forward-only; `Finished` is terminal for settlement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RaceStatus {
    Upcoming,
    VotingOpen,
    Finished,
}

text_enum!(RaceStatus {
    Upcoming => "upcoming",
    VotingOpen => "voting_open",
    Finished => "finished",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoteStatus {
    Pending,
    SettledHit,
    SettledMiss,
}

text_enum!(VoteStatus {
    Pending => "pending",
    SettledHit => "settled_hit",
    SettledMiss => "settled_miss",
});

/// Pick marks on a vote: ◎ win, ○ place, △ back, ⚠ danger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PickType {
    Win,
    Place,
    Back,
    Danger,
}

text_enum!(PickType {
    Win => "win",
    Place => "place",
    Back => "back",
    Danger => "danger",
});

#[derive(Debug, Clone, Serialize)]
pub struct Race {
    pub id: String,
    pub name: String,
    /// netkeiba race id, used by the scheduled result fetch
    pub external_id: Option<String>,
    pub grade: Grade,
    pub race_date: Option<NaiveDate>,
    pub post_time: Option<DateTime<Utc>>,
    pub status: RaceStatus,
}

/// One starter. Odds and popularity are captured at lock time and may be
/// refreshed with the confirmed values when results arrive.
#[derive(Debug, Clone, Serialize)]
pub struct RaceEntry {
    pub id: String,
    pub race_id: String,
    pub post_number: u32,
    pub horse_name: String,
    pub odds: Option<f64>,
    pub popularity: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RaceResult {
    pub race_entry_id: String,
    pub finish_position: u32,
    #[serde(default)]
    pub finish_time: Option<String>,
}

/// Payout row per (bet type, combination)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payout {
    pub bet_type: String,
    pub combination: String,
    pub payout_amount: i64,
    #[serde(default)]
    pub popularity: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct VotePick {
    pub id: i64,
    pub race_entry_id: String,
    pub pick_type: PickType,
}

#[derive(Debug, Clone)]
pub struct Vote {
    pub id: String,
    pub user_id: String,
    pub race_id: String,
    pub status: VoteStatus,
    pub picks: Vec<VotePick>,
}

/// Per-user running aggregates
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Profile {
    pub user_id: String,
    pub cumulative_points: i64,
    pub monthly_points: i64,
    pub total_votes: i64,
    pub win_hits: i64,
    pub place_hits: i64,
    pub danger_hits: i64,
    pub current_streak: i64,
    pub best_streak: i64,
    pub rank_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_round_trip() {
        for grade in [Grade::None, Grade::G1, Grade::G2, Grade::G3, Grade::Open, Grade::Listed] {
            assert_eq!(Grade::parse(grade.as_str()), Some(grade));
        }
        assert_eq!(RaceStatus::parse("voting_open"), Some(RaceStatus::VotingOpen));
        assert_eq!(VoteStatus::SettledHit.as_str(), "settled_hit");
        assert_eq!(PickType::parse("danger"), Some(PickType::Danger));
        assert_eq!(PickType::parse("exacta"), None);
    }

    #[test]
    fn test_grade_serde_matches_db_text() {
        let json = serde_json::to_string(&Grade::Open).unwrap();
        assert_eq!(json, "\"OP\"");
        let grade: Grade = serde_json::from_str("\"L\"").unwrap();
        assert_eq!(grade, Grade::Listed);
    }
}
