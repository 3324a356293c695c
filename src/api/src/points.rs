//! Point rules: scoring one vote against a race's finishing order.
//!
//! Scoring is pure. Every point a vote earns is carried by exactly one
//! [`Award`], so the vote's total is the sum of its ledger rows.

use std::collections::{HashMap, HashSet};

use crate::config::PointRules;
use crate::models::{Grade, PickType, RaceEntry, RaceResult, VotePick, VoteStatus};

impl PointRules {
    /// Win points for a winner of the given popularity. Less-favoured winners
    /// pay more; an unknown popularity scores as the favourite.
    pub fn win_points(&self, popularity: Option<u32>) -> i64 {
        let popularity = popularity.unwrap_or(1).max(1) as usize;
        self.win_points_by_popularity
            .get(popularity - 1)
            .copied()
            .unwrap_or(self.win_points_default)
    }

    /// Danger points for a danger pick of the given popularity. Fading a
    /// favourite pays more.
    pub fn danger_points(&self, popularity: Option<u32>) -> i64 {
        match popularity {
            Some(p) if p >= 1 => self
                .danger_points_by_popularity
                .get(p as usize - 1)
                .copied()
                .unwrap_or(self.danger_points_default),
            _ => self.danger_points_default,
        }
    }
}

/// Finishing order facts shared by every vote on a race.
#[derive(Debug, Clone)]
pub struct FinishOrder {
    pub winner_entry_id: String,
    pub winner_popularity: Option<u32>,
    placing: HashSet<String>,
    positions: HashMap<String, u32>,
    popularity: HashMap<String, Option<u32>>,
}

impl FinishOrder {
    /// Build from persisted results. Returns `None` without a first-place row.
    ///
    /// Results are expected in ascending finish order; on a dead heat for
    /// first the earliest row is the winner.
    pub fn from_results(results: &[RaceResult], entries: &[RaceEntry]) -> Option<Self> {
        let winner = results.iter().find(|r| r.finish_position == 1)?;

        let popularity: HashMap<String, Option<u32>> = entries
            .iter()
            .map(|e| (e.id.clone(), e.popularity))
            .collect();

        let positions: HashMap<String, u32> = results
            .iter()
            .map(|r| (r.race_entry_id.clone(), r.finish_position))
            .collect();

        let placing = results
            .iter()
            .filter(|r| r.finish_position <= 3)
            .map(|r| r.race_entry_id.clone())
            .collect();

        Some(Self {
            winner_entry_id: winner.race_entry_id.clone(),
            winner_popularity: popularity.get(&winner.race_entry_id).copied().flatten(),
            placing,
            positions,
            popularity,
        })
    }

    pub fn is_winner(&self, entry_id: &str) -> bool {
        self.winner_entry_id == entry_id
    }

    pub fn is_placed(&self, entry_id: &str) -> bool {
        self.placing.contains(entry_id)
    }

    /// A danger pick hits only when the entry has a result outside the top
    /// three. Scratched or unplaced-without-result entries never hit.
    pub fn is_faded(&self, entry_id: &str) -> bool {
        matches!(self.positions.get(entry_id), Some(&p) if p > 3)
    }

    pub fn popularity_of(&self, entry_id: &str) -> Option<u32> {
        self.popularity.get(entry_id).copied().flatten()
    }
}

/// Ledger reason codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AwardReason {
    WinHit,
    G1Bonus,
    PlaceHit,
    DangerHit,
    PerfectBonus,
    StreakBonus,
}

impl AwardReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            AwardReason::WinHit => "win_hit",
            AwardReason::G1Bonus => "g1_bonus",
            AwardReason::PlaceHit => "place_hit",
            AwardReason::DangerHit => "danger_hit",
            AwardReason::PerfectBonus => "perfect_bonus",
            AwardReason::StreakBonus => "streak_bonus",
        }
    }
}

/// One points-ledger row
#[derive(Debug, Clone, PartialEq)]
pub struct Award {
    pub reason: AwardReason,
    pub amount: i64,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PickAward {
    pub pick_id: i64,
    pub is_hit: bool,
    pub points: i64,
}

/// Streak counters before or after a vote
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Streak {
    pub current: i64,
    pub best: i64,
}

impl Streak {
    /// Advance on a win hit, reset on a miss. `best` never decreases.
    pub fn advance(self, win_hit: bool) -> Self {
        if win_hit {
            let current = self.current + 1;
            Self {
                current,
                best: self.best.max(current),
            }
        } else {
            Self {
                current: 0,
                best: self.best,
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct VoteScore {
    pub picks: Vec<PickAward>,
    pub awards: Vec<Award>,
    pub win_hit: bool,
    pub place_hits: i64,
    pub danger_hit: bool,
    pub any_hit: bool,
    pub is_perfect: bool,
    pub is_upset: bool,
    pub is_g1_win: bool,
    pub streak: Streak,
}

impl VoteScore {
    pub fn earned_points(&self) -> i64 {
        self.awards.iter().map(|a| a.amount).sum()
    }

    pub fn status(&self) -> VoteStatus {
        if self.any_hit {
            VoteStatus::SettledHit
        } else {
            VoteStatus::SettledMiss
        }
    }
}

fn popularity_label(popularity: Option<u32>) -> String {
    match popularity {
        Some(p) => format!("popularity {}", p),
        None => "popularity unknown".to_string(),
    }
}

/// Score a vote's picks. `prior` is the owner's streak before this vote.
pub fn score_vote(
    picks: &[VotePick],
    order: &FinishOrder,
    grade: Grade,
    prior: Streak,
    rules: &PointRules,
) -> VoteScore {
    let mut pick_awards = Vec::with_capacity(picks.len());
    let mut awards = Vec::new();

    let win_pick_id = picks
        .iter()
        .find(|p| p.pick_type == PickType::Win)
        .map(|p| p.id);
    let danger_pick_id = picks
        .iter()
        .find(|p| p.pick_type == PickType::Danger)
        .map(|p| p.id);

    let mut win_hit = false;
    let mut place_count = 0;
    let mut place_hits = 0;
    let mut danger_submitted = false;
    let mut danger_hit = false;

    for pick in picks {
        let award = match pick.pick_type {
            PickType::Win if Some(pick.id) == win_pick_id => {
                if order.is_winner(&pick.race_entry_id) {
                    win_hit = true;
                    let base = rules.win_points(order.winner_popularity);
                    awards.push(Award {
                        reason: AwardReason::WinHit,
                        amount: base,
                        description: format!(
                            "win hit ({}) +{}P",
                            popularity_label(order.winner_popularity),
                            base
                        ),
                    });
                    let mut points = base;
                    if grade == Grade::G1 && rules.g1_bonus > 0 {
                        awards.push(Award {
                            reason: AwardReason::G1Bonus,
                            amount: rules.g1_bonus,
                            description: format!("G1 bonus +{}P", rules.g1_bonus),
                        });
                        points += rules.g1_bonus;
                    }
                    PickAward { pick_id: pick.id, is_hit: true, points }
                } else {
                    PickAward { pick_id: pick.id, is_hit: false, points: 0 }
                }
            }
            PickType::Place => {
                place_count += 1;
                if order.is_placed(&pick.race_entry_id) {
                    place_hits += 1;
                    awards.push(Award {
                        reason: AwardReason::PlaceHit,
                        amount: rules.place_points,
                        description: format!("place hit +{}P", rules.place_points),
                    });
                    PickAward { pick_id: pick.id, is_hit: true, points: rules.place_points }
                } else {
                    PickAward { pick_id: pick.id, is_hit: false, points: 0 }
                }
            }
            PickType::Danger if Some(pick.id) == danger_pick_id => {
                danger_submitted = true;
                if order.is_faded(&pick.race_entry_id) {
                    danger_hit = true;
                    let popularity = order.popularity_of(&pick.race_entry_id);
                    let points = rules.danger_points(popularity);
                    awards.push(Award {
                        reason: AwardReason::DangerHit,
                        amount: points,
                        description: format!(
                            "danger hit ({}) +{}P",
                            popularity_label(popularity),
                            points
                        ),
                    });
                    PickAward { pick_id: pick.id, is_hit: true, points }
                } else {
                    PickAward { pick_id: pick.id, is_hit: false, points: 0 }
                }
            }
            // back picks are unscored; the hit flag is recorded for display
            PickType::Back => PickAward {
                pick_id: pick.id,
                is_hit: order.is_placed(&pick.race_entry_id),
                points: 0,
            },
            // duplicate win/danger marks beyond the first are never scored
            PickType::Win | PickType::Danger => PickAward {
                pick_id: pick.id,
                is_hit: false,
                points: 0,
            },
        };
        pick_awards.push(award);
    }

    let all_place_hit = place_count > 0 && place_hits == place_count;
    let is_perfect = win_hit && all_place_hit && (!danger_submitted || danger_hit);
    if is_perfect {
        awards.push(Award {
            reason: AwardReason::PerfectBonus,
            amount: rules.perfect_bonus,
            description: format!("perfect bonus +{}P", rules.perfect_bonus),
        });
    }

    let streak = prior.advance(win_hit);
    if win_hit
        && rules.streak_interval > 0
        && streak.current % i64::from(rules.streak_interval) == 0
    {
        awards.push(Award {
            reason: AwardReason::StreakBonus,
            amount: rules.streak_bonus,
            description: format!("{} win streak bonus +{}P", streak.current, rules.streak_bonus),
        });
    }

    let is_upset = win_hit
        && order
            .winner_popularity
            .map(|p| p >= rules.upset_popularity)
            .unwrap_or(false);

    VoteScore {
        picks: pick_awards,
        awards,
        win_hit,
        place_hits,
        danger_hit,
        any_hit: win_hit || place_hits > 0 || danger_hit,
        is_perfect,
        is_upset,
        is_g1_win: win_hit && grade == Grade::G1,
        streak,
    }
}
