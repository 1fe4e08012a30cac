use crate::db::{next_stamp, store};
use crate::errors::{AppError, AppResult};
use crate::models::{LevelProgress, SessionType, User};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

const DEFAULT_LEVEL_STEP: i64 = 500;
const DEFAULT_LEVEL_COUNT: i64 = 100;

/// Ordered XP thresholds: `thresholds[n - 1]` is the total XP needed for level `n`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LevelCurve {
    pub thresholds: Vec<i64>,
}

impl Default for LevelCurve {
    fn default() -> Self {
        Self::linear(DEFAULT_LEVEL_STEP, DEFAULT_LEVEL_COUNT)
    }
}

impl LevelCurve {
    pub fn linear(step: i64, levels: i64) -> Self {
        Self {
            thresholds: (0..levels.max(1)).map(|index| index * step).collect(),
        }
    }

    pub fn from_thresholds(thresholds: Vec<i64>) -> AppResult<Self> {
        let curve = Self { thresholds };
        curve.validate()?;
        Ok(curve)
    }

    pub fn validate(&self) -> AppResult<()> {
        match self.thresholds.first() {
            Some(0) => {}
            Some(other) => {
                return Err(AppError::Validation(format!(
                    "level curve must start at 0 XP, found {}",
                    other
                )))
            }
            None => return Err(AppError::Validation("level curve needs at least one threshold".to_string())),
        }
        if let Some(window) = self.thresholds.windows(2).find(|pair| pair[1] < pair[0]) {
            return Err(AppError::Validation(format!(
                "level curve thresholds must be non-decreasing ({} followed by {})",
                window[0], window[1]
            )));
        }
        Ok(())
    }

    pub fn max_level(&self) -> i64 {
        self.thresholds.len().max(1) as i64
    }

    pub fn threshold(&self, level: i64) -> Option<i64> {
        if level < 1 {
            return None;
        }
        self.thresholds.get((level - 1) as usize).copied()
    }

    /// Returns `(level, xp)` where `xp` is the remainder inside the current level band.
    pub fn level_for(&self, total_xp: i64) -> (i64, i64) {
        let total_xp = total_xp.max(0);
        let reached = self.thresholds.partition_point(|threshold| *threshold <= total_xp);
        let level = reached.max(1) as i64;
        let floor = self.threshold(level).unwrap_or(0);
        (level, total_xp - floor)
    }

    pub fn progress(&self, total_xp: i64) -> LevelProgress {
        let (level, xp) = self.level_for(total_xp);
        let next_level_at = self.threshold(level + 1);
        LevelProgress {
            level,
            xp,
            total_xp,
            next_level_at,
            xp_to_next_level: next_level_at.map(|next| next - total_xp.max(0)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct PomodoroXpRule {
    pub work_xp_per_minute: i64,
    pub short_break_xp: i64,
    pub long_break_xp: i64,
}

impl Default for PomodoroXpRule {
    fn default() -> Self {
        Self {
            work_xp_per_minute: 1,
            short_break_xp: 0,
            long_break_xp: 0,
        }
    }
}

impl PomodoroXpRule {
    pub fn validate(&self) -> AppResult<()> {
        if self.work_xp_per_minute < 0 || self.short_break_xp < 0 || self.long_break_xp < 0 {
            return Err(AppError::Validation("pomodoro XP awards must not be negative".to_string()));
        }
        Ok(())
    }

    pub fn award(&self, session_type: SessionType, duration_minutes: i64) -> i64 {
        match session_type {
            SessionType::Work => self.work_xp_per_minute.saturating_mul(duration_minutes.max(0)),
            SessionType::ShortBreak => self.short_break_xp,
            SessionType::LongBreak => self.long_break_xp,
        }
    }
}

/// Streak after a qualifying completion on `day`.
pub fn advance_streak(streak: i64, last_active_on: Option<NaiveDate>, day: NaiveDate) -> (i64, NaiveDate) {
    match last_active_on {
        Some(last) if last == day => (streak.max(1), day),
        Some(last) if last.succ_opt() == Some(day) => (streak + 1, day),
        Some(last) if last > day => (streak.max(1), last),
        _ => (1, day),
    }
}

/// Streak as seen on `today`: it lapses once a full day passes without a completion.
pub fn effective_streak(streak: i64, last_active_on: Option<NaiveDate>, today: NaiveDate) -> i64 {
    match last_active_on {
        Some(last) if last == today || last.succ_opt() == Some(today) || last > today => streak,
        _ => 0,
    }
}

/// Credits XP to the user ledger and re-derives level and band XP from the new total.
pub fn award_user_xp(
    conn: &Connection,
    user_id: &str,
    amount: i64,
    curve: &LevelCurve,
    activity_day: Option<NaiveDate>,
    now: DateTime<Utc>,
) -> AppResult<User> {
    if amount < 0 {
        return Err(AppError::Internal(format!("refusing negative XP award {} for user '{}'", amount, user_id)));
    }
    let mut user = store::select_user(conn, user_id)?
        .ok_or_else(|| AppError::NotFound(format!("User '{}' not found", user_id)))?;

    let level_before = user.level;
    user.total_xp = user
        .total_xp
        .checked_add(amount)
        .ok_or_else(|| AppError::Internal(format!("XP total overflow for user '{}'", user_id)))?;
    let (level, xp) = curve.level_for(user.total_xp);
    user.level = level;
    user.xp = xp;
    if let Some(day) = activity_day {
        let (streak, last_active_on) = advance_streak(user.streak, user.last_active_on, day);
        user.streak = streak;
        user.last_active_on = Some(last_active_on);
    }
    user.updated_at = next_stamp(user.updated_at, now);
    store::update_user_progress(conn, &user)?;

    if user.level > level_before {
        tracing::info!(
            user_id = %user.id,
            level_before,
            level_after = user.level,
            total_xp = user.total_xp,
            "user leveled up"
        );
    }
    Ok(user)
}

/// Re-derives level and band XP for every user after the curve changes.
pub fn relevel_all_users(conn: &Connection, curve: &LevelCurve, now: DateTime<Utc>) -> AppResult<usize> {
    let mut changed = 0usize;
    for mut user in store::list_users(conn)? {
        let (level, xp) = curve.level_for(user.total_xp);
        if level == user.level && xp == user.xp {
            continue;
        }
        user.level = level;
        user.xp = xp;
        user.updated_at = next_stamp(user.updated_at, now);
        store::update_user_progress(conn, &user)?;
        changed += 1;
    }
    Ok(changed)
}

#[cfg(test)]
mod tests {
    use super::{advance_streak, effective_streak, LevelCurve, PomodoroXpRule};
    use crate::models::SessionType;
    use chrono::NaiveDate;

    fn day(raw: &str) -> NaiveDate {
        raw.parse().expect("date")
    }

    #[test]
    fn default_curve_is_five_hundred_xp_per_level() {
        let curve = LevelCurve::default();
        assert_eq!(curve.level_for(0), (1, 0));
        assert_eq!(curve.level_for(499), (1, 499));
        assert_eq!(curve.level_for(500), (2, 0));
        assert_eq!(curve.level_for(7_234), (15, 234));
        assert_eq!(curve.max_level(), 100);
    }

    #[test]
    fn level_is_monotonic_in_total_xp() {
        let curve = LevelCurve::from_thresholds(vec![0, 50, 50, 200, 1_000]).expect("curve");
        let mut previous = 0;
        for total in 0..1_500 {
            let (level, xp) = curve.level_for(total);
            assert!(level >= previous);
            assert!(xp >= 0);
            assert_eq!(curve.level_for(total), (level, xp));
            previous = level;
        }
        // Equal thresholds skip straight to the highest level they unlock.
        assert_eq!(curve.level_for(50), (3, 0));
        // Past the table the top level holds and band XP keeps growing.
        assert_eq!(curve.level_for(1_400), (5, 400));
    }

    #[test]
    fn progress_reports_distance_to_next_level() {
        let curve = LevelCurve::from_thresholds(vec![0, 100, 250]).expect("curve");
        let progress = curve.progress(130);
        assert_eq!(progress.level, 2);
        assert_eq!(progress.xp, 30);
        assert_eq!(progress.next_level_at, Some(250));
        assert_eq!(progress.xp_to_next_level, Some(120));
        assert_eq!(curve.progress(300).next_level_at, None);
    }

    #[test]
    fn invalid_curves_are_rejected() {
        assert!(LevelCurve::from_thresholds(vec![]).is_err());
        assert!(LevelCurve::from_thresholds(vec![10, 20]).is_err());
        assert!(LevelCurve::from_thresholds(vec![0, 20, 10]).is_err());
    }

    #[test]
    fn breaks_earn_nothing_by_default() {
        let rule = PomodoroXpRule::default();
        assert_eq!(rule.award(SessionType::Work, 25), 25);
        assert_eq!(rule.award(SessionType::ShortBreak, 5), 0);
        assert_eq!(rule.award(SessionType::LongBreak, 15), 0);
    }

    #[test]
    fn streak_counts_consecutive_days() {
        assert_eq!(advance_streak(0, None, day("2026-03-01")), (1, day("2026-03-01")));
        assert_eq!(
            advance_streak(1, Some(day("2026-03-01")), day("2026-03-01")),
            (1, day("2026-03-01"))
        );
        assert_eq!(
            advance_streak(1, Some(day("2026-03-01")), day("2026-03-02")),
            (2, day("2026-03-02"))
        );
        assert_eq!(
            advance_streak(5, Some(day("2026-03-02")), day("2026-03-04")),
            (1, day("2026-03-04"))
        );
    }

    #[test]
    fn streak_lapses_after_a_missed_day() {
        let last = Some(day("2026-03-02"));
        assert_eq!(effective_streak(4, last, day("2026-03-02")), 4);
        assert_eq!(effective_streak(4, last, day("2026-03-03")), 4);
        assert_eq!(effective_streak(4, last, day("2026-03-04")), 0);
        assert_eq!(effective_streak(0, None, day("2026-03-04")), 0);
    }
}
