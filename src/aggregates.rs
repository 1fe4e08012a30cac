//! Derived counters on folders, projects and sprints.
//!
//! Request paths apply signed deltas; the full recompute in [`audit`] is only used by
//! [`verify`] and [`repair`].

use crate::db::{next_stamp, store};
use crate::errors::{AppError, AppResult};
use crate::leveling::LevelCurve;
use crate::models::{AggregateCorrection, Project, RepairReport, Sprint, Task, TaskStatus};
use chrono::{DateTime, Utc};
use rusqlite::Connection;

/// Signed change to a project's `(taskCount, completedTaskCount)` pair.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProjectDelta {
    pub tasks: i64,
    pub completed: i64,
}

impl ProjectDelta {
    pub fn for_created(status: TaskStatus) -> Self {
        Self {
            tasks: 1,
            completed: i64::from(status.is_completed()),
        }
    }

    pub fn for_transition(from: TaskStatus, to: TaskStatus) -> Self {
        Self {
            tasks: 0,
            completed: i64::from(to.is_completed()) - i64::from(from.is_completed()),
        }
    }

    pub fn for_removed(status: TaskStatus) -> Self {
        Self {
            tasks: -1,
            completed: -i64::from(status.is_completed()),
        }
    }

    pub fn is_zero(self) -> bool {
        self.tasks == 0 && self.completed == 0
    }

    /// Both counters move in one statement.
    pub fn apply(self, conn: &Connection, project_id: &str, now: DateTime<Utc>) -> AppResult<()> {
        if self.is_zero() {
            return Ok(());
        }
        let changed = store::add_project_task_counts(conn, project_id, self.tasks, self.completed, now)?;
        if changed == 0 {
            return Err(AppError::Internal(format!(
                "project '{}' vanished while applying task counter delta",
                project_id
            )));
        }
        Ok(())
    }
}

pub fn apply_folder_delta(conn: &Connection, folder_id: &str, delta: i64, now: DateTime<Utc>) -> AppResult<()> {
    if delta == 0 {
        return Ok(());
    }
    let changed = store::add_folder_project_count(conn, folder_id, delta, now)?;
    if changed == 0 {
        return Err(AppError::Internal(format!(
            "folder '{}' vanished while applying project counter delta",
            folder_id
        )));
    }
    Ok(())
}

/// XP a task currently contributes to the live sum of each open sprint it is linked to.
pub fn sprint_contribution(task: &Task) -> i64 {
    if task.status.is_completed() {
        task.xp_value
    } else {
        0
    }
}

pub fn project_created(conn: &Connection, project: &Project, now: DateTime<Utc>) -> AppResult<()> {
    apply_folder_delta(conn, &project.folder_id, 1, now)
}

pub fn project_moved(conn: &Connection, before: &Project, after: &Project, now: DateTime<Utc>) -> AppResult<()> {
    if before.folder_id == after.folder_id {
        return Ok(());
    }
    apply_folder_delta(conn, &before.folder_id, -1, now)?;
    apply_folder_delta(conn, &after.folder_id, 1, now)
}

pub fn project_removed(conn: &Connection, project: &Project, now: DateTime<Utc>) -> AppResult<()> {
    apply_folder_delta(conn, &project.folder_id, -1, now)
}

pub fn task_created(conn: &Connection, task: &Task, now: DateTime<Utc>) -> AppResult<()> {
    ProjectDelta::for_created(task.status).apply(conn, &task.project_id, now)
}

/// Covers a status transition, a move between projects, an `xpValue` edit, or any mix of them.
///
/// Sprint credit follows the links: a completion credits open sprints only, while leaving
/// `completed` withdraws the credit from every linked sprint, closed ones included.
pub fn task_changed(conn: &Connection, before: &Task, after: &Task, now: DateTime<Utc>) -> AppResult<()> {
    if before.project_id == after.project_id {
        ProjectDelta::for_transition(before.status, after.status).apply(conn, &after.project_id, now)?;
    } else {
        ProjectDelta::for_removed(before.status).apply(conn, &before.project_id, now)?;
        ProjectDelta::for_created(after.status).apply(conn, &after.project_id, now)?;
    }

    match (before.status.is_completed(), after.status.is_completed()) {
        (true, false) => {
            store::withdraw_task_credits(conn, &after.id, now)?;
        }
        (false, true) => {
            store::credit_open_sprints(conn, &after.id, after.xp_value, now)?;
        }
        (true, true) if after.xp_value != before.xp_value => {
            store::credit_open_sprints(conn, &after.id, after.xp_value - before.xp_value, now)?;
        }
        _ => {}
    }
    Ok(())
}

/// Must run while the task's sprint links still exist.
pub fn task_removed(conn: &Connection, task: &Task, now: DateTime<Utc>) -> AppResult<()> {
    ProjectDelta::for_removed(task.status).apply(conn, &task.project_id, now)?;
    store::withdraw_task_credits(conn, &task.id, now)?;
    Ok(())
}

pub fn task_linked(conn: &Connection, sprint: &Sprint, task: &Task, now: DateTime<Utc>) -> AppResult<()> {
    let contribution = sprint_contribution(task);
    if sprint.status.accrues_xp() && contribution != 0 {
        store::add_link_credit(conn, &sprint.id, &task.id, contribution, now)?;
    }
    Ok(())
}

/// Must run before the link row is deleted.
pub fn task_unlinked(conn: &Connection, sprint: &Sprint, task: &Task, now: DateTime<Utc>) -> AppResult<()> {
    let credited = store::link_credit(conn, &sprint.id, &task.id)?;
    if credited != 0 {
        store::add_link_credit(conn, &sprint.id, &task.id, -credited, now)?;
    }
    Ok(())
}

/// Re-credits every link of a reopened sprint and returns its new live sum.
pub fn reopen_sprint(conn: &Connection, sprint_id: &str) -> AppResult<i64> {
    store::recredit_sprint_links(conn, sprint_id)?;
    recompute_sprint_xp(conn, sprint_id)
}

/// Live sum for a sprint, straight from its links.
pub fn recompute_sprint_xp(conn: &Connection, sprint_id: &str) -> AppResult<i64> {
    let (_, _, completed_xp) = store::sum_sprint_tasks(conn, sprint_id)?;
    Ok(completed_xp)
}

/// Recomputes every derived value owned by `user_id` and lists the ones that disagree with storage.
pub fn audit(conn: &Connection, user_id: &str, curve: &LevelCurve) -> AppResult<Vec<AggregateCorrection>> {
    let user = store::select_user(conn, user_id)?
        .ok_or_else(|| AppError::NotFound(format!("User '{}' not found", user_id)))?;
    let mut corrections = Vec::new();

    let (level, xp) = curve.level_for(user.total_xp);
    push_if_differs(&mut corrections, "user", &user.id, "level", user.level, level);
    push_if_differs(&mut corrections, "user", &user.id, "xp", user.xp, xp);

    let foreign_links = store::count_cross_owner_links(conn, user_id)?;
    push_if_differs(&mut corrections, "user", &user.id, "crossOwnerSprintLinks", foreign_links, 0);

    for folder in store::list_folders(conn, user_id)? {
        let expected = store::count_folder_projects(conn, &folder.id)?;
        push_if_differs(&mut corrections, "folder", &folder.id, "projectCount", folder.project_count, expected);
    }

    for project in store::list_projects(conn, user_id, None)? {
        let (total, completed) = store::count_project_tasks(conn, &project.id)?;
        push_if_differs(&mut corrections, "project", &project.id, "taskCount", project.task_count, total);
        push_if_differs(
            &mut corrections,
            "project",
            &project.id,
            "completedTaskCount",
            project.completed_task_count,
            completed,
        );
    }

    // A closed sprint is held to what its links still credit; an open one to the live sum.
    for sprint in store::list_sprints(conn, user_id)? {
        let credited = store::sum_link_credits(conn, &sprint.id)?;
        if sprint.status.accrues_xp() {
            let live = recompute_sprint_xp(conn, &sprint.id)?;
            push_if_differs(&mut corrections, "sprint", &sprint.id, "earnedXp", sprint.earned_xp, live);
            push_if_differs(&mut corrections, "sprint", &sprint.id, "linkCredits", credited, live);
        } else {
            push_if_differs(&mut corrections, "sprint", &sprint.id, "earnedXp", sprint.earned_xp, credited);
        }
    }

    Ok(corrections)
}

fn push_if_differs(
    corrections: &mut Vec<AggregateCorrection>,
    entity: &str,
    id: &str,
    field: &str,
    stored: i64,
    expected: i64,
) {
    if stored != expected {
        corrections.push(AggregateCorrection {
            entity: entity.to_string(),
            id: id.to_string(),
            field: field.to_string(),
            stored,
            expected,
        });
    }
}

/// Fails with `Internal` when any stored aggregate disagrees with a full recompute. Never repairs.
pub fn verify(conn: &Connection, user_id: &str, curve: &LevelCurve) -> AppResult<()> {
    let corrections = audit(conn, user_id, curve)?;
    if corrections.is_empty() {
        return Ok(());
    }

    let summary = corrections
        .iter()
        .map(|c| format!("{} '{}' {} stored={} expected={}", c.entity, c.id, c.field, c.stored, c.expected))
        .collect::<Vec<_>>()
        .join("; ");
    tracing::error!(
        user_id = %user_id,
        mismatches = corrections.len(),
        details = %summary,
        "aggregate invariant violated"
    );
    Err(AppError::Internal(format!(
        "aggregate invariant violated for user '{}': {}",
        user_id, summary
    )))
}

/// Rewrites every mismatching aggregate to its recomputed value.
pub fn repair(conn: &Connection, user_id: &str, curve: &LevelCurve, now: DateTime<Utc>) -> AppResult<RepairReport> {
    let corrections = audit(conn, user_id, curve)?;

    // Projects carry both counters, so write each one once with its full recomputed pair.
    let mut repaired_projects: Vec<&str> = Vec::new();
    let mut user_progress_stale = false;

    for correction in &corrections {
        match (correction.entity.as_str(), correction.field.as_str()) {
            ("user", "crossOwnerSprintLinks") => {
                store::delete_cross_owner_links(conn, user_id)?;
            }
            ("user", _) => user_progress_stale = true,
            ("folder", _) => {
                store::set_folder_project_count(conn, &correction.id, correction.expected, now)?;
            }
            ("project", _) => {
                if repaired_projects.contains(&correction.id.as_str()) {
                    continue;
                }
                let (total, completed) = store::count_project_tasks(conn, &correction.id)?;
                store::set_project_task_counts(conn, &correction.id, total, completed, now)?;
                repaired_projects.push(correction.id.as_str());
            }
            ("sprint", "linkCredits") => {
                store::recredit_sprint_links(conn, &correction.id)?;
            }
            ("sprint", _) => {
                store::set_sprint_xp(conn, &correction.id, correction.expected, now)?;
            }
            (entity, field) => {
                return Err(AppError::Internal(format!("no repair for {}.{}", entity, field)));
            }
        }
        tracing::warn!(
            user_id = %user_id,
            entity = %correction.entity,
            id = %correction.id,
            field = %correction.field,
            stored = correction.stored,
            expected = correction.expected,
            "repaired aggregate"
        );
    }

    if user_progress_stale {
        if let Some(mut user) = store::select_user(conn, user_id)? {
            let (level, xp) = curve.level_for(user.total_xp);
            user.level = level;
            user.xp = xp;
            user.updated_at = next_stamp(user.updated_at, now);
            store::update_user_progress(conn, &user)?;
        }
    }

    Ok(RepairReport {
        user_id: user_id.to_string(),
        corrections,
    })
}
