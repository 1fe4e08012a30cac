//! Row-level access for every entity kind.
//!
//! Every lookup that starts from a caller-supplied id also takes the caller's `user_id` and
//! filters on it, so an id owned by another user reads exactly like a missing id. Counter
//! updates go through single `SET x = x + ?` statements so one child event moves all of a
//! parent's counters in the same statement. Those statements stamp rows through the
//! `stamp_after` SQL function registered on every connection, so `updated_at` moves forward
//! even when one request touches the same row twice.

use super::{
    fmt_opt_time, fmt_time, parse_opt_date, parse_opt_time, parse_priority, parse_project_status,
    parse_session_status, parse_session_type, parse_sprint_status, parse_task_status, parse_time,
};
use crate::errors::AppResult;
use crate::models::{Folder, PomodoroSession, Project, Sprint, SprintTask, Task, User};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

const USER_COLUMNS: &str = "id, email, first_name, last_name, avatar, level, xp, total_xp, streak, last_active_on, created_at, updated_at";
const FOLDER_COLUMNS: &str = "id, user_id, name, description, color, icon, project_count, created_at, updated_at";
const PROJECT_COLUMNS: &str = "id, user_id, folder_id, name, description, status, priority, due_date, task_count, completed_task_count, xp_earned, created_at, updated_at";
const TASK_COLUMNS: &str = "id, user_id, project_id, title, description, status, priority, xp_value, estimated_pomodoros, actual_pomodoros, due_date, completed_at, created_at, updated_at";
const SESSION_COLUMNS: &str = "id, user_id, task_id, project_id, duration, session_type, status, start_time, end_time, xp_earned, created_at, updated_at";
const SPRINT_COLUMNS: &str = "id, user_id, name, description, start_date, end_date, status, goal_xp, earned_xp, created_at, updated_at";

fn collect<T>(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
    parse: fn(&rusqlite::Row<'_>) -> rusqlite::Result<T>,
) -> AppResult<Vec<T>> {
    let mut statement = conn.prepare(sql)?;
    let rows = statement
        .query_map(params, parse)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

// Users

pub fn insert_user(conn: &Connection, user: &User) -> AppResult<()> {
    conn.execute(
        "INSERT INTO users (id, email, first_name, last_name, avatar, level, xp, total_xp, streak, last_active_on, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            user.id,
            user.email,
            user.first_name,
            user.last_name,
            user.avatar,
            user.level,
            user.xp,
            user.total_xp,
            user.streak,
            user.last_active_on.map(|day| day.to_string()),
            fmt_time(user.created_at),
            fmt_time(user.updated_at),
        ],
    )?;
    Ok(())
}

pub fn select_user(conn: &Connection, user_id: &str) -> AppResult<Option<User>> {
    conn.query_row(
        &format!("SELECT {} FROM users WHERE id = ?1", USER_COLUMNS),
        [user_id],
        parse_user_row,
    )
    .optional()
    .map_err(Into::into)
}

pub fn list_users(conn: &Connection) -> AppResult<Vec<User>> {
    collect(
        conn,
        &format!("SELECT {} FROM users ORDER BY created_at ASC", USER_COLUMNS),
        [],
        parse_user_row,
    )
}

pub fn update_user_profile(conn: &Connection, user: &User) -> AppResult<()> {
    conn.execute(
        "UPDATE users SET first_name = ?1, last_name = ?2, avatar = ?3, updated_at = ?4 WHERE id = ?5",
        params![user.first_name, user.last_name, user.avatar, fmt_time(user.updated_at), user.id],
    )?;
    Ok(())
}

pub fn update_user_progress(conn: &Connection, user: &User) -> AppResult<()> {
    conn.execute(
        "UPDATE users
         SET level = ?1, xp = ?2, total_xp = ?3, streak = ?4, last_active_on = ?5, updated_at = ?6
         WHERE id = ?7",
        params![
            user.level,
            user.xp,
            user.total_xp,
            user.streak,
            user.last_active_on.map(|day| day.to_string()),
            fmt_time(user.updated_at),
            user.id
        ],
    )?;
    Ok(())
}

fn parse_user_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        email: row.get(1)?,
        first_name: row.get(2)?,
        last_name: row.get(3)?,
        avatar: row.get(4)?,
        level: row.get(5)?,
        xp: row.get(6)?,
        total_xp: row.get(7)?,
        streak: row.get(8)?,
        last_active_on: parse_opt_date(row.get(9)?)?,
        created_at: parse_time(&row.get::<_, String>(10)?)?,
        updated_at: parse_time(&row.get::<_, String>(11)?)?,
    })
}

// Folders

pub fn insert_folder(conn: &Connection, folder: &Folder) -> AppResult<()> {
    conn.execute(
        "INSERT INTO folders (id, user_id, name, description, color, icon, project_count, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            folder.id,
            folder.user_id,
            folder.name,
            folder.description,
            folder.color,
            folder.icon,
            folder.project_count,
            fmt_time(folder.created_at),
            fmt_time(folder.updated_at),
        ],
    )?;
    Ok(())
}

pub fn select_folder(conn: &Connection, user_id: &str, folder_id: &str) -> AppResult<Option<Folder>> {
    conn.query_row(
        &format!("SELECT {} FROM folders WHERE id = ?1 AND user_id = ?2", FOLDER_COLUMNS),
        [folder_id, user_id],
        parse_folder_row,
    )
    .optional()
    .map_err(Into::into)
}

pub fn list_folders(conn: &Connection, user_id: &str) -> AppResult<Vec<Folder>> {
    collect(
        conn,
        &format!(
            "SELECT {} FROM folders WHERE user_id = ?1 ORDER BY created_at ASC, id ASC",
            FOLDER_COLUMNS
        ),
        [user_id],
        parse_folder_row,
    )
}

pub fn update_folder(conn: &Connection, folder: &Folder) -> AppResult<()> {
    conn.execute(
        "UPDATE folders SET name = ?1, description = ?2, color = ?3, icon = ?4, updated_at = ?5
         WHERE id = ?6 AND user_id = ?7",
        params![
            folder.name,
            folder.description,
            folder.color,
            folder.icon,
            fmt_time(folder.updated_at),
            folder.id,
            folder.user_id
        ],
    )?;
    Ok(())
}

pub fn delete_folder_row(conn: &Connection, user_id: &str, folder_id: &str) -> AppResult<usize> {
    Ok(conn.execute(
        "DELETE FROM folders WHERE id = ?1 AND user_id = ?2",
        [folder_id, user_id],
    )?)
}

pub fn add_folder_project_count(
    conn: &Connection,
    folder_id: &str,
    delta: i64,
    now: DateTime<Utc>,
) -> AppResult<usize> {
    Ok(conn.execute(
        "UPDATE folders SET project_count = project_count + ?1, updated_at = stamp_after(updated_at, ?2) WHERE id = ?3",
        params![delta, fmt_time(now), folder_id],
    )?)
}

pub fn set_folder_project_count(conn: &Connection, folder_id: &str, value: i64, now: DateTime<Utc>) -> AppResult<()> {
    conn.execute(
        "UPDATE folders SET project_count = ?1, updated_at = stamp_after(updated_at, ?2) WHERE id = ?3",
        params![value, fmt_time(now), folder_id],
    )?;
    Ok(())
}

pub fn count_folder_projects(conn: &Connection, folder_id: &str) -> AppResult<i64> {
    Ok(conn.query_row(
        "SELECT COUNT(1) FROM projects WHERE folder_id = ?1",
        [folder_id],
        |row| row.get(0),
    )?)
}

fn parse_folder_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Folder> {
    Ok(Folder {
        id: row.get(0)?,
        user_id: row.get(1)?,
        name: row.get(2)?,
        description: row.get(3)?,
        color: row.get(4)?,
        icon: row.get(5)?,
        project_count: row.get(6)?,
        created_at: parse_time(&row.get::<_, String>(7)?)?,
        updated_at: parse_time(&row.get::<_, String>(8)?)?,
    })
}

// Projects

pub fn insert_project(conn: &Connection, project: &Project) -> AppResult<()> {
    conn.execute(
        "INSERT INTO projects (id, user_id, folder_id, name, description, status, priority, due_date, task_count, completed_task_count, xp_earned, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        params![
            project.id,
            project.user_id,
            project.folder_id,
            project.name,
            project.description,
            project.status.as_str(),
            project.priority.as_str(),
            fmt_opt_time(project.due_date),
            project.task_count,
            project.completed_task_count,
            project.xp_earned,
            fmt_time(project.created_at),
            fmt_time(project.updated_at),
        ],
    )?;
    Ok(())
}

pub fn select_project(conn: &Connection, user_id: &str, project_id: &str) -> AppResult<Option<Project>> {
    conn.query_row(
        &format!("SELECT {} FROM projects WHERE id = ?1 AND user_id = ?2", PROJECT_COLUMNS),
        [project_id, user_id],
        parse_project_row,
    )
    .optional()
    .map_err(Into::into)
}

pub fn list_projects(conn: &Connection, user_id: &str, folder_id: Option<&str>) -> AppResult<Vec<Project>> {
    match folder_id {
        Some(folder_id) => collect(
            conn,
            &format!(
                "SELECT {} FROM projects WHERE user_id = ?1 AND folder_id = ?2 ORDER BY created_at ASC, id ASC",
                PROJECT_COLUMNS
            ),
            [user_id, folder_id],
            parse_project_row,
        ),
        None => collect(
            conn,
            &format!(
                "SELECT {} FROM projects WHERE user_id = ?1 ORDER BY created_at ASC, id ASC",
                PROJECT_COLUMNS
            ),
            [user_id],
            parse_project_row,
        ),
    }
}

pub fn update_project(conn: &Connection, project: &Project) -> AppResult<()> {
    conn.execute(
        "UPDATE projects
         SET folder_id = ?1, name = ?2, description = ?3, status = ?4, priority = ?5, due_date = ?6, updated_at = ?7
         WHERE id = ?8 AND user_id = ?9",
        params![
            project.folder_id,
            project.name,
            project.description,
            project.status.as_str(),
            project.priority.as_str(),
            fmt_opt_time(project.due_date),
            fmt_time(project.updated_at),
            project.id,
            project.user_id
        ],
    )?;
    Ok(())
}

pub fn delete_project_row(conn: &Connection, user_id: &str, project_id: &str) -> AppResult<usize> {
    Ok(conn.execute(
        "DELETE FROM projects WHERE id = ?1 AND user_id = ?2",
        [project_id, user_id],
    )?)
}

pub fn add_project_task_counts(
    conn: &Connection,
    project_id: &str,
    tasks: i64,
    completed: i64,
    now: DateTime<Utc>,
) -> AppResult<usize> {
    Ok(conn.execute(
        "UPDATE projects
         SET task_count = task_count + ?1,
             completed_task_count = completed_task_count + ?2,
             updated_at = stamp_after(updated_at, ?3)
         WHERE id = ?4",
        params![tasks, completed, fmt_time(now), project_id],
    )?)
}

pub fn set_project_task_counts(
    conn: &Connection,
    project_id: &str,
    tasks: i64,
    completed: i64,
    now: DateTime<Utc>,
) -> AppResult<()> {
    conn.execute(
        "UPDATE projects SET task_count = ?1, completed_task_count = ?2, updated_at = stamp_after(updated_at, ?3) WHERE id = ?4",
        params![tasks, completed, fmt_time(now), project_id],
    )?;
    Ok(())
}

pub fn add_project_xp(conn: &Connection, project_id: &str, xp: i64, now: DateTime<Utc>) -> AppResult<usize> {
    Ok(conn.execute(
        "UPDATE projects SET xp_earned = xp_earned + ?1, updated_at = stamp_after(updated_at, ?2) WHERE id = ?3",
        params![xp, fmt_time(now), project_id],
    )?)
}

/// `(total, completed)` task counts for one project, from the task rows themselves.
pub fn count_project_tasks(conn: &Connection, project_id: &str) -> AppResult<(i64, i64)> {
    Ok(conn.query_row(
        "SELECT COUNT(1), COALESCE(SUM(CASE WHEN status = 'completed' THEN 1 ELSE 0 END), 0)
         FROM tasks WHERE project_id = ?1",
        [project_id],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?)
}

fn parse_project_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Project> {
    Ok(Project {
        id: row.get(0)?,
        user_id: row.get(1)?,
        folder_id: row.get(2)?,
        name: row.get(3)?,
        description: row.get(4)?,
        status: parse_project_status(&row.get::<_, String>(5)?)?,
        priority: parse_priority(&row.get::<_, String>(6)?)?,
        due_date: parse_opt_time(row.get(7)?)?,
        task_count: row.get(8)?,
        completed_task_count: row.get(9)?,
        xp_earned: row.get(10)?,
        created_at: parse_time(&row.get::<_, String>(11)?)?,
        updated_at: parse_time(&row.get::<_, String>(12)?)?,
    })
}

// Tasks

pub fn insert_task(conn: &Connection, task: &Task) -> AppResult<()> {
    conn.execute(
        "INSERT INTO tasks (id, user_id, project_id, title, description, status, priority, xp_value, estimated_pomodoros, actual_pomodoros, due_date, completed_at, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
        params![
            task.id,
            task.user_id,
            task.project_id,
            task.title,
            task.description,
            task.status.as_str(),
            task.priority.as_str(),
            task.xp_value,
            task.estimated_pomodoros,
            task.actual_pomodoros,
            fmt_opt_time(task.due_date),
            fmt_opt_time(task.completed_at),
            fmt_time(task.created_at),
            fmt_time(task.updated_at),
        ],
    )?;
    Ok(())
}

pub fn select_task(conn: &Connection, user_id: &str, task_id: &str) -> AppResult<Option<Task>> {
    conn.query_row(
        &format!("SELECT {} FROM tasks WHERE id = ?1 AND user_id = ?2", TASK_COLUMNS),
        [task_id, user_id],
        parse_task_row,
    )
    .optional()
    .map_err(Into::into)
}

pub fn list_tasks(conn: &Connection, user_id: &str, project_id: Option<&str>) -> AppResult<Vec<Task>> {
    match project_id {
        Some(project_id) => collect(
            conn,
            &format!(
                "SELECT {} FROM tasks WHERE user_id = ?1 AND project_id = ?2 ORDER BY created_at ASC, id ASC",
                TASK_COLUMNS
            ),
            [user_id, project_id],
            parse_task_row,
        ),
        None => collect(
            conn,
            &format!(
                "SELECT {} FROM tasks WHERE user_id = ?1 ORDER BY created_at ASC, id ASC",
                TASK_COLUMNS
            ),
            [user_id],
            parse_task_row,
        ),
    }
}

pub fn list_sprint_tasks(conn: &Connection, user_id: &str, sprint_id: &str) -> AppResult<Vec<Task>> {
    let columns = TASK_COLUMNS
        .split(", ")
        .map(|column| format!("t.{}", column))
        .collect::<Vec<_>>()
        .join(", ");
    collect(
        conn,
        &format!(
            "SELECT {} FROM tasks t
             JOIN sprint_tasks st ON st.task_id = t.id
             WHERE t.user_id = ?1 AND st.sprint_id = ?2
             ORDER BY st.created_at ASC, t.id ASC",
            columns
        ),
        [user_id, sprint_id],
        parse_task_row,
    )
}

pub fn update_task(conn: &Connection, task: &Task) -> AppResult<()> {
    conn.execute(
        "UPDATE tasks
         SET project_id = ?1, title = ?2, description = ?3, status = ?4, priority = ?5, xp_value = ?6,
             estimated_pomodoros = ?7, actual_pomodoros = ?8, due_date = ?9, completed_at = ?10, updated_at = ?11
         WHERE id = ?12 AND user_id = ?13",
        params![
            task.project_id,
            task.title,
            task.description,
            task.status.as_str(),
            task.priority.as_str(),
            task.xp_value,
            task.estimated_pomodoros,
            task.actual_pomodoros,
            fmt_opt_time(task.due_date),
            fmt_opt_time(task.completed_at),
            fmt_time(task.updated_at),
            task.id,
            task.user_id
        ],
    )?;
    Ok(())
}

pub fn delete_task_row(conn: &Connection, user_id: &str, task_id: &str) -> AppResult<usize> {
    Ok(conn.execute("DELETE FROM tasks WHERE id = ?1 AND user_id = ?2", [task_id, user_id])?)
}

pub fn increment_actual_pomodoros(conn: &Connection, task_id: &str, now: DateTime<Utc>) -> AppResult<usize> {
    Ok(conn.execute(
        "UPDATE tasks SET actual_pomodoros = actual_pomodoros + 1, updated_at = stamp_after(updated_at, ?1) WHERE id = ?2",
        params![fmt_time(now), task_id],
    )?)
}

fn parse_task_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Task> {
    Ok(Task {
        id: row.get(0)?,
        user_id: row.get(1)?,
        project_id: row.get(2)?,
        title: row.get(3)?,
        description: row.get(4)?,
        status: parse_task_status(&row.get::<_, String>(5)?)?,
        priority: parse_priority(&row.get::<_, String>(6)?)?,
        xp_value: row.get(7)?,
        estimated_pomodoros: row.get(8)?,
        actual_pomodoros: row.get(9)?,
        due_date: parse_opt_time(row.get(10)?)?,
        completed_at: parse_opt_time(row.get(11)?)?,
        created_at: parse_time(&row.get::<_, String>(12)?)?,
        updated_at: parse_time(&row.get::<_, String>(13)?)?,
    })
}

// Pomodoro sessions

pub fn insert_session(conn: &Connection, session: &PomodoroSession) -> AppResult<()> {
    conn.execute(
        "INSERT INTO pomodoro_sessions (id, user_id, task_id, project_id, duration, session_type, status, start_time, end_time, xp_earned, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            session.id,
            session.user_id,
            session.task_id,
            session.project_id,
            session.duration,
            session.session_type.as_str(),
            session.status.as_str(),
            fmt_time(session.start_time),
            fmt_opt_time(session.end_time),
            session.xp_earned,
            fmt_time(session.created_at),
            fmt_time(session.updated_at),
        ],
    )?;
    Ok(())
}

pub fn select_session(conn: &Connection, user_id: &str, session_id: &str) -> AppResult<Option<PomodoroSession>> {
    conn.query_row(
        &format!(
            "SELECT {} FROM pomodoro_sessions WHERE id = ?1 AND user_id = ?2",
            SESSION_COLUMNS
        ),
        [session_id, user_id],
        parse_session_row,
    )
    .optional()
    .map_err(Into::into)
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SessionFilter<'a> {
    pub task_id: Option<&'a str>,
    pub project_id: Option<&'a str>,
    pub ended_from: Option<DateTime<Utc>>,
    pub ended_before: Option<DateTime<Utc>>,
}

pub fn list_sessions(conn: &Connection, user_id: &str, filter: SessionFilter<'_>) -> AppResult<Vec<PomodoroSession>> {
    let mut query = format!("SELECT {} FROM pomodoro_sessions WHERE user_id = ?", SESSION_COLUMNS);
    let mut params_vec: Vec<String> = vec![user_id.to_string()];

    if let Some(task_id) = filter.task_id {
        query.push_str(" AND task_id = ?");
        params_vec.push(task_id.to_string());
    }
    if let Some(project_id) = filter.project_id {
        query.push_str(" AND project_id = ?");
        params_vec.push(project_id.to_string());
    }
    if let Some(from) = filter.ended_from {
        query.push_str(" AND end_time >= ?");
        params_vec.push(fmt_time(from));
    }
    if let Some(before) = filter.ended_before {
        query.push_str(" AND end_time < ?");
        params_vec.push(fmt_time(before));
    }
    query.push_str(" ORDER BY start_time ASC, id ASC");

    collect(conn, &query, rusqlite::params_from_iter(params_vec), parse_session_row)
}

pub fn update_session(conn: &Connection, session: &PomodoroSession) -> AppResult<()> {
    conn.execute(
        "UPDATE pomodoro_sessions
         SET task_id = ?1, project_id = ?2, duration = ?3, status = ?4, end_time = ?5, xp_earned = ?6, updated_at = ?7
         WHERE id = ?8 AND user_id = ?9",
        params![
            session.task_id,
            session.project_id,
            session.duration,
            session.status.as_str(),
            fmt_opt_time(session.end_time),
            session.xp_earned,
            fmt_time(session.updated_at),
            session.id,
            session.user_id
        ],
    )?;
    Ok(())
}

pub fn delete_session_row(conn: &Connection, user_id: &str, session_id: &str) -> AppResult<usize> {
    Ok(conn.execute(
        "DELETE FROM pomodoro_sessions WHERE id = ?1 AND user_id = ?2",
        [session_id, user_id],
    )?)
}

pub fn delete_sessions_for_task(conn: &Connection, task_id: &str) -> AppResult<usize> {
    Ok(conn.execute("DELETE FROM pomodoro_sessions WHERE task_id = ?1", [task_id])?)
}

pub fn delete_sessions_for_project(conn: &Connection, project_id: &str) -> AppResult<usize> {
    Ok(conn.execute("DELETE FROM pomodoro_sessions WHERE project_id = ?1", [project_id])?)
}

pub fn move_task_sessions(conn: &Connection, task_id: &str, project_id: &str, now: DateTime<Utc>) -> AppResult<usize> {
    Ok(conn.execute(
        "UPDATE pomodoro_sessions SET project_id = ?1, updated_at = stamp_after(updated_at, ?2) WHERE task_id = ?3",
        params![project_id, fmt_time(now), task_id],
    )?)
}

fn parse_session_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<PomodoroSession> {
    Ok(PomodoroSession {
        id: row.get(0)?,
        user_id: row.get(1)?,
        task_id: row.get(2)?,
        project_id: row.get(3)?,
        duration: row.get(4)?,
        session_type: parse_session_type(&row.get::<_, String>(5)?)?,
        status: parse_session_status(&row.get::<_, String>(6)?)?,
        start_time: parse_time(&row.get::<_, String>(7)?)?,
        end_time: parse_opt_time(row.get(8)?)?,
        xp_earned: row.get(9)?,
        created_at: parse_time(&row.get::<_, String>(10)?)?,
        updated_at: parse_time(&row.get::<_, String>(11)?)?,
    })
}

// Sprints

pub fn insert_sprint(conn: &Connection, sprint: &Sprint) -> AppResult<()> {
    conn.execute(
        "INSERT INTO sprints (id, user_id, name, description, start_date, end_date, status, goal_xp, earned_xp, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            sprint.id,
            sprint.user_id,
            sprint.name,
            sprint.description,
            fmt_time(sprint.start_date),
            fmt_time(sprint.end_date),
            sprint.status.as_str(),
            sprint.goal_xp,
            sprint.earned_xp,
            fmt_time(sprint.created_at),
            fmt_time(sprint.updated_at),
        ],
    )?;
    Ok(())
}

pub fn select_sprint(conn: &Connection, user_id: &str, sprint_id: &str) -> AppResult<Option<Sprint>> {
    conn.query_row(
        &format!("SELECT {} FROM sprints WHERE id = ?1 AND user_id = ?2", SPRINT_COLUMNS),
        [sprint_id, user_id],
        parse_sprint_row,
    )
    .optional()
    .map_err(Into::into)
}

pub fn list_sprints(conn: &Connection, user_id: &str) -> AppResult<Vec<Sprint>> {
    collect(
        conn,
        &format!(
            "SELECT {} FROM sprints WHERE user_id = ?1 ORDER BY start_date ASC, id ASC",
            SPRINT_COLUMNS
        ),
        [user_id],
        parse_sprint_row,
    )
}

pub fn update_sprint(conn: &Connection, sprint: &Sprint) -> AppResult<()> {
    conn.execute(
        "UPDATE sprints
         SET name = ?1, description = ?2, start_date = ?3, end_date = ?4, status = ?5, goal_xp = ?6, earned_xp = ?7, updated_at = ?8
         WHERE id = ?9 AND user_id = ?10",
        params![
            sprint.name,
            sprint.description,
            fmt_time(sprint.start_date),
            fmt_time(sprint.end_date),
            sprint.status.as_str(),
            sprint.goal_xp,
            sprint.earned_xp,
            fmt_time(sprint.updated_at),
            sprint.id,
            sprint.user_id
        ],
    )?;
    Ok(())
}

pub fn delete_sprint_row(conn: &Connection, user_id: &str, sprint_id: &str) -> AppResult<usize> {
    Ok(conn.execute(
        "DELETE FROM sprints WHERE id = ?1 AND user_id = ?2",
        [sprint_id, user_id],
    )?)
}

/// Credits `delta` to every still-open sprint the task is linked to, and records it on each link.
pub fn credit_open_sprints(conn: &Connection, task_id: &str, delta: i64, now: DateTime<Utc>) -> AppResult<usize> {
    conn.execute(
        "UPDATE sprint_tasks SET credited_xp = credited_xp + ?1
         WHERE task_id = ?2
           AND sprint_id IN (SELECT id FROM sprints WHERE status != 'completed')",
        params![delta, task_id],
    )?;
    Ok(conn.execute(
        "UPDATE sprints
         SET earned_xp = earned_xp + ?1, updated_at = stamp_after(updated_at, ?2)
         WHERE status != 'completed'
           AND id IN (SELECT sprint_id FROM sprint_tasks WHERE task_id = ?3)",
        params![delta, fmt_time(now), task_id],
    )?)
}

/// Takes back whatever the task's links credited, closed sprints included.
pub fn withdraw_task_credits(conn: &Connection, task_id: &str, now: DateTime<Utc>) -> AppResult<usize> {
    let changed = conn.execute(
        "UPDATE sprints
         SET earned_xp = earned_xp - (
                 SELECT st.credited_xp FROM sprint_tasks st
                 WHERE st.sprint_id = sprints.id AND st.task_id = ?1
             ),
             updated_at = stamp_after(updated_at, ?2)
         WHERE id IN (SELECT sprint_id FROM sprint_tasks WHERE task_id = ?1 AND credited_xp != 0)",
        params![task_id, fmt_time(now)],
    )?;
    conn.execute(
        "UPDATE sprint_tasks SET credited_xp = 0 WHERE task_id = ?1 AND credited_xp != 0",
        [task_id],
    )?;
    Ok(changed)
}

/// Moves `delta` between one link and its sprint.
pub fn add_link_credit(
    conn: &Connection,
    sprint_id: &str,
    task_id: &str,
    delta: i64,
    now: DateTime<Utc>,
) -> AppResult<usize> {
    conn.execute(
        "UPDATE sprint_tasks SET credited_xp = credited_xp + ?1 WHERE sprint_id = ?2 AND task_id = ?3",
        params![delta, sprint_id, task_id],
    )?;
    add_sprint_xp(conn, sprint_id, delta, now)
}

pub fn link_credit(conn: &Connection, sprint_id: &str, task_id: &str) -> AppResult<i64> {
    Ok(conn
        .query_row(
            "SELECT credited_xp FROM sprint_tasks WHERE sprint_id = ?1 AND task_id = ?2",
            [sprint_id, task_id],
            |row| row.get(0),
        )
        .optional()?
        .unwrap_or(0))
}

/// Re-credits every link of a sprint from its task's current state.
pub fn recredit_sprint_links(conn: &Connection, sprint_id: &str) -> AppResult<usize> {
    Ok(conn.execute(
        "UPDATE sprint_tasks
         SET credited_xp = COALESCE((
             SELECT CASE WHEN t.status = 'completed' THEN t.xp_value ELSE 0 END
             FROM tasks t WHERE t.id = sprint_tasks.task_id
         ), 0)
         WHERE sprint_id = ?1",
        [sprint_id],
    )?)
}

pub fn sum_link_credits(conn: &Connection, sprint_id: &str) -> AppResult<i64> {
    Ok(conn.query_row(
        "SELECT COALESCE(SUM(credited_xp), 0) FROM sprint_tasks WHERE sprint_id = ?1",
        [sprint_id],
        |row| row.get(0),
    )?)
}

pub fn add_sprint_xp(conn: &Connection, sprint_id: &str, delta: i64, now: DateTime<Utc>) -> AppResult<usize> {
    Ok(conn.execute(
        "UPDATE sprints SET earned_xp = earned_xp + ?1, updated_at = stamp_after(updated_at, ?2) WHERE id = ?3",
        params![delta, fmt_time(now), sprint_id],
    )?)
}

pub fn set_sprint_xp(conn: &Connection, sprint_id: &str, value: i64, now: DateTime<Utc>) -> AppResult<()> {
    conn.execute(
        "UPDATE sprints SET earned_xp = ?1, updated_at = stamp_after(updated_at, ?2) WHERE id = ?3",
        params![value, fmt_time(now), sprint_id],
    )?;
    Ok(())
}

/// `(linked, completed, completed xp)` over the tasks linked to a sprint.
pub fn sum_sprint_tasks(conn: &Connection, sprint_id: &str) -> AppResult<(i64, i64, i64)> {
    Ok(conn.query_row(
        "SELECT COUNT(1),
                COALESCE(SUM(CASE WHEN t.status = 'completed' THEN 1 ELSE 0 END), 0),
                COALESCE(SUM(CASE WHEN t.status = 'completed' THEN t.xp_value ELSE 0 END), 0)
         FROM sprint_tasks st JOIN tasks t ON t.id = st.task_id
         WHERE st.sprint_id = ?1",
        [sprint_id],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
    )?)
}

fn parse_sprint_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Sprint> {
    Ok(Sprint {
        id: row.get(0)?,
        user_id: row.get(1)?,
        name: row.get(2)?,
        description: row.get(3)?,
        start_date: parse_time(&row.get::<_, String>(4)?)?,
        end_date: parse_time(&row.get::<_, String>(5)?)?,
        status: parse_sprint_status(&row.get::<_, String>(6)?)?,
        goal_xp: row.get(7)?,
        earned_xp: row.get(8)?,
        created_at: parse_time(&row.get::<_, String>(9)?)?,
        updated_at: parse_time(&row.get::<_, String>(10)?)?,
    })
}

// Sprint links

pub fn insert_sprint_link(conn: &Connection, link: &SprintTask) -> AppResult<()> {
    conn.execute(
        "INSERT INTO sprint_tasks (id, sprint_id, task_id, credited_xp, created_at) VALUES (?1, ?2, ?3, 0, ?4)",
        params![link.id, link.sprint_id, link.task_id, fmt_time(link.created_at)],
    )?;
    Ok(())
}

pub fn select_sprint_link(conn: &Connection, sprint_id: &str, task_id: &str) -> AppResult<Option<SprintTask>> {
    conn.query_row(
        "SELECT id, sprint_id, task_id, created_at FROM sprint_tasks WHERE sprint_id = ?1 AND task_id = ?2",
        [sprint_id, task_id],
        |row| {
            Ok(SprintTask {
                id: row.get(0)?,
                sprint_id: row.get(1)?,
                task_id: row.get(2)?,
                created_at: parse_time(&row.get::<_, String>(3)?)?,
            })
        },
    )
    .optional()
    .map_err(Into::into)
}

pub fn delete_sprint_link(conn: &Connection, sprint_id: &str, task_id: &str) -> AppResult<usize> {
    Ok(conn.execute(
        "DELETE FROM sprint_tasks WHERE sprint_id = ?1 AND task_id = ?2",
        [sprint_id, task_id],
    )?)
}

pub fn delete_links_for_task(conn: &Connection, task_id: &str) -> AppResult<usize> {
    Ok(conn.execute("DELETE FROM sprint_tasks WHERE task_id = ?1", [task_id])?)
}

pub fn delete_links_for_sprint(conn: &Connection, sprint_id: &str) -> AppResult<usize> {
    Ok(conn.execute("DELETE FROM sprint_tasks WHERE sprint_id = ?1", [sprint_id])?)
}

/// Links whose task belongs to someone other than the sprint owner. Always zero unless the
/// store was written around the hierarchy checks.
pub fn count_cross_owner_links(conn: &Connection, user_id: &str) -> AppResult<i64> {
    Ok(conn.query_row(
        "SELECT COUNT(1)
         FROM sprint_tasks st
         JOIN sprints s ON s.id = st.sprint_id
         JOIN tasks t ON t.id = st.task_id
         WHERE s.user_id = ?1 AND t.user_id != s.user_id",
        [user_id],
        |row| row.get(0),
    )?)
}

pub fn delete_cross_owner_links(conn: &Connection, user_id: &str) -> AppResult<usize> {
    Ok(conn.execute(
        "DELETE FROM sprint_tasks
         WHERE sprint_id IN (SELECT id FROM sprints WHERE user_id = ?1)
           AND task_id NOT IN (SELECT id FROM tasks WHERE user_id = ?1)",
        [user_id],
    )?)
}
