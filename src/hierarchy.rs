//! Ownership-scoped create/read/update/delete for every entity kind.
//!
//! Every function runs inside the caller's transaction and reaches the store through a
//! [`Scope`], which pins the calling user. A lookup of someone else's row fails exactly like a
//! lookup of a missing row.

use crate::aggregates;
use crate::db::{next_stamp, store};
use crate::errors::{AppError, AppResult};
use crate::leveling::{award_user_xp, effective_streak, LevelCurve};
use crate::models::{
    CascadeCounts, EntityKind, Folder, FolderPatch, LevelProgress, NewFolder, NewPomodoroSession, NewProject,
    NewSprint, NewTask, NewUser, PomodoroDayStats, PomodoroSession, PomodoroSessionPatch, Priority, Project,
    ProjectPatch, ProjectStatus, SessionStatus, SessionType, Sprint, SprintPatch, SprintStats, SprintStatus,
    SprintTask, Task, TaskPatch, TaskStatus, User, UserPatch,
};
use crate::settings::EngineSettings;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use rusqlite::Connection;
use serde::de::DeserializeOwned;
use uuid::Uuid;

pub const DEFAULT_FOLDER_COLOR: &str = "#3b82f6";
pub const DEFAULT_FOLDER_ICON: &str = "📁";
const DEFAULT_ESTIMATED_POMODOROS: i64 = 1;

const IMMUTABLE_FIELDS: &[&str] = &["id", "userId", "createdAt", "updatedAt"];
const DERIVED_FIELDS: &[&str] = &[
    "projectCount",
    "taskCount",
    "completedTaskCount",
    "xpEarned",
    "earnedXp",
    "completedAt",
    "actualPomodoros",
    "endTime",
];
const USER_DERIVED_FIELDS: &[&str] = &["level", "xp", "totalXp", "streak", "lastActiveOn"];

static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("valid regex"));

/// The calling user's view of the store.
#[derive(Clone, Copy)]
pub struct Scope<'a> {
    conn: &'a Connection,
    user_id: &'a str,
}

impl<'a> Scope<'a> {
    pub fn resolve(conn: &'a Connection, user_id: &'a str) -> AppResult<Self> {
        if store::select_user(conn, user_id)?.is_none() {
            return Err(not_found("User", user_id));
        }
        Ok(Self { conn, user_id })
    }

    pub fn conn(&self) -> &'a Connection {
        self.conn
    }

    pub fn user_id(&self) -> &'a str {
        self.user_id
    }

    pub fn user(&self) -> AppResult<User> {
        store::select_user(self.conn, self.user_id)?.ok_or_else(|| not_found("User", self.user_id))
    }

    pub fn folder(&self, id: &str) -> AppResult<Folder> {
        store::select_folder(self.conn, self.user_id, id)?
            .ok_or_else(|| not_found(EntityKind::Folder.label(), id))
    }

    pub fn project(&self, id: &str) -> AppResult<Project> {
        store::select_project(self.conn, self.user_id, id)?
            .ok_or_else(|| not_found(EntityKind::Project.label(), id))
    }

    pub fn task(&self, id: &str) -> AppResult<Task> {
        store::select_task(self.conn, self.user_id, id)?.ok_or_else(|| not_found(EntityKind::Task.label(), id))
    }

    pub fn session(&self, id: &str) -> AppResult<PomodoroSession> {
        store::select_session(self.conn, self.user_id, id)?
            .ok_or_else(|| not_found(EntityKind::PomodoroSession.label(), id))
    }

    pub fn sprint(&self, id: &str) -> AppResult<Sprint> {
        store::select_sprint(self.conn, self.user_id, id)?
            .ok_or_else(|| not_found(EntityKind::Sprint.label(), id))
    }

    // Parent references in a request body: a missing or foreign parent is a bad request, not a 404.

    fn parent_folder(&self, id: &str) -> AppResult<Folder> {
        store::select_folder(self.conn, self.user_id, id)?.ok_or_else(|| dangling("folderId", id))
    }

    fn parent_project(&self, id: &str) -> AppResult<Project> {
        store::select_project(self.conn, self.user_id, id)?.ok_or_else(|| dangling("projectId", id))
    }

    fn parent_task(&self, id: &str) -> AppResult<Task> {
        store::select_task(self.conn, self.user_id, id)?.ok_or_else(|| dangling("taskId", id))
    }
}

fn not_found(label: &str, id: &str) -> AppError {
    AppError::NotFound(format!("{} '{}' not found", label, id))
}

fn dangling(field: &str, id: &str) -> AppError {
    AppError::Validation(format!("{} '{}' does not reference an entity you own", field, id))
}

fn required_text(field: &str, value: &str) -> AppResult<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(AppError::Validation(format!("{} must not be empty", field)));
    }
    Ok(trimmed.to_string())
}

fn non_negative(field: &str, value: i64) -> AppResult<i64> {
    if value < 0 {
        return Err(AppError::Validation(format!("{} must not be negative, got {}", field, value)));
    }
    Ok(value)
}

fn positive_minutes(value: i64) -> AppResult<i64> {
    if value <= 0 {
        return Err(AppError::Validation(format!(
            "duration must be a positive number of minutes, got {}",
            value
        )));
    }
    Ok(value)
}

fn check_sprint_window(start: DateTime<Utc>, end: DateTime<Utc>) -> AppResult<()> {
    if start > end {
        return Err(AppError::Validation("startDate must not be after endDate".to_string()));
    }
    Ok(())
}

/// Rejects immutable and engine-owned fields, then decodes the rest of the patch.
pub fn decode_patch<T: DeserializeOwned>(kind: EntityKind, patch: serde_json::Value) -> AppResult<T> {
    check_patch_fields(kind.as_str(), &patch, DERIVED_FIELDS)?;
    serde_json::from_value(patch)
        .map_err(|error| AppError::Validation(format!("invalid {} patch: {}", kind.as_str(), error)))
}

pub fn decode_user_patch(patch: serde_json::Value) -> AppResult<UserPatch> {
    check_patch_fields("user", &patch, USER_DERIVED_FIELDS)?;
    serde_json::from_value(patch).map_err(|error| AppError::Validation(format!("invalid user patch: {}", error)))
}

fn check_patch_fields(kind: &str, patch: &serde_json::Value, derived: &[&str]) -> AppResult<()> {
    let fields = patch
        .as_object()
        .ok_or_else(|| AppError::Validation(format!("{} patch must be a JSON object", kind)))?;
    for key in fields.keys() {
        if IMMUTABLE_FIELDS.contains(&key.as_str()) {
            return Err(AppError::Validation(format!("field '{}' is immutable", key)));
        }
        if derived.contains(&key.as_str()) {
            return Err(AppError::Validation(format!(
                "field '{}' is maintained by the engine and cannot be set",
                key
            )));
        }
    }
    Ok(())
}

// Users

pub fn create_user(conn: &Connection, input: NewUser, curve: &LevelCurve, now: DateTime<Utc>) -> AppResult<User> {
    let email = input.email.trim().to_lowercase();
    if !EMAIL_RE.is_match(&email) {
        return Err(AppError::Validation(format!("'{}' is not a valid email address", input.email)));
    }
    let (level, xp) = curve.level_for(0);
    let user = User {
        id: Uuid::new_v4().to_string(),
        email,
        first_name: required_text("firstName", &input.first_name)?,
        last_name: required_text("lastName", &input.last_name)?,
        avatar: None,
        level,
        xp,
        total_xp: 0,
        streak: 0,
        last_active_on: None,
        created_at: now,
        updated_at: now,
    };
    store::insert_user(conn, &user).map_err(|error| match error {
        AppError::Conflict(_) => AppError::Conflict(format!("email '{}' is already registered", user.email)),
        other => other,
    })?;
    tracing::info!(user_id = %user.id, "user registered");
    Ok(user)
}

/// The stored user with `streak` as it stands on `today`.
pub fn current_user(scope: &Scope<'_>, today: NaiveDate) -> AppResult<User> {
    let mut user = scope.user()?;
    user.streak = effective_streak(user.streak, user.last_active_on, today);
    Ok(user)
}

/// Applies a profile patch and returns the user as [`current_user`] would on `now`'s day.
pub fn update_current_user(scope: &Scope<'_>, patch: UserPatch, now: DateTime<Utc>) -> AppResult<User> {
    let mut user = scope.user()?;
    if let Some(first_name) = patch.first_name {
        user.first_name = required_text("firstName", &first_name)?;
    }
    if let Some(last_name) = patch.last_name {
        user.last_name = required_text("lastName", &last_name)?;
    }
    if let Some(avatar) = patch.avatar {
        user.avatar = avatar;
    }
    user.updated_at = next_stamp(user.updated_at, now);
    store::update_user_profile(scope.conn, &user)?;
    user.streak = effective_streak(user.streak, user.last_active_on, now.date_naive());
    Ok(user)
}

pub fn level_progress(scope: &Scope<'_>, curve: &LevelCurve) -> AppResult<LevelProgress> {
    Ok(curve.progress(scope.user()?.total_xp))
}

// Folders

pub fn create_folder(scope: &Scope<'_>, input: NewFolder, now: DateTime<Utc>) -> AppResult<Folder> {
    let folder = Folder {
        id: Uuid::new_v4().to_string(),
        user_id: scope.user_id.to_string(),
        name: required_text("name", &input.name)?,
        description: input.description,
        color: input.color.unwrap_or_else(|| DEFAULT_FOLDER_COLOR.to_string()),
        icon: input.icon.unwrap_or_else(|| DEFAULT_FOLDER_ICON.to_string()),
        project_count: 0,
        created_at: now,
        updated_at: now,
    };
    store::insert_folder(scope.conn, &folder)?;
    Ok(folder)
}

pub fn list_folders(scope: &Scope<'_>) -> AppResult<Vec<Folder>> {
    store::list_folders(scope.conn, scope.user_id)
}

pub fn update_folder(scope: &Scope<'_>, id: &str, patch: FolderPatch, now: DateTime<Utc>) -> AppResult<Folder> {
    let mut folder = scope.folder(id)?;
    if let Some(name) = patch.name {
        folder.name = required_text("name", &name)?;
    }
    if let Some(description) = patch.description {
        folder.description = description;
    }
    if let Some(color) = patch.color {
        folder.color = required_text("color", &color)?;
    }
    if let Some(icon) = patch.icon {
        folder.icon = required_text("icon", &icon)?;
    }
    folder.updated_at = next_stamp(folder.updated_at, now);
    store::update_folder(scope.conn, &folder)?;
    Ok(folder)
}

pub fn delete_folder(scope: &Scope<'_>, id: &str, now: DateTime<Utc>) -> AppResult<CascadeCounts> {
    let folder = scope.folder(id)?;
    let mut removed = CascadeCounts::default();
    for project in store::list_projects(scope.conn, scope.user_id, Some(&folder.id))? {
        removed += remove_project(scope, &project, now)?;
        removed.projects += 1;
    }
    store::delete_folder_row(scope.conn, scope.user_id, &folder.id)?;
    Ok(removed)
}

// Projects

pub fn create_project(scope: &Scope<'_>, input: NewProject, now: DateTime<Utc>) -> AppResult<Project> {
    let folder = scope.parent_folder(&input.folder_id)?;
    let project = Project {
        id: Uuid::new_v4().to_string(),
        user_id: scope.user_id.to_string(),
        folder_id: folder.id,
        name: required_text("name", &input.name)?,
        description: input.description,
        status: input.status.unwrap_or(ProjectStatus::Active),
        priority: input.priority.unwrap_or(Priority::Medium),
        due_date: input.due_date,
        task_count: 0,
        completed_task_count: 0,
        xp_earned: 0,
        created_at: now,
        updated_at: now,
    };
    store::insert_project(scope.conn, &project)?;
    aggregates::project_created(scope.conn, &project, now)?;
    Ok(project)
}

pub fn list_projects(scope: &Scope<'_>, folder_id: Option<&str>) -> AppResult<Vec<Project>> {
    if let Some(folder_id) = folder_id {
        scope.folder(folder_id)?;
    }
    store::list_projects(scope.conn, scope.user_id, folder_id)
}

pub fn update_project(scope: &Scope<'_>, id: &str, patch: ProjectPatch, now: DateTime<Utc>) -> AppResult<Project> {
    let before = scope.project(id)?;
    let mut project = before.clone();
    if let Some(folder_id) = patch.folder_id {
        project.folder_id = scope.parent_folder(&folder_id)?.id;
    }
    if let Some(name) = patch.name {
        project.name = required_text("name", &name)?;
    }
    if let Some(description) = patch.description {
        project.description = description;
    }
    if let Some(status) = patch.status {
        project.status = status;
    }
    if let Some(priority) = patch.priority {
        project.priority = priority;
    }
    if let Some(due_date) = patch.due_date {
        project.due_date = due_date;
    }
    project.updated_at = next_stamp(before.updated_at, now);
    store::update_project(scope.conn, &project)?;
    aggregates::project_moved(scope.conn, &before, &project, now)?;
    Ok(project)
}

pub fn delete_project(scope: &Scope<'_>, id: &str, now: DateTime<Utc>) -> AppResult<CascadeCounts> {
    let project = scope.project(id)?;
    remove_project(scope, &project, now)
}

fn remove_project(scope: &Scope<'_>, project: &Project, now: DateTime<Utc>) -> AppResult<CascadeCounts> {
    let mut removed = CascadeCounts::default();
    for task in store::list_tasks(scope.conn, scope.user_id, Some(&project.id))? {
        removed += remove_task(scope, &task, now)?;
        removed.tasks += 1;
    }
    removed.sessions += store::delete_sessions_for_project(scope.conn, &project.id)? as u64;
    aggregates::project_removed(scope.conn, project, now)?;
    store::delete_project_row(scope.conn, scope.user_id, &project.id)?;
    Ok(removed)
}

// Tasks

pub fn create_task(
    scope: &Scope<'_>,
    input: NewTask,
    settings: &EngineSettings,
    now: DateTime<Utc>,
) -> AppResult<Task> {
    let project = scope.parent_project(&input.project_id)?;
    let status = input.status.unwrap_or(TaskStatus::Todo);
    let task = Task {
        id: Uuid::new_v4().to_string(),
        user_id: scope.user_id.to_string(),
        project_id: project.id,
        title: required_text("title", &input.title)?,
        description: input.description,
        status,
        priority: input.priority.unwrap_or(Priority::Medium),
        xp_value: non_negative("xpValue", input.xp_value.unwrap_or(settings.default_task_xp))?,
        estimated_pomodoros: non_negative(
            "estimatedPomodoros",
            input.estimated_pomodoros.unwrap_or(DEFAULT_ESTIMATED_POMODOROS),
        )?,
        actual_pomodoros: 0,
        due_date: input.due_date,
        completed_at: status.is_completed().then_some(now),
        created_at: now,
        updated_at: now,
    };
    store::insert_task(scope.conn, &task)?;
    aggregates::task_created(scope.conn, &task, now)?;
    if task.status.is_completed() {
        award_task_xp(scope, &task, settings, now)?;
    }
    Ok(task)
}

pub fn list_tasks(scope: &Scope<'_>, project_id: Option<&str>) -> AppResult<Vec<Task>> {
    if let Some(project_id) = project_id {
        scope.project(project_id)?;
    }
    store::list_tasks(scope.conn, scope.user_id, project_id)
}

pub fn list_sprint_tasks(scope: &Scope<'_>, sprint_id: &str) -> AppResult<Vec<Task>> {
    let sprint = scope.sprint(sprint_id)?;
    store::list_sprint_tasks(scope.conn, scope.user_id, &sprint.id)
}

pub fn update_task(
    scope: &Scope<'_>,
    id: &str,
    patch: TaskPatch,
    settings: &EngineSettings,
    now: DateTime<Utc>,
) -> AppResult<Task> {
    let before = scope.task(id)?;
    let mut task = before.clone();
    if let Some(project_id) = patch.project_id {
        task.project_id = scope.parent_project(&project_id)?.id;
    }
    if let Some(title) = patch.title {
        task.title = required_text("title", &title)?;
    }
    if let Some(description) = patch.description {
        task.description = description;
    }
    if let Some(status) = patch.status {
        task.status = status;
    }
    if let Some(priority) = patch.priority {
        task.priority = priority;
    }
    if let Some(xp_value) = patch.xp_value {
        task.xp_value = non_negative("xpValue", xp_value)?;
    }
    if let Some(estimated) = patch.estimated_pomodoros {
        task.estimated_pomodoros = non_negative("estimatedPomodoros", estimated)?;
    }
    if let Some(due_date) = patch.due_date {
        task.due_date = due_date;
    }
    save_task_change(scope, &before, task, settings, now)
}

/// Marks a task completed. Completing an already completed task changes nothing.
pub fn complete_task(scope: &Scope<'_>, id: &str, settings: &EngineSettings, now: DateTime<Utc>) -> AppResult<Task> {
    let before = scope.task(id)?;
    if before.status.is_completed() {
        return Ok(before);
    }
    let mut task = before.clone();
    task.status = TaskStatus::Completed;
    save_task_change(scope, &before, task, settings, now)
}

fn save_task_change(
    scope: &Scope<'_>,
    before: &Task,
    mut task: Task,
    settings: &EngineSettings,
    now: DateTime<Utc>,
) -> AppResult<Task> {
    // completedAt is written once; it doubles as the "already credited" marker.
    let first_completion = task.status.is_completed() && task.completed_at.is_none();
    if first_completion {
        task.completed_at = Some(now);
    }
    task.updated_at = next_stamp(before.updated_at, now);
    store::update_task(scope.conn, &task)?;
    if task.project_id != before.project_id {
        store::move_task_sessions(scope.conn, &task.id, &task.project_id, now)?;
    }
    aggregates::task_changed(scope.conn, before, &task, now)?;
    if first_completion {
        award_task_xp(scope, &task, settings, now)?;
    }
    Ok(task)
}

fn award_task_xp(scope: &Scope<'_>, task: &Task, settings: &EngineSettings, now: DateTime<Utc>) -> AppResult<()> {
    let user = award_user_xp(
        scope.conn,
        scope.user_id,
        task.xp_value,
        &settings.leveling,
        Some(now.date_naive()),
        now,
    )?;
    store::add_project_xp(scope.conn, &task.project_id, task.xp_value, now)?;
    tracing::info!(
        user_id = %scope.user_id,
        task_id = %task.id,
        project_id = %task.project_id,
        xp = task.xp_value,
        total_xp = user.total_xp,
        level = user.level,
        "task completed"
    );
    Ok(())
}

pub fn delete_task(scope: &Scope<'_>, id: &str, now: DateTime<Utc>) -> AppResult<CascadeCounts> {
    let task = scope.task(id)?;
    remove_task(scope, &task, now)
}

fn remove_task(scope: &Scope<'_>, task: &Task, now: DateTime<Utc>) -> AppResult<CascadeCounts> {
    aggregates::task_removed(scope.conn, task, now)?;
    let sprint_links = store::delete_links_for_task(scope.conn, &task.id)? as u64;
    let sessions = store::delete_sessions_for_task(scope.conn, &task.id)? as u64;
    store::delete_task_row(scope.conn, scope.user_id, &task.id)?;
    Ok(CascadeCounts {
        sessions,
        sprint_links,
        ..CascadeCounts::default()
    })
}

// Pomodoro sessions

pub fn start_session(scope: &Scope<'_>, input: NewPomodoroSession, now: DateTime<Utc>) -> AppResult<PomodoroSession> {
    let duration = positive_minutes(input.duration)?;
    let task = input.task_id.as_deref().map(|id| scope.parent_task(id)).transpose()?;
    let project_id = match (&task, input.project_id) {
        (Some(task), Some(project_id)) => {
            if task.project_id != project_id {
                return Err(AppError::Validation(format!(
                    "task '{}' belongs to project '{}', not '{}'",
                    task.id, task.project_id, project_id
                )));
            }
            Some(project_id)
        }
        (Some(task), None) => Some(task.project_id.clone()),
        (None, Some(project_id)) => Some(scope.parent_project(&project_id)?.id),
        (None, None) => None,
    };

    let session = PomodoroSession {
        id: Uuid::new_v4().to_string(),
        user_id: scope.user_id.to_string(),
        task_id: task.map(|task| task.id),
        project_id,
        duration,
        session_type: input.session_type,
        status: SessionStatus::Active,
        start_time: now,
        end_time: None,
        xp_earned: 0,
        created_at: now,
        updated_at: now,
    };
    store::insert_session(scope.conn, &session)?;
    Ok(session)
}

pub fn list_sessions(
    scope: &Scope<'_>,
    task_id: Option<&str>,
    project_id: Option<&str>,
) -> AppResult<Vec<PomodoroSession>> {
    if let Some(task_id) = task_id {
        scope.task(task_id)?;
    }
    if let Some(project_id) = project_id {
        scope.project(project_id)?;
    }
    store::list_sessions(
        scope.conn,
        scope.user_id,
        store::SessionFilter {
            task_id,
            project_id,
            ..store::SessionFilter::default()
        },
    )
}

pub fn update_session(
    scope: &Scope<'_>,
    id: &str,
    patch: PomodoroSessionPatch,
    settings: &EngineSettings,
    now: DateTime<Utc>,
) -> AppResult<PomodoroSession> {
    let before = scope.session(id)?;
    if before.status.is_terminal() {
        let status_changes = patch.status.is_some_and(|status| status != before.status);
        let duration_changes = patch.duration.is_some_and(|duration| duration != before.duration);
        if status_changes || duration_changes {
            return Err(AppError::Validation(format!(
                "pomodoro session '{}' is {} and can no longer change",
                before.id,
                before.status.as_str()
            )));
        }
        return Ok(before);
    }

    let mut session = before.clone();
    if let Some(duration) = patch.duration {
        session.duration = positive_minutes(duration)?;
    }
    if let Some(status) = patch.status {
        session.status = status;
    }
    save_session_change(scope, &before, session, settings, now)
}

/// Completes a running or paused session. Completing it again is a no-op.
pub fn complete_session(
    scope: &Scope<'_>,
    id: &str,
    settings: &EngineSettings,
    now: DateTime<Utc>,
) -> AppResult<PomodoroSession> {
    let before = scope.session(id)?;
    match before.status {
        SessionStatus::Completed => return Ok(before),
        SessionStatus::Cancelled => {
            return Err(AppError::Validation(format!(
                "pomodoro session '{}' was cancelled and cannot be completed",
                before.id
            )))
        }
        SessionStatus::Active | SessionStatus::Paused => {}
    }
    let mut session = before.clone();
    session.status = SessionStatus::Completed;
    save_session_change(scope, &before, session, settings, now)
}

fn save_session_change(
    scope: &Scope<'_>,
    before: &PomodoroSession,
    mut session: PomodoroSession,
    settings: &EngineSettings,
    now: DateTime<Utc>,
) -> AppResult<PomodoroSession> {
    match session.status {
        SessionStatus::Completed => {
            session.end_time = Some(now);
            session.xp_earned = settings.pomodoro.award(session.session_type, session.duration);
        }
        SessionStatus::Cancelled => session.end_time = Some(now),
        SessionStatus::Active | SessionStatus::Paused => {}
    }
    session.updated_at = next_stamp(before.updated_at, now);
    store::update_session(scope.conn, &session)?;

    if session.status == SessionStatus::Completed {
        let focused = session.session_type == SessionType::Work;
        if focused || session.xp_earned > 0 {
            award_user_xp(
                scope.conn,
                scope.user_id,
                session.xp_earned,
                &settings.leveling,
                focused.then(|| now.date_naive()),
                now,
            )?;
        }
        if focused {
            if let Some(task_id) = session.task_id.as_deref() {
                store::increment_actual_pomodoros(scope.conn, task_id, now)?;
            }
        }
        tracing::info!(
            user_id = %scope.user_id,
            session_id = %session.id,
            session_type = session.session_type.as_str(),
            xp = session.xp_earned,
            "pomodoro session completed"
        );
    }
    Ok(session)
}

pub fn delete_session(scope: &Scope<'_>, id: &str) -> AppResult<CascadeCounts> {
    let session = scope.session(id)?;
    store::delete_session_row(scope.conn, scope.user_id, &session.id)?;
    Ok(CascadeCounts::default())
}

/// Sessions completed on `day` (UTC), counted on the day they ended.
pub fn pomodoro_stats(scope: &Scope<'_>, day: NaiveDate) -> AppResult<PomodoroDayStats> {
    let start = day
        .and_hms_opt(0, 0, 0)
        .ok_or_else(|| AppError::Validation(format!("day '{}' has no midnight", day)))?
        .and_utc();
    let sessions = store::list_sessions(
        scope.conn,
        scope.user_id,
        store::SessionFilter {
            ended_from: Some(start),
            ended_before: Some(start + Duration::days(1)),
            ..store::SessionFilter::default()
        },
    )?;

    let mut stats = PomodoroDayStats {
        day,
        completed_sessions: 0,
        work_minutes: 0,
        break_minutes: 0,
        xp_earned: 0,
    };
    for session in sessions.iter().filter(|s| s.status == SessionStatus::Completed) {
        stats.completed_sessions += 1;
        stats.xp_earned += session.xp_earned;
        match session.session_type {
            SessionType::Work => stats.work_minutes += session.duration,
            SessionType::ShortBreak | SessionType::LongBreak => stats.break_minutes += session.duration,
        }
    }
    Ok(stats)
}

// Sprints

pub fn create_sprint(scope: &Scope<'_>, input: NewSprint, now: DateTime<Utc>) -> AppResult<Sprint> {
    check_sprint_window(input.start_date, input.end_date)?;
    let sprint = Sprint {
        id: Uuid::new_v4().to_string(),
        user_id: scope.user_id.to_string(),
        name: required_text("name", &input.name)?,
        description: input.description,
        start_date: input.start_date,
        end_date: input.end_date,
        status: SprintStatus::Planned,
        goal_xp: non_negative("goalXp", input.goal_xp.unwrap_or(0))?,
        earned_xp: 0,
        created_at: now,
        updated_at: now,
    };
    store::insert_sprint(scope.conn, &sprint)?;
    Ok(sprint)
}

pub fn list_sprints(scope: &Scope<'_>) -> AppResult<Vec<Sprint>> {
    store::list_sprints(scope.conn, scope.user_id)
}

pub fn update_sprint(scope: &Scope<'_>, id: &str, patch: SprintPatch, now: DateTime<Utc>) -> AppResult<Sprint> {
    let before = scope.sprint(id)?;
    let mut sprint = before.clone();
    if let Some(name) = patch.name {
        sprint.name = required_text("name", &name)?;
    }
    if let Some(description) = patch.description {
        sprint.description = description;
    }
    if let Some(start_date) = patch.start_date {
        sprint.start_date = start_date;
    }
    if let Some(end_date) = patch.end_date {
        sprint.end_date = end_date;
    }
    check_sprint_window(sprint.start_date, sprint.end_date)?;
    if let Some(goal_xp) = patch.goal_xp {
        sprint.goal_xp = non_negative("goalXp", goal_xp)?;
    }
    if let Some(status) = patch.status {
        sprint.status = status;
    }

    // A closed sprint keeps its score; reopening picks the live sum back up.
    if !before.status.accrues_xp() && sprint.status.accrues_xp() {
        sprint.earned_xp = aggregates::reopen_sprint(scope.conn, &sprint.id)?;
    }
    sprint.updated_at = next_stamp(before.updated_at, now);
    store::update_sprint(scope.conn, &sprint)?;

    if before.status.accrues_xp() && !sprint.status.accrues_xp() {
        tracing::info!(
            user_id = %scope.user_id,
            sprint_id = %sprint.id,
            earned_xp = sprint.earned_xp,
            goal_xp = sprint.goal_xp,
            "sprint closed"
        );
    }
    Ok(sprint)
}

pub fn delete_sprint(scope: &Scope<'_>, id: &str) -> AppResult<CascadeCounts> {
    let sprint = scope.sprint(id)?;
    let sprint_links = store::delete_links_for_sprint(scope.conn, &sprint.id)? as u64;
    store::delete_sprint_row(scope.conn, scope.user_id, &sprint.id)?;
    Ok(CascadeCounts {
        sprint_links,
        ..CascadeCounts::default()
    })
}

pub fn add_task_to_sprint(
    scope: &Scope<'_>,
    sprint_id: &str,
    task_id: &str,
    now: DateTime<Utc>,
) -> AppResult<SprintTask> {
    let sprint = scope.sprint(sprint_id)?;
    let task = scope.parent_task(task_id)?;
    if !sprint.status.accrues_xp() {
        return Err(AppError::Validation(format!(
            "sprint '{}' is completed and no longer takes tasks",
            sprint.id
        )));
    }
    if store::select_sprint_link(scope.conn, &sprint.id, &task.id)?.is_some() {
        return Err(AppError::Conflict(format!(
            "task '{}' is already in sprint '{}'",
            task.id, sprint.id
        )));
    }

    let link = SprintTask {
        id: Uuid::new_v4().to_string(),
        sprint_id: sprint.id.clone(),
        task_id: task.id.clone(),
        created_at: now,
    };
    store::insert_sprint_link(scope.conn, &link)?;
    aggregates::task_linked(scope.conn, &sprint, &task, now)?;
    Ok(link)
}

pub fn remove_task_from_sprint(scope: &Scope<'_>, sprint_id: &str, task_id: &str, now: DateTime<Utc>) -> AppResult<()> {
    let sprint = scope.sprint(sprint_id)?;
    let task = scope.task(task_id)?;
    if store::select_sprint_link(scope.conn, &sprint.id, &task.id)?.is_none() {
        return Err(AppError::NotFound(format!(
            "Task '{}' is not in sprint '{}'",
            task.id, sprint.id
        )));
    }
    aggregates::task_unlinked(scope.conn, &sprint, &task, now)?;
    store::delete_sprint_link(scope.conn, &sprint.id, &task.id)?;
    Ok(())
}

pub fn sprint_stats(scope: &Scope<'_>, sprint_id: &str, now: DateTime<Utc>) -> AppResult<SprintStats> {
    let sprint = scope.sprint(sprint_id)?;
    let (total_tasks, completed_tasks, _) = store::sum_sprint_tasks(scope.conn, &sprint.id)?;
    let progress_percentage = if sprint.goal_xp > 0 {
        (sprint.earned_xp as f64 * 100.0 / sprint.goal_xp as f64).min(100.0)
    } else {
        0.0
    };
    let seconds_left = (sprint.end_date - now).num_seconds().max(0);
    let days_remaining = (seconds_left + 86_399) / 86_400;

    Ok(SprintStats {
        sprint_id: sprint.id,
        total_tasks,
        completed_tasks,
        goal_xp: sprint.goal_xp,
        earned_xp: sprint.earned_xp,
        progress_percentage,
        days_remaining,
    })
}
