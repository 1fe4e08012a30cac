use crate::aggregates;
use crate::db::{load_engine_settings, now, save_engine_settings, Database};
use crate::errors::{AppError, AppResult};
use crate::hierarchy::{self, Scope};
use crate::leveling::relevel_all_users;
use crate::models::{
    DeleteOutcome, Entity, EntityKind, Folder, FolderPatch, LevelProgress, NewEntity, NewFolder, NewPomodoroSession,
    NewProject, NewSprint, NewTask, NewUser, ParentRef, PomodoroDayStats, PomodoroSession, PomodoroSessionPatch,
    Project, ProjectPatch, RepairReport, Sprint, SprintPatch, SprintStats, SprintTask, Task, TaskPatch, User,
};
use crate::settings::{CoreConfig, EngineSettings};
use chrono::NaiveDate;
use std::path::Path;

/// Entry point for the upstream transports. Every method takes the already-authenticated
/// caller id and runs as one store transaction.
#[derive(Debug)]
pub struct LifeQuestCore {
    db: Database,
}

impl LifeQuestCore {
    pub fn open(path: &Path, config: &CoreConfig) -> AppResult<Self> {
        config.validate()?;
        let db = Database::open(path, &config.store, &config.engine)?;
        tracing::info!(path = %path.display(), "opened lifequest store");
        Ok(Self { db })
    }

    pub fn open_in_memory(config: &CoreConfig) -> AppResult<Self> {
        config.validate()?;
        Ok(Self {
            db: Database::open_in_memory(&config.store, &config.engine)?,
        })
    }

    pub fn database_path(&self) -> Option<&Path> {
        self.db.path()
    }

    // Users

    pub async fn create_user(&self, input: NewUser) -> AppResult<User> {
        self.db
            .write("user.create", move |tx| {
                let settings = load_engine_settings(tx)?;
                hierarchy::create_user(tx, input, &settings.leveling, now())
            })
            .await
    }

    pub async fn current_user(&self, user_id: &str) -> AppResult<User> {
        self.db
            .read("user.current", |conn| {
                let scope = Scope::resolve(conn, user_id)?;
                hierarchy::current_user(&scope, now().date_naive())
            })
            .await
    }

    /// Applies a profile patch (`firstName`, `lastName`, `avatar`).
    pub async fn update_current_user(&self, user_id: &str, patch: serde_json::Value) -> AppResult<User> {
        let patch = hierarchy::decode_user_patch(patch)?;
        self.db
            .write("user.update", |tx| {
                let scope = Scope::resolve(tx, user_id)?;
                hierarchy::update_current_user(&scope, patch, now())
            })
            .await
    }

    pub async fn level_progress(&self, user_id: &str) -> AppResult<LevelProgress> {
        self.db
            .read("user.level_progress", |conn| {
                let settings = load_engine_settings(conn)?;
                let scope = Scope::resolve(conn, user_id)?;
                hierarchy::level_progress(&scope, &settings.leveling)
            })
            .await
    }

    // Generic dispatch

    pub async fn create(&self, user_id: &str, input: NewEntity) -> AppResult<Entity> {
        match input {
            NewEntity::Folder(input) => self.create_folder(user_id, input).await.map(Entity::Folder),
            NewEntity::Project(input) => self.create_project(user_id, input).await.map(Entity::Project),
            NewEntity::Task(input) => self.create_task(user_id, input).await.map(Entity::Task),
            NewEntity::PomodoroSession(input) => self.start_session(user_id, input).await.map(Entity::PomodoroSession),
            NewEntity::Sprint(input) => self.create_sprint(user_id, input).await.map(Entity::Sprint),
        }
    }

    pub async fn get(&self, kind: EntityKind, user_id: &str, id: &str) -> AppResult<Entity> {
        self.db
            .read("entity.get", |conn| {
                let scope = Scope::resolve(conn, user_id)?;
                Ok(match kind {
                    EntityKind::Folder => Entity::Folder(scope.folder(id)?),
                    EntityKind::Project => Entity::Project(scope.project(id)?),
                    EntityKind::Task => Entity::Task(scope.task(id)?),
                    EntityKind::PomodoroSession => Entity::PomodoroSession(scope.session(id)?),
                    EntityKind::Sprint => Entity::Sprint(scope.sprint(id)?),
                })
            })
            .await
    }

    /// Applies a JSON merge-style patch; only supplied fields change.
    pub async fn update(
        &self,
        kind: EntityKind,
        user_id: &str,
        id: &str,
        patch: serde_json::Value,
    ) -> AppResult<Entity> {
        match kind {
            EntityKind::Folder => self
                .update_folder(user_id, id, hierarchy::decode_patch(kind, patch)?)
                .await
                .map(Entity::Folder),
            EntityKind::Project => self
                .update_project(user_id, id, hierarchy::decode_patch(kind, patch)?)
                .await
                .map(Entity::Project),
            EntityKind::Task => self
                .update_task(user_id, id, hierarchy::decode_patch(kind, patch)?)
                .await
                .map(Entity::Task),
            EntityKind::PomodoroSession => self
                .update_session(user_id, id, hierarchy::decode_patch(kind, patch)?)
                .await
                .map(Entity::PomodoroSession),
            EntityKind::Sprint => self
                .update_sprint(user_id, id, hierarchy::decode_patch(kind, patch)?)
                .await
                .map(Entity::Sprint),
        }
    }

    pub async fn delete(&self, kind: EntityKind, user_id: &str, id: &str) -> AppResult<DeleteOutcome> {
        let op = format!("{}.delete", kind.as_str());
        let removed = self
            .db
            .write(&op, |tx| {
                let scope = Scope::resolve(tx, user_id)?;
                let at = now();
                match kind {
                    EntityKind::Folder => hierarchy::delete_folder(&scope, id, at),
                    EntityKind::Project => hierarchy::delete_project(&scope, id, at),
                    EntityKind::Task => hierarchy::delete_task(&scope, id, at),
                    EntityKind::PomodoroSession => hierarchy::delete_session(&scope, id),
                    EntityKind::Sprint => hierarchy::delete_sprint(&scope, id),
                }
            })
            .await?;

        tracing::info!(
            user_id = %user_id,
            kind = kind.as_str(),
            id = %id,
            projects = removed.projects,
            tasks = removed.tasks,
            sessions = removed.sessions,
            sprint_links = removed.sprint_links,
            "deleted entity"
        );
        Ok(DeleteOutcome {
            kind,
            id: id.to_string(),
            removed,
        })
    }

    pub async fn list(&self, kind: EntityKind, user_id: &str, parent: Option<ParentRef>) -> AppResult<Vec<Entity>> {
        self.db
            .read("entity.list", |conn| {
                let scope = Scope::resolve(conn, user_id)?;
                let entities = match (kind, parent.as_ref()) {
                    (EntityKind::Folder, None) => wrap(hierarchy::list_folders(&scope)?, Entity::Folder),
                    (EntityKind::Project, None) => wrap(hierarchy::list_projects(&scope, None)?, Entity::Project),
                    (EntityKind::Project, Some(ParentRef::Folder(folder_id))) => {
                        wrap(hierarchy::list_projects(&scope, Some(folder_id.as_str()))?, Entity::Project)
                    }
                    (EntityKind::Task, None) => wrap(hierarchy::list_tasks(&scope, None)?, Entity::Task),
                    (EntityKind::Task, Some(ParentRef::Project(project_id))) => {
                        wrap(hierarchy::list_tasks(&scope, Some(project_id.as_str()))?, Entity::Task)
                    }
                    (EntityKind::Task, Some(ParentRef::Sprint(sprint_id))) => {
                        wrap(hierarchy::list_sprint_tasks(&scope, sprint_id)?, Entity::Task)
                    }
                    (EntityKind::PomodoroSession, None) => {
                        wrap(hierarchy::list_sessions(&scope, None, None)?, Entity::PomodoroSession)
                    }
                    (EntityKind::PomodoroSession, Some(ParentRef::Task(task_id))) => {
                        wrap(hierarchy::list_sessions(&scope, Some(task_id.as_str()), None)?, Entity::PomodoroSession)
                    }
                    (EntityKind::PomodoroSession, Some(ParentRef::Project(project_id))) => wrap(
                        hierarchy::list_sessions(&scope, None, Some(project_id.as_str()))?,
                        Entity::PomodoroSession,
                    ),
                    (EntityKind::Sprint, None) => wrap(hierarchy::list_sprints(&scope)?, Entity::Sprint),
                    (kind, Some(parent)) => {
                        return Err(AppError::Validation(format!(
                            "{} entities cannot be listed by {:?}",
                            kind.as_str(),
                            parent
                        )))
                    }
                };
                Ok(entities)
            })
            .await
    }

    // Folders

    pub async fn create_folder(&self, user_id: &str, input: NewFolder) -> AppResult<Folder> {
        self.db
            .write("folder.create", |tx| {
                let scope = Scope::resolve(tx, user_id)?;
                hierarchy::create_folder(&scope, input, now())
            })
            .await
    }

    pub async fn get_folder(&self, user_id: &str, id: &str) -> AppResult<Folder> {
        self.db
            .read("folder.get", |conn| Scope::resolve(conn, user_id)?.folder(id))
            .await
    }

    pub async fn update_folder(&self, user_id: &str, id: &str, patch: FolderPatch) -> AppResult<Folder> {
        self.db
            .write("folder.update", |tx| {
                let scope = Scope::resolve(tx, user_id)?;
                hierarchy::update_folder(&scope, id, patch, now())
            })
            .await
    }

    // Projects

    pub async fn create_project(&self, user_id: &str, input: NewProject) -> AppResult<Project> {
        self.db
            .write("project.create", |tx| {
                let scope = Scope::resolve(tx, user_id)?;
                hierarchy::create_project(&scope, input, now())
            })
            .await
    }

    pub async fn get_project(&self, user_id: &str, id: &str) -> AppResult<Project> {
        self.db
            .read("project.get", |conn| Scope::resolve(conn, user_id)?.project(id))
            .await
    }

    pub async fn update_project(&self, user_id: &str, id: &str, patch: ProjectPatch) -> AppResult<Project> {
        self.db
            .write("project.update", |tx| {
                let scope = Scope::resolve(tx, user_id)?;
                hierarchy::update_project(&scope, id, patch, now())
            })
            .await
    }

    // Tasks

    pub async fn create_task(&self, user_id: &str, input: NewTask) -> AppResult<Task> {
        self.db
            .write("task.create", |tx| {
                let settings = load_engine_settings(tx)?;
                let scope = Scope::resolve(tx, user_id)?;
                hierarchy::create_task(&scope, input, &settings, now())
            })
            .await
    }

    pub async fn get_task(&self, user_id: &str, id: &str) -> AppResult<Task> {
        self.db
            .read("task.get", |conn| Scope::resolve(conn, user_id)?.task(id))
            .await
    }

    pub async fn update_task(&self, user_id: &str, id: &str, patch: TaskPatch) -> AppResult<Task> {
        self.db
            .write("task.update", |tx| {
                let settings = load_engine_settings(tx)?;
                let scope = Scope::resolve(tx, user_id)?;
                hierarchy::update_task(&scope, id, patch, &settings, now())
            })
            .await
    }

    pub async fn complete_task(&self, user_id: &str, id: &str) -> AppResult<Task> {
        self.db
            .write("task.complete", |tx| {
                let settings = load_engine_settings(tx)?;
                let scope = Scope::resolve(tx, user_id)?;
                hierarchy::complete_task(&scope, id, &settings, now())
            })
            .await
    }

    // Pomodoro sessions

    pub async fn start_session(&self, user_id: &str, input: NewPomodoroSession) -> AppResult<PomodoroSession> {
        self.db
            .write("pomodoro.start", |tx| {
                let scope = Scope::resolve(tx, user_id)?;
                hierarchy::start_session(&scope, input, now())
            })
            .await
    }

    pub async fn get_session(&self, user_id: &str, id: &str) -> AppResult<PomodoroSession> {
        self.db
            .read("pomodoro.get", |conn| Scope::resolve(conn, user_id)?.session(id))
            .await
    }

    pub async fn update_session(
        &self,
        user_id: &str,
        id: &str,
        patch: PomodoroSessionPatch,
    ) -> AppResult<PomodoroSession> {
        self.db
            .write("pomodoro.update", |tx| {
                let settings = load_engine_settings(tx)?;
                let scope = Scope::resolve(tx, user_id)?;
                hierarchy::update_session(&scope, id, patch, &settings, now())
            })
            .await
    }

    pub async fn complete_session(&self, user_id: &str, id: &str) -> AppResult<PomodoroSession> {
        self.db
            .write("pomodoro.complete", |tx| {
                let settings = load_engine_settings(tx)?;
                let scope = Scope::resolve(tx, user_id)?;
                hierarchy::complete_session(&scope, id, &settings, now())
            })
            .await
    }

    pub async fn pomodoro_stats(&self, user_id: &str, day: NaiveDate) -> AppResult<PomodoroDayStats> {
        self.db
            .read("pomodoro.stats", |conn| {
                let scope = Scope::resolve(conn, user_id)?;
                hierarchy::pomodoro_stats(&scope, day)
            })
            .await
    }

    // Sprints

    pub async fn create_sprint(&self, user_id: &str, input: NewSprint) -> AppResult<Sprint> {
        self.db
            .write("sprint.create", |tx| {
                let scope = Scope::resolve(tx, user_id)?;
                hierarchy::create_sprint(&scope, input, now())
            })
            .await
    }

    pub async fn get_sprint(&self, user_id: &str, id: &str) -> AppResult<Sprint> {
        self.db
            .read("sprint.get", |conn| Scope::resolve(conn, user_id)?.sprint(id))
            .await
    }

    pub async fn update_sprint(&self, user_id: &str, id: &str, patch: SprintPatch) -> AppResult<Sprint> {
        self.db
            .write("sprint.update", |tx| {
                let scope = Scope::resolve(tx, user_id)?;
                hierarchy::update_sprint(&scope, id, patch, now())
            })
            .await
    }

    pub async fn add_task_to_sprint(&self, user_id: &str, sprint_id: &str, task_id: &str) -> AppResult<SprintTask> {
        self.db
            .write("sprint.add_task", |tx| {
                let scope = Scope::resolve(tx, user_id)?;
                hierarchy::add_task_to_sprint(&scope, sprint_id, task_id, now())
            })
            .await
    }

    pub async fn remove_task_from_sprint(&self, user_id: &str, sprint_id: &str, task_id: &str) -> AppResult<()> {
        self.db
            .write("sprint.remove_task", |tx| {
                let scope = Scope::resolve(tx, user_id)?;
                hierarchy::remove_task_from_sprint(&scope, sprint_id, task_id, now())
            })
            .await
    }

    pub async fn sprint_tasks(&self, user_id: &str, sprint_id: &str) -> AppResult<Vec<Task>> {
        self.db
            .read("sprint.tasks", |conn| {
                let scope = Scope::resolve(conn, user_id)?;
                hierarchy::list_sprint_tasks(&scope, sprint_id)
            })
            .await
    }

    pub async fn sprint_stats(&self, user_id: &str, sprint_id: &str) -> AppResult<SprintStats> {
        self.db
            .read("sprint.stats", |conn| {
                let scope = Scope::resolve(conn, user_id)?;
                hierarchy::sprint_stats(&scope, sprint_id, now())
            })
            .await
    }

    // Administration

    pub async fn get_settings(&self) -> AppResult<EngineSettings> {
        self.db.read("settings.get", load_engine_settings).await
    }

    /// Deep-merges `update` into the stored engine settings. A new level curve re-levels every user
    /// in the same transaction.
    pub async fn update_settings(&self, update: serde_json::Value) -> AppResult<EngineSettings> {
        let (settings, releveled) = self
            .db
            .write("settings.update", move |tx| {
                let current = load_engine_settings(tx)?;
                let next = current.merged(update)?;
                save_engine_settings(tx, &next)?;
                let releveled = if next.leveling != current.leveling {
                    relevel_all_users(tx, &next.leveling, now())?
                } else {
                    0
                };
                Ok((next, releveled))
            })
            .await?;
        tracing::info!(releveled_users = releveled, "engine settings updated");
        Ok(settings)
    }

    pub async fn verify_aggregates(&self, user_id: &str) -> AppResult<()> {
        self.db
            .read("aggregates.verify", |conn| {
                let settings = load_engine_settings(conn)?;
                aggregates::verify(conn, user_id, &settings.leveling)
            })
            .await
    }

    pub async fn repair_aggregates(&self, user_id: &str) -> AppResult<RepairReport> {
        self.db
            .write("aggregates.repair", |tx| {
                let settings = load_engine_settings(tx)?;
                aggregates::repair(tx, user_id, &settings.leveling, now())
            })
            .await
    }
}

fn wrap<T>(items: Vec<T>, variant: fn(T) -> Entity) -> Vec<Entity> {
    items.into_iter().map(variant).collect()
}
