use chrono::{Duration, Utc};
use lifequest_lib::models::{
    EntityKind, NewFolder, NewPomodoroSession, NewProject, NewSprint, NewTask, NewUser, ParentRef, SessionType,
    SprintPatch, SprintStatus, TaskPatch, TaskStatus,
};
use lifequest_lib::{AppError, CoreConfig, LifeQuestCore};

async fn core_with_user(email: &str) -> (LifeQuestCore, String) {
    let core = LifeQuestCore::open_in_memory(&CoreConfig::default()).expect("core");
    let user_id = register(&core, email).await;
    (core, user_id)
}

async fn register(core: &LifeQuestCore, email: &str) -> String {
    core.create_user(NewUser {
        email: email.to_string(),
        first_name: "Test".to_string(),
        last_name: "User".to_string(),
    })
    .await
    .expect("user")
    .id
}

async fn folder(core: &LifeQuestCore, user_id: &str, name: &str) -> String {
    core.create_folder(
        user_id,
        NewFolder {
            name: name.to_string(),
            ..NewFolder::default()
        },
    )
    .await
    .expect("folder")
    .id
}

async fn project(core: &LifeQuestCore, user_id: &str, folder_id: &str, name: &str) -> String {
    core.create_project(
        user_id,
        NewProject {
            folder_id: folder_id.to_string(),
            name: name.to_string(),
            ..NewProject::default()
        },
    )
    .await
    .expect("project")
    .id
}

async fn task(core: &LifeQuestCore, user_id: &str, project_id: &str, title: &str, xp: i64) -> String {
    core.create_task(
        user_id,
        NewTask {
            project_id: project_id.to_string(),
            title: title.to_string(),
            xp_value: Some(xp),
            ..NewTask::default()
        },
    )
    .await
    .expect("task")
    .id
}

async fn earned_xp(core: &LifeQuestCore, user_id: &str, sprint_id: &str) -> i64 {
    core.get_sprint(user_id, sprint_id).await.expect("sprint").earned_xp
}

#[tokio::test]
async fn work_launch_scenario_credits_project_and_user() {
    let (core, user_id) = core_with_user("ada@example.com").await;
    let folder_id = folder(&core, &user_id, "Work").await;
    let project_id = project(&core, &user_id, &folder_id, "Launch").await;

    let launch = core.get_project(&user_id, &project_id).await.expect("project");
    assert_eq!((launch.task_count, launch.completed_task_count), (0, 0));
    assert_eq!(core.get_folder(&user_id, &folder_id).await.expect("folder").project_count, 1);

    let write_spec = core
        .create_task(
            &user_id,
            NewTask {
                project_id: project_id.clone(),
                title: "Write spec".to_string(),
                ..NewTask::default()
            },
        )
        .await
        .expect("task");
    assert_eq!(write_spec.xp_value, 25);
    assert_eq!(write_spec.status, TaskStatus::Todo);

    let launch = core.get_project(&user_id, &project_id).await.expect("project");
    assert_eq!((launch.task_count, launch.completed_task_count), (1, 0));

    let before = core.current_user(&user_id).await.expect("user");
    let done = core.complete_task(&user_id, &write_spec.id).await.expect("complete");
    assert_eq!(done.status, TaskStatus::Completed);
    assert!(done.completed_at.is_some());

    let launch = core.get_project(&user_id, &project_id).await.expect("project");
    assert_eq!((launch.task_count, launch.completed_task_count), (1, 1));
    assert_eq!(launch.xp_earned, 25);

    let after = core.current_user(&user_id).await.expect("user");
    assert_eq!(after.total_xp, before.total_xp + 25);
    assert_eq!((after.level, after.xp), (1, 25));
    assert_eq!(after.streak, 1);

    let progress = core.level_progress(&user_id).await.expect("progress");
    assert_eq!(progress.next_level_at, Some(500));
    assert_eq!(progress.xp_to_next_level, Some(475));

    core.verify_aggregates(&user_id).await.expect("consistent");
}

#[tokio::test]
async fn completing_twice_changes_nothing() {
    let (core, user_id) = core_with_user("ada@example.com").await;
    let folder_id = folder(&core, &user_id, "Work").await;
    let project_id = project(&core, &user_id, &folder_id, "Launch").await;
    let task_id = task(&core, &user_id, &project_id, "Ship", 40).await;

    let first = core.complete_task(&user_id, &task_id).await.expect("first");
    let project_after_first = core.get_project(&user_id, &project_id).await.expect("project");
    let user_after_first = core.current_user(&user_id).await.expect("user");

    let second = core.complete_task(&user_id, &task_id).await.expect("second");
    let via_patch = core
        .update(EntityKind::Task, &user_id, &task_id, serde_json::json!({"status": "completed"}))
        .await
        .expect("patch");

    assert_eq!(second, first);
    assert_eq!(via_patch.id(), task_id);
    assert_eq!(core.get_project(&user_id, &project_id).await.expect("project").completed_task_count, 1);
    assert_eq!(
        core.get_project(&user_id, &project_id).await.expect("project").xp_earned,
        project_after_first.xp_earned
    );
    assert_eq!(core.current_user(&user_id).await.expect("user").total_xp, user_after_first.total_xp);
}

#[tokio::test]
async fn deleting_a_project_cascades_bottom_up() {
    let (core, user_id) = core_with_user("ada@example.com").await;
    let folder_id = folder(&core, &user_id, "Work").await;
    let keep_id = project(&core, &user_id, &folder_id, "Keep").await;
    let doomed_id = project(&core, &user_id, &folder_id, "Doomed").await;

    let mut task_ids = Vec::new();
    for title in ["one", "two", "three"] {
        task_ids.push(task(&core, &user_id, &doomed_id, title, 10).await);
    }
    core.complete_task(&user_id, &task_ids[0]).await.expect("complete");
    core.complete_task(&user_id, &task_ids[1]).await.expect("complete");

    for task_id in &task_ids {
        core.start_session(
            &user_id,
            NewPomodoroSession {
                task_id: Some(task_id.clone()),
                project_id: None,
                duration: 25,
                session_type: SessionType::Work,
            },
        )
        .await
        .expect("session");
    }
    core.start_session(
        &user_id,
        NewPomodoroSession {
            task_id: None,
            project_id: Some(doomed_id.clone()),
            duration: 5,
            session_type: SessionType::ShortBreak,
        },
    )
    .await
    .expect("project session");

    let start = Utc::now();
    let sprint = core
        .create_sprint(
            &user_id,
            NewSprint {
                name: "Sprint".to_string(),
                description: None,
                start_date: start,
                end_date: start + Duration::days(14),
                goal_xp: Some(100),
            },
        )
        .await
        .expect("sprint");
    core.add_task_to_sprint(&user_id, &sprint.id, &task_ids[0]).await.expect("link");
    core.add_task_to_sprint(&user_id, &sprint.id, &task_ids[2]).await.expect("link");
    assert_eq!(core.get_sprint(&user_id, &sprint.id).await.expect("sprint").earned_xp, 10);

    let xp_before = core.current_user(&user_id).await.expect("user").total_xp;
    let outcome = core.delete(EntityKind::Project, &user_id, &doomed_id).await.expect("delete");
    assert_eq!(outcome.removed.tasks, 3);
    assert_eq!(outcome.removed.sessions, 4);
    assert_eq!(outcome.removed.sprint_links, 2);

    assert_eq!(core.get_folder(&user_id, &folder_id).await.expect("folder").project_count, 1);
    assert_eq!(core.get_sprint(&user_id, &sprint.id).await.expect("sprint").earned_xp, 0);
    assert!(core.sprint_tasks(&user_id, &sprint.id).await.expect("links").is_empty());
    assert!(core.list(EntityKind::Task, &user_id, None).await.expect("tasks").is_empty());
    assert!(core
        .list(EntityKind::PomodoroSession, &user_id, None)
        .await
        .expect("sessions")
        .is_empty());
    for task_id in &task_ids {
        let error = core.get_task(&user_id, task_id).await.expect_err("gone");
        assert!(matches!(error, AppError::NotFound(_)));
    }
    assert!(core.get_project(&user_id, &keep_id).await.is_ok());

    // Earned XP is never revoked by deleting its source.
    assert_eq!(core.current_user(&user_id).await.expect("user").total_xp, xp_before);
    core.verify_aggregates(&user_id).await.expect("consistent");
}

#[tokio::test]
async fn deleting_a_folder_removes_every_descendant() {
    let (core, user_id) = core_with_user("ada@example.com").await;
    let folder_id = folder(&core, &user_id, "Home").await;
    let first = project(&core, &user_id, &folder_id, "Garden").await;
    let second = project(&core, &user_id, &folder_id, "Garage").await;
    task(&core, &user_id, &first, "Weed", 5).await;
    task(&core, &user_id, &second, "Sweep", 5).await;
    task(&core, &user_id, &second, "Paint", 5).await;

    let outcome = core.delete(EntityKind::Folder, &user_id, &folder_id).await.expect("delete");
    assert_eq!(outcome.removed.projects, 2);
    assert_eq!(outcome.removed.tasks, 3);
    assert!(core.list(EntityKind::Project, &user_id, None).await.expect("projects").is_empty());
    core.verify_aggregates(&user_id).await.expect("consistent");
}

#[tokio::test]
async fn other_users_rows_read_as_missing() {
    let (core, owner) = core_with_user("owner@example.com").await;
    let intruder = register(&core, "intruder@example.com").await;
    let folder_id = folder(&core, &owner, "Private").await;
    let project_id = project(&core, &owner, &folder_id, "Secret").await;
    let task_id = task(&core, &owner, &project_id, "Hidden", 25).await;

    let foreign = core.get(EntityKind::Task, &intruder, &task_id).await.expect_err("foreign");
    let missing = core.get(EntityKind::Task, &intruder, "no-such-task").await.expect_err("missing");
    assert!(matches!(foreign, AppError::NotFound(_)));
    assert!(matches!(missing, AppError::NotFound(_)));

    assert!(matches!(
        core.complete_task(&intruder, &task_id).await,
        Err(AppError::NotFound(_))
    ));
    assert!(matches!(
        core.update(EntityKind::Project, &intruder, &project_id, serde_json::json!({"name": "Mine"}))
            .await,
        Err(AppError::NotFound(_))
    ));
    assert!(matches!(
        core.delete(EntityKind::Folder, &intruder, &folder_id).await,
        Err(AppError::NotFound(_))
    ));
    assert!(matches!(
        core.list(EntityKind::Task, &intruder, Some(ParentRef::Project(project_id.clone())))
            .await,
        Err(AppError::NotFound(_))
    ));

    // Referencing someone else's parent in a request body is a validation failure.
    let error = core
        .create_task(
            &intruder,
            NewTask {
                project_id: project_id.clone(),
                title: "Plant".to_string(),
                ..NewTask::default()
            },
        )
        .await
        .expect_err("foreign parent");
    assert!(matches!(error, AppError::Validation(_)), "{error}");

    let start = Utc::now();
    let sprint = core
        .create_sprint(
            &intruder,
            NewSprint {
                name: "Heist".to_string(),
                description: None,
                start_date: start,
                end_date: start + Duration::days(1),
                goal_xp: None,
            },
        )
        .await
        .expect("sprint");
    let error = core
        .add_task_to_sprint(&intruder, &sprint.id, &task_id)
        .await
        .expect_err("foreign task");
    assert!(matches!(error, AppError::Validation(_)));

    let untouched = core.get_task(&owner, &task_id).await.expect("owner view");
    assert_eq!(untouched.status, TaskStatus::Todo);
    assert!(core.list(EntityKind::Task, &intruder, None).await.expect("list").is_empty());
}

#[tokio::test]
async fn sprint_earned_xp_follows_linked_completions() {
    let (core, user_id) = core_with_user("ada@example.com").await;
    let folder_id = folder(&core, &user_id, "Work").await;
    let project_id = project(&core, &user_id, &folder_id, "Launch").await;
    let first = task(&core, &user_id, &project_id, "First", 30).await;
    let second = task(&core, &user_id, &project_id, "Second", 20).await;

    let start = Utc::now();
    let sprint = core
        .create_sprint(
            &user_id,
            NewSprint {
                name: "Week".to_string(),
                description: None,
                start_date: start,
                end_date: start + Duration::days(7),
                goal_xp: Some(100),
            },
        )
        .await
        .expect("sprint");
    assert_eq!(sprint.status, SprintStatus::Planned);
    core.add_task_to_sprint(&user_id, &sprint.id, &first).await.expect("link");
    core.add_task_to_sprint(&user_id, &sprint.id, &second).await.expect("link");
    let duplicate = core.add_task_to_sprint(&user_id, &sprint.id, &first).await.expect_err("dup");
    assert!(matches!(duplicate, AppError::Conflict(_)));

    core.complete_task(&user_id, &first).await.expect("complete");
    assert_eq!(earned_xp(&core, &user_id, &sprint.id).await, 30);
    core.complete_task(&user_id, &second).await.expect("complete");
    assert_eq!(earned_xp(&core, &user_id, &sprint.id).await, 50);

    core.update_task(
        &user_id,
        &second,
        TaskPatch {
            xp_value: Some(40),
            ..TaskPatch::default()
        },
    )
    .await
    .expect("revalue");
    assert_eq!(earned_xp(&core, &user_id, &sprint.id).await, 70);

    core.update_task(
        &user_id,
        &first,
        TaskPatch {
            status: Some(TaskStatus::Todo),
            ..TaskPatch::default()
        },
    )
    .await
    .expect("reopen");
    assert_eq!(earned_xp(&core, &user_id, &sprint.id).await, 40);
    // The user ledger only ever grows.
    assert_eq!(core.current_user(&user_id).await.expect("user").total_xp, 50);

    core.remove_task_from_sprint(&user_id, &sprint.id, &second).await.expect("unlink");
    assert_eq!(earned_xp(&core, &user_id, &sprint.id).await, 0);

    core.update_sprint(
        &user_id,
        &sprint.id,
        SprintPatch {
            status: Some(SprintStatus::Completed),
            ..SprintPatch::default()
        },
    )
    .await
    .expect("close");
    core.complete_task(&user_id, &first).await.expect("complete again");
    assert_eq!(earned_xp(&core, &user_id, &sprint.id).await, 0, "closed sprint keeps its score");
    core.verify_aggregates(&user_id).await.expect("frozen sprint is consistent");

    core.update_sprint(
        &user_id,
        &sprint.id,
        SprintPatch {
            status: Some(SprintStatus::Active),
            ..SprintPatch::default()
        },
    )
    .await
    .expect("reopen sprint");
    assert_eq!(earned_xp(&core, &user_id, &sprint.id).await, 30);

    let stats = core.sprint_stats(&user_id, &sprint.id).await.expect("stats");
    assert_eq!(stats.total_tasks, 1);
    assert_eq!(stats.completed_tasks, 1);
    assert!((stats.progress_percentage - 30.0).abs() < 1e-9);
    assert_eq!(stats.days_remaining, 7);
    core.verify_aggregates(&user_id).await.expect("consistent");
}

async fn closed_sprint(core: &LifeQuestCore, user_id: &str, task_ids: &[&str]) -> String {
    let start = Utc::now();
    let sprint_id = core
        .create_sprint(
            user_id,
            NewSprint {
                name: "Closed".to_string(),
                description: None,
                start_date: start,
                end_date: start + Duration::days(7),
                goal_xp: Some(100),
            },
        )
        .await
        .expect("sprint")
        .id;
    for task_id in task_ids {
        core.add_task_to_sprint(user_id, &sprint_id, task_id).await.expect("link");
        core.complete_task(user_id, task_id).await.expect("complete");
    }
    core.update_sprint(
        user_id,
        &sprint_id,
        SprintPatch {
            status: Some(SprintStatus::Completed),
            ..SprintPatch::default()
        },
    )
    .await
    .expect("close");
    sprint_id
}

#[tokio::test]
async fn closed_sprint_gives_back_xp_whose_task_no_longer_counts() {
    let (core, user_id) = core_with_user("ada@example.com").await;
    let folder_id = folder(&core, &user_id, "Work").await;
    let project_id = project(&core, &user_id, &folder_id, "Launch").await;
    let deleted = task(&core, &user_id, &project_id, "Deleted", 25).await;
    let reopened = task(&core, &user_id, &project_id, "Reopened", 10).await;
    let unlinked = task(&core, &user_id, &project_id, "Unlinked", 5).await;
    let sprint_id = closed_sprint(&core, &user_id, &[&deleted, &reopened, &unlinked]).await;
    assert_eq!(earned_xp(&core, &user_id, &sprint_id).await, 40);

    core.delete(EntityKind::Task, &user_id, &deleted).await.expect("delete");
    assert_eq!(earned_xp(&core, &user_id, &sprint_id).await, 15);

    core.update_task(
        &user_id,
        &reopened,
        TaskPatch {
            status: Some(TaskStatus::Todo),
            ..TaskPatch::default()
        },
    )
    .await
    .expect("reopen");
    assert_eq!(earned_xp(&core, &user_id, &sprint_id).await, 5);

    // Completing again while the sprint is closed earns the sprint nothing, and a later
    // reopen must not take back XP it never credited.
    core.complete_task(&user_id, &reopened).await.expect("complete again");
    assert_eq!(earned_xp(&core, &user_id, &sprint_id).await, 5);
    core.update_task(
        &user_id,
        &reopened,
        TaskPatch {
            status: Some(TaskStatus::InProgress),
            ..TaskPatch::default()
        },
    )
    .await
    .expect("reopen again");
    assert_eq!(earned_xp(&core, &user_id, &sprint_id).await, 5);

    core.remove_task_from_sprint(&user_id, &sprint_id, &unlinked).await.expect("unlink");
    assert_eq!(earned_xp(&core, &user_id, &sprint_id).await, 0);
    core.verify_aggregates(&user_id).await.expect("consistent");

    // The user ledger keeps everything that was awarded.
    assert_eq!(core.current_user(&user_id).await.expect("user").total_xp, 40);
}

#[tokio::test]
async fn moving_tasks_and_projects_transfers_counters() {
    let (core, user_id) = core_with_user("ada@example.com").await;
    let home = folder(&core, &user_id, "Home").await;
    let work = folder(&core, &user_id, "Work").await;
    let from = project(&core, &user_id, &home, "From").await;
    let to = project(&core, &user_id, &work, "To").await;
    let task_id = task(&core, &user_id, &from, "Move me", 15).await;
    core.complete_task(&user_id, &task_id).await.expect("complete");
    let session = core
        .start_session(
            &user_id,
            NewPomodoroSession {
                task_id: Some(task_id.clone()),
                project_id: None,
                duration: 25,
                session_type: SessionType::Work,
            },
        )
        .await
        .expect("session");

    core.update(EntityKind::Task, &user_id, &task_id, serde_json::json!({"projectId": to}))
        .await
        .expect("move task");
    let from_project = core.get_project(&user_id, &from).await.expect("from");
    let to_project = core.get_project(&user_id, &to).await.expect("to");
    assert_eq!((from_project.task_count, from_project.completed_task_count), (0, 0));
    assert_eq!((to_project.task_count, to_project.completed_task_count), (1, 1));
    assert_eq!(from_project.xp_earned, 15, "project XP is a ledger");
    assert_eq!(
        core.get_session(&user_id, &session.id).await.expect("session").project_id.as_deref(),
        Some(to.as_str())
    );

    core.update(EntityKind::Project, &user_id, &to, serde_json::json!({"folderId": home}))
        .await
        .expect("move project");
    assert_eq!(core.get_folder(&user_id, &home).await.expect("home").project_count, 2);
    assert_eq!(core.get_folder(&user_id, &work).await.expect("work").project_count, 0);

    let listed = core
        .list(EntityKind::Project, &user_id, Some(ParentRef::Folder(home.clone())))
        .await
        .expect("list");
    assert_eq!(listed.len(), 2);
    core.verify_aggregates(&user_id).await.expect("consistent");
}

#[tokio::test]
async fn patches_cannot_touch_engine_owned_fields() {
    let (core, user_id) = core_with_user("ada@example.com").await;
    let folder_id = folder(&core, &user_id, "Work").await;
    let project_id = project(&core, &user_id, &folder_id, "Launch").await;
    let task_id = task(&core, &user_id, &project_id, "Ship", 25).await;

    for (kind, id, patch) in [
        (EntityKind::Folder, folder_id.as_str(), serde_json::json!({"projectCount": 9})),
        (EntityKind::Project, project_id.as_str(), serde_json::json!({"completedTaskCount": 1})),
        (EntityKind::Project, project_id.as_str(), serde_json::json!({"userId": "someone"})),
        (EntityKind::Task, task_id.as_str(), serde_json::json!({"completedAt": "2026-01-01T00:00:00Z"})),
        (EntityKind::Task, task_id.as_str(), serde_json::json!({"id": "new-id"})),
        (EntityKind::Task, task_id.as_str(), serde_json::json!({"xpValue": -5})),
        (EntityKind::Task, task_id.as_str(), serde_json::json!({"title": "  "})),
    ] {
        let error = core.update(kind, &user_id, id, patch.clone()).await.expect_err("rejected");
        assert!(matches!(error, AppError::Validation(_)), "{patch}: {error}");
    }
    core.verify_aggregates(&user_id).await.expect("nothing changed");
}

#[tokio::test]
async fn pomodoro_sessions_award_xp_and_feed_daily_stats() {
    let (core, user_id) = core_with_user("ada@example.com").await;
    let folder_id = folder(&core, &user_id, "Work").await;
    let project_id = project(&core, &user_id, &folder_id, "Launch").await;
    let task_id = task(&core, &user_id, &project_id, "Focus", 25).await;

    let work = core
        .start_session(
            &user_id,
            NewPomodoroSession {
                task_id: Some(task_id.clone()),
                project_id: Some(project_id.clone()),
                duration: 25,
                session_type: SessionType::Work,
            },
        )
        .await
        .expect("work");
    let rest = core
        .start_session(
            &user_id,
            NewPomodoroSession {
                task_id: None,
                project_id: None,
                duration: 5,
                session_type: SessionType::ShortBreak,
            },
        )
        .await
        .expect("break");
    let abandoned = core
        .start_session(
            &user_id,
            NewPomodoroSession {
                task_id: None,
                project_id: None,
                duration: 25,
                session_type: SessionType::Work,
            },
        )
        .await
        .expect("abandoned");

    let paused = core
        .update(EntityKind::PomodoroSession, &user_id, &work.id, serde_json::json!({"status": "paused"}))
        .await
        .expect("pause");
    assert_eq!(paused.id(), work.id);

    let done = core.complete_session(&user_id, &work.id).await.expect("complete");
    assert_eq!(done.xp_earned, 25);
    core.complete_session(&user_id, &rest.id).await.expect("complete break");
    core.update(EntityKind::PomodoroSession, &user_id, &abandoned.id, serde_json::json!({"status": "cancelled"}))
        .await
        .expect("cancel");
    let error = core.complete_session(&user_id, &abandoned.id).await.expect_err("cancelled");
    assert!(matches!(error, AppError::Validation(_)));

    assert_eq!(core.get_task(&user_id, &task_id).await.expect("task").actual_pomodoros, 1);
    let user = core.current_user(&user_id).await.expect("user");
    assert_eq!(user.total_xp, 25);
    assert_eq!(user.streak, 1);

    let stats = core
        .pomodoro_stats(&user_id, done.end_time.expect("ended").date_naive())
        .await
        .expect("stats");
    assert_eq!(stats.completed_sessions, 2);
    assert_eq!(stats.work_minutes, 25);
    assert_eq!(stats.break_minutes, 5);
    assert_eq!(stats.xp_earned, 25);

    let by_task = core
        .list(EntityKind::PomodoroSession, &user_id, Some(ParentRef::Task(task_id.clone())))
        .await
        .expect("by task");
    assert_eq!(by_task.len(), 1);
}

#[tokio::test]
async fn total_xp_and_level_never_decrease() {
    let (core, user_id) = core_with_user("ada@example.com").await;
    let folder_id = folder(&core, &user_id, "Grind").await;
    let project_id = project(&core, &user_id, &folder_id, "Levels").await;

    let mut last = core.current_user(&user_id).await.expect("user");
    for round in 0..6 {
        let task_id = task(&core, &user_id, &project_id, &format!("round {round}"), 200).await;
        core.complete_task(&user_id, &task_id).await.expect("complete");
        if round % 2 == 0 {
            core.update_task(
                &user_id,
                &task_id,
                TaskPatch {
                    status: Some(TaskStatus::InProgress),
                    ..TaskPatch::default()
                },
            )
            .await
            .expect("reopen");
        } else {
            core.delete(EntityKind::Task, &user_id, &task_id).await.expect("delete");
        }

        let user = core.current_user(&user_id).await.expect("user");
        assert!(user.total_xp >= last.total_xp);
        assert!(user.level >= last.level);
        last = user;
    }
    assert_eq!(last.total_xp, 1_200);
    assert_eq!((last.level, last.xp), (3, 200));
    core.verify_aggregates(&user_id).await.expect("consistent");
}
