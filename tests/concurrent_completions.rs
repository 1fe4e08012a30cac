use lifequest_lib::models::{NewFolder, NewProject, NewTask, NewUser};
use lifequest_lib::{CoreConfig, LifeQuestCore};
use std::sync::Arc;

async fn seeded_core(dir: &tempfile::TempDir, tasks: usize) -> (Arc<LifeQuestCore>, String, String, Vec<String>) {
    let core = Arc::new(LifeQuestCore::open(&dir.path().join("lifequest.sqlite"), &CoreConfig::default()).expect("core"));
    let user_id = core
        .create_user(NewUser {
            email: "race@example.com".to_string(),
            first_name: "Race".to_string(),
            last_name: "Condition".to_string(),
        })
        .await
        .expect("user")
        .id;
    let folder_id = core
        .create_folder(
            &user_id,
            NewFolder {
                name: "Busy".to_string(),
                ..NewFolder::default()
            },
        )
        .await
        .expect("folder")
        .id;
    let project_id = core
        .create_project(
            &user_id,
            NewProject {
                folder_id,
                name: "Hot".to_string(),
                ..NewProject::default()
            },
        )
        .await
        .expect("project")
        .id;

    let mut task_ids = Vec::with_capacity(tasks);
    for index in 0..tasks {
        task_ids.push(
            core.create_task(
                &user_id,
                NewTask {
                    project_id: project_id.clone(),
                    title: format!("task {index}"),
                    ..NewTask::default()
                },
            )
            .await
            .expect("task")
            .id,
        );
    }
    (core, user_id, project_id, task_ids)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn parallel_completions_on_one_project_lose_no_updates() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (core, user_id, project_id, task_ids) = seeded_core(&dir, 24).await;

    let mut handles = Vec::new();
    for task_id in task_ids.clone() {
        let core = Arc::clone(&core);
        let user_id = user_id.clone();
        handles.push(tokio::spawn(async move { core.complete_task(&user_id, &task_id).await }));
    }
    for handle in handles {
        handle.await.expect("join").expect("complete");
    }

    let project = core.get_project(&user_id, &project_id).await.expect("project");
    assert_eq!(project.task_count, 24);
    assert_eq!(project.completed_task_count, 24);
    assert_eq!(project.xp_earned, 24 * 25);
    assert_eq!(core.current_user(&user_id).await.expect("user").total_xp, 24 * 25);
    core.verify_aggregates(&user_id).await.expect("consistent");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_completions_of_one_task_credit_once() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (core, user_id, project_id, task_ids) = seeded_core(&dir, 1).await;
    let task_id = task_ids[0].clone();

    let mut handles = Vec::new();
    for _ in 0..10 {
        let core = Arc::clone(&core);
        let user_id = user_id.clone();
        let task_id = task_id.clone();
        handles.push(tokio::spawn(async move { core.complete_task(&user_id, &task_id).await }));
    }
    for handle in handles {
        handle.await.expect("join").expect("complete");
    }

    let project = core.get_project(&user_id, &project_id).await.expect("project");
    assert_eq!(project.completed_task_count, 1);
    assert_eq!(project.xp_earned, 25);
    assert_eq!(core.current_user(&user_id).await.expect("user").total_xp, 25);
}

#[tokio::test]
async fn store_survives_reopen_with_counters_intact() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (core, user_id, project_id, task_ids) = seeded_core(&dir, 3).await;
    core.complete_task(&user_id, &task_ids[1]).await.expect("complete");
    let path = core.database_path().expect("on disk").to_path_buf();
    drop(core);

    let reopened = LifeQuestCore::open(&path, &CoreConfig::default()).expect("reopen");
    let project = reopened.get_project(&user_id, &project_id).await.expect("project");
    assert_eq!((project.task_count, project.completed_task_count), (3, 1));
    reopened.verify_aggregates(&user_id).await.expect("consistent");
}
