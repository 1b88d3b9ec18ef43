
use std::sync::Arc;

use grid_render::batch::{queue_commands, write_submission_script};
use grid_render::config::JobConfig;
use grid_render::scheduler::{NoHooks, OutputFileHooks, Scheduler, TaskArtifacts, TaskManager};
use test_harness::{backend, manager, CountingHooks, FakeCluster};

const COMMANDS: &str = "\
# demo batch
./task.sh 0

   ./task.sh 1
#./task.sh 2
./task.sh 3
";

#[tokio::test]
async fn test_queue_commands_numbers_log_files() {
    let dir = tempfile::tempdir().unwrap();
    let cluster = Arc::new(FakeCluster::new());
    let mut manager = manager(&cluster, Arc::new(NoHooks));

    let queued = queue_commands(&mut manager, COMMANDS, Some(dir.path()));

    assert_eq!(queued, 3);
    let commands: Vec<_> = manager
        .tasks()
        .iter()
        .map(|t| t.config.command.as_str())
        .collect();
    assert_eq!(commands, vec!["./task.sh 0", "./task.sh 1", "./task.sh 3"]);

    let last = &manager.tasks()[2];
    assert_eq!(last.config.stdout, Some(dir.path().join("2.out")));
    assert_eq!(last.config.stderr, Some(dir.path().join("2.err")));
    assert_eq!(last.descriptor_path(), dir.path().join("2_args.sh"));
    assert_eq!(last.config.walltime, "01:00:00");
}

#[tokio::test]
async fn test_queue_commands_without_log_dir() {
    let cluster = Arc::new(FakeCluster::new());
    let mut manager = manager(&cluster, Arc::new(NoHooks));

    assert_eq!(queue_commands(&mut manager, COMMANDS, None), 3);
    for task in manager.tasks() {
        assert!(task.config.stdout.is_none());
        assert!(task.config.stderr.is_none());
        assert!(task.descriptor_path().starts_with(std::env::temp_dir()));
    }
}

#[tokio::test]
async fn test_batch_runs_every_command() {
    let dir = tempfile::tempdir().unwrap();
    let cluster = Arc::new(FakeCluster::new());
    let hooks = Arc::new(CountingHooks::default());
    let mut manager = manager(&cluster, hooks.clone());
    queue_commands(&mut manager, COMMANDS, Some(dir.path()));

    let mut scheduler = Scheduler::new(manager, 2);
    let mut ticks = 0;
    while !scheduler.is_finished() {
        scheduler.update().await.unwrap();
        cluster.complete_all();
        ticks += 1;
        assert!(ticks < 10);
    }

    assert_eq!(hooks.completed(), 3);
    assert_eq!(cluster.submit_calls(), 3);
}

#[tokio::test]
async fn test_dry_run_writes_script_without_submitting() {
    let dir = tempfile::tempdir().unwrap();
    let cluster = Arc::new(FakeCluster::new());
    let mut manager = TaskManager::new(
        JobConfig::default()
            .with_walltime("02:00:00")
            .with_property("lucky"),
        backend(&cluster),
        Arc::new(OutputFileHooks),
    );
    queue_commands(&mut manager, COMMANDS, Some(dir.path()));
    let script = dir.path().join("submit.sh");

    let descriptors = write_submission_script(&manager, &script).await.unwrap();

    assert_eq!(cluster.submit_calls(), 0);
    assert_eq!(
        descriptors,
        vec![
            dir.path().join("0_args.sh"),
            dir.path().join("1_args.sh"),
            dir.path().join("2_args.sh"),
        ]
    );
    assert_eq!(
        std::fs::read_to_string(&script).unwrap(),
        format!(
            "#!/bin/sh\noarsub -S {}\noarsub -S {}\noarsub -S {}\n",
            descriptors[0].display(),
            descriptors[1].display(),
            descriptors[2].display()
        )
    );

    let descriptor = std::fs::read_to_string(&descriptors[1]).unwrap();
    assert!(descriptor.contains("#OAR -l /nodes=1/core=1,walltime=02:00:00\n"));
    assert!(descriptor.contains("#OAR -p cluster='lucky'\n"));
    assert!(descriptor.ends_with("./task.sh 1\n"));

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        for path in [&script, &descriptors[0]] {
            let mode = std::fs::metadata(path).unwrap().permissions().mode();
            assert_ne!(mode & 0o100, 0, "{} must be executable", path.display());
        }
    }

    // Tasks stay pending so a later real run would still submit them
    assert_eq!(manager.stats().not_submitted, 3);
}

#[tokio::test]
async fn test_dry_run_leaves_out_finished_outputs() {
    let dir = tempfile::tempdir().unwrap();
    let cluster = Arc::new(FakeCluster::new());
    let mut manager = manager(&cluster, Arc::new(OutputFileHooks));

    let done = dir.path().join("done.png");
    std::fs::write(&done, b"png").unwrap();
    manager.create_task(
        Some(format!("render -o {} s.xml", dir.path().join("done").display())),
        None,
        None,
        TaskArtifacts::expecting(&done),
    );
    manager.create_task(
        Some(format!("render -o {} s.xml", dir.path().join("todo").display())),
        None,
        None,
        TaskArtifacts::expecting(dir.path().join("todo.png")),
    );

    let script = dir.path().join("submit.sh");
    let descriptors = write_submission_script(&manager, &script).await.unwrap();

    assert_eq!(descriptors, vec![dir.path().join("todo_args.sh")]);
    assert!(!dir.path().join("done_args.sh").exists());
}
