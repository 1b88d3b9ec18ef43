
use std::path::Path;
use std::sync::Arc;

use grid_render::error::GridError;
use grid_render::scheduler::{Scheduler, TaskFeed};
use grid_render::tiling::{CopyCamera, ImageJob, SequenceFeed};
use test_harness::{manager, CountingHooks, FakeCluster};

fn write_cameras(dir: &Path, frames: std::ops::Range<u32>) {
    for frame in frames {
        std::fs::write(
            dir.join(format!("cam{frame:05}.xml")),
            format!("<scene><sensor frame=\"{frame}\"/></scene>"),
        )
        .unwrap();
    }
}

fn feed(root: &Path, begin: u32, end: u32, step: u32) -> SequenceFeed {
    SequenceFeed {
        camera_dir: root.join("cameras"),
        camera_name: "cam".to_string(),
        current: begin,
        end,
        step,
        output_root: root.join("frames"),
        image: ImageJob::new(64, 64, "unused.xml", root, "mitsuba").with_subblock(32),
        scenes: Box::new(CopyCamera {
            scene_dir: root.join("scenes"),
        }),
    }
}

fn setup(frames: std::ops::Range<u32>) -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    for sub in ["cameras", "scenes", "frames"] {
        std::fs::create_dir(dir.path().join(sub)).unwrap();
    }
    write_cameras(&dir.path().join("cameras"), frames);
    dir
}

#[test]
fn test_camera_file_naming() {
    let feed = feed(Path::new("/anim"), 0, 10, 1);
    assert_eq!(feed.camera_file(7), Path::new("/anim/cameras/cam00007.xml"));
    assert_eq!(feed.frame_output_dir(7), Path::new("/anim/frames/7"));
}

#[tokio::test]
async fn test_produce_next_queues_one_frame() {
    let dir = setup(0..2);
    let cluster = Arc::new(FakeCluster::new());
    let mut manager = manager(&cluster, Arc::new(CountingHooks::default()));
    let mut feed = feed(dir.path(), 0, 2, 1);

    feed.produce_next(&mut manager).await.unwrap();

    assert_eq!(manager.len(), 4);
    assert_eq!(feed.current, 1);
    assert!(!feed.is_exhausted());
    assert!(dir.path().join("scenes/temp_0.xml").is_file());
    assert!(dir.path().join("frames/0").is_dir());

    let command = &manager.tasks()[0].config.command;
    assert!(command.ends_with(&format!("{}", dir.path().join("scenes/temp_0.xml").display())));
    assert!(command.contains(&format!("-o {}", dir.path().join("frames/0/0_0").display())));

    feed.produce_next(&mut manager).await.unwrap();
    assert_eq!(manager.len(), 8);
    assert!(feed.is_exhausted());
}

#[tokio::test]
async fn test_step_skips_frames() {
    let dir = setup(0..6);
    let cluster = Arc::new(FakeCluster::new());
    let mut manager = manager(&cluster, Arc::new(CountingHooks::default()));
    let mut feed = feed(dir.path(), 1, 6, 2);

    while !feed.is_exhausted() {
        feed.produce_next(&mut manager).await.unwrap();
    }

    assert_eq!(manager.len(), 12);
    for frame in [1, 3, 5] {
        assert!(dir.path().join(format!("frames/{frame}")).is_dir());
    }
    assert!(!dir.path().join("frames/2").exists());
}

#[tokio::test]
async fn test_empty_range_is_exhausted() {
    let dir = setup(0..0);
    let mut scheduler = Scheduler::with_feed(
        manager(&Arc::new(FakeCluster::new()), Arc::new(CountingHooks::default())),
        6,
        Box::new(feed(dir.path(), 4, 4, 1)),
    );
    assert!(scheduler.is_finished());
    scheduler.update().await.unwrap();
    assert!(scheduler.manager().is_empty());
}

#[tokio::test]
async fn test_scheduler_refills_from_frames() {
    let dir = setup(0..3);
    let cluster = Arc::new(FakeCluster::new());
    let hooks = Arc::new(CountingHooks::default());
    let manager = manager(&cluster, hooks.clone());
    let mut scheduler = Scheduler::with_feed(manager, 6, Box::new(feed(dir.path(), 0, 3, 1)));

    // Two frames are needed to reach the quota
    let report = scheduler.update().await.unwrap();
    assert_eq!(report.requested, 6);
    assert_eq!(report.submitted, 6);
    assert_eq!(scheduler.manager().len(), 8);
    assert!(!scheduler.is_finished());

    cluster.complete_all();
    let report = scheduler.update().await.unwrap();
    assert_eq!(report.finished, 6);
    // The leftover tiles of frame 1 plus all of frame 2
    assert_eq!(scheduler.manager().len(), 6);
    assert_eq!(report.submitted, 6);

    cluster.complete_all();
    let report = scheduler.update().await.unwrap();
    assert_eq!(report.finished, 6);
    assert!(scheduler.is_finished());

    assert_eq!(hooks.completed(), 12);
    assert_eq!(cluster.submit_calls(), 12);
}

#[tokio::test]
async fn test_missing_camera_fails_the_tick() {
    let dir = setup(0..1);
    let cluster = Arc::new(FakeCluster::new());
    let manager = manager(&cluster, Arc::new(CountingHooks::default()));
    let mut scheduler = Scheduler::with_feed(manager, 10, Box::new(feed(dir.path(), 0, 2, 1)));

    let err = scheduler.update().await.unwrap_err();
    assert!(matches!(err, GridError::Scene { .. }));
    // Frame 0 was queued before frame 1 failed, nothing was submitted
    assert_eq!(scheduler.manager().len(), 4);
    assert_eq!(cluster.submit_calls(), 0);
}

#[tokio::test]
async fn test_end_frame_is_never_queued() {
    // A camera file exists for frame 2, but the range stops before it
    let dir = setup(0..3);
    let cluster = Arc::new(FakeCluster::new());
    let manager = manager(&cluster, Arc::new(CountingHooks::default()));
    let mut scheduler = Scheduler::with_feed(manager, 100, Box::new(feed(dir.path(), 0, 2, 1)));

    scheduler.update().await.unwrap();
    scheduler.update().await.unwrap();

    assert_eq!(scheduler.manager().len(), 8);
    assert!(dir.path().join("frames/1").is_dir());
    assert!(!dir.path().join("frames/2").exists());
    assert!(!dir.path().join("scenes/temp_2.xml").exists());
}
