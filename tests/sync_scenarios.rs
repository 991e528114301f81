mod common;

use chrono::{TimeZone, Utc};
use common::{harness, t};
use std::sync::Mutex;
use tracksync_lib::core::progress::INDETERMINATE;
use tracksync_lib::core::{ActionKind, Mapping, NoProgress};
use tracksync_lib::storage::Side;
use tracksync_lib::SyncError;

#[tokio::test]
async fn new_local_file_is_uploaded_and_mapped() {
    let h = harness(vec![]).await;
    h.local.put("a.gpx", "track a", t(1));

    let summary = h.engine.run_sync(&NoProgress).await.unwrap();

    assert_eq!(summary.uploaded, 1);
    assert_eq!(summary.downloaded, 0);
    assert_eq!(summary.up_to_date, 0);
    assert!(summary.failed.is_empty());

    assert_eq!(h.remote.content("a.gpx").as_deref(), Some("track a"));
    let server_time = h.remote.modified("a.gpx").unwrap();
    assert_ne!(server_time, t(1));
    assert_eq!(
        h.mappings().await,
        vec![Mapping::new("a.gpx", t(1), server_time, "a.gpx")]
    );
}

#[tokio::test]
async fn new_remote_file_is_downloaded_into_sub_folder() {
    let h = harness(vec![]).await;
    h.remote.put("2024/june/ride.gpx", "remote ride", t(5));

    let summary = h.engine.run_sync(&NoProgress).await.unwrap();

    assert_eq!(summary.downloaded, 1);
    assert_eq!(
        h.local.content("2024/june/ride.gpx").as_deref(),
        Some("remote ride")
    );
    let mapping = h.mapping("2024/june/ride.gpx").await.unwrap();
    assert_eq!(mapping.remote_modified_time, t(5));
    assert_eq!(
        Some(mapping.local_modified_time),
        h.local.modified("2024/june/ride.gpx")
    );
}

#[tokio::test]
async fn unchanged_pair_touches_no_store() {
    let seed = vec![Mapping::new("a.gpx", t(2), t(3), "a.gpx")];
    let h = harness(seed.clone()).await;
    h.local.put("a.gpx", "same", t(2));
    h.remote.put("a.gpx", "same", t(3));

    let summary = h.engine.run_sync(&NoProgress).await.unwrap();

    assert_eq!(summary.up_to_date, 1);
    assert!(!summary.changed_anything());
    assert!(h.local.ops().is_empty());
    assert!(h.remote.ops().is_empty());
    assert_eq!(h.mappings().await, seed);
}

#[tokio::test]
async fn second_pass_is_a_no_op() {
    let h = harness(vec![]).await;
    h.local.put("a.gpx", "a", t(1));
    h.local.put("2024/b.gpx", "b", t(2));
    h.remote.put("c.gpx", "c", t(3));
    h.local.put("d.gpx", "local d", t(4));
    h.remote.put("d.gpx", "remote d", t(5));

    let first = h.engine.run_sync(&NoProgress).await.unwrap();
    assert!(first.failed.is_empty());
    let after_first = h.mappings().await;
    h.clear_ops();

    let second = h.engine.run_sync(&NoProgress).await.unwrap();

    assert!(!second.changed_anything());
    assert_eq!(second.up_to_date, 5);
    assert!(h.local.ops().is_empty());
    assert!(h.remote.ops().is_empty());
    assert_eq!(h.mappings().await, after_first);
}

#[tokio::test]
async fn collision_keeps_both_versions() {
    let h = harness(vec![]).await;
    h.local.put("2024/ride.gpx", "mine", t(0));
    h.remote.put("2024/ride.gpx", "theirs", t(7));

    let summary = h.engine.run_sync(&NoProgress).await.unwrap();

    let renamed = "2024/ride (2023-11-14-22-13-20).gpx";
    assert_eq!(summary.uploaded, 1);
    assert_eq!(summary.downloaded, 1);
    assert_eq!(h.local.content(renamed).as_deref(), Some("mine"));
    assert_eq!(h.local.content("2024/ride.gpx").as_deref(), Some("theirs"));
    assert_eq!(h.remote.content(renamed).as_deref(), Some("mine"));
    assert_eq!(h.remote.content("2024/ride.gpx").as_deref(), Some("theirs"));
    assert_eq!(h.mappings().await.len(), 2);
}

#[tokio::test]
async fn collision_name_taken_on_remote_is_not_overwritten() {
    let h = harness(vec![]).await;
    h.local.put("ride.gpx", "mine", t(0));
    h.remote.put("ride.gpx", "theirs", t(7));
    h.remote.put("ride (2023-11-14-22-13-20).gpx", "older copy", t(8));

    let summary = h.engine.run_sync(&NoProgress).await.unwrap();

    let renamed = "ride (2023-11-14-22-13-20) (2).gpx";
    assert!(summary.failed.is_empty());
    assert_eq!(summary.uploaded, 1);
    assert_eq!(summary.downloaded, 2);
    assert_eq!(h.local.content(renamed).as_deref(), Some("mine"));
    assert_eq!(h.remote.content(renamed).as_deref(), Some("mine"));
    assert_eq!(
        h.remote.content("ride (2023-11-14-22-13-20).gpx").as_deref(),
        Some("older copy")
    );
    assert_eq!(
        h.local.content("ride (2023-11-14-22-13-20).gpx").as_deref(),
        Some("older copy")
    );
    assert_eq!(h.local.content("ride.gpx").as_deref(), Some("theirs"));
}

#[tokio::test]
async fn failed_collision_rename_skips_the_download() {
    let h = harness(vec![]).await;
    h.local.put("ride.gpx", "mine", t(0));
    h.remote.put("ride.gpx", "theirs", t(7));
    h.local.fail_on("rename", "ride.gpx");

    let summary = h.engine.run_sync(&NoProgress).await.unwrap();

    assert_eq!(summary.failed.len(), 1);
    assert_eq!(summary.failed[0].action, ActionKind::Rename);
    assert_eq!(h.local.content("ride.gpx").as_deref(), Some("mine"));
    assert!(!h.remote.ops().iter().any(|op| op.starts_with("download")));
    assert!(h.mappings().await.is_empty());
}

#[tokio::test]
async fn remote_deletion_propagates_to_unchanged_local() {
    let h = harness(vec![Mapping::new("a.gpx", t(10), t(20), "a.gpx")]).await;
    h.local.put("a.gpx", "a", t(10));

    let summary = h.engine.run_sync(&NoProgress).await.unwrap();

    assert_eq!(summary.deleted_local, 1);
    assert!(h.local.paths().is_empty());
    assert!(h.mappings().await.is_empty());
}

#[tokio::test]
async fn edited_local_survives_remote_deletion() {
    let h = harness(vec![Mapping::new("a.gpx", t(10), t(20), "a.gpx")]).await;
    h.local.put("a.gpx", "edited offline", t(15));

    let summary = h.engine.run_sync(&NoProgress).await.unwrap();

    assert_eq!(summary.deleted_local, 0);
    assert_eq!(summary.uploaded, 1);
    assert_eq!(h.remote.content("a.gpx").as_deref(), Some("edited offline"));
    let mapping = h.mapping("a.gpx").await.unwrap();
    assert_eq!(mapping.local_modified_time, t(15));
    assert_eq!(Some(mapping.remote_modified_time), h.remote.modified("a.gpx"));
}

#[tokio::test]
async fn local_deletion_propagates_to_unchanged_remote() {
    let h = harness(vec![Mapping::new("a.gpx", t(10), t(20), "a.gpx")]).await;
    h.remote.put("a.gpx", "a", t(20));

    let summary = h.engine.run_sync(&NoProgress).await.unwrap();

    assert_eq!(summary.deleted_cloud, 1);
    assert!(h.remote.paths().is_empty());
    assert!(h.mappings().await.is_empty());
}

#[tokio::test]
async fn conflict_copies_the_changed_local_side() {
    let h = harness(vec![Mapping::new("a.gpx", t(10), t(500), "a.gpx")]).await;
    h.local.put("a.gpx", "edited", t(11));
    h.remote.put("a.gpx", "old", t(500));

    let summary = h.engine.run_sync(&NoProgress).await.unwrap();

    assert_eq!(summary.uploaded, 1);
    assert_eq!(summary.downloaded, 0);
    assert_eq!(h.remote.content("a.gpx").as_deref(), Some("edited"));
    assert_eq!(h.local.content("a.gpx").as_deref(), Some("edited"));
    assert!(!h.local.ops().iter().any(|op| op.starts_with("write")));

    let mapping = h.mapping("a.gpx").await.unwrap();
    assert_eq!(mapping.local_modified_time, t(11));
    assert_eq!(Some(mapping.remote_modified_time), h.remote.modified("a.gpx"));
}

#[tokio::test]
async fn conflict_copies_the_changed_remote_side() {
    let h = harness(vec![Mapping::new("a.gpx", t(900), t(20), "a.gpx")]).await;
    h.local.put("a.gpx", "old", t(900));
    h.remote.put("a.gpx", "uploaded elsewhere", t(21));

    let summary = h.engine.run_sync(&NoProgress).await.unwrap();

    assert_eq!(summary.downloaded, 1);
    assert_eq!(h.local.content("a.gpx").as_deref(), Some("uploaded elsewhere"));
    assert!(!h.remote.ops().iter().any(|op| op.starts_with("upload")));
    assert_eq!(
        h.mapping("a.gpx").await.unwrap().remote_modified_time,
        t(21)
    );
}

#[tokio::test]
async fn case_variant_conflict_overwrites_the_local_spelling() {
    let h = harness(vec![Mapping::new("ride.gpx", t(10), t(20), "ride.gpx")]).await;
    h.local.put("Ride.gpx", "old", t(10));
    h.remote.put("ride.gpx", "new remote edit", t(21));

    let summary = h.engine.run_sync(&NoProgress).await.unwrap();

    assert_eq!(summary.downloaded, 1);
    assert_eq!(h.local.paths(), vec!["Ride.gpx"]);
    assert_eq!(h.local.content("Ride.gpx").as_deref(), Some("new remote edit"));

    let again = h.engine.run_sync(&NoProgress).await.unwrap();
    assert_eq!(again.uploaded, 0);
    assert_eq!(again.downloaded, 0);
    assert_eq!(again.up_to_date, 1);
    assert_eq!(h.remote.paths(), vec!["ride.gpx"]);
    assert_eq!(
        h.remote.content("ride.gpx").as_deref(),
        Some("new remote edit")
    );
}

#[tokio::test]
async fn case_variant_conflict_overwrites_the_remote_spelling() {
    let h = harness(vec![Mapping::new("ride.gpx", t(10), t(20), "ride.gpx")]).await;
    h.local.put("Ride.gpx", "edited", t(11));
    h.remote.put("ride.gpx", "old", t(20));

    let summary = h.engine.run_sync(&NoProgress).await.unwrap();

    assert_eq!(summary.uploaded, 1);
    assert_eq!(h.remote.paths(), vec!["ride.gpx"]);
    assert_eq!(h.remote.content("ride.gpx").as_deref(), Some("edited"));
    assert_eq!(h.mapping("ride.gpx").await.unwrap().remote_id, "ride.gpx");

    let again = h.engine.run_sync(&NoProgress).await.unwrap();
    assert_eq!(again.uploaded, 0);
    assert_eq!(again.up_to_date, 1);
}

#[tokio::test]
async fn far_future_mtime_is_synced_like_any_other() {
    let future = Utc.with_ymd_and_hms(2300, 1, 1, 0, 0, 0).unwrap();
    let h = harness(vec![]).await;
    h.local.put("a.gpx", "a", t(1));
    h.local.put("future.gpx", "from the future", future);
    h.local.put("z.gpx", "z", t(3));

    let summary = h.engine.run_sync(&NoProgress).await.unwrap();

    assert!(summary.failed.is_empty());
    assert_eq!(summary.uploaded, 3);
    assert!(h.remote.content("z.gpx").is_some());
    assert_eq!(h.mappings().await.len(), 3);
    assert_eq!(
        h.mapping("future.gpx").await.unwrap().local_modified_time,
        future
    );

    let again = h.engine.run_sync(&NoProgress).await.unwrap();
    assert_eq!(again.uploaded, 0);
    assert_eq!(again.up_to_date, 3);
}

#[tokio::test]
async fn sweep_drops_paths_gone_from_both_sides() {
    let h = harness(vec![
        Mapping::new("gone.gpx", t(1), t(1), "gone.gpx"),
        Mapping::new("kept.gpx", t(2), t(2), "kept.gpx"),
    ])
    .await;
    h.local.put("kept.gpx", "k", t(2));
    h.remote.put("kept.gpx", "k", t(2));

    let summary = h.engine.run_sync(&NoProgress).await.unwrap();

    assert_eq!(summary.up_to_date, 1);
    let paths: Vec<_> = h.mappings().await.into_iter().map(|m| m.path).collect();
    assert_eq!(paths, vec!["kept.gpx"]);
}

#[tokio::test]
async fn failed_file_does_not_stop_the_pass() {
    let h = harness(vec![]).await;
    h.local.put("a.gpx", "a", t(1));
    h.local.put("b.gpx", "b", t(2));
    h.remote.fail_on("upload", "a.gpx");

    let summary = h.engine.run_sync(&NoProgress).await.unwrap();

    assert_eq!(summary.uploaded, 1);
    assert_eq!(summary.failed.len(), 1);
    assert_eq!(summary.failed[0].path, "a.gpx");
    assert_eq!(summary.failed[0].action, ActionKind::Upload);
    assert!(summary.failed[0].error.contains("injected upload failure"));
    // 重试一次后放弃
    let attempts = h
        .remote
        .ops()
        .iter()
        .filter(|op| op.as_str() == "upload a.gpx")
        .count();
    assert_eq!(attempts, 2);

    assert!(h.mapping("a.gpx").await.is_none());
    assert!(h.mapping("b.gpx").await.is_some());
}

#[tokio::test]
async fn failed_file_keeps_its_mapping() {
    let seed = Mapping::new("a.gpx", t(10), t(20), "a.gpx");
    let h = harness(vec![seed.clone()]).await;
    h.local.put("a.gpx", "old", t(10));
    h.remote.put("a.gpx", "new", t(25));
    h.local.fail_on("write", "a.gpx");

    let summary = h.engine.run_sync(&NoProgress).await.unwrap();

    assert_eq!(summary.failed.len(), 1);
    assert_eq!(summary.failed[0].action, ActionKind::Conflict);
    assert_eq!(h.mappings().await, vec![seed]);
    assert_eq!(h.local.content("a.gpx").as_deref(), Some("old"));
}

#[tokio::test]
async fn enumeration_failure_aborts_before_any_change() {
    let seed = Mapping::new("a.gpx", t(10), t(20), "a.gpx");
    let h = harness(vec![seed.clone()]).await;
    h.local.put("a.gpx", "a", t(10));
    h.remote.put("a.gpx", "a", t(20));
    h.remote.fail_enumeration();

    let err = h.engine.run_sync(&NoProgress).await.unwrap_err();

    assert!(matches!(
        err,
        SyncError::Enumeration {
            side: Side::Remote,
            ..
        }
    ));
    assert!(h.local.ops().is_empty());
    assert_eq!(h.local.paths(), vec!["a.gpx"]);
    assert_eq!(h.mappings().await, vec![seed]);
}

#[tokio::test]
async fn local_enumeration_failure_is_fatal() {
    let h = harness(vec![]).await;
    h.remote.put("a.gpx", "a", t(20));
    h.local.fail_enumeration();

    let err = h.engine.run_sync(&NoProgress).await.unwrap_err();

    assert!(matches!(
        err,
        SyncError::Enumeration {
            side: Side::Local,
            ..
        }
    ));
    assert!(h.remote.ops().is_empty());
}

#[tokio::test]
async fn concurrent_pass_is_rejected() {
    let h = harness(vec![]).await;
    h.local.put("a.gpx", "a", t(1));

    let gate = h.remote.listing_gate.lock().await;
    let engine = &h.engine;
    let (first, second) = tokio::join!(engine.run_sync(&NoProgress), async move {
        tokio::task::yield_now().await;
        let result = engine.run_sync(&NoProgress).await;
        drop(gate);
        result
    });

    assert!(matches!(second, Err(SyncError::AlreadyRunning)));
    assert_eq!(first.unwrap().uploaded, 1);
}

#[tokio::test]
async fn cancel_stops_between_files_and_skips_sweep() {
    let h = harness(vec![Mapping::new("gone.gpx", t(1), t(1), "gone.gpx")]).await;
    h.local.put("a.gpx", "a", t(1));
    h.local.put("b.gpx", "b", t(2));
    h.local.put("c.gpx", "c", t(3));

    let engine = &h.engine;
    let progress = |fraction: f64, _message: &str| {
        if fraction >= 0.0 {
            engine.cancel();
        }
    };
    let summary = engine.run_sync(&progress).await.unwrap();

    assert!(summary.cancelled);
    assert_eq!(summary.uploaded, 1);
    assert!(h.remote.content("a.gpx").is_some());
    assert!(h.remote.content("b.gpx").is_none());
    assert!(h.mapping("gone.gpx").await.is_some());
}

#[tokio::test]
async fn cancel_before_the_pass_applies_to_it() {
    let h = harness(vec![]).await;
    h.local.put("a.gpx", "a", t(1));

    h.engine.cancel();
    let summary = h.engine.run_sync(&NoProgress).await.unwrap();
    assert!(summary.cancelled);
    assert!(h.remote.content("a.gpx").is_none());

    let next = h.engine.run_sync(&NoProgress).await.unwrap();
    assert!(!next.cancelled);
    assert_eq!(next.uploaded, 1);
}

#[tokio::test]
async fn progress_is_reported_before_each_unit() {
    let h = harness(vec![]).await;
    h.local.put("a.gpx", "a", t(1));
    h.remote.put("b.gpx", "b", t(2));

    let events = Mutex::new(Vec::new());
    let progress = |fraction: f64, message: &str| {
        events.lock().unwrap().push((fraction, message.to_string()));
    };
    h.engine.run_sync(&progress).await.unwrap();

    let events = events.into_inner().unwrap();
    let fractions: Vec<f64> = events.iter().map(|(f, _)| *f).collect();
    assert_eq!(fractions, vec![INDETERMINATE, INDETERMINATE, 0.0, 0.5, 1.0]);
    assert!(events[2].1.contains("a.gpx"));
    assert!(events[3].1.contains("b.gpx"));
}
