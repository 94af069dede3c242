//! Wiring every cached source from a [`RefreshConfig`], the way a server
//! sets them up at startup.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use precache::{Broadcaster, PollError, Precacher, Preloader, RefreshConfig};

#[derive(Debug, Clone, PartialEq)]
struct CurrentlyPlaying {
    track: String,
    progress_ms: u64,
}

#[tokio::test(start_paused = true)]
async fn sources_follow_config() {
    let cfg = RefreshConfig::from_json(
        r#"{
            "location": { "interval_ms": 200 },
            "git": { "enabled": false },
            "music": { "interval_ms": 50 }
        }"#,
    )
    .unwrap();
    cfg.validate().unwrap();

    let location = Precacher::new(
        || async { Ok::<_, String>(Some("Toronto, ON")) },
        cfg.location.interval(),
        cfg.location.poller_options("location"),
    )
    .unwrap();

    assert!(!cfg.git.enabled);

    let progress = Arc::new(AtomicUsize::new(0));
    let music = {
        let progress = Arc::clone(&progress);
        Broadcaster::spawn(
            move || {
                let p = progress.fetch_add(50, Ordering::SeqCst) as u64;
                async move {
                    Ok::<_, String>(Some(CurrentlyPlaying {
                        track: "Nights".to_owned(),
                        progress_ms: p,
                    }))
                }
            },
            cfg.music.interval(),
            cfg.music.streamer_options("music"),
            4,
        )
        .unwrap()
    };
    let mut subscriber = music.subscribe();

    let first = subscriber.recv().await.and_then(|o| o.value).unwrap();
    assert_eq!(first.progress_ms, 0);
    let second = subscriber.recv().await.and_then(|o| o.value).unwrap();
    assert_eq!(second.progress_ms, 50);

    // Location has not ticked yet at 100ms.
    assert_eq!(location.results().unwrap_err(), PollError::CacheEmpty);
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(location.results().unwrap().value, Some("Toronto, ON"));

    music.shutdown().await;
    location.shutdown().await;
    // Whatever was already sent drains, then the subscription ends.
    while subscriber.recv().await.is_some() {}
    assert_eq!(music.receiver_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn preloader_without_value_reports_only_error() {
    let segments = Preloader::spawn(
        || async { Err::<Option<u32>, _>("location history unavailable") },
        Duration::from_millis(100),
        Default::default(),
    )
    .unwrap();

    tokio::time::sleep(Duration::from_millis(150)).await;
    let snap = segments.results().unwrap();
    assert_eq!(snap.value, None);
    assert_eq!(snap.error.as_deref(), Some(&"location history unavailable"));
    segments.stop();
}
