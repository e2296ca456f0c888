use std::{
    fs,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};

use keel_asset::{ArtifactProbe, CacheIndex, CacheKind, MainTask, MainThreadQueue, Progress};

struct TempDir {
    path: PathBuf,
}

impl TempDir {
    fn new(tag: &str) -> Self {
        let path = std::env::temp_dir().join(format!(
            "keel-asset-{}-{}",
            tag,
            uuid::Uuid::new_v4().simple()
        ));
        fs::create_dir_all(&path).unwrap();
        Self { path }
    }

    fn join(&self, name: &str) -> PathBuf {
        self.path.join(name)
    }
}

impl Drop for TempDir {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.path);
    }
}

fn touch(path: &Path, contents: &[u8]) {
    // sleep first so the rewrite always lands on a different millisecond
    thread::sleep(Duration::from_millis(20));
    fs::write(path, contents).unwrap();
}

#[test]
fn index_assigns_and_keeps_guid() {
    let dir = TempDir::new("index");
    let source = dir.join("brick.png");
    fs::write(&source, b"pixels").unwrap();

    let index = CacheIndex::open(&dir.join("cache")).unwrap();
    let first = index.resolve(CacheKind::Image, &source, 0).unwrap();
    assert!(first.starts_with(dir.join("cache").join("image")));
    assert_eq!(first.extension().unwrap(), "cache");

    let second = index.resolve(CacheKind::Image, &source, 0).unwrap();
    assert_eq!(first, second);

    // a different discriminator is a different identity
    let other = index.resolve(CacheKind::Image, &source, 1).unwrap();
    assert_ne!(first, other);
}

#[test]
fn index_invalidates_on_modification() {
    let dir = TempDir::new("invalidate");
    let source = dir.join("rock.png");
    fs::write(&source, b"v1").unwrap();

    let index = CacheIndex::open(&dir.join("cache")).unwrap();
    let artifact = index.resolve(CacheKind::Image, &source, 0).unwrap();
    fs::create_dir_all(artifact.parent().unwrap()).unwrap();
    fs::write(&artifact, b"processed").unwrap();

    touch(&source, b"v2");
    let resolved = index.resolve(CacheKind::Image, &source, 0).unwrap();
    // identity is anchored on the path, not on content
    assert_eq!(resolved, artifact);
    // but the stale artifact is gone
    assert!(!artifact.exists());

    // and the refreshed time is now considered current
    fs::write(&artifact, b"reprocessed").unwrap();
    let again = index.resolve(CacheKind::Image, &source, 0).unwrap();
    assert_eq!(again, artifact);
    assert!(artifact.exists());
}

#[test]
fn index_missing_source_fails() {
    let dir = TempDir::new("missing");
    let index = CacheIndex::open(&dir.join("cache")).unwrap();
    let err = index
        .resolve(CacheKind::Mesh, &dir.join("nope.obj"), 0)
        .unwrap_err();
    assert!(matches!(err, keel_asset::Error::SourceNotFound(_)));
}

#[test]
fn index_rejects_corrupt_guid() {
    let dir = TempDir::new("corrupt");
    let source = dir.join("wood.png");
    fs::write(&source, b"pixels").unwrap();

    let cache_root = dir.join("cache");
    let index = CacheIndex::open(&cache_root).unwrap();
    index.resolve(CacheKind::Image, &source, 0).unwrap();
    drop(index);

    let conn = rusqlite::Connection::open(cache_root.join("cache_database.sqlite")).unwrap();
    conn.execute("UPDATE Image SET guid = x'0badc0de';", []).unwrap();
    drop(conn);

    let index = CacheIndex::open(&cache_root).unwrap();
    let err = index.resolve(CacheKind::Image, &source, 0).unwrap_err();
    assert!(matches!(err, keel_asset::Error::CorruptCacheRecord(_)));
}

#[test]
fn artifact_version_gate() {
    let dir = TempDir::new("artifact");
    let path = dir.join("blob.cache");
    let payload = vec![3u32, 5, 8, 13];

    keel_asset::write_artifact(&path, 4, &payload).unwrap();
    match keel_asset::read_artifact::<Vec<u32>>(&path, 4) {
        ArtifactProbe::Fresh(data) => assert_eq!(data, payload),
        _ => panic!("expected a fresh artifact"),
    }

    // a reader expecting any other version must refuse the data
    assert!(matches!(
        keel_asset::read_artifact::<Vec<u32>>(&path, 5),
        ArtifactProbe::Stale
    ));

    // truncation is detected through the recorded payload length
    let bytes = fs::read(&path).unwrap();
    fs::write(&path, &bytes[..bytes.len() - 3]).unwrap();
    assert!(matches!(
        keel_asset::read_artifact::<Vec<u32>>(&path, 4),
        ArtifactProbe::Stale
    ));

    assert!(matches!(
        keel_asset::read_artifact::<Vec<u32>>(&dir.join("absent.cache"), 4),
        ArtifactProbe::Missing
    ));
}

fn flat_roundtrip<F: keel_asset::Flat + PartialEq + std::fmt::Debug>(data: F) {
    let mut words = vec![0u64; data.size().div_ceil(8)];
    let ptr = words.as_mut_ptr() as *mut u8;
    unsafe { data.write(ptr) };
    let other = unsafe { F::read(ptr) };
    assert_eq!(data, other);
}

#[test]
fn test_flatten() {
    flat_roundtrip([0u32, 1u32, 2u32]);
    flat_roundtrip(vec![2u32, 4, 6]);
    flat_roundtrip(vec![vec![1u8, 2], Vec::new(), vec![3u8]]);
    flat_roundtrip(vec![[1.5f32, -2.0, 0.25], [0.0, 1.0, 2.0]]);
}

#[test]
fn single_flight_serializes_same_key() {
    let flight = Arc::new(keel_asset::SingleFlight::new());
    let running = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for _ in 0..4 {
        let flight = Arc::clone(&flight);
        let running = Arc::clone(&running);
        let peak = Arc::clone(&peak);
        handles.push(thread::spawn(move || {
            let _guard = flight.enter(Path::new("image/abc.cache"));
            let now = running.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(5));
            running.fetch_sub(1, Ordering::SeqCst);
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(peak.load(Ordering::SeqCst), 1);
}

struct CountDown {
    remaining: u32,
    ticks: Arc<AtomicUsize>,
}

impl MainTask for CountDown {
    fn tick(&mut self) -> Progress {
        self.ticks.fetch_add(1, Ordering::SeqCst);
        self.remaining -= 1;
        if self.remaining == 0 {
            Progress::Done
        } else {
            Progress::Pending
        }
    }
}

#[test]
fn queue_retries_until_done() {
    let queue = MainThreadQueue::new();
    let ticks = Arc::new(AtomicUsize::new(0));
    queue.push(Box::new(CountDown {
        remaining: 3,
        ticks: Arc::clone(&ticks),
    }));

    // one tick per drain, not a busy loop
    queue.drain();
    assert_eq!(ticks.load(Ordering::SeqCst), 1);
    assert_eq!(queue.pending_count(), 1);
    queue.drain();
    queue.drain();
    assert_eq!(ticks.load(Ordering::SeqCst), 3);
    assert_eq!(queue.pending_count(), 0);
}

struct Push {
    queue: Arc<MainThreadQueue>,
    ticks: Arc<AtomicUsize>,
}

impl MainTask for Push {
    fn tick(&mut self) -> Progress {
        self.queue.push(Box::new(CountDown {
            remaining: 1,
            ticks: Arc::clone(&self.ticks),
        }));
        Progress::Done
    }
}

#[test]
fn queue_drains_followup_work_same_frame() {
    let queue = Arc::new(MainThreadQueue::new());
    let ticks = Arc::new(AtomicUsize::new(0));
    queue.push(Box::new(Push {
        queue: Arc::clone(&queue),
        ticks: Arc::clone(&ticks),
    }));
    queue.drain();
    assert_eq!(ticks.load(Ordering::SeqCst), 1);
    assert_eq!(queue.pending_count(), 0);
}
