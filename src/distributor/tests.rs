use super::*;
use super::consumer::RateGate;
use crate::frame::Frame;
use async_trait::async_trait;
use image::RgbImage;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::time::sleep;

const SOURCE_FRAME_NANOS: u64 = 33_333_333;

fn test_frame(seq: u64) -> Frame {
    Frame::new(
        seq,
        Duration::from_nanos(seq * SOURCE_FRAME_NANOS),
        SystemTime::now(),
        RgbImage::new(8, 8),
    )
}

/// Replays a fixed list of frames at a fixed pace
struct ScriptedSource {
    frames: VecDeque<Frame>,
    pace: Duration,
    closes: Arc<AtomicUsize>,
}

impl ScriptedSource {
    fn new(count: u64, pace: Duration) -> (Self, Arc<AtomicUsize>) {
        let closes = Arc::new(AtomicUsize::new(0));
        let source = Self {
            frames: (0..count).map(test_frame).collect(),
            pace,
            closes: Arc::clone(&closes),
        };
        (source, closes)
    }
}

#[async_trait]
impl FrameSource for ScriptedSource {
    async fn next_frame(&mut self) -> Option<Frame> {
        match self.frames.pop_front() {
            Some(frame) => {
                sleep(self.pace).await;
                Some(frame)
            }
            // behave like a live track that went quiet
            None => std::future::pending().await,
        }
    }

    async fn close(&mut self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct RecordingConsumer {
    seqs: Mutex<Vec<u64>>,
}

impl RecordingConsumer {
    fn sorted(&self) -> Vec<u64> {
        let mut seqs = self.seqs.lock().clone();
        seqs.sort_unstable();
        seqs
    }
}

#[async_trait]
impl FrameConsumer for RecordingConsumer {
    async fn on_frame(&self, frame: Frame) {
        self.seqs.lock().push(frame.seq);
    }
}

/// Never finishes handling a frame
struct StuckConsumer;

#[async_trait]
impl FrameConsumer for StuckConsumer {
    async fn on_frame(&self, _frame: Frame) {
        std::future::pending::<()>().await;
    }
}

#[test]
fn test_queue_drops_oldest_when_full() {
    let queue = FrameQueue::new(5);
    for seq in 0..5 {
        assert!(queue.push(test_frame(seq)).is_none());
    }

    let evicted = queue.push(test_frame(5)).unwrap();
    assert_eq!(evicted.seq, 0);
    let evicted = queue.push(test_frame(6)).unwrap();
    assert_eq!(evicted.seq, 1);

    let remaining: Vec<u64> = std::iter::from_fn(|| queue.pop()).map(|f| f.seq).collect();
    assert_eq!(remaining, vec![2, 3, 4, 5, 6]);
    assert_eq!(queue.frames_pushed(), 7);
    assert_eq!(queue.frames_dropped(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_consumers_are_gated_by_their_own_rate() {
    let distributor = FrameDistributor::new("test", 5);
    let fast = Arc::new(RecordingConsumer::default());
    let slow = Arc::new(RecordingConsumer::default());
    distributor.register(fast.clone(), 30.0, "fast");
    distributor.register(slow.clone(), 1.0, "slow");

    let (source, _) = ScriptedSource::new(300, Duration::from_millis(33));
    distributor.start(Box::new(source)).unwrap();
    sleep(Duration::from_secs(12)).await;

    assert_eq!(fast.sorted().len(), 300);

    let slow_seqs = slow.sorted();
    assert_eq!(slow_seqs.len(), 10);
    for pair in slow_seqs.windows(2) {
        assert_eq!(pair[1] - pair[0], 30);
    }

    let stats = distributor.stats();
    assert_eq!(stats.frames_received, 300);
    assert_eq!(stats.frames_dropped, 0);

    distributor.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_rate_above_source_rate_gets_every_frame() {
    let distributor = FrameDistributor::new("test", 5);
    let eager = Arc::new(RecordingConsumer::default());
    distributor.register(eager.clone(), 120.0, "eager");

    let (source, _) = ScriptedSource::new(40, Duration::from_millis(33));
    distributor.start(Box::new(source)).unwrap();
    sleep(Duration::from_secs(3)).await;

    assert_eq!(eager.sorted(), (0..40).collect::<Vec<u64>>());
    distributor.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_stuck_consumer_does_not_delay_others() {
    let distributor = FrameDistributor::new("test", 5);
    let healthy = Arc::new(RecordingConsumer::default());
    distributor.register(Arc::new(StuckConsumer), 30.0, "stuck");
    distributor.register(healthy.clone(), 30.0, "healthy");

    let (source, _) = ScriptedSource::new(20, Duration::from_millis(33));
    distributor.start(Box::new(source)).unwrap();
    sleep(Duration::from_secs(2)).await;

    assert_eq!(healthy.sorted().len(), 20);
    distributor.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_unregister_stops_delivery() {
    let distributor = FrameDistributor::new("test", 5);
    let consumer = Arc::new(RecordingConsumer::default());
    let id = distributor.register(consumer.clone(), 30.0, "leaving");

    let (source, _) = ScriptedSource::new(60, Duration::from_millis(33));
    distributor.start(Box::new(source)).unwrap();
    sleep(Duration::from_millis(500)).await;

    assert!(distributor.unregister(id));
    assert!(!distributor.unregister(id));
    let seen = consumer.sorted().len();
    sleep(Duration::from_secs(2)).await;

    assert_eq!(consumer.sorted().len(), seen);
    assert!(seen < 60);
    distributor.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_stop_is_idempotent_and_releases_source_once() {
    let distributor = FrameDistributor::new("test", 5);
    distributor.register(Arc::new(RecordingConsumer::default()), 10.0, "c");

    let (source, closes) = ScriptedSource::new(10, Duration::from_millis(33));
    distributor.start(Box::new(source)).unwrap();
    assert!(distributor.is_running());

    distributor.stop().await;
    distributor.stop().await;

    assert_eq!(closes.load(Ordering::SeqCst), 1);
    assert_eq!(distributor.consumer_count(), 0);
    assert!(!distributor.is_running());

    let (again, _) = ScriptedSource::new(1, Duration::from_millis(33));
    assert!(distributor.start(Box::new(again)).is_err());
}

#[tokio::test(start_paused = true)]
async fn test_start_twice_is_rejected() {
    let distributor = FrameDistributor::new("test", 5);
    let (first, _) = ScriptedSource::new(1, Duration::from_millis(33));
    let (second, _) = ScriptedSource::new(1, Duration::from_millis(33));

    distributor.start(Box::new(first)).unwrap();
    assert!(distributor.start(Box::new(second)).is_err());
    distributor.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_owned_attachment_stops_its_distributor() {
    let consumer = Arc::new(RecordingConsumer::default());
    let (source, closes) = ScriptedSource::new(30, Duration::from_millis(33));

    let attachment =
        Attachment::attach(VideoInput::Source(Box::new(source)), consumer.clone(), 10.0, "stage")
            .unwrap();
    assert!(attachment.owns_distributor());
    assert_eq!(attachment.distributor().name(), "stage_forwarder");

    sleep(Duration::from_secs(2)).await;
    assert!(!consumer.sorted().is_empty());

    let distributor = Arc::clone(attachment.distributor());
    attachment.detach().await;
    assert!(!distributor.is_running());
    assert_eq!(closes.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_owned_attachment_delivers_requested_rate() {
    let mut attachments = Vec::new();
    let mut consumers = Vec::new();
    for (rate, name) in [(10.0, "ten_hz"), (1.0, "one_hz")] {
        let consumer = Arc::new(RecordingConsumer::default());
        let (source, _) = ScriptedSource::new(300, Duration::from_millis(33));
        let attachment =
            Attachment::attach(VideoInput::Source(Box::new(source)), consumer.clone(), rate, name)
                .unwrap();
        attachments.push(attachment);
        consumers.push(consumer);
    }

    sleep(Duration::from_secs(12)).await;

    let ten_hz = consumers[0].sorted();
    assert_eq!(ten_hz.len(), 100);
    assert!(ten_hz.windows(2).all(|pair| pair[1] - pair[0] == 3));

    let one_hz = consumers[1].sorted();
    assert_eq!(one_hz.len(), 10);
    assert!(one_hz.windows(2).all(|pair| pair[1] - pair[0] == 30));

    let intake = attachments[0].distributor().stats();
    assert_eq!(intake.frames_received, 300);
    assert_eq!(intake.frames_throttled, 200);

    for attachment in attachments {
        attachment.detach().await;
    }
}

#[test]
fn test_rate_gate_tolerates_rounded_timestamps() {
    let mut gate = RateGate::new(10.0);
    assert!(gate.admit(Duration::ZERO));
    assert!(!gate.admit(Duration::from_nanos(66_666_666)));
    // three 30 Hz frames land a hair short of 100 ms
    assert!(gate.admit(Duration::from_nanos(99_999_999)));
    // a clock restart is always admitted
    assert!(gate.admit(Duration::from_millis(10)));
}

#[tokio::test(start_paused = true)]
async fn test_shared_attachment_leaves_distributor_running() {
    let shared = Arc::new(FrameDistributor::new("shared", 5));
    let (source, closes) = ScriptedSource::new(30, Duration::from_millis(33));
    shared.start(Box::new(source)).unwrap();

    let attachment = Attachment::attach(
        VideoInput::Shared(Arc::clone(&shared)),
        Arc::new(RecordingConsumer::default()),
        5.0,
        "stage",
    )
    .unwrap();
    assert!(!attachment.owns_distributor());
    assert_eq!(shared.consumer_count(), 1);

    attachment.detach().await;
    assert_eq!(shared.consumer_count(), 0);
    assert!(shared.is_running());
    assert_eq!(closes.load(Ordering::SeqCst), 0);

    shared.stop().await;
    assert_eq!(closes.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_pattern_source_respects_limit() {
    let mut source = TestPatternSource::new(16, 8, 30.0).with_limit(3);
    let mut seqs = Vec::new();
    while let Some(frame) = source.next_frame().await {
        assert_eq!(frame.width(), 16);
        seqs.push(frame.seq);
    }
    assert_eq!(seqs, vec![0, 1, 2]);
}
