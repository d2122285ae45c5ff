use super::*;
use crate::backend::{ObjectDetector, PoseDetector, RawDetection, ToddlerClassifier};
use crate::config::{FallStageConfig, ObjectStageConfig, ToddlerStageConfig};
use crate::detection::{BoundingBox, Keypoint, PoseKeypoint};
use crate::distributor::{frame_channel, FrameConsumer, VideoInput};
use crate::error::BackendError;
use crate::events::{EventBus, VisionEvent};
use crate::frame::Frame;
use image::RgbImage;
use parking_lot::Mutex;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

fn frame(seq: u64) -> Frame {
    Frame::new(
        seq,
        Duration::from_millis(seq * 33),
        SystemTime::now(),
        RgbImage::new(64, 48),
    )
}

/// Object detector that replays scripted answers and can be made slow
#[derive(Default)]
struct ScriptedDetector {
    answers: Mutex<VecDeque<Result<Vec<RawDetection>, BackendError>>>,
    delay: Duration,
    calls: AtomicUsize,
}

impl ScriptedDetector {
    fn with_answers(answers: Vec<Result<Vec<RawDetection>, BackendError>>) -> Self {
        Self {
            answers: Mutex::new(answers.into()),
            ..Default::default()
        }
    }

    fn slow(delay: Duration) -> Self {
        Self {
            delay,
            ..Default::default()
        }
    }
}

impl ObjectDetector for ScriptedDetector {
    fn detect(
        &self,
        _image: &RgbImage,
        _threshold: f32,
    ) -> Result<Vec<RawDetection>, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(self.delay);
        self.answers.lock().pop_front().unwrap_or_else(|| Ok(Vec::new()))
    }
}

struct PanickingDetector;

impl ObjectDetector for PanickingDetector {
    fn detect(
        &self,
        _image: &RgbImage,
        _threshold: f32,
    ) -> Result<Vec<RawDetection>, BackendError> {
        panic!("model crashed");
    }
}

struct FixedPoses(Vec<RawDetection>);

impl PoseDetector for FixedPoses {
    fn detect_poses(
        &self,
        _image: &RgbImage,
        _threshold: f32,
    ) -> Result<Vec<RawDetection>, BackendError> {
        Ok(self.0.clone())
    }
}

struct FixedResponse(serde_json::Value);

impl ToddlerClassifier for FixedResponse {
    fn predict(
        &self,
        _image: &RgbImage,
        _confidence: u32,
        _overlap: u32,
    ) -> Result<serde_json::Value, BackendError> {
        Ok(self.0.clone())
    }
}

fn object_stage(detector: Arc<dyn ObjectDetector>) -> ObjectStage {
    DetectionStage::new(ObjectInference::new(detector, &ObjectStageConfig::default()), 3.0)
}

/// Keypoints with only nose and hips placed; everything else left undetected
fn pose(nose_y: f32, left_hip_y: f32, right_hip_y: f32) -> Vec<Keypoint> {
    let mut keypoints = vec![Keypoint::new(0.0, 0.0); PoseKeypoint::COUNT];
    keypoints[PoseKeypoint::Nose.index()] = Keypoint::new(50.0, nose_y);
    keypoints[PoseKeypoint::LeftHip.index()] = Keypoint::new(40.0, left_hip_y);
    keypoints[PoseKeypoint::RightHip.index()] = Keypoint::new(60.0, right_hip_y);
    keypoints
}

fn toddler_inference(response: serde_json::Value) -> ToddlerInference {
    ToddlerInference::new(
        Arc::new(FixedResponse(response)),
        ModelRef::parse("toddler-detection-yxicj-sdfde/2").unwrap(),
        &ToddlerStageConfig::default(),
    )
}

#[tokio::test]
async fn test_object_stage_publishes_filtered_detections() {
    let detector = Arc::new(ScriptedDetector::with_answers(vec![Ok(vec![
        RawDetection::new("cup", 0.9, [10.0, 10.0, 30.0, 40.0]).with_class_id(41),
        RawDetection::new("Person", 0.95, [0.0, 0.0, 20.0, 60.0]),
        RawDetection::new("teddy bear", 0.2, [5.0, 5.0, 15.0, 15.0]),
        RawDetection::new("book", 0.8, [10.0, 10.0, 10.0, 40.0]),
    ])]));
    let stage = object_stage(detector);

    assert!(stage.snapshot().detections.is_empty());
    stage.on_frame(frame(0)).await;

    let snapshot = stage.snapshot();
    assert_eq!(snapshot.frame_number, Some(0));
    assert_eq!(snapshot.detections.len(), 1);
    assert_eq!(snapshot.detections[0].label, "cup");
    assert_eq!(snapshot.detections[0].class_id, Some(41));
    assert_eq!(snapshot.detections[0].bbox, BoundingBox::new(10, 10, 30, 40).unwrap());
}

#[tokio::test]
async fn test_busy_stage_drops_frames_instead_of_queueing() {
    let detector = Arc::new(ScriptedDetector::slow(Duration::from_millis(100)));
    let stage = object_stage(detector.clone());

    tokio::join!(
        stage.on_frame(frame(0)),
        stage.on_frame(frame(1)),
        stage.on_frame(frame(2)),
    );

    let stats = stage.stats();
    assert_eq!(detector.calls.load(Ordering::SeqCst), 1);
    assert_eq!(stats.frames_admitted, 1);
    assert_eq!(stats.frames_dropped, 2);
    assert_eq!(stats.inferences, 1);

    // free again once the inference finished
    stage.on_frame(frame(3)).await;
    assert_eq!(stage.stats().inferences, 2);
    assert_eq!(stage.snapshot().frame_number, Some(1));
}

#[tokio::test]
async fn test_failed_inference_keeps_previous_snapshot() {
    let detector = Arc::new(ScriptedDetector::with_answers(vec![
        Ok(vec![RawDetection::new("cup", 0.9, [1.0, 1.0, 5.0, 5.0])]),
        Err(BackendError::failed("connection reset")),
    ]));
    let stage = object_stage(detector);

    stage.on_frame(frame(0)).await;
    stage.on_frame(frame(1)).await;

    let snapshot = stage.snapshot();
    assert_eq!(snapshot.frame_number, Some(0));
    assert_eq!(snapshot.detections.len(), 1);

    let stats = stage.stats();
    assert_eq!(stats.inferences, 1);
    assert_eq!(stats.failures, 1);
}

#[tokio::test]
async fn test_panicking_backend_does_not_kill_the_stage() {
    let stage = object_stage(Arc::new(PanickingDetector));

    stage.on_frame(frame(0)).await;
    stage.on_frame(frame(1)).await;

    let stats = stage.stats();
    assert_eq!(stats.failures, 2);
    assert_eq!(stats.frames_admitted, 2);
    assert!(stage.snapshot().frame_number.is_none());
}

#[tokio::test]
async fn test_failed_inference_broadcasts_stage_error() {
    let bus = Arc::new(EventBus::new(10));
    let mut events = bus.subscribe();
    let detector = Arc::new(ScriptedDetector::with_answers(vec![Err(BackendError::failed(
        "connection reset",
    ))]));
    let stage = object_stage(detector).with_event_bus(Arc::clone(&bus));

    stage.on_frame(frame(0)).await;

    match events.try_recv().unwrap() {
        VisionEvent::StageError { component, error } => {
            assert_eq!(component, "object_detection");
            assert_eq!(
                error,
                "object_detection inference failed: inference call failed: connection reset"
            );
        }
        other => panic!("unexpected event {:?}", other),
    }
}

#[tokio::test]
async fn test_failure_without_listeners_is_still_counted() {
    // nobody subscribed, so the error event has nowhere to go
    let bus = Arc::new(EventBus::new(10));
    let detector = Arc::new(ScriptedDetector::with_answers(vec![Err(BackendError::failed(
        "connection reset",
    ))]));
    let stage = object_stage(detector).with_event_bus(Arc::clone(&bus));

    stage.on_frame(frame(0)).await;

    assert_eq!(stage.stats().failures, 1);
    assert!(bus.publish(VisionEvent::StageError {
        component: "x".to_string(),
        error: "y".to_string(),
    })
    .is_err());
}

#[tokio::test]
async fn test_object_event_only_when_something_was_seen() {
    let bus = Arc::new(EventBus::new(10));
    let mut events = bus.subscribe();
    let detector = Arc::new(ScriptedDetector::with_answers(vec![
        Ok(Vec::new()),
        Ok(vec![RawDetection::new("bottle", 0.7, [1.0, 1.0, 9.0, 20.0])]),
    ]));
    let stage = object_stage(detector).with_event_bus(Arc::clone(&bus));

    stage.on_frame(frame(0)).await;
    stage.on_frame(frame(1)).await;

    match events.try_recv().unwrap() {
        VisionEvent::ObjectDetected {
            frame_number,
            objects,
            ..
        } => {
            assert_eq!(frame_number, 1);
            assert_eq!(objects[0].label, "bottle");
        }
        other => panic!("unexpected event {:?}", other),
    }
    assert!(events.try_recv().is_err());
}

#[test]
fn test_wide_box_is_falling_regardless_of_keypoints() {
    let lying = BoundingBox::new(0, 0, 130, 100).unwrap();
    assert!(is_falling(&lying, &[], 1.2));
    assert!(is_falling(&lying, &pose(20.0, 80.0, 80.0), 1.2));
}

#[test]
fn test_head_below_hips_is_falling() {
    let upright = BoundingBox::new(0, 0, 100, 100).unwrap();
    assert!(is_falling(&upright, &pose(90.0, 40.0, 50.0), 1.2));
}

#[test]
fn test_standing_person_is_not_falling() {
    let standing = BoundingBox::new(0, 0, 60, 180).unwrap();
    assert!(!is_falling(&standing, &pose(20.0, 100.0, 104.0), 1.2));

    // exactly at the ratio threshold does not count
    let square = BoundingBox::new(0, 0, 120, 100).unwrap();
    assert!(!is_falling(&square, &[], 1.2));
}

#[test]
fn test_keypoint_rule_needs_valid_landmarks() {
    let upright = BoundingBox::new(0, 0, 100, 200).unwrap();

    // hip missing
    assert!(!is_falling(&upright, &pose(150.0, 0.0, 80.0), 1.2));

    // too few keypoints to reach the hips
    let short: Vec<Keypoint> = pose(150.0, 80.0, 80.0).into_iter().take(12).collect();
    assert!(!is_falling(&upright, &short, 1.2));
}

#[tokio::test]
async fn test_fall_stage_reports_most_confident_fall() {
    let people = vec![
        RawDetection::new("person", 0.6, [0.0, 0.0, 150.0, 100.0]),
        RawDetection::new("person", 0.9, [200.0, 0.0, 260.0, 200.0])
            .with_keypoints(pose(150.0, 80.0, 90.0)),
        RawDetection::new("person", 0.95, [300.0, 0.0, 350.0, 150.0])
            .with_keypoints(pose(20.0, 80.0, 90.0)),
    ];
    let bus = Arc::new(EventBus::new(10));
    let mut events = bus.subscribe();
    let stage = DetectionStage::new(
        FallInference::new(Arc::new(FixedPoses(people)), &FallStageConfig::default()),
        2.0,
    )
    .with_event_bus(Arc::clone(&bus));

    stage.on_frame(frame(0)).await;

    let snapshot = stage.snapshot();
    assert!(snapshot.fall_present);
    assert_eq!(snapshot.detections.len(), 3);
    assert!(!snapshot.detections[2].is_falling());

    let fall = snapshot.primary_fall().unwrap();
    assert_eq!(fall.confidence, 0.9);
    assert_eq!(fall.bbox, BoundingBox::new(200, 0, 260, 200).unwrap());

    match events.try_recv().unwrap() {
        VisionEvent::FallDetected { confidence, bbox, .. } => {
            assert_eq!(confidence, 0.9);
            assert_eq!(bbox.x1, 200);
        }
        other => panic!("unexpected event {:?}", other),
    }
}

#[tokio::test]
async fn test_fall_snapshot_clears_when_nobody_falls() {
    let stage = DetectionStage::new(
        FallInference::new(
            Arc::new(FixedPoses(vec![RawDetection::new(
                "person",
                0.8,
                [0.0, 0.0, 50.0, 150.0],
            )])),
            &FallStageConfig::default(),
        ),
        2.0,
    );

    stage.on_frame(frame(0)).await;

    let snapshot = stage.snapshot();
    assert!(!snapshot.fall_present);
    assert!(snapshot.latest_event.is_none());
    assert!(snapshot.primary_fall().is_none());
}

#[test]
fn test_toddler_class_floor_and_allow_list() {
    let inference = toddler_inference(json!({}));
    let response = json!({
        "predictions": [
            {"class": "toddler", "confidence": 0.75, "x": 50, "y": 50, "width": 20, "height": 40},
            {"class": "toddler", "confidence": 0.85, "x": 50, "y": 50, "width": 20, "height": 40},
            {"class": "dog", "confidence": 0.99, "x": 50, "y": 50, "width": 20, "height": 40},
            {"class": "Adult", "confidence": 0.4, "x": 100, "y": 80, "width": 30, "height": 90},
            {"class": "adult", "confidence": 0.2, "x": 100, "y": 80, "width": 30, "height": 90},
        ]
    });

    let detections = inference.filter_predictions(&response);
    assert_eq!(detections.len(), 2);
    assert_eq!(detections[0].label, "toddler");
    assert_eq!(detections[0].confidence, 0.85);
    assert_eq!(detections[0].bbox, BoundingBox::new(40, 30, 60, 70).unwrap());
    assert_eq!(detections[1].label, "Adult");
}

#[test]
fn test_toddler_predictions_with_bad_geometry_are_dropped() {
    let inference = toddler_inference(json!({}));
    let response = json!({
        "predictions": [
            {"class": "adult", "confidence": 0.9, "x": 10, "y": 10, "width": 0, "height": 5},
            {"class": "adult", "confidence": 0.9, "x": 10, "y": 10, "height": 5},
            {"class": "adult", "confidence": 0.9, "x": "ten", "y": 10, "width": 4, "height": 5},
            {"class": " adult ", "confidence": "0.9", "x": "10", "y": 10, "width": 4, "height": 6},
            "not an object",
        ]
    });

    let detections = inference.filter_predictions(&response);
    assert_eq!(detections.len(), 1);
    assert_eq!(detections[0].label, "adult");
    assert_eq!(detections[0].bbox, BoundingBox::new(8, 7, 12, 13).unwrap());

    assert!(inference.filter_predictions(&json!({"predictions": "oops"})).is_empty());
    assert!(inference.filter_predictions(&json!([1, 2])).is_empty());
}

#[tokio::test]
async fn test_toddler_stage_presence_and_event() {
    let bus = Arc::new(EventBus::new(10));
    let mut events = bus.subscribe();
    let stage = DetectionStage::new(
        toddler_inference(json!({
            "predictions": [
                {"class": "TODDLER", "confidence": 0.82,
                 "x": 50, "y": 50, "width": 20, "height": 40},
                {"class": "toddler", "confidence": 0.93,
                 "x": 150, "y": 50, "width": 20, "height": 40},
                {"class": "adult", "confidence": 0.99,
                 "x": 250, "y": 50, "width": 40, "height": 80},
            ]
        })),
        1.0,
    )
    .with_event_bus(Arc::clone(&bus));

    stage.on_frame(frame(0)).await;

    let snapshot = stage.snapshot();
    assert!(snapshot.toddler_present);
    assert_eq!(snapshot.detections.len(), 3);

    match events.try_recv().unwrap() {
        VisionEvent::ToddlerDetected { confidence, .. } => assert_eq!(confidence, 0.93),
        other => panic!("unexpected event {:?}", other),
    }
}

#[test]
fn test_request_confidence_is_a_percentage() {
    let inference = toddler_inference(json!({}));
    assert_eq!(inference.request_confidence(), 30);

    let config = ToddlerStageConfig {
        confidence_threshold: 0.001,
        ..ToddlerStageConfig::default()
    };
    let inference = ToddlerInference::new(
        Arc::new(FixedResponse(json!({}))),
        ModelRef::parse("p/1").unwrap(),
        &config,
    );
    assert_eq!(inference.request_confidence(), 1);
}

#[test]
fn test_model_ref_parsing() {
    let model = ModelRef::parse("toddler-detection-yxicj-sdfde/2").unwrap();
    assert_eq!(model.project, "toddler-detection-yxicj-sdfde");
    assert_eq!(model.version, 2);
    assert_eq!(model.to_string(), "toddler-detection-yxicj-sdfde/2");

    assert_eq!(ModelRef::parse("a/b/3").unwrap().project, "a/b");
    assert!(ModelRef::parse("no-version").is_err());
    assert!(ModelRef::parse("project/latest").is_err());
    assert!(ModelRef::parse("/3").is_err());
}

#[test]
fn test_api_key_resolution() {
    assert_eq!(resolve_api_key(Some("abc"), Some("env".into())).as_deref(), Some("abc"));
    assert_eq!(resolve_api_key(None, Some("env".into())).as_deref(), Some("env"));
    assert_eq!(resolve_api_key(Some("  "), None), None);
    assert_eq!(resolve_api_key(None, None), None);
}

#[test]
fn test_connect_failure_is_a_construction_error() {
    let config = ToddlerStageConfig {
        api_key: Some("key".to_string()),
        ..ToddlerStageConfig::default()
    };

    let result = ToddlerInference::connect(&config, |_, _| {
        Err(BackendError::unavailable("workspace not found"))
    });
    assert!(matches!(
        result,
        Err(crate::error::StageError::Construction { .. })
    ));

    let result = ToddlerInference::connect(&config, |model, key| {
        assert_eq!(model.version, 2);
        assert_eq!(key, "key");
        Ok(Arc::new(FixedResponse(json!({}))) as Arc<dyn ToddlerClassifier>)
    });
    assert!(result.is_ok());
}

#[test]
fn test_error_throttle_counts_suppressed_errors() {
    let throttle = ErrorThrottle::new(Duration::from_secs(60));
    assert_eq!(throttle.check(), Some(0));
    assert_eq!(throttle.check(), None);
    assert_eq!(throttle.check(), None);

    let open = ErrorThrottle::new(Duration::ZERO);
    assert_eq!(open.check(), Some(0));
    assert_eq!(open.check(), Some(0));
}

#[tokio::test]
async fn test_stage_follows_its_video_input() {
    let detector = Arc::new(ScriptedDetector::default());
    let stage = Arc::new(object_stage(detector.clone()));

    let (first_tx, first_source) = frame_channel(8);
    stage
        .process_video(VideoInput::Source(Box::new(first_source)))
        .await
        .unwrap();
    first_tx.send(frame(0)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(stage.stats().inferences, 1);

    // switching input releases the first owned distributor
    let (second_tx, second_source) = frame_channel(8);
    stage
        .process_video(VideoInput::Source(Box::new(second_source)))
        .await
        .unwrap();
    assert!(first_tx.is_closed());

    second_tx.send(frame(0)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(stage.stats().inferences, 2);

    stage.stop().await;
    stage.stop().await;
    assert!(second_tx.is_closed());
}
