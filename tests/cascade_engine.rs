use std::sync::Arc;

use image::RgbImage;

use powerline_inspect::{
    CascadeEngine, Classification, DefectClass, EngineConfig, EngineError, ModelRegistry,
    ModelRole, ObjectClass, RawDetection, StubClassifier, StubDetector,
};

fn frame() -> RgbImage {
    RgbImage::new(320, 240)
}

fn raw(bbox: [f32; 4], confidence: f32, class: &str) -> RawDetection {
    RawDetection {
        bbox,
        confidence,
        class_index: ObjectClass::from_name(class).unwrap().index(),
    }
}

fn top1(class: &str, confidence: f32) -> Classification {
    Classification {
        class_index: DefectClass::from_name(class).unwrap().index(),
        confidence,
    }
}

fn config(defect_threshold: f32, good_threshold: f32) -> EngineConfig {
    EngineConfig {
        detector_ckpt: "stub://detector".to_string(),
        classifier_ckpt: "stub://classifier".to_string(),
        defect_threshold,
        good_threshold,
        ..EngineConfig::default()
    }
}

fn engine(
    cfg: EngineConfig,
    detections: Vec<RawDetection>,
    outputs: Vec<Classification>,
) -> (CascadeEngine, Arc<StubDetector>, Arc<StubClassifier>) {
    let detector = Arc::new(StubDetector::new(detections));
    let classifier = Arc::new(StubClassifier::new(outputs));
    let engine = CascadeEngine::with_models(cfg, detector.clone(), classifier.clone());
    (engine, detector, classifier)
}

#[test]
fn nominal_detection_respects_good_threshold() {
    let boxes = vec![raw([40.0, 40.0, 120.0, 140.0], 0.8, "vari-grip")];
    let outputs = vec![top1("vari-grip_good", 0.6)];

    let (kept, _, _) = engine(config(0.7, 0.5), boxes.clone(), outputs.clone());
    let detections = kept.infer(&frame()).unwrap();
    assert_eq!(detections.len(), 1);
    assert_eq!(detections[0].object_class.name(), "vari-grip");
    assert_eq!(detections[0].defect_class.name(), "vari-grip_good");
    assert_eq!(<[i32; 4]>::from(detections[0].bbox), [40, 40, 120, 140]);

    let (strict, _, _) = engine(config(0.7, 0.8), boxes, outputs);
    assert!(strict.infer(&frame()).unwrap().is_empty());
}

#[test]
fn defect_detection_uses_defect_threshold() {
    let boxes = vec![raw([10.0, 10.0, 60.0, 60.0], 0.9, "glass insulator")];

    let (below, _, _) = engine(
        config(0.7, 0.5),
        boxes.clone(),
        vec![top1("glass-insulator_missing-cap", 0.65)],
    );
    assert!(below.infer(&frame()).unwrap().is_empty());

    let (at, _, _) = engine(
        config(0.7, 0.5),
        boxes,
        vec![top1("glass-insulator_missing-cap", 0.7)],
    );
    let detections = at.infer(&frame()).unwrap();
    assert_eq!(detections.len(), 1);
    assert!(detections[0].is_defect());
}

#[test]
fn output_keeps_detector_order() {
    let boxes = vec![
        raw([10.0, 10.0, 60.0, 60.0], 0.9, "yoke"),
        raw([100.0, 100.0, 180.0, 200.0], 0.75, "spacer"),
    ];
    let outputs = vec![top1("yoke-suspension_good", 0.9), top1("vari-grip_good", 0.9)];
    let (engine, _, _) = engine(config(0.7, 0.5), boxes, outputs);

    let detections = engine.infer(&frame()).unwrap();
    let confidences: Vec<f32> = detections.iter().map(|d| d.object_confidence).collect();
    assert_eq!(confidences, vec![0.9, 0.75]);

    // Same input, reversed confidences: still detector order.
    let boxes = vec![
        raw([10.0, 10.0, 60.0, 60.0], 0.6, "yoke"),
        raw([100.0, 100.0, 180.0, 200.0], 0.95, "spacer"),
    ];
    let outputs = vec![top1("yoke-suspension_good", 0.9), top1("vari-grip_good", 0.9)];
    let (engine, _, _) = self::engine(config(0.7, 0.5), boxes, outputs);
    let names: Vec<&str> = engine
        .infer(&frame())
        .unwrap()
        .iter()
        .map(|d| d.object_class.name())
        .collect();
    assert_eq!(names, vec!["yoke", "spacer"]);
}

#[test]
fn small_crops_never_reach_the_classifier() {
    let boxes = vec![
        raw([0.0, 0.0, 9.0, 50.0], 0.9, "sphere"),
        raw([20.0, 20.0, 70.0, 29.9], 0.9, "sphere"),
        raw([315.0, 100.0, 400.0, 160.0], 0.9, "sphere"),
        raw([50.0, 50.0, 60.0, 60.0], 0.9, "sphere"),
        raw([-50.0, -50.0, -10.0, -10.0], 0.9, "sphere"),
    ];
    let (engine, detector, classifier) =
        engine(config(0.7, 0.5), boxes, vec![top1("vari-grip_rust", 0.9)]);

    let detections = engine.infer(&frame()).unwrap();

    assert_eq!(detector.calls(), 1);
    // 9 px wide, 9 px tall, clipped to 5 px wide, and off-frame are all skipped.
    assert_eq!(classifier.calls(), 1);
    assert_eq!(classifier.crop_sizes(), vec![(10, 10)]);
    assert_eq!(detections.len(), 1);
    assert!(classifier
        .crop_sizes()
        .iter()
        .all(|&(w, h)| w >= 10 && h >= 10));
}

#[test]
fn every_returned_detection_meets_its_threshold() {
    let classes = [
        ("vari-grip_good", 0.55),
        ("vari-grip_rust", 0.72),
        ("yoke-suspension_rust", 0.6),
        ("glass-insulator_good", 0.45),
        ("vari-grip_bird-nest", 0.99),
    ];
    let boxes: Vec<RawDetection> = [0.52, 0.8, 0.95, 0.9, 0.69]
        .iter()
        .enumerate()
        .map(|(i, &conf)| {
            let x = 10.0 + i as f32 * 60.0;
            raw([x, 20.0, x + 50.0, 120.0], conf, "vari-grip")
        })
        .collect();
    let outputs = classes.iter().map(|&(c, p)| top1(c, p)).collect();
    let cfg = config(0.7, 0.5);
    let thresholds = cfg.thresholds();
    let (engine, _, _) = engine(cfg, boxes, outputs);

    let detections = engine.infer(&frame()).unwrap();
    assert_eq!(detections.len(), 2);
    for d in &detections {
        let t = thresholds.for_condition(d.condition());
        assert!(d.object_confidence >= t && d.defect_confidence >= t, "{d:?}");
    }
}

#[test]
fn lowering_thresholds_only_adds_detections() {
    let boxes: Vec<RawDetection> = [0.3, 0.55, 0.75, 0.9]
        .iter()
        .enumerate()
        .map(|(i, &conf)| {
            let x = 10.0 + i as f32 * 70.0;
            raw([x, 30.0, x + 60.0, 150.0], conf, "spacer")
        })
        .collect();
    let outputs = vec![
        top1("vari-grip_rust", 0.8),
        top1("vari-grip_good", 0.6),
        top1("lightning-rod-suspension_rust", 0.5),
        top1("glass-insulator_good", 0.95),
    ];

    let mut previous: Vec<[i32; 4]> = Vec::new();
    for t in [0.9, 0.7, 0.5, 0.3, 0.0] {
        let (engine, _, _) = engine(config(t, t), boxes.clone(), outputs.clone());
        let current: Vec<[i32; 4]> = engine
            .infer(&frame())
            .unwrap()
            .iter()
            .map(|d| d.bbox.into())
            .collect();
        for bbox in &previous {
            assert!(current.contains(bbox), "threshold {t} lost {bbox:?}");
        }
        previous = current;
    }
    assert_eq!(previous.len(), 4);
}

#[test]
fn failing_models_surface_as_inference_errors() {
    let detector = Arc::new(StubDetector::failing());
    let classifier = Arc::new(StubClassifier::constant(
        DefectClass::from_name("vari-grip_good").unwrap(),
        0.9,
    ));
    let engine = CascadeEngine::with_models(config(0.7, 0.5), detector, classifier);
    assert!(matches!(
        engine.infer(&frame()),
        Err(EngineError::Inference(_))
    ));

    let (engine, _, _) = engine_with_failing_classifier();
    assert!(matches!(
        engine.infer(&frame()),
        Err(EngineError::Inference(_))
    ));
}

fn engine_with_failing_classifier() -> (CascadeEngine, Arc<StubDetector>, Arc<StubClassifier>) {
    let detector = Arc::new(StubDetector::new(vec![raw(
        [10.0, 10.0, 60.0, 60.0],
        0.9,
        "yoke",
    )]));
    let classifier = Arc::new(StubClassifier::failing());
    let engine = CascadeEngine::with_models(config(0.7, 0.5), detector.clone(), classifier.clone());
    (engine, detector, classifier)
}

#[test]
fn failed_reload_keeps_previous_models() {
    let (engine, detector, classifier) = engine(
        config(0.7, 0.5),
        vec![raw([40.0, 40.0, 120.0, 140.0], 0.8, "vari-grip")],
        vec![top1("vari-grip_good", 0.6)],
    );
    assert_eq!(engine.infer(&frame()).unwrap().len(), 1);

    let mut broken = config(0.2, 0.2);
    broken.classifier_ckpt = "missing/classifier/weights/best.onnx".to_string();
    let err = engine.reload(broken).unwrap_err();
    match err {
        EngineError::ModelLoad { role, location, .. } => {
            assert_eq!(role, ModelRole::Classifier);
            assert_eq!(location, "missing/classifier/weights/best.onnx");
        }
        other => panic!("unexpected error: {other}"),
    }

    assert_eq!(engine.thresholds().good, 0.5);
    assert_eq!(engine.config().classifier_ckpt, "stub://classifier");
    assert_eq!(engine.infer(&frame()).unwrap().len(), 1);
    assert_eq!(detector.calls(), 2);
    assert_eq!(classifier.calls(), 2);
}

#[test]
fn reload_swaps_models_and_thresholds_together() {
    let (engine, detector, _) = engine(
        config(0.7, 0.5),
        vec![raw([40.0, 40.0, 120.0, 140.0], 0.8, "vari-grip")],
        vec![top1("vari-grip_good", 0.6)],
    );

    let mut next = config(0.9, 0.5);
    next.classifier_ckpt = "stub://defect-classifier".to_string();
    engine.reload(next).unwrap();

    // Stub registry models: centred vari-grip at 0.9, rust at 0.92.
    let detections = engine.infer(&frame()).unwrap();
    assert_eq!(detections.len(), 1);
    assert_eq!(detections[0].defect_class.name(), "vari-grip_rust");
    assert_eq!(<[i32; 4]>::from(detections[0].bbox), [80, 60, 240, 180]);
    assert_eq!(detector.calls(), 0);
    assert_eq!(engine.thresholds().defect, 0.9);
}

#[test]
fn construction_fails_for_unloadable_checkpoints() {
    let mut cfg = config(0.7, 0.5);
    cfg.detector_ckpt = "ftp://models/detector.bin".to_string();
    match CascadeEngine::new(cfg, ModelRegistry::with_defaults()) {
        Err(EngineError::ModelLoad { role, .. }) => assert_eq!(role, ModelRole::Detector),
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("engine built from an unloadable checkpoint"),
    }
}
