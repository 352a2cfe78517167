use std::fs;

use ndarray::{Array1, array};

use colibri_base::ArrayValue;
use colibri_infer::{
    AnomalyDetector, AnyContainer, AotContainer, AotModule, BackendKind, BatchedContainer,
    Container, ContainerOptions, Device, DeviceContext, EagerContainer, EagerModule, Graph,
    InferError, IrContainer, IrModule, KernelTable, Node, OpKind, Params, Predictor,
    RuntimeConfig, ScriptContainer, ScriptModule, TaskStyle, Transformer,
};

fn regression_graph() -> (Graph, Params) {
    let mut params = Params::new();
    params.insert("w", array![[2.0f32], [1.0]].into_dyn());
    params.insert("b", array![0.5f32].into_dyn());
    let graph = Graph {
        inputs: vec!["input".into()],
        outputs: vec!["value".into()],
        nodes: vec![Node {
            op: OpKind::Gemm { weights: "w".into(), bias: Some("b".into()) },
            inputs: vec!["input".into()],
            output: "value".into(),
        }],
    };
    (graph, params)
}

fn classification_graph() -> (Graph, Params) {
    let mut params = Params::new();
    params.insert("w", array![[2.0f32, 0.0, 1.0], [0.0, 2.0, 1.0]].into_dyn());
    params.insert("b", array![0.5f32, -0.5, 0.0].into_dyn());
    let graph = Graph {
        inputs: vec!["input".into()],
        outputs: vec!["labels".into(), "proba".into()],
        nodes: vec![
            Node {
                op: OpKind::Gemm { weights: "w".into(), bias: Some("b".into()) },
                inputs: vec!["input".into()],
                output: "scores".into(),
            },
            Node {
                op: OpKind::Softmax,
                inputs: vec!["scores".into()],
                output: "proba".into(),
            },
            Node {
                op: OpKind::ArgMax,
                inputs: vec!["scores".into()],
                output: "labels".into(),
            },
        ],
    };
    (graph, params)
}

fn anomaly_graph() -> (Graph, Params) {
    let mut params = Params::new();
    params.insert("w", array![[1.0f32], [-1.0]].into_dyn());
    let graph = Graph {
        inputs: vec!["input".into()],
        outputs: vec!["flag".into(), "score".into()],
        nodes: vec![
            Node {
                op: OpKind::Gemm { weights: "w".into(), bias: None },
                inputs: vec!["input".into()],
                output: "score".into(),
            },
            Node {
                op: OpKind::Sigmoid,
                inputs: vec!["score".into()],
                output: "flag".into(),
            },
        ],
    };
    (graph, params)
}

fn ir_regressor(options: ContainerOptions) -> IrContainer {
    let (graph, params) = regression_graph();
    let module = IrModule::new(graph, params).unwrap();
    IrContainer::new(module, TaskStyle::Regression, options).unwrap()
}

fn ir_detector() -> IrContainer {
    let (graph, params) = anomaly_graph();
    let module = IrModule::new(graph, params).unwrap();
    let options = ContainerOptions {
        config: RuntimeConfig {
            score_offset: Some(0.5),
            anomaly_threshold: Some(0.25),
            ..Default::default()
        },
        ..Default::default()
    };
    IrContainer::new(module, TaskStyle::AnomalyDetection, options).unwrap()
}

#[test]
fn test_eager_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let location = dir.path().join("model");
    let (graph, params) = regression_graph();
    let module = EagerModule::new(graph, &params, Device::Cpu).unwrap();
    let options = ContainerOptions { batch_size: Some(4), ..Default::default() };
    let mut container = EagerContainer::new(module, TaskStyle::Regression, options).unwrap();
    let x = array![[1.0f32, 1.0], [3.0, 0.0]];
    let before = container.predict(x.clone()).unwrap();

    let archive = container.save(&location).unwrap();
    assert_eq!(archive, dir.path().join("model.zip"));
    assert!(archive.is_file());
    assert!(!location.exists());

    let mut loaded = EagerContainer::load(&location, true).unwrap();
    assert_eq!(loaded.style(), TaskStyle::Regression);
    assert_eq!(loaded.batch_size(), Some(4));
    assert_eq!(loaded.predict(x).unwrap(), before);
}

#[test]
fn test_script_roundtrip_keeps_string_config() {
    let dir = tempfile::tempdir().unwrap();
    let location = dir.path().join("model");
    let mut params = Params::new();
    params.insert("w", array![[1.0f32], [1.0], [1.0]].into_dyn());
    let graph = Graph {
        inputs: vec!["text".into()],
        outputs: vec!["out".into()],
        nodes: vec![
            Node {
                op: OpKind::Cast,
                inputs: vec!["text".into()],
                output: "codes".into(),
            },
            Node {
                op: OpKind::Gemm { weights: "w".into(), bias: None },
                inputs: vec!["codes".into()],
                output: "out".into(),
            },
        ],
    };
    let module = ScriptModule::compile(&graph, &params, Device::Cpu).unwrap();
    let options = ContainerOptions {
        config: RuntimeConfig { max_string_length: Some(3), ..Default::default() },
        ..Default::default()
    };
    let mut container = ScriptContainer::new(module, TaskStyle::Transform, options).unwrap();
    let strings = ArrayValue::from(Array1::from(vec!["ab".to_string(), "c".to_string()]));
    let before = container.transform(vec![strings.clone()]).unwrap();

    let archive = container.save(&location).unwrap();
    // The archive path itself is also accepted as a load location.
    let mut loaded = ScriptContainer::load(&archive, true).unwrap();
    assert_eq!(loaded.config().max_string_length, Some(3));
    assert_eq!(loaded.transform(vec![strings]).unwrap(), before);
}

#[test]
fn test_ir_roundtrip_keeps_anomaly_config() {
    let dir = tempfile::tempdir().unwrap();
    let location = dir.path().join("model");
    let mut container = ir_detector();
    let x = array![[2.0f32, 1.0], [0.0, 3.0]];
    let decision = container.decision_function(x.clone()).unwrap();
    let samples = container.score_samples(x.clone()).unwrap();

    container.save(&location).unwrap();
    let mut loaded = IrContainer::load(&location, true).unwrap();
    assert_eq!(loaded.config().score_offset, Some(0.5));
    assert_eq!(loaded.config().anomaly_threshold, Some(0.25));
    assert_eq!(loaded.decision_function(x.clone()).unwrap(), decision);
    assert_eq!(loaded.score_samples(x).unwrap(), samples);
}

#[test]
fn test_aot_roundtrip_keeps_batch_size() {
    let dir = tempfile::tempdir().unwrap();
    let location = dir.path().join("model");
    let (graph, params) = regression_graph();
    let module =
        AotModule::compile(graph, params, 2, vec![2], DeviceContext::new(Device::Cpu)).unwrap();
    let mut container =
        AotContainer::new(module, TaskStyle::Regression, ContainerOptions::default()).unwrap();
    let x = array![[1.0f32, 1.0], [3.0, 0.0]];
    let before = container.predict(x.clone()).unwrap();

    container.save(&location).unwrap();
    let mut loaded = AotContainer::load(&location, true).unwrap();
    assert_eq!(loaded.model().batch_size(), 2);
    assert_eq!(loaded.batch_size(), Some(2));
    assert_eq!(loaded.predict(x).unwrap(), before);
}

#[test]
fn test_bundle_layout_after_unpack() {
    let dir = tempfile::tempdir().unwrap();
    let location = dir.path().join("model");
    ir_detector().save(&location).unwrap();
    AnyContainer::load(&location, true).unwrap();

    for name in
        ["model_type.txt", "container.bin", "graph.json", "kernels.json", "weights.safetensors"]
    {
        assert!(location.join(name).is_file(), "missing {name}");
    }
    let tag = fs::read_to_string(location.join("model_type.txt")).unwrap();
    assert_eq!(tag.trim(), "ir");
    let table: KernelTable =
        serde_json::from_str(&fs::read_to_string(location.join("kernels.json")).unwrap()).unwrap();
    assert!(table.ops.contains(&"gemm".to_string()));
}

#[test]
fn test_save_refuses_existing_target() {
    let dir = tempfile::tempdir().unwrap();
    let container = ir_regressor(ContainerOptions::default());

    let location = dir.path().join("model");
    fs::create_dir(&location).unwrap();
    let err = container.save(&location).unwrap_err();
    assert!(matches!(err, InferError::Bundle(_)));
    assert!(!dir.path().join("model.zip").exists());

    let location = dir.path().join("second");
    fs::write(dir.path().join("second.zip"), b"stub").unwrap();
    let err = container.save(&location).unwrap_err();
    assert!(matches!(err, InferError::Bundle(_)));
    assert!(!location.exists());
}

#[test]
fn test_tag_mismatch_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let location = dir.path().join("model");
    ir_regressor(ContainerOptions::default()).save(&location).unwrap();

    let err = ScriptContainer::load(&location, true).unwrap_err();
    assert!(matches!(err, InferError::Bundle(_)));
    assert!(err.to_string().contains("tagged ir"));
}

#[test]
fn test_unknown_tag_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let location = dir.path().join("weird");
    fs::create_dir(&location).unwrap();
    fs::write(location.join("model_type.txt"), "onnx").unwrap();

    let err = AnyContainer::load(&location, false).unwrap_err();
    assert!(matches!(err, InferError::Bundle(_)));
}

#[test]
fn test_missing_archive_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let err = EagerContainer::load(&dir.path().join("nope"), true).unwrap_err();
    assert!(matches!(err, InferError::Bundle(_)));
}

#[test]
fn test_any_container_dispatches_on_tag() {
    let dir = tempfile::tempdir().unwrap();
    let location = dir.path().join("model");
    let (graph, params) = classification_graph();
    let module = ScriptModule::compile(&graph, &params, Device::Cpu).unwrap();
    let mut container =
        ScriptContainer::new(module, TaskStyle::Classification, ContainerOptions::default())
            .unwrap();
    let x = array![[2.0f32, 0.0], [0.0, 2.0], [1.0, 1.0]];
    let labels = container.predict(x.clone()).unwrap();
    container.save(&location).unwrap();

    let mut any = AnyContainer::load(&location, true).unwrap();
    assert_eq!(any.backend(), BackendKind::Script);
    assert_eq!(any.style(), TaskStyle::Classification);
    assert_eq!(any.predict(x.clone()).unwrap(), labels);
    assert_eq!(any.predict_proba(x.clone()).unwrap().shape(), &[3, 3]);
    assert!(matches!(any.transform(x), Err(InferError::Unsupported(_))));
}

#[test]
fn test_any_container_reports_runtime_state() {
    let dir = tempfile::tempdir().unwrap();
    let location = dir.path().join("model");
    let options = ContainerOptions {
        n_threads: Some(2),
        batch_size: Some(8),
        config: RuntimeConfig { max_string_length: Some(16), ..Default::default() },
    };
    ir_regressor(options).save(&location).unwrap();

    let any = AnyContainer::load(&location, true).unwrap();
    assert_eq!(any.batch_size(), Some(8));
    assert_eq!(any.n_threads(), Some(2));
    assert_eq!(any.config().max_string_length, Some(16));
}

#[test]
fn test_load_from_unpacked_dir() {
    let dir = tempfile::tempdir().unwrap();
    let location = dir.path().join("model");
    let mut container = ir_regressor(ContainerOptions::default());
    let x = array![[1.0f32, 1.0]];
    let before = container.predict(x.clone()).unwrap();
    let archive = container.save(&location).unwrap();

    IrContainer::load(&location, true).unwrap();
    fs::remove_file(&archive).unwrap();

    let mut loaded = IrContainer::load(&location, false).unwrap();
    assert_eq!(loaded.predict(x).unwrap(), before);
}

#[test]
fn test_sample_input_is_not_persisted() {
    let dir = tempfile::tempdir().unwrap();
    let location = dir.path().join("model");
    let options = ContainerOptions {
        config: RuntimeConfig {
            sample_input: Some(vec![ArrayValue::from(array![[1.0f32, 1.0]])]),
            ..Default::default()
        },
        ..Default::default()
    };
    let container = ir_regressor(options);
    assert!(container.config().sample_input.is_some());

    container.save(&location).unwrap();
    let loaded = IrContainer::load(&location, true).unwrap();
    assert!(loaded.config().sample_input.is_none());
}

#[test]
fn test_batched_save_delegates_to_base() {
    let dir = tempfile::tempdir().unwrap();
    let location = dir.path().join("model");
    let base = ir_regressor(ContainerOptions { batch_size: Some(4), ..Default::default() });
    let batched = BatchedContainer::new(base).unwrap();
    batched.save(&location).unwrap();

    let loaded = IrContainer::load(&location, true).unwrap();
    assert_eq!(loaded.batch_size(), Some(4));
}
