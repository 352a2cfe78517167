use ndarray::array;

use colibri_base::{ArrayValue, Frame};
use colibri_infer::{
    AnomalyDetector, AotContainer, AotModule, Classifier, Container, ContainerOptions, Device,
    DeviceContext, EagerContainer, EagerModule, Graph, InferError, IrContainer, IrModule, Node,
    OpKind, Predictor, RuntimeConfig, ScriptContainer, ScriptModule, TaskStyle, Transformer,
};

fn regression_graph() -> (Graph, colibri_infer::Params) {
    let mut params = colibri_infer::Params::new();
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

fn transform_graph() -> (Graph, colibri_infer::Params) {
    let mut params = colibri_infer::Params::new();
    params.insert("w", array![[1.0f32, 0.0, 2.0], [0.0, 1.0, -1.0]].into_dyn());
    let graph = Graph {
        inputs: vec!["input".into()],
        outputs: vec!["features".into()],
        nodes: vec![
            Node {
                op: OpKind::Gemm { weights: "w".into(), bias: None },
                inputs: vec!["input".into()],
                output: "dense".into(),
            },
            Node {
                op: OpKind::Relu,
                inputs: vec!["dense".into()],
                output: "features".into(),
            },
        ],
    };
    (graph, params)
}

fn classification_graph() -> (Graph, colibri_infer::Params) {
    let mut params = colibri_infer::Params::new();
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

fn anomaly_graph() -> (Graph, colibri_infer::Params) {
    let mut params = colibri_infer::Params::new();
    params.insert("w", array![[1.0f32], [-1.0]].into_dyn());
    let graph = Graph {
        inputs: vec!["input".into()],
        outputs: vec!["flag".into(), "score".into()],
        nodes: vec![
            Node {
                op: OpKind::Gemm { weights: "w".into(), bias: None },
                inputs: vec!["input".into()],
                output: "raw".into(),
            },
            Node {
                op: OpKind::Affine { mul: 1.0, add: -0.5 },
                inputs: vec!["raw".into()],
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

fn ir_container(style: TaskStyle, options: ContainerOptions) -> IrContainer {
    let (graph, params) = match style {
        TaskStyle::Transform => transform_graph(),
        TaskStyle::Regression => regression_graph(),
        TaskStyle::Classification => classification_graph(),
        TaskStyle::AnomalyDetection => anomaly_graph(),
    };
    let module = IrModule::new(graph, params).unwrap();
    IrContainer::new(module, style, options).unwrap()
}

fn anomaly_options() -> ContainerOptions {
    ContainerOptions {
        config: RuntimeConfig { score_offset: Some(0.5), ..Default::default() },
        ..Default::default()
    }
}

#[test]
fn test_predict_regression_values() {
    let mut container = ir_container(TaskStyle::Regression, ContainerOptions::default());
    let result = container.predict(array![[1.0f32, 1.0], [3.0, 0.0], [0.0, 2.0]]).unwrap();
    assert_eq!(result, array![3.5f32, 6.5, 2.5]);
}

#[test]
fn test_transform_returns_model_shape() {
    let mut container = ir_container(TaskStyle::Transform, ContainerOptions::default());
    let result = container.transform(array![[1.0f32, 2.0], [3.0, -1.0]]).unwrap();
    assert_eq!(result, array![[1.0f32, 2.0, 0.0], [3.0, 0.0, 7.0]].into_dyn());
}

#[test]
fn test_methods_are_gated_by_style() {
    let x = array![[1.0f32, 1.0]];

    let mut transformer = ir_container(TaskStyle::Transform, ContainerOptions::default());
    assert!(transformer.transform(x.clone()).is_ok());
    assert!(matches!(transformer.predict(x.clone()), Err(InferError::Unsupported(_))));

    let mut regressor = ir_container(TaskStyle::Regression, ContainerOptions::default());
    assert!(regressor.predict(x.clone()).is_ok());
    assert!(matches!(regressor.transform(x.clone()), Err(InferError::Unsupported(_))));
    assert!(matches!(regressor.predict_proba(x.clone()), Err(InferError::Unsupported(_))));
    assert!(matches!(
        regressor.decision_function(x.clone()),
        Err(InferError::Unsupported(_))
    ));

    let mut classifier = ir_container(TaskStyle::Classification, ContainerOptions::default());
    assert!(classifier.predict(x.clone()).is_ok());
    assert!(classifier.predict_proba(x.clone()).is_ok());
    assert!(matches!(classifier.score_samples(x.clone()), Err(InferError::Unsupported(_))));

    let mut detector = ir_container(TaskStyle::AnomalyDetection, anomaly_options());
    assert!(detector.predict(x.clone()).is_ok());
    assert!(detector.decision_function(x.clone()).is_ok());
    assert!(detector.score_samples(x.clone()).is_ok());
    assert!(matches!(detector.predict_proba(x), Err(InferError::Unsupported(_))));
}

#[test]
fn test_gate_error_names_method_and_style() {
    let mut regressor = ir_container(TaskStyle::Regression, ContainerOptions::default());
    let err = regressor.predict_proba(array![[1.0f32, 1.0]]).unwrap_err();
    assert_eq!(
        err.to_string(),
        "unsupported operation: predict_proba is not available on a regression container"
    );
}

#[test]
fn test_classification_labels_and_proba() {
    let mut container = ir_container(TaskStyle::Classification, ContainerOptions::default());
    let x = array![[2.0f32, 0.0], [0.0, 2.0], [1.0, 1.0]];

    let labels = container.predict(x.clone()).unwrap();
    assert_eq!(labels, array![0.0f32, 1.0, 0.0]);

    let proba = container.predict_proba(x).unwrap();
    assert_eq!(proba.shape(), &[3, 3]);
    for row in proba.rows() {
        assert!((row.sum() - 1.0).abs() < 1e-6);
        assert!(row.iter().all(|p| *p > 0.0));
    }
}

#[test]
fn test_score_samples_adds_offset() {
    let mut detector = ir_container(TaskStyle::AnomalyDetection, anomaly_options());
    let x = array![[2.0f32, 1.0], [0.0, 3.0]];
    let decision = detector.decision_function(x.clone()).unwrap();
    assert_eq!(decision, array![0.5f32, -3.5]);
    let scores = detector.score_samples(x).unwrap();
    assert_eq!(scores, array![1.0f32, -3.0]);
}

#[test]
fn test_anomaly_threshold_shifts_decision() {
    let options = ContainerOptions {
        config: RuntimeConfig {
            score_offset: Some(0.5),
            anomaly_threshold: Some(0.25),
            ..Default::default()
        },
        ..Default::default()
    };
    let mut detector = ir_container(TaskStyle::AnomalyDetection, options);
    let x = array![[2.0f32, 1.0], [0.0, 3.0]];
    assert_eq!(detector.decision_function(x.clone()).unwrap(), array![0.75f32, -3.25]);
    assert_eq!(detector.score_samples(x).unwrap(), array![1.25f32, -2.75]);
}

#[test]
fn test_anomaly_detection_requires_score_offset() {
    let (graph, params) = anomaly_graph();
    let module = IrModule::new(graph, params).unwrap();
    let result = IrContainer::new(
        module,
        TaskStyle::AnomalyDetection,
        ContainerOptions::default(),
    );
    assert!(matches!(result, Err(InferError::Config(_))));
}

#[test]
fn test_frame_and_wide_array_agree() {
    let mut params = colibri_infer::Params::new();
    params.insert("wa", array![[3.0f32]].into_dyn());
    params.insert("wb", array![[10.0f32]].into_dyn());
    let graph = Graph {
        inputs: vec!["a".into(), "b".into()],
        outputs: vec!["pa".into(), "pb".into()],
        nodes: vec![
            Node {
                op: OpKind::Gemm { weights: "wa".into(), bias: None },
                inputs: vec!["a".into()],
                output: "pa".into(),
            },
            Node {
                op: OpKind::Gemm { weights: "wb".into(), bias: None },
                inputs: vec!["b".into()],
                output: "pb".into(),
            },
        ],
    };
    let module = IrModule::new(graph, params).unwrap();
    let mut container =
        IrContainer::new(module, TaskStyle::Classification, ContainerOptions::default()).unwrap();

    let frame = Frame::new()
        .with_column("a", array![1.0f32, 2.0])
        .unwrap()
        .with_column("b", array![5.0f32, 6.0])
        .unwrap();
    let from_frame = container.predict(frame).unwrap();

    let wide = array![[1.0f32, 5.0], [2.0, 6.0]];
    let from_wide = container.predict(wide.clone()).unwrap();

    assert_eq!(from_frame, array![3.0f32, 6.0]);
    assert_eq!(from_frame, from_wide);
    assert_eq!(container.predict_proba(wide).unwrap(), array![[50.0f32], [60.0]]);
}

#[test]
fn test_string_columns_encode_in_script_and_ir() {
    let mut params = colibri_infer::Params::new();
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
    let options = ContainerOptions {
        config: RuntimeConfig { max_string_length: Some(3), ..Default::default() },
        ..Default::default()
    };
    let strings =
        ArrayValue::from(ndarray::Array1::from(vec!["ab".to_string(), "c".to_string()]));
    let expected = array![[195.0f32], [99.0]].into_dyn();

    let module = ScriptModule::compile(&graph, &params, Device::Cpu).unwrap();
    let mut script =
        ScriptContainer::new(module, TaskStyle::Transform, options.clone()).unwrap();
    assert_eq!(script.transform(vec![strings.clone()]).unwrap(), expected);

    let module = IrModule::new(graph.clone(), params.clone()).unwrap();
    let mut ir = IrContainer::new(module, TaskStyle::Transform, options).unwrap();
    assert_eq!(ir.transform(vec![strings.clone()]).unwrap(), expected);

    // Without a configured width the column is rejected up front.
    let module = IrModule::new(graph, params).unwrap();
    let mut bare =
        IrContainer::new(module, TaskStyle::Transform, ContainerOptions::default()).unwrap();
    assert!(matches!(bare.transform(vec![strings]), Err(InferError::Config(_))));
}

#[test]
fn test_model_accessor_exposes_module() {
    let container = ir_container(TaskStyle::Classification, ContainerOptions::default());
    assert_eq!(container.model().input_names(), &["input".to_string()]);
    assert_eq!(
        container.model().output_names(),
        &["labels".to_string(), "proba".to_string()]
    );
}

#[test]
fn test_options_are_reported_by_accessors() {
    let options = ContainerOptions {
        n_threads: Some(3),
        batch_size: Some(8),
        ..Default::default()
    };
    let container = ir_container(TaskStyle::Regression, options);
    assert_eq!(container.style(), TaskStyle::Regression);
    assert_eq!(container.n_threads(), Some(3));
    assert_eq!(container.batch_size(), Some(8));
}

#[test]
fn test_eager_to_device_cpu_keeps_results() {
    let (graph, params) = regression_graph();
    let module = EagerModule::new(graph, &params, Device::Cpu).unwrap();
    let mut container =
        EagerContainer::new(module, TaskStyle::Regression, ContainerOptions::default()).unwrap();
    let x = array![[1.0f32, 1.0], [3.0, 0.0]];
    let before = container.predict(x.clone()).unwrap();
    container.to_device(Device::Cpu).unwrap();
    let after = container.predict(x).unwrap();
    assert_eq!(before, array![3.5f32, 6.5]);
    assert_eq!(before, after);
}

#[test]
fn test_aot_batch_size_option_must_match_module() {
    let (graph, params) = regression_graph();
    let module = AotModule::compile(
        graph.clone(),
        params.clone(),
        4,
        vec![2],
        DeviceContext::new(Device::Cpu),
    )
    .unwrap();
    let result = AotContainer::new(
        module,
        TaskStyle::Regression,
        ContainerOptions { batch_size: Some(2), ..Default::default() },
    );
    assert!(matches!(result, Err(InferError::Config(_))));

    let module =
        AotModule::compile(graph, params, 4, vec![2], DeviceContext::new(Device::Cpu)).unwrap();
    let container =
        AotContainer::new(module, TaskStyle::Regression, ContainerOptions::default()).unwrap();
    assert_eq!(container.batch_size(), Some(4));
}
