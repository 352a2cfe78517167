pub mod batch;
pub mod bundle;
pub mod config;
pub mod containers;
pub mod device;
pub mod engines;
pub mod error;
pub mod graph;
pub mod input;
pub mod style;
pub mod threads;

pub use batch::BatchedContainer;
pub use bundle::{AnyContainer, BackendKind};
pub use config::{ContainerOptions, RuntimeConfig};
pub use containers::{AotContainer, EagerContainer, IrContainer, ScriptContainer};
pub use device::Device;
pub use engines::aot::{AotModule, DeviceArray, DeviceContext, KernelLibrary, KernelSpec};
pub use engines::eager::EagerModule;
pub use engines::ir::{IrModule, KernelTable};
pub use engines::script::{ScriptModule, ScriptProgram};
pub use error::InferError;
pub use graph::{Graph, Node, OpKind, Params};
pub use input::PredictInput;
pub use style::{
    AnomalyDetector, Classifier, Container, Predictor, TaskStyle, Transformer,
};
