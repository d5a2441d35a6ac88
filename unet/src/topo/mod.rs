//! 3D U-Net拓扑：配置、规划、构建与后端降级。

pub mod backend;
pub mod builder;
pub mod config;
pub mod export;
pub mod head;
pub mod layer;
pub mod plan;
pub mod summary;

pub use backend::Backend;
pub use builder::{DecoderStage, EncoderStage, Graph, Head, TopologyBuilder};
pub use config::{DoublingPolicy, UNetConfig, UNetConfigBuilder, MAX_DEPTH, MAX_FILTERS};
pub use head::{Loss, Metric, Objective, Optimizer, OutputMatching, OutputType};
pub use layer::{Activation, LayerKind, LayerSpec, NodeId, Padding, Shape};
pub use plan::Plan;
pub use summary::{Summary, SummaryBackend};

impl Graph {
    /// 参数统计摘要。
    pub fn summary(&self) -> Summary {
        match self.lower(&mut SummaryBackend::new()) {
            Ok(s) => s,
            Err(e) => match e {},
        }
    }
}
