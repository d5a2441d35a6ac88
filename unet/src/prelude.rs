pub use super::error::{Arm, ConfigError, PrepError};
pub use super::prep::{
    collect_volumes, read_volume, write_volume, AccTimer, Batch, BatchReport, N4BiasCorrection,
    Outcome, Preprocessor, ZeroMeanNormalization,
};
pub use super::topo::head::{dice_coefficient, dice_loss, DICE_SMOOTH};
pub use super::topo::{
    Activation, Backend, DoublingPolicy, Graph, OutputMatching, OutputType, Padding,
    SummaryBackend, TopologyBuilder, UNetConfig,
};
