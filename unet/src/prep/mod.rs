//! 体数据预处理：N4偏置场校正、零均值归一化与目录批处理。

pub mod batch;
pub mod bias;
pub mod log;
pub mod normalize;
pub mod volume;

pub use batch::{collect_volumes, Batch, BatchReport, FileReport, Outcome, Preprocessor};
pub use bias::N4BiasCorrection;
pub use log::AccTimer;
pub use normalize::{zero_mean_normalize, Stats, ZeroMeanNormalization};
pub use volume::{read_volume, squeeze, suffixed_path, write_volume, Volume, VolumeFormat};
