//! 拓扑构建与预处理的错误类型。

use std::fmt;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// 网络的两条臂。
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Arm {
    Encoder,
    Decoder,
}

impl fmt::Display for Arm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arm::Encoder => f.write_str("encoder"),
            Arm::Decoder => f.write_str("decoder"),
        }
    }
}

/// 配置错误。所有变体都在构建任何层之前产生。
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("depth must be in 1..={max}, but got `{0}`", max = crate::topo::config::MAX_DEPTH)]
    InvalidDepth(usize),
    #[error("max_filter must be at least 1, but got `{0}`")]
    InvalidMaxFilter(usize),
    #[error("downsize_filters_factor must be a finite positive number, but got `{0}`")]
    InvalidDownsizeFactor(f64),
    #[error("dropout must be in [0, 1), but got `{0}`")]
    InvalidDropout(f64),
    #[error("initial_learning_rate must be a finite positive number, but got `{0}`")]
    InvalidLearningRate(f64),
    #[error("num_outputs must be at least 1, but got `{0}`")]
    InvalidNumOutputs(usize),
    /// 形状类参数中出现了0。
    #[error("`{field}` must not contain zero")]
    ZeroExtent { field: &'static str },
    /// 倍增因子为0（按位异或策略下`2 ^ 2 == 0`）。
    #[error("{arm} level {level}: doubling factor for exponent {exponent} is zero")]
    ZeroDoublingFactor {
        arm: Arm,
        level: usize,
        exponent: usize,
    },
    /// 截断后的滤波器个数小于1。
    #[error("{arm} level {level}: filter count truncates to {filters}, expected at least 1")]
    NonPositiveFilters { arm: Arm, level: usize, filters: f64 },
    /// 滤波器个数超过上限。
    #[error("{arm} level {level}: filter count {filters} exceeds the limit of {max}", max = crate::topo::config::MAX_FILTERS)]
    TooManyFilters { arm: Arm, level: usize, filters: f64 },
    /// 空间尺寸在池化/上采样/卷积后无法与跳跃连接对齐。
    #[error("{arm} level {level}, axis {axis}: {detail}")]
    SpatialMismatch {
        arm: Arm,
        level: usize,
        axis: usize,
        detail: String,
    },
    /// 多个输出分支同时匹配。
    #[error("output type `{output_type}` with {num_outputs} outputs matches more than one output branch")]
    AmbiguousOutput {
        output_type: &'static str,
        num_outputs: usize,
    },
    /// 单通道softmax没有意义。
    #[error("categorical_label output needs at least 2 output channels")]
    SingleChannelSoftmax,
    #[error("config is not valid JSON: {0}")]
    Json(#[from] json::Error),
    #[error("missing required field `{0}`")]
    MissingField(&'static str),
    #[error("unknown field `{0}`")]
    UnknownField(String),
    /// 字段类型或取值错误。
    #[error("field `{field}`: {reason}")]
    InvalidField { field: String, reason: String },
}

/// 预处理错误。
#[derive(Debug, Error)]
pub enum PrepError {
    #[error("io error on `{}`: {source}", path.display())]
    Io { path: PathBuf, source: io::Error },
    #[error("cannot read nifti `{}`: {source}", path.display())]
    ReadNifti {
        path: PathBuf,
        source: nifti::NiftiError,
    },
    #[error("cannot write nifti `{}`: {source}", path.display())]
    WriteNifti {
        path: PathBuf,
        source: nifti::NiftiError,
    },
    #[error("cannot read npy `{}`: {source}", path.display())]
    ReadNpy {
        path: PathBuf,
        source: ndarray_npy::ReadNpyError,
    },
    #[error("cannot write npy `{}`: {source}", path.display())]
    WriteNpy {
        path: PathBuf,
        source: ndarray_npy::WriteNpyError,
    },
    /// 只支持`.nii`、`.nii.gz`与`.npy`。
    #[error("unsupported volume format: `{}`", .0.display())]
    UnsupportedFormat(PathBuf),
    #[error("mask shape {mask:?} does not match volume shape {volume:?}")]
    MaskShape { volume: Vec<usize>, mask: Vec<usize> },
    #[error("mask selects no voxels")]
    EmptyMask,
    /// 标准差为0或非有限值，无法归一化。
    #[error("cannot normalize, standard deviation is {std}")]
    ZeroVariance { std: f64 },
    #[error("cannot walk directory: {0}")]
    Walk(#[from] walkdir::Error),
    #[error("command template is empty")]
    EmptyCommand,
    #[error("cannot spawn `{command}`: {source}")]
    Spawn { command: String, source: io::Error },
    /// 工作线程在返回结果前异常退出。
    #[error("worker thread exited without a result")]
    WorkerLost,
    /// 外部命令返回非零状态（`status`为`None`表示被信号终止）。
    #[error("`{command}` failed ({}): {stderr}", exit_status(.status))]
    CommandFailed {
        command: String,
        status: Option<i32>,
        stderr: String,
    },
}

fn exit_status(status: &Option<i32>) -> String {
    match *status {
        Some(code) => format!("exit status {code}"),
        None => "terminated by a signal".to_owned(),
    }
}

impl PrepError {
    #[inline]
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
