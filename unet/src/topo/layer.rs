//! 图节点：层的种类、参数与输出形状。

use std::fmt;
use std::str::FromStr;

/// 图中节点的编号，即节点在arena中的下标。
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    #[inline]
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// 通道在最后一维的张量形状（不含batch维）。
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct Shape {
    pub spatial: [usize; 3],
    pub channels: usize,
}

impl Shape {
    #[inline]
    pub fn new(spatial: [usize; 3], channels: usize) -> Self {
        Self { spatial, channels }
    }

    #[inline]
    pub fn to_vec(self) -> Vec<usize> {
        let [x, y, z] = self.spatial;
        vec![x, y, z, self.channels]
    }
}

impl From<[usize; 4]> for Shape {
    #[inline]
    fn from(s: [usize; 4]) -> Self {
        Shape::new([s[0], s[1], s[2]], s[3])
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [x, y, z] = self.spatial;
        write!(f, "({x}, {y}, {z}, {})", self.channels)
    }
}

/// 激活函数。
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Activation {
    Linear,
    Relu,
    Elu,
    Tanh,
    Sigmoid,
    Softmax,
}

impl Activation {
    pub fn as_str(self) -> &'static str {
        match self {
            Activation::Linear => "linear",
            Activation::Relu => "relu",
            Activation::Elu => "elu",
            Activation::Tanh => "tanh",
            Activation::Sigmoid => "sigmoid",
            Activation::Softmax => "softmax",
        }
    }
}

impl FromStr for Activation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "linear" => Ok(Activation::Linear),
            "relu" => Ok(Activation::Relu),
            "elu" => Ok(Activation::Elu),
            "tanh" => Ok(Activation::Tanh),
            "sigmoid" => Ok(Activation::Sigmoid),
            "softmax" => Ok(Activation::Softmax),
            _ => Err(format!("`{s}` is not a known activation")),
        }
    }
}

/// 卷积的边界填充方式。
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Padding {
    /// 输出与输入空间尺寸相同。
    Same,
    /// 不填充，每个轴缩小`k - 1`。
    Valid,
}

impl Padding {
    pub fn as_str(self) -> &'static str {
        match self {
            Padding::Same => "same",
            Padding::Valid => "valid",
        }
    }

    /// 卷积核为`kernel`时某一轴的输出长度。若结果不为正则返回`None`。
    #[inline]
    pub fn conv_extent(self, extent: usize, kernel: usize) -> Option<usize> {
        match self {
            Padding::Same => Some(extent),
            Padding::Valid => extent.checked_sub(kernel - 1).filter(|&e| e > 0),
        }
    }
}

impl FromStr for Padding {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "same" => Ok(Padding::Same),
            "valid" => Ok(Padding::Valid),
            _ => Err(format!("`{s}` is not a known padding mode")),
        }
    }
}

/// 层的种类及其参数。
#[derive(Clone, Debug, PartialEq)]
pub enum LayerKind {
    Input,
    Conv3d {
        filters: usize,
        kernel: [usize; 3],
        activation: Activation,
        padding: Padding,
    },
    MaxPool3d {
        pool_size: [usize; 3],
    },
    UpSample3d {
        size: [usize; 3],
    },
    /// 按`axis`拼接；通道轴计入batch维时为4。
    Concatenate {
        axis: usize,
    },
    Dropout {
        rate: f64,
    },
    BatchNorm,
    Activation(Activation),
}

impl LayerKind {
    pub fn name(&self) -> &'static str {
        match self {
            LayerKind::Input => "input",
            LayerKind::Conv3d { .. } => "conv3d",
            LayerKind::MaxPool3d { .. } => "max_pool3d",
            LayerKind::UpSample3d { .. } => "up_sample3d",
            LayerKind::Concatenate { .. } => "concatenate",
            LayerKind::Dropout { .. } => "dropout",
            LayerKind::BatchNorm => "batch_norm",
            LayerKind::Activation(_) => "activation",
        }
    }

    #[inline]
    pub fn is_dropout(&self) -> bool {
        matches!(self, LayerKind::Dropout { .. })
    }

    #[inline]
    pub fn is_batch_norm(&self) -> bool {
        matches!(self, LayerKind::BatchNorm)
    }

    /// 卷积层的输出通道数；其它层返回`None`。
    #[inline]
    pub fn filters(&self) -> Option<usize> {
        match self {
            LayerKind::Conv3d { filters, .. } => Some(*filters),
            _ => None,
        }
    }
}

/// 一个计算节点。`inputs`中的编号都严格小于`id`。
#[derive(Clone, Debug, PartialEq)]
pub struct LayerSpec {
    pub id: NodeId,
    pub kind: LayerKind,
    pub inputs: Vec<NodeId>,
    pub shape: Shape,
}
