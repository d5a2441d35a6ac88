//! 输出头：输出类型、终端激活与优化目标的绑定策略。

use super::layer::Activation;
use crate::error::ConfigError;
use ndarray::{ArrayBase, Data, Dimension, Zip};
use std::str::FromStr;

/// Dice系数的平滑项。
pub const DICE_SMOOTH: f64 = 1.0;

/// 输出类型选择器。
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum OutputType {
    /// 线性输出。
    Regression,
    /// sigmoid输出，以Dice系数为损失。
    BinaryLabel,
    /// softmax输出，需要至少2个输出通道；`num_outputs == 1`时构建失败（`SingleChannelSoftmax`）。
    CategoricalLabel,
}

impl OutputType {
    pub fn as_str(self) -> &'static str {
        match self {
            OutputType::Regression => "regression",
            OutputType::BinaryLabel => "binary_label",
            OutputType::CategoricalLabel => "categorical_label",
        }
    }
}

impl FromStr for OutputType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "regression" => Ok(OutputType::Regression),
            "binary_label" => Ok(OutputType::BinaryLabel),
            "categorical_label" => Ok(OutputType::CategoricalLabel),
            _ => Err(format!("`{s}` is not a known output type")),
        }
    }
}

/// 输出分支的匹配规则。
#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
pub enum OutputMatching {
    /// 只看输出类型。
    #[default]
    Explicit,
    /// 旧规则：`num_outputs > 1`同时命中两个标签分支，命中多个分支时拒绝。
    Legacy,
}

impl FromStr for OutputMatching {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "explicit" => Ok(OutputMatching::Explicit),
            "legacy" => Ok(OutputMatching::Legacy),
            _ => Err(format!("`{s}` is not a known output matching rule")),
        }
    }
}

/// 损失函数。
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Loss {
    MeanSquaredError,
    /// Dice系数取负。
    DiceCoefficient { smooth: f64 },
    CategoricalCrossEntropy,
}

impl Loss {
    pub fn name(&self) -> &'static str {
        match self {
            Loss::MeanSquaredError => "mean_squared_error",
            Loss::DiceCoefficient { .. } => "dice_coef_loss",
            Loss::CategoricalCrossEntropy => "categorical_crossentropy",
        }
    }
}

/// 训练期间报告的指标。
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Metric {
    MeanSquaredError,
    DiceCoefficient,
    CategoricalAccuracy,
}

impl Metric {
    pub fn name(self) -> &'static str {
        match self {
            Metric::MeanSquaredError => "mean_squared_error",
            Metric::DiceCoefficient => "dice_coef",
            Metric::CategoricalAccuracy => "categorical_accuracy",
        }
    }
}

/// 优化器。
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Optimizer {
    Nadam { learning_rate: f64 },
}

impl Optimizer {
    pub fn name(&self) -> &'static str {
        match self {
            Optimizer::Nadam { .. } => "nadam",
        }
    }

    pub fn learning_rate(&self) -> f64 {
        match *self {
            Optimizer::Nadam { learning_rate } => learning_rate,
        }
    }
}

/// 交给后端编译的优化目标。
#[derive(Clone, Debug, PartialEq)]
pub struct Objective {
    pub optimizer: Optimizer,
    pub loss: Loss,
    pub metrics: Vec<Metric>,
}

/// 选定的输出头（尚未连接到图中）。
#[derive(Clone, Debug, PartialEq)]
pub struct HeadPlan {
    pub output_type: OutputType,
    /// 终端激活；回归输出没有终端激活节点。
    pub activation: Option<Activation>,
    pub objective: Objective,
}

impl HeadPlan {
    /// 按输出类型选择输出头。
    pub fn select(
        output_type: OutputType,
        num_outputs: usize,
        matching: OutputMatching,
        learning_rate: f64,
    ) -> Result<Self, ConfigError> {
        if matching == OutputMatching::Legacy {
            let multi = num_outputs > 1;
            let hits = [
                output_type == OutputType::Regression,
                output_type == OutputType::BinaryLabel || multi,
                output_type == OutputType::CategoricalLabel || multi,
            ];
            if hits.iter().filter(|&&h| h).count() > 1 {
                return Err(ConfigError::AmbiguousOutput {
                    output_type: output_type.as_str(),
                    num_outputs,
                });
            }
        }

        let optimizer = Optimizer::Nadam { learning_rate };
        let (activation, loss, metric) = match output_type {
            OutputType::Regression => (None, Loss::MeanSquaredError, Metric::MeanSquaredError),
            OutputType::BinaryLabel => (
                Some(Activation::Sigmoid),
                Loss::DiceCoefficient {
                    smooth: DICE_SMOOTH,
                },
                Metric::DiceCoefficient,
            ),
            OutputType::CategoricalLabel => {
                if num_outputs < 2 {
                    return Err(ConfigError::SingleChannelSoftmax);
                }
                (
                    Some(Activation::Softmax),
                    Loss::CategoricalCrossEntropy,
                    Metric::CategoricalAccuracy,
                )
            }
        };
        Ok(Self {
            output_type,
            activation,
            objective: Objective {
                optimizer,
                loss,
                metrics: vec![metric],
            },
        })
    }
}

/// Dice系数：`(2·Σ(t·p) + smooth) / (Σt + Σp + smooth)`。
///
/// 两个数组的形状必须一致，否则panic。
pub fn dice_coefficient<S1, S2, D>(
    truth: &ArrayBase<S1, D>,
    pred: &ArrayBase<S2, D>,
    smooth: f64,
) -> f64
where
    S1: Data<Elem = f32>,
    S2: Data<Elem = f32>,
    D: Dimension,
{
    let mut intersection = 0.0_f64;
    let mut sum_truth = 0.0_f64;
    let mut sum_pred = 0.0_f64;
    Zip::from(truth).and(pred).for_each(|&t, &p| {
        intersection += t as f64 * p as f64;
        sum_truth += t as f64;
        sum_pred += p as f64;
    });
    (2.0 * intersection + smooth) / (sum_truth + sum_pred + smooth)
}

/// Dice损失，即Dice系数取负。
#[inline]
pub fn dice_loss<S1, S2, D>(truth: &ArrayBase<S1, D>, pred: &ArrayBase<S2, D>, smooth: f64) -> f64
where
    S1: Data<Elem = f32>,
    S2: Data<Elem = f32>,
    D: Dimension,
{
    -dice_coefficient(truth, pred, smooth)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_explicit_matching_ignores_channel_count() {
        let head =
            HeadPlan::select(OutputType::BinaryLabel, 3, OutputMatching::Explicit, 1e-5).unwrap();
        assert_eq!(head.activation, Some(Activation::Sigmoid));
        assert_eq!(head.objective.metrics, vec![Metric::DiceCoefficient]);
    }

    #[test]
    fn test_legacy_matching_rejects_overlap() {
        for ty in [
            OutputType::Regression,
            OutputType::BinaryLabel,
            OutputType::CategoricalLabel,
        ] {
            let err = HeadPlan::select(ty, 2, OutputMatching::Legacy, 1e-5).unwrap_err();
            assert!(matches!(err, ConfigError::AmbiguousOutput { num_outputs: 2, .. }));
        }
        let head =
            HeadPlan::select(OutputType::Regression, 1, OutputMatching::Legacy, 1e-5).unwrap();
        assert_eq!(head.activation, None);
        assert_eq!(head.objective.loss, Loss::MeanSquaredError);
    }

    #[test]
    fn test_single_channel_softmax() {
        let err = HeadPlan::select(OutputType::CategoricalLabel, 1, OutputMatching::Explicit, 1e-5)
            .unwrap_err();
        assert!(matches!(err, ConfigError::SingleChannelSoftmax));
        let head = HeadPlan::select(OutputType::CategoricalLabel, 2, OutputMatching::Explicit, 1e-5)
            .unwrap();
        assert_eq!(head.activation, Some(Activation::Softmax));
    }

    #[test]
    fn test_dice_coefficient() {
        let t = array![1.0_f32, 1.0, 0.0, 0.0];
        let p = array![1.0_f32, 0.0, 1.0, 0.0];
        // (2*1 + 1) / (2 + 2 + 1)
        assert!((dice_coefficient(&t, &p, DICE_SMOOTH) - 0.6).abs() < 1e-12);
        assert!((dice_coefficient(&t, &t, 0.0) - 1.0).abs() < 1e-12);
        assert!((dice_loss(&t, &p, DICE_SMOOTH) + 0.6).abs() < 1e-12);
    }
}
