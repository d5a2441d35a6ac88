//! 参数统计后端：逐层计算参数个数并生成摘要表。

use super::backend::Backend;
use super::head::Objective;
use super::layer::{LayerKind, LayerSpec, Shape};
use std::convert::Infallible;
use std::fmt;

/// 摘要表的一行。
#[derive(Clone, Debug, PartialEq)]
pub struct SummaryRow {
    pub name: String,
    pub shape: Shape,
    pub trainable: usize,
    pub non_trainable: usize,
    pub inputs: Vec<usize>,
}

/// 模型摘要。
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Summary {
    pub rows: Vec<SummaryRow>,
    pub objective: Option<String>,
}

impl Summary {
    pub fn trainable(&self) -> usize {
        self.rows
            .iter()
            .fold(0usize, |acc, r| acc.saturating_add(r.trainable))
    }

    pub fn non_trainable(&self) -> usize {
        self.rows
            .iter()
            .fold(0usize, |acc, r| acc.saturating_add(r.non_trainable))
    }

    pub fn total(&self) -> usize {
        self.trainable().saturating_add(self.non_trainable())
    }
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{:-<88}", "")?;
        writeln!(
            f,
            "{:<6}{:<26}{:<24}{:>12}  {}",
            "id", "layer", "output shape", "params", "inputs"
        )?;
        writeln!(f, "{:=<88}", "")?;
        for (i, r) in self.rows.iter().enumerate() {
            writeln!(
                f,
                "{:<6}{:<26}{:<24}{:>12}  {:?}",
                i,
                r.name,
                r.shape.to_string(),
                r.trainable.saturating_add(r.non_trainable),
                r.inputs
            )?;
        }
        writeln!(f, "{:=<88}", "")?;
        writeln!(f, "Total params: {}", self.total())?;
        writeln!(f, "Trainable params: {}", self.trainable())?;
        writeln!(f, "Non-trainable params: {}", self.non_trainable())?;
        if let Some(obj) = &self.objective {
            writeln!(f, "Objective: {obj}")?;
        }
        write!(f, "{:-<88}", "")
    }
}

/// 计算参数个数的后端。张量句柄为（节点下标，形状）。
#[derive(Default)]
pub struct SummaryBackend {
    rows: Vec<SummaryRow>,
}

impl SummaryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

/// 返回（可训练参数，不可训练参数）。
fn params(kind: &LayerKind, inputs: &[(usize, Shape)]) -> (usize, usize) {
    match kind {
        LayerKind::Conv3d { filters, kernel, .. } => {
            let cin = inputs
                .iter()
                .fold(0usize, |acc, (_, s)| acc.saturating_add(s.channels));
            let weights = kernel
                .iter()
                .chain([&cin, filters])
                .fold(1usize, |acc, &n| acc.saturating_mul(n));
            (weights.saturating_add(*filters), 0)
        }
        // gamma、beta可训练；滑动均值与方差不可训练。
        LayerKind::BatchNorm => {
            let c = inputs.first().map(|(_, s)| s.channels).unwrap_or(0);
            (c.saturating_mul(2), c.saturating_mul(2))
        }
        _ => (0, 0),
    }
}

impl Backend for SummaryBackend {
    type Tensor = (usize, Shape);
    type Model = Summary;
    type Error = Infallible;

    fn input(&mut self, spec: &LayerSpec) -> Result<Self::Tensor, Infallible> {
        self.rows.push(SummaryRow {
            name: spec.kind.name().to_owned(),
            shape: spec.shape,
            trainable: 0,
            non_trainable: 0,
            inputs: vec![],
        });
        Ok((spec.id.index(), spec.shape))
    }

    fn layer(
        &mut self,
        spec: &LayerSpec,
        inputs: &[Self::Tensor],
    ) -> Result<Self::Tensor, Infallible> {
        let (trainable, non_trainable) = params(&spec.kind, inputs);
        let name = match &spec.kind {
            LayerKind::Activation(a) => format!("activation({})", a.as_str()),
            LayerKind::Conv3d { kernel, .. } => {
                format!("conv3d({}x{}x{})", kernel[0], kernel[1], kernel[2])
            }
            k => k.name().to_owned(),
        };
        self.rows.push(SummaryRow {
            name,
            shape: spec.shape,
            trainable,
            non_trainable,
            inputs: inputs.iter().map(|(i, _)| *i).collect(),
        });
        Ok((spec.id.index(), spec.shape))
    }

    fn compile(
        &mut self,
        _input: Self::Tensor,
        _output: Self::Tensor,
        objective: Option<&Objective>,
    ) -> Result<Summary, Infallible> {
        let objective = objective.map(|o| {
            let metrics: Vec<&str> = o.metrics.iter().map(|m| m.name()).collect();
            format!(
                "{} (lr = {}), loss = {}, metrics = [{}]",
                o.optimizer.name(),
                o.optimizer.learning_rate(),
                o.loss.name(),
                metrics.join(", ")
            )
        });
        Ok(Summary {
            rows: std::mem::take(&mut self.rows),
            objective,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topo::config::UNetConfig;
    use crate::topo::head::OutputType;
    use crate::topo::layer::{Activation, Padding};
    use crate::topo::TopologyBuilder;

    fn summarize(depth: usize, batch_norm: bool) -> Summary {
        let cfg = UNetConfig::builder([16, 16, 16, 1], OutputType::Regression)
            .depth(depth)
            .max_filter(16)
            .batch_norm(batch_norm)
            .build()
            .unwrap();
        let g = TopologyBuilder::new(cfg).build().unwrap();
        match g.lower(&mut SummaryBackend::new()) {
            Ok(s) => s,
            Err(e) => match e {},
        }
    }

    #[test]
    fn test_single_level_params() {
        // 16 div 2 = 8 filters: conv(1->8), conv(8->16), 1x1 conv(16->1)
        let s = summarize(1, false);
        let expected = (27 * 8 + 8) + (27 * 8 * 16 + 16) + (16 + 1);
        assert_eq!(s.trainable(), expected);
        assert_eq!(s.non_trainable(), 0);
        assert_eq!(s.rows.len(), 4);
        assert!(s.objective.unwrap().contains("mean_squared_error"));
    }

    #[test]
    fn test_batch_norm_params() {
        let plain = summarize(2, false);
        let bn = summarize(2, true);
        // 编码器输出8、16通道，解码器输出4通道。
        let extra = 2 * (8 + 16 + 4);
        assert_eq!(bn.trainable(), plain.trainable() + extra);
        assert_eq!(bn.non_trainable(), extra);
        assert!(bn.to_string().contains("Non-trainable params"));
    }

    #[test]
    fn test_param_counts_saturate() {
        let conv = LayerKind::Conv3d {
            filters: usize::MAX / 2,
            kernel: [3, 3, 3],
            activation: Activation::Relu,
            padding: Padding::Same,
        };
        let wide = [(0, Shape::new([4, 4, 4], usize::MAX / 2))];
        assert_eq!(params(&conv, &wide), (usize::MAX, 0));
        assert_eq!(
            params(&LayerKind::BatchNorm, &wide),
            (usize::MAX - 1, usize::MAX - 1)
        );

        let s = Summary {
            rows: vec![
                SummaryRow {
                    name: "conv3d".to_owned(),
                    shape: wide[0].1,
                    trainable: usize::MAX,
                    non_trainable: 0,
                    inputs: vec![],
                },
                SummaryRow {
                    name: "batch_normalization".to_owned(),
                    shape: wide[0].1,
                    trainable: 2,
                    non_trainable: 2,
                    inputs: vec![0],
                },
            ],
            objective: None,
        };
        assert_eq!(s.trainable(), usize::MAX);
        assert_eq!(s.total(), usize::MAX);
        assert!(s.to_string().contains(&format!("Total params: {}", usize::MAX)));
    }
}
