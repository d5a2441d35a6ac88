//! 构建前的规划：逐层计算滤波器个数与空间尺寸，一次性完成全部校验。

use super::config::{UNetConfig, MAX_FILTERS};
use super::head::HeadPlan;
use crate::error::{Arm, ConfigError};

/// 编码器一层的规划。
#[derive(Clone, Debug, PartialEq)]
pub struct EncoderLevelPlan {
    pub level: usize,
    /// 两个卷积的输出通道数，分别为`f`与`2f`。
    pub filters: [usize; 2],
    /// 池化后（若有）的空间尺寸。
    pub pooled: [usize; 3],
    /// 两个卷积各自输出的空间尺寸。
    pub conv_spatial: [[usize; 3]; 2],
}

impl EncoderLevelPlan {
    /// 本层输出的空间尺寸。
    #[inline]
    pub fn spatial(&self) -> [usize; 3] {
        self.conv_spatial[1]
    }
}

/// 解码器一层的规划。
#[derive(Clone, Debug, PartialEq)]
pub struct DecoderLevelPlan {
    pub level: usize,
    /// 跳跃连接对应的编码器层级。
    pub skip_level: usize,
    /// 两个卷积的输出通道数，分别为`f`与`f / 2`。
    pub filters: [usize; 2],
    /// 上采样（拼接）后的空间尺寸。
    pub upsampled: [usize; 3],
    pub conv_spatial: [[usize; 3]; 2],
}

impl DecoderLevelPlan {
    #[inline]
    pub fn spatial(&self) -> [usize; 3] {
        self.conv_spatial[1]
    }
}

/// 完整的构建规划。构造成功后，组装过程不会再失败。
#[derive(Clone, Debug, PartialEq)]
pub struct Plan {
    pub encoder: Vec<EncoderLevelPlan>,
    pub decoder: Vec<DecoderLevelPlan>,
    pub head: HeadPlan,
}

impl Plan {
    pub fn new(cfg: &UNetConfig) -> Result<Self, ConfigError> {
        let depth = cfg.depth();
        let input = cfg.input_shape();
        let mut spatial = [input[0], input[1], input[2]];

        let mut encoder = Vec::with_capacity(depth);
        for level in 0..depth {
            let f = filter_count(cfg, Arm::Encoder, level, depth - level)?;
            let pooled = if level == 0 {
                spatial
            } else {
                pool(cfg, level, spatial)?
            };
            let conv_spatial = conv_pair(cfg, Arm::Encoder, level, pooled)?;
            spatial = conv_spatial[1];
            encoder.push(EncoderLevelPlan {
                level,
                filters: [f, 2 * f],
                pooled,
                conv_spatial,
            });
        }

        let mut decoder = Vec::with_capacity(depth.saturating_sub(1));
        for level in 1..depth {
            let f = filter_count(cfg, Arm::Decoder, level, level)?;
            let half = f / 2;
            if half < 1 {
                return Err(ConfigError::NonPositiveFilters {
                    arm: Arm::Decoder,
                    level,
                    filters: half as f64,
                });
            }
            let skip_level = depth - level - 1;
            let upsampled = upsample(cfg, level, spatial, encoder[skip_level].spatial())?;
            let conv_spatial = conv_pair(cfg, Arm::Decoder, level, upsampled)?;
            spatial = conv_spatial[1];
            decoder.push(DecoderLevelPlan {
                level,
                skip_level,
                filters: [f, half],
                upsampled,
                conv_spatial,
            });
        }

        let head = HeadPlan::select(
            cfg.output_type(),
            cfg.num_outputs(),
            cfg.output_matching(),
            cfg.initial_learning_rate(),
        )?;

        Ok(Self {
            encoder,
            decoder,
            head,
        })
    }

    /// 网络输出的空间尺寸。
    pub fn output_spatial(&self) -> [usize; 3] {
        match self.decoder.last() {
            Some(d) => d.spatial(),
            None => self.encoder[self.encoder.len() - 1].spatial(),
        }
    }
}

/// `trunc((max_filter div doubling(exponent)) / downsize_filters_factor)`。
fn filter_count(
    cfg: &UNetConfig,
    arm: Arm,
    level: usize,
    exponent: usize,
) -> Result<usize, ConfigError> {
    let factor = match cfg.doubling().factor(exponent) {
        Some(0) => {
            return Err(ConfigError::ZeroDoublingFactor {
                arm,
                level,
                exponent,
            })
        }
        Some(f) => f,
        // 溢出：因子必然大于max_filter。
        None => {
            return Err(ConfigError::NonPositiveFilters {
                arm,
                level,
                filters: 0.0,
            })
        }
    };
    let filters = ((cfg.max_filter() / factor) as f64 / cfg.downsize_filters_factor()).trunc();
    if filters < 1.0 {
        return Err(ConfigError::NonPositiveFilters {
            arm,
            level,
            filters,
        });
    }
    // 编码器第二个卷积为`2f`，因此上限按`2f`计。
    if filters * 2.0 > MAX_FILTERS as f64 {
        return Err(ConfigError::TooManyFilters {
            arm,
            level,
            filters,
        });
    }
    Ok(filters as usize)
}

fn conv_pair(
    cfg: &UNetConfig,
    arm: Arm,
    level: usize,
    spatial: [usize; 3],
) -> Result<[[usize; 3]; 2], ConfigError> {
    let kernel = cfg.filter_shape();
    let mut out = [spatial; 2];
    let mut prev = spatial;
    for step in out.iter_mut() {
        for axis in 0..3 {
            step[axis] = cfg
                .padding()
                .conv_extent(prev[axis], kernel[axis])
                .ok_or_else(|| ConfigError::SpatialMismatch {
                    arm,
                    level,
                    axis,
                    detail: format!(
                        "extent {} is too small for a kernel of {} with valid padding",
                        prev[axis], kernel[axis]
                    ),
                })?;
        }
        prev = *step;
    }
    Ok(out)
}

fn pool(cfg: &UNetConfig, level: usize, spatial: [usize; 3]) -> Result<[usize; 3], ConfigError> {
    let size = cfg.pool_size();
    let mut out = spatial;
    for axis in 0..3 {
        out[axis] = spatial[axis] / size[axis];
        if out[axis] == 0 {
            return Err(ConfigError::SpatialMismatch {
                arm: Arm::Encoder,
                level,
                axis,
                detail: format!(
                    "extent {} cannot be pooled by {}",
                    spatial[axis], size[axis]
                ),
            });
        }
    }
    Ok(out)
}

fn upsample(
    cfg: &UNetConfig,
    level: usize,
    spatial: [usize; 3],
    skip: [usize; 3],
) -> Result<[usize; 3], ConfigError> {
    let size = cfg.pool_size();
    let mut out = spatial;
    for axis in 0..3 {
        out[axis] = spatial[axis] * size[axis];
        if out[axis] != skip[axis] {
            return Err(ConfigError::SpatialMismatch {
                arm: Arm::Decoder,
                level,
                axis,
                detail: format!(
                    "upsampled extent {} does not match skip connection extent {}",
                    out[axis], skip[axis]
                ),
            });
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topo::config::DoublingPolicy;
    use crate::topo::head::OutputType;
    use crate::topo::layer::Padding;

    fn cfg(depth: usize) -> crate::topo::config::UNetConfigBuilder {
        UNetConfig::builder([64, 64, 64, 1], OutputType::Regression).depth(depth)
    }

    #[test]
    fn test_power_filters_depth4() {
        let plan = Plan::new(&cfg(4).build().unwrap()).unwrap();
        let enc: Vec<_> = plan.encoder.iter().map(|e| e.filters).collect();
        assert_eq!(enc, vec![[32, 64], [64, 128], [128, 256], [256, 512]]);
        let dec: Vec<_> = plan.decoder.iter().map(|d| d.filters).collect();
        assert_eq!(dec, vec![[256, 128], [128, 64], [64, 32]]);
        let skips: Vec<_> = plan.decoder.iter().map(|d| d.skip_level).collect();
        assert_eq!(skips, vec![2, 1, 0]);
        assert_eq!(plan.output_spatial(), [64, 64, 64]);
    }

    #[test]
    fn test_downsize_factor_truncates() {
        let plan = Plan::new(
            &cfg(2)
                .max_filter(100)
                .downsize_filters_factor(1.5)
                .build()
                .unwrap(),
        )
        .unwrap();
        // 100 div 4 = 25, 25 / 1.5 = 16.67
        assert_eq!(plan.encoder[0].filters, [16, 32]);
        // 100 div 2 = 50, 50 / 1.5 = 33.3
        assert_eq!(plan.encoder[1].filters, [33, 66]);
        assert_eq!(plan.decoder[0].filters, [33, 16]);
    }

    #[test]
    fn test_xor_depth1() {
        let plan = Plan::new(&cfg(1).doubling(DoublingPolicy::Xor).build().unwrap()).unwrap();
        // 512 div (2 ^ 1 = 3)
        assert_eq!(plan.encoder[0].filters, [170, 340]);
        assert!(plan.decoder.is_empty());
    }

    #[test]
    fn test_xor_zero_factor() {
        for depth in 2..8 {
            let err = Plan::new(&cfg(depth).doubling(DoublingPolicy::Xor).build().unwrap())
                .unwrap_err();
            assert!(matches!(
                err,
                ConfigError::ZeroDoublingFactor {
                    arm: Arm::Encoder,
                    exponent: 2,
                    ..
                }
            ));
        }
    }

    #[test]
    fn test_non_positive_filters() {
        let err = Plan::new(&cfg(4).max_filter(8).build().unwrap()).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::NonPositiveFilters {
                arm: Arm::Encoder,
                level: 0,
                ..
            }
        ));
        let err = Plan::new(&cfg(2).downsize_filters_factor(200.0).build().unwrap()).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::NonPositiveFilters { level: 0, filters, .. } if filters == 0.0
        ));
    }

    #[test]
    fn test_odd_extent_mismatch() {
        let c = UNetConfig::builder([30, 32, 32, 1], OutputType::Regression)
            .depth(3)
            .build()
            .unwrap();
        // 30 -> 15 -> 7, 7 * 2 = 14 != 15
        let err = Plan::new(&c).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::SpatialMismatch {
                arm: Arm::Decoder,
                axis: 0,
                ..
            }
        ));
    }

    #[test]
    fn test_valid_padding_mismatch() {
        let c = cfg(2).padding(Padding::Valid).build().unwrap();
        assert!(matches!(
            Plan::new(&c),
            Err(ConfigError::SpatialMismatch { .. })
        ));
        let flat = cfg(2)
            .padding(Padding::Valid)
            .filter_shape([1, 1, 1])
            .build()
            .unwrap();
        assert!(Plan::new(&flat).is_ok());
    }

    #[test]
    fn test_tiny_downsize_factor() {
        let c = UNetConfig::builder([16, 16, 16, 1], OutputType::Regression)
            .depth(1)
            .downsize_filters_factor(1e-300)
            .build()
            .unwrap();
        assert!(matches!(
            Plan::new(&c),
            Err(ConfigError::TooManyFilters { level: 0, .. })
        ));
        assert!(crate::topo::TopologyBuilder::new(c).build().is_err());

        // 深度1时f = max_filter / 2，2f恰好等于上限时仍可接受。
        let edge = cfg(1).max_filter(MAX_FILTERS).build().unwrap();
        assert_eq!(
            Plan::new(&edge).unwrap().encoder[0].filters,
            [MAX_FILTERS / 2, MAX_FILTERS]
        );
        let over = cfg(1).max_filter(MAX_FILTERS + 2).build().unwrap();
        assert!(matches!(
            Plan::new(&over),
            Err(ConfigError::TooManyFilters { arm: Arm::Encoder, .. })
        ));
    }
}
