//! U-Net配置。一个`UNetConfig`值一经构造即已通过校验。

use super::head::{OutputMatching, OutputType};
use super::layer::{Activation, Padding};
use crate::error::ConfigError;
use json::JsonValue;
use std::str::FromStr;

/// 默认深度。
pub const DEFAULT_DEPTH: usize = 4;

/// 深度上限：`2^depth`须能以`usize`表示。
pub const MAX_DEPTH: usize = usize::BITS as usize - 1;

/// 单层滤波器个数上限。
pub const MAX_FILTERS: usize = 1 << 24;

/// 默认最底层滤波器个数。
pub const DEFAULT_MAX_FILTER: usize = 512;

/// 默认初始学习率。
pub const DEFAULT_LEARNING_RATE: f64 = 1e-5;

/// 滤波器个数随层级变化的倍增因子`doubling(n)`。
#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
pub enum DoublingPolicy {
    /// `2^n`。
    #[default]
    Power,
    /// 按位异或`2 ^ n`，与旧实现逐位一致。`n == 2`时为0。
    Xor,
}

impl DoublingPolicy {
    /// 计算倍增因子。溢出时返回`None`。
    #[inline]
    pub fn factor(self, n: usize) -> Option<usize> {
        match self {
            DoublingPolicy::Power => u32::try_from(n).ok().and_then(|n| 2_usize.checked_pow(n)),
            DoublingPolicy::Xor => Some(2 ^ n),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DoublingPolicy::Power => "power",
            DoublingPolicy::Xor => "xor",
        }
    }
}

impl FromStr for DoublingPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "power" => Ok(DoublingPolicy::Power),
            "xor" => Ok(DoublingPolicy::Xor),
            _ => Err(format!("`{s}` is not a known doubling policy")),
        }
    }
}

/// 经过校验的U-Net配置。
#[derive(Clone, Debug, PartialEq)]
pub struct UNetConfig {
    input_shape: [usize; 4],
    output_type: OutputType,
    depth: usize,
    max_filter: usize,
    downsize_filters_factor: f64,
    pool_size: [usize; 3],
    filter_shape: [usize; 3],
    dropout: Option<f64>,
    batch_norm: bool,
    activation: Activation,
    padding: Padding,
    num_outputs: usize,
    initial_learning_rate: f64,
    doubling: DoublingPolicy,
    output_matching: OutputMatching,
}

impl UNetConfig {
    /// 以必填字段开始构造配置，其余字段取默认值。
    pub fn builder(input_shape: [usize; 4], output_type: OutputType) -> UNetConfigBuilder {
        UNetConfigBuilder {
            cfg: UNetConfig {
                input_shape,
                output_type,
                depth: DEFAULT_DEPTH,
                max_filter: DEFAULT_MAX_FILTER,
                downsize_filters_factor: 1.0,
                pool_size: [2, 2, 2],
                filter_shape: [3, 3, 3],
                dropout: None,
                batch_norm: false,
                activation: Activation::Relu,
                padding: Padding::Same,
                num_outputs: 1,
                initial_learning_rate: DEFAULT_LEARNING_RATE,
                doubling: DoublingPolicy::Power,
                output_matching: OutputMatching::Explicit,
            },
        }
    }

    /// 从JSON对象解析配置。未知字段、缺少必填字段、类型错误都会被拒绝。
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let doc = json::parse(text)?;
        if !doc.is_object() {
            return Err(ConfigError::InvalidField {
                field: "<root>".into(),
                reason: "expected a JSON object".into(),
            });
        }
        for (key, _) in doc.entries() {
            if !FIELDS.contains(&key) {
                return Err(ConfigError::UnknownField(key.to_owned()));
            }
        }

        let input_shape = usize_array::<4>(&doc, "input_shape")?
            .ok_or(ConfigError::MissingField("input_shape"))?;
        let output_type = parsed::<OutputType>(&doc, "output_type")?
            .ok_or(ConfigError::MissingField("output_type"))?;
        let mut b = UNetConfig::builder(input_shape, output_type);

        if let Some(v) = usize_field(&doc, "depth")? {
            b = b.depth(v);
        }
        if let Some(v) = usize_field(&doc, "max_filter")? {
            b = b.max_filter(v);
        }
        if let Some(v) = f64_field(&doc, "downsize_filters_factor")? {
            b = b.downsize_filters_factor(v);
        }
        if let Some(v) = usize_array::<3>(&doc, "pool_size")? {
            b = b.pool_size(v);
        }
        if let Some(v) = usize_array::<3>(&doc, "filter_shape")? {
            b = b.filter_shape(v);
        }
        // `null`与缺省同义：不使用dropout。
        if let Some(v) = f64_field(&doc, "dropout")? {
            b = b.dropout(Some(v));
        }
        if let Some(v) = bool_field(&doc, "batch_norm")? {
            b = b.batch_norm(v);
        }
        if let Some(v) = parsed::<Activation>(&doc, "activation")? {
            b = b.activation(v);
        }
        if let Some(v) = parsed::<Padding>(&doc, "padding")? {
            b = b.padding(v);
        }
        if let Some(v) = usize_field(&doc, "num_outputs")? {
            b = b.num_outputs(v);
        }
        if let Some(v) = f64_field(&doc, "initial_learning_rate")? {
            b = b.initial_learning_rate(v);
        }
        if let Some(v) = parsed::<DoublingPolicy>(&doc, "doubling")? {
            b = b.doubling(v);
        }
        if let Some(v) = parsed::<OutputMatching>(&doc, "output_matching")? {
            b = b.output_matching(v);
        }
        b.build()
    }

    #[inline]
    pub fn input_shape(&self) -> [usize; 4] {
        self.input_shape
    }

    #[inline]
    pub fn output_type(&self) -> OutputType {
        self.output_type
    }

    #[inline]
    pub fn depth(&self) -> usize {
        self.depth
    }

    #[inline]
    pub fn max_filter(&self) -> usize {
        self.max_filter
    }

    #[inline]
    pub fn downsize_filters_factor(&self) -> f64 {
        self.downsize_filters_factor
    }

    #[inline]
    pub fn pool_size(&self) -> [usize; 3] {
        self.pool_size
    }

    #[inline]
    pub fn filter_shape(&self) -> [usize; 3] {
        self.filter_shape
    }

    #[inline]
    pub fn dropout(&self) -> Option<f64> {
        self.dropout
    }

    #[inline]
    pub fn batch_norm(&self) -> bool {
        self.batch_norm
    }

    #[inline]
    pub fn activation(&self) -> Activation {
        self.activation
    }

    #[inline]
    pub fn padding(&self) -> Padding {
        self.padding
    }

    #[inline]
    pub fn num_outputs(&self) -> usize {
        self.num_outputs
    }

    #[inline]
    pub fn initial_learning_rate(&self) -> f64 {
        self.initial_learning_rate
    }

    #[inline]
    pub fn doubling(&self) -> DoublingPolicy {
        self.doubling
    }

    #[inline]
    pub fn output_matching(&self) -> OutputMatching {
        self.output_matching
    }
}

/// `UNetConfig`的构造器。只有`build()`会校验。
#[derive(Clone, Debug)]
pub struct UNetConfigBuilder {
    cfg: UNetConfig,
}

impl UNetConfigBuilder {
    pub fn depth(mut self, depth: usize) -> Self {
        self.cfg.depth = depth;
        self
    }

    pub fn max_filter(mut self, max_filter: usize) -> Self {
        self.cfg.max_filter = max_filter;
        self
    }

    pub fn downsize_filters_factor(mut self, factor: f64) -> Self {
        self.cfg.downsize_filters_factor = factor;
        self
    }

    pub fn pool_size(mut self, pool_size: [usize; 3]) -> Self {
        self.cfg.pool_size = pool_size;
        self
    }

    pub fn filter_shape(mut self, filter_shape: [usize; 3]) -> Self {
        self.cfg.filter_shape = filter_shape;
        self
    }

    pub fn dropout(mut self, dropout: Option<f64>) -> Self {
        self.cfg.dropout = dropout;
        self
    }

    pub fn batch_norm(mut self, batch_norm: bool) -> Self {
        self.cfg.batch_norm = batch_norm;
        self
    }

    pub fn activation(mut self, activation: Activation) -> Self {
        self.cfg.activation = activation;
        self
    }

    pub fn padding(mut self, padding: Padding) -> Self {
        self.cfg.padding = padding;
        self
    }

    pub fn num_outputs(mut self, num_outputs: usize) -> Self {
        self.cfg.num_outputs = num_outputs;
        self
    }

    pub fn initial_learning_rate(mut self, lr: f64) -> Self {
        self.cfg.initial_learning_rate = lr;
        self
    }

    pub fn doubling(mut self, doubling: DoublingPolicy) -> Self {
        self.cfg.doubling = doubling;
        self
    }

    pub fn output_matching(mut self, output_matching: OutputMatching) -> Self {
        self.cfg.output_matching = output_matching;
        self
    }

    /// 校验并返回配置。
    pub fn build(self) -> Result<UNetConfig, ConfigError> {
        let c = self.cfg;
        if !(1..=MAX_DEPTH).contains(&c.depth) {
            return Err(ConfigError::InvalidDepth(c.depth));
        }
        if c.max_filter < 1 {
            return Err(ConfigError::InvalidMaxFilter(c.max_filter));
        }
        if !(c.downsize_filters_factor.is_finite() && c.downsize_filters_factor > 0.0) {
            return Err(ConfigError::InvalidDownsizeFactor(c.downsize_filters_factor));
        }
        if c.input_shape.contains(&0) {
            return Err(ConfigError::ZeroExtent {
                field: "input_shape",
            });
        }
        if c.pool_size.contains(&0) {
            return Err(ConfigError::ZeroExtent { field: "pool_size" });
        }
        if c.filter_shape.contains(&0) {
            return Err(ConfigError::ZeroExtent {
                field: "filter_shape",
            });
        }
        if let Some(rate) = c.dropout {
            if !(0.0..1.0).contains(&rate) {
                return Err(ConfigError::InvalidDropout(rate));
            }
        }
        if c.num_outputs < 1 {
            return Err(ConfigError::InvalidNumOutputs(c.num_outputs));
        }
        if !(c.initial_learning_rate.is_finite() && c.initial_learning_rate > 0.0) {
            return Err(ConfigError::InvalidLearningRate(c.initial_learning_rate));
        }
        Ok(c)
    }
}

const FIELDS: [&str; 15] = [
    "input_shape",
    "output_type",
    "depth",
    "max_filter",
    "downsize_filters_factor",
    "pool_size",
    "filter_shape",
    "dropout",
    "batch_norm",
    "activation",
    "padding",
    "num_outputs",
    "initial_learning_rate",
    "doubling",
    "output_matching",
];

fn invalid(field: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidField {
        field: field.to_owned(),
        reason: reason.into(),
    }
}

/// 取出字段；缺省或`null`时返回`None`。
fn field<'a>(doc: &'a JsonValue, name: &str) -> Option<&'a JsonValue> {
    match &doc[name] {
        JsonValue::Null => None,
        v => Some(v),
    }
}

fn usize_field(doc: &JsonValue, name: &str) -> Result<Option<usize>, ConfigError> {
    field(doc, name)
        .map(|v| {
            v.as_usize()
                .ok_or_else(|| invalid(name, "expected a non-negative integer"))
        })
        .transpose()
}

fn f64_field(doc: &JsonValue, name: &str) -> Result<Option<f64>, ConfigError> {
    field(doc, name)
        .map(|v| v.as_f64().ok_or_else(|| invalid(name, "expected a number")))
        .transpose()
}

fn bool_field(doc: &JsonValue, name: &str) -> Result<Option<bool>, ConfigError> {
    field(doc, name)
        .map(|v| v.as_bool().ok_or_else(|| invalid(name, "expected a boolean")))
        .transpose()
}

fn parsed<T: FromStr<Err = String>>(
    doc: &JsonValue,
    name: &str,
) -> Result<Option<T>, ConfigError> {
    field(doc, name)
        .map(|v| {
            v.as_str()
                .ok_or_else(|| invalid(name, "expected a string"))?
                .parse::<T>()
                .map_err(|e| invalid(name, e))
        })
        .transpose()
}

fn usize_array<const N: usize>(
    doc: &JsonValue,
    name: &str,
) -> Result<Option<[usize; N]>, ConfigError> {
    let Some(v) = field(doc, name) else {
        return Ok(None);
    };
    if !v.is_array() || v.len() != N {
        return Err(invalid(name, format!("expected an array of {N} integers")));
    }
    let mut out = [0_usize; N];
    for (slot, member) in out.iter_mut().zip(v.members()) {
        *slot = member
            .as_usize()
            .ok_or_else(|| invalid(name, "expected non-negative integers"))?;
    }
    Ok(Some(out))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_doubling_factor() {
        assert_eq!(DoublingPolicy::Power.factor(4), Some(16));
        assert_eq!(DoublingPolicy::Power.factor(0), Some(1));
        assert_eq!(DoublingPolicy::Power.factor(200), None);
        // 2 ^ n
        assert_eq!(DoublingPolicy::Xor.factor(4), Some(6));
        assert_eq!(DoublingPolicy::Xor.factor(3), Some(1));
        assert_eq!(DoublingPolicy::Xor.factor(2), Some(0));
        assert_eq!(DoublingPolicy::Xor.factor(1), Some(3));
    }

    #[test]
    fn test_builder_defaults() {
        let cfg = UNetConfig::builder([32, 32, 32, 1], OutputType::Regression)
            .build()
            .unwrap();
        assert_eq!(cfg.depth(), DEFAULT_DEPTH);
        assert_eq!(cfg.max_filter(), DEFAULT_MAX_FILTER);
        assert_eq!(cfg.pool_size(), [2, 2, 2]);
        assert_eq!(cfg.filter_shape(), [3, 3, 3]);
        assert_eq!(cfg.dropout(), None);
        assert!(!cfg.batch_norm());
        assert_eq!(cfg.doubling(), DoublingPolicy::Power);
    }

    #[test]
    fn test_builder_rejects() {
        let b = || UNetConfig::builder([32, 32, 32, 1], OutputType::Regression);
        assert!(matches!(
            b().depth(0).build(),
            Err(ConfigError::InvalidDepth(0))
        ));
        assert!(b().depth(MAX_DEPTH).build().is_ok());
        assert!(matches!(
            b().depth(MAX_DEPTH + 1).build(),
            Err(ConfigError::InvalidDepth(d)) if d == MAX_DEPTH + 1
        ));
        assert!(matches!(
            b().max_filter(0).build(),
            Err(ConfigError::InvalidMaxFilter(0))
        ));
        assert!(matches!(
            b().downsize_filters_factor(0.0).build(),
            Err(ConfigError::InvalidDownsizeFactor(_))
        ));
        assert!(matches!(
            b().downsize_filters_factor(f64::NAN).build(),
            Err(ConfigError::InvalidDownsizeFactor(_))
        ));
        assert!(matches!(
            b().dropout(Some(1.0)).build(),
            Err(ConfigError::InvalidDropout(_))
        ));
        assert!(matches!(
            b().pool_size([2, 0, 2]).build(),
            Err(ConfigError::ZeroExtent { field: "pool_size" })
        ));
        assert!(matches!(
            UNetConfig::builder([32, 0, 32, 1], OutputType::Regression).build(),
            Err(ConfigError::ZeroExtent {
                field: "input_shape"
            })
        ));
    }

    #[test]
    fn test_from_json() {
        let cfg = UNetConfig::from_json(
            r#"{
                "input_shape": [64, 64, 16, 2],
                "output_type": "binary_label",
                "depth": 3,
                "max_filter": 256,
                "pool_size": [2, 2, 1],
                "dropout": 0.1,
                "batch_norm": true,
                "doubling": "power"
            }"#,
        )
        .unwrap();
        assert_eq!(cfg.input_shape(), [64, 64, 16, 2]);
        assert_eq!(cfg.output_type(), OutputType::BinaryLabel);
        assert_eq!(cfg.depth(), 3);
        assert_eq!(cfg.max_filter(), 256);
        assert_eq!(cfg.pool_size(), [2, 2, 1]);
        assert_eq!(cfg.dropout(), Some(0.1));
        assert!(cfg.batch_norm());
        assert_eq!(cfg.activation(), Activation::Relu);
    }

    #[test]
    fn test_from_json_null_dropout() {
        let cfg = UNetConfig::from_json(
            r#"{"input_shape": [8, 8, 8, 1], "output_type": "regression", "dropout": null}"#,
        )
        .unwrap();
        assert_eq!(cfg.dropout(), None);
    }

    #[test]
    fn test_from_json_rejects() {
        let unknown = UNetConfig::from_json(
            r#"{"input_shape": [8, 8, 8, 1], "output_type": "regression", "maxfilter": 3}"#,
        );
        assert!(matches!(unknown, Err(ConfigError::UnknownField(f)) if f == "maxfilter"));

        let missing = UNetConfig::from_json(r#"{"input_shape": [8, 8, 8, 1]}"#);
        assert!(matches!(
            missing,
            Err(ConfigError::MissingField("output_type"))
        ));

        let negative = UNetConfig::from_json(
            r#"{"input_shape": [8, 8, 8, 1], "output_type": "regression", "depth": -1}"#,
        );
        assert!(matches!(negative, Err(ConfigError::InvalidField { .. })));

        let short = UNetConfig::from_json(
            r#"{"input_shape": [8, 8, 1], "output_type": "regression"}"#,
        );
        assert!(matches!(short, Err(ConfigError::InvalidField { .. })));

        let deep = UNetConfig::from_json(
            r#"{"input_shape": [16, 16, 16, 1], "output_type": "regression", "depth": 4611686018427387904}"#,
        );
        assert!(matches!(deep, Err(ConfigError::InvalidDepth(_))));

        let typo = UNetConfig::from_json(
            r#"{"input_shape": [8, 8, 8, 1], "output_type": "binary"}"#,
        );
        assert!(matches!(typo, Err(ConfigError::InvalidField { .. })));

        assert!(matches!(
            UNetConfig::from_json("[1, 2]"),
            Err(ConfigError::InvalidField { .. })
        ));
        assert!(matches!(
            UNetConfig::from_json("{"),
            Err(ConfigError::Json(_))
        ));
    }
}
