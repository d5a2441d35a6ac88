use super::utils::{parse, usize_array};
use anyhow::Context;
use clap::Args;
use std::fs;
use std::path::PathBuf;
use unet::prelude::{
    Activation, DoublingPolicy, OutputMatching, OutputType, Padding, TopologyBuilder, UNetConfig,
};

#[derive(Args, Debug)]
pub struct Topology {
    /// JSON配置文件。给定时忽略其余网络参数。
    #[arg(long, short)]
    config: Option<PathBuf>,
    /// 输入形状`x,y,z,c`。
    #[arg(long = "input-shape", value_parser = usize_array::<4>, required_unless_present = "config")]
    input_shape: Option<[usize; 4]>,
    /// 输出类型：`regression`、`binary_label`或`categorical_label`。
    #[arg(long = "output-type", value_parser = parse::<OutputType>, required_unless_present = "config")]
    output_type: Option<OutputType>,
    /// 编码器层数。
    #[arg(long)]
    depth: Option<usize>,
    /// 最底层滤波器个数。
    #[arg(long = "max-filter")]
    max_filter: Option<usize>,
    /// 滤波器个数缩小倍数。
    #[arg(long)]
    downsize: Option<f64>,
    /// 池化/上采样尺寸`x,y,z`。
    #[arg(long = "pool-size", value_parser = usize_array::<3>)]
    pool_size: Option<[usize; 3]>,
    /// 卷积核尺寸`x,y,z`。
    #[arg(long = "filter-shape", value_parser = usize_array::<3>)]
    filter_shape: Option<[usize; 3]>,
    /// 丢弃率。
    #[arg(long)]
    dropout: Option<f64>,
    /// 启用批归一化。
    #[arg(long = "batch-norm")]
    batch_norm: bool,
    /// 卷积激活函数。
    #[arg(long, value_parser = parse::<Activation>)]
    activation: Option<Activation>,
    /// 卷积填充方式：`same`或`valid`。
    #[arg(long, value_parser = parse::<Padding>)]
    padding: Option<Padding>,
    /// 输出通道数。
    #[arg(long = "num-outputs")]
    num_outputs: Option<usize>,
    /// 初始学习率。
    #[arg(long = "learning-rate")]
    learning_rate: Option<f64>,
    /// 滤波器倍增规则：`power`或`xor`。
    #[arg(long, value_parser = parse::<DoublingPolicy>)]
    doubling: Option<DoublingPolicy>,
    /// 输出分支匹配规则：`explicit`或`legacy`。
    #[arg(long = "output-matching", value_parser = parse::<OutputMatching>)]
    output_matching: Option<OutputMatching>,
    /// 不附加输出头与优化目标。
    #[arg(long)]
    headless: bool,
    /// 将JSON拓扑写入该文件。
    #[arg(long, short)]
    out: Option<PathBuf>,
    /// 不打印参数摘要。
    #[arg(long)]
    quiet: bool,
}

impl Topology {
    pub fn run(&self) -> anyhow::Result<()> {
        let cfg = self.config()?;
        let builder = TopologyBuilder::new(cfg);
        let graph = if self.headless {
            builder.build_headless()?
        } else {
            builder.build()?
        };
        log::info!("构建完成：{} 个节点，深度 {}", graph.len(), graph.depth());

        if !self.quiet {
            println!("{}", graph.summary());
        }
        if let Some(path) = &self.out {
            fs::write(path, graph.to_json().pretty(2))
                .with_context(|| format!("无法写入`{}`", path.display()))?;
            log::info!("拓扑已写入`{}`", path.display());
        }
        Ok(())
    }

    fn config(&self) -> anyhow::Result<UNetConfig> {
        if let Some(path) = &self.config {
            let text = fs::read_to_string(path)
                .with_context(|| format!("无法读取`{}`", path.display()))?;
            return UNetConfig::from_json(&text)
                .with_context(|| format!("配置文件`{}`有误", path.display()));
        }
        let input_shape = self.input_shape.context("缺少`--input-shape`")?;
        let output_type = self.output_type.context("缺少`--output-type`")?;
        let mut b = UNetConfig::builder(input_shape, output_type).batch_norm(self.batch_norm);
        if let Some(v) = self.depth {
            b = b.depth(v);
        }
        if let Some(v) = self.max_filter {
            b = b.max_filter(v);
        }
        if let Some(v) = self.downsize {
            b = b.downsize_filters_factor(v);
        }
        if let Some(v) = self.pool_size {
            b = b.pool_size(v);
        }
        if let Some(v) = self.filter_shape {
            b = b.filter_shape(v);
        }
        if self.dropout.is_some() {
            b = b.dropout(self.dropout);
        }
        if let Some(v) = self.activation {
            b = b.activation(v);
        }
        if let Some(v) = self.padding {
            b = b.padding(v);
        }
        if let Some(v) = self.num_outputs {
            b = b.num_outputs(v);
        }
        if let Some(v) = self.learning_rate {
            b = b.initial_learning_rate(v);
        }
        if let Some(v) = self.doubling {
            b = b.doubling(v);
        }
        if let Some(v) = self.output_matching {
            b = b.output_matching(v);
        }
        Ok(b.build()?)
    }
}
