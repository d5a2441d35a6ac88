//! 对称编码器/解码器拓扑的构建。

use super::config::UNetConfig;
use super::head::{HeadPlan, Objective, OutputType};
use super::layer::{Activation, LayerKind, LayerSpec, NodeId, Padding, Shape};
use super::plan::Plan;
use crate::error::ConfigError;

/// 拼接所用的通道轴（计入batch维）。
pub const CHANNEL_AXIS: usize = 4;

/// 编码器（下采样臂）的一层。
#[derive(Clone, Debug, PartialEq)]
pub struct EncoderStage {
    pub level: usize,
    /// 第0层没有池化。
    pub pool: Option<NodeId>,
    pub convs: [NodeId; 2],
    pub dropout: Option<NodeId>,
    pub batch_norm: Option<NodeId>,
}

impl EncoderStage {
    /// 本层的最终输出。
    #[inline]
    pub fn output(&self) -> NodeId {
        self.batch_norm.or(self.dropout).unwrap_or(self.convs[1])
    }
}

/// 解码器（上采样臂）的一层，层级从1开始。
#[derive(Clone, Debug, PartialEq)]
pub struct DecoderStage {
    pub level: usize,
    /// 跳跃连接的编码器层级，等于`depth - level - 1`。
    pub skip_level: usize,
    pub upsample: NodeId,
    pub concat: NodeId,
    pub convs: [NodeId; 2],
    pub dropout: Option<NodeId>,
    pub batch_norm: Option<NodeId>,
}

impl DecoderStage {
    #[inline]
    pub fn output(&self) -> NodeId {
        self.batch_norm.or(self.dropout).unwrap_or(self.convs[1])
    }
}

/// 输出头。
#[derive(Clone, Debug, PartialEq)]
pub struct Head {
    pub output_type: OutputType,
    /// 终端激活节点；回归输出为`None`。
    pub activation: Option<NodeId>,
    pub objective: Objective,
}

/// 构建完成的网络图，此后不可变。
#[derive(Clone, Debug, PartialEq)]
pub struct Graph {
    nodes: Vec<LayerSpec>,
    input: NodeId,
    encoder: Vec<EncoderStage>,
    decoder: Vec<DecoderStage>,
    output: NodeId,
    head: Option<Head>,
}

impl Graph {
    /// 按拓扑顺序排列的全部节点。
    #[inline]
    pub fn nodes(&self) -> &[LayerSpec] {
        &self.nodes
    }

    #[inline]
    pub fn node(&self, id: NodeId) -> &LayerSpec {
        &self.nodes[id.0]
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    #[inline]
    pub fn input(&self) -> NodeId {
        self.input
    }

    #[inline]
    pub fn depth(&self) -> usize {
        self.encoder.len()
    }

    #[inline]
    pub fn encoder(&self) -> &[EncoderStage] {
        &self.encoder
    }

    #[inline]
    pub fn decoder(&self) -> &[DecoderStage] {
        &self.decoder
    }

    /// 按层级（1..depth）获取解码器的一层。
    pub fn decoder_stage(&self, level: usize) -> Option<&DecoderStage> {
        level
            .checked_sub(1)
            .and_then(|i| self.decoder.get(i))
    }

    /// 最深的编码器层的输出。
    #[inline]
    pub fn bottleneck(&self) -> NodeId {
        self.encoder[self.encoder.len() - 1].output()
    }

    /// 1×1×1输出卷积。
    #[inline]
    pub fn output(&self) -> NodeId {
        self.output
    }

    #[inline]
    pub fn head(&self) -> Option<&Head> {
        self.head.as_ref()
    }

    #[inline]
    pub fn objective(&self) -> Option<&Objective> {
        self.head.as_ref().map(|h| &h.objective)
    }

    /// 整个图的终端节点：有终端激活时为激活节点，否则为输出卷积。
    pub fn terminal(&self) -> NodeId {
        self.head
            .as_ref()
            .and_then(|h| h.activation)
            .unwrap_or(self.output)
    }

    /// 统计满足谓词的节点个数。
    pub fn count(&self, pred: impl Fn(&LayerKind) -> bool) -> usize {
        self.nodes.iter().filter(|n| pred(&n.kind)).count()
    }
}

/// 追加式的节点存储，编号即下标。
struct Arena {
    nodes: Vec<LayerSpec>,
}

impl Arena {
    fn with_capacity(cap: usize) -> Self {
        Self {
            nodes: Vec::with_capacity(cap),
        }
    }

    fn push(&mut self, kind: LayerKind, inputs: Vec<NodeId>, shape: Shape) -> NodeId {
        let id = NodeId(self.nodes.len());
        debug_assert!(inputs.iter().all(|i| i.0 < id.0));
        log::debug!("{id} {} <- {inputs:?} {shape}", kind.name());
        self.nodes.push(LayerSpec {
            id,
            kind,
            inputs,
            shape,
        });
        id
    }

    #[inline]
    fn shape(&self, id: NodeId) -> Shape {
        self.nodes[id.0].shape
    }
}

/// 从`UNetConfig`构建U-Net拓扑。
#[derive(Clone, Debug)]
pub struct TopologyBuilder {
    cfg: UNetConfig,
}

impl TopologyBuilder {
    #[inline]
    pub fn new(cfg: UNetConfig) -> Self {
        Self { cfg }
    }

    #[inline]
    pub fn config(&self) -> &UNetConfig {
        &self.cfg
    }

    /// 构建带输出头与优化目标的完整模型图。
    pub fn build(&self) -> Result<Graph, ConfigError> {
        let plan = Plan::new(&self.cfg)?;
        let graph = self.assemble(&plan, Some(&plan.head));
        log::info!(
            "built {} U-Net: depth {}, {} nodes, terminal {}",
            self.cfg.output_type().as_str(),
            graph.depth(),
            graph.len(),
            graph.terminal()
        );
        Ok(graph)
    }

    /// 构建止于输出卷积的子图，用于嵌入更大的模型。
    pub fn build_headless(&self) -> Result<Graph, ConfigError> {
        let plan = Plan::new(&self.cfg)?;
        let graph = self.assemble(&plan, None);
        log::info!(
            "built headless U-Net: depth {}, {} nodes",
            graph.depth(),
            graph.len()
        );
        Ok(graph)
    }

    fn assemble(&self, plan: &Plan, head: Option<&HeadPlan>) -> Graph {
        let cfg = &self.cfg;
        let depth = cfg.depth();
        // 每层至多5个节点，另加输入、输出卷积与激活。
        let mut arena = Arena::with_capacity(depth * 5 + (depth - 1) * 6 + 3);

        let input = arena.push(LayerKind::Input, vec![], Shape::from(cfg.input_shape()));

        let mut encoder: Vec<EncoderStage> = Vec::with_capacity(depth);
        for lp in plan.encoder.iter() {
            let (pool, from) = match encoder.last() {
                None => (None, input),
                Some(prev) => {
                    let prev_out = prev.output();
                    let shape = arena.shape(prev_out);
                    let pool = arena.push(
                        LayerKind::MaxPool3d {
                            pool_size: cfg.pool_size(),
                        },
                        vec![prev_out],
                        Shape::new(lp.pooled, shape.channels),
                    );
                    (Some(pool), pool)
                }
            };
            let convs = self.conv_pair(&mut arena, from, lp.filters, lp.conv_spatial);
            let (dropout, batch_norm) = self.regularize(&mut arena, convs[1]);
            log::debug!("encoder level {} filters {:?}", lp.level, lp.filters);
            encoder.push(EncoderStage {
                level: lp.level,
                pool,
                convs,
                dropout,
                batch_norm,
            });
        }

        let mut decoder: Vec<DecoderStage> = Vec::with_capacity(depth - 1);
        let mut prev_out = encoder[depth - 1].output();
        for lp in plan.decoder.iter() {
            let channels = arena.shape(prev_out).channels;
            let upsample = arena.push(
                LayerKind::UpSample3d {
                    size: cfg.pool_size(),
                },
                vec![prev_out],
                Shape::new(lp.upsampled, channels),
            );
            let skip = encoder[lp.skip_level].output();
            let skip_channels = arena.shape(skip).channels;
            let concat = arena.push(
                LayerKind::Concatenate { axis: CHANNEL_AXIS },
                vec![upsample, skip],
                Shape::new(lp.upsampled, channels + skip_channels),
            );
            let convs = self.conv_pair(&mut arena, concat, lp.filters, lp.conv_spatial);
            let (dropout, batch_norm) = self.regularize(&mut arena, convs[1]);
            log::debug!(
                "decoder level {} filters {:?}, skip from encoder level {}",
                lp.level,
                lp.filters,
                lp.skip_level
            );
            let stage = DecoderStage {
                level: lp.level,
                skip_level: lp.skip_level,
                upsample,
                concat,
                convs,
                dropout,
                batch_norm,
            };
            prev_out = stage.output();
            decoder.push(stage);
        }

        let output = arena.push(
            LayerKind::Conv3d {
                filters: cfg.num_outputs(),
                kernel: [1, 1, 1],
                activation: Activation::Linear,
                padding: Padding::Same,
            },
            vec![prev_out],
            Shape::new(plan.output_spatial(), cfg.num_outputs()),
        );

        let head = head.map(|hp| {
            let activation = hp.activation.map(|act| {
                arena.push(
                    LayerKind::Activation(act),
                    vec![output],
                    arena.shape(output),
                )
            });
            Head {
                output_type: hp.output_type,
                activation,
                objective: hp.objective.clone(),
            }
        });

        Graph {
            nodes: arena.nodes,
            input,
            encoder,
            decoder,
            output,
            head,
        }
    }

    fn conv_pair(
        &self,
        arena: &mut Arena,
        from: NodeId,
        filters: [usize; 2],
        spatial: [[usize; 3]; 2],
    ) -> [NodeId; 2] {
        let mut prev = from;
        let mut ids = [from; 2];
        for ((slot, f), s) in ids.iter_mut().zip(filters).zip(spatial) {
            prev = arena.push(
                LayerKind::Conv3d {
                    filters: f,
                    kernel: self.cfg.filter_shape(),
                    activation: self.cfg.activation(),
                    padding: self.cfg.padding(),
                },
                vec![prev],
                Shape::new(s, f),
            );
            *slot = prev;
        }
        ids
    }

    /// dropout在前，batch norm在后，两者独立可选。
    fn regularize(&self, arena: &mut Arena, from: NodeId) -> (Option<NodeId>, Option<NodeId>) {
        let shape = arena.shape(from);
        let dropout = self
            .cfg
            .dropout()
            .map(|rate| arena.push(LayerKind::Dropout { rate }, vec![from], shape));
        let batch_norm = self.cfg.batch_norm().then(|| {
            arena.push(
                LayerKind::BatchNorm,
                vec![dropout.unwrap_or(from)],
                shape,
            )
        });
        (dropout, batch_norm)
    }
}
