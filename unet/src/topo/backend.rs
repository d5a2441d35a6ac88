//! 后端接口：把图逐个节点地降级到外部张量框架。

use super::builder::Graph;
use super::head::Objective;
use super::layer::{LayerKind, LayerSpec};

/// 张量计算后端。
///
/// 后端按拓扑顺序收到每个节点的构建调用，输入以此前返回的张量句柄给出。
pub trait Backend {
    type Tensor: Clone;
    type Model;
    type Error;

    /// 创建模型输入。
    fn input(&mut self, spec: &LayerSpec) -> Result<Self::Tensor, Self::Error>;

    /// 创建一个层并把它应用到`inputs`上。
    fn layer(
        &mut self,
        spec: &LayerSpec,
        inputs: &[Self::Tensor],
    ) -> Result<Self::Tensor, Self::Error>;

    /// 编译模型。无头图的`objective`为`None`。
    fn compile(
        &mut self,
        input: Self::Tensor,
        output: Self::Tensor,
        objective: Option<&Objective>,
    ) -> Result<Self::Model, Self::Error>;
}

impl Graph {
    /// 用`backend`构建可执行模型。
    pub fn lower<B: Backend>(&self, backend: &mut B) -> Result<B::Model, B::Error> {
        let mut tensors: Vec<B::Tensor> = Vec::with_capacity(self.len());
        for spec in self.nodes() {
            let t = match spec.kind {
                LayerKind::Input => backend.input(spec)?,
                _ => {
                    let inputs: Vec<B::Tensor> = spec
                        .inputs
                        .iter()
                        .map(|id| tensors[id.index()].clone())
                        .collect();
                    backend.layer(spec, &inputs)?
                }
            };
            tensors.push(t);
        }
        let input = tensors[self.input().index()].clone();
        let output = tensors[self.terminal().index()].clone();
        backend.compile(input, output, self.objective())
    }
}
