//! 图的JSON导出，供外部框架（如Keras宿主）逐条重建。

use super::builder::{DecoderStage, EncoderStage, Graph, Head};
use super::head::{Loss, Objective};
use super::layer::{LayerKind, LayerSpec, NodeId};
use json::JsonValue;

fn id(n: NodeId) -> JsonValue {
    n.index().into()
}

fn opt_id(n: Option<NodeId>) -> JsonValue {
    n.map(id).unwrap_or(JsonValue::Null)
}

fn triple(v: [usize; 3]) -> JsonValue {
    v.to_vec().into()
}

fn node_json(n: &LayerSpec) -> JsonValue {
    let mut j = JsonValue::new_object();
    j["id"] = id(n.id);
    j["kind"] = n.kind.name().into();
    match &n.kind {
        LayerKind::Input | LayerKind::BatchNorm => {}
        LayerKind::Conv3d {
            filters,
            kernel,
            activation,
            padding,
        } => {
            j["filters"] = (*filters).into();
            j["kernel"] = triple(*kernel);
            j["activation"] = activation.as_str().into();
            j["padding"] = padding.as_str().into();
        }
        LayerKind::MaxPool3d { pool_size } => j["pool_size"] = triple(*pool_size),
        LayerKind::UpSample3d { size } => j["size"] = triple(*size),
        LayerKind::Concatenate { axis } => j["axis"] = (*axis).into(),
        LayerKind::Dropout { rate } => j["rate"] = (*rate).into(),
        LayerKind::Activation(a) => j["activation"] = a.as_str().into(),
    }
    j["inputs"] = JsonValue::Array(n.inputs.iter().copied().map(id).collect());
    j["shape"] = n.shape.to_vec().into();
    j
}

fn encoder_json(s: &EncoderStage) -> JsonValue {
    let mut j = JsonValue::new_object();
    j["level"] = s.level.into();
    j["pool"] = opt_id(s.pool);
    j["convs"] = JsonValue::Array(s.convs.iter().copied().map(id).collect());
    j["dropout"] = opt_id(s.dropout);
    j["batch_norm"] = opt_id(s.batch_norm);
    j["output"] = id(s.output());
    j
}

fn decoder_json(s: &DecoderStage) -> JsonValue {
    let mut j = JsonValue::new_object();
    j["level"] = s.level.into();
    j["skip_level"] = s.skip_level.into();
    j["upsample"] = id(s.upsample);
    j["concat"] = id(s.concat);
    j["convs"] = JsonValue::Array(s.convs.iter().copied().map(id).collect());
    j["dropout"] = opt_id(s.dropout);
    j["batch_norm"] = opt_id(s.batch_norm);
    j["output"] = id(s.output());
    j
}

fn objective_json(o: &Objective) -> JsonValue {
    let mut j = JsonValue::new_object();
    j["optimizer"] = o.optimizer.name().into();
    j["learning_rate"] = o.optimizer.learning_rate().into();
    j["loss"] = o.loss.name().into();
    if let Loss::DiceCoefficient { smooth } = o.loss {
        j["smooth"] = smooth.into();
    }
    j["metrics"] = JsonValue::Array(o.metrics.iter().map(|m| m.name().into()).collect());
    j
}

fn head_json(h: &Head) -> JsonValue {
    let mut j = JsonValue::new_object();
    j["output_type"] = h.output_type.as_str().into();
    j["activation"] = opt_id(h.activation);
    j["objective"] = objective_json(&h.objective);
    j
}

impl Graph {
    /// 导出为JSON文档。
    pub fn to_json(&self) -> JsonValue {
        let mut j = JsonValue::new_object();
        j["input"] = id(self.input());
        j["output"] = id(self.output());
        j["terminal"] = id(self.terminal());
        j["depth"] = self.depth().into();
        j["nodes"] = JsonValue::Array(self.nodes().iter().map(node_json).collect());
        j["encoder"] = JsonValue::Array(self.encoder().iter().map(encoder_json).collect());
        j["decoder"] = JsonValue::Array(self.decoder().iter().map(decoder_json).collect());
        j["head"] = self.head().map(head_json).unwrap_or(JsonValue::Null);
        j
    }
}

#[cfg(test)]
mod tests {
    use crate::topo::config::UNetConfig;
    use crate::topo::head::OutputType;
    use crate::topo::TopologyBuilder;

    #[test]
    fn test_export_round_trips_through_parser() {
        let cfg = UNetConfig::builder([32, 32, 32, 1], OutputType::BinaryLabel)
            .depth(3)
            .dropout(Some(0.25))
            .build()
            .unwrap();
        let g = TopologyBuilder::new(cfg).build().unwrap();
        let doc = json::parse(&g.to_json().dump()).unwrap();

        assert_eq!(doc["nodes"].len(), g.len());
        assert_eq!(doc["encoder"].len(), 3);
        assert_eq!(doc["decoder"].len(), 2);
        assert_eq!(doc["depth"].as_usize(), Some(3));
        assert_eq!(doc["head"]["output_type"].as_str(), Some("binary_label"));
        assert_eq!(doc["head"]["objective"]["loss"].as_str(), Some("dice_coef_loss"));
        assert_eq!(doc["head"]["objective"]["smooth"].as_f64(), Some(1.0));

        let d1 = &doc["decoder"][0];
        assert_eq!(d1["skip_level"].as_usize(), Some(1));
        let concat = &doc["nodes"][d1["concat"].as_usize().unwrap()];
        assert_eq!(concat["kind"].as_str(), Some("concatenate"));
        assert_eq!(concat["axis"].as_usize(), Some(4));
        assert_eq!(concat["inputs"][1], doc["encoder"][1]["output"]);

        let terminal = &doc["nodes"][doc["terminal"].as_usize().unwrap()];
        assert_eq!(terminal["activation"].as_str(), Some("sigmoid"));
        assert!(doc["encoder"][0]["pool"].is_null());
        assert_eq!(
            doc["nodes"][doc["encoder"][0]["dropout"].as_usize().unwrap()]["rate"].as_f64(),
            Some(0.25)
        );
    }
}
