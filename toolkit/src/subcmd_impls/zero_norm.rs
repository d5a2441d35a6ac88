use super::utils::BatchArgs;
use clap::Args;
use std::path::PathBuf;
use unet::prelude::ZeroMeanNormalization;

#[derive(Args, Debug)]
pub struct ZeroNorm {
    #[command(flatten)]
    batch: BatchArgs,
    /// 掩膜体数据：只统计`mask > 0`的体素，`mask == 0`处输出0。
    #[arg(long, short)]
    mask: Option<PathBuf>,
}

impl ZeroNorm {
    pub fn run(&self) -> anyhow::Result<()> {
        let mut norm = ZeroMeanNormalization::new().with_mask(self.mask.clone());
        if let Some(suffix) = &self.batch.suffix {
            norm = norm.with_suffix(suffix.as_str());
        }
        self.batch.run(norm)
    }
}
