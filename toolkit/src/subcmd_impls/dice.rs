use anyhow::{ensure, Context};
use clap::Args;
use ndarray::ArrayD;
use std::path::{Path, PathBuf};
use unet::prelude::{dice_coefficient, dice_loss, read_volume, DICE_SMOOTH};
use unet::prep::squeeze;

#[derive(Args, Debug)]
pub struct Dice {
    /// 真值掩膜。
    #[arg(long, short)]
    truth: PathBuf,
    /// 预测掩膜或概率图。
    #[arg(long, short)]
    pred: PathBuf,
    /// 二值化阈值：大于该值视为1。不给定时直接使用原始值。
    #[arg(long)]
    threshold: Option<f32>,
}

impl Dice {
    pub fn run(&self) -> anyhow::Result<()> {
        let truth = self.load(&self.truth)?;
        let pred = self.load(&self.pred)?;
        ensure!(
            truth.shape() == pred.shape(),
            "形状不一致：真值 {:?}，预测 {:?}",
            truth.shape(),
            pred.shape()
        );
        let dice = dice_coefficient(&truth, &pred, DICE_SMOOTH);
        log::debug!("dice loss = {}", dice_loss(&truth, &pred, DICE_SMOOTH));
        println!("{dice:.6}");
        Ok(())
    }

    fn load(&self, path: &Path) -> anyhow::Result<ArrayD<f32>> {
        let data = read_volume(path)
            .with_context(|| format!("无法读取`{}`", path.display()))?
            .data;
        let data = squeeze(data);
        Ok(match self.threshold {
            Some(t) => data.mapv(|v| if v > t { 1.0 } else { 0.0 }),
            None => data,
        })
    }
}
