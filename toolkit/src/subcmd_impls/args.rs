use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "toolkit")]
#[command(about = "3D U-Net拓扑构建与MRI体数据预处理工具集.")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// 子命令。
    #[command(subcommand)]
    command: Commands,
}

impl Cli {
    pub fn run_program(&self) -> anyhow::Result<()> {
        match self.command {
            Commands::Topology(ref v) => v.run(),
            Commands::N4Bias(ref v) => v.run(),
            Commands::ZeroNorm(ref v) => v.run(),
            Commands::Dice(ref v) => v.run(),
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// 按配置构建3D U-Net，打印参数摘要并可导出JSON拓扑。
    Topology(crate::subcmd_impls::topology::Topology),
    /// 调用外部N4BiasFieldCorrection程序做偏置场校正。
    N4Bias(crate::subcmd_impls::n4_bias::N4Bias),
    /// 零均值单位方差归一化，可指定掩膜。
    ZeroNorm(crate::subcmd_impls::zero_norm::ZeroNorm),
    /// 计算预测掩膜与真值之间的Dice系数。
    Dice(crate::subcmd_impls::dice::Dice),
}
