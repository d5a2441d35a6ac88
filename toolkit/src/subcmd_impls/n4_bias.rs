use super::utils::BatchArgs;
use clap::Args;
use unet::prelude::N4BiasCorrection;

#[derive(Args, Debug)]
pub struct N4Bias {
    #[command(flatten)]
    batch: BatchArgs,
    /// 命令模板，原样置于`-i <输入> -o <输出>`之前，例如`--command N4BiasFieldCorrection -d 3`。
    /// 会吞掉其后所有参数，须放在最后。
    #[arg(long, num_args = 1.., allow_hyphen_values = true)]
    command: Vec<String>,
}

impl N4Bias {
    pub fn run(&self) -> anyhow::Result<()> {
        let mut n4 = N4BiasCorrection::new();
        if !self.command.is_empty() {
            n4 = n4.with_command(self.command.iter().cloned());
        }
        if let Some(suffix) = &self.batch.suffix {
            n4 = n4.with_suffix(suffix.as_str());
        }
        self.batch.run(n4)
    }
}
