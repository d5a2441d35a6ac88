use anyhow::{bail, Context};
use clap::Args;
use std::path::PathBuf;
use std::str::FromStr;
use unet::prelude::{collect_volumes, Batch, Preprocessor};

/// 解析形如`128,128,128,1`的定长正整数数组。
pub fn usize_array<const N: usize>(s: &str) -> Result<[usize; N], String> {
    let parts: Vec<&str> = s.split(',').map(str::trim).collect();
    if parts.len() != N {
        return Err(format!("需要{N}个以逗号分隔的整数，但得到`{s}`"));
    }
    let mut out = [0; N];
    for (slot, p) in out.iter_mut().zip(parts) {
        *slot = p.parse().map_err(|_| format!("`{p}`不是非负整数"))?;
    }
    Ok(out)
}

/// 借助库类型自身的`FromStr`解析枚举参数。
pub fn parse<T: FromStr<Err = String>>(s: &str) -> Result<T, String> {
    s.parse()
}

/// 批处理子命令的公共参数。
#[derive(Args, Debug)]
pub struct BatchArgs {
    /// 输入文件，或包含`.nii`/`.nii.gz`/`.npy`文件的目录。
    #[arg(long, short)]
    pub input: PathBuf,
    /// 输出目录（默认与输入同目录）。
    #[arg(long = "out-dir", short)]
    pub out_dir: Option<PathBuf>,
    /// 输出文件名后缀。
    #[arg(long)]
    pub suffix: Option<String>,
    /// 线程数（0表示逻辑CPU个数）。
    #[arg(long, short, default_value_t = 0)]
    pub jobs: usize,
    /// 覆盖已存在的输出文件。
    #[arg(long)]
    pub overwrite: bool,
}

impl BatchArgs {
    /// 对所有输入运行`preprocessor`；任一文件失败则返回错误。
    pub fn run<P: Preprocessor + 'static>(&self, preprocessor: P) -> anyhow::Result<()> {
        let inputs = collect_volumes(&self.input)
            .with_context(|| format!("无法列出`{}`", self.input.display()))?;
        if inputs.is_empty() {
            log::warn!("`{}`下没有可处理的体数据文件", self.input.display());
            return Ok(());
        }
        let report = Batch::new(preprocessor)
            .out_dir(self.out_dir.clone())
            .jobs(self.jobs)
            .overwrite(self.overwrite)
            .run(&inputs)?;

        let timer = &report.timer;
        println!(
            "完成 {}，跳过 {}，失败 {}；累计处理 {} ms，平均 {} ms，总耗时 {} ms",
            report.done(),
            report.skipped(),
            report.failed(),
            timer.get_total_ms(),
            timer.mean().map_or(0, |d| d.as_millis()),
            report.wall.as_millis()
        );
        for (input, e) in report.failures() {
            eprintln!("`{}`: {e}", input.display());
        }
        if !report.is_success() {
            bail!("{} 个文件处理失败", report.failed());
        }
        Ok(())
    }
}
