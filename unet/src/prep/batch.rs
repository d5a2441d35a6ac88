//! 预处理器接口与目录批处理。

use super::log::AccTimer;
use super::volume::{suffixed_path, VolumeFormat};
use crate::error::PrepError;
use std::path::{Path, PathBuf};
use std::sync::mpsc::channel;
use std::sync::Arc;
use std::time::{Duration, Instant};
use threadpool::ThreadPool;
use walkdir::WalkDir;

/// 单文件预处理步骤。
pub trait Preprocessor: Send + Sync {
    /// 用于日志的名称。
    fn name(&self) -> &str;

    /// 输出文件名后缀。
    fn suffix(&self) -> &str;

    /// 处理`input`并写入`output`。
    fn preprocess(&self, input: &Path, output: &Path) -> Result<(), PrepError>;

    /// `input`对应的输出路径。
    fn output_path(&self, input: &Path, out_dir: Option<&Path>) -> Result<PathBuf, PrepError> {
        suffixed_path(input, self.suffix(), out_dir)
    }
}

/// 列出`path`下（不递归）所有可识别的体数据文件，按文件名排序；`path`为文件时返回其自身。
pub fn collect_volumes(path: &Path) -> Result<Vec<PathBuf>, PrepError> {
    if path.is_file() {
        return Ok(vec![path.to_path_buf()]);
    }
    let mut files = vec![];
    for entry in WalkDir::new(path)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
    {
        let entry = entry?;
        if entry.file_type().is_file() && VolumeFormat::of(entry.path()).is_some() {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}

/// 单个文件的处理结果。
#[derive(Debug)]
pub enum Outcome {
    /// 处理完成，附耗时。
    Done(Duration),
    /// 输出已存在，跳过。
    Skipped,
    Failed(PrepError),
}

#[derive(Debug)]
pub struct FileReport {
    pub input: PathBuf,
    pub output: Option<PathBuf>,
    pub outcome: Outcome,
}

/// 一次批处理的汇总。`files`与输入顺序一致。
#[derive(Debug)]
pub struct BatchReport {
    pub files: Vec<FileReport>,
    /// 各文件处理耗时的累计。
    pub timer: AccTimer,
    /// 整批的墙钟时间。
    pub wall: Duration,
}

impl BatchReport {
    fn count(&self, pred: impl Fn(&Outcome) -> bool) -> usize {
        self.files.iter().filter(|f| pred(&f.outcome)).count()
    }

    pub fn done(&self) -> usize {
        self.count(|o| matches!(o, Outcome::Done(_)))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, Outcome::Skipped))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, Outcome::Failed(_)))
    }

    pub fn failures(&self) -> impl Iterator<Item = (&Path, &PrepError)> {
        self.files.iter().filter_map(|f| match &f.outcome {
            Outcome::Failed(e) => Some((f.input.as_path(), e)),
            _ => None,
        })
    }

    #[inline]
    pub fn is_success(&self) -> bool {
        self.failed() == 0
    }
}

/// 在线程池上对一组文件运行同一预处理器。
pub struct Batch<P> {
    preprocessor: Arc<P>,
    out_dir: Option<PathBuf>,
    jobs: usize,
    overwrite: bool,
}

impl<P: Preprocessor + 'static> Batch<P> {
    /// 默认线程数为逻辑CPU个数，输出与输入同目录，不覆盖已有输出。
    pub fn new(preprocessor: P) -> Self {
        Self {
            preprocessor: Arc::new(preprocessor),
            out_dir: None,
            jobs: num_cpus::get(),
            overwrite: false,
        }
    }

    pub fn out_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.out_dir = dir;
        self
    }

    /// 线程数；0表示逻辑CPU个数。
    pub fn jobs(mut self, jobs: usize) -> Self {
        self.jobs = if jobs == 0 { num_cpus::get() } else { jobs };
        self
    }

    pub fn overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    #[inline]
    pub fn preprocessor(&self) -> &P {
        &self.preprocessor
    }

    /// 处理所有输入。只有创建输出目录失败才整体返回错误；单文件失败记录在报告中。
    pub fn run(&self, inputs: &[PathBuf]) -> Result<BatchReport, PrepError> {
        let wall = Instant::now();
        if let Some(dir) = &self.out_dir {
            std::fs::create_dir_all(dir).map_err(|e| PrepError::io(dir, e))?;
        }

        let mut files: Vec<Option<FileReport>> = Vec::with_capacity(inputs.len());
        let mut pending = vec![];
        for (index, input) in inputs.iter().enumerate() {
            match self
                .preprocessor
                .output_path(input, self.out_dir.as_deref())
            {
                Err(e) => files.push(Some(FileReport {
                    input: input.clone(),
                    output: None,
                    outcome: Outcome::Failed(e),
                })),
                Ok(output) if output.exists() && !self.overwrite => {
                    log::warn!("`{}`已存在，跳过", output.display());
                    files.push(Some(FileReport {
                        input: input.clone(),
                        output: Some(output),
                        outcome: Outcome::Skipped,
                    }));
                }
                Ok(output) => {
                    files.push(None);
                    pending.push((index, input.clone(), output));
                }
            }
        }

        let name = self.preprocessor.name().to_owned();
        log::info!(
            "{name}: {} 个文件待处理，{} 个线程",
            pending.len(),
            self.jobs
        );
        let finished: Vec<(usize, FileReport)> = match self.jobs {
            1 => pending
                .into_iter()
                .map(|(index, input, output)| {
                    (index, run_one(self.preprocessor.as_ref(), input, output))
                })
                .collect(),
            jobs => {
                let pool = ThreadPool::new(jobs);
                let (tx, rx) = channel();
                for (index, input, output) in pending {
                    let tx = tx.clone();
                    let p = Arc::clone(&self.preprocessor);
                    pool.execute(move || {
                        let _ = tx.send((index, run_one(p.as_ref(), input, output)));
                    });
                }
                drop(tx);
                rx.iter().collect()
            }
        };

        let mut timer = AccTimer::new();
        for (index, report) in finished {
            if let Outcome::Done(lap) = report.outcome {
                timer.add(lap);
            }
            files[index] = Some(report);
        }
        let files = files
            .into_iter()
            .zip(inputs)
            .map(|(report, input)| {
                report.unwrap_or_else(|| {
                    log::error!("{name}: `{}`的工作线程异常退出", input.display());
                    FileReport {
                        input: input.clone(),
                        output: None,
                        outcome: Outcome::Failed(PrepError::WorkerLost),
                    }
                })
            })
            .collect();
        Ok(BatchReport {
            files,
            timer,
            wall: wall.elapsed(),
        })
    }
}

fn run_one<P: Preprocessor + ?Sized>(p: &P, input: PathBuf, output: PathBuf) -> FileReport {
    let since = Instant::now();
    let outcome = match p.preprocess(&input, &output) {
        Ok(()) => {
            let lap = since.elapsed();
            log::info!(
                "{}: `{}` -> `{}` ({} ms)",
                p.name(),
                input.display(),
                output.display(),
                lap.as_millis()
            );
            Outcome::Done(lap)
        }
        Err(e) => {
            log::error!("{}: `{}`处理失败：{e}", p.name(), input.display());
            Outcome::Failed(e)
        }
    };
    FileReport {
        input,
        output: Some(output),
        outcome,
    }
}
