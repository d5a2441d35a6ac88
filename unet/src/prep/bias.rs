//! N4偏置场校正：调用外部可执行程序（默认`N4BiasFieldCorrection`）。

use super::batch::Preprocessor;
use crate::error::PrepError;
use std::path::Path;
use std::process::{Command, Output};

pub const DEFAULT_N4_COMMAND: &str = "N4BiasFieldCorrection";
pub const DEFAULT_N4_SUFFIX: &str = "_N4Bias";

cfg_if::cfg_if! {
    if #[cfg(windows)] {
        fn shell(line: &str) -> Command {
            let mut cmd = Command::new("cmd");
            cmd.args(["/C", line]);
            cmd
        }

        fn quote(s: &str) -> String {
            format!("\"{}\"", s.replace('"', "\"\""))
        }
    } else {
        fn shell(line: &str) -> Command {
            let mut cmd = Command::new("sh");
            cmd.args(["-c", line]);
            cmd
        }

        fn quote(s: &str) -> String {
            format!("'{}'", s.replace('\'', r"'\''"))
        }
    }
}

/// N4偏置场校正。
///
/// 命令模板中的各词原样拼接（可带额外参数，如`-d 3`），之后追加`-i <输入> -o <输出>`，
/// 经由平台shell执行。路径会被引用，模板不会。
#[derive(Clone, Debug)]
pub struct N4BiasCorrection {
    command: Vec<String>,
    suffix: String,
}

impl Default for N4BiasCorrection {
    fn default() -> Self {
        Self {
            command: vec![DEFAULT_N4_COMMAND.to_owned()],
            suffix: DEFAULT_N4_SUFFIX.to_owned(),
        }
    }
}

impl N4BiasCorrection {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// 替换命令模板。
    pub fn with_command<I, S>(mut self, command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.command = command.into_iter().map(Into::into).collect();
        self
    }

    /// 替换输出文件名后缀。
    pub fn with_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.suffix = suffix.into();
        self
    }

    #[inline]
    pub fn command(&self) -> &[String] {
        &self.command
    }

    /// 完整的shell命令行。
    pub fn command_line(&self, input: &Path, output: &Path) -> Result<String, PrepError> {
        if self.command.iter().all(|t| t.trim().is_empty()) {
            return Err(PrepError::EmptyCommand);
        }
        Ok(format!(
            "{} -i {} -o {}",
            self.command.join(" "),
            quote(&input.to_string_lossy()),
            quote(&output.to_string_lossy())
        ))
    }

    /// 对单个文件执行校正。
    pub fn correct(&self, input: &Path, output: &Path) -> Result<(), PrepError> {
        let line = self.command_line(input, output)?;
        log::debug!("执行：{line}");
        let Output { status, stderr, .. } =
            shell(&line).output().map_err(|source| PrepError::Spawn {
                command: line.clone(),
                source,
            })?;
        if status.success() {
            Ok(())
        } else {
            Err(PrepError::CommandFailed {
                command: line,
                status: status.code(),
                stderr: String::from_utf8_lossy(&stderr).trim().to_owned(),
            })
        }
    }
}

impl Preprocessor for N4BiasCorrection {
    fn name(&self) -> &str {
        "n4-bias"
    }

    fn suffix(&self) -> &str {
        &self.suffix
    }

    fn preprocess(&self, input: &Path, output: &Path) -> Result<(), PrepError> {
        self.correct(input, output)
    }
}
