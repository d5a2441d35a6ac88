//! 体数据读写：`.nii`、`.nii.gz`（NIfTI）与`.npy`。

use crate::error::PrepError;
use ndarray::{ArrayD, Axis};
use nifti::writer::WriterOptions;
use nifti::{IntoNdArray, NiftiHeader, NiftiObject, ReaderOptions};
use std::path::{Path, PathBuf};

/// 支持的体数据格式。
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum VolumeFormat {
    Nifti,
    NiftiGz,
    Npy,
}

impl VolumeFormat {
    /// 按文件名判断格式。
    pub fn of(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_str()?.to_ascii_lowercase();
        if name.ends_with(".nii.gz") {
            Some(VolumeFormat::NiftiGz)
        } else if name.ends_with(".nii") {
            Some(VolumeFormat::Nifti)
        } else if name.ends_with(".npy") {
            Some(VolumeFormat::Npy)
        } else {
            None
        }
    }

    /// 带点的完整扩展名。
    #[inline]
    pub fn extension(self) -> &'static str {
        match self {
            VolumeFormat::Nifti => ".nii",
            VolumeFormat::NiftiGz => ".nii.gz",
            VolumeFormat::Npy => ".npy",
        }
    }

    #[inline]
    pub fn is_nifti(self) -> bool {
        !matches!(self, VolumeFormat::Npy)
    }
}

/// 一个体数据及其（若来自NIfTI）头信息。
#[derive(Clone, Debug)]
pub struct Volume {
    pub data: ArrayD<f32>,
    pub header: Option<NiftiHeader>,
}

/// 读取体数据。
pub fn read_volume(path: &Path) -> Result<Volume, PrepError> {
    match VolumeFormat::of(path) {
        Some(VolumeFormat::Npy) => {
            let data: ArrayD<f32> =
                ndarray_npy::read_npy(path).map_err(|source| PrepError::ReadNpy {
                    path: path.to_path_buf(),
                    source,
                })?;
            Ok(Volume { data, header: None })
        }
        Some(_) => {
            let nifti_err = |source| PrepError::ReadNifti {
                path: path.to_path_buf(),
                source,
            };
            let obj = ReaderOptions::new().read_file(path).map_err(nifti_err)?;
            let header = obj.header().clone();
            let data = obj
                .into_volume()
                .into_ndarray::<f32>()
                .map_err(nifti_err)?;
            Ok(Volume {
                data,
                header: Some(header),
            })
        }
        None => Err(PrepError::UnsupportedFormat(path.to_path_buf())),
    }
}

/// 写入体数据。NIfTI输出时以`reference`作为参考头。
pub fn write_volume(
    path: &Path,
    data: &ArrayD<f32>,
    reference: Option<&NiftiHeader>,
) -> Result<(), PrepError> {
    match VolumeFormat::of(path) {
        Some(VolumeFormat::Npy) => {
            ndarray_npy::write_npy(path, data).map_err(|source| PrepError::WriteNpy {
                path: path.to_path_buf(),
                source,
            })
        }
        Some(_) => {
            let options = WriterOptions::new(path);
            let options = match reference {
                Some(header) => options.reference_header(header),
                None => options,
            };
            options
                .write_nifti(data)
                .map_err(|source| PrepError::WriteNifti {
                    path: path.to_path_buf(),
                    source,
                })
        }
        None => Err(PrepError::UnsupportedFormat(path.to_path_buf())),
    }
}

/// 去掉所有长度为1的轴（至少保留一维）。
pub fn squeeze(mut data: ArrayD<f32>) -> ArrayD<f32> {
    for axis in (0..data.ndim()).rev() {
        if data.ndim() > 1 && data.len_of(Axis(axis)) == 1 {
            data = data.index_axis_move(Axis(axis), 0);
        }
    }
    data
}

/// 输出文件名：`<stem><suffix><ext>`，放在`out_dir`（缺省为输入所在目录）下。
///
/// `brain.nii.gz` + `_N4Bias` -> `brain_N4Bias.nii.gz`
pub fn suffixed_path(
    input: &Path,
    suffix: &str,
    out_dir: Option<&Path>,
) -> Result<PathBuf, PrepError> {
    let format =
        VolumeFormat::of(input).ok_or_else(|| PrepError::UnsupportedFormat(input.to_path_buf()))?;
    let name = input
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| PrepError::UnsupportedFormat(input.to_path_buf()))?;
    let stem = &name[..name.len() - format.extension().len()];
    let file_name = format!("{stem}{suffix}{}", format.extension());
    let dir = match out_dir {
        Some(d) => d.to_path_buf(),
        None => input.parent().map(Path::to_path_buf).unwrap_or_default(),
    };
    Ok(dir.join(file_name))
}
