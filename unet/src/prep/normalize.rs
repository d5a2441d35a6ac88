//! 零均值单位方差归一化。

use super::batch::Preprocessor;
use super::volume::{read_volume, squeeze, write_volume};
use crate::error::PrepError;
use ndarray::{ArrayD, Zip};
use std::path::{Path, PathBuf};

pub const DEFAULT_ZERO_NORM_SUFFIX: &str = "_ZeroNorm";

/// 归一化所用的统计量（总体标准差）。
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Stats {
    pub mean: f64,
    pub std: f64,
    pub count: usize,
}

/// 统计`data`中被选中体素的均值与总体标准差。
fn stats<'a>(values: impl Iterator<Item = &'a f32> + Clone) -> Option<Stats> {
    let (sum, count) = values
        .clone()
        .fold((0f64, 0usize), |(s, n), &v| (s + v as f64, n + 1));
    if count == 0 {
        return None;
    }
    let mean = sum / count as f64;
    let var = values
        .map(|&v| {
            let d = v as f64 - mean;
            d * d
        })
        .sum::<f64>()
        / count as f64;
    Some(Stats {
        mean,
        std: var.sqrt(),
        count,
    })
}

/// 原地归一化为`(v - mean) / std`。
///
/// 给定掩膜时，统计量只取`mask > 0`的体素，且`mask == 0`处置为0。
pub fn zero_mean_normalize(
    data: &mut ArrayD<f32>,
    mask: Option<&ArrayD<f32>>,
) -> Result<Stats, PrepError> {
    let st = match mask {
        None => stats(data.iter()).ok_or(PrepError::ZeroVariance { std: f64::NAN })?,
        Some(m) => {
            if m.shape() != data.shape() {
                return Err(PrepError::MaskShape {
                    volume: data.shape().to_vec(),
                    mask: m.shape().to_vec(),
                });
            }
            let selected = data.iter().zip(m.iter()).filter(|&(_, &w)| w > 0.0);
            stats(selected.map(|(v, _)| v)).ok_or(PrepError::EmptyMask)?
        }
    };
    if !(st.std.is_finite() && st.std > 0.0) {
        return Err(PrepError::ZeroVariance { std: st.std });
    }

    let (mean, std) = (st.mean, st.std);
    let norm = |v: f32| ((v as f64 - mean) / std) as f32;
    match mask {
        None => data.mapv_inplace(norm),
        Some(m) => Zip::from(data).and(m).for_each(|v, &w| {
            *v = if w == 0.0 { 0.0 } else { norm(*v) };
        }),
    }
    Ok(st)
}

/// 零均值归一化预处理器。
#[derive(Clone, Debug)]
pub struct ZeroMeanNormalization {
    mask: Option<PathBuf>,
    suffix: String,
}

impl Default for ZeroMeanNormalization {
    fn default() -> Self {
        Self {
            mask: None,
            suffix: DEFAULT_ZERO_NORM_SUFFIX.to_owned(),
        }
    }
}

impl ZeroMeanNormalization {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_mask(mut self, mask: Option<PathBuf>) -> Self {
        self.mask = mask;
        self
    }

    pub fn with_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.suffix = suffix.into();
        self
    }

    #[inline]
    pub fn mask(&self) -> Option<&Path> {
        self.mask.as_deref()
    }
}

impl Preprocessor for ZeroMeanNormalization {
    fn name(&self) -> &str {
        "zero-norm"
    }

    fn suffix(&self) -> &str {
        &self.suffix
    }

    fn preprocess(&self, input: &Path, output: &Path) -> Result<(), PrepError> {
        let volume = read_volume(input)?;
        let mut data = squeeze(volume.data);
        let mask = match &self.mask {
            Some(p) => Some(squeeze(read_volume(p)?.data)),
            None => None,
        };
        let st = zero_mean_normalize(&mut data, mask.as_ref())?;
        log::debug!(
            "`{}`: mean = {:.4}, std = {:.4}, voxels = {}",
            input.display(),
            st.mean,
            st.std,
            st.count
        );
        write_volume(output, &data, volume.header.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{arr1, IxDyn};

    fn vol(v: &[f32]) -> ArrayD<f32> {
        arr1(v).into_dyn()
    }

    #[test]
    fn test_without_mask() {
        let mut data = vol(&[1.0, 2.0, 3.0, 4.0]);
        let st = zero_mean_normalize(&mut data, None).unwrap();
        assert_eq!(st.mean, 2.5);
        assert!((st.std - 1.25f64.sqrt()).abs() < 1e-12);
        let sum: f32 = data.iter().sum();
        assert!(sum.abs() < 1e-5);
        let var: f32 = data.iter().map(|v| v * v).sum::<f32>() / 4.0;
        assert!((var - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_with_mask() {
        let mut data = vol(&[100.0, 1.0, 3.0, -7.0]);
        let mask = vol(&[0.0, 1.0, 1.0, 0.0]);
        let st = zero_mean_normalize(&mut data, Some(&mask)).unwrap();
        assert_eq!(st.count, 2);
        assert_eq!(st.mean, 2.0);
        assert_eq!(st.std, 1.0);
        assert_eq!(data, vol(&[0.0, -1.0, 1.0, 0.0]));
    }

    #[test]
    fn test_errors() {
        let mut flat = vol(&[5.0, 5.0, 5.0]);
        assert!(matches!(
            zero_mean_normalize(&mut flat, None),
            Err(PrepError::ZeroVariance { .. })
        ));

        let mut data = vol(&[1.0, 2.0]);
        assert!(matches!(
            zero_mean_normalize(&mut data, Some(&vol(&[0.0, 0.0]))),
            Err(PrepError::EmptyMask)
        ));
        let mask = ArrayD::<f32>::ones(IxDyn(&[2, 1]));
        assert!(matches!(
            zero_mean_normalize(&mut data, Some(&mask)),
            Err(PrepError::MaskShape { .. })
        ));
        // 失败时不修改数据
        assert_eq!(data, vol(&[1.0, 2.0]));
    }

    #[test]
    fn test_preprocess_npy() {
        let dir = std::env::temp_dir().join(format!("unet-zero-norm-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let input = dir.join("t1.npy");
        let mask = dir.join("mask.npy");
        let output = dir.join("t1_ZeroNorm.npy");
        let data = ArrayD::from_shape_vec(IxDyn(&[2, 2, 1]), vec![0.0f32, 2.0, 4.0, 6.0]).unwrap();
        ndarray_npy::write_npy(&input, &data).unwrap();
        let m = ArrayD::from_shape_vec(IxDyn(&[2, 2]), vec![1.0f32, 1.0, 0.0, 0.0]).unwrap();
        ndarray_npy::write_npy(&mask, &m).unwrap();

        let p = ZeroMeanNormalization::new().with_mask(Some(mask));
        p.preprocess(&input, &output).unwrap();
        let out: ArrayD<f32> = ndarray_npy::read_npy(&output).unwrap();
        assert_eq!(out.shape(), &[2, 2]);
        assert_eq!(out.iter().copied().collect::<Vec<_>>(), vec![-1.0, 1.0, 0.0, 0.0]);
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_preprocess_nifti_keeps_header() {
        let dir = std::env::temp_dir().join(format!("unet-zero-norm-nii-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let input = dir.join("t1.nii.gz");
        let output = dir.join("t1_ZeroNorm.nii.gz");
        let data = ArrayD::from_shape_vec(IxDyn(&[2, 2, 1]), vec![0.0f32, 2.0, 4.0, 6.0]).unwrap();
        let mut header = nifti::NiftiHeader::default();
        header.pixdim[3] = 3.0;
        write_volume(&input, &data, Some(&header)).unwrap();

        ZeroMeanNormalization::new().preprocess(&input, &output).unwrap();
        let out = read_volume(&output).unwrap();
        assert_eq!(out.header.unwrap().pixdim[3], 3.0);
        let mean = out.data.mean().unwrap();
        assert!(mean.abs() < 1e-6);
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
