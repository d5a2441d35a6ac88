use crate::error::PrepError;
use crate::prep::{N4BiasCorrection, Preprocessor, ZeroMeanNormalization};
use crate::topo::{TopologyBuilder, UNetConfig};
use std::ffi::{c_char, CStr, CString, OsStr};
use std::path::Path;

#[repr(i32)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum InvokeResult {
    Ok = 0,
    /// 空指针或字符串非法。
    ArgumentError = 1,
    /// 配置无法解析或无法构建网络。
    ConfigError = 2,
    OpenError = 3,
    ShapeError = 4,
    SaveError = 5,
    /// 外部命令无法启动或执行失败。
    CommandError = 6,
    /// 数值上无法归一化（方差为0或掩膜为空）。
    NumericError = 7,
}

impl From<&PrepError> for InvokeResult {
    fn from(e: &PrepError) -> Self {
        match e {
            PrepError::Io { .. }
            | PrepError::ReadNpy { .. }
            | PrepError::ReadNifti { .. }
            | PrepError::UnsupportedFormat(_)
            | PrepError::Walk(_) => InvokeResult::OpenError,
            PrepError::WriteNpy { .. } | PrepError::WriteNifti { .. } => InvokeResult::SaveError,
            PrepError::MaskShape { .. } => InvokeResult::ShapeError,
            PrepError::EmptyMask | PrepError::ZeroVariance { .. } => InvokeResult::NumericError,
            PrepError::EmptyCommand
            | PrepError::Spawn { .. }
            | PrepError::CommandFailed { .. }
            | PrepError::WorkerLost => InvokeResult::CommandError,
        }
    }
}

impl From<Result<(), PrepError>> for InvokeResult {
    fn from(r: Result<(), PrepError>) -> Self {
        match r {
            Ok(()) => InvokeResult::Ok,
            Err(e) => {
                log::error!("{e}");
                InvokeResult::from(&e)
            }
        }
    }
}

#[inline]
fn cstr_to_rust_path(s: &CStr) -> &Path {
    use std::os::unix::prelude::OsStrExt;

    let os_fmt = OsStr::from_bytes(s.to_bytes());
    os_fmt.as_ref()
}

/// 空指针返回`None`。
#[inline]
unsafe fn path_arg<'a>(p: *const c_char) -> Option<&'a Path> {
    (!p.is_null()).then(|| cstr_to_rust_path(CStr::from_ptr(p)))
}

/// Build the U-Net described by the JSON `config` and write its graph as a
/// JSON document to `*out`. The string must be released with
/// [`unet_string_free`].
///
/// # Safety
///
/// `config` must be a C-style string and `out` must be valid for writes.
/// `*out` is left untouched unless the result is `InvokeResult::Ok`.
#[no_mangle]
pub unsafe extern "C" fn unet_topology_json(
    config: *const c_char,
    out: *mut *mut c_char,
) -> InvokeResult {
    if config.is_null() || out.is_null() {
        return InvokeResult::ArgumentError;
    }
    let config = match CStr::from_ptr(config).to_str() {
        Ok(s) => s,
        Err(_) => return InvokeResult::ArgumentError,
    };
    let graph = match UNetConfig::from_json(config).and_then(|c| TopologyBuilder::new(c).build())
    {
        Ok(g) => g,
        Err(e) => {
            log::error!("{e}");
            return InvokeResult::ConfigError;
        }
    };
    match CString::new(graph.to_json().dump()) {
        Ok(s) => {
            *out = s.into_raw();
            InvokeResult::Ok
        }
        Err(_) => InvokeResult::SaveError,
    }
}

/// Release a string returned by [`unet_topology_json`].
///
/// # Safety
///
/// `s` must be null or a pointer obtained from this library that has not been
/// freed yet.
#[no_mangle]
pub unsafe extern "C" fn unet_string_free(s: *mut c_char) {
    if !s.is_null() {
        drop(CString::from_raw(s));
    }
}

/// Run `N4BiasFieldCorrection` on `input`, writing `output`.
///
/// # Safety
///
/// `input` and `output` must be C-style strings.
#[no_mangle]
pub unsafe extern "C" fn n4_bias_correct(
    input: *const c_char,
    output: *const c_char,
) -> InvokeResult {
    match (path_arg(input), path_arg(output)) {
        (Some(i), Some(o)) => N4BiasCorrection::new().preprocess(i, o).into(),
        _ => InvokeResult::ArgumentError,
    }
}

/// Zero-mean, unit-variance normalization of `input` into `output`, with
/// statistics restricted to `mask > 0` when `mask` is not null.
///
/// # Safety
///
/// `input` and `output` must be C-style strings; `mask` must be null or a
/// C-style string.
#[no_mangle]
pub unsafe extern "C" fn zero_mean_normalize(
    input: *const c_char,
    mask: *const c_char,
    output: *const c_char,
) -> InvokeResult {
    match (path_arg(input), path_arg(output)) {
        (Some(i), Some(o)) => {
            let mask = path_arg(mask).map(Path::to_path_buf);
            ZeroMeanNormalization::new()
                .with_mask(mask)
                .preprocess(i, o)
                .into()
        }
        _ => InvokeResult::ArgumentError,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ptr;

    #[test]
    fn test_topology_json() {
        let config = CString::new(r#"{"input_shape": [16, 16, 16, 1], "output_type": "binary_label", "depth": 2}"#).unwrap();
        let mut out: *mut c_char = ptr::null_mut();
        unsafe {
            assert_eq!(unet_topology_json(config.as_ptr(), &mut out), InvokeResult::Ok);
            assert!(!out.is_null());
            let doc = json::parse(CStr::from_ptr(out).to_str().unwrap()).unwrap();
            assert_eq!(doc["depth"].as_usize(), Some(2));
            unet_string_free(out);
        }
    }

    #[test]
    fn test_topology_json_rejects_bad_input() {
        let mut out: *mut c_char = ptr::null_mut();
        let bad = CString::new(r#"{"input_shape": [16, 16, 16, 1]}"#).unwrap();
        let deep = CString::new(
            r#"{"input_shape": [16, 16, 16, 1], "output_type": "regression", "depth": 4611686018427387904}"#,
        )
        .unwrap();
        let wide = CString::new(
            r#"{"input_shape": [16, 16, 16, 1], "output_type": "regression", "depth": 1, "downsize_filters_factor": 1e-300}"#,
        )
        .unwrap();
        unsafe {
            assert_eq!(
                unet_topology_json(ptr::null(), &mut out),
                InvokeResult::ArgumentError
            );
            assert_eq!(
                unet_topology_json(bad.as_ptr(), &mut out),
                InvokeResult::ConfigError
            );
            assert_eq!(
                unet_topology_json(deep.as_ptr(), &mut out),
                InvokeResult::ConfigError
            );
            assert_eq!(
                unet_topology_json(wide.as_ptr(), &mut out),
                InvokeResult::ConfigError
            );
            unet_string_free(ptr::null_mut());
        }
        assert!(out.is_null());
    }

    #[test]
    fn test_preprocess_errors() {
        let missing = CString::new("/nonexistent/t1.npy").unwrap();
        let out = CString::new("/nonexistent/t1_ZeroNorm.npy").unwrap();
        unsafe {
            assert_eq!(
                zero_mean_normalize(missing.as_ptr(), ptr::null(), out.as_ptr()),
                InvokeResult::OpenError
            );
            assert_eq!(
                n4_bias_correct(ptr::null(), out.as_ptr()),
                InvokeResult::ArgumentError
            );
        }
    }

    #[test]
    fn test_write_errors_map_to_save_error() {
        use crate::prep::write_volume;
        use ndarray::{ArrayD, IxDyn};

        let data = ArrayD::<f32>::zeros(IxDyn(&[2, 2, 2]));
        let nii = write_volume(Path::new("/nonexistent/dir/t1.nii"), &data, None).unwrap_err();
        assert!(matches!(nii, PrepError::WriteNifti { .. }));
        assert_eq!(InvokeResult::from(&nii), InvokeResult::SaveError);

        let npy = write_volume(Path::new("/nonexistent/dir/t1.npy"), &data, None).unwrap_err();
        assert!(matches!(npy, PrepError::WriteNpy { .. }));
        assert_eq!(InvokeResult::from(&npy), InvokeResult::SaveError);

        let read = crate::prep::read_volume(Path::new("/nonexistent/dir/t1.nii")).unwrap_err();
        assert!(matches!(read, PrepError::ReadNifti { .. }));
        assert_eq!(InvokeResult::from(&read), InvokeResult::OpenError);
    }
}
