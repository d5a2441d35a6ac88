//! 3D U-Net拓扑构建与体数据预处理。

pub mod error;
pub mod prelude;
pub mod prep;
pub mod prep_ffi;
pub mod topo;
