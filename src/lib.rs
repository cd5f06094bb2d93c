pub mod diss;
pub mod htc;
pub mod raster;
pub mod tci;
pub mod text;
pub mod warp;
