use gdal::spatial_ref::{AxisMappingStrategy, CoordTransform, SpatialRef};
use std::error::Error;

use crate::raster::{GeoRef, Grid, RasterParams};

// Target of a reprojection: CRS by EPSG code, fixed pixel resolution and
// a fixed output bounding box [xmin, ymin, xmax, ymax] in target units.
#[derive(Debug, Clone, Copy)]
pub struct WarpParams {
  pub epsg: u32,
  pub resolution: f64,
  pub bounds: [f64; 4],
  pub nodata: u8,
}

impl WarpParams {
  // Shape of the output grid implied by bounds and resolution
  pub fn output_size(&self) -> (usize, usize) {
    let width = ((self.bounds[2] - self.bounds[0]) / self.resolution).ceil() as usize;
    let height = ((self.bounds[3] - self.bounds[1]) / self.resolution).ceil() as usize;
    (width, height)
  }
}

// Warp a single-band byte grid into the target CRS with nearest-neighbor
// sampling. Every output pixel center is transformed back into the source
// CRS and the nearest source pixel is copied; pixels falling outside the
// source extent become the nodata sentinel. The sentinel is carried as
// nodata on both sides of the warp.
pub fn warp_nearest(
  source: &Grid<u8>,
  source_georef: &GeoRef,
  warp: &WarpParams,
) -> Result<(Grid<u8>, GeoRef), Box<dyn Error>> {

  let mut src_srs = SpatialRef::from_wkt(&source_georef.projection)?;
  let mut dst_srs = SpatialRef::from_epsg(warp.epsg)?;
  src_srs.set_axis_mapping_strategy(AxisMappingStrategy::TraditionalGisOrder);
  dst_srs.set_axis_mapping_strategy(AxisMappingStrategy::TraditionalGisOrder);

  // Output pixel centers are transformed dst -> src
  let transform = CoordTransform::new(&dst_srs, &src_srs)?;

  let (width, height) = warp.output_size();
  let [xmin, _ymin, _xmax, ymax] = warp.bounds;

  let src_params = *source.params();
  let dst_params = RasterParams {
    width,
    height,
    origin: [xmin, ymax],
    resolution: [warp.resolution, -warp.resolution],
    nodata: warp.nodata as f64,
  };

  let mut output = Grid::from_params(dst_params, warp.nodata);

  let mut zs: [f64; 0] = [];
  for row in 0..height {
    // Transform one output row of pixel centers at a time
    let y = ymax - (row as f64 + 0.5) * warp.resolution;
    let mut xs: Vec<f64> = (0..width)
      .map(|col| xmin + (col as f64 + 0.5) * warp.resolution)
      .collect();
    let mut ys: Vec<f64> = vec![y; width];

    transform.transform_coords(&mut xs, &mut ys, &mut zs)?;

    for col in 0..width {
      let src_col = (xs[col] - src_params.origin[0]) / src_params.resolution[0];
      let src_row = (ys[col] - src_params.origin[1]) / src_params.resolution[1];

      if src_col >= 0.0 && src_row >= 0.0 {
        let (src_col, src_row) = (src_col as usize, src_row as usize);
        if src_col < src_params.width && src_row < src_params.height {
          let value = source.get(src_row, src_col);
          // source nodata stays nodata in the output
          if value != warp.nodata {
            output.set(row, col, value);
          }
        }
      }
    }
  }

  let georef = GeoRef {
    projection: dst_srs.to_wkt()?,
    geotransform: [xmin, warp.resolution, 0.0, ymax, 0.0, -warp.resolution],
  };

  Ok((output, georef))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn output_size_from_bounds() {
    let warp = WarpParams {
      epsg: 2180,
      resolution: 1000.0,
      bounds: [500000.0, 100000.0, 503000.0, 102000.0],
      nodata: 255,
    };
    assert_eq!(warp.output_size(), (3, 2));
  }
}
