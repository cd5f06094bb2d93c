use gdal::raster::{Buffer, GdalType, ResampleAlg};
use gdal::{Dataset, DriverManager};
use std::error::Error;
use std::path::Path;

// Raster metadata shared by all grids of one bucket
#[derive(Debug, Clone, Copy)]
pub struct RasterParams {
  pub width: usize,
  pub height: usize,
  pub origin: [f64; 2],
  pub resolution: [f64; 2],
  pub nodata: f64,
}

impl RasterParams {
  pub fn is_nodata(&self, value: f64) -> bool {
    value == self.nodata
  }

  pub fn same_shape(&self, other: &RasterParams) -> bool {
    self.width == other.width && self.height == other.height
  }
}

// Projection and affine transform carried from the source dataset to every
// derived output (except where a pipeline explicitly reprojects).
#[derive(Debug, Clone)]
pub struct GeoRef {
  pub projection: String,
  pub geotransform: [f64; 6],
}

// Two-dimensional grid stored as a flat row-major vector
pub struct Grid<T> {
  params: RasterParams,
  data: Vec<T>,
}

impl<T: Clone> Clone for Grid<T> {
  fn clone(&self) -> Self {
    Grid {
      params: self.params,
      data: self.data.clone(),
    }
  }
}

impl<T: Copy> Grid<T> {

  // Create a new grid filled with an initial value
  pub fn from_params(params: RasterParams, initial_value: T) -> Self {
    let data = vec![initial_value; params.width * params.height];
    Grid { params, data }
  }

  // Wrap an existing row-major vector; the length must match the shape
  pub fn from_vec(params: RasterParams, data: Vec<T>) -> Result<Self, String> {
    if data.len() != params.width * params.height {
      return Err(format!(
        "Grid data length {} does not match shape {} x {}",
        data.len(), params.width, params.height
      ));
    }
    Ok(Grid { params, data })
  }

  pub fn get(&self, row: usize, col: usize) -> T {
    self.data[row * self.params.width + col]
  }

  pub fn set(&mut self, row: usize, col: usize, value: T) {
    self.data[row * self.params.width + col] = value;
  }

  pub fn data(&self) -> &[T] {
    &self.data
  }

  pub fn data_mut(&mut self) -> &mut [T] {
    &mut self.data
  }

  pub fn params(&self) -> &RasterParams {
    &self.params
  }

  // Convert the grid to a GDAL buffer
  pub fn to_gdal_buffer(&self) -> Buffer<T> where T: GdalType {
    let size = (self.params.width, self.params.height);
    Buffer::new(size, self.data.clone())
  }
}

// All grids combined in one arithmetic step must share one shape.
// The check is explicit so a mismatch surfaces as a readable error
// instead of an index panic deep inside a pixel loop.
pub fn ensure_same_shape<T: Copy>(grids: &[&Grid<T>]) -> Result<(), String> {
  if let Some(first) = grids.first() {
    for grid in &grids[1..] {
      if !first.params().same_shape(grid.params()) {
        return Err(format!(
          "Raster shape mismatch: {} x {} vs {} x {}",
          first.params().width, first.params().height,
          grid.params().width, grid.params().height
        ));
      }
    }
  }
  Ok(())
}

// Open the first band of a raster file as an f32 grid,
// together with the projection and geotransform of the dataset.
pub fn open_band_f32<P: AsRef<Path>>(path: P) -> Result<(Grid<f32>, GeoRef), Box<dyn Error>> {
  let dataset = Dataset::open(path.as_ref())?;
  let geotransform = dataset.geo_transform()?;
  let projection = dataset.projection();

  let band = dataset.rasterband(1)?;
  let no_data = band.no_data_value();

  let (width, height) = dataset.raster_size();

  let params = RasterParams {
    width,
    height,
    origin: [geotransform[0], geotransform[3]],
    resolution: [geotransform[1], geotransform[5]],
    nodata: no_data.unwrap_or(f64::NAN),
  };

  let buffer = band.read_as::<f32>(
    (0, 0),
    (width, height),
    (width, height),
    Some(ResampleAlg::NearestNeighbour),
  )?;

  let grid = Grid::from_vec(params, buffer.data().to_vec())?;
  let georef = GeoRef { projection, geotransform };

  Ok((grid, georef))
}

// Create a GeoTIFF file and write the grid into `bands` bands
// (the same data replicated, which covers the 3-band RGB case).
pub fn write_grid<T: GdalType + Copy, P: AsRef<Path>>(
  path: P,
  grid: &Grid<T>,
  georef: &GeoRef,
  bands: usize,
  nodata: Option<f64>,
) -> Result<(), Box<dyn Error>> {
  let width = grid.params().width;
  let height = grid.params().height;

  let driver = DriverManager::get_driver_by_name("GTiff")?;
  let mut ds = driver.create_with_band_type::<T, _>(path.as_ref(), width, height, bands)?;

  ds.set_projection(&georef.projection)?;
  ds.set_geo_transform(&georef.geotransform)?;

  for index in 1..=bands {
    let mut band = ds.rasterband(index)?;
    if let Some(value) = nodata {
      band.set_no_data_value(Some(value))?;
    }
    let mut buffer = grid.to_gdal_buffer();
    band.write((0, 0), (width, height), &mut buffer)?;
  }

  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;

  fn params(width: usize, height: usize) -> RasterParams {
    RasterParams {
      width,
      height,
      origin: [0.0, 0.0],
      resolution: [1.0, -1.0],
      nodata: -9999.0,
    }
  }

  #[test]
  fn grid_roundtrip_row_major() {
    let mut grid = Grid::from_params(params(3, 2), 0.0f32);
    grid.set(1, 2, 7.0);
    assert_eq!(grid.get(1, 2), 7.0);
    assert_eq!(grid.data()[5], 7.0);
  }

  #[test]
  fn from_vec_rejects_bad_length() {
    assert!(Grid::from_vec(params(3, 2), vec![0.0f32; 5]).is_err());
  }

  #[test]
  fn shape_mismatch_is_reported() {
    let a = Grid::from_params(params(3, 2), 0.0f32);
    let b = Grid::from_params(params(2, 2), 0.0f32);
    let err = ensure_same_shape(&[&a, &b]).unwrap_err();
    assert!(err.contains("shape mismatch"));
  }
}
