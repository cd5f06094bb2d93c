use approx::assert_relative_eq;
use std::fs;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use drought_indices::htc::{median_stack, ratio, scrub_negative, sum_stack, year_of_htc_file};
use drought_indices::raster::{Grid, RasterParams};
use drought_indices::tci::{self, TciConfig};
use drought_indices::warp::WarpParams;

fn params(width: usize, height: usize) -> RasterParams {
  RasterParams {
    width,
    height,
    origin: [0.0, 0.0],
    resolution: [1.0, -1.0],
    nodata: f64::NAN,
  }
}

fn pixel_stack(values: &[f32]) -> Vec<Grid<f32>> {
  values
    .iter()
    .map(|v| Grid::from_vec(params(1, 1), vec![*v]).unwrap())
    .collect()
}

#[test]
fn htc_ratio_of_summed_stacks() {
  // temp = [1,1,1,1], precip = [2,2,2,2] -> 8 / 4 = 2.0 per pixel
  let temp = sum_stack(&pixel_stack(&[1.0, 1.0, 1.0, 1.0])).unwrap();
  let precip = sum_stack(&pixel_stack(&[2.0, 2.0, 2.0, 2.0])).unwrap();
  let htc = ratio(&precip, &temp).unwrap();
  assert_relative_eq!(htc.data()[0], 2.0);
}

#[test]
fn nan_temperature_poisons_the_ratio() {
  let temp = sum_stack(&pixel_stack(&[1.0, f32::NAN])).unwrap();
  let precip = sum_stack(&pixel_stack(&[2.0, 2.0])).unwrap();
  let htc = ratio(&precip, &temp).unwrap();
  assert!(htc.data()[0].is_nan());
}

#[test]
fn division_by_zero_becomes_nan() {
  let temp = Grid::from_vec(params(1, 1), vec![0.0f32]).unwrap();
  let precip = Grid::from_vec(params(1, 1), vec![2.0f32]).unwrap();
  let htc = ratio(&precip, &temp).unwrap();
  assert!(htc.data()[0].is_nan());
}

#[test]
fn ratio_rejects_shape_mismatch() {
  let temp = Grid::from_params(params(2, 2), 1.0f32);
  let precip = Grid::from_params(params(1, 1), 2.0f32);
  assert!(ratio(&precip, &temp).is_err());
}

#[test]
fn median_of_odd_stack() {
  let median = median_stack(&pixel_stack(&[1.0, 2.0, 3.0, 4.0, 5.0])).unwrap();
  assert_relative_eq!(median.data()[0], 3.0);
}

#[test]
fn median_of_even_stack_averages_middle_values() {
  let median = median_stack(&pixel_stack(&[1.0, 2.0, 3.0, 4.0])).unwrap();
  assert_relative_eq!(median.data()[0], 2.5);
}

#[test]
fn median_with_negative_aggregate_is_kept_when_nonnegative() {
  // median of [-1, 2, 3] is 2; nothing to scrub
  let mut median = median_stack(&pixel_stack(&[-1.0, 2.0, 3.0])).unwrap();
  scrub_negative(&mut median);
  assert_relative_eq!(median.data()[0], 2.0);
}

#[test]
fn negative_median_is_scrubbed_to_nan() {
  let mut median = median_stack(&pixel_stack(&[-1.0, -1.0, -1.0])).unwrap();
  scrub_negative(&mut median);
  assert!(median.data()[0].is_nan());
}

#[test]
fn nan_input_poisons_the_median() {
  let median = median_stack(&pixel_stack(&[1.0, f32::NAN, 3.0])).unwrap();
  assert!(median.data()[0].is_nan());
}

#[test]
fn yearly_output_names_are_parsed_structurally() {
  assert_eq!(year_of_htc_file("HTC_2005.tif"), Some(2005));
  assert_eq!(year_of_htc_file("HTC_median_2001_2024.tif"), None);
  assert_eq!(year_of_htc_file("HTC_05.tif"), None);
  assert_eq!(year_of_htc_file("tci200512.tif"), None);
}

#[test]
fn pure_reductions_are_idempotent() {
  let stack = pixel_stack(&[1.5, 2.5, 3.5]);
  let first = sum_stack(&stack).unwrap();
  let second = sum_stack(&stack).unwrap();
  assert_eq!(first.data()[0].to_bits(), second.data()[0].to_bits());
}

// A missing input file must not abort the rest of the batch: a whole year
// of absent buckets runs to completion without an error.
#[test]
fn missing_tci_inputs_are_skipped_not_fatal() {
  let ts = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_millis();
  let base: PathBuf = std::env::temp_dir().join(format!("tci_skip.{}.{}", std::process::id(), ts));
  let input_dir = base.join("input");
  let out_dir = base.join("out");
  fs::create_dir_all(&input_dir).unwrap();

  let config = TciConfig {
    input_dir,
    out_dir: out_dir.clone(),
    first_year: 2022,
    last_year: 2022,
    warp: WarpParams {
      epsg: 2180,
      resolution: 1000.0,
      bounds: [500000.0, -5300000.0, 6378137.0, 6356752.3141],
      nodata: 255,
    },
  };

  assert!(tci::run(config).is_ok());
  // nothing was produced, but the batch finished
  assert_eq!(fs::read_dir(&out_dir).unwrap().count(), 0);

  fs::remove_dir_all(&base).unwrap();
}

#[test]
fn tci_config_validation_catches_bad_ranges() {
  let ts = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_millis();
  let base: PathBuf = std::env::temp_dir().join(format!("tci_cfg.{}.{}", std::process::id(), ts));
  fs::create_dir_all(&base).unwrap();

  let mut config = TciConfig {
    input_dir: base.clone(),
    out_dir: base.join("out"),
    first_year: 2022,
    last_year: 2021,
    warp: WarpParams {
      epsg: 2180,
      resolution: 1000.0,
      bounds: [0.0, 0.0, 1000.0, 1000.0],
      nodata: 255,
    },
  };
  assert!(config.validate().is_err());

  config.last_year = 2022;
  config.warp.resolution = -5.0;
  assert!(config.validate().is_err());

  config.warp.resolution = 1000.0;
  config.warp.bounds = [1000.0, 0.0, 0.0, 1000.0];
  assert!(config.validate().is_err());

  fs::remove_dir_all(&base).unwrap();
}
