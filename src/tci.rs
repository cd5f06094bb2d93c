use std::error::Error;
use std::fs;
use std::path::PathBuf;
use std::time::Instant;

use crate::raster::{open_band_f32, write_grid, Grid};
use crate::text;
use crate::warp::{warp_nearest, WarpParams};

pub const PERIODS_PER_YEAR: u32 = 36;

// Raw TCI values are valid in [0, 10000]; everything else is flagged
pub const SENTINEL_INVALID: u8 = 108;
// True zero in the raw data marks open water in the color rendering
pub const SENTINEL_WATER: u8 = 109;

// Configuration of the TCI scaling and reprojection batch
#[derive(Debug, Clone)]
pub struct TciConfig {
  pub input_dir: PathBuf,
  pub out_dir: PathBuf,
  pub first_year: i32,
  pub last_year: i32,
  pub warp: WarpParams,
}

impl TciConfig {
  pub fn validate(&self) -> Result<(), String> {
    if !self.input_dir.is_dir() {
      return Err(format!("Input directory not found: {}", self.input_dir.display()));
    }
    if self.first_year > self.last_year {
      return Err(format!("Invalid year range: {}..{}", self.first_year, self.last_year));
    }
    if self.warp.resolution <= 0.0 {
      return Err("Target resolution must be positive".to_string());
    }
    if self.warp.bounds[0] >= self.warp.bounds[2] || self.warp.bounds[1] >= self.warp.bounds[3] {
      return Err("Target bounds must satisfy xmin < xmax and ymin < ymax".to_string());
    }
    Ok(())
  }
}

// Scale a raw TCI sample into the byte range: values in [0, 10000] map to
// (value / 100) + 1, everything else becomes the invalid sentinel. The
// clamp before the cast makes the byte-range contract explicit instead of
// trusting upstream validation.
pub fn scale_tci(raw: f32) -> u8 {
  if raw >= 0.0 && raw <= 10000.0 {
    ((raw / 100.0) + 1.0).clamp(0.0, 255.0) as u8
  } else {
    SENTINEL_INVALID
  }
}

// Color rendering value: raw zero is recoded to the water sentinel,
// everything else carries the scaled value.
pub fn color_code(raw: f32, scaled: u8) -> u8 {
  if raw == 0.0 {
    SENTINEL_WATER
  } else {
    scaled
  }
}

// Expected input file for one (year, period) bucket. Both the .tif and the
// .tiff spelling occur in the source archives.
fn find_input(config: &TciConfig, year: i32, period: u32) -> Option<PathBuf> {
  for extension in ["tif", "tiff"] {
    let path = config.input_dir.join(format!("tci{}{:02}.{}", year, period, extension));
    if path.is_file() {
      return Some(path);
    }
  }
  None
}

fn process_bucket(config: &TciConfig, year: i32, period: u32, input: &PathBuf) -> Result<(), Box<dyn Error>> {
  let file_code = format!("tci{}{:02}", year, period);
  let (raw, georef) = open_band_f32(input)?;

  // Scale into the byte range, preserving CRS and transform
  let mut scaled = Grid::from_params(*raw.params(), SENTINEL_INVALID);
  for (out, value) in scaled.data_mut().iter_mut().zip(raw.data()) {
    *out = scale_tci(*value);
  }
  let scaled_path = config.out_dir.join(format!("{}_scaled.tif", file_code));
  write_grid(&scaled_path, &scaled, &georef, 1, None)?;
  println!("  {}", text::light(format!("{} {}", text::ARROW, scaled_path.display())));

  // Warp into the target CRS at the fixed resolution and bounding box
  let (warped, warped_georef) = warp_nearest(&scaled, &georef, &config.warp)?;
  let warped_path = config.out_dir.join(format!("{}_{}.tif", file_code, config.warp.epsg));
  write_grid(&warped_path, &warped, &warped_georef, 1, Some(config.warp.nodata as f64))?;
  println!("  {}", text::light(format!("{} {}", text::ARROW, warped_path.display())));

  // Baseline RGB rendering: the scaled value in all three bands,
  // raw zero recoded to the water sentinel
  let mut color = scaled.clone();
  for (out, value) in color.data_mut().iter_mut().zip(raw.data()) {
    *out = color_code(*value, *out);
  }
  let color_path = config.out_dir.join(format!("{}_rgb.tif", file_code));
  write_grid(&color_path, &color, &georef, 3, None)?;
  println!("  {}", text::light(format!("{} {}", text::ARROW, color_path.display())));

  Ok(())
}

// Run the scaling batch over every (year, period) bucket. A missing input
// file and a failed warp are both non-fatal: the bucket is skipped with a
// diagnostic and the batch continues.
pub fn run(config: TciConfig) -> Result<(), Box<dyn Error>> {
  config.validate()?;
  fs::create_dir_all(&config.out_dir)?;

  let start = Instant::now();
  let mut processed = 0;

  for year in config.first_year..=config.last_year {
    for period in 1..=PERIODS_PER_YEAR {
      let input = match find_input(&config, year, period) {
        Some(path) => path,
        None => {
          println!("{}: no file found for tci{}{:02}", text::warning("Skipped"), year, period);
          continue;
        }
      };

      println!("Processing {}", input.display());
      match process_bucket(&config, year, period, &input) {
        Ok(()) => processed += 1,
        Err(e) => {
          let output = format!("{}: tci{}{:02}: {}", text::error("Error"), year, period, e);
          eprintln!("{}", text::bold(output));
        }
      }
    }
  }

  println!("{} {} buckets processed in {:.2} seconds.",
    text::success(text::CHECK), processed, start.elapsed().as_secs_f64());

  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn scaling_boundaries() {
    assert_eq!(scale_tci(0.0), 1);
    assert_eq!(scale_tci(10000.0), 101);
    assert_eq!(scale_tci(10001.0), SENTINEL_INVALID);
    assert_eq!(scale_tci(-1.0), SENTINEL_INVALID);
  }

  #[test]
  fn scaling_truncates_fractional_values() {
    // 150 / 100 + 1 = 2.5 -> byte cast truncates
    assert_eq!(scale_tci(150.0), 2);
  }

  #[test]
  fn water_recode_applies_to_raw_zero_only() {
    assert_eq!(color_code(0.0, scale_tci(0.0)), SENTINEL_WATER);
    assert_eq!(color_code(200.0, scale_tci(200.0)), 3);
  }
}
