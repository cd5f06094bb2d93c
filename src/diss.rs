use image::{Rgb, RgbImage};
use std::error::Error;
use std::fs;
use std::path::PathBuf;
use std::time::Instant;

use crate::raster::{ensure_same_shape, open_band_f32, write_grid, Grid};
use crate::text;

// Scaled TCI values above this are out of the valid index range
pub const TCI_VALID_MAX: f32 = 101.0;
// Substitute for an invalid single-period memory term
pub const TCI_DEFAULT: f32 = 50.0;
// Value forced onto pixels outside the target land cover
pub const MASKED: f32 = -1.0;

// Classification bin edges, left-inclusive: the class of a value is the
// number of edges less than or equal to it.
pub const CLASS_EDGES: [f32; 5] = [0.0, 0.5, 0.8, 1.5, 5.0];

// Discrete palette for the classified rendering; classes above the lowest
// take one entry each, class zero falls back to the first color.
pub const PALETTE: [[u8; 3]; 5] = [
  [0x00, 0x00, 0xFF],
  [0x00, 0xFF, 0x00],
  [0xFF, 0xFF, 0x00],
  [0xFF, 0x00, 0x00],
  [0xFF, 0x00, 0xFF],
];

// Calibration coefficients of the DISS formula. These are site specific
// and must be supplied per deployment; there are no built-in defaults.
#[derive(Debug, Clone, Copy)]
pub struct DissCoefficients {
  pub a: f64,
  pub b: f64,
  pub c: f64,
  pub base: f64,
  pub exp_offset: f64,
}

impl DissCoefficients {
  pub fn validate(&self) -> Result<(), String> {
    let values = [
      ("coef-a", self.a),
      ("coef-b", self.b),
      ("coef-c", self.c),
      ("base", self.base),
      ("exp-offset", self.exp_offset),
    ];
    for (name, value) in values {
      if !value.is_finite() {
        return Err(format!("Calibration coefficient '{}' is not a finite number", name));
      }
    }
    Ok(())
  }
}

// Configuration of the DISS batch for one year
#[derive(Debug, Clone)]
pub struct DissConfig {
  pub tci_dir: PathBuf,
  pub out_dir: PathBuf,
  pub reference: PathBuf,
  pub mask: PathBuf,
  pub year: i32,
  pub periods: Vec<u32>,
  pub coefficients: DissCoefficients,
}

impl DissConfig {
  // Coefficients and static files are checked before any raster is opened
  pub fn validate(&self) -> Result<(), String> {
    self.coefficients.validate()?;
    if !self.tci_dir.is_dir() {
      return Err(format!("TCI directory not found: {}", self.tci_dir.display()));
    }
    for (name, path) in [("reference", &self.reference), ("mask", &self.mask)] {
      if !path.is_file() {
        return Err(format!("Required {} raster not found: {}", name, path.display()));
      }
    }
    for period in &self.periods {
      if *period < 3 || *period > 36 {
        return Err(format!("Period {} out of range (3..36; two preceding periods are required)", period));
      }
    }
    if self.periods.is_empty() {
      return Err("No periods selected".to_string());
    }
    Ok(())
  }
}

// Recency-weighted memory terms of the three most recent periods. A term
// outside the valid index range is substituted: the domain default for the
// outer terms, the average of its two neighbors (taken raw) for the middle
// term.
pub fn memory_terms(current: f32, previous: f32, oldest: f32) -> (f32, f32, f32) {
  let m1 = if current <= TCI_VALID_MAX { current } else { TCI_DEFAULT };
  let m2 = if previous <= TCI_VALID_MAX { previous } else { 0.5 * (current + oldest) };
  let m3 = if oldest <= TCI_VALID_MAX { oldest } else { TCI_DEFAULT };
  (m1, m2, m3)
}

// The DISS combination formula
pub fn diss_value(reference: f32, terms: (f32, f32, f32), coef: &DissCoefficients) -> f32 {
  let (m1, m2, m3) = (terms.0 as f64, terms.1 as f64, terms.2 as f64);
  let exponent = 2.0 * (coef.exp_offset + coef.a * m1 + coef.b * m2 + coef.c * m3);
  ((reference as f64 - coef.base) * exponent.exp()) as f32
}

// Pixels outside the target land cover are forced to the masked value
// regardless of the computed result
pub fn apply_mask(diss: f32, mask: f32) -> f32 {
  if mask == 1.0 {
    diss
  } else {
    MASKED
  }
}

// Left-inclusive classification against CLASS_EDGES: 0.5 falls into the
// bin starting at 0.5. Masked and NaN values compare below every edge and
// land in class zero.
pub fn classify(value: f32) -> u8 {
  CLASS_EDGES.iter().filter(|edge| **edge <= value).count() as u8
}

// Render the classified raster through the fixed palette as a plain,
// non-georeferenced image
pub fn render_classes(classes: &Grid<u8>) -> RgbImage {
  let width = classes.params().width as u32;
  let height = classes.params().height as u32;
  let mut img = RgbImage::new(width, height);

  for row in 0..classes.params().height {
    for col in 0..classes.params().width {
      let class = classes.get(row, col) as usize;
      let color = PALETTE[class.saturating_sub(1).min(PALETTE.len() - 1)];
      img.put_pixel(col as u32, row as u32, Rgb(color));
    }
  }
  img
}

fn tci_path(config: &DissConfig, period: u32) -> PathBuf {
  config.tci_dir.join(format!("tci{}{:02}.tif", config.year, period))
}

fn process_period(
  config: &DissConfig,
  reference: &Grid<f32>,
  mask: &Grid<f32>,
  period: u32,
) -> Result<(), Box<dyn Error>> {
  let (current, georef) = open_band_f32(tci_path(config, period))?;
  let (previous, _) = open_band_f32(tci_path(config, period - 1))?;
  let (oldest, _) = open_band_f32(tci_path(config, period - 2))?;

  ensure_same_shape(&[&current, &previous, &oldest, reference, mask])?;

  let coef = &config.coefficients;
  let mut diss = Grid::from_params(*current.params(), MASKED);
  for index in 0..diss.data().len() {
    let terms = memory_terms(
      current.data()[index],
      previous.data()[index],
      oldest.data()[index],
    );
    let value = diss_value(reference.data()[index], terms, coef);
    diss.data_mut()[index] = apply_mask(value, mask.data()[index]);
  }

  let continuous_path = config.out_dir.join(format!("diss_{}{:02}.tif", config.year, period));
  write_grid(&continuous_path, &diss, &georef, 1, None)?;
  println!("  {}", text::light(format!("{} {}", text::ARROW, continuous_path.display())));

  let mut classes = Grid::from_params(*diss.params(), 0u8);
  for (out, value) in classes.data_mut().iter_mut().zip(diss.data()) {
    *out = classify(*value);
  }
  let class_path = config.out_dir.join(format!("diss_{}{:02}_kl.tif", config.year, period));
  write_grid(&class_path, &classes, &georef, 1, None)?;
  println!("  {}", text::light(format!("{} {}", text::ARROW, class_path.display())));

  let color_path = config.out_dir.join(format!("diss_kl_color_{}{:02}.png", config.year, period));
  render_classes(&classes).save(&color_path)?;
  println!("  {}", text::light(format!("{} {}", text::ARROW, color_path.display())));

  Ok(())
}

// Run the DISS batch. The climatological reference and land-use mask are
// loaded once and reused across periods; a missing TCI input skips the
// period with a diagnostic and the batch continues.
pub fn run(config: DissConfig) -> Result<(), Box<dyn Error>> {
  config.validate()?;
  fs::create_dir_all(&config.out_dir)?;

  let start = Instant::now();

  let (reference, _) = open_band_f32(&config.reference)?;
  let (mask, _) = open_band_f32(&config.mask)?;

  let mut processed = 0;
  for period in &config.periods {
    let inputs = [*period, period - 1, period - 2];
    if let Some(missing) = inputs.iter().find(|p| !tci_path(&config, **p).is_file()) {
      println!("{}: no file found for tci{}{:02}", text::warning("Skipped"), config.year, missing);
      continue;
    }

    println!("Processing period {}{:02}", config.year, period);
    match process_period(&config, &reference, &mask, *period) {
      Ok(()) => processed += 1,
      Err(e) => {
        let output = format!("{}: period {:02}: {}", text::error("Error"), period, e);
        eprintln!("{}", text::bold(output));
      }
    }
  }

  println!("{} {} periods processed in {:.2} seconds.",
    text::success(text::CHECK), processed, start.elapsed().as_secs_f64());

  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;

  const COEF: DissCoefficients = DissCoefficients {
    a: 0.01,
    b: 0.005,
    c: 0.0025,
    base: 0.4,
    exp_offset: -1.0,
  };

  #[test]
  fn memory_substitution() {
    // All valid: passed through
    assert_eq!(memory_terms(10.0, 20.0, 30.0), (10.0, 20.0, 30.0));
    // Outer terms fall back to the domain default
    assert_eq!(memory_terms(108.0, 20.0, 109.0), (TCI_DEFAULT, 20.0, TCI_DEFAULT));
    // Middle term alone invalid: average of raw neighbors
    assert_eq!(memory_terms(10.0, 108.0, 30.0), (10.0, 20.0, 30.0));
  }

  #[test]
  fn formula_matches_reference_evaluation() {
    let terms = (50.0, 50.0, 50.0);
    let expected = (1.2 - COEF.base) * (2.0 * (COEF.exp_offset + (COEF.a + COEF.b + COEF.c) * 50.0)).exp();
    let value = diss_value(1.2, terms, &COEF) as f64;
    assert!((value - expected).abs() < 1e-6);
  }

  #[test]
  fn mask_overrides_formula() {
    assert_eq!(apply_mask(3.7, 0.0), MASKED);
    assert_eq!(apply_mask(3.7, 2.0), MASKED);
    assert_eq!(apply_mask(3.7, 1.0), 3.7);
  }

  #[test]
  fn classification_edges_are_left_inclusive() {
    assert_eq!(classify(-1.0), 0);
    assert_eq!(classify(0.0), 1);
    assert_eq!(classify(0.5), 2);
    assert_eq!(classify(0.8), 3);
    assert_eq!(classify(1.5), 4);
    assert_eq!(classify(5.0), 5);
    assert_eq!(classify(100.0), 5);
    assert_eq!(classify(f32::NAN), 0);
  }

  #[test]
  fn coefficient_validation_rejects_non_finite() {
    let mut coef = COEF;
    coef.base = f64::NAN;
    assert!(coef.validate().is_err());
    assert!(COEF.validate().is_ok());
  }
}
