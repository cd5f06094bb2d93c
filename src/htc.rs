use std::error::Error;
use std::fs;
use std::path::PathBuf;
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Instant;

use crate::raster::{ensure_same_shape, open_band_f32, write_grid, GeoRef, Grid};
use crate::text;

// Configuration of the HTC aggregation batch. Input directories hold one
// subdirectory per year with the dekad rasters of one variable.
#[derive(Debug, Clone)]
pub struct HtcConfig {
  pub temp_dirs: Vec<PathBuf>,
  pub precip_dirs: Vec<PathBuf>,
  pub out_dir: PathBuf,
  pub first_year: i32,
  pub last_year: i32,
  pub median_first: i32,
  pub median_last: i32,
  pub jobs: usize,
}

impl HtcConfig {
  // Static inputs are checked up front so the batch cannot start
  // against a missing directory.
  pub fn validate(&self) -> Result<(), String> {
    for dir in self.temp_dirs.iter().chain(self.precip_dirs.iter()) {
      if !dir.is_dir() {
        return Err(format!("Input directory not found: {}", dir.display()));
      }
    }
    if self.first_year > self.last_year {
      return Err(format!("Invalid year range: {}..{}", self.first_year, self.last_year));
    }
    if self.median_first > self.median_last {
      return Err(format!("Invalid median year range: {}..{}", self.median_first, self.median_last));
    }
    if self.jobs == 0 {
      return Err("'jobs' must be greater than 0".to_string());
    }
    Ok(())
  }
}

// Elementwise sum over a raster stack. NaN in any input pixel
// propagates into the sum.
pub fn sum_stack(stack: &[Grid<f32>]) -> Result<Grid<f32>, String> {
  let first = stack.first().ok_or("Cannot sum an empty raster stack")?;
  let refs: Vec<&Grid<f32>> = stack.iter().collect();
  ensure_same_shape(&refs)?;

  let mut sum = Grid::from_params(*first.params(), 0.0f32);
  for grid in stack {
    for (acc, value) in sum.data_mut().iter_mut().zip(grid.data()) {
      *acc += *value;
    }
  }
  Ok(sum)
}

// Per-pixel ratio of precipitation sum to temperature sum. Division by
// zero and NaN operands both yield NaN; this is enforced explicitly, not
// left to IEEE infinity.
pub fn ratio(precip: &Grid<f32>, temp: &Grid<f32>) -> Result<Grid<f32>, String> {
  ensure_same_shape(&[precip, temp])?;

  let mut out = Grid::from_params(*precip.params(), f32::NAN);
  for ((r, p), t) in out.data_mut().iter_mut().zip(precip.data()).zip(temp.data()) {
    let value = *p / *t;
    *r = if value.is_finite() { value } else { f32::NAN };
  }
  Ok(out)
}

// Per-pixel median across a stack of yearly rasters. A NaN at a location
// in any year poisons the median at that location. For an even number of
// years the two middle values are averaged.
pub fn median_stack(stack: &[Grid<f32>]) -> Result<Grid<f32>, String> {
  let first = stack.first().ok_or("Cannot take the median of an empty raster stack")?;
  let refs: Vec<&Grid<f32>> = stack.iter().collect();
  ensure_same_shape(&refs)?;

  let params = *first.params();
  let mut out = Grid::from_params(params, f32::NAN);
  let mut column: Vec<f32> = Vec::with_capacity(stack.len());

  for index in 0..params.width * params.height {
    column.clear();
    let mut has_nan = false;
    for grid in stack {
      let value = grid.data()[index];
      if value.is_nan() {
        has_nan = true;
        break;
      }
      column.push(value);
    }
    if has_nan {
      continue;
    }
    column.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let n = column.len();
    let median = if n % 2 == 1 {
      column[n / 2]
    } else {
      0.5 * (column[n / 2 - 1] + column[n / 2])
    };
    out.data_mut()[index] = median;
  }
  Ok(out)
}

// Negative ratios are physically invalid and are scrubbed to NaN
pub fn scrub_negative(grid: &mut Grid<f32>) {
  for value in grid.data_mut() {
    if *value < 0.0 {
      *value = f32::NAN;
    }
  }
}

// Parse the year embedded in a yearly output name, e.g. "HTC_2005.tif".
// The filename convention is kept for compatibility with downstream
// consumers, but the year is parsed from the structure of the name
// rather than by byte position.
pub fn year_of_htc_file(name: &str) -> Option<i32> {
  let digits = name.strip_prefix("HTC_")?.strip_suffix(".tif")?;
  if digits.len() == 4 && digits.chars().all(|c| c.is_ascii_digit()) {
    digits.parse().ok()
  } else {
    None
  }
}

// All .tif files directly under <dir>/<year>/ for each configured directory
fn collect_year_files(dirs: &[PathBuf], year: i32) -> Vec<PathBuf> {
  let mut files = Vec::new();
  for dir in dirs {
    let year_dir = dir.join(year.to_string());
    if let Ok(entries) = fs::read_dir(&year_dir) {
      for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().map(|e| e == "tif").unwrap_or(false) {
          files.push(path);
        }
      }
    }
  }
  files.sort();
  files
}

fn load_stack(files: &[PathBuf]) -> Result<(Vec<Grid<f32>>, GeoRef), Box<dyn Error>> {
  let mut stack = Vec::with_capacity(files.len());
  let mut georef = None;
  for file in files {
    let (grid, file_georef) = open_band_f32(file)?;
    georef.get_or_insert(file_georef);
    stack.push(grid);
  }
  Ok((stack, georef.ok_or("Empty raster stack")?))
}

// Compute and write the HTC raster of a single year
fn process_year(config: &HtcConfig, year: i32) -> Result<String, Box<dyn Error>> {
  let temp_files = collect_year_files(&config.temp_dirs, year);
  let precip_files = collect_year_files(&config.precip_dirs, year);

  if temp_files.is_empty() || precip_files.is_empty() {
    return Err(format!("No input rasters found for year {}", year).into());
  }

  let (temp_stack, georef) = load_stack(&temp_files)?;
  let (precip_stack, _) = load_stack(&precip_files)?;

  let temp_sum = sum_stack(&temp_stack)?;
  let precip_sum = sum_stack(&precip_stack)?;
  let htc = ratio(&precip_sum, &temp_sum)?;

  let output_path = config.out_dir.join(format!("HTC_{}.tif", year));
  write_grid(&output_path, &htc, &georef, 1, Some(f64::NAN))?;

  Ok(format!("HTC_{}.tif", year))
}

// Second phase: per-pixel median across the yearly outputs whose embedded
// year falls in the configured median range.
fn process_median(config: &HtcConfig) -> Result<String, Box<dyn Error>> {
  let mut files = Vec::new();
  for entry in fs::read_dir(&config.out_dir)? {
    let path = entry?.path();
    let name = match path.file_name().and_then(|n| n.to_str()) {
      Some(name) => name.to_string(),
      None => continue,
    };
    if let Some(year) = year_of_htc_file(&name) {
      if year >= config.median_first && year <= config.median_last {
        files.push(path);
      }
    }
  }
  files.sort();

  if files.is_empty() {
    return Err(format!(
      "No yearly HTC rasters found in {} for years {}..{}",
      config.out_dir.display(), config.median_first, config.median_last
    ).into());
  }

  let (stack, georef) = load_stack(&files)?;
  let mut median = median_stack(&stack)?;
  scrub_negative(&mut median);

  let name = format!("HTC_median_{}_{}.tif", config.median_first, config.median_last);
  write_grid(config.out_dir.join(&name), &median, &georef, 1, Some(f64::NAN))?;

  Ok(name)
}

// Run the aggregation batch: yearly HTC rasters computed by a worker pool,
// then the multi-year median once all workers have finished. Joining the
// pool is the phase barrier; the median pass reads the yearly outputs back
// from disk.
pub fn run(config: HtcConfig) -> Result<(), Box<dyn Error>> {
  config.validate()?;
  fs::create_dir_all(&config.out_dir)?;

  let start = Instant::now();
  let years: Vec<i32> = (config.first_year..=config.last_year).collect();
  let jobs = config.jobs.min(years.len().max(1));

  let config = Arc::new(config);
  let (tx, rx) = mpsc::channel();
  let mut handles = vec![];

  // One worker per job; each worker takes the years matching its id
  // modulo the job count and opens its own file handles.
  for tid in 0..jobs {
    let tx = tx.clone();
    let config = Arc::clone(&config);
    let years = years.clone();

    let handle = thread::spawn(move || {
      for (index, year) in years.iter().enumerate() {
        if index % jobs != tid {
          continue;
        }
        let result = process_year(&config, *year).map_err(|e| e.to_string());
        tx.send((*year, result)).unwrap();
      }
    });
    handles.push(handle);
  }
  drop(tx);

  let mut written = 0;
  for (year, result) in rx {
    match result {
      Ok(name) => {
        written += 1;
        println!("{} {}", text::success(text::CHECK), text::light(format!("{} {}", text::ARROW, name)));
      }
      Err(message) => {
        println!("{}: year {}: {}", text::warning("Skipped"), year, message);
      }
    }
  }

  // Barrier: the median pass must not start before every yearly output exists
  for handle in handles {
    handle.join().unwrap();
  }

  println!("{} {} yearly HTC rasters written in {:.2} seconds.",
    text::success(text::CHECK), written, start.elapsed().as_secs_f64());

  let part = Instant::now();
  let name = process_median(&config)?;
  println!("{} Multi-year median {} written in {:.2} seconds.",
    text::success(text::CHECK), name, part.elapsed().as_secs_f64());

  Ok(())
}
