use clap::{Arg, ArgAction, ArgMatches, Command};
use std::error::Error;
use std::path::PathBuf;
use std::time::Instant;

use drought_indices::diss::{self, DissCoefficients, DissConfig};
use drought_indices::htc::{self, HtcConfig};
use drought_indices::tci::{self, TciConfig};
use drought_indices::text;
use drought_indices::warp::WarpParams;

fn build_cli() -> Command {
  let htc = Command::new("htc")
    .about("Aggregate yearly HTC rasters and their multi-year median")
    .arg(
      Arg::new("temp_dir")
      .long("temp-dir")
      .value_name("dir")
      .action(ArgAction::Append)
      .required(true)
      .help("Temperature input directory holding one subdirectory per year (repeatable)"),
    )
    .arg(
      Arg::new("precip_dir")
      .long("precip-dir")
      .value_name("dir")
      .action(ArgAction::Append)
      .required(true)
      .help("Precipitation input directory holding one subdirectory per year (repeatable)"),
    )
    .arg(
      Arg::new("out_dir")
      .short('o')
      .long("out-dir")
      .value_name("dir")
      .required(true)
      .help("Directory for the yearly and median HTC rasters"),
    )
    .arg(
      Arg::new("first_year")
      .long("first-year")
      .value_parser(clap::value_parser!(i32))
      .required(true)
      .help("First year of the aggregation range (inclusive)"),
    )
    .arg(
      Arg::new("last_year")
      .long("last-year")
      .value_parser(clap::value_parser!(i32))
      .required(true)
      .help("Last year of the aggregation range (inclusive)"),
    )
    .arg(
      Arg::new("median_first")
      .long("median-first")
      .value_parser(clap::value_parser!(i32))
      .required(true)
      .help("First year included in the multi-year median"),
    )
    .arg(
      Arg::new("median_last")
      .long("median-last")
      .value_parser(clap::value_parser!(i32))
      .required(true)
      .help("Last year included in the multi-year median"),
    )
    .arg(
      Arg::new("jobs")
      .short('j')
      .long("jobs")
      .help("Number of worker threads (if omitted, all available processors are used)"),
    );

  let tci = Command::new("tci")
    .about("Scale raw TCI rasters, reproject them and render an RGB baseline")
    .arg(
      Arg::new("input_dir")
      .short('i')
      .long("input-dir")
      .value_name("dir")
      .required(true)
      .help("Directory holding the raw tci<year><period> rasters"),
    )
    .arg(
      Arg::new("out_dir")
      .short('o')
      .long("out-dir")
      .value_name("dir")
      .required(true)
      .help("Directory for the scaled, reprojected and RGB outputs"),
    )
    .arg(
      Arg::new("first_year")
      .long("first-year")
      .value_parser(clap::value_parser!(i32))
      .required(true)
      .help("First year of the batch (inclusive)"),
    )
    .arg(
      Arg::new("last_year")
      .long("last-year")
      .value_parser(clap::value_parser!(i32))
      .required(true)
      .help("Last year of the batch (inclusive)"),
    )
    .arg(
      Arg::new("epsg")
      .long("epsg")
      .value_parser(clap::value_parser!(u32))
      .default_value("2180")
      .help("EPSG code of the target coordinate reference system"),
    )
    .arg(
      Arg::new("resolution")
      .long("resolution")
      .value_parser(clap::value_parser!(f64))
      .default_value("1000")
      .help("Target pixel resolution in units of the target system"),
    )
    .arg(
      Arg::new("bounds")
      .long("bounds")
      .value_name("coord")
      .num_args(4)
      .allow_hyphen_values(true)
      .value_parser(clap::value_parser!(f64))
      .default_values(["500000", "-5300000", "6378137", "6356752.3141"])
      .help("Output bounding box as xmin ymin xmax ymax in target units"),
    )
    .arg(
      Arg::new("nodata")
      .long("nodata")
      .value_parser(clap::value_parser!(u8))
      .default_value("255")
      .help("Nodata sentinel carried through the warp"),
    );

  let diss = Command::new("diss")
    .about("Combine TCI history with a climatological reference into the DISS index")
    .arg(
      Arg::new("tci_dir")
      .long("tci-dir")
      .value_name("dir")
      .required(true)
      .help("Directory holding the scaled tci<year><period> rasters"),
    )
    .arg(
      Arg::new("out_dir")
      .short('o')
      .long("out-dir")
      .value_name("dir")
      .required(true)
      .help("Directory for the continuous, classified and colored outputs"),
    )
    .arg(
      Arg::new("reference")
      .long("reference")
      .value_name("file")
      .required(true)
      .help("Static climatological reference raster (multi-year HTC median)"),
    )
    .arg(
      Arg::new("mask")
      .long("mask")
      .value_name("file")
      .required(true)
      .help("Static land-use mask raster; pixels where the mask is not 1 are suppressed"),
    )
    .arg(
      Arg::new("year")
      .long("year")
      .value_parser(clap::value_parser!(i32))
      .required(true)
      .help("Year of the processed periods"),
    )
    .arg(
      Arg::new("periods")
      .long("periods")
      .value_name("period")
      .num_args(1..)
      .value_parser(clap::value_parser!(u32))
      .help("Periods to process (default 5..=30; each needs its two predecessors)"),
    )
    .arg(
      Arg::new("coef_a")
      .long("coef-a")
      .value_parser(clap::value_parser!(f64))
      .allow_hyphen_values(true)
      .required(true)
      .help("Calibration weight of the current-period memory term (site specific, no default)"),
    )
    .arg(
      Arg::new("coef_b")
      .long("coef-b")
      .value_parser(clap::value_parser!(f64))
      .allow_hyphen_values(true)
      .required(true)
      .help("Calibration weight of the previous-period memory term (site specific, no default)"),
    )
    .arg(
      Arg::new("coef_c")
      .long("coef-c")
      .value_parser(clap::value_parser!(f64))
      .allow_hyphen_values(true)
      .required(true)
      .help("Calibration weight of the oldest memory term (site specific, no default)"),
    )
    .arg(
      Arg::new("base")
      .long("base")
      .value_parser(clap::value_parser!(f64))
      .allow_hyphen_values(true)
      .required(true)
      .help("Base value subtracted from the climatological reference (site specific, no default)"),
    )
    .arg(
      Arg::new("exp_offset")
      .long("exp-offset")
      .value_parser(clap::value_parser!(f64))
      .allow_hyphen_values(true)
      .required(true)
      .help("Constant offset inside the exponential (site specific, no default)"),
    );

  Command::new("Drought Indices Toolkit")
  .version(env!("CARGO_PKG_VERSION"))
  .author("Remote Sensing Centre, Institute of Geodesy and Cartography")
  .about("Command-line tools for computing HTC and DISS drought indices from raster time series.")
  .subcommand_required(true)
  .arg_required_else_help(true)
  .subcommand(htc)
  .subcommand(tci)
  .subcommand(diss)
}

// Number of worker threads, clamped to the processor count
fn parse_jobs(matches: &ArgMatches) -> usize {
  let num_procs = num_cpus::get();
  if let Some(jobs_str) = matches.get_one::<String>("jobs") {
    match jobs_str.parse::<usize>() {
      Ok(max_jobs) if max_jobs > 0 => std::cmp::min(max_jobs, num_procs),
      Ok(_) => {
        println!("{}: 'jobs' value must be greater than 0. Using the number of processors.\n", text::warning("Warning"));
        num_procs
      }
      Err(_) => {
        println!("{}: 'jobs' value is not a valid number. Using the number of processors.\n", text::warning("Warning"));
        num_procs
      }
    }
  } else {
    num_procs
  }
}

fn htc_config(matches: &ArgMatches) -> HtcConfig {
  HtcConfig {
    temp_dirs: matches.get_many::<String>("temp_dir").unwrap().map(PathBuf::from).collect(),
    precip_dirs: matches.get_many::<String>("precip_dir").unwrap().map(PathBuf::from).collect(),
    out_dir: PathBuf::from(matches.get_one::<String>("out_dir").unwrap()),
    first_year: *matches.get_one::<i32>("first_year").unwrap(),
    last_year: *matches.get_one::<i32>("last_year").unwrap(),
    median_first: *matches.get_one::<i32>("median_first").unwrap(),
    median_last: *matches.get_one::<i32>("median_last").unwrap(),
    jobs: parse_jobs(matches),
  }
}

fn tci_config(matches: &ArgMatches) -> TciConfig {
  let bounds: Vec<f64> = matches.get_many::<f64>("bounds").unwrap().copied().collect();
  TciConfig {
    input_dir: PathBuf::from(matches.get_one::<String>("input_dir").unwrap()),
    out_dir: PathBuf::from(matches.get_one::<String>("out_dir").unwrap()),
    first_year: *matches.get_one::<i32>("first_year").unwrap(),
    last_year: *matches.get_one::<i32>("last_year").unwrap(),
    warp: WarpParams {
      epsg: *matches.get_one::<u32>("epsg").unwrap(),
      resolution: *matches.get_one::<f64>("resolution").unwrap(),
      bounds: [bounds[0], bounds[1], bounds[2], bounds[3]],
      nodata: *matches.get_one::<u8>("nodata").unwrap(),
    },
  }
}

fn diss_config(matches: &ArgMatches) -> DissConfig {
  let periods: Vec<u32> = match matches.get_many::<u32>("periods") {
    Some(values) => values.copied().collect(),
    None => (5..=30).collect(),
  };
  DissConfig {
    tci_dir: PathBuf::from(matches.get_one::<String>("tci_dir").unwrap()),
    out_dir: PathBuf::from(matches.get_one::<String>("out_dir").unwrap()),
    reference: PathBuf::from(matches.get_one::<String>("reference").unwrap()),
    mask: PathBuf::from(matches.get_one::<String>("mask").unwrap()),
    year: *matches.get_one::<i32>("year").unwrap(),
    periods,
    coefficients: DissCoefficients {
      a: *matches.get_one::<f64>("coef_a").unwrap(),
      b: *matches.get_one::<f64>("coef_b").unwrap(),
      c: *matches.get_one::<f64>("coef_c").unwrap(),
      base: *matches.get_one::<f64>("base").unwrap(),
      exp_offset: *matches.get_one::<f64>("exp_offset").unwrap(),
    },
  }
}

fn main() -> Result<(), Box<dyn Error>> {
  let start_time = Instant::now();

  let app = build_cli();

  let line = "-".repeat(72);
  let dline = "=".repeat(72);

  println!("\n\
  {}\n\
  {}\n\
  {}\n\
  Author:\n{}\n\
  {}\n",
  format!("{} {}", text::highlight("Drought Indices Toolkit"), app.get_version().unwrap()),
  line,
  app.get_about().unwrap(),
  app.get_author().unwrap(),
  dline);

  let matches = app.get_matches();

  let result = match matches.subcommand() {
    Some(("htc", sub)) => htc::run(htc_config(sub)),
    Some(("tci", sub)) => tci::run(tci_config(sub)),
    Some(("diss", sub)) => diss::run(diss_config(sub)),
    _ => unreachable!("subcommand is required"),
  };

  if let Err(e) = result {
    let output = format!("{}: {}", text::error("Error"), e);
    eprintln!("{}\n", text::bold(output));
    std::process::exit(1);
  }

  let elapsed_time = start_time.elapsed();
  println!("{}", line);
  println!("{}", text::success("Processing completed successfully."));
  println!("Total elapsed time: {:.2} seconds.", elapsed_time.as_secs_f64());
  println!("");

  Ok(())
}
