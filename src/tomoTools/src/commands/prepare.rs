
use std::path::PathBuf;

use anyhow::Result;
use gumdrop::Options;
use tracing::info;

use crate::prepare::{prepare_all, PrepareOptions, Prepared};
use crate::tools::Tools;


#[derive(Options)]
pub struct Args {

	/// Also write the sums of the even and odd frames
	split_sum: bool,

	/// Fourier binning of the motion-corrected frames
	#[options(default = "1")]
	binning: u32,

	/// Sort stacks without frames by tilt angle
	reorder: bool,

	/// Folder with the frames, if not beside the mdoc
	#[options(parse(try_from_str))]
	frames: Option<PathBuf>,

	/// Gain reference (.dm4 or .mrc), if not named in the mdoc
	#[options(parse(try_from_str))]
	gain: Option<PathBuf>,

	/// SerialEM's RotationAndFlip for the gain reference
	rotation_and_flip: Option<i64>,

	/// Frames to group during motion correction
	#[options(default = "1")]
	group: u32,

	/// Comma-separated GPU ids, defaults to all
	gpus: Option<String>,

	/// Override the ExposureDose of every tilt (e/A^2)
	exposure_dose: Option<f64>,

	/// Keep the corrected micrographs instead of stacking them
	no_stack: bool,

	/// Stacks, mdocs, or folders of them, then the output folder
	#[options(free, required, parse(try_from_str))]
	paths: Vec<PathBuf>
}


pub fn run(tools: &Tools, mut args: Args) -> Result<()> {

	let Some(output_dir) = args.paths.pop() else {
		anyhow::bail!("No output folder");
	};
	if args.paths.is_empty() {
		anyhow::bail!("No inputs, only the output folder {}", output_dir.to_string_lossy());
	}

	let options = PrepareOptions {
		split_sum: args.split_sum,
		binning: args.binning,
		reorder: args.reorder,
		frames: args.frames,
		gain: args.gain,
		rotation_and_flip: args.rotation_and_flip,
		group: args.group,
		gpus: args.gpus,
		exposure_dose: args.exposure_dose,
		stack: !args.no_stack
	};

	let prepared = prepare_all(tools, &args.paths, &output_dir, &options)?;
	let skipped = prepared.iter()
		.filter(|p| **p == Prepared::Skipped)
		.count();
	info!("Prepared {} of {} tilt series into {}", prepared.len() - skipped, prepared.len(), output_dir.to_string_lossy());

	Ok(())
}
