
use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::Result;
use gumdrop::Options;
use tracing::info;

use crate::exclude::read_exclusion_file;
use crate::reconstruct::{reconstruct_all, ReconstructOptions};
use crate::resolve::resolve_paths;
use crate::tiltseries::TiltSeries;
use crate::tools::Tools;


#[derive(Options)]
pub struct Args {

	/// The only input is a text file listing the stacks, one per line
	batch: bool,

	/// Move each stack into a folder of its own first
	move_files: bool,

	/// Local (patch) alignment in AreTomo
	local: bool,

	/// Pixels to add to the estimated thickness
	#[options(default = "0")]
	extra_thickness: u32,

	/// Binning of the final tomogram
	#[options(default = "1")]
	bin: u32,

	/// SIRT-like filter iterations, defaults to the configured value
	sirt: Option<u32>,

	/// Keep the aligned stack
	keep_ali_stack: bool,

	/// Don't tilt the tomogram around the X axis
	zero_xaxis_tilt: bool,

	/// Reuse a previous alignment (.xf from etomo, or .aln from AreTomo)
	previous: bool,

	/// Comma-separated GPU ids, defaults to all
	gpus: Option<String>,

	/// Also reconstruct the EVN and ODD halves
	do_evn_odd: bool,

	/// Text file of `<stack> <views>` lines, views to exclude before aligning
	#[options(parse(try_from_str))]
	exclude: Option<PathBuf>,

	/// Stacks, folders of them, or the batch file
	#[options(free, required, parse(try_from_str))]
	inputs: Vec<PathBuf>
}


pub fn run(tools: &Tools, args: Args) -> Result<()> {

	let ts_list = resolve_paths::<TiltSeries>(&args.inputs, args.batch)?;

	let exclusions = match &args.exclude {
		Some(path) => read_exclusion_file(path)?,
		None => BTreeMap::new()
	};

	let options = ReconstructOptions {
		move_files: args.move_files,
		local: args.local,
		extra_thickness: args.extra_thickness,
		bin: args.bin,
		sirt: args.sirt,
		keep_ali_stack: args.keep_ali_stack,
		zero_xaxis_tilt: args.zero_xaxis_tilt,
		previous: args.previous,
		gpus: args.gpus,
		do_evn_odd: args.do_evn_odd,
		exclusions
	};

	let tomos = reconstruct_all(tools, &ts_list, &options)?;
	for tomo in &tomos {
		info!("Reconstructed {}", tomo.path().to_string_lossy());
	}

	Ok(())
}
