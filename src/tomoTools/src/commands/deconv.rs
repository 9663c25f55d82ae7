
use std::path::PathBuf;

use anyhow::{Context, Result};
use gumdrop::Options;

use crate::ctf::WienerParams;
use crate::deconv::deconvolve_file;
use crate::logging::ResultExt;
use crate::resolve::resolve_paths;
use crate::tomogram::Tomogram;


#[derive(Options)]
pub struct Args {

	/// Central defocus in um, positive is underfocus
	defocus: Option<f64>,

	/// How fast the SNR falls off, usually 1.0 or 1.2
	#[options(default = "1.0")]
	snr_falloff: f64,

	/// Deconvolution strength: 1 for an SNR of 1000, 0.67 for 100, ...
	#[options(default = "1.0")]
	deconv_strength: f64,

	/// Fraction of Nyquist to cut off at the low end
	#[options(default = "0.02")]
	hp_nyquist: f64,

	/// Phase shift in degrees
	#[options(default = "0")]
	phase_shift: f64,

	/// The data has been phase-flipped
	phase_flipped: bool,

	/// Tomograms, or folders of them
	#[options(free, required, parse(try_from_str))]
	inputs: Vec<PathBuf>
}


pub fn run(args: Args) -> Result<()> {

	let defocus_um = args.defocus
		.context("No defocus given, reading it from the ctfplotter output isn't supported")?;

	let params = WienerParams {
		angpix: 1.0,
		defocus_um,
		snr_falloff: args.snr_falloff,
		deconv_strength: args.deconv_strength,
		hp_nyquist: args.hp_nyquist,
		phase_flipped: args.phase_flipped,
		phase_shift_deg: args.phase_shift
	};

	let tomos = resolve_paths::<Tomogram>(&args.inputs, false)?;
	for tomo in &tomos {
		// one bad volume shouldn't stop the rest
		deconvolve_file(tomo.path(), &params)
			.warn_err()
			.ok();
	}

	Ok(())
}
