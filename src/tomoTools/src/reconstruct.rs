
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::align::{self, AreTomoOptions};
use crate::comfile;
use crate::config::ConfigReconstruction;
use crate::dose;
use crate::error::require_file;
use crate::exclude;
use crate::logging::ResultExt;
use crate::naming::{self, Halves};
use crate::tiltseries::TiltSeries;
use crate::tomogram::Tomogram;
use crate::tools::{imod, Tools};


#[derive(Debug, Clone, PartialEq)]
pub struct ReconstructionParams {
	pub bin: u32,
	pub sirt: u32,
	/// unbinned pixels
	pub thickness: u32,
	pub x_axis_tilt: f64,
	/// unbinned pixels
	pub z_shift: f64,
	pub do_evn_odd: bool,
	/// rotate into the usual orientation with trimvol, otherwise keep the raw reconstruction
	pub trim: bool,
	/// let trimvol scale to bytes
	pub convert_to_byte: bool,
	/// the tilt angles, when they're not beside the stack
	pub tlt: Option<PathBuf>
}

impl Default for ReconstructionParams {
	fn default() -> Self {
		Self {
			bin: 1,
			sirt: 5,
			thickness: 3000,
			x_axis_tilt: 0.0,
			z_shift: 0.0,
			do_evn_odd: false,
			trim: true,
			convert_to_byte: true,
			tlt: None
		}
	}
}


/// names derived from the stack the alignment started with, so `TS_01_ali_filtered.mrc` becomes `TS_01`
fn base_stem(ts: &TiltSeries) -> String {
	let stem = ts.stem();
	let stem = stem.strip_suffix("_filtered").unwrap_or(&stem);
	let stem = stem.strip_suffix("_ali").unwrap_or(stem);
	stem.to_string()
}


impl Tomogram {

	/// Reconstructs an aligned stack with weighted back-projection.
	/// The result is `<stem>_rec_bin_<bin>.mrc` when trimmed, else `<stem>_full_rec.mrc`.
	#[tracing::instrument(skip_all, level = 5, name = "Reconstruct")]
	pub fn from_tiltseries(tools: &Tools, ts: &TiltSeries, params: &ReconstructionParams) -> Result<Tomogram> {

		let tlt = require_file(params.tlt.clone().unwrap_or_else(|| ts.tlt_path()))?;
		let [_, ny, nx] = ts.dim_zyx()?;
		let full_image = (nx as u32, ny as u32);
		let stem = base_stem(ts);

		let full_rec = ts.path().with_file_name(format!("{}_full_rec.mrc", stem));
		let rec = ts.path().with_file_name(format!("{}_rec_bin_{}.mrc", stem, params.bin));

		let reconstruct = |input: &Path, full_rec: &Path, rec: &Path| -> Result<PathBuf> {

			let binned = (params.bin != 1)
				.then(|| naming::with_suffix(input, &format!("_bin{}", params.bin)));
			if let Some(binned) = &binned {
				tools.run_checked(&imod::binvol(tools, params.bin, input, binned))?;
			}

			tools.run_checked(&imod::tilt(tools, &imod::TiltArgs {
				input: binned.clone().unwrap_or_else(|| input.to_path_buf()),
				output: full_rec.to_path_buf(),
				tlt: tlt.clone(),
				bin: params.bin,
				sirt: params.sirt,
				thickness: params.thickness,
				x_axis_tilt: params.x_axis_tilt,
				z_shift: params.z_shift,
				full_image
			}))?;
			if let Some(binned) = &binned {
				remove_if_present(binned)?;
			}

			if !params.trim {
				return Ok(full_rec.to_path_buf());
			}
			tools.run_checked(&imod::trimvol(tools, &imod::TrimvolArgs {
				input: full_rec.to_path_buf(),
				output: rec.to_path_buf(),
				thickness: params.thickness/params.bin.max(1),
				convert_to_byte: params.convert_to_byte
			}))?;
			remove_if_present(full_rec)?;
			Ok(rec.to_path_buf())
		};

		let out = reconstruct(ts.path(), &full_rec, &rec)?;
		let tomo = Tomogram::new(&out)?;
		info!("Reconstructed {} into {}", ts.path().to_string_lossy(), out.to_string_lossy());

		let Some(halves) = ts.halves().filter(|_| params.do_evn_odd) else {
			return Ok(tomo);
		};

		let full_rec_halves = Halves::for_path(&full_rec);
		let rec_halves = Halves::for_path(&rec);
		let evn = reconstruct(&halves.evn, &full_rec_halves.evn, &rec_halves.evn)?;
		let odd = reconstruct(&halves.odd, &full_rec_halves.odd, &rec_halves.odd)?;
		info!("Reconstructed the EVN and ODD stacks of {}", ts.path().to_string_lossy());

		tomo.with_split_files(evn, odd)
	}


	/// Reconstructs with 3D CTF correction, chunked by ctf3dsetup and run by processchunks.
	#[tracing::instrument(skip_all, level = 5, name = "Reconstruct3dCTF")]
	pub fn from_tiltseries_3dctf(tools: &Tools, ts: &TiltSeries, params: &ReconstructionParams, defocus: &Path, cpus: u32) -> Result<Tomogram> {

		let tlt = require_file(params.tlt.clone().unwrap_or_else(|| ts.tlt_path()))?;
		let defocus = require_file(defocus)?;
		let [_, ny, nx] = ts.dim_zyx()?;
		let angpix = ts.angpix()?;
		let microscope = &tools.config().microscope;
		let stem = base_stem(ts);
		let dir = ts.path().parent()
			.unwrap_or(Path::new("."))
			.to_path_buf();

		let full_rec = ts.path().with_file_name(format!("{}_full_rec.mrc", stem));
		let rec = ts.path().with_file_name(format!("{}_rec_bin_{}.mrc", stem, params.bin));

		let reconstruct = |input: &Path, full_rec: &Path, rec: &Path, root: &str| -> Result<PathBuf> {

			let binned = (params.bin != 1)
				.then(|| naming::with_suffix(input, &format!("_bin{}", params.bin)));
			if let Some(binned) = &binned {
				tools.run_checked(&imod::binvol(tools, params.bin, input, binned))?;
			}

			let setup = imod::ctf3dsetup(tools, &imod::Ctf3dArgs {
				input: binned.clone().unwrap_or_else(|| input.to_path_buf()),
				output: full_rec.to_path_buf(),
				tlt: tlt.clone(),
				defocus: defocus.clone(),
				root: root.to_string(),
				pixel_size_nm: angpix/10.0,
				voltage_kv: microscope.voltage_kv,
				cs_mm: microscope.cs_mm,
				amplitude_contrast: microscope.amplitude_contrast,
				thickness: params.thickness,
				x_axis_tilt: params.x_axis_tilt,
				z_shift: params.z_shift,
				bin: params.bin,
				full_image: (nx as u32, ny as u32)
			}).cwd(&dir);
			tools.run_checked(&setup)?;

			// point the dose weighting at the stack's mdoc, the chunks only know the file name
			let sync = dir.join(format!("{}-001-sync.com", root));
			if sync.is_file() && comfile::get_value(&sync, "DoseWeightingFile")?.is_some() {
				comfile::modify_value(&sync, "DoseWeightingFile", &ts.mdoc_path().to_string_lossy())?;
			}

			tools.run_checked(&imod::processchunks(tools, cpus, root, &dir))?;
			if let Some(binned) = &binned {
				remove_if_present(binned)?;
			}

			if !params.trim {
				return Ok(full_rec.to_path_buf());
			}
			tools.run_checked(&imod::trimvol(tools, &imod::TrimvolArgs {
				input: full_rec.to_path_buf(),
				output: rec.to_path_buf(),
				thickness: params.thickness/params.bin.max(1),
				convert_to_byte: params.convert_to_byte
			}))?;
			remove_if_present(full_rec)?;
			Ok(rec.to_path_buf())
		};

		let root = format!("{}_ctf3d", stem);
		let out = reconstruct(ts.path(), &full_rec, &rec, &root)?;
		let tomo = Tomogram::new(&out)?;
		info!("Reconstructed {} with 3D CTF correction into {}", ts.path().to_string_lossy(), out.to_string_lossy());

		let Some(halves) = ts.halves().filter(|_| params.do_evn_odd) else {
			return Ok(tomo);
		};

		let full_rec_halves = Halves::for_path(&full_rec);
		let rec_halves = Halves::for_path(&rec);
		let evn = reconstruct(&halves.evn, &full_rec_halves.evn, &rec_halves.evn, &format!("{}_EVN", root))?;
		let odd = reconstruct(&halves.odd, &full_rec_halves.odd, &rec_halves.odd, &format!("{}_ODD", root))?;

		tomo.with_split_files(evn, odd)
	}
}


fn remove_if_present(path: &Path) -> Result<()> {
	if path.is_file() {
		fs::remove_file(path)
			.context(format!("Failed to delete {}", path.to_string_lossy()))?;
	}
	Ok(())
}


/// where the sample sits in the reconstruction
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pitch {
	pub x_axis_tilt: f64,
	/// unbinned pixels
	pub z_shift: f64,
	/// unbinned pixels, including the extra thickness
	pub thickness: u32
}

impl Pitch {

	/// used whenever findsection or tomopitch can't tell
	pub fn fallback(angpix: f64, config: &ConfigReconstruction, extra_thickness: u32) -> Self {
		Self {
			x_axis_tilt: 0.0,
			z_shift: 0.0,
			thickness: (config.default_thickness_angstrom/angpix).round() as u32 + extra_thickness
		}
	}

	/// Reads the suggestions at the end of tomopitch's output:
	/// the X axis tilt ends the third line from the bottom, the Z shift and thickness share the last line.
	pub fn parse_tomopitch(stdout: &str, extra_thickness: u32) -> Result<Self> {

		let lines = stdout.lines()
			.filter(|line| !line.trim().is_empty())
			.collect::<Vec<_>>();
		if lines.len() < 3 {
			anyhow::bail!("Too few lines in tomopitch output: {}", lines.len());
		}

		let last_token = |line: &str| -> Result<String> {
			line.split_whitespace()
				.last()
				.map(|s| s.to_string())
				.context(format!("Unexpected line in tomopitch output: {}", line))
		};

		let x_axis_tilt = last_token(lines[lines.len() - 3])?
			.parse::<f64>()
			.context("Failed to parse X axis tilt")?;

		let last = lines[lines.len() - 1];
		let (z_shift_line, thickness_line) = last.split_once(';')
			.context(format!("Unexpected line in tomopitch output: {}", last))?;
		let z_shift = last_token(z_shift_line)?
			.parse::<f64>()
			.context("Failed to parse Z shift")?;
		let thickness = last_token(thickness_line)?
			.parse::<u32>()
			.context("Failed to parse thickness")?;

		Ok(Self {
			x_axis_tilt,
			z_shift,
			thickness: thickness + extra_thickness
		})
	}
}


/// Estimates the pitch from a quick binned reconstruction, with findsection and tomopitch.
/// Falls back to level, centered, and a default thickness when either tool gives up.
#[tracing::instrument(skip_all, level = 5, name = "Pitch")]
pub fn estimate_pitch(tools: &Tools, ts: &TiltSeries, extra_thickness: u32, tlt: Option<PathBuf>) -> Result<Pitch> {

	let config = &tools.config().reconstruction;
	let angpix = ts.angpix()?;
	let fallback = Pitch::fallback(angpix, config, extra_thickness);

	let tomo_pitch = Tomogram::from_tiltseries(tools, ts, &ReconstructionParams {
		bin: config.pitch_binning,
		sirt: config.sirt,
		thickness: (config.pitch_thickness_angstrom/angpix).round() as u32,
		do_evn_odd: false,
		trim: false,
		tlt,
		.. ReconstructionParams::default()
	})?;
	let pitch_mod = ts.path().with_file_name(format!("{}_pitch.mod", base_stem(ts)));

	let pitch = (|| -> Result<Option<Pitch>> {

		let out = tools.run(&imod::findsection(tools, tomo_pitch.path(), &pitch_mod))?;
		if !out.success() {
			warn!("{}: findsection failed, using default values: thickness {}, z_shift {}, x_axis_tilt {}",
				ts.path().to_string_lossy(), fallback.thickness, fallback.z_shift, fallback.x_axis_tilt);
			return Ok(None);
		}

		let out = tools.run(&imod::tomopitch(tools, &pitch_mod, extra_thickness, config.pitch_binning))?;
		if !out.success() || out.stdout.lines().any(|l| l.starts_with("ERROR")) {
			warn!("{}: tomopitch failed, using default values: thickness {}, z_shift {}, x_axis_tilt {}",
				ts.path().to_string_lossy(), fallback.thickness, fallback.z_shift, fallback.x_axis_tilt);
			return Ok(None);
		}

		match Pitch::parse_tomopitch(&out.stdout, extra_thickness) {
			Ok(pitch) => {
				info!("{}: estimated the pitch: thickness {}, z_shift {}, x_axis_tilt {}",
					ts.path().to_string_lossy(), pitch.thickness, pitch.z_shift, pitch.x_axis_tilt);
				Ok(Some(pitch))
			}
			Err(e) => {
				warn!("{}: unreadable tomopitch output, using default values: {:#}", ts.path().to_string_lossy(), e);
				Ok(None)
			}
		}
	})();

	remove_if_present(&pitch_mod)?;
	tomo_pitch.delete_files()?;

	Ok(pitch?.unwrap_or(fallback))
}


#[derive(Debug, Clone)]
pub struct ReconstructOptions {
	/// move each stack into a folder of its own first
	pub move_files: bool,
	pub local: bool,
	pub extra_thickness: u32,
	pub bin: u32,
	/// SIRT-like filter iterations, defaults to the configured value
	pub sirt: Option<u32>,
	pub keep_ali_stack: bool,
	pub zero_xaxis_tilt: bool,
	pub previous: bool,
	pub gpus: Option<String>,
	pub do_evn_odd: bool,
	/// views to exclude before aligning, by stack path
	pub exclusions: BTreeMap<PathBuf,String>
}

impl Default for ReconstructOptions {
	fn default() -> Self {
		Self {
			move_files: false,
			local: false,
			extra_thickness: 0,
			bin: 1,
			sirt: None,
			keep_ali_stack: false,
			zero_xaxis_tilt: false,
			previous: false,
			gpus: None,
			do_evn_odd: false,
			exclusions: BTreeMap::new()
		}
	}
}


/// Runs the whole chain for one stack: exclude, align, dose filter, find the pitch, reconstruct.
#[tracing::instrument(skip_all, level = 5, name = "TiltSeries", fields(path = %ts.path().to_string_lossy()))]
pub fn reconstruct_tiltseries(tools: &Tools, ts: &TiltSeries, options: &ReconstructOptions) -> Result<Tomogram> {

	require_file(ts.mdoc_path())
		.context(format!("No mdoc for {}", ts.path().to_string_lossy()))?;

	let views = options.exclusions.get(ts.path())
		.map(|views| exclude::parse_views(views))
		.transpose()?;

	let mut ts = ts.clone();
	if options.move_files {
		let dir = ts.path().with_extension("");
		ts = ts.move_into(&dir)?;
	}

	if let Some(views) = views.filter(|v| !v.is_empty()) {
		info!("Excluding views {} of {}", exclude::format_views(&views), ts.path().to_string_lossy());
		ts = exclude::exclude_views(tools, &ts, &views)?;
	}

	let ts_ali = if options.previous && ts.xf_path().is_file() {
		align::align_with_imod(tools, &ts, true, options.do_evn_odd, 1)?
	} else {
		align::align_with_aretomo(tools, &ts, &AreTomoOptions {
			local: options.local,
			previous: options.previous,
			do_evn_odd: options.do_evn_odd,
			gpus: options.gpus.clone(),
			.. AreTomoOptions::default()
		})?
	};
	let ali_tlt = ts_ali.tlt_path();

	let ts_filtered = dose::dose_filter(tools, &ts_ali, options.do_evn_odd)?;

	let mut pitch = estimate_pitch(tools, &ts_filtered, options.extra_thickness, Some(ali_tlt.clone()))?;
	if options.zero_xaxis_tilt {
		info!("Keeping the X axis tilt at zero");
		pitch.x_axis_tilt = 0.0;
	}

	let tomo = Tomogram::from_tiltseries(tools, &ts_filtered, &ReconstructionParams {
		bin: options.bin,
		sirt: options.sirt.unwrap_or(tools.config().reconstruction.sirt),
		thickness: pitch.thickness,
		x_axis_tilt: pitch.x_axis_tilt,
		z_shift: pitch.z_shift,
		do_evn_odd: options.do_evn_odd,
		tlt: Some(ali_tlt),
		.. ReconstructionParams::default()
	})?;

	if !options.keep_ali_stack {
		ts_ali.delete_files(false)?;
	}
	if ts_filtered.path() != ts_ali.path() {
		ts_filtered.delete_files(false)?;
	}

	Ok(tomo)
}


/// Reconstructs every stack. In a batch, a failed stack is logged and skipped, a single stack fails the call.
pub fn reconstruct_all(tools: &Tools, ts_list: &[TiltSeries], options: &ReconstructOptions) -> Result<Vec<Tomogram>> {

	if let [ts] = ts_list {
		return Ok(vec![reconstruct_tiltseries(tools, ts, options)?]);
	}

	let mut tomos = Vec::with_capacity(ts_list.len());
	for ts in ts_list {
		match reconstruct_tiltseries(tools, ts, options).warn_err() {
			Ok(tomo) => tomos.push(tomo),
			Err(()) => warn!("Skipping {}", ts.path().to_string_lossy())
		}
	}
	debug!("Reconstructed {} of {} tilt series", tomos.len(), ts_list.len());

	Ok(tomos)
}
