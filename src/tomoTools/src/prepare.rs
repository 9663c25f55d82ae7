
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::error::EntityError;
use crate::logging::ResultExt;
use crate::mdoc::{find_relative_path, MdocDocument, KEY_DATE_TIME, KEY_EXPOSURE_DOSE, KEY_IMAGE_SIZE, KEY_SUB_FRAME_PATH};
use crate::micrograph::{sem2mc2, Micrograph, MotionCorOptions};
use crate::movie::Movie;
use crate::naming;
use crate::tiltseries::TiltSeries;
use crate::tools::{imod, Tools};


#[derive(Debug, Clone)]
pub struct PrepareOptions {
	/// also write the sums of the even and odd frames
	pub split_sum: bool,
	/// MotionCor's Fourier binning
	pub binning: u32,
	/// sort by tilt angle when there are no frames to correct
	pub reorder: bool,
	/// where to look for the frames, instead of beside the mdoc
	pub frames: Option<PathBuf>,
	pub gain: Option<PathBuf>,
	/// SerialEM's RotationAndFlip for the gain reference, when the mdoc doesn't have it
	pub rotation_and_flip: Option<i64>,
	pub group: u32,
	pub gpus: Option<String>,
	/// the ExposureDose of every tilt, when the mdoc's is wrong
	pub exposure_dose: Option<f64>,
	/// stack the corrected frames, or keep them as separate micrographs
	pub stack: bool
}

impl Default for PrepareOptions {
	fn default() -> Self {
		Self {
			split_sum: false,
			binning: 1,
			reorder: false,
			frames: None,
			gain: None,
			rotation_and_flip: None,
			group: 1,
			gpus: None,
			exposure_dose: None,
			stack: true
		}
	}
}


/// what became of one input
#[derive(Debug, Clone, PartialEq)]
pub enum Prepared {
	Stack(PathBuf),
	Micrographs(Vec<PathBuf>),
	Skipped
}


/// Stacks and mdocs, or folders of them. An mdoc stands for its stack.
pub fn expand_inputs(inputs: &[PathBuf]) -> Result<Vec<PathBuf>> {
	let mut out = Vec::new();
	for input in inputs {
		if input.is_dir() {
			for ext in ["mrc", "st"] {
				let pattern = format!("{}/*.{}", glob::Pattern::escape(&input.to_string_lossy()), ext);
				for entry in glob::glob(&pattern).context(format!("Invalid glob pattern: {}", pattern))? {
					out.push(entry?);
				}
			}
		} else {
			out.push(input.clone());
		}
	}
	Ok(out)
}


/// Prepares every input, skipping (and logging) the ones that fail.
pub fn prepare_all(tools: &Tools, inputs: &[PathBuf], output_dir: &Path, options: &PrepareOptions) -> Result<Vec<Prepared>> {

	fs::create_dir_all(output_dir)
		.context(format!("Failed to create output folder: {}", output_dir.to_string_lossy()))?;

	let mut out = Vec::new();
	for input in expand_inputs(inputs)? {
		let prepared = prepare_tilt_series(tools, &input, output_dir, options)
			.warn_err()
			.unwrap_or(Prepared::Skipped);
		out.push(prepared);
	}
	Ok(out)
}


/// Turns an acquired tilt series into a stack ready for reconstruction:
/// motion-corrects the frames and stacks them sorted by tilt angle, or just reorders or copies a stack without frames.
/// Montages, anchors, and tilt series with missing frames are skipped.
#[tracing::instrument(skip_all, level = 5, name = "Prepare", fields(input = %input.to_string_lossy()))]
pub fn prepare_tilt_series(tools: &Tools, input: &Path, output_dir: &Path, options: &PrepareOptions) -> Result<Prepared> {

	let (stack, mdoc_path) = match naming::strip_mdoc(input) {
		Some(stack) => (stack, input.to_path_buf()),
		None => (input.to_path_buf(), naming::appended(input, ".mdoc"))
	};
	if !mdoc_path.is_file() {
		warn!("No mdoc found for {}", stack.to_string_lossy());
		return Ok(Prepared::Skipped);
	}
	let mut mdoc = MdocDocument::read(&mdoc_path)?;

	if mdoc.is_montage() {
		info!("Skipping {}, it's a montage", stack.to_string_lossy());
		return Ok(Prepared::Skipped);
	}
	if mdoc.is_anchor() {
		info!("Skipping {}, all its tilt angles are near zero so it's not a tilt series", stack.to_string_lossy());
		return Ok(Prepared::Skipped);
	}
	info!("Working on {}, which looks like a tilt series", stack.to_string_lossy());

	if let Some(dose) = options.exposure_dose {
		for section in &mut mdoc.sections {
			section.set(KEY_EXPOSURE_DOSE, dose);
		}
	}
	if mdoc.sections.iter().any(|s| s.exposure_dose() == Some(0.0)) {
		warn!("{} has no ExposureDose set, dose filtering will be skipped later", stack.to_string_lossy());
	}

	let name = stack.file_name()
		.map(PathBuf::from)
		.unwrap_or_default();
	let out_stack = output_dir.join(&name);

	// without frames, there's only the stack to take care of
	if !mdoc.sections.iter().any(|s| s.contains(KEY_SUB_FRAME_PATH)) {
		if options.reorder {
			info!("Reordering {} by tilt angle", stack.to_string_lossy());
			tools.run_checked(&imod::newstack_reorder(tools, &stack, &out_stack))?;
			apply_exposure_dose(&naming::appended(&out_stack, ".mdoc"), options.exposure_dose)?;
		} else {
			info!("Copying {} to {}", stack.to_string_lossy(), output_dir.to_string_lossy());
			fs::copy(&stack, &out_stack)
				.context(format!("Failed to copy {} to {}", stack.to_string_lossy(), out_stack.to_string_lossy()))?;
			mdoc.write(naming::appended(&out_stack, ".mdoc"))?;
		}
		return Ok(Prepared::Stack(out_stack));
	}

	// find the frames on this machine
	let frames_root = options.frames.clone()
		.or_else(|| stack.parent().map(|p| p.to_path_buf()))
		.unwrap_or_else(|| PathBuf::from("."));
	let mut movies = Vec::with_capacity(mdoc.sections.len());
	for section in &mut mdoc.sections {
		let found = section.sub_frame_path()
			.and_then(|p| find_relative_path(&frames_root, p));
		let (Some(path), Some(tilt_angle)) = (found, section.tilt_angle()) else {
			warn!("Not all movie frames were found for {}, point to them with the frames option. Skipping", stack.to_string_lossy());
			return Ok(Prepared::Skipped);
		};
		section.set(KEY_SUB_FRAME_PATH, path.to_string_lossy().to_string());
		movies.push(Movie::new(path, tilt_angle)?);
	}
	info!("Found the frames of {}, motion-correcting them", stack.to_string_lossy());

	let rot_flip = match options.rotation_and_flip.or_else(|| mdoc.sections[0].rotation_and_flip()) {
		Some(rf) => Some(sem2mc2(rf)?),
		None => None
	};

	let size = mdoc.global.get(KEY_IMAGE_SIZE)
		.and_then(|v| v.as_list())
		.filter(|size| size.len() >= 2)
		.ok_or_else(|| EntityError::MissingField {
			path: mdoc_path.clone(),
			field: KEY_IMAGE_SIZE.to_string()
		})?;
	let patch = ((size[0]/800.0).round() as u32, (size[1]/800.0).round() as u32);

	let frames_corrected = output_dir.join("frames_corrected");
	let micrographs = Micrograph::from_movies(tools, &movies, &frames_corrected, &MotionCorOptions {
		split_sum: options.split_sum,
		binning: options.binning,
		group: options.group,
		patch: Some(patch),
		rot_flip,
		gain: options.gain.clone(),
		gpus: options.gpus.clone()
	})?;

	let prepared = if options.stack {

		// the stack mdoc starts from this one when the frames have no mdocs of their own
		let frames_mdoc = frames_corrected.join(mdoc_path.file_name().unwrap_or_default());
		mdoc.write(&frames_mdoc)?;

		let ts = TiltSeries::from_micrographs(tools, &micrographs, &out_stack, Some(&frames_mdoc), true, None)?;
		apply_exposure_dose(ts.mdoc_path(), options.exposure_dose)?;
		info!("Created {}", ts.path().to_string_lossy());
		Prepared::Stack(ts.path().to_path_buf())

	} else {

		let mut paths = Vec::with_capacity(micrographs.len());
		for micrograph in &micrographs {
			let dst = output_dir.join(micrograph.path().file_name().unwrap_or_default());
			fs::rename(micrograph.path(), &dst)
				.context(format!("Failed to move {}", micrograph.path().to_string_lossy()))?;
			paths.push(dst);
		}
		info!("Created {} micrographs in {}", paths.len(), output_dir.to_string_lossy());
		Prepared::Micrographs(paths)
	};

	fs::remove_dir_all(&frames_corrected)
		.context(format!("Failed to remove {}", frames_corrected.to_string_lossy()))?;

	Ok(prepared)
}


fn apply_exposure_dose(mdoc_path: &Path, dose: Option<f64>) -> Result<()> {
	let Some(dose) = dose else {
		return Ok(());
	};
	let mut mdoc = MdocDocument::read(mdoc_path)?;
	for section in &mut mdoc.sections {
		section.set(KEY_EXPOSURE_DOSE, dose);
	}
	mdoc.save()
}


/// Puts the SubFramePaths back into a prepared tilt series' mdoc, from the mdoc written during acquisition.
/// Sections are matched by tilt angle, and must have been acquired at the same time.
/// Returns false if the mdoc was left alone.
pub fn restore_frames(orig_mdoc_dir: &Path, ts: &TiltSeries) -> Result<bool> {

	let name = ts.path().file_name()
		.map(|n| n.to_string_lossy().to_string())
		.unwrap_or_default();

	let pattern = format!("{}/*{}*.mdoc", glob::Pattern::escape(&orig_mdoc_dir.to_string_lossy()), glob::Pattern::escape(&ts.stem()));
	let mut candidates = Vec::new();
	for entry in glob::glob(&pattern).context(format!("Invalid glob pattern: {}", pattern))? {
		candidates.push(entry?);
	}
	let orig_path = match &candidates[..] {
		[] => {
			warn!("{}: no original mdoc found, skipping", name);
			return Ok(false);
		}
		[path] => path,
		_ => {
			warn!("{}: {} original mdocs found, skipping", name, candidates.len());
			return Ok(false);
		}
	};
	info!("{}: found original mdoc {}", name, orig_path.to_string_lossy());

	let mut orig = MdocDocument::read(orig_path)?;
	orig.sort_sections_by_tilt_angle()?;

	let mut mdoc = ts.read_mdoc()?;
	for section in &mut mdoc.sections {
		let Some(tilt_angle) = section.tilt_angle() else {
			continue;
		};
		let Some(orig_section) = orig.sections.iter().find(|s| s.tilt_angle() == Some(tilt_angle)) else {
			continue;
		};
		if orig_section.get(KEY_DATE_TIME) != section.get(KEY_DATE_TIME) {
			warn!("{}: DateTime mismatch at {} degrees: {:?} vs {:?}", name, tilt_angle,
				orig_section.get_str(KEY_DATE_TIME), section.get_str(KEY_DATE_TIME));
			continue;
		}
		if let Some(frames) = orig_section.sub_frame_path() {
			section.set(KEY_SUB_FRAME_PATH, frames.to_string());
		}
	}

	if !mdoc.sections.iter().all(|s| s.contains(KEY_SUB_FRAME_PATH)) {
		warn!("{}: no complete set of SubFramePaths found, leaving the mdoc as it is", name);
		return Ok(false);
	}

	for section in &mut mdoc.sections {
		let Some(frames) = section.sub_frame_path().map(|p| p.to_string()) else {
			continue;
		};
		match find_relative_path(orig_mdoc_dir, &frames) {
			Some(local) => section.set(KEY_SUB_FRAME_PATH, local.to_string_lossy().to_string()),
			None => warn!("{}: frames not found on this machine: {}", name, frames)
		}
	}

	let backup = ts.mdoc_path().with_extension("mdocbackup");
	fs::copy(ts.mdoc_path(), &backup)
		.context(format!("Failed to back up {}", ts.mdoc_path().to_string_lossy()))?;
	mdoc.write(ts.mdoc_path())?;
	info!("{}: restored the SubFramePaths, the old mdoc is in {}", name, backup.to_string_lossy());

	Ok(true)
}
