
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use tracing::{info, warn};

use crate::error::{require_file, EntityError};
use crate::mdoc::{Fields, LazyMdoc, MdocDocument, MdocValue, KEY_BINNING, KEY_GAIN_REFERENCE, KEY_PIXEL_SPACING};
use crate::movie::Movie;
use crate::naming::{self, Halves};
use crate::tools::Tools;
use crate::tools::imod;
use crate::tools::motioncor::{self, MotionCorArgs};


/// the motion-corrected sum of one movie
#[derive(Debug, Clone)]
pub struct Micrograph {
	path: PathBuf,
	tilt_angle: f64,
	halves: Option<Halves>,
	mdoc: LazyMdoc
}

impl Micrograph {

	pub fn new(path: impl Into<PathBuf>, tilt_angle: f64) -> Result<Self> {
		Ok(Self {
			path: require_file(path)?,
			tilt_angle,
			halves: None,
			mdoc: LazyMdoc::default()
		})
	}

	/// fails with FileNotFound unless both halves exist
	pub fn with_split_files(mut self, evn: impl Into<PathBuf>, odd: impl Into<PathBuf>) -> Result<Self> {
		self.halves = Some(Halves::new(evn, odd)?);
		Ok(self)
	}

	/// the `_EVN`/`_ODD` halves in the given directory
	pub fn with_split_dir(self, dir: impl AsRef<Path>) -> Result<Self> {
		let dir = dir.as_ref();
		if !dir.is_dir() {
			return Err(EntityError::NotADirectory(dir.to_path_buf()).into());
		}
		let halves = Halves::for_path(dir.join(self.file_name()));
		self.with_split_files(halves.evn, halves.odd)
	}

	pub fn path(&self) -> &Path {
		&self.path
	}

	fn file_name(&self) -> PathBuf {
		self.path.file_name()
			.map(PathBuf::from)
			.unwrap_or_default()
	}

	pub fn tilt_angle(&self) -> f64 {
		self.tilt_angle
	}

	pub fn is_split(&self) -> bool {
		self.halves.is_some()
	}

	pub fn halves(&self) -> Option<&Halves> {
		self.halves.as_ref()
	}

	pub fn mdoc_path(&self) -> PathBuf {
		naming::appended(&self.path, ".mdoc")
	}

	pub fn mdoc(&self) -> Result<Option<&MdocDocument>> {
		self.mdoc.get(&self.mdoc_path())
	}
}

impl PartialEq for Micrograph {
	fn eq(&self, other: &Self) -> bool {
		self.path == other.path
			&& self.tilt_angle == other.tilt_angle
			&& self.halves == other.halves
	}
}


#[derive(Debug, Clone, PartialEq)]
pub struct MotionCorOptions {
	pub split_sum: bool,
	pub binning: u32,
	pub group: u32,
	/// local patches in x and y
	pub patch: Option<(u32, u32)>,
	/// MotionCor's gain rotation and flip, see [sem2mc2]
	pub rot_flip: Option<(u32, u32)>,
	/// use this gain reference instead of the one named in the mdocs
	pub gain: Option<PathBuf>,
	/// comma-separated GPU ids, otherwise every GPU is used
	pub gpus: Option<String>
}

impl Default for MotionCorOptions {
	fn default() -> Self {
		Self {
			split_sum: false,
			binning: 1,
			group: 2,
			patch: None,
			rot_flip: None,
			gain: None,
			gpus: None
		}
	}
}


impl Micrograph {

	/// Motion-corrects every movie into `output_dir`, one MotionCor run per movie.
	/// The movies' mdocs are carried over as `<stem>.mrc.mdoc`, adjusted for the binning.
	#[tracing::instrument(skip_all, level = 5, name = "MotionCor")]
	pub fn from_movies(tools: &Tools, movies: &[Movie], output_dir: &Path, options: &MotionCorOptions) -> Result<Vec<Micrograph>> {

		let Some(first) = movies.first() else {
			return Ok(Vec::new());
		};

		fs::create_dir_all(output_dir)
			.context(format!("Failed to create output folder: {}", output_dir.to_string_lossy()))?;
		let output_dir = output_dir.canonicalize()
			.context(format!("Failed to resolve output folder: {}", output_dir.to_string_lossy()))?;
		let temp_dir = output_dir.join("motioncor_temp");
		fs::create_dir_all(&temp_dir)
			.context(format!("Failed to create temporary folder: {}", temp_dir.to_string_lossy()))?;

		// find the gain reference: either given explicitly, or the one the mdocs agree on
		let mut gain_dm4 = None;
		let mut gain_mrc = None;
		if let Some(gain) = &options.gain {
			match gain.extension().and_then(|e| e.to_str()) {
				Some("dm4") => gain_dm4 = Some(gain.clone()),
				Some("mrc") => gain_mrc = Some(gain.clone()),
				_ => bail!("Gain reference can only be in .dm4 or .mrc format: {}", gain.to_string_lossy())
			}
		} else if first.mdoc()?.is_some() {
			let mut names = BTreeSet::new();
			for movie in movies {
				let name = movie.mdoc()?
					.and_then(|m| m.framesets.first())
					.and_then(|f| f.gain_reference())
					.map(|s| s.to_string());
				names.insert(name);
			}
			if names.len() != 1 {
				bail!("Only 0 or 1 gain references are supported, {} found in the mdocs", names.len());
			}
			if let Some(Some(name)) = names.pop_first() {
				let dir = first.path().parent()
					.unwrap_or(Path::new("."));
				gain_dm4 = Some(require_file(dir.join(name))?);
			}
		}

		// MotionCor only reads MRC gain references, so convert, away from the output files
		let gain_dir = output_dir.join("motioncor_gain");
		if let Some(dm4) = gain_dm4.as_ref().filter(|_| gain_mrc.is_none()) {
			fs::create_dir_all(&gain_dir)
				.context(format!("Failed to create gain folder: {}", gain_dir.to_string_lossy()))?;
			let mrc = gain_dir.join(format!("{}.mrc", naming::stem(dm4)));
			info!("Found gain reference {}, converting to {}", dm4.to_string_lossy(), mrc.to_string_lossy());
			tools.run_checked(&imod::dm2mrc(tools, dm4, &mrc))?;
			gain_mrc = Some(mrc);
		}

		match &gain_mrc {
			Some(gain) => {
				require_file(gain)?;
				info!("Using gain reference {}", gain.to_string_lossy());
			}
			None => info!("No gain reference given or found, continuing without gain correction")
		}

		let defect_map = match &gain_dm4 {
			Some(dm4) => match find_defects(dm4)? {
				Some(defects) => {
					let map = temp_dir.join(format!("{}.tif", defects.file_name().unwrap_or_default().to_string_lossy()));
					tools.run_checked(&imod::clip_defect(tools, &defects, first.path(), &map))?;
					info!("Found and converted defects file {}", defects.to_string_lossy());
					Some(map)
				}
				None => None
			}
			None => None
		};

		let args = MotionCorArgs {
			output_dir: output_dir.clone(),
			binning: options.binning,
			gpus: tools.gpus(options.gpus.as_deref())?,
			split_sum: options.split_sum,
			gain: gain_mrc.clone(),
			rot_flip: options.rot_flip,
			defect_map,
			group: options.group,
			patch: options.patch
		};

		// correct every movie separately
		for movie in movies {
			let Some(format) = movie.format() else {
				bail!("Unsupported movie format: {}", movie.path().to_string_lossy());
			};
			let movie_path = movie.path().canonicalize()
				.context(format!("Failed to resolve movie: {}", movie.path().to_string_lossy()))?;
			let cmd = motioncor::motioncor(tools, &args, &movie_path, format, &temp_dir)?;
			tools.run_checked(&cmd)?;
		}

		// carry over the movie mdocs, for a stack that no longer has frames or a gain reference
		for movie in movies {
			let Some(mdoc) = movie.mdoc()? else {
				continue;
			};
			if mdoc.framesets.len() != 1 {
				bail!("Unexpected mdoc format, only one frameset per movie is supported: {}", movie.mdoc_path().to_string_lossy());
			}
			let mut mdoc = mdoc.clone();
			let frameset = &mut mdoc.framesets[0];
			scale_field(frameset, KEY_PIXEL_SPACING, options.binning);
			scale_field(frameset, KEY_BINNING, options.binning);
			frameset.remove(KEY_GAIN_REFERENCE);
			mdoc.write(output_dir.join(format!("{}.mrc.mdoc", naming::stem(movie.path()))))?;
		}

		fs::remove_dir_all(&temp_dir)
			.context(format!("Failed to remove temporary folder: {}", temp_dir.to_string_lossy()))?;

		if gain_mrc.is_some() {
			check_gain_applied(&args.output_dir)?;
		}
		if gain_dir.is_dir() {
			fs::remove_dir_all(&gain_dir)
				.context(format!("Failed to remove gain folder: {}", gain_dir.to_string_lossy()))?;
		}

		movies.iter()
			.map(|movie| {
				let micrograph = Micrograph::new(output_dir.join(format!("{}.mrc", naming::stem(movie.path()))), movie.tilt_angle())?;
				if options.split_sum {
					micrograph.with_split_dir(&output_dir)
				} else {
					Ok(micrograph)
				}
			})
			.collect()
	}
}


fn scale_field(fields: &mut Fields, key: &str, factor: u32) {
	match fields.get(key).cloned() {
		Some(MdocValue::Int(i)) => fields.set(key, i*factor as i64),
		Some(MdocValue::Float(f)) => fields.set(key, f*factor as f64),
		_ => ()
	}
}


/// MotionCor ignores a gain reference it can't read, and only says so in its log
fn check_gain_applied(output_dir: &Path) -> Result<()> {
	let log = output_dir.join("motioncor.log");
	if !log.is_file() {
		return Ok(());
	}
	let text = fs::read_to_string(&log)
		.context(format!("Failed to read MotionCor log: {}", log.to_string_lossy()))?;
	if text.lines().any(|line| line.starts_with("Warning: Gain ref not found.")) {
		bail!("A gain reference was given, but not applied by MotionCor");
	}
	Ok(())
}


/// Converts SerialEM's RotationAndFlip into MotionCor's -RotGain and -FlipGain.
/// SerialEM: n + m, with n*90 degrees CCW rotation and m = 4 to flip around Y.
/// MotionCor: n*90 degrees CCW, flip 1 around X, flip 2 around Y.
pub fn sem2mc2(rotation_and_flip: i64) -> Result<(u32, u32)> {
	let conv = match rotation_and_flip {
		0 => (0, 0),
		1 => (1, 0),
		2 => (2, 0),
		3 => (3, 0),
		4 => (0, 1),
		5 => (1, 2),
		6 => (2, 2),
		7 => (3, 2),
		_ => bail!("Invalid RotationAndFlip: {}", rotation_and_flip)
	};
	Ok(conv)
}


/// the SerialEM defects file beside the gain reference, if there's exactly one
pub fn find_defects(gain: &Path) -> Result<Option<PathBuf>> {

	let dir = gain.parent()
		.unwrap_or(Path::new("."));
	let pattern = format!("{}/defects*.txt", glob::Pattern::escape(&dir.to_string_lossy()));
	let found = glob::glob(&pattern)
		.context(format!("Invalid glob pattern: {}", pattern))?
		.filter_map(|p| p.ok())
		.collect::<Vec<_>>();

	match found.len() {
		0 => Ok(None),
		1 => Ok(found.into_iter().next()),
		n => {
			warn!("Found {} defects files beside {}, skipping defects correction", n, gain.to_string_lossy());
			Ok(None)
		}
	}
}
