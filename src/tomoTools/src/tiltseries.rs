
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::error::{require_file, require_vacant, EntityError};
use crate::mdoc::{MdocDocument, MdocValue, KEY_DATA_MODE, KEY_FRAME_DOSES_AND_NUMBER, KEY_IMAGE_FILE, KEY_IMAGE_SIZE, KEY_NUM_SUB_FRAMES, KEY_PIXEL_SPACING, KEY_SUB_FRAME_PATH};
use crate::micrograph::Micrograph;
use crate::mrc::{self, LazyHeader, MrcHeader};
use crate::naming::{self, Halves};
use crate::tools::{imod, Tools};


/// A stack of projections, with the mdoc describing each tilt.
/// Companion files live beside the stack and share its stem: `.tlt`, `.xf`, `.aln`, `_ali.mrc`, ...
#[derive(Debug, Clone)]
pub struct TiltSeries {
	path: PathBuf,
	mdoc: PathBuf,
	halves: Option<Halves>,
	header: LazyHeader
}

impl TiltSeries {

	/// the mdoc defaults to `<stack>.mdoc`
	pub fn new(path: impl Into<PathBuf>) -> Result<Self> {
		let path = require_file(path)?;
		Ok(Self {
			mdoc: naming::appended(&path, ".mdoc"),
			path,
			halves: None,
			header: LazyHeader::default()
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
		let name = self.path.file_name()
			.map(PathBuf::from)
			.unwrap_or_default();
		let halves = Halves::for_path(dir.join(name));
		self.with_split_files(halves.evn, halves.odd)
	}

	/// attaches the halves found beside the stack, if both exist
	pub fn with_found_halves(mut self) -> Self {
		self.halves = Halves::find(&self.path);
		self
	}

	/// a derived stack still described by its source's mdoc
	pub fn with_mdoc(mut self, mdoc: impl Into<PathBuf>) -> Self {
		self.mdoc = mdoc.into();
		self
	}

	pub fn path(&self) -> &Path {
		&self.path
	}

	pub fn mdoc_path(&self) -> &Path {
		&self.mdoc
	}

	pub fn read_mdoc(&self) -> Result<MdocDocument> {
		MdocDocument::read(&self.mdoc)
	}

	pub fn is_split(&self) -> bool {
		self.halves.is_some()
	}

	pub fn halves(&self) -> Option<&Halves> {
		self.halves.as_ref()
	}

	pub fn stem(&self) -> String {
		naming::stem(&self.path)
	}

	fn header(&self) -> Result<&MrcHeader> {
		self.header.get(&self.path)
	}

	pub fn angpix(&self) -> Result<f64> {
		Ok(self.header()?.pixel_size())
	}

	pub fn dim_zyx(&self) -> Result<[usize; 3]> {
		Ok(self.header()?.dim_zyx())
	}

	pub fn axis_angle(&self) -> Result<f64> {
		self.header()?
			.axis_angle()
			.context(format!("No tilt axis angle in the header of {}", self.path.to_string_lossy()))
	}

	/// `<stem><suffix>` beside the stack
	pub fn companion(&self, suffix: &str) -> PathBuf {
		naming::sibling(&self.path, suffix)
	}

	pub fn tlt_path(&self) -> PathBuf {
		self.companion(".tlt")
	}

	pub fn rawtlt_path(&self) -> PathBuf {
		self.companion(".rawtlt")
	}

	pub fn xf_path(&self) -> PathBuf {
		self.companion(".xf")
	}

	pub fn aln_path(&self) -> PathBuf {
		self.companion(".aln")
	}

	pub fn ali_path(&self) -> PathBuf {
		self.companion("_ali.mrc")
	}

	/// ctfplotter's output, preferring the `_ctfplotter.txt` naming
	pub fn defocus_file(&self) -> Option<PathBuf> {
		[self.companion("_ctfplotter.txt"), self.companion(".defocus")]
			.into_iter()
			.find(|p| p.exists())
	}

	/// the mdoc must describe exactly the images in the stack
	pub fn check_sections(&self) -> Result<()> {
		let mdoc = self.read_mdoc()?;
		let [nz, _, _] = self.dim_zyx()?;
		if mdoc.sections.len() != nz {
			return Err(EntityError::SectionCount {
				path: self.mdoc.clone(),
				expected: nz,
				found: mdoc.sections.len()
			}.into());
		}
		Ok(())
	}

	/// x and y of the aligned stack at the given binning, swapped when the tilt axis is closer to vertical
	pub fn binned_size(&self, bin: u32) -> Result<(u32, u32)> {
		let [_, ny, nx] = self.dim_zyx()?;
		// only the axis' distance from vertical matters, so -85 swaps like 85 does
		let axis = self.axis_angle()?.abs();
		let (x, y) = if axis < 45.0 || axis > 135.0 {
			(nx, ny)
		} else {
			(ny, nx)
		};
		let bin = bin.max(1) as usize;
		Ok((x.div_ceil(bin) as u32, y.div_ceil(bin) as u32))
	}

	/// removes the stack, the halves, and optionally the mdoc
	pub fn delete_files(&self, delete_mdoc: bool) -> Result<()> {
		let mut paths = vec![&self.path];
		if let Some(halves) = &self.halves {
			paths.extend(halves.iter());
		}
		if delete_mdoc {
			paths.push(&self.mdoc);
		}
		for path in paths {
			if path.is_file() {
				fs::remove_file(path)
					.context(format!("Failed to delete {}", path.to_string_lossy()))?;
			}
		}
		Ok(())
	}

	/// moves the stack, its mdoc, and its halves into a new folder
	pub fn move_into(&self, dir: impl AsRef<Path>) -> Result<TiltSeries> {

		let dir = dir.as_ref();
		fs::create_dir(dir)
			.context(format!("Failed to create folder: {}", dir.to_string_lossy()))?;
		info!("Moving {} to {}", self.path.to_string_lossy(), dir.to_string_lossy());

		let move_file = |path: &Path| -> Result<PathBuf> {
			let dst = dir.join(path.file_name().unwrap_or_default());
			fs::rename(path, &dst)
				.context(format!("Failed to move {} to {}", path.to_string_lossy(), dst.to_string_lossy()))?;
			Ok(dst)
		};

		let mut ts = TiltSeries::new(move_file(&self.path)?)?
			.with_mdoc(move_file(&self.mdoc)?);
		if let Some(halves) = &self.halves {
			ts = ts.with_split_files(move_file(&halves.evn)?, move_file(&halves.odd)?)?;
		}
		Ok(ts)
	}
}

impl PartialEq for TiltSeries {
	fn eq(&self, other: &Self) -> bool {
		self.path == other.path
			&& self.mdoc == other.mdoc
			&& self.halves == other.halves
	}
}


impl TiltSeries {

	/// Stacks the micrographs with newstack, into a new file at `ts_path`.
	/// The stack mdoc is merged from the micrographs' own mdocs, or taken from `orig_mdoc`
	/// when they have none. Frame-only fields are dropped since they don't apply to a stack.
	#[tracing::instrument(skip_all, level = 5, name = "Stack")]
	pub fn from_micrographs(
		tools: &Tools,
		micrographs: &[Micrograph],
		ts_path: &Path,
		orig_mdoc: Option<&Path>,
		reorder: bool,
		overwrite_titles: Option<Vec<String>>
	) -> Result<TiltSeries> {

		require_vacant(ts_path)?;

		let mut micrographs = micrographs.iter()
			.collect::<Vec<_>>();
		if micrographs.is_empty() {
			anyhow::bail!("No micrographs to stack into {}", ts_path.to_string_lossy());
		}
		if reorder {
			micrographs.sort_by(|a, b| a.tilt_angle().total_cmp(&b.tilt_angle()));
		}

		// build the stack mdoc
		let mut have_mdocs = true;
		for micrograph in &micrographs {
			have_mdocs &= micrograph.mdoc()?.is_some();
		}
		let mut stack_mdoc = if have_mdocs {

			// one section per micrograph, the last micrograph wins for everything else
			let mut stack_mdoc = MdocDocument::new();
			for micrograph in &micrographs {
				let Some(mdoc) = micrograph.mdoc()? else {
					continue;
				};
				let frameset = mdoc.framesets.first()
					.with_context(|| format!("No frameset in {}", micrograph.mdoc_path().to_string_lossy()))?;
				stack_mdoc.titles = mdoc.titles.clone();
				stack_mdoc.sections.push(frameset.clone());
				for (key, value) in mdoc.global.iter() {
					stack_mdoc.global.set(key, value.clone());
				}
			}
			if let Some(titles) = overwrite_titles {
				stack_mdoc.titles = titles;
			}
			stack_mdoc

		} else if let Some(orig_mdoc) = orig_mdoc {

			let mut stack_mdoc = MdocDocument::read(orig_mdoc)?;
			if reorder {
				stack_mdoc.sort_sections_by_tilt_angle()?;
			}
			stack_mdoc

		} else {
			return Err(EntityError::FileNotFound(micrographs[0].mdoc_path()))
				.context("No original mdoc was given, and the micrographs don't have mdocs");
		};

		let angpix = stack_mdoc.sections.first()
			.and_then(|s| s.pixel_spacing())
			.ok_or_else(|| EntityError::MissingField {
				path: stack_mdoc.path.clone().unwrap_or_else(|| micrographs[0].mdoc_path()),
				field: KEY_PIXEL_SPACING.to_string()
			})?;

		// create the stack, with the titles and pixel size the mdoc describes
		let paths = micrographs.iter()
			.map(|m| m.path())
			.collect::<Vec<_>>();
		tools.run_checked(&imod::newstack(tools, &paths, ts_path))?;
		update_header(ts_path, &stack_mdoc, angpix)?;

		let header = MrcHeader::read(ts_path)?;
		stack_mdoc.global.set(KEY_PIXEL_SPACING, angpix);
		stack_mdoc.global.set(KEY_IMAGE_FILE, ts_path.file_name().unwrap_or_default().to_string_lossy().to_string());
		stack_mdoc.global.set(KEY_IMAGE_SIZE, MdocValue::List(vec![header.nx as f64, header.ny as f64]));
		stack_mdoc.global.set(KEY_DATA_MODE, header.mode as i64);
		for section in &mut stack_mdoc.sections {
			for key in [KEY_SUB_FRAME_PATH, KEY_NUM_SUB_FRAMES, KEY_FRAME_DOSES_AND_NUMBER] {
				section.remove(key);
			}
		}
		if stack_mdoc.sections.len() != header.nz as usize {
			warn!("{} has {} images, but its mdoc has {} sections", ts_path.to_string_lossy(), header.nz, stack_mdoc.sections.len());
		}
		let mdoc_path = naming::appended(ts_path, ".mdoc");
		stack_mdoc.write(&mdoc_path)?;

		let ts = TiltSeries::new(ts_path)?;

		// stack the halves too, if every micrograph has them
		let halves = micrographs.iter()
			.map(|m| m.halves())
			.collect::<Option<Vec<_>>>();
		let Some(halves) = halves else {
			return Ok(ts);
		};
		let stack_halves = Halves::for_path(ts_path);
		let evn = halves.iter().map(|h| &h.evn).collect::<Vec<_>>();
		let odd = halves.iter().map(|h| &h.odd).collect::<Vec<_>>();
		tools.run_checked(&imod::newstack(tools, &evn, &stack_halves.evn))?;
		tools.run_checked(&imod::newstack(tools, &odd, &stack_halves.odd))?;
		for half in stack_halves.iter() {
			update_header(half, &stack_mdoc, angpix)?;
		}

		ts.with_split_files(stack_halves.evn, stack_halves.odd)
	}
}


fn update_header(path: &Path, mdoc: &MdocDocument, angpix: f64) -> Result<()> {
	mrc::set_labels(path, &mdoc.titles)?;
	mrc::set_pixel_size(path, angpix)
}
