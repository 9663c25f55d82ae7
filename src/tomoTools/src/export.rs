
// Hand-offs to other software: AreTomo's IMOD-style export, Warp project folders, and TomoTwin

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::info;

use crate::align::{align_with_imod, parse_darkimgs};
use crate::ctfplotter::export_dir;
use crate::error::{require_file, EntityError};
use crate::mdoc::{find_relative_path, KEY_SUB_FRAME_PATH};
use crate::mrc::{self, MrcHeader};
use crate::naming;
use crate::reconstruct::ReconstructionParams;
use crate::tiltseries::TiltSeries;
use crate::tomogram::Tomogram;
use crate::tools::{imod, Tools};
use crate::tools::aretomo::{aretomo, AreTomoArgs, AreTomoMode};


/// Has AreTomo write the `.xf`/`.tlt` files of its alignment into `<stem>_ali_Imod/`,
/// next to an mdoc without the views it found too dark.
/// A previous export is reused.
#[tracing::instrument(skip_all, level = 5, name = "AreTomoExport")]
pub fn aretomo_export(tools: &Tools, ts: &TiltSeries) -> Result<TiltSeries> {

	let mut mdoc = ts.read_mdoc()?;
	let angpix = ts.angpix()?;
	let labels = MrcHeader::read(ts.path())?.labels;

	let ali_stack = ts.ali_path();
	let exported = export_dir(ts).join(format!("{}.st", naming::stem(&ali_stack)));

	if exported.is_file() {
		info!("Reusing the previous AreTomo export of {}", ts.path().to_string_lossy());
		mrc::set_pixel_size(&exported, angpix)?;
		if MrcHeader::read(&exported)?.labels.is_empty() {
			mrc::set_labels(&exported, &labels)?;
		}
	} else {
		let aln = require_file(ts.aln_path())
			.context(format!("{}: no previous alignment to export", ts.path().to_string_lossy()))?;
		let cmd = aretomo(tools, &AreTomoArgs {
			input: ts.path().to_path_buf(),
			output: ali_stack.clone(),
			angles: None,
			mode: AreTomoMode::ExportImod {
				aln
			}
		})?;
		tools.run_checked(&cmd)?;
		require_file(&exported)?;
		mrc::set_pixel_size(&ali_stack, angpix)?;
		mrc::set_pixel_size(&exported, angpix)?;
		mrc::set_labels(&exported, &labels)?;
	}

	// the export has no dark views
	let dark = parse_darkimgs(ts)?;
	mdoc.sections = mdoc.sections.into_iter()
		.enumerate()
		.filter(|(i, _)| !dark.contains(i))
		.map(|(_, section)| section)
		.collect();
	let exported_mdoc = naming::appended(&exported, ".mdoc");
	mdoc.write(&exported_mdoc)?;

	Ok(TiltSeries::new(&exported)?
		.with_mdoc(exported_mdoc))
}


#[derive(Debug, Clone, Default)]
pub struct WarpOptions {
	/// fail rather than export the tilt images when the frames are missing
	pub ensure_frames: bool,
	/// the alignment came from etomo, which also needs `taSolution.log`
	pub imod: bool,
	/// lay out the project for Warp 2
	pub v2: bool
}


/// Sets up a tilt series in a Warp project folder: the alignment files in `imod/<stem>/`,
/// the frames (or the tilt images, when there are no frames) and an mdoc pointing at them.
#[tracing::instrument(skip_all, level = 5, name = "Warp")]
pub fn make_warp_dir(tools: &Tools, ts: &TiltSeries, project_dir: &Path, frames_dir: &Path, options: &WarpOptions) -> Result<()> {

	let stem = ts.stem();

	let mut copied = vec![ts.xf_path()];
	if options.imod {
		copied.push(ts.path().with_file_name("taSolution.log"));
	}
	for path in [ts.path(), ts.mdoc_path()].into_iter().chain(copied.iter().map(|p| p.as_path())) {
		require_file(path)
			.context(format!("Not all alignment files found for {}", stem))?;
	}
	let tlt = [ts.tlt_path(), ts.rawtlt_path()].into_iter()
		.find(|p| p.is_file())
		.ok_or_else(|| EntityError::FileNotFound(ts.tlt_path()))
		.context(format!("Not all alignment files found for {}", stem))?;

	// copy the alignment, so later changes don't leak into the project
	let ts_dir = project_dir.join("imod").join(&stem);
	fs::create_dir_all(project_dir.join("imod"))
		.context(format!("Failed to create folder: {}", project_dir.to_string_lossy()))?;
	fs::create_dir(&ts_dir)
		.context(format!("Failed to create folder: {}", ts_dir.to_string_lossy()))?;
	for path in &copied {
		copy_into(path, &ts_dir.join(path.file_name().unwrap_or_default()))?;
	}
	let ts_tlt = ts_dir.join(format!("{}.tlt", stem));
	copy_into(&tlt, &ts_tlt)?;

	let frame_target_dir = if options.v2 {
		// Warp 2 no longer inverts the angles on import
		invert_tlt_file(&ts_tlt)?;
		project_dir.join("frames")
	} else {
		project_dir.to_path_buf()
	};
	fs::create_dir_all(&frame_target_dir)
		.context(format!("Failed to create folder: {}", frame_target_dir.to_string_lossy()))?;

	let mdoc_dir = project_dir.join("mdoc");
	fs::create_dir_all(&mdoc_dir)
		.context(format!("Failed to create folder: {}", mdoc_dir.to_string_lossy()))?;

	let mut mdoc = ts.read_mdoc()?;
	mdoc.downgrade_date_time()?;

	let frames = if mdoc.sections.iter().all(|s| s.contains(KEY_SUB_FRAME_PATH)) {

		let mut frames = Vec::with_capacity(mdoc.sections.len());
		for section in &mdoc.sections {
			let recorded = section.sub_frame_path().unwrap_or_default();
			let local = find_relative_path(frames_dir, recorded)
				.ok_or_else(|| EntityError::FileNotFound(frames_dir.join(recorded)))?;
			let dst = frame_target_dir.join(local.file_name().unwrap_or_default());
			copy_into(&local, &dst)?;
			frames.push(dst);
		}
		frames

	} else {

		if options.ensure_frames {
			return Err(EntityError::FileNotFound(frames_dir.to_path_buf()))
				.context(format!("{}: frames not found", stem));
		}
		info!("{}: frames not found, exporting the tilt images instead", stem);

		let prefix = frame_target_dir.join(format!("{}_sec_", stem));
		tools.run_checked(&imod::newstack_split(tools, ts.path(), &prefix))?;

		let pattern = format!("{}/{}_sec_[0-9][0-9].mrc",
			glob::Pattern::escape(&frame_target_dir.to_string_lossy()),
			glob::Pattern::escape(&stem)
		);
		let mut images = Vec::new();
		for entry in glob::glob(&pattern).context(format!("Invalid glob pattern: {}", pattern))? {
			images.push(entry?);
		}
		images.sort();
		if images.len() != mdoc.sections.len() {
			return Err(EntityError::SectionCount {
				path: ts.mdoc_path().to_path_buf(),
				expected: images.len(),
				found: mdoc.sections.len()
			}.into());
		}
		images
	};

	for (section, frame) in mdoc.sections.iter_mut().zip(&frames) {
		let name = frame.file_name()
			.map(|n| n.to_string_lossy().to_string())
			.unwrap_or_default();
		section.set(KEY_SUB_FRAME_PATH, format!("X:\\WarpDir\\{}", name));
	}
	mdoc.write(mdoc_dir.join(format!("{}.mdoc", stem)))?;
	info!("Exported {} to the Warp project {}", stem, project_dir.to_string_lossy());

	Ok(())
}


fn copy_into(src: &Path, dst: &Path) -> Result<()> {
	fs::copy(src, dst)
		.context(format!("Failed to copy {} to {}", src.to_string_lossy(), dst.to_string_lossy()))?;
	Ok(())
}


/// flips the sign of every tilt angle
pub fn invert_tlt_file(path: &Path) -> Result<()> {

	let text = fs::read_to_string(path)
		.context(format!("Failed to read tilt angles: {}", path.to_string_lossy()))?;

	let mut out = String::new();
	for line in text.lines().map(|l| l.trim()).filter(|l| !l.is_empty()) {
		match line.strip_prefix('-') {
			Some(positive) => out.push_str(positive),
			None => {
				out.push('-');
				out.push_str(line);
			}
		}
		out.push('\n');
	}

	fs::write(path, out)
		.context(format!("Failed to write tilt angles: {}", path.to_string_lossy()))
}


/// Reconstructs each tilt series from its previous IMOD alignment at about 10 A/px,
/// for picking with TomoTwin, and links the tomograms into `<dir>/tomo/` under unique names.
/// `thickness` is in unbinned pixels.
pub fn tomotwin_prep(tools: &Tools, tomotwin_dir: &Path, ts_list: &[TiltSeries], thickness: u32, uid: &str, bin_up: bool) -> Result<Vec<PathBuf>> {

	let tomo_dir = tomotwin_dir.join("tomo");
	fs::create_dir_all(&tomo_dir)
		.context(format!("Failed to create folder: {}", tomo_dir.to_string_lossy()))?;

	let mut links = Vec::with_capacity(ts_list.len());
	for ts in ts_list {

		let binning = tomotwin_binning(ts.angpix()?, bin_up);
		let ts_ali = align_with_imod(tools, ts, true, false, binning)?;

		let rec = Tomogram::from_tiltseries(tools, &ts_ali, &ReconstructionParams {
			bin: 1,
			sirt: 0,
			thickness: (thickness as f64/binning as f64).round() as u32,
			convert_to_byte: false,
			.. ReconstructionParams::default()
		})?;

		let parent = ts.path()
			.canonicalize()
			.context(format!("Failed to resolve {}", ts.path().to_string_lossy()))?;
		let parent_name = parent.parent()
			.and_then(|p| p.file_name())
			.map(|n| n.to_string_lossy().to_string())
			.unwrap_or_default();
		let link = tomo_dir.join(format!("{}_{}.mrc", uid, parent_name));
		let target = rec.path()
			.canonicalize()
			.context(format!("Failed to resolve {}", rec.path().to_string_lossy()))?;
		std::os::unix::fs::symlink(&target, &link)
			.context(format!("Failed to link {} to {}", link.to_string_lossy(), target.to_string_lossy()))?;
		info!("Linked {} for TomoTwin", link.to_string_lossy());
		links.push(link);
	}

	Ok(links)
}


/// an even binning to about 10 A/px, rounding the binning up or down
pub fn tomotwin_binning(angpix: f64, bin_up: bool) -> u32 {
	let half = 10.0/angpix/2.0;
	let half = if bin_up {
		half.ceil()
	} else {
		half.floor()
	};
	(half as u32*2).max(1)
}
