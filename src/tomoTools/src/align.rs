
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::error::{require_file, EntityError};
use crate::mdoc::KEY_IMAGE_SIZE;
use crate::mrc;
use crate::naming::{self, Halves};
use crate::tiltseries::TiltSeries;
use crate::tools::{imod, Tools};
use crate::tools::aretomo::{aretomo, AreTomoArgs, AreTomoMode};


#[derive(Debug, Clone)]
pub struct AreTomoOptions {
	/// refine with local patches
	pub local: bool,
	/// apply the `.aln` already beside the stack instead of aligning again
	pub previous: bool,
	pub do_evn_odd: bool,
	/// comma-separated GPU ids, or all of them
	pub gpus: Option<String>,
	/// sample thickness used for alignment, in nm
	pub volz_nm: u32
}

impl Default for AreTomoOptions {
	fn default() -> Self {
		Self {
			local: false,
			previous: false,
			do_evn_odd: false,
			gpus: None,
			volz_nm: 250
		}
	}
}


/// Aligns the stack with AreTomo, into `<stem>_ali.mrc`.
/// The halves, when asked for, get the very same `.aln` applied so they stay registered with the full stack.
#[tracing::instrument(skip_all, level = 5, name = "AreTomo")]
pub fn align_with_aretomo(tools: &Tools, ts: &TiltSeries, options: &AreTomoOptions) -> Result<TiltSeries> {

	let ali_stack = ts.ali_path();
	let aln_file = ts.aln_path();
	let angpix = ts.angpix()?;

	let tlt_file = ts.rawtlt_path();
	if !tlt_file.is_file() {
		tools.run_checked(&imod::extracttilts(tools, ts.path(), &tlt_file))?;
	}

	let mode = if options.previous {
		require_file(&aln_file)
			.context(format!("{}: asked for the previous alignment, but there is none", ts.path().to_string_lossy()))?;
		AreTomoMode::Apply {
			aln: aln_file.clone()
		}
	} else {
		let mdoc = ts.read_mdoc()?;
		let size = mdoc.global.get(KEY_IMAGE_SIZE)
			.and_then(|v| v.as_list())
			.filter(|size| size.len() >= 2)
			.ok_or_else(|| EntityError::MissingField {
				path: ts.mdoc_path().to_path_buf(),
				field: KEY_IMAGE_SIZE.to_string()
			})?;
		let patch = options.local
			.then(|| ((size[0]/1000.0).round() as u32, (size[1]/1000.0).round() as u32));
		AreTomoMode::Align {
			align_z: (options.volz_nm as f64*10.0/angpix).round() as u32,
			pretilt: -(mdoc.start_tilt()?.round() as i32),
			patch,
			gpus: tools.gpus(options.gpus.as_deref())?
		}
	};

	let cmd = aretomo(tools, &AreTomoArgs {
		input: ts.path().to_path_buf(),
		output: ali_stack.clone(),
		angles: Some(tlt_file.clone()),
		mode
	})?;
	tools.run_checked(&cmd)?;

	// AreTomo doesn't keep the pixel size
	mrc::set_pixel_size(&ali_stack, angpix)?;
	info!("Done aligning {} with AreTomo", ts.stem());

	// AreTomo names the .aln after the whole file name for .st stacks
	let st_aln = naming::appended(ts.path(), ".aln");
	if ts.path().extension().is_some_and(|e| e == "st") && st_aln.is_file() {
		fs::rename(&st_aln, &aln_file)
			.context(format!("Failed to rename {}", st_aln.to_string_lossy()))?;
	}

	// AreTomo before 1.3 doesn't write the tilts for the aligned stack
	if !naming::sibling(&ali_stack, ".tlt").is_file() {
		aln_to_tlt(&aln_file)?;
	}

	let aligned = TiltSeries::new(&ali_stack)?
		.with_mdoc(ts.mdoc_path());

	let Some(halves) = ts.halves().filter(|_| options.do_evn_odd) else {
		return Ok(aligned);
	};

	let ali_halves = Halves::for_path(&ali_stack);
	for (input, output) in halves.iter().zip(ali_halves.iter()) {
		let cmd = aretomo(tools, &AreTomoArgs {
			input: input.clone(),
			output: output.clone(),
			angles: Some(tlt_file.clone()),
			mode: AreTomoMode::Apply {
				aln: aln_file.clone()
			}
		})?;
		tools.run_checked(&cmd)?;
		mrc::set_pixel_size(output, angpix)?;

		// only the full stack's tilts are wanted
		let stale = naming::sibling(output, ".tlt");
		if stale.is_file() {
			fs::remove_file(&stale)
				.context(format!("Failed to delete {}", stale.to_string_lossy()))?;
		}
	}
	info!("Done aligning EVN and ODD stacks for {} with AreTomo", ts.stem());

	aligned.with_split_files(ali_halves.evn, ali_halves.odd)
}


/// Applies a previous IMOD alignment (`.xf` and `.tlt`) to make `<stem>_ali.mrc`, optionally binned.
#[tracing::instrument(skip_all, level = 5, name = "IMOD")]
pub fn align_with_imod(tools: &Tools, ts: &TiltSeries, previous: bool, do_evn_odd: bool, binning: u32) -> Result<TiltSeries> {

	if !previous {
		anyhow::bail!("Only previous alignments are supported with IMOD");
	}

	let xf = require_file(ts.xf_path())
		.context(format!("{}: asked for the previous alignment, but there is none", ts.path().to_string_lossy()))?;
	let tlt = require_file(ts.tlt_path())?;
	let ali_stack = ts.ali_path();

	let ali_tlt = naming::sibling(&ali_stack, ".tlt");
	fs::copy(&tlt, &ali_tlt)
		.context(format!("Failed to copy {} to {}", tlt.to_string_lossy(), ali_tlt.to_string_lossy()))?;

	let size = ts.binned_size(binning)?;
	let transform = |input: &Path, output: &Path| -> Result<()> {
		let cmd = imod::newstack_transform(tools, &imod::NewstackTransform {
			input: input.to_path_buf(),
			output: output.to_path_buf(),
			xf: xf.clone(),
			size,
			bin: binning
		});
		tools.run_checked(&cmd)?;
		Ok(())
	};

	transform(ts.path(), &ali_stack)?;
	let aligned = TiltSeries::new(&ali_stack)?
		.with_mdoc(ts.mdoc_path());

	let Some(halves) = ts.halves().filter(|_| do_evn_odd) else {
		info!("Finished aligning {} with IMOD", ts.stem());
		return Ok(aligned);
	};

	let ali_halves = Halves::for_path(&ali_stack);
	transform(&halves.evn, &ali_halves.evn)?;
	transform(&halves.odd, &ali_halves.odd)?;
	info!("Aligned {} and its EVN/ODD stacks with IMOD", ts.stem());

	aligned.with_split_files(ali_halves.evn, ali_halves.odd)
}


/// Writes the tilt angles of an AreTomo `.aln` file as an IMOD `<stem>_ali.tlt` file.
pub fn aln_to_tlt(aln_file: &Path) -> Result<PathBuf> {

	let text = fs::read_to_string(aln_file)
		.context(format!("Failed to read alignment: {}", aln_file.to_string_lossy()))?;

	let mut tilts = Vec::<String>::new();
	for line in text.lines() {

		let raw = line.split(' ').collect::<Vec<_>>();
		if raw.get(1).is_some_and(|s| s.starts_with("Local")) {
			break;
		}
		if raw[0].starts_with('#') || line.trim().is_empty() {
			continue;
		}

		// SEC ROT GMAG TX TY SMEAN SFIT SCALE BASE TILT
		let columns = line.split_whitespace().collect::<Vec<_>>();
		let [_, _, _, _, _, _, _, _, _, tilt] = columns[..] else {
			anyhow::bail!("Unexpected alignment row in {}: {}", aln_file.to_string_lossy(), line);
		};
		tilts.push(tilt.to_string());
	}

	let tlt_out = naming::sibling(aln_file, "_ali.tlt");
	fs::write(&tlt_out, tilts.join("\n"))
		.context(format!("Failed to write tilt angles: {}", tlt_out.to_string_lossy()))?;
	debug!("Wrote {} tilts to {}", tilts.len(), tlt_out.to_string_lossy());

	Ok(tlt_out)
}


/// The views AreTomo found too dark to use, 0-based.
/// Read from `<stem>_DarkImgs.txt`, or from the `.aln` for AreTomo 1.3 and later.
pub fn parse_darkimgs(ts: &TiltSeries) -> Result<Vec<usize>> {

	let dark_txt = ts.companion("_DarkImgs.txt");
	if dark_txt.is_file() {
		let text = fs::read_to_string(&dark_txt)
			.context(format!("Failed to read dark images: {}", dark_txt.to_string_lossy()))?;
		return text.lines()
			.filter(|line| !line.starts_with('#') && !line.trim().is_empty())
			.map(|line| line.trim().parse::<usize>()
				.context(format!("Invalid dark image in {}: {}", dark_txt.to_string_lossy(), line))
			)
			.collect();
	}

	let aln_file = require_file(ts.aln_path())?;
	let text = fs::read_to_string(&aln_file)
		.context(format!("Failed to read alignment: {}", aln_file.to_string_lossy()))?;

	let mut dark = Vec::new();
	for line in text.lines() {
		let raw = line.split(' ').collect::<Vec<_>>();
		match raw.get(1) {
			Some(s) if s.starts_with("Local") => break,
			Some(s) if s.starts_with("DarkFrame") => {
				// # DarkFrame =     0    0   -60.00
				let columns = line.split_whitespace().collect::<Vec<_>>();
				let [_, _, _, view, _, _] = columns[..] else {
					anyhow::bail!("Unexpected dark frame row in {}: {}", aln_file.to_string_lossy(), line);
				};
				dark.push(view.parse::<usize>()
					.context(format!("Invalid dark frame in {}: {}", aln_file.to_string_lossy(), line))?);
			}
			_ => ()
		}
	}

	Ok(dark)
}


#[cfg(test)]
mod test {

	use assert_fs::TempDir;
	use galvanic_assert::{assert_that, matchers::*};
	use indoc::indoc;

	use super::*;


	const ALN: &str = indoc! { "
		# AreTomo Alignment / Priism bprmMn
		# RawSize = 4096 4096 5
		# NumPatches = 0
		# DarkFrame =     0    0   -60.00
		# DarkFrame =     4    4    60.00
		# SEC     ROT         GMAG       TX          TY      SMEAN     SFIT    SCALE     BASE     TILT
		    1    84.8740    1.00000     12.345     -6.789     1.00     1.00     1.00     0.00   -30.00
		    2    84.8740    1.00000      1.000      2.000     1.00     1.00     1.00     0.00     0.02
		    3    84.8740    1.00000     -3.210      4.560     1.00     1.00     1.00     0.00    30.01
		# Local Alignment
		    1    0    1.0    2.0    3.0    4.0    1.0
	" };


	#[test]
	fn tilts_from_aln() {

		let dir = TempDir::new().unwrap();
		let aln = dir.path().join("TS_01.aln");
		fs::write(&aln, ALN).unwrap();

		let tlt = aln_to_tlt(&aln).unwrap();
		assert_that!(&tlt, eq(dir.path().join("TS_01_ali.tlt")));
		let text = fs::read_to_string(&tlt).unwrap();
		assert_that!(&text.as_str(), eq("-30.00\n0.02\n30.01"));
	}


	#[test]
	fn dark_images() {

		let dir = TempDir::new().unwrap();
		let path = dir.path().join("TS_01.mrc");
		mrc::write_blank(&path, 4, 4, 5, 1.0).unwrap();
		let ts = TiltSeries::new(&path).unwrap();

		// no .aln, no list
		let err = parse_darkimgs(&ts).unwrap_err();
		assert_that!(&matches!(err.downcast_ref::<EntityError>(), Some(EntityError::FileNotFound(..))), eq(true));

		fs::write(dir.path().join("TS_01.aln"), ALN).unwrap();
		assert_that!(&parse_darkimgs(&ts).unwrap(), eq(vec![0, 4]));

		// the list wins
		fs::write(dir.path().join("TS_01_DarkImgs.txt"), "# dark images\n1\n3\n").unwrap();
		assert_that!(&parse_darkimgs(&ts).unwrap(), eq(vec![1, 3]));
	}
}
