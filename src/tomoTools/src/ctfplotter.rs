
// Defocus estimation with IMOD's ctfplotter, and the bookkeeping of its .defocus files

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{info, trace};

use crate::align::parse_darkimgs;
use crate::error::EntityError;
use crate::mdoc::KEY_TARGET_DEFOCUS;
use crate::tiltseries::TiltSeries;
use crate::tools::{imod, Tools};


/// one fitted range of views, views numbered from 1
#[derive(Debug, Clone, PartialEq)]
pub struct DefocusRow {
	pub view_start: usize,
	pub view_end: usize,
	pub tilt_start: f64,
	pub tilt_end: f64,
	/// nm
	pub defocus_1: f64,
	/// nm
	pub defocus_2: f64,
	pub astigmatism_angle: f64
}


#[derive(Debug, Clone, Default, PartialEq)]
pub struct DefocusFile {
	pub rows: Vec<DefocusRow>
}

impl DefocusFile {

	pub fn read(path: impl AsRef<Path>) -> Result<Self> {
		let path = path.as_ref();
		let text = fs::read_to_string(path)
			.context(format!("Failed to read defocus file: {}", path.to_string_lossy()))?;
		Self::parse(&text)
			.context(format!("Failed to parse defocus file: {}", path.to_string_lossy()))
	}

	/// tab-separated, the version line ctfplotter starts with is the only row that ends at view 0
	pub fn parse(text: &str) -> Result<Self> {

		let mut rows = Vec::new();
		for line in text.lines() {

			if line.trim().is_empty() {
				continue;
			}
			let cols = line.split('\t')
				.map(|c| c.trim())
				.collect::<Vec<_>>();
			if cols.get(1) == Some(&"0") {
				trace!("Skipping defocus header: {}", line);
				continue;
			}

			let [view_start, view_end, tilt_start, tilt_end, defocus_1, defocus_2, astigmatism_angle] = cols[..] else {
				anyhow::bail!("Expected 7 columns, not {}: {}", cols.len(), line);
			};
			let int = |s: &str| s.parse::<usize>()
				.context(format!("Invalid view number: {}", s));
			let float = |s: &str| s.parse::<f64>()
				.context(format!("Invalid number: {}", s));

			rows.push(DefocusRow {
				view_start: int(view_start)?,
				view_end: int(view_end)?,
				tilt_start: float(tilt_start)?,
				tilt_end: float(tilt_end)?,
				defocus_1: float(defocus_1)?,
				defocus_2: float(defocus_2)?,
				astigmatism_angle: float(astigmatism_angle)?
			});
		}

		Ok(Self {
			rows
		})
	}

	/// with ctfplotter's version line, and the views shifted to start at 1 again
	pub fn render(&self) -> String {

		// rows aren't always in view order after editing
		let shift = self.rows.iter()
			.map(|row| row.view_start)
			.min()
			.map(|view| view.saturating_sub(1))
			.unwrap_or(0);

		let mut out = String::from("1\t0\t0.0\t0.0\t0.0\t3\n");
		for row in &self.rows {
			out.push_str(&format!("{}\t{}\t{}\t{}\t{}\t{}\t{}\n",
				row.view_start.saturating_sub(shift),
				row.view_end.saturating_sub(shift),
				row.tilt_start,
				row.tilt_end,
				row.defocus_1,
				row.defocus_2,
				row.astigmatism_angle
			));
		}
		out.push('\n');
		out
	}

	pub fn write(&self, path: impl AsRef<Path>) -> Result<()> {
		let path = path.as_ref();
		fs::write(path, self.render())
			.context(format!("Failed to write defocus file: {}", path.to_string_lossy()))
	}
}


/// Fits the defocus of every view with ctfplotter, unless there's already a fit.
/// Returns the defocus file.
#[tracing::instrument(skip_all, level = 5, name = "CTFPlotter")]
pub fn run_ctfplotter(tools: &Tools, ts: &TiltSeries, overwrite: bool) -> Result<PathBuf> {

	if !overwrite {
		if let Some(existing) = ts.defocus_file() {
			info!("Using the defocus fit in {}", existing.to_string_lossy());
			return Ok(existing);
		}
	}

	let mdoc = ts.read_mdoc()?;
	let target_defocus = mdoc.sections.first()
		.and_then(|s| s.target_defocus())
		.ok_or_else(|| EntityError::MissingField {
			path: ts.mdoc_path().to_path_buf(),
			field: KEY_TARGET_DEFOCUS.to_string()
		})?;

	let microscope = &tools.config().microscope;
	let defocus = ts.companion(".defocus");
	let log = ts.path().parent()
		.unwrap_or(Path::new("."))
		.join("ctfplotter.log");

	let cmd = imod::ctfplotter(tools, &imod::CtfplotterArgs {
		stack: ts.path().to_path_buf(),
		tlt: ts.tlt_path(),
		defocus: defocus.clone(),
		pixel_size_nm: ts.angpix()?/10.0,
		voltage_kv: microscope.voltage_kv,
		cs_mm: microscope.cs_mm,
		amplitude_contrast: microscope.amplitude_contrast,
		axis_angle: ts.axis_angle()?,
		expected_defocus: target_defocus.abs()*1000.0
	}).log_to(log);
	tools.run_checked(&cmd)?;
	info!("Fitted the defocus of {}", ts.path().to_string_lossy());

	Ok(defocus)
}


/// Writes the defocus fit for the stack AreTomo exported, without the views AreTomo found too dark.
pub fn ctfplotter_aretomo_export(tools: &Tools, ts: &TiltSeries) -> Result<PathBuf> {

	let dark = parse_darkimgs(ts)?;

	// fit on the original stack, the aligned one is interpolated
	let mut defocus = DefocusFile::read(run_ctfplotter(tools, ts, false)?)?;

	// dark views are 0-based, ctfplotter's 1-based
	defocus.rows.retain(|row| !dark.contains(&(row.view_start.wrapping_sub(1))));

	let out = export_dir(ts).join(format!("{}_ali.defocus", ts.stem()));
	defocus.write(&out)?;
	Ok(out)
}


/// where AreTomo writes its IMOD-style export
pub fn export_dir(ts: &TiltSeries) -> PathBuf {
	ts.companion("_ali_Imod")
}
