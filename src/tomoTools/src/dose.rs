
use anyhow::Result;
use tracing::{info, warn};

use crate::naming::{self, Halves};
use crate::tiltseries::TiltSeries;
use crate::tools::{imod, Tools};


/// Dose-weights the stack with mtffilter, into `<stem>_filtered.mrc`.
/// A zero ExposureDose anywhere leaves the stack as it is, since mtffilter has nothing to weight by.
#[tracing::instrument(skip_all, level = 5, name = "DoseFilter")]
pub fn dose_filter(tools: &Tools, ts: &TiltSeries, do_evn_odd: bool) -> Result<TiltSeries> {

	let mdoc = ts.read_mdoc()?;
	let doses = mdoc.exposure_doses()?;
	if doses.iter().any(|dose| *dose == 0.0) {
		warn!("{} has no ExposureDose set, skipping dose filtering", ts.mdoc_path().to_string_lossy());
		return Ok(ts.clone());
	}

	let filtered = naming::sibling(ts.path(), "_filtered.mrc");
	tools.run_checked(&imod::mtffilter(tools, ts.mdoc_path(), ts.path(), &filtered))?;
	let out = TiltSeries::new(&filtered)?
		.with_mdoc(ts.mdoc_path());

	let Some(halves) = ts.halves().filter(|_| do_evn_odd) else {
		info!("Done dose-filtering {}", ts.path().to_string_lossy());
		return Ok(out);
	};

	let filtered_halves = Halves::for_path(&filtered);
	for (input, output) in halves.iter().zip(filtered_halves.iter()) {
		tools.run_checked(&imod::mtffilter(tools, ts.mdoc_path(), input, output))?;
	}
	info!("Done dose-filtering {} and its EVN/ODD stacks", ts.path().to_string_lossy());

	out.with_split_files(filtered_halves.evn, filtered_halves.odd)
}
