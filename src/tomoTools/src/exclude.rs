
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::mdoc::MdocDocument;
use crate::tiltseries::TiltSeries;
use crate::tools::{imod, Tools};


pub const EXCLUDED_DIR: &'static str = "excluded_views";
pub const README_TEXT: &'static str = "Restore full stack by moving these files back and running command excludeviews -restore";


/// Parses IMOD's 1-based view list syntax, eg `1,4-6`
pub fn parse_views(views: &str) -> Result<BTreeSet<usize>> {

	let mut out = BTreeSet::new();
	for part in views.split(',').map(|p| p.trim()).filter(|p| !p.is_empty()) {

		let parse = |s: &str| s.trim().parse::<usize>()
			.context(format!("Invalid view in list \"{}\": {}", views, s));

		match part.split_once('-') {
			Some((start, end)) => {
				let (start, end) = (parse(start)?, parse(end)?);
				if start > end {
					anyhow::bail!("Invalid view range in list \"{}\": {}", views, part);
				}
				out.extend(start ..= end);
			}
			None => {
				out.insert(parse(part)?);
			}
		}
	}

	if out.contains(&0) {
		anyhow::bail!("Views are numbered from 1: \"{}\"", views);
	}

	Ok(out)
}


/// the inverse of parse_views, with consecutive views collapsed into ranges
pub fn format_views(views: &BTreeSet<usize>) -> String {

	let mut ranges = Vec::<(usize, usize)>::new();
	for &view in views {
		match ranges.last_mut() {
			Some((_, end)) if *end + 1 == view => *end = view,
			_ => ranges.push((view, view))
		}
	}

	ranges.into_iter()
		.map(|(start, end)| if start == end {
			start.to_string()
		} else {
			format!("{}-{}", start, end)
		})
		.collect::<Vec<_>>()
		.join(",")
}


/// Reads a batch file of `<stack path> <views>` lines, the views last on each line.
/// Invalid lines are skipped with a warning.
pub fn read_exclusion_file(path: &Path) -> Result<BTreeMap<PathBuf,String>> {

	let text = fs::read_to_string(path)
		.context(format!("Failed to read batch file: {}", path.to_string_lossy()))?;

	let mut out = BTreeMap::new();
	for line in text.lines() {
		if line.trim().is_empty() {
			continue;
		}
		let Some((stack, views)) = line.trim_end().rsplit_once(char::is_whitespace) else {
			warn!("Skipping invalid line in the batch file: \"{}\"", line);
			continue;
		};
		let stack = stack.trim();
		if stack.is_empty() {
			warn!("Skipping invalid line in the batch file: \"{}\"", line);
			continue;
		}
		out.insert(PathBuf::from(stack), views.to_string());
	}

	Ok(out)
}


/// Removes the views (1-based) from the stack, its halves, and its mdoc, in place.
/// excludeviews keeps the removed views in `*_cutviews0.*` files, which are moved into `excluded_views/`
/// beside the stack so the full stack can be restored.
#[tracing::instrument(skip_all, level = 5, name = "Exclude")]
pub fn exclude_views(tools: &Tools, ts: &TiltSeries, views: &BTreeSet<usize>) -> Result<TiltSeries> {

	let mdoc = ts.read_mdoc()?;
	let num_sections = mdoc.sections.len();
	if let Some(bad) = views.iter().find(|&&v| v == 0 || v > num_sections) {
		anyhow::bail!("Can't exclude view {} from {}, it has {} views", bad, ts.path().to_string_lossy(), num_sections);
	}

	let list = format_views(views);
	tools.run_checked(&imod::excludeviews(tools, &list, ts.path()))?;
	info!("Excluded views {} from {}", list, ts.path().to_string_lossy());

	if let Some(halves) = ts.halves() {
		for half in halves.iter() {
			tools.run_checked(&imod::excludeviews(tools, &list, half))?;
		}
		info!("Excluded views {} from the EVN and ODD stacks of {}", list, ts.path().to_string_lossy());
	}

	// newer excludeviews edit the mdoc themselves
	let mut mdoc = MdocDocument::read(ts.mdoc_path())?;
	if mdoc.sections.len() == num_sections {
		let indices = views.iter()
			.map(|v| v - 1)
			.collect::<BTreeSet<_>>();
		mdoc.remove_sections(&indices)?;
		mdoc.save()?;
	}

	let parent = ts.path().parent()
		.unwrap_or(Path::new("."));
	stash_cut_views(parent)?;

	let out = TiltSeries::new(ts.path())?
		.with_mdoc(ts.mdoc_path());
	match ts.halves() {
		Some(halves) => out.with_split_files(&halves.evn, &halves.odd),
		None => Ok(out)
	}
}


/// moves excludeviews' leftovers out of the way, with a note on how to restore them
fn stash_cut_views(dir: &Path) -> Result<PathBuf> {

	let excluded_dir = dir.join(EXCLUDED_DIR);
	if !excluded_dir.is_dir() {
		fs::create_dir(&excluded_dir)
			.context(format!("Failed to create folder: {}", excluded_dir.to_string_lossy()))?;
	}

	let pattern = format!("{}/*_cutviews0.*", glob::Pattern::escape(&dir.to_string_lossy()));
	for entry in glob::glob(&pattern).context(format!("Invalid glob pattern: {}", pattern))? {
		let path = entry?;
		let Some(name) = path.file_name() else {
			continue;
		};
		fs::rename(&path, excluded_dir.join(name))
			.context(format!("Failed to move {}", path.to_string_lossy()))?;
	}

	let readme = excluded_dir.join("README");
	fs::write(&readme, README_TEXT)
		.context(format!("Failed to write {}", readme.to_string_lossy()))?;

	Ok(excluded_dir)
}


#[cfg(test)]
mod test {

	use assert_fs::TempDir;
	use galvanic_assert::{assert_that, matchers::*};

	use super::*;


	#[test]
	fn view_lists() {
		assert_that!(&parse_views("1,4-6, 9").unwrap(), eq(BTreeSet::from([1, 4, 5, 6, 9])));
		assert_that!(&parse_views("").unwrap().is_empty(), eq(true));
		assert_that!(&parse_views("0,1").is_err(), eq(true));
		assert_that!(&parse_views("6-4").is_err(), eq(true));
		assert_that!(&parse_views("a").is_err(), eq(true));
		let text = format_views(&BTreeSet::from([1, 4, 5, 6, 9]));
		assert_that!(&text.as_str(), eq("1,4-6,9"));
		let text = format_views(&BTreeSet::from([2, 5]));
		assert_that!(&text.as_str(), eq("2,5"));
	}


	#[test]
	fn exclusion_file() {
		let dir = TempDir::new().unwrap();
		let path = dir.path().join("exclude.txt");
		fs::write(&path, "/data/TS 01.mrc\t1,2\n\njunk\n/data/TS_02.mrc 40-41\n").unwrap();
		let exclusions = read_exclusion_file(&path).unwrap();
		assert_that!(&exclusions.len(), eq(2));
		let expected_ts01 = "1,2".to_string();
		assert_that!(&exclusions.get(Path::new("/data/TS 01.mrc")), eq(Some(&expected_ts01)));
		let expected_ts02 = "40-41".to_string();
		assert_that!(&exclusions.get(Path::new("/data/TS_02.mrc")), eq(Some(&expected_ts02)));
	}
}
