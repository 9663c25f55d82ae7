
// Turns command-line inputs into entities.
// Entities are always re-derived from the files on disk, paired with their halves by name.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{info, trace};

use crate::naming;
use crate::tiltseries::TiltSeries;
use crate::tomogram::Tomogram;


/// what a command received: already-resolved entities pass through untouched
#[derive(Debug, Clone)]
pub enum Inputs<E> {
	Resolved(Vec<E>),
	Paths(Vec<PathBuf>)
}

impl<E> From<Vec<E>> for Inputs<E> {
	fn from(entities: Vec<E>) -> Self {
		Self::Resolved(entities)
	}
}


pub trait Resolvable: Sized {

	const KIND: &'static str;

	/// true if a bare file argument names a primary file of this kind
	fn accepts(path: &Path) -> bool;

	/// the primary files a directory argument stands for
	fn expand_dir(dir: &Path) -> Result<Vec<PathBuf>>;

	/// the entity for a primary file, with its halves if they're both there
	fn open(path: PathBuf) -> Result<Self>;

	fn is_split(&self) -> bool;

	/// anchors are never processed as data
	fn is_anchor(&self) -> Result<bool> {
		Ok(false)
	}
}


impl Resolvable for TiltSeries {

	const KIND: &'static str = "TiltSeries";

	fn accepts(path: &Path) -> bool {
		has_extension(path, &["st", "mrc"])
			&& !naming::is_half(path)
	}

	/// every stack with an mdoc, except the ones excludeviews leaves behind
	fn expand_dir(dir: &Path) -> Result<Vec<PathBuf>> {
		let paths = glob_dir(dir, "*.mdoc")?
			.into_iter()
			.filter(|p| {
				let name = p.file_name()
					.map(|n| n.to_string_lossy().to_string())
					.unwrap_or_default();
				!name.contains("allviews") && !name.contains("cutviews")
			})
			.filter_map(|p| naming::strip_mdoc(&p))
			.collect();
		Ok(paths)
	}

	fn open(path: PathBuf) -> Result<Self> {
		Ok(TiltSeries::new(path)?
			.with_found_halves())
	}

	fn is_split(&self) -> bool {
		TiltSeries::is_split(self)
	}

	/// stacks whose tilts are all near zero, judged by the mdoc if there is one
	fn is_anchor(&self) -> Result<bool> {
		if !self.mdoc_path().is_file() {
			return Ok(false);
		}
		Ok(self.read_mdoc()?.is_anchor())
	}
}


impl Resolvable for Tomogram {

	const KIND: &'static str = "Tomogram";

	fn accepts(path: &Path) -> bool {
		has_extension(path, &["mrc", "rec"])
			&& !naming::is_half(path)
			&& !is_rec_half(path)
	}

	fn expand_dir(dir: &Path) -> Result<Vec<PathBuf>> {
		let paths = glob_dir(dir, "*.mrc")?
			.into_iter()
			.filter(|p| Self::accepts(p))
			.collect();
		Ok(paths)
	}

	fn open(path: PathBuf) -> Result<Self> {
		Ok(Tomogram::new(path)?
			.with_found_halves())
	}

	fn is_split(&self) -> bool {
		Tomogram::is_split(self)
	}
}


/// Resolves the inputs into entities.
/// In batch mode, the only input is a text file listing the paths, one per line.
/// A path that doesn't exist fails the whole resolution with FileNotFound.
/// Anchor stacks are left out.
pub fn resolve<E:Resolvable>(inputs: Inputs<E>, batch: bool) -> Result<Vec<E>> {

	let paths = match inputs {
		Inputs::Resolved(entities) => return Ok(entities),
		Inputs::Paths(paths) => paths
	};

	let paths = match (batch, paths.first()) {
		(true, Some(list)) => read_batch_file(list)?,
		_ => paths
	};

	let mut primaries = Vec::<PathBuf>::new();
	for path in paths {
		if path.is_dir() {
			primaries.extend(E::expand_dir(&path)?);
		} else if path.is_file() {
			if E::accepts(&path) {
				primaries.push(path);
			} else {
				trace!("Ignoring {}", path.to_string_lossy());
			}
		} else {
			// let the constructor report it
			primaries.push(path);
		}
	}

	let mut entities = Vec::with_capacity(primaries.len());
	for path in primaries {
		let entity = E::open(path.clone())?;
		if entity.is_anchor()? {
			info!("Skipping {}, all its tilt angles are near zero so it's not a tilt series", path.to_string_lossy());
			continue;
		}
		if entity.is_split() {
			info!("Found {} {} with EVN and ODD halves", E::KIND, path.to_string_lossy());
		} else {
			info!("Found {} {}", E::KIND, path.to_string_lossy());
		}
		entities.push(entity);
	}

	Ok(entities)
}


/// shorthand for resolving plain paths
pub fn resolve_paths<E:Resolvable>(paths: &[PathBuf], batch: bool) -> Result<Vec<E>> {
	resolve(Inputs::Paths(paths.to_vec()), batch)
}


/// one path per line, blank lines ignored
pub fn read_batch_file(path: &Path) -> Result<Vec<PathBuf>> {
	let text = fs::read_to_string(path)
		.context(format!("Failed to read batch file: {}", path.to_string_lossy()))?;
	let paths = text.lines()
		.map(|line| line.trim())
		.filter(|line| !line.is_empty())
		.map(PathBuf::from)
		.collect();
	Ok(paths)
}


fn has_extension(path: &Path, extensions: &[&str]) -> bool {
	path.extension()
		.and_then(|e| e.to_str())
		.map(|e| extensions.contains(&e))
		.unwrap_or(false)
}


/// the `_even_rec`/`_odd_rec` halves of the denoising workflow
fn is_rec_half(path: &Path) -> bool {
	let stem = naming::stem(path);
	stem.ends_with("even_rec") || stem.ends_with("odd_rec")
}


/// matches in a directory, sorted and without duplicates
fn glob_dir(dir: &Path, pattern: &str) -> Result<Vec<PathBuf>> {
	let pattern = format!("{}/{}", glob::Pattern::escape(&dir.to_string_lossy()), pattern);
	let mut paths = BTreeSet::new();
	for entry in glob::glob(&pattern).context(format!("Invalid glob pattern: {}", pattern))? {
		paths.insert(entry?);
	}
	Ok(paths.into_iter().collect())
}
