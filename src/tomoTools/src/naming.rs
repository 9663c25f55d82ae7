
// companion files are found purely by name, the external tools don't record them anywhere

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use crate::error::{require_file, EntityError};


/// the even and odd frame sums (or reconstructions) paired with a primary file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Halves {
	pub evn: PathBuf,
	pub odd: PathBuf
}

impl Halves {

	/// fails with FileNotFound unless both halves exist
	pub fn new(evn: impl Into<PathBuf>, odd: impl Into<PathBuf>) -> Result<Self,EntityError> {
		Ok(Self {
			evn: require_file(evn)?,
			odd: require_file(odd)?
		})
	}

	/// pairs output paths that don't exist yet
	pub fn planned(evn: impl Into<PathBuf>, odd: impl Into<PathBuf>) -> Self {
		Self {
			evn: evn.into(),
			odd: odd.into()
		}
	}

	/// the `<stem>_EVN.mrc`/`<stem>_ODD.mrc` paths for a primary path, whatever its extension
	pub fn for_path(path: impl AsRef<Path>) -> Self {
		let path = path.as_ref();
		Self::planned(sibling(path, "_EVN.mrc"), sibling(path, "_ODD.mrc"))
	}

	pub fn iter(&self) -> impl Iterator<Item=&PathBuf> {
		[&self.evn, &self.odd].into_iter()
	}

	/// the halves that exist, using the naming conventions in priority order:
	/// `<stem>_EVN.mrc`, then `<stem>_even.mrc`, then `<stem minus 3 chars>even_rec.mrc`.
	/// Halves are always MRC files, even beside a `.st` stack.
	pub fn find(path: impl AsRef<Path>) -> Option<Self> {

		let path = path.as_ref();

		let mut candidates = vec![
			(sibling(path, "_EVN.mrc"), sibling(path, "_ODD.mrc")),
			(sibling(path, "_even.mrc"), sibling(path, "_odd.mrc"))
		];

		// the reconstructions of the denoising workflow drop the `rec` of `_rec`, then append `even_rec`
		let stem = stem(path);
		if stem.chars().count() > 3 {
			let prefix = stem.chars()
				.take(stem.chars().count() - 3)
				.collect::<String>();
			candidates.push((
				path.with_file_name(format!("{}even_rec.mrc", prefix)),
				path.with_file_name(format!("{}odd_rec.mrc", prefix))
			));
		}

		candidates.into_iter()
			.find(|(evn, odd)| evn.is_file() && odd.is_file())
			.map(|(evn, odd)| Self::planned(evn, odd))
	}
}


/// true for files that are themselves even/odd halves
pub fn is_half(path: impl AsRef<Path>) -> bool {
	let stem = stem(path.as_ref());
	["_EVN", "_ODD", "_even", "_odd"].iter()
		.any(|suffix| stem.ends_with(suffix))
}


pub fn stem(path: &Path) -> String {
	path.file_stem()
		.map(|s| s.to_string_lossy().to_string())
		.unwrap_or_default()
}


/// `dir/stem.ext` -> `dir/stem<suffix>.ext`
pub fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
	let mut name = OsString::from(stem(path));
	name.push(suffix);
	if let Some(ext) = path.extension() {
		name.push(".");
		name.push(ext);
	}
	path.with_file_name(name)
}


/// `dir/stem.ext` -> `dir/stem<suffix>`, where the suffix carries its own extension
pub fn sibling(path: &Path, suffix: &str) -> PathBuf {
	path.with_file_name(format!("{}{}", stem(path), suffix))
}


/// `dir/stem.ext` -> `dir/stem.ext<suffix>`, eg for `.mdoc` sidecars
pub fn appended(path: &Path, suffix: &str) -> PathBuf {
	let mut name = path.as_os_str().to_owned();
	name.push(suffix);
	PathBuf::from(name)
}


/// `dir/stem.ext.mdoc` -> `dir/stem.ext`
pub fn strip_mdoc(path: &Path) -> Option<PathBuf> {
	let name = path.file_name()?.to_str()?;
	let primary = name.strip_suffix(".mdoc")?;
	Some(path.with_file_name(primary))
}
