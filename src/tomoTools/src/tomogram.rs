
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::error::require_file;
use crate::mrc::{LazyHeader, MrcHeader};
use crate::naming::{self, Halves};


/// A reconstructed volume.
/// Binning, thickness, and axis tilt are baked into the file when it's reconstructed.
#[derive(Debug, Clone)]
pub struct Tomogram {
	path: PathBuf,
	halves: Option<Halves>,
	header: LazyHeader
}

impl Tomogram {

	pub fn new(path: impl Into<PathBuf>) -> Result<Self> {
		Ok(Self {
			path: require_file(path)?,
			halves: None,
			header: LazyHeader::default()
		})
	}

	/// fails with FileNotFound unless both halves exist
	pub fn with_split_files(mut self, evn: impl Into<PathBuf>, odd: impl Into<PathBuf>) -> Result<Self> {
		self.halves = Some(Halves::new(evn, odd)?);
		Ok(self)
	}

	/// Pairs the tomogram with half reconstructions found by name.
	/// The halves are often made by a separate run, so a missing half just means no split data.
	pub fn with_found_halves(mut self) -> Self {
		self.halves = Halves::find(&self.path);
		self
	}

	pub fn path(&self) -> &Path {
		&self.path
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

	pub fn delete_files(&self) -> Result<()> {
		let paths = [&self.path].into_iter()
			.chain(self.halves.iter().flat_map(|h| h.iter()));
		for path in paths {
			if path.is_file() {
				fs::remove_file(path)
					.context(format!("Failed to delete {}", path.to_string_lossy()))?;
			}
		}
		Ok(())
	}
}

impl PartialEq for Tomogram {
	fn eq(&self, other: &Self) -> bool {
		self.path == other.path
			&& self.halves == other.halves
	}
}


#[cfg(test)]
mod test {

	use assert_fs::TempDir;
	use galvanic_assert::{assert_that, matchers::*};

	use crate::mrc;

	use super::*;


	#[test]
	fn halves_by_name() {

		let dir = TempDir::new().unwrap();
		let path = dir.path().join("TS_01_rec.mrc");
		mrc::write_blank(&path, 4, 4, 2, 10.0).unwrap();

		let tomo = Tomogram::new(&path).unwrap()
			.with_found_halves();
		assert_that!(&tomo.is_split(), eq(false));
		assert_that!(&tomo.dim_zyx().unwrap(), eq([2, 4, 4]));
		assert_that!(&((tomo.angpix().unwrap() - 10.0).abs() < 1e-5), eq(true));

		// the denoising workflow's naming
		fs::write(dir.path().join("TS_01_even_rec.mrc"), "").unwrap();
		fs::write(dir.path().join("TS_01_odd_rec.mrc"), "").unwrap();
		let tomo = Tomogram::new(&path).unwrap()
			.with_found_halves();
		assert_that!(&tomo.halves().unwrap().evn, eq(dir.path().join("TS_01_even_rec.mrc")));

		// which loses to the _EVN/_ODD naming
		fs::write(dir.path().join("TS_01_rec_EVN.mrc"), "").unwrap();
		fs::write(dir.path().join("TS_01_rec_ODD.mrc"), "").unwrap();
		let tomo = Tomogram::new(&path).unwrap()
			.with_found_halves();
		assert_that!(&tomo.halves().unwrap().odd, eq(dir.path().join("TS_01_rec_ODD.mrc")));

		tomo.delete_files().unwrap();
		assert_that!(&path.exists(), eq(false));
		assert_that!(&dir.path().join("TS_01_rec_EVN.mrc").exists(), eq(false));
		assert_that!(&dir.path().join("TS_01_even_rec.mrc").exists(), eq(true));
	}
}
