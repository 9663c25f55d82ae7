
use std::path::{Path, PathBuf};

use anyhow::Result;

use crate::error::require_file;
use crate::mdoc::{LazyMdoc, MdocDocument};
use crate::naming;
use crate::tools::motioncor::MovieFormat;


/// the frames recorded for one tilt
#[derive(Debug, Clone)]
pub struct Movie {
	path: PathBuf,
	tilt_angle: f64,
	mdoc: LazyMdoc
}

impl Movie {

	pub fn new(path: impl Into<PathBuf>, tilt_angle: f64) -> Result<Self> {
		Ok(Self {
			path: require_file(path)?,
			tilt_angle,
			mdoc: LazyMdoc::default()
		})
	}

	pub fn path(&self) -> &Path {
		&self.path
	}

	pub fn tilt_angle(&self) -> f64 {
		self.tilt_angle
	}

	/// `<movie>.mdoc`, written by SerialEM beside the frames
	pub fn mdoc_path(&self) -> PathBuf {
		naming::appended(&self.path, ".mdoc")
	}

	pub fn mdoc(&self) -> Result<Option<&MdocDocument>> {
		self.mdoc.get(&self.mdoc_path())
	}

	pub fn format(&self) -> Option<MovieFormat> {
		match self.path.extension()?.to_str()? {
			"mrc" => Some(MovieFormat::Mrc),
			"tif" | "tiff" => Some(MovieFormat::Tiff),
			_ => None
		}
	}
}

impl PartialEq for Movie {
	fn eq(&self, other: &Self) -> bool {
		self.path == other.path
			&& self.tilt_angle == other.tilt_angle
	}
}
