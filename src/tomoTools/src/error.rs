
use std::path::PathBuf;

use thiserror::Error;


/// failures while constructing or deriving an entity from the files on disk
#[derive(Debug, Error)]
pub enum EntityError {

	#[error("File not found: {}", .0.to_string_lossy())]
	FileNotFound(PathBuf),

	#[error("Refusing to overwrite existing file: {}", .0.to_string_lossy())]
	FileExists(PathBuf),

	#[error("Not a directory: {}", .0.to_string_lossy())]
	NotADirectory(PathBuf),

	#[error("Missing field {field} in {}", .path.to_string_lossy())]
	MissingField {
		path: PathBuf,
		field: String
	},

	#[error("{} has {found} sections, expected {expected}", .path.to_string_lossy())]
	SectionCount {
		path: PathBuf,
		expected: usize,
		found: usize
	}
}


#[derive(Debug, Error)]
pub enum ToolError {

	#[error("Executable for {tool} not found")]
	NotFound {
		tool: String
	},

	#[error("Failed to launch {tool}")]
	Spawn {
		tool: String,
		#[source]
		source: std::io::Error
	},

	#[error("{tool} exited with code {}: {stderr}", .code.map(|c| c.to_string()).unwrap_or("(signal)".to_string()))]
	Failed {
		tool: String,
		code: Option<i32>,
		stderr: String
	}
}


/// returns FileNotFound unless the path exists
pub fn require_file(path: impl Into<PathBuf>) -> Result<PathBuf,EntityError> {
	let path = path.into();
	if path.exists() {
		Ok(path)
	} else {
		Err(EntityError::FileNotFound(path))
	}
}


/// returns FileExists if something already occupies the path
pub fn require_vacant(path: impl Into<PathBuf>) -> Result<PathBuf,EntityError> {
	let path = path.into();
	if path.exists() {
		Err(EntityError::FileExists(path))
	} else {
		Ok(path)
	}
}
