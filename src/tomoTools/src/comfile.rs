
// IMOD command files: one `Key<tab or space>value` per line, with comments and program lines mixed in

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};


/// the first value recorded for the key
pub fn get_value(path: impl AsRef<Path>, key: &str) -> Result<Option<String>> {

	let path = path.as_ref();
	let text = fs::read_to_string(path)
		.context(format!("Failed to read command file: {}", path.to_string_lossy()))?;

	let prefix = format!("{}\t", key);
	let value = text.lines()
		.find(|line| line.starts_with(&prefix))
		.and_then(|line| line.split_whitespace().nth(1))
		.map(|v| v.to_string());

	Ok(value)
}


/// replaces the value of every line for the key, keeping the line's separator
pub fn modify_value(path: impl AsRef<Path>, key: &str, value: &str) -> Result<()> {

	let path = path.as_ref();
	let text = fs::read_to_string(path)
		.context(format!("Failed to read command file: {}", path.to_string_lossy()))?;

	let mut out = String::with_capacity(text.len());
	for line in text.lines() {
		let sep = ['\t', ' '].into_iter()
			.find(|sep| line.starts_with(&format!("{}{}", key, sep)));
		match sep {
			Some(sep) => out.push_str(&format!("{}{}{}\n", key, sep, value)),
			None => {
				out.push_str(line);
				out.push('\n');
			}
		}
	}

	fs::write(path, out)
		.context(format!("Failed to write command file: {}", path.to_string_lossy()))
}
