
// MDOC files are the metadata sidecars written by SerialEM
// https://bio3d.colorado.edu/SerialEM/hlp/html/about_formats.htm

use std::cell::OnceCell;
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use time::{Date, Month, PrimitiveDateTime, Time};
use time::macros::format_description;
use tracing::{trace, warn};

use crate::error::EntityError;


pub const KEY_TILT_ANGLE: &'static str = "TiltAngle";
pub const KEY_EXPOSURE_DOSE: &'static str = "ExposureDose";
pub const KEY_SUB_FRAME_PATH: &'static str = "SubFramePath";
pub const KEY_DATE_TIME: &'static str = "DateTime";
pub const KEY_PIXEL_SPACING: &'static str = "PixelSpacing";
pub const KEY_ROTATION_AND_FLIP: &'static str = "RotationAndFlip";
pub const KEY_TARGET_DEFOCUS: &'static str = "TargetDefocus";
pub const KEY_GAIN_REFERENCE: &'static str = "GainReference";
pub const KEY_NUM_SUB_FRAMES: &'static str = "NumSubFrames";
pub const KEY_FRAME_DOSES_AND_NUMBER: &'static str = "FrameDosesAndNumber";
pub const KEY_MONTAGE: &'static str = "Montage";
pub const KEY_IMAGE_FILE: &'static str = "ImageFile";
pub const KEY_IMAGE_SIZE: &'static str = "ImageSize";
pub const KEY_DATA_MODE: &'static str = "DataMode";
pub const KEY_BINNING: &'static str = "Binning";


#[derive(Debug, Clone, PartialEq)]
pub enum MdocValue {
	Int(i64),
	Float(f64),
	Str(String),
	List(Vec<f64>)
}

impl MdocValue {

	/// Applies the MDOC typing rule:
	/// values with spaces become a list if every token is numeric, otherwise they stay a string,
	/// values without spaces become an int, then a float, then a string, whichever parses first
	pub fn parse(s: &str) -> Self {

		if s.contains(' ') {
			let nums = s.split_whitespace()
				.map(|token| match Self::parse_scalar(token) {
					Self::Int(i) => Some(i as f64),
					Self::Float(f) => Some(f),
					_ => None
				})
				.collect::<Option<Vec<_>>>();
			return match nums {
				Some(nums) => Self::List(nums),
				None => Self::Str(s.to_string())
			};
		}

		Self::parse_scalar(s)
	}

	fn parse_scalar(s: &str) -> Self {
		if let Ok(i) = s.parse::<i64>() {
			Self::Int(i)
		} else if let Ok(f) = s.parse::<f64>() {
			Self::Float(f)
		} else {
			Self::Str(s.to_string())
		}
	}

	pub fn as_f64(&self) -> Option<f64> {
		match self {
			Self::Int(i) => Some(*i as f64),
			Self::Float(f) => Some(*f),
			_ => None
		}
	}

	pub fn as_i64(&self) -> Option<i64> {
		match self {
			Self::Int(i) => Some(*i),
			_ => None
		}
	}

	pub fn as_str(&self) -> Option<&str> {
		match self {
			Self::Str(s) => Some(s.as_str()),
			_ => None
		}
	}

	pub fn as_list(&self) -> Option<&[f64]> {
		match self {
			Self::List(l) => Some(l.as_slice()),
			_ => None
		}
	}
}

impl fmt::Display for MdocValue {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Int(i) => write!(f, "{}", i),
			// keep the decimal point, so the value reads back as a float
			Self::Float(v) => write!(f, "{:?}", v),
			Self::Str(s) => write!(f, "{}", s),
			Self::List(l) => {
				for (i, v) in l.iter().enumerate() {
					if i > 0 {
						write!(f, " ")?;
					}
					write!(f, "{}", v)?;
				}
				Ok(())
			}
		}
	}
}

impl From<i64> for MdocValue {
	fn from(value: i64) -> Self {
		Self::Int(value)
	}
}

impl From<f64> for MdocValue {
	fn from(value: f64) -> Self {
		Self::Float(value)
	}
}

impl From<&str> for MdocValue {
	fn from(value: &str) -> Self {
		Self::Str(value.to_string())
	}
}

impl From<String> for MdocValue {
	fn from(value: String) -> Self {
		Self::Str(value)
	}
}

impl From<Vec<f64>> for MdocValue {
	fn from(value: Vec<f64>) -> Self {
		Self::List(value)
	}
}


/// An ordered key/value block: the global header, one [ZValue] section, or one [FrameSet]
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Fields {
	entries: Vec<(String, MdocValue)>
}

impl Fields {

	pub fn new() -> Self {
		Self::default()
	}

	pub fn len(&self) -> usize {
		self.entries.len()
	}

	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}

	pub fn iter(&self) -> impl Iterator<Item=(&str, &MdocValue)> {
		self.entries.iter()
			.map(|(k, v)| (k.as_str(), v))
	}

	pub fn get(&self, key: &str) -> Option<&MdocValue> {
		self.entries.iter()
			.find(|(k, _)| k == key)
			.map(|(_, v)| v)
	}

	pub fn contains(&self, key: &str) -> bool {
		self.get(key).is_some()
	}

	/// replaces an existing value in place, or appends a new key
	pub fn set(&mut self, key: impl Into<String>, value: impl Into<MdocValue>) {
		let key = key.into();
		let value = value.into();
		match self.entries.iter_mut().find(|(k, _)| *k == key) {
			Some(entry) => entry.1 = value,
			None => self.entries.push((key, value))
		}
	}

	pub fn remove(&mut self, key: &str) -> Option<MdocValue> {
		let i = self.entries.iter().position(|(k, _)| k == key)?;
		Some(self.entries.remove(i).1)
	}

	pub fn get_f64(&self, key: &str) -> Option<f64> {
		self.get(key)?.as_f64()
	}

	pub fn get_str(&self, key: &str) -> Option<&str> {
		self.get(key)?.as_str()
	}

	pub fn tilt_angle(&self) -> Option<f64> {
		self.get_f64(KEY_TILT_ANGLE)
	}

	pub fn exposure_dose(&self) -> Option<f64> {
		self.get_f64(KEY_EXPOSURE_DOSE)
	}

	pub fn sub_frame_path(&self) -> Option<&str> {
		self.get_str(KEY_SUB_FRAME_PATH)
	}

	pub fn date_time(&self) -> Option<PrimitiveDateTime> {
		self.get_str(KEY_DATE_TIME)
			.and_then(parse_date_time)
	}

	pub fn pixel_spacing(&self) -> Option<f64> {
		self.get_f64(KEY_PIXEL_SPACING)
	}

	pub fn rotation_and_flip(&self) -> Option<i64> {
		self.get(KEY_ROTATION_AND_FLIP)?.as_i64()
	}

	pub fn target_defocus(&self) -> Option<f64> {
		self.get_f64(KEY_TARGET_DEFOCUS)
	}

	pub fn gain_reference(&self) -> Option<&str> {
		self.get_str(KEY_GAIN_REFERENCE)
	}

	fn write_to(&self, out: &mut String) {
		for (key, value) in &self.entries {
			out.push_str(&format!("{} = {}\n", key, value));
		}
	}
}


#[derive(Debug, Clone, PartialEq, Default)]
pub struct MdocDocument {
	pub path: Option<PathBuf>,
	pub titles: Vec<String>,
	pub global: Fields,
	pub sections: Vec<Fields>,
	pub framesets: Vec<Fields>
}

/// which block subsequent key/value lines belong to
enum Scope {
	Global,
	Section,
	FrameSet
}

impl MdocDocument {

	/// an empty document, for stages that synthesize metadata
	pub fn new() -> Self {
		Self::default()
	}

	pub fn read(path: impl AsRef<Path>) -> Result<Self> {

		let path = path.as_ref();
		if !path.is_file() {
			return Err(EntityError::FileNotFound(path.to_path_buf()).into());
		}

		let text = fs::read_to_string(path)
			.context(format!("Failed to read mdoc file: {}", path.to_string_lossy()))?;

		let mut doc = Self::parse(&text);
		doc.path = Some(path.to_path_buf());
		Ok(doc)
	}

	pub fn parse(text: &str) -> Self {

		let mut doc = Self::new();
		let mut scope = Scope::Global;

		for line in text.lines() {
			let line = line.trim();
			if line.is_empty() {
				continue;
			}

			if let Some(title) = line.strip_prefix("[T =") {
				let title = title.strip_prefix(' ').unwrap_or(title);
				let title = title.strip_suffix(']').unwrap_or(title);
				doc.titles.push(title.to_string());
			} else if line.starts_with("[ZValue =") {
				doc.sections.push(Fields::new());
				scope = Scope::Section;
			} else if line.starts_with("[FrameSet =") {
				doc.framesets.push(Fields::new());
				scope = Scope::FrameSet;
			} else if let Some((key, value)) = line.split_once(" = ") {
				let value = MdocValue::parse(value);
				trace!("{} = {:?}", key, value);
				let fields = match scope {
					Scope::Global => &mut doc.global,
					Scope::Section => doc.sections.last_mut().unwrap_or(&mut doc.global),
					Scope::FrameSet => doc.framesets.last_mut().unwrap_or(&mut doc.global)
				};
				fields.set(key, value);
			} else {
				warn!("Skipping invalid mdoc line: \"{}\"", line);
			}
		}

		doc
	}

	/// the file contents, with sections and framesets renumbered from zero
	pub fn render(&self) -> String {

		let mut out = String::new();
		self.global.write_to(&mut out);

		for title in &self.titles {
			out.push_str(&format!("\n[T = {}]\n", title));
		}

		for (i, section) in self.sections.iter().enumerate() {
			out.push_str(&format!("\n[ZValue = {}]\n", i));
			section.write_to(&mut out);
		}

		for (i, frameset) in self.framesets.iter().enumerate() {
			out.push_str(&format!("\n[FrameSet = {}]\n", i));
			frameset.write_to(&mut out);
		}

		out
	}

	pub fn write(&self, path: impl AsRef<Path>) -> Result<()> {
		let path = path.as_ref();
		fs::write(path, self.render())
			.context(format!("Failed to write mdoc file: {}", path.to_string_lossy()))
	}

	/// writes the document back to the file it was read from
	pub fn save(&self) -> Result<()> {
		let Some(path) = &self.path else {
			bail!("Mdoc document has no path to save to");
		};
		self.write(path)
	}

	fn path_or_unknown(&self) -> PathBuf {
		self.path.clone()
			.unwrap_or_else(|| PathBuf::from("(unsaved mdoc)"))
	}

	pub fn tilt_angles(&self) -> Result<Vec<f64>> {
		self.sections.iter()
			.map(|s| s.tilt_angle()
				.ok_or_else(|| self.missing(KEY_TILT_ANGLE))
			)
			.collect::<Result<Vec<_>,_>>()
			.map_err(|e| e.into())
	}

	pub fn exposure_doses(&self) -> Result<Vec<f64>> {
		self.sections.iter()
			.map(|s| s.exposure_dose()
				.ok_or_else(|| self.missing(KEY_EXPOSURE_DOSE))
			)
			.collect::<Result<Vec<_>,_>>()
			.map_err(|e| e.into())
	}

	fn missing(&self, field: &str) -> EntityError {
		EntityError::MissingField {
			path: self.path_or_unknown(),
			field: field.to_string()
		}
	}

	/// Batch and anchoring files are acquired at the stage's flat position,
	/// so every section has a tilt angle within a degree of zero
	pub fn is_anchor(&self) -> bool {
		!self.sections.is_empty()
			&& self.sections.iter()
				.all(|s| s.tilt_angle().map(|a| a.abs() < 1.0).unwrap_or(false))
	}

	pub fn is_montage(&self) -> bool {
		self.global.get(KEY_MONTAGE)
			.and_then(|v| v.as_i64())
			== Some(1)
	}

	/// the tilt angle of the earliest acquired section
	pub fn start_tilt(&self) -> Result<f64> {

		let first = self.sections.iter()
			.filter_map(|s| s.date_time().map(|t| (t, s)))
			.min_by_key(|(t, _)| *t)
			.map(|(_, s)| s)
			.or(self.sections.first())
			.ok_or_else(|| self.missing(KEY_TILT_ANGLE))?;

		Ok(first.tilt_angle()
			.ok_or_else(|| self.missing(KEY_TILT_ANGLE))?)
	}

	pub fn sort_sections_by_tilt_angle(&mut self) -> Result<()> {
		self.tilt_angles()?;
		self.sections.sort_by(|a, b| {
			let a = a.tilt_angle().unwrap_or(0.0);
			let b = b.tilt_angle().unwrap_or(0.0);
			a.partial_cmp(&b).unwrap_or(Ordering::Equal)
		});
		Ok(())
	}

	pub fn sort_sections_by_date_time(&mut self) -> Result<()> {
		if self.sections.iter().any(|s| s.date_time().is_none()) {
			return Err(self.missing(KEY_DATE_TIME).into());
		}
		self.sections.sort_by_key(|s| s.date_time());
		Ok(())
	}

	/// rewrites four-digit years to two digits, which Warp insists on
	pub fn downgrade_date_time(&mut self) -> Result<()> {

		let format = format_description!("[day]-[month repr:short]-[year repr:last_two]  [hour]:[minute]:[second]");

		for section in &mut self.sections {
			let Some(dt) = section.date_time() else {
				continue;
			};
			let formatted = dt.format(format)
				.context("Failed to format DateTime")?;
			section.set(KEY_DATE_TIME, formatted);
		}

		Ok(())
	}

	/// removes the sections at the given zero-based indices
	pub fn remove_sections(&mut self, indices: &BTreeSet<usize>) -> Result<()> {

		if let Some(&last) = indices.last() {
			if last >= self.sections.len() {
				bail!("Section {} out of range, {} has {} sections", last, self.path_or_unknown().to_string_lossy(), self.sections.len());
			}
		}

		let sections = std::mem::take(&mut self.sections);
		self.sections = sections.into_iter()
			.enumerate()
			.filter(|(i, _)| !indices.contains(i))
			.map(|(_, s)| s)
			.collect();

		Ok(())
	}
}


/// an optional sidecar mdoc, read on first use
#[derive(Debug, Clone, Default)]
pub struct LazyMdoc(OnceCell<Option<MdocDocument>>);

impl LazyMdoc {

	/// the document at the path, or None if there is no such file
	pub fn get(&self, path: &Path) -> Result<Option<&MdocDocument>> {
		if let Some(doc) = self.0.get() {
			return Ok(doc.as_ref());
		}
		let doc = match path.is_file() {
			true => Some(MdocDocument::read(path)?),
			false => None
		};
		Ok(self.0.get_or_init(|| doc).as_ref())
	}
}


/// parses SerialEM's DateTime format, eg `05-Jan-23  14:02:11` or `05-Jan-2023  14:02:11`
pub fn parse_date_time(s: &str) -> Option<PrimitiveDateTime> {

	let mut parts = s.split_whitespace();
	let date = parts.next()?;
	let time = parts.next()?;

	let mut date_parts = date.split('-');
	let day = date_parts.next()?.parse::<u8>().ok()?;
	let month = parse_month(date_parts.next()?)?;
	let year_str = date_parts.next()?;
	let mut year = year_str.parse::<i32>().ok()?;
	if year_str.len() <= 2 {
		year += 2000;
	}

	let mut time_parts = time.split(':');
	let hour = time_parts.next()?.parse::<u8>().ok()?;
	let minute = time_parts.next()?.parse::<u8>().ok()?;
	let second = time_parts.next()?.parse::<u8>().ok()?;

	let date = Date::from_calendar_date(year, month, day).ok()?;
	let time = Time::from_hms(hour, minute, second).ok()?;
	Some(PrimitiveDateTime::new(date, time))
}


fn parse_month(s: &str) -> Option<Month> {
	let month = match s.to_ascii_lowercase().as_str() {
		"jan" => Month::January,
		"feb" => Month::February,
		"mar" => Month::March,
		"apr" => Month::April,
		"may" => Month::May,
		"jun" => Month::June,
		"jul" => Month::July,
		"aug" => Month::August,
		"sep" => Month::September,
		"oct" => Month::October,
		"nov" => Month::November,
		"dec" => Month::December,
		_ => return None
	};
	Some(month)
}


/// Re-roots a path recorded on the acquisition machine onto the local filesystem,
/// by dropping leading components until the rest is found under `base`.
/// Both Windows and Unix separators are accepted.
pub fn find_relative_path(base: impl AsRef<Path>, candidate: &str) -> Option<PathBuf> {

	let base = base.as_ref();

	let local = Path::new(candidate);
	if local.is_absolute() && local.is_file() {
		return Some(local.to_path_buf());
	}

	let parts = candidate.split(|c| c == '/' || c == '\\')
		.filter(|p| !p.is_empty())
		.collect::<Vec<_>>();

	(0 .. parts.len())
		.map(|start| {
			let mut path = base.to_path_buf();
			for part in &parts[start ..] {
				path.push(part);
			}
			path
		})
		.find(|path| path.is_file())
}


#[cfg(test)]
mod test {

	use assert_fs::TempDir;
	use galvanic_assert::{assert_that, matchers::*};
	use indoc::indoc;
	use time::macros::datetime;

	use super::*;


	#[test]
	fn value_typing() {
		assert_that!(&MdocValue::parse("5"), eq(MdocValue::Int(5)));
		assert_that!(&MdocValue::parse("-12"), eq(MdocValue::Int(-12)));
		assert_that!(&MdocValue::parse("5.5"), eq(MdocValue::Float(5.5)));
		assert_that!(&MdocValue::parse("5.0"), eq(MdocValue::Float(5.0)));
		assert_that!(&MdocValue::parse("abc"), eq(MdocValue::Str("abc".to_string())));
		assert_that!(&MdocValue::parse("4096 4096"), eq(MdocValue::List(vec![4096.0, 4096.0])));
		assert_that!(&MdocValue::parse("1.5 -2 3e2"), eq(MdocValue::List(vec![1.5, -2.0, 300.0])));
		assert_that!(&MdocValue::parse("1.5 two 3"), eq(MdocValue::Str("1.5 two 3".to_string())));
		assert_that!(&MdocValue::parse("05-Jan-23  14:02:11"), eq(MdocValue::Str("05-Jan-23  14:02:11".to_string())));
	}


	#[test]
	fn value_display() {
		let text = MdocValue::Int(5).to_string();
		assert_that!(&text.as_str(), eq("5"));
		let text = MdocValue::Float(5.0).to_string();
		assert_that!(&text.as_str(), eq("5.0"));
		let text = MdocValue::Float(0.25).to_string();
		assert_that!(&text.as_str(), eq("0.25"));
		let text = MdocValue::List(vec![4096.0, 1.5]).to_string();
		assert_that!(&text.as_str(), eq("4096 1.5"));
	}


	const MDOC: &'static str = indoc! { r#"
		PixelSpacing = 1.6
		Voltage = 300
		ImageFile = TS_01.mrc
		ImageSize = 4096 4096
		DataMode = 1

		[T = SerialEM: Digitized on EMBL Krios]

		[T =     Tilt axis angle = 85.3, binning = 1  spot = 8  camera = 0]

		[ZValue = 0]
		TiltAngle = 0.003
		ExposureDose = 3.5
		SubFramePath = X:\Data\Frames\TS_01_000_0.0.tif
		DateTime = 05-Jan-23  14:02:11

		[ZValue = 1]
		TiltAngle = 3.01
		ExposureDose = 3.5
		SubFramePath = X:\Data\Frames\TS_01_001_3.0.tif
		DateTime = 05-Jan-23  14:03:40

		[ZValue = 2]
		TiltAngle = -2.99
		ExposureDose = 3.5
		SubFramePath = X:\Data\Frames\TS_01_002_-3.0.tif
		DateTime = 05-Jan-23  14:02:55
	"# };


	#[test]
	fn parse() {

		let doc = MdocDocument::parse(MDOC);

		assert_that!(&doc.titles, eq(vec![
			"SerialEM: Digitized on EMBL Krios".to_string(),
			"    Tilt axis angle = 85.3, binning = 1  spot = 8  camera = 0".to_string()
		]));
		assert_that!(&doc.global.len(), eq(5));
		assert_that!(&doc.global.pixel_spacing(), eq(Some(1.6)));
		let expected_image_size = MdocValue::List(vec![4096.0, 4096.0]);
		assert_that!(&doc.global.get("ImageSize"), eq(Some(&expected_image_size)));
		assert_that!(&doc.sections.len(), eq(3));
		assert_that!(&doc.framesets.len(), eq(0));
		assert_that!(&doc.tilt_angles().unwrap(), eq(vec![0.003, 3.01, -2.99]));
		assert_that!(&doc.sections[1].sub_frame_path(), eq(Some(r"X:\Data\Frames\TS_01_001_3.0.tif")));
		assert_that!(&doc.sections[0].date_time(), eq(Some(datetime!(2023-01-05 14:02:11))));
	}


	#[test]
	fn roundtrip() {
		let doc = MdocDocument::parse(MDOC);
		let text = doc.render();
		assert_that!(&text.as_str(), eq(MDOC));
		assert_that!(&MdocDocument::parse(&doc.render()), eq(doc));
	}


	#[test]
	fn skips_invalid_lines() {
		let doc = MdocDocument::parse(indoc! { r#"
			Voltage = 300
			this line is broken

			[ZValue = 0]
			TiltAngle = 1
		"# });
		assert_that!(&doc.global.len(), eq(1));
		assert_that!(&doc.sections[0].tilt_angle(), eq(Some(1.0)));
	}


	#[test]
	fn framesets() {
		let doc = MdocDocument::parse(indoc! { r#"
			GainReference = gain.dm4

			[FrameSet = 0]
			TiltAngle = -60.01
			NumSubFrames = 10
		"# });
		assert_that!(&doc.framesets.len(), eq(1));
		assert_that!(&doc.framesets[0].get("NumSubFrames"), eq(Some(&MdocValue::Int(10))));
		assert_that!(&doc.global.gain_reference(), eq(Some("gain.dm4")));
	}


	#[test]
	fn start_tilt_and_sorts() {

		let mut doc = MdocDocument::parse(MDOC);

		// the earliest acquisition, not the first section
		assert_that!(&doc.start_tilt().unwrap(), eq(0.003));

		doc.sort_sections_by_tilt_angle().unwrap();
		assert_that!(&doc.tilt_angles().unwrap(), eq(vec![-2.99, 0.003, 3.01]));

		doc.sort_sections_by_date_time().unwrap();
		assert_that!(&doc.tilt_angles().unwrap(), eq(vec![0.003, -2.99, 3.01]));
	}


	#[test]
	fn anchor_and_montage() {

		let doc = MdocDocument::parse(MDOC);
		assert_that!(&doc.is_anchor(), eq(false));
		assert_that!(&doc.is_montage(), eq(false));

		let doc = MdocDocument::parse(indoc! { r#"
			Montage = 1

			[ZValue = 0]
			TiltAngle = 0.2

			[ZValue = 1]
			TiltAngle = -0.4
		"# });
		assert_that!(&doc.is_anchor(), eq(true));
		assert_that!(&doc.is_montage(), eq(true));
	}


	#[test]
	fn downgrade_date_time() {
		let mut doc = MdocDocument::parse(indoc! { r#"
			[ZValue = 0]
			DateTime = 17-Mar-2024  09:05:01
		"# });
		doc.downgrade_date_time().unwrap();
		assert_that!(&doc.sections[0].get_str(KEY_DATE_TIME), eq(Some("17-Mar-24  09:05:01")));
	}


	#[test]
	fn remove_sections_renumbers() {
		let mut doc = MdocDocument::parse(MDOC);
		doc.remove_sections(&BTreeSet::from([1])).unwrap();
		assert_that!(&doc.tilt_angles().unwrap(), eq(vec![0.003, -2.99]));
		let text = doc.render();
		assert_that!(&text.contains("[ZValue = 1]\nTiltAngle = -2.99"), eq(true));
		assert_that!(&text.contains("[ZValue = 2]"), eq(false));

		assert_that!(&doc.remove_sections(&BTreeSet::from([2])).is_err(), eq(true));
	}


	#[test]
	fn missing_fields() {
		let doc = MdocDocument::parse(indoc! { r#"
			[ZValue = 0]
			TiltAngle = 1
		"# });
		let err = doc.exposure_doses().unwrap_err();
		let err = err.downcast_ref::<EntityError>().unwrap();
		assert_that!(&matches!(err, EntityError::MissingField { field, .. } if field == KEY_EXPOSURE_DOSE), eq(true));
	}


	#[test]
	fn relative_path() {

		let dir = TempDir::new().unwrap();
		fs::create_dir_all(dir.path().join("a/b")).unwrap();
		fs::write(dir.path().join("a/b/c.mrc"), "").unwrap();

		assert_that!(&find_relative_path(dir.path(), r"X:\Y\a\b\c.mrc"), eq(Some(dir.path().join("a/b/c.mrc"))));
		assert_that!(&find_relative_path(dir.path(), "/mnt/acq/a/b/c.mrc"), eq(Some(dir.path().join("a/b/c.mrc"))));
		assert_that!(&find_relative_path(dir.path(), r"X:\Y\a\b\d.mrc"), eq(None));
	}
}
