
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use toml::{Table, Value};
use tracing::debug;


pub const DEFAULT_PATH: &'static str = "./tomotools.toml";


/// Config is the contents of tomotools.toml
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Config {
	pub tools: ConfigTools,
	pub microscope: ConfigMicroscope,
	pub reconstruction: ConfigReconstruction
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ConfigTools {
	pub motioncor: Option<PathBuf>,
	pub aretomo: Option<PathBuf>,
	pub imod_dir: Option<PathBuf>
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConfigMicroscope {
	pub voltage_kv: f64,
	pub cs_mm: f64,
	pub amplitude_contrast: f64
}

impl Default for ConfigMicroscope {
	fn default() -> Self {
		Self {
			voltage_kv: 300.0,
			cs_mm: 2.7,
			amplitude_contrast: 0.07
		}
	}
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConfigReconstruction {
	pub sirt: u32,
	pub pitch_binning: u32,
	pub pitch_thickness_angstrom: f64,
	pub default_thickness_angstrom: f64
}

impl Default for ConfigReconstruction {
	fn default() -> Self {
		Self {
			sirt: 5,
			pitch_binning: 8,
			pitch_thickness_angstrom: 10000.0,
			default_thickness_angstrom: 6000.0
		}
	}
}


impl Config {

	/// reads the config file, if there is one, otherwise returns the defaults
	pub fn read(path: impl AsRef<Path>) -> Result<Self> {

		let path = path.as_ref();
		let exists = path.try_exists()
			.with_context(|| format!("Failed to check for existence of config file at: {}", path.to_string_lossy()))?;
		if !exists {
			debug!("No config file at {}, using defaults", path.to_string_lossy());
			return Ok(Self::default());
		}

		let toml = fs::read_to_string(path)
			.with_context(|| format!("Failed to read config file at: {}", path.to_string_lossy()))?;
		Self::parse(&toml)
			.with_context(|| format!("Failed to parse config file at: {}", path.to_string_lossy()))
	}

	pub fn parse(toml: &str) -> Result<Self> {

		let toml = toml.parse::<Table>()
			.context("Invalid TOML")?;

		let mut config = Self::default();

		if let Some(toml_tools) = table(&toml, "tools")? {
			config.tools.motioncor = get_str(toml_tools, "tools", "motioncor")?.map(PathBuf::from);
			config.tools.aretomo = get_str(toml_tools, "tools", "aretomo")?.map(PathBuf::from);
			config.tools.imod_dir = get_str(toml_tools, "tools", "imod_dir")?.map(PathBuf::from);
		}

		if let Some(toml_microscope) = table(&toml, "microscope")? {
			let m = &mut config.microscope;
			if let Some(v) = get_f64(toml_microscope, "microscope", "voltage_kv")? {
				m.voltage_kv = v;
			}
			if let Some(v) = get_f64(toml_microscope, "microscope", "cs_mm")? {
				m.cs_mm = v;
			}
			if let Some(v) = get_f64(toml_microscope, "microscope", "amplitude_contrast")? {
				m.amplitude_contrast = v;
			}
		}

		if let Some(toml_rec) = table(&toml, "reconstruction")? {
			let r = &mut config.reconstruction;
			if let Some(v) = get_u32(toml_rec, "reconstruction", "sirt")? {
				r.sirt = v;
			}
			if let Some(v) = get_u32(toml_rec, "reconstruction", "pitch_binning")? {
				r.pitch_binning = v;
			}
			if let Some(v) = get_f64(toml_rec, "reconstruction", "pitch_thickness_angstrom")? {
				r.pitch_thickness_angstrom = v;
			}
			if let Some(v) = get_f64(toml_rec, "reconstruction", "default_thickness_angstrom")? {
				r.default_thickness_angstrom = v;
			}
		}

		Ok(config)
	}
}


fn table<'a>(toml: &'a Table, name: &str) -> Result<Option<&'a Table>> {
	toml.get(name)
		.map(|v| v.as_table()
			.with_context(|| format!("{} key is not a table", name))
		)
		.transpose()
}


fn get_str<'a>(toml: &'a Table, section: &str, key: &str) -> Result<Option<&'a str>> {
	toml.get(key)
		.map(|v| v.as_str()
			.with_context(|| format!("{}.{} was not a string", section, key))
		)
		.transpose()
}


fn get_f64(toml: &Table, section: &str, key: &str) -> Result<Option<f64>> {
	toml.get(key)
		.map(|v| match v {
			Value::Float(f) => Ok(*f),
			Value::Integer(i) => Ok(*i as f64),
			_ => anyhow::bail!("{}.{} was not a number", section, key)
		})
		.transpose()
}


fn get_u32(toml: &Table, section: &str, key: &str) -> Result<Option<u32>> {
	toml.get(key)
		.map(|v| v.as_integer()
			.and_then(|i| u32::try_from(i).ok())
			.with_context(|| format!("{}.{} was not a non-negative integer", section, key))
		)
		.transpose()
}
