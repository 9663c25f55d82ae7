
// the external binaries that do the heavy lifting, and the seam used to invoke them

pub mod imod;
pub mod aretomo;
pub mod motioncor;


use std::env;
use std::ffi::{OsStr, OsString};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::rc::Rc;

use anyhow::{Context, Result};
use tracing::{debug, trace};

use crate::config::Config;
use crate::error::{EntityError, ToolError};


pub const ENV_MOTIONCOR: &'static str = "MOTIONCOR_EXECUTABLE";
pub const ENV_ARETOMO: &'static str = "ARETOMO_EXECUTABLE";


/// One invocation of an external tool: the exact argument list is the contract with that tool
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCommand {
	/// short name for logs and errors, eg `newstack`
	pub tool: String,
	pub program: PathBuf,
	pub args: Vec<OsString>,
	pub cwd: Option<PathBuf>,
	/// append the tool's output to this file
	pub log_to: Option<PathBuf>
}

impl ToolCommand {

	pub fn new(tool: impl Into<String>, program: impl Into<PathBuf>) -> Self {
		Self {
			tool: tool.into(),
			program: program.into(),
			args: Vec::new(),
			cwd: None,
			log_to: None
		}
	}

	pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
		self.args.push(arg.as_ref().to_owned());
		self
	}

	pub fn args<I,S>(mut self, args: I) -> Self
		where
			I: IntoIterator<Item=S>,
			S: AsRef<OsStr>
	{
		for arg in args {
			self.args.push(arg.as_ref().to_owned());
		}
		self
	}

	/// a flag followed by its value
	pub fn opt(self, flag: &str, value: impl AsRef<OsStr>) -> Self {
		self.arg(flag)
			.arg(value)
	}

	pub fn opt_if(self, cond: bool, flag: &str, value: impl AsRef<OsStr>) -> Self {
		if cond {
			self.opt(flag, value)
		} else {
			self
		}
	}

	pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
		self.cwd = Some(dir.into());
		self
	}

	pub fn log_to(mut self, path: impl Into<PathBuf>) -> Self {
		self.log_to = Some(path.into());
		self
	}

	pub fn has_flag(&self, flag: &str) -> bool {
		self.args.iter()
			.any(|a| a == flag)
	}

	/// the argument right after the flag, if any
	pub fn value_of(&self, flag: &str) -> Option<&OsStr> {
		let i = self.args.iter()
			.position(|a| a == flag)?;
		self.args.get(i + 1)
			.map(|a| a.as_os_str())
	}

	/// the arguments after the flag, up to the next one that starts with `-` and isn't a number
	pub fn values_of(&self, flag: &str) -> Vec<&OsStr> {
		let Some(i) = self.args.iter().position(|a| a == flag) else {
			return Vec::new();
		};
		self.args[i + 1 ..].iter()
			.take_while(|a| {
				let s = a.to_string_lossy();
				!s.starts_with('-') || s.parse::<f64>().is_ok()
			})
			.map(|a| a.as_os_str())
			.collect()
	}

	pub fn command_line(&self) -> String {
		let mut out = self.program.to_string_lossy().to_string();
		for arg in &self.args {
			out.push(' ');
			out.push_str(&arg.to_string_lossy());
		}
		out
	}
}


#[derive(Debug, Clone, PartialEq, Default)]
pub struct ToolOutput {
	pub code: Option<i32>,
	pub stdout: String,
	pub stderr: String
}

impl ToolOutput {

	pub fn success(&self) -> bool {
		self.code == Some(0)
	}

	pub fn check(self, tool: &str) -> Result<Self,ToolError> {
		if self.success() {
			Ok(self)
		} else {
			Err(ToolError::Failed {
				tool: tool.to_string(),
				code: self.code,
				stderr: self.stderr.trim().to_string()
			})
		}
	}
}


pub trait Runner {
	fn run(&self, cmd: &ToolCommand) -> Result<ToolOutput>;
}


/// runs tools as child processes, blocking until they finish
pub struct SystemRunner;

impl Runner for SystemRunner {

	fn run(&self, cmd: &ToolCommand) -> Result<ToolOutput> {

		let mut command = Command::new(&cmd.program);
		command.args(&cmd.args)
			.stdin(Stdio::null())
			.stdout(Stdio::piped())
			.stderr(Stdio::piped());
		if let Some(cwd) = &cmd.cwd {
			command.current_dir(cwd);
		}

		let output = command.output()
			.map_err(|e| ToolError::Spawn {
				tool: cmd.tool.clone(),
				source: e
			})?;

		let out = ToolOutput {
			code: output.status.code(),
			stdout: String::from_utf8_lossy(&output.stdout).to_string(),
			stderr: String::from_utf8_lossy(&output.stderr).to_string()
		};

		if let Some(log) = &cmd.log_to {
			let mut file = OpenOptions::new()
				.create(true)
				.append(true)
				.open(log)
				.context(format!("Failed to open log file: {}", log.to_string_lossy()))?;
			file.write_all(out.stdout.as_bytes())?;
			file.write_all(out.stderr.as_bytes())?;
		}

		Ok(out)
	}
}


/// Everything a pipeline stage needs to invoke external tools
#[derive(Clone)]
pub struct Tools {
	runner: Rc<dyn Runner>,
	config: Config
}

impl Tools {

	pub fn new(runner: Rc<dyn Runner>, config: Config) -> Self {
		Self {
			runner,
			config
		}
	}

	pub fn system(config: Config) -> Self {
		Self::new(Rc::new(SystemRunner), config)
	}

	pub fn config(&self) -> &Config {
		&self.config
	}

	/// runs the command, without looking at the exit status
	pub fn run(&self, cmd: &ToolCommand) -> Result<ToolOutput> {
		debug!("Running: {}", cmd.command_line());
		if let Some(cwd) = &cmd.cwd {
			trace!("\tin: {}", cwd.to_string_lossy());
		}
		let out = self.runner.run(cmd)?;
		trace!("{} exited with {:?}", cmd.tool, out.code);
		Ok(out)
	}

	/// runs the command, and fails if the tool did
	pub fn run_checked(&self, cmd: &ToolCommand) -> Result<ToolOutput> {
		let out = self.run(cmd)?
			.check(&cmd.tool)?;
		Ok(out)
	}

	/// the IMOD binary of that name, from the configured IMOD directory or the PATH
	pub fn imod(&self, name: &str) -> PathBuf {
		match &self.config.tools.imod_dir {
			Some(dir) => dir.join(name),
			None => PathBuf::from(name)
		}
	}

	pub fn motioncor_exe(&self) -> Result<PathBuf> {
		resolve_executable("MotionCor", ENV_MOTIONCOR, self.config.tools.motioncor.as_deref(), &["MotionCor3", "MotionCor2"])
	}

	pub fn aretomo_exe(&self) -> Result<PathBuf> {
		resolve_executable("AreTomo", ENV_ARETOMO, self.config.tools.aretomo.as_deref(), &["AreTomo"])
	}

	/// the explicit GPU list, or every GPU nvidia-smi knows about
	pub fn gpus(&self, gpus: Option<&str>) -> Result<Vec<u32>> {

		if let Some(gpus) = gpus {
			return gpus.split(',')
				.map(|g| g.trim().parse::<u32>()
					.context(format!("Invalid GPU id: {}", g))
				)
				.collect();
		}

		let cmd = ToolCommand::new("nvidia-smi", "nvidia-smi")
			.args(["--query-gpu=name", "--format=csv,noheader"]);
		let out = self.run(&cmd)?;
		if !out.success() {
			return Ok(Vec::new());
		}
		let count = out.stdout.lines()
			.filter(|l| !l.trim().is_empty())
			.count();
		Ok((0 .. count as u32).collect())
	}
}


/// environment variable first, then the config file, then the PATH
fn resolve_executable(tool: &str, env_var: &str, configured: Option<&Path>, names: &[&str]) -> Result<PathBuf> {

	if let Ok(path) = env::var(env_var) {
		let path = PathBuf::from(path);
		if !path.is_file() {
			return Err(EntityError::FileNotFound(path))
				.context(format!("{} is set, but the file is missing", env_var));
		}
		return Ok(path);
	}

	if let Some(path) = configured {
		if !path.is_file() {
			return Err(EntityError::FileNotFound(path.to_path_buf()))
				.context(format!("The configured {} executable is missing", tool));
		}
		return Ok(path.to_path_buf());
	}

	names.iter()
		.find_map(|name| which::which(name).ok())
		.ok_or_else(|| ToolError::NotFound {
			tool: tool.to_string()
		}.into())
}
