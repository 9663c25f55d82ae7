
#![allow(dead_code)]

use std::cell::RefCell;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use anyhow::Result;

use tomo_tools::config::Config;
use tomo_tools::mrc::{self, MrcHeader};
use tomo_tools::tools::{Runner, ToolCommand, ToolOutput, Tools};


pub const ANGPIX: f64 = 2.0;
pub const SIZE: usize = 8;


pub const TOMOPITCH: &str = "\
Unrotated and rotated thicknesses
  Pitch-based adjustments
 Set X axis tilt in tilt.com to 1.80
 Total thickness needed to contain the sample 400
 Set Z shift in tilt.com to -12.5;  set THICKNESS to 420
";


type Handler = Box<dyn Fn(&ToolCommand) -> ToolOutput>;


/// Records every command, and makes the files the real tool would have made
pub struct FakeRunner {
	calls: RefCell<Vec<ToolCommand>>,
	handler: Handler
}

impl FakeRunner {

	pub fn new() -> Rc<Self> {
		Self::with_handler(simulate)
	}

	pub fn with_handler(handler: impl Fn(&ToolCommand) -> ToolOutput + 'static) -> Rc<Self> {
		Rc::new(Self {
			calls: RefCell::new(Vec::new()),
			handler: Box::new(handler)
		})
	}

	pub fn calls(&self) -> Vec<ToolCommand> {
		self.calls.borrow().clone()
	}

	/// the names of the tools that ran, in order
	pub fn tools(&self) -> Vec<String> {
		self.calls.borrow()
			.iter()
			.map(|c| c.tool.clone())
			.collect()
	}
}

impl Runner for FakeRunner {

	fn run(&self, cmd: &ToolCommand) -> Result<ToolOutput> {
		self.calls.borrow_mut().push(cmd.clone());
		Ok((self.handler)(cmd))
	}
}


/// tools backed by the runner, with a placeholder AreTomo executable in the folder
pub fn tools(dir: &Path, runner: &Rc<FakeRunner>) -> Tools {
	let aretomo = dir.join("AreTomo");
	fs::write(&aretomo, "").unwrap();
	let mut config = Config::default();
	config.tools.aretomo = Some(aretomo);
	Tools::new(runner.clone(), config)
}


pub fn ok() -> ToolOutput {
	ToolOutput {
		code: Some(0),
		..Default::default()
	}
}


pub fn failed(stderr: &str) -> ToolOutput {
	ToolOutput {
		code: Some(1),
		stderr: stderr.to_string(),
		..Default::default()
	}
}


fn path_of(cmd: &ToolCommand, flag: &str) -> Option<PathBuf> {
	cmd.value_of(flag)
		.map(PathBuf::from)
}


/// the last argument, which is the output for most IMOD tools
fn last_arg(cmd: &ToolCommand) -> Option<PathBuf> {
	cmd.args.last()
		.map(PathBuf::from)
}


fn blank(path: &Path, nz: usize) {
	mrc::write_blank(path, SIZE, SIZE, nz, ANGPIX).unwrap();
}


/// Outputs of the tools at the names the pipeline expects
pub fn simulate(cmd: &ToolCommand) -> ToolOutput {

	match cmd.tool.as_str() {

		"newstack" => {
			let output = path_of(cmd, "-ou")
				.or_else(|| path_of(cmd, "-OutputFile"))
				.or_else(|| cmd.args.iter().rev().nth(1).map(PathBuf::from));
			if cmd.has_flag("-split") {
				// one file per image, numbered from zero
				if let (Some(input), Some(prefix)) = (path_of(cmd, "-in"), last_arg(cmd)) {
					let [nz, _, _] = MrcHeader::read(&input).unwrap().dim_zyx();
					for i in 0 .. nz {
						blank(&PathBuf::from(format!("{}{:02}.mrc", prefix.to_string_lossy(), i)), 1);
					}
				}
			} else if let Some(output) = output {
				blank(&output, 1);
			}
			ok()
		}

		"extracttilts" => {
			if let Some(output) = last_arg(cmd) {
				fs::write(output, "-3.00\n0.00\n3.00\n").unwrap();
			}
			ok()
		}

		"mtffilter" | "binvol" | "trimvol" => {
			if let Some(output) = last_arg(cmd) {
				blank(&output, 1);
			}
			ok()
		}

		"tilt" => {
			if let Some(output) = path_of(cmd, "-OutputFile") {
				blank(&output, 4);
			}
			ok()
		}

		"excludeviews" => {
			// the views go into a file of their own, the mdoc is left alone
			if let Some(stack) = last_arg(cmd) {
				let name = stack.file_stem().unwrap().to_string_lossy().to_string();
				blank(&stack.with_file_name(format!("{}_cutviews0.mrc", name)), 1);
			}
			ok()
		}

		"ctf3dsetup" => {
			// the chunks' output, and the command file processchunks would run
			if let Some(output) = path_of(cmd, "-output") {
				blank(&output, 4);
			}
			if let (Some(dir), Some(root)) = (&cmd.cwd, cmd.value_of("-RootNameOfDataFiles")) {
				let sync = dir.join(format!("{}-001-sync.com", root.to_string_lossy()));
				fs::write(sync, "$sync -StandardInput\nDoseWeightingFile\tstack.mdoc\n").unwrap();
			}
			ok()
		}

		"findsection" => {
			if let Some(model) = path_of(cmd, "-pitch") {
				fs::write(model, "model").unwrap();
			}
			ok()
		}

		"tomopitch" => ToolOutput {
			code: Some(0),
			stdout: TOMOPITCH.to_string(),
			..Default::default()
		},

		"AreTomo" => {
			if let Some(output) = path_of(cmd, "-OutMrc") {
				blank(&output, 3);
				let name = output.file_stem().unwrap().to_string_lossy().to_string();
				fs::write(output.with_file_name(format!("{}.tlt", name)), "-3.01\n0.02\n2.98\n").unwrap();
				if cmd.has_flag("-OutImod") {
					let export_dir = output.with_file_name(format!("{}_Imod", name));
					fs::create_dir_all(&export_dir).unwrap();
					blank(&export_dir.join(format!("{}.st", name)), 2);
				}
				if let Some(input) = path_of(cmd, "-InMrc") {
					let aln = input.with_extension("aln");
					if !aln.exists() {
						fs::write(aln, "# AreTomo Alignment / Priims bprmMn \n").unwrap();
					}
				}
			}
			ok()
		}

		_ => ok()
	}
}


/// SerialEM-style mdoc for a stack, one section per tilt
pub fn mdoc_text(tilts: &[f64], dose: f64) -> String {

	let mut out = format!("PixelSpacing = {:?}\nImageSize = {} {}\nDataMode = 1\n", ANGPIX, SIZE, SIZE);
	out.push_str("\n[T = SerialEM: Digitized on Krios]\n");
	for (i, tilt) in tilts.iter().enumerate() {
		out.push_str(&format!("\n[ZValue = {}]\n", i));
		out.push_str(&format!("TiltAngle = {:?}\n", tilt));
		out.push_str(&format!("ExposureDose = {:?}\n", dose));
		out.push_str(&format!("PixelSpacing = {:?}\n", ANGPIX));
		out.push_str(&format!("DateTime = 05-Jan-23  14:{:02}:00\n", i));
	}
	out
}


/// a stack at `dir/name` with its mdoc beside it
pub fn write_stack(dir: &Path, name: &str, tilts: &[f64], dose: f64) -> PathBuf {
	let path = dir.join(name);
	blank(&path, tilts.len());
	fs::write(dir.join(format!("{}.mdoc", name)), mdoc_text(tilts, dose)).unwrap();
	path
}
