
// argument lists for the IMOD toolkit
// https://bio3d.colorado.edu/imod/doc/program_listing.html

use std::path::{Path, PathBuf};

use crate::tools::{ToolCommand, Tools};


/// stack the images of several files, in order
pub fn newstack(tools: &Tools, inputs: &[impl AsRef<Path>], output: &Path) -> ToolCommand {
	ToolCommand::new("newstack", tools.imod("newstack"))
		.args(inputs.iter().map(|p| p.as_ref()))
		.arg(output)
		.arg("-quiet")
}


/// sort a stack by tilt angle, rewriting its mdoc alongside
pub fn newstack_reorder(tools: &Tools, input: &Path, output: &Path) -> ToolCommand {
	ToolCommand::new("newstack", tools.imod("newstack"))
		.opt("-reorder", "1")
		.arg("-mdoc")
		.opt("-in", input)
		.opt("-ou", output)
}


/// split a stack into one file per image, named `<prefix>NN.mrc`
pub fn newstack_split(tools: &Tools, input: &Path, prefix: &Path) -> ToolCommand {
	ToolCommand::new("newstack", tools.imod("newstack"))
		.arg("-quiet")
		.opt("-split", "0")
		.opt("-append", "mrc")
		.opt("-in", input)
		.arg(prefix)
}


#[derive(Debug, Clone, PartialEq)]
pub struct NewstackTransform {
	pub input: PathBuf,
	pub output: PathBuf,
	pub xf: PathBuf,
	pub size: (u32, u32),
	pub bin: u32
}

/// apply a linear transform file to every image
pub fn newstack_transform(tools: &Tools, args: &NewstackTransform) -> ToolCommand {
	let cmd = ToolCommand::new("newstack", tools.imod("newstack"))
		.opt("-InputFile", &args.input)
		.opt("-OutputFile", &args.output)
		.opt("-TransformFile", &args.xf)
		.opt("-TaperAtFill", "1,1")
		.arg("-AdjustOrigin")
		.opt("-OffsetsInXandY", "0,0")
		.opt("-ImagesAreBinned", "1")
		.opt("-SizeToOutputInXandY", format!("{},{}", args.size.0, args.size.1))
		.arg("-quiet");
	if args.bin != 1 {
		cmd.opt("-bin", args.bin.to_string())
			.opt("-AntialiasFilter", "-1")
	} else {
		cmd
	}
}


pub fn extracttilts(tools: &Tools, input: &Path, output: &Path) -> ToolCommand {
	ToolCommand::new("extracttilts", tools.imod("extracttilts"))
		.arg(input)
		.arg(output)
}


/// dose weighting, with the doses taken from the mdoc
pub fn mtffilter(tools: &Tools, mdoc: &Path, input: &Path, output: &Path) -> ToolCommand {
	ToolCommand::new("mtffilter", tools.imod("mtffilter"))
		.opt("-dtype", "4")
		.opt("-dfile", mdoc)
		.arg(input)
		.arg(output)
}


/// `views` is IMOD's 1-based list syntax, eg `1,4-6`
pub fn excludeviews(tools: &Tools, views: &str, stack: &Path) -> ToolCommand {
	ToolCommand::new("excludeviews", tools.imod("excludeviews"))
		.opt("-views", views)
		.arg("-delete")
		.arg(stack)
}


pub fn binvol(tools: &Tools, bin: u32, input: &Path, output: &Path) -> ToolCommand {
	ToolCommand::new("binvol", tools.imod("binvol"))
		.opt("-x", bin.to_string())
		.opt("-y", bin.to_string())
		.opt("-z", "1")
		.arg(input)
		.arg(output)
}


/// Weighted back-projection. With `-IMAGEBINNED`, thickness, shift and full image size are unbinned pixels.
#[derive(Debug, Clone, PartialEq)]
pub struct TiltArgs {
	pub input: PathBuf,
	pub output: PathBuf,
	pub tlt: PathBuf,
	pub bin: u32,
	pub sirt: u32,
	pub thickness: u32,
	pub x_axis_tilt: f64,
	pub z_shift: f64,
	/// unbinned x, y
	pub full_image: (u32, u32)
}

pub fn tilt(tools: &Tools, args: &TiltArgs) -> ToolCommand {
	ToolCommand::new("tilt", tools.imod("tilt"))
		.opt_if(args.sirt > 0, "-FakeSIRTiterations", args.sirt.to_string())
		.opt("-InputProjections", &args.input)
		.opt("-OutputFile", &args.output)
		.opt("-IMAGEBINNED", args.bin.to_string())
		.opt("-XAXISTILT", args.x_axis_tilt.to_string())
		.opt("-TILTFILE", &args.tlt)
		.opt("-THICKNESS", args.thickness.to_string())
		.opt("-RADIAL", "0.35,0.035")
		.opt("-FalloffIsTrueSigma", "1")
		.opt("-SCALE", "0.0,0.05")
		.arg("-PERPENDICULAR")
		.opt("-MODE", "2")
		.opt("-FULLIMAGE", format!("{},{}", args.full_image.0, args.full_image.1))
		.opt("-SUBSETSTART", "0,0")
		.arg("-AdjustOrigin")
		.opt("-ActionIfGPUFails", "1,2")
		.opt("-OFFSET", "0.0")
		.opt("-SHIFT", format!("0.0,{}", args.z_shift))
		.opt("-UseGPU", "0")
}


#[derive(Debug, Clone, PartialEq)]
pub struct TrimvolArgs {
	pub input: PathBuf,
	pub output: PathBuf,
	/// binned thickness, used to pick the scaling slab when converting to bytes
	pub thickness: u32,
	pub convert_to_byte: bool
}

/// rotate around X into the usual orientation, optionally scaling to bytes from the central third
pub fn trimvol(tools: &Tools, args: &TrimvolArgs) -> ToolCommand {
	let cmd = ToolCommand::new("trimvol", tools.imod("trimvol"));
	let cmd = if args.convert_to_byte {
		let t = args.thickness as f64;
		cmd.opt("-sz", format!("{},{}", (t/3.0).round(), (t*2.0/3.0).round()))
			.arg("-f")
	} else {
		cmd
	};
	cmd.arg("-rx")
		.arg(&args.input)
		.arg(&args.output)
}


/// the parameters come from the etomo source code
pub fn findsection(tools: &Tools, tomo: &Path, pitch_mod: &Path) -> ToolCommand {
	ToolCommand::new("findsection", tools.imod("findsection"))
		.opt("-tomo", tomo)
		.opt("-pitch", pitch_mod)
		.opt("-scales", "2")
		.opt("-size", "16,1,16")
		.opt("-samples", "5")
		.opt("-block", "48")
}


pub fn tomopitch(tools: &Tools, pitch_mod: &Path, extra_thickness: u32, scale: u32) -> ToolCommand {
	ToolCommand::new("tomopitch", tools.imod("tomopitch"))
		.opt("-mod", pitch_mod)
		.opt("-extra", extra_thickness.to_string())
		.opt("-scale", scale.to_string())
}


#[derive(Debug, Clone, PartialEq)]
pub struct CtfplotterArgs {
	pub stack: PathBuf,
	pub tlt: PathBuf,
	pub defocus: PathBuf,
	pub pixel_size_nm: f64,
	pub voltage_kv: f64,
	pub cs_mm: f64,
	pub amplitude_contrast: f64,
	pub axis_angle: f64,
	/// nm, underfocus positive
	pub expected_defocus: f64
}

pub fn ctfplotter(tools: &Tools, args: &CtfplotterArgs) -> ToolCommand {
	ToolCommand::new("ctfplotter", tools.imod("ctfplotter"))
		.opt("-InputStack", &args.stack)
		.opt("-angleFn", &args.tlt)
		.opt("-defFn", &args.defocus)
		.opt("-pixelSize", args.pixel_size_nm.to_string())
		.opt("-crop", "0.3")
		.opt("-volt", args.voltage_kv.to_string())
		.opt("-cs", args.cs_mm.to_string())
		.opt("-am", args.amplitude_contrast.to_string())
		.opt("-degPhase", "0")
		.opt("-AxisAngle", args.axis_angle.to_string())
		.opt("-expDef", args.expected_defocus.to_string())
		.opt("-autoFit", "3,1")
}


/// CTF-corrected reconstruction setup, writes the chunked command files for processchunks
#[derive(Debug, Clone, PartialEq)]
pub struct Ctf3dArgs {
	pub input: PathBuf,
	pub output: PathBuf,
	pub tlt: PathBuf,
	pub defocus: PathBuf,
	pub root: String,
	pub pixel_size_nm: f64,
	pub voltage_kv: f64,
	pub cs_mm: f64,
	pub amplitude_contrast: f64,
	pub thickness: u32,
	pub x_axis_tilt: f64,
	pub z_shift: f64,
	pub bin: u32,
	pub full_image: (u32, u32)
}

pub fn ctf3dsetup(tools: &Tools, args: &Ctf3dArgs) -> ToolCommand {
	ToolCommand::new("ctf3dsetup", tools.imod("ctf3dsetup"))
		.opt("-input", &args.input)
		.opt("-output", &args.output)
		.opt("-RootNameOfDataFiles", &args.root)
		.opt("-TILTFILE", &args.tlt)
		.opt("-DefocusFile", &args.defocus)
		.opt("-PixelSize", args.pixel_size_nm.to_string())
		.opt("-Voltage", args.voltage_kv.to_string())
		.opt("-SphericalAberration", args.cs_mm.to_string())
		.opt("-AmplitudeContrast", args.amplitude_contrast.to_string())
		.opt("-THICKNESS", args.thickness.to_string())
		.opt("-XAXISTILT", args.x_axis_tilt.to_string())
		.opt("-SHIFT", format!("0.0,{}", args.z_shift))
		.opt("-IMAGEBINNED", args.bin.to_string())
		.opt("-FULLIMAGE", format!("{},{}", args.full_image.0, args.full_image.1))
		.opt("-RADIAL", "0.35,0.035")
		.opt("-FalloffIsTrueSigma", "1")
		.opt("-SCALE", "0.0,0.05")
		.arg("-PERPENDICULAR")
		.opt("-MODE", "2")
		.opt("-SUBSETSTART", "0,0")
		.arg("-AdjustOrigin")
		.opt("-ActionIfGPUFails", "1,2")
		.opt("-OFFSET", "0.0")
}


pub fn processchunks(tools: &Tools, cpus: u32, root: &str, dir: &Path) -> ToolCommand {
	ToolCommand::new("processchunks", tools.imod("processchunks"))
		.arg(cpus.to_string())
		.arg(root)
		.cwd(dir)
}


pub fn dm2mrc(tools: &Tools, input: &Path, output: &Path) -> ToolCommand {
	ToolCommand::new("dm2mrc", tools.imod("dm2mrc"))
		.arg(input)
		.arg(output)
}


/// turns SerialEM's defect list into a defect map the size of `template`
pub fn clip_defect(tools: &Tools, defects: &Path, template: &Path, output: &Path) -> ToolCommand {
	ToolCommand::new("clip", tools.imod("clip"))
		.arg("defect")
		.opt("-D", defects)
		.arg(template)
		.arg(output)
}


#[cfg(test)]
mod test {

	use std::ffi::OsStr;

	use galvanic_assert::{assert_that, matchers::*};

	use crate::config::Config;

	use super::*;


	#[test]
	fn imod_dir() {
		let mut config = Config::default();
		config.tools.imod_dir = Some(PathBuf::from("/opt/imod/bin"));
		let tools = Tools::system(config);
		let cmd = binvol(&tools, 8, Path::new("a.mrc"), Path::new("b.mrc"));
		assert_that!(&cmd.program, eq(PathBuf::from("/opt/imod/bin/binvol")));
		let text = cmd.command_line();
		assert_that!(&text.as_str(), eq("/opt/imod/bin/binvol -x 8 -y 8 -z 1 a.mrc b.mrc"));
	}


	#[test]
	fn tilt_without_sirt() {
		let tools = Tools::system(Config::default());
		let cmd = tilt(&tools, &TiltArgs {
			input: "ali.mrc".into(),
			output: "rec.mrc".into(),
			tlt: "ali.tlt".into(),
			bin: 4,
			sirt: 0,
			thickness: 1200,
			x_axis_tilt: 1.5,
			z_shift: -20.0,
			full_image: (4096, 4096)
		});
		assert_that!(&cmd.has_flag("-FakeSIRTiterations"), eq(false));
		assert_that!(&cmd.value_of("-SHIFT"), eq(Some(OsStr::new("0.0,-20"))));
		assert_that!(&cmd.value_of("-FULLIMAGE"), eq(Some(OsStr::new("4096,4096"))));
		assert_that!(&cmd.value_of("-IMAGEBINNED"), eq(Some(OsStr::new("4"))));
	}


	#[test]
	fn trimvol_scaling() {
		let tools = Tools::system(Config::default());
		let args = TrimvolArgs {
			input: "full.mrc".into(),
			output: "rec.mrc".into(),
			thickness: 300,
			convert_to_byte: true
		};
		let cmd = trimvol(&tools, &args);
		let text = cmd.command_line();
		assert_that!(&text.as_str(), eq("trimvol -sz 100,200 -f -rx full.mrc rec.mrc"));

		let cmd = trimvol(&tools, &TrimvolArgs { convert_to_byte: false, ..args });
		let text = cmd.command_line();
		assert_that!(&text.as_str(), eq("trimvol -rx full.mrc rec.mrc"));
	}
}
