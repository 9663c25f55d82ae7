
use std::path::{Path, PathBuf};

use anyhow::Result;

use crate::tools::{ToolCommand, Tools};


/// the options shared by every movie of one motion correction run
#[derive(Debug, Clone, PartialEq)]
pub struct MotionCorArgs {
	pub output_dir: PathBuf,
	pub binning: u32,
	pub gpus: Vec<u32>,
	pub split_sum: bool,
	pub gain: Option<PathBuf>,
	/// MotionCor's -RotGain and -FlipGain
	pub rot_flip: Option<(u32, u32)>,
	pub defect_map: Option<PathBuf>,
	pub group: u32,
	/// local patches in x and y
	pub patch: Option<(u32, u32)>
}


#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MovieFormat {
	Mrc,
	Tiff
}


/// one invocation per movie, running in `workdir`
pub fn motioncor(tools: &Tools, args: &MotionCorArgs, movie: &Path, format: MovieFormat, workdir: &Path) -> Result<ToolCommand> {

	// MotionCor treats -OutMrc as a prefix, so a directory needs its trailing separator
	let mut out_dir = args.output_dir.as_os_str().to_owned();
	out_dir.push(std::path::MAIN_SEPARATOR_STR);

	let mut cmd = ToolCommand::new("MotionCor", tools.motioncor_exe()?)
		.opt("-OutMrc", out_dir)
		.opt("-FtBin", args.binning.to_string());

	if !args.gpus.is_empty() {
		cmd = cmd.arg("-Gpu")
			.args(args.gpus.iter().map(|g| g.to_string()));
	}
	if args.split_sum {
		cmd = cmd.opt("-SplitSum", "1");
	}
	if let Some(gain) = &args.gain {
		cmd = cmd.opt("-Gain", gain);
	}
	if let Some((rot, flip)) = args.rot_flip {
		cmd = cmd.opt("-RotGain", rot.to_string())
			.opt("-FlipGain", flip.to_string());
	}
	if let Some(defects) = &args.defect_map {
		cmd = cmd.opt("-DefectMap", defects);
	}

	// patch alignment takes two groupings, for the global and local alignments
	cmd = match args.patch {
		Some((x, y)) => cmd
			.arg("-Patch")
			.args([x.to_string(), y.to_string()])
			.opt("-Group", format!("{} {}", args.group, 4*args.group)),
		None => cmd.opt("-Group", args.group.to_string())
	};

	let cmd = match format {
		MovieFormat::Mrc => cmd.opt("-InMrc", movie),
		MovieFormat::Tiff => cmd.opt("-InTiff", movie)
	};

	Ok(cmd.cwd(workdir)
		.log_to(args.output_dir.join("motioncor.log")))
}
