
use std::path::PathBuf;

use anyhow::Result;

use crate::tools::{ToolCommand, Tools};


/// what AreTomo should do with the stack
#[derive(Debug, Clone, PartialEq)]
pub enum AreTomoMode {

	/// find a new alignment
	Align {
		/// in unbinned pixels
		align_z: u32,
		/// the pretilt correction in degrees, the negated start tilt
		pretilt: i32,
		/// local patches in x and y, for local alignment
		patch: Option<(u32, u32)>,
		gpus: Vec<u32>
	},

	/// apply an existing `.aln` file
	Apply {
		aln: PathBuf
	},

	/// apply an existing `.aln` and also write the IMOD-style alignment files
	ExportImod {
		aln: PathBuf
	}
}


#[derive(Debug, Clone, PartialEq)]
pub struct AreTomoArgs {
	pub input: PathBuf,
	pub output: PathBuf,
	/// the raw tilt angles, not needed for exports
	pub angles: Option<PathBuf>,
	pub mode: AreTomoMode
}


pub fn aretomo(tools: &Tools, args: &AreTomoArgs) -> Result<ToolCommand> {

	let mut cmd = ToolCommand::new("AreTomo", tools.aretomo_exe()?)
		.opt("-InMrc", &args.input)
		.opt("-OutMrc", &args.output);
	if let Some(angles) = &args.angles {
		cmd = cmd.opt("-AngFile", angles);
	}

	let cmd = match &args.mode {

		AreTomoMode::Align { align_z, pretilt, patch, gpus } => {
			let mut cmd = cmd
				.opt("-VolZ", "0")
				.arg("-TiltCor")
				.args(["0".to_string(), pretilt.to_string()])
				.opt("-AlignZ", align_z.to_string());
			if !gpus.is_empty() {
				cmd = cmd.arg("-Gpu")
					.args(gpus.iter().map(|g| g.to_string()));
			}
			if let Some((x, y)) = patch {
				cmd = cmd.arg("-Patch")
					.args([x.to_string(), y.to_string()]);
			}
			cmd
		}

		AreTomoMode::Apply { aln } => cmd
			.opt("-AlnFile", aln)
			.opt("-VolZ", "0"),

		AreTomoMode::ExportImod { aln } => cmd
			.opt("-AlnFile", aln)
			.opt("-TiltCor", "0")
			.opt("-VolZ", "0")
			.opt("-OutImod", "2")
	};

	Ok(cmd)
}
