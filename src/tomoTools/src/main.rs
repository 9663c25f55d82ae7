
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{bail, Result};
use gumdrop::{Options, ParsingStyle};
use tracing::debug;

use tomo_tools::commands;
use tomo_tools::config::Config;
use tomo_tools::logging::{self, ResultExt};
use tomo_tools::tools::Tools;


#[derive(Options)]
struct Args {

	#[options(help_flag)]
	help: bool,

	/// log filter, eg `tomo_tools=debug`
	log: Option<String>,

	/// path to the config file
	#[options(default = "./tomotools.toml", parse(try_from_str))]
	config: PathBuf,

	#[options(command)]
	cmd: Option<Command>
}

#[derive(Options)]
enum Command {

	/// Motion-correct and stack acquired tilt series
	Prepare(commands::prepare::Args),

	/// Align, dose filter, and reconstruct tilt series
	Reconstruct(commands::reconstruct::Args),

	/// Wiener-deconvolve tomograms
	Deconv(commands::deconv::Args)
}


fn main() -> ExitCode {

	let args = Args::parse_args_or_exit(ParsingStyle::AllOptions);

	let filter = args.log.as_deref()
		.unwrap_or(logging::DEFAULT_FILTER);
	let Ok(_) = logging::init(filter)
		.log_err()
		else { return ExitCode::FAILURE; };

	match run(args).log_err() {
		Ok(()) => ExitCode::SUCCESS,
		Err(()) => ExitCode::FAILURE
	}
}


#[tracing::instrument(skip_all, level = 5, name = "TomoTools")]
fn run(args: Args) -> Result<()> {

	let config = Config::read(&args.config)?;
	debug!("Config: {:?}", config);
	let tools = Tools::system(config);

	match args.cmd {
		Some(Command::Prepare(prepare_args)) => commands::prepare::run(&tools, prepare_args),
		Some(Command::Reconstruct(reconstruct_args)) => commands::reconstruct::run(&tools, reconstruct_args),
		Some(Command::Deconv(deconv_args)) => commands::deconv::run(deconv_args),
		_ => bail!("No command, try one of:\n{}", Args::command_list().unwrap_or_default())
	}
}
