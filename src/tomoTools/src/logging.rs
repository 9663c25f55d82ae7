
use std::ops::Deref;

use anyhow::{Context, Result};
use display_error_chain::ErrorChainExt;
use time::format_description::FormatItem;
use time::macros::format_description;
use time::UtcOffset;
use tracing::{error, warn, Level};
use tracing::dispatcher::DefaultGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::SubscriberBuilder;
use tracing_subscriber::fmt::format::{DefaultFields, Format, Full};
use tracing_subscriber::fmt::time::OffsetTime;


/// the log filter used when the command line doesn't pick one
pub const DEFAULT_FILTER: &'static str = "tomo_tools=info";

/// tests see everything the pipeline says about each item
const TEST_FILTER: &'static str = "tomo_tools=trace";


type LocalTimer = OffsetTime<&'static [FormatItem<'static>]>;
type Builder = SubscriberBuilder<DefaultFields,Format<Full,LocalTimer>>;


/// Installs the process-wide subscriber, filtered by an `EnvFilter` directive like `tomo_tools=debug`
pub fn init(filter: impl AsRef<str>) -> Result<()> {

	let filter = filter.as_ref();
	let filter = EnvFilter::try_new(filter)
		.context(format!("Bad log filter: {}", filter))?;

	let subscriber = builder()
		.with_env_filter(filter)
		.finish();
	tracing::subscriber::set_global_default(subscriber)
		.context("Logging was already initialized")
}


/// Logging for tests: scoped to the current thread and routed through the test harness' capture,
/// so the pipeline's per-item progress shows up next to a failing assertion.
pub fn init_test() -> DefaultGuard {
	let subscriber = builder()
		.with_env_filter(EnvFilter::new(TEST_FILTER))
		.with_test_writer()
		.finish();
	tracing::subscriber::set_default(subscriber)
}


/// timestamps in local time to the tenth of a millisecond, no module paths
fn builder() -> Builder {

	let format = format_description!(
		version = 2,
		"[year]-[month]-[day] [hour]:[minute]:[second].[subsecond digits:4] [offset_hour sign:mandatory]:[offset_minute]"
	);

	// the local offset can't be read once threads are running, so fall back to UTC
	let offset = UtcOffset::current_local_offset()
		.unwrap_or(UtcOffset::UTC);

	tracing_subscriber::fmt()
		.with_timer(OffsetTime::new(offset, format))
		.with_target(false)
}


fn report(e: anyhow::Error, level: Level) {
	let err = e.deref();
	let chain = err.chain();
	if level == Level::WARN {
		warn!("{}", chain);
	} else {
		error!("{}", chain);
	}
}


pub trait ResultExt<T> {

	/// logs the whole error chain at error level, for failures that end the command
	fn log_err(self) -> Result<T,()>;

	/// logs the whole error chain at warn level, for failures that only skip one item of a batch
	fn warn_err(self) -> Result<T,()>;
}

impl<T> ResultExt<T> for Result<T,anyhow::Error> {

	fn log_err(self) -> Result<T,()> {
		self.map_err(|e| report(e, Level::ERROR))
	}

	fn warn_err(self) -> Result<T,()> {
		self.map_err(|e| report(e, Level::WARN))
	}
}
