
mod util;


use std::collections::{BTreeMap, BTreeSet};
use std::ffi::OsStr;
use std::fs;

use assert_fs::TempDir;
use galvanic_assert::{assert_that, matchers::*};

use tomo_tools::align::{align_with_aretomo, AreTomoOptions};
use tomo_tools::dose::dose_filter;
use tomo_tools::error::{EntityError, ToolError};
use tomo_tools::exclude::{exclude_views, EXCLUDED_DIR, README_TEXT};
use tomo_tools::logging;
use tomo_tools::mdoc::{MdocDocument, KEY_EXPOSURE_DOSE, KEY_SUB_FRAME_PATH};
use tomo_tools::micrograph::Micrograph;
use tomo_tools::mrc;
use tomo_tools::prepare::{prepare_tilt_series, PrepareOptions, Prepared};
use tomo_tools::reconstruct::{estimate_pitch, reconstruct_all, reconstruct_tiltseries, Pitch, ReconstructOptions, ReconstructionParams};
use tomo_tools::tiltseries::TiltSeries;
use tomo_tools::tomogram::Tomogram;
use tomo_tools::tools::ToolOutput;

use util::FakeRunner;


fn strings(items: &[&str]) -> Vec<String> {
	items.iter()
		.map(|s| s.to_string())
		.collect()
}


#[test]
fn reconstruct_with_aretomo() {
	let _logging = logging::init_test();

	let dir = TempDir::new().unwrap();
	let runner = FakeRunner::new();
	let tools = util::tools(dir.path(), &runner);
	let ts = TiltSeries::new(util::write_stack(dir.path(), "TS_01.mrc", &[-3.0, 0.0, 3.0], 3.0)).unwrap();

	let tomo = reconstruct_tiltseries(&tools, &ts, &ReconstructOptions {
		extra_thickness: 30,
		gpus: Some("0".to_string()),
		.. ReconstructOptions::default()
	}).unwrap();

	let expected = dir.path().join("TS_01_rec_bin_1.mrc");
	assert_that!(&tomo.path(), eq(expected.as_path()));
	assert_that!(&tomo.path().is_file(), eq(true));
	assert_that!(&runner.tools(), eq(strings(&[
		"extracttilts", "AreTomo", "mtffilter",
		"binvol", "tilt", "findsection", "tomopitch",
		"tilt", "trimvol"
	])));

	let calls = runner.calls();

	// the earliest acquired tilt sets the pretilt
	assert_that!(&calls[1].values_of("-TiltCor"), eq(vec![OsStr::new("0"), OsStr::new("3")]));
	assert_that!(&calls[1].values_of("-Gpu"), eq(vec![OsStr::new("0")]));

	// the final reconstruction uses the pitch tomopitch found, and the aligned stack's tilts
	let tilt = &calls[7];
	assert_that!(&tilt.value_of("-THICKNESS"), eq(Some(OsStr::new("450"))));
	assert_that!(&tilt.value_of("-XAXISTILT"), eq(Some(OsStr::new("1.8"))));
	assert_that!(&tilt.value_of("-SHIFT"), eq(Some(OsStr::new("0.0,-12.5"))));
	let expected = dir.path().join("TS_01_ali.tlt");
	assert_that!(&tilt.value_of("-TILTFILE"), eq(Some(expected.as_os_str())));
	let expected = dir.path().join("TS_01_ali_filtered.mrc");
	assert_that!(&tilt.value_of("-InputProjections"), eq(Some(expected.as_os_str())));

	// intermediates are gone, the input stays
	assert_that!(&dir.path().join("TS_01_ali.mrc").exists(), eq(false));
	assert_that!(&dir.path().join("TS_01_ali_filtered.mrc").exists(), eq(false));
	assert_that!(&dir.path().join("TS_01_full_rec.mrc").exists(), eq(false));
	assert_that!(&dir.path().join("TS_01_pitch.mod").exists(), eq(false));
	assert_that!(&ts.path().is_file(), eq(true));
}


#[test]
fn keep_ali_stack_and_zero_tilt() {
	let _logging = logging::init_test();

	let dir = TempDir::new().unwrap();
	let runner = FakeRunner::new();
	let tools = util::tools(dir.path(), &runner);
	let ts = TiltSeries::new(util::write_stack(dir.path(), "TS_01.mrc", &[-3.0, 0.0, 3.0], 3.0)).unwrap();

	reconstruct_tiltseries(&tools, &ts, &ReconstructOptions {
		keep_ali_stack: true,
		zero_xaxis_tilt: true,
		bin: 2,
		gpus: Some("0".to_string()),
		.. ReconstructOptions::default()
	}).unwrap();

	assert_that!(&dir.path().join("TS_01_ali.mrc").is_file(), eq(true));
	assert_that!(&dir.path().join("TS_01_rec_bin_2.mrc").is_file(), eq(true));

	let calls = runner.calls();
	let tilt = calls.iter()
		.filter(|c| c.tool == "tilt")
		.last()
		.unwrap();
	assert_that!(&tilt.value_of("-XAXISTILT"), eq(Some(OsStr::new("0"))));
	assert_that!(&tilt.value_of("-IMAGEBINNED"), eq(Some(OsStr::new("2"))));
}


#[test]
fn skip_anchors() {
	let _logging = logging::init_test();

	let dir = TempDir::new().unwrap();
	let runner = FakeRunner::new();
	let tools = util::tools(dir.path(), &runner);
	let stack = util::write_stack(dir.path(), "anchor.mrc", &[0.2, -0.3, 0.5], 3.0);
	let out_dir = dir.path().join("out");
	fs::create_dir(&out_dir).unwrap();

	let prepared = prepare_tilt_series(&tools, &stack, &out_dir, &PrepareOptions::default()).unwrap();

	assert_that!(&prepared, eq(Prepared::Skipped));
	assert_that!(&runner.calls().is_empty(), eq(true));
	assert_that!(&out_dir.join("anchor.mrc").exists(), eq(false));
}


#[test]
fn prepare_copies_stack_with_dose() {
	let _logging = logging::init_test();

	let dir = TempDir::new().unwrap();
	let runner = FakeRunner::new();
	let tools = util::tools(dir.path(), &runner);
	let stack = util::write_stack(dir.path(), "TS_01.mrc", &[-3.0, 0.0, 3.0], 0.0);
	let out_dir = dir.path().join("out");
	fs::create_dir(&out_dir).unwrap();

	let prepared = prepare_tilt_series(&tools, &stack, &out_dir, &PrepareOptions {
		exposure_dose: Some(2.5),
		.. PrepareOptions::default()
	}).unwrap();

	let out_stack = out_dir.join("TS_01.mrc");
	assert_that!(&prepared, eq(Prepared::Stack(out_stack.clone())));
	assert_that!(&out_stack.is_file(), eq(true));
	assert_that!(&runner.calls().is_empty(), eq(true));

	let mdoc = MdocDocument::read(out_dir.join("TS_01.mrc.mdoc")).unwrap();
	assert_that!(&mdoc.exposure_doses().unwrap(), eq(vec![2.5, 2.5, 2.5]));

	// the input is left alone
	let orig = MdocDocument::read(dir.path().join("TS_01.mrc.mdoc")).unwrap();
	assert_that!(&orig.sections[0].get_f64(KEY_EXPOSURE_DOSE), eq(Some(0.0)));
}


#[test]
fn prepare_reorders_stack() {
	let _logging = logging::init_test();

	let dir = TempDir::new().unwrap();
	let runner = FakeRunner::new();
	let tools = util::tools(dir.path(), &runner);
	let stack = util::write_stack(dir.path(), "TS_01.mrc", &[0.0, 3.0, -3.0], 3.0);
	let out_dir = dir.path().join("out");
	fs::create_dir(&out_dir).unwrap();

	prepare_tilt_series(&tools, &stack, &out_dir, &PrepareOptions {
		reorder: true,
		.. PrepareOptions::default()
	}).unwrap();

	assert_that!(&runner.tools(), eq(strings(&["newstack"])));
	let calls = runner.calls();
	assert_that!(&calls[0].value_of("-reorder"), eq(Some(OsStr::new("1"))));
	let expected = out_dir.join("TS_01.mrc");
	assert_that!(&calls[0].value_of("-ou"), eq(Some(expected.as_os_str())));
}


#[test]
fn no_dose_skips_filter() {
	let _logging = logging::init_test();

	let dir = TempDir::new().unwrap();
	let runner = FakeRunner::new();
	let tools = util::tools(dir.path(), &runner);
	let ts = TiltSeries::new(util::write_stack(dir.path(), "TS_01.mrc", &[-3.0, 0.0, 3.0], 0.0)).unwrap();

	let filtered = dose_filter(&tools, &ts, false).unwrap();

	assert_that!(&filtered, eq(ts.clone()));
	assert_that!(&runner.calls().is_empty(), eq(true));
	assert_that!(&dir.path().join("TS_01_filtered.mrc").exists(), eq(false));
}


#[test]
fn dose_filter_keeps_mdoc() {
	let _logging = logging::init_test();

	let dir = TempDir::new().unwrap();
	let runner = FakeRunner::new();
	let tools = util::tools(dir.path(), &runner);
	let ts = TiltSeries::new(util::write_stack(dir.path(), "TS_01_ali.mrc", &[-3.0, 0.0, 3.0], 3.0)).unwrap();

	let filtered = dose_filter(&tools, &ts, false).unwrap();

	let expected = dir.path().join("TS_01_ali_filtered.mrc");
	assert_that!(&filtered.path(), eq(expected.as_path()));
	assert_that!(&filtered.mdoc_path(), eq(ts.mdoc_path()));
	let calls = runner.calls();
	assert_that!(&calls[0].value_of("-dfile"), eq(Some(ts.mdoc_path().as_os_str())));
}


#[test]
fn exclude_two_views() {
	let _logging = logging::init_test();

	let dir = TempDir::new().unwrap();
	let runner = FakeRunner::new();
	let tools = util::tools(dir.path(), &runner);
	let tilts = (0 .. 10)
		.map(|i| -27.0 + 6.0*i as f64)
		.collect::<Vec<_>>();
	let ts = TiltSeries::new(util::write_stack(dir.path(), "TS_01.mrc", &tilts, 3.0)).unwrap();

	let out = exclude_views(&tools, &ts, &BTreeSet::from([2, 5])).unwrap();

	assert_that!(&out.path(), eq(ts.path()));
	assert_that!(&runner.tools(), eq(strings(&["excludeviews"])));
	let calls = runner.calls();
	assert_that!(&calls[0].value_of("-views"), eq(Some(OsStr::new("2,5"))));

	let mdoc = MdocDocument::read(ts.mdoc_path()).unwrap();
	let expected = tilts.iter()
		.enumerate()
		.filter(|(i, _)| *i != 1 && *i != 4)
		.map(|(_, t)| *t)
		.collect::<Vec<_>>();
	assert_that!(&mdoc.sections.len(), eq(8));
	assert_that!(&mdoc.tilt_angles().unwrap(), eq(expected));

	let text = fs::read_to_string(ts.mdoc_path()).unwrap();
	assert_that!(&text.contains("[ZValue = 7]"), eq(true));
	assert_that!(&text.contains("[ZValue = 8]"), eq(false));

	let excluded = dir.path().join(EXCLUDED_DIR);
	assert_that!(&excluded.join("TS_01_cutviews0.mrc").is_file(), eq(true));
	assert_that!(&dir.path().join("TS_01_cutviews0.mrc").exists(), eq(false));
	assert_that!(&fs::read_to_string(excluded.join("README")).unwrap(), eq(README_TEXT.to_string()));
}


#[test]
fn exclude_out_of_range() {
	let _logging = logging::init_test();

	let dir = TempDir::new().unwrap();
	let runner = FakeRunner::new();
	let tools = util::tools(dir.path(), &runner);
	let ts = TiltSeries::new(util::write_stack(dir.path(), "TS_01.mrc", &[-3.0, 0.0, 3.0], 3.0)).unwrap();

	assert_that!(&exclude_views(&tools, &ts, &BTreeSet::from([4])).is_err(), eq(true));
	assert_that!(&runner.calls().is_empty(), eq(true));
}


#[test]
fn reconstruct_with_exclusions() {
	let _logging = logging::init_test();

	let dir = TempDir::new().unwrap();
	let runner = FakeRunner::new();
	let tools = util::tools(dir.path(), &runner);
	let ts = TiltSeries::new(util::write_stack(dir.path(), "TS_01.mrc", &[-6.0, -3.0, 0.0, 3.0, 6.0], 3.0)).unwrap();

	reconstruct_tiltseries(&tools, &ts, &ReconstructOptions {
		gpus: Some("0".to_string()),
		exclusions: BTreeMap::from([(ts.path().to_path_buf(), "1,5".to_string())]),
		.. ReconstructOptions::default()
	}).unwrap();

	let text = runner.tools()[0].clone();
	assert_that!(&text.as_str(), eq("excludeviews"));
	let mdoc = MdocDocument::read(ts.mdoc_path()).unwrap();
	assert_that!(&mdoc.tilt_angles().unwrap(), eq(vec![-3.0, 0.0, 3.0]));
}


#[test]
fn stack_micrographs() {
	let _logging = logging::init_test();

	let dir = TempDir::new().unwrap();
	let runner = FakeRunner::new();
	let tools = util::tools(dir.path(), &runner);

	let mut micrographs = Vec::new();
	for (i, tilt) in [3.0, -3.0, 0.0].into_iter().enumerate() {
		let path = dir.path().join(format!("TS_01_{:03}.mrc", i));
		mrc::write_blank(&path, util::SIZE, util::SIZE, 1, util::ANGPIX).unwrap();
		fs::write(dir.path().join(format!("TS_01_{:03}.mrc.mdoc", i)), format!(
			"PixelSpacing = 2.0\n\n[T = SerialEM: Digitized on Krios]\n\n[FrameSet = 0]\nTiltAngle = {:?}\nPixelSpacing = 2.0\nExposureDose = 3.0\nSubFramePath = D:\\frames\\TS_01_{:03}.tif\nNumSubFrames = 8\n",
			tilt, i
		)).unwrap();
		micrographs.push(Micrograph::new(path, tilt).unwrap());
	}

	let ts_path = dir.path().join("TS_01.mrc");
	let ts = TiltSeries::from_micrographs(&tools, &micrographs, &ts_path, None, true, None).unwrap();

	assert_that!(&ts.path(), eq(ts_path.as_path()));
	assert_that!(&runner.tools(), eq(strings(&["newstack"])));

	// sorted by tilt angle
	let inputs = &runner.calls()[0].args[.. 3];
	assert_that!(&inputs[0], eq(dir.path().join("TS_01_001.mrc").into_os_string()));
	assert_that!(&inputs[1], eq(dir.path().join("TS_01_002.mrc").into_os_string()));
	assert_that!(&inputs[2], eq(dir.path().join("TS_01_000.mrc").into_os_string()));

	let mdoc = ts.read_mdoc().unwrap();
	assert_that!(&mdoc.tilt_angles().unwrap(), eq(vec![-3.0, 0.0, 3.0]));
	assert_that!(&mdoc.sections.iter().any(|s| s.contains(KEY_SUB_FRAME_PATH)), eq(false));
	assert_that!(&mdoc.titles, eq(vec!["SerialEM: Digitized on Krios".to_string()]));

	let header = mrc::MrcHeader::read(&ts_path).unwrap();
	assert_that!(&((header.pixel_size() - util::ANGPIX).abs() < 1e-5), eq(true));

	// never overwrites
	let err = TiltSeries::from_micrographs(&tools, &micrographs, &ts_path, None, true, None).unwrap_err();
	assert_that!(&matches!(err.downcast_ref::<EntityError>(), Some(EntityError::FileExists(..))), eq(true));
	assert_that!(&runner.calls().len(), eq(1));
}


#[test]
fn previous_alignment_missing() {
	let _logging = logging::init_test();

	let dir = TempDir::new().unwrap();
	let runner = FakeRunner::new();
	let tools = util::tools(dir.path(), &runner);
	let ts = TiltSeries::new(util::write_stack(dir.path(), "TS_01.mrc", &[-3.0, 0.0, 3.0], 3.0)).unwrap();

	let err = align_with_aretomo(&tools, &ts, &AreTomoOptions {
		previous: true,
		.. AreTomoOptions::default()
	}).unwrap_err();

	assert_that!(&matches!(err.downcast_ref::<EntityError>(), Some(EntityError::FileNotFound(..))), eq(true));
	assert_that!(&runner.tools().contains(&"AreTomo".to_string()), eq(false));
}


#[test]
fn previous_alignment_applied() {
	let _logging = logging::init_test();

	let dir = TempDir::new().unwrap();
	let runner = FakeRunner::new();
	let tools = util::tools(dir.path(), &runner);
	let ts = TiltSeries::new(util::write_stack(dir.path(), "TS_01.mrc", &[-3.0, 0.0, 3.0], 3.0)).unwrap();
	fs::write(ts.aln_path(), "# AreTomo Alignment / Priism bprmMn\n").unwrap();

	let aligned = align_with_aretomo(&tools, &ts, &AreTomoOptions {
		previous: true,
		.. AreTomoOptions::default()
	}).unwrap();

	let expected = dir.path().join("TS_01_ali.mrc");
	assert_that!(&aligned.path(), eq(expected.as_path()));
	assert_that!(&aligned.mdoc_path(), eq(ts.mdoc_path()));
	let calls = runner.calls();
	let aretomo = calls.iter()
		.find(|c| c.tool == "AreTomo")
		.unwrap();
	let expected = ts.aln_path();
	assert_that!(&aretomo.value_of("-AlnFile"), eq(Some(expected.as_os_str())));
	assert_that!(&aretomo.has_flag("-TiltCor"), eq(false));
}


#[test]
fn pitch_findsection_fails() {
	let _logging = logging::init_test();

	let dir = TempDir::new().unwrap();
	let runner = FakeRunner::with_handler(|cmd| match cmd.tool.as_str() {
		"findsection" => util::failed("no sample found"),
		_ => util::simulate(cmd)
	});
	let tools = util::tools(dir.path(), &runner);
	let ts = TiltSeries::new(util::write_stack(dir.path(), "TS_01.mrc", &[-3.0, 0.0, 3.0], 3.0)).unwrap();
	fs::write(ts.tlt_path(), "-3.00\n0.00\n3.00\n").unwrap();

	let pitch = estimate_pitch(&tools, &ts, 100, None).unwrap();

	assert_that!(&pitch, eq(Pitch {
		x_axis_tilt: 0.0,
		z_shift: 0.0,
		thickness: 3100
	}));
	assert_that!(&runner.tools().contains(&"tomopitch".to_string()), eq(false));
	assert_that!(&dir.path().join("TS_01_full_rec.mrc").exists(), eq(false));
}


#[test]
fn pitch_tomopitch_errors() {
	let _logging = logging::init_test();

	let dir = TempDir::new().unwrap();
	let runner = FakeRunner::with_handler(|cmd| match cmd.tool.as_str() {
		"tomopitch" => ToolOutput {
			code: Some(0),
			stdout: "ERROR: TOMOPITCH - no contours in model\n".to_string(),
			..Default::default()
		},
		_ => util::simulate(cmd)
	});
	let tools = util::tools(dir.path(), &runner);
	let ts = TiltSeries::new(util::write_stack(dir.path(), "TS_01.mrc", &[-3.0, 0.0, 3.0], 3.0)).unwrap();
	fs::write(ts.tlt_path(), "-3.00\n0.00\n3.00\n").unwrap();

	let pitch = estimate_pitch(&tools, &ts, 0, None).unwrap();

	assert_that!(&pitch.thickness, eq(3000));
	assert_that!(&pitch.x_axis_tilt, eq(0.0));
	assert_that!(&dir.path().join("TS_01_pitch.mod").exists(), eq(false));
}


#[test]
fn trimvol_failure_is_fatal() {
	let _logging = logging::init_test();

	let dir = TempDir::new().unwrap();
	let runner = FakeRunner::with_handler(|cmd| match cmd.tool.as_str() {
		"trimvol" => util::failed("disk full"),
		_ => util::simulate(cmd)
	});
	let tools = util::tools(dir.path(), &runner);
	let ts = TiltSeries::new(util::write_stack(dir.path(), "TS_01.mrc", &[-3.0, 0.0, 3.0], 3.0)).unwrap();
	fs::write(ts.tlt_path(), "-3.00\n0.00\n3.00\n").unwrap();

	let err = Tomogram::from_tiltseries(&tools, &ts, &ReconstructionParams::default()).unwrap_err();

	let Some(ToolError::Failed { tool, code, stderr }) = err.downcast_ref::<ToolError>() else {
		panic!("unexpected error: {:#}", err);
	};
	assert_that!(&tool.as_str(), eq("trimvol"));
	assert_that!(code, eq(Some(1)));
	assert_that!(&stderr.as_str(), eq("disk full"));
}


#[test]
fn batch_skips_failures() {
	let _logging = logging::init_test();

	let dir = TempDir::new().unwrap();
	let runner = FakeRunner::new();
	let tools = util::tools(dir.path(), &runner);
	let good = TiltSeries::new(util::write_stack(dir.path(), "TS_01.mrc", &[-3.0, 0.0, 3.0], 3.0)).unwrap();
	let bad = TiltSeries::new(util::write_stack(dir.path(), "TS_02.mrc", &[-3.0, 0.0, 3.0], 3.0)).unwrap();
	fs::remove_file(bad.mdoc_path()).unwrap();

	let options = ReconstructOptions {
		gpus: Some("0".to_string()),
		.. ReconstructOptions::default()
	};

	let tomos = reconstruct_all(&tools, &[good.clone(), bad.clone()], &options).unwrap();
	assert_that!(&tomos.len(), eq(1));
	let expected = dir.path().join("TS_01_rec_bin_1.mrc");
	assert_that!(&tomos[0].path(), eq(expected.as_path()));

	// alone, the same stack fails the call
	assert_that!(&reconstruct_all(&tools, &[bad], &options).is_err(), eq(true));
}


#[test]
fn reconstruct_3dctf() {
	let _logging = logging::init_test();

	let dir = TempDir::new().unwrap();
	let runner = FakeRunner::new();
	let tools = util::tools(dir.path(), &runner);
	let ts = TiltSeries::new(util::write_stack(dir.path(), "TS_01.mrc", &[-3.0, 0.0, 3.0], 3.0)).unwrap();
	fs::write(ts.tlt_path(), "-3.00\n0.00\n3.00\n").unwrap();
	let defocus = dir.path().join("TS_01.defocus");
	fs::write(&defocus, "1\t0\t0.0\t0.0\t0.0\t3\n1\t3\t-3.00\t3.00\t3500.0\t3480.0\t12.0\n").unwrap();

	let tomo = Tomogram::from_tiltseries_3dctf(&tools, &ts, &ReconstructionParams {
		thickness: 400,
		.. ReconstructionParams::default()
	}, &defocus, 4).unwrap();

	let expected = dir.path().join("TS_01_rec_bin_1.mrc");
	assert_that!(&tomo.path(), eq(expected.as_path()));
	assert_that!(&runner.tools(), eq(strings(&["ctf3dsetup", "processchunks", "trimvol"])));

	let calls = runner.calls();
	assert_that!(&calls[0].value_of("-RootNameOfDataFiles"), eq(Some(OsStr::new("TS_01_ctf3d"))));
	assert_that!(&calls[0].value_of("-Voltage"), eq(Some(OsStr::new("300"))));
	assert_that!(&calls[1].cwd, eq(Some(dir.path().to_path_buf())));

	let sync = fs::read_to_string(dir.path().join("TS_01_ctf3d-001-sync.com")).unwrap();
	assert_that!(&sync.contains(&format!("DoseWeightingFile\t{}", ts.mdoc_path().to_string_lossy())), eq(true));
}
