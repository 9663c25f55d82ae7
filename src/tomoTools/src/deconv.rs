
// Wiener deconvolution of reconstructed tomograms

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use rustfft::{num_complex::Complex, FftDirection, FftPlanner};
use tracing::info;

use crate::ctf::{interp, wiener, WienerParams};
use crate::mrc::Volume;
use crate::naming;


/// Deconvolves the tomogram into `<stem>_deconv.mrc` beside it.
/// `params.angpix` is ignored, the pixel size comes from the MRC header.
#[tracing::instrument(skip_all, level = 5, name = "Deconv")]
pub fn deconvolve_file(input: &Path, params: &WienerParams) -> Result<PathBuf> {

	let (volume, header) = Volume::read(input)
		.context(format!("Failed to read tomogram: {}", input.to_string_lossy()))?;
	let angpix = header.pixel_size();

	let filter = wiener(&WienerParams {
		angpix,
		.. params.clone()
	});
	let out = deconvolve(&volume, &filter);

	let output = naming::sibling(input, "_deconv.mrc");
	out.save(&output, angpix)?;
	info!("Deconvolved {} into {}", input.to_string_lossy(), output.to_string_lossy());

	Ok(output)
}


/// Multiplies the volume's spectrum by the filter, resampled radially over the 3D frequency grid
pub fn deconvolve(volume: &Volume, filter: &[f64]) -> Volume {

	let mut data = volume.voxels.iter()
		.map(|&v| Complex::new(v as f64, 0.0))
		.collect::<Vec<_>>();

	let dims = [volume.nz, volume.ny, volume.nx];
	fft3(&mut data, dims, FftDirection::Forward);

	let ramp = radial_ramp(dims, filter);
	for (v, r) in data.iter_mut().zip(ramp) {
		*v *= r;
	}

	fft3(&mut data, dims, FftDirection::Inverse);

	// the inverse transform isn't normalized
	let n = data.len() as f64;
	Volume {
		nx: volume.nx,
		ny: volume.ny,
		nz: volume.nz,
		voxels: data.into_iter()
			.map(|v| (v.re/n) as f32)
			.collect()
	}
}


/// The filter gain at each frequency of an unshifted spectrum, `[nz, ny, nx]` order.
/// Each axis is scaled so its most negative frequency lands at radius 1, radii clip at 1.
pub fn radial_ramp(dims: [usize; 3], filter: &[f64]) -> Vec<f64> {

	let [nz, ny, nx] = dims;

	// normalized frequency along one axis, DC first
	let axis = |n: usize| -> Vec<f64> {
		let half = n/2;
		let scale = half.max(1) as f64;
		(0 .. n)
			.map(|i| (((i + half) % n) as f64 - half as f64)/scale)
			.collect()
	};
	let (fz, fy, fx) = (axis(nz), axis(ny), axis(nx));

	let mut ramp = Vec::with_capacity(nx*ny*nz);
	for z in &fz {
		for y in &fy {
			for x in &fx {
				let r = (x*x + y*y + z*z).sqrt().min(1.0);
				ramp.push(interp(filter, r));
			}
		}
	}
	ramp
}


/// in-place 3D FFT of a z(y(x)) volume, one axis at a time
fn fft3(data: &mut [Complex<f64>], dims: [usize; 3], direction: FftDirection) {

	let [nz, ny, nx] = dims;
	let mut planner = FftPlanner::<f64>::new();

	// x rows are contiguous
	let fft = planner.plan_fft(nx, direction);
	for row in data.chunks_exact_mut(nx) {
		fft.process(row);
	}

	let fft = planner.plan_fft(ny, direction);
	let mut line = vec![Complex::new(0.0, 0.0); ny];
	for z in 0 .. nz {
		for x in 0 .. nx {
			let at = |y: usize| z*ny*nx + y*nx + x;
			for y in 0 .. ny {
				line[y] = data[at(y)];
			}
			fft.process(&mut line);
			for y in 0 .. ny {
				data[at(y)] = line[y];
			}
		}
	}

	let fft = planner.plan_fft(nz, direction);
	let mut line = vec![Complex::new(0.0, 0.0); nz];
	for y in 0 .. ny {
		for x in 0 .. nx {
			let at = |z: usize| z*ny*nx + y*nx + x;
			for z in 0 .. nz {
				line[z] = data[at(z)];
			}
			fft.process(&mut line);
			for z in 0 .. nz {
				data[at(z)] = line[z];
			}
		}
	}
}
