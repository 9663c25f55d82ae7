
// 1D contrast transfer function and the Wiener filter built from it, after tom_deconv

use std::f64::consts::PI;


/// number of frequency samples in a Wiener filter, from DC to Nyquist
pub const WIENER_LEN: usize = 2048;


/// The CTF at `length` evenly-spaced frequencies from zero up to (but not including) Nyquist.
/// SI units: `pixel_size`, `cs` and `defocus` in m, `voltage` in V, `phase_shift` in rad.
/// Negative defocus is underfocus.
pub fn ctf1d(length: usize, pixel_size: f64, voltage: f64, cs: f64, defocus: f64, amplitude: f64, phase_shift: f64, b_factor: f64) -> Vec<f64> {

	let ny = 1.0/pixel_size;

	// relativistic electron wavelength
	let lambda = 12.2643247/(voltage*(1.0 + voltage*0.978466e-6)).sqrt()*1e-10;

	let amplitude_weight = (1.0 - amplitude.powi(2)).sqrt();

	(0 .. length)
		.map(|i| {
			let k = i as f64/(2*length) as f64*ny;
			let k2 = k.powi(2);
			let w = PI/2.0*(lambda.powi(3)*cs*k2.powi(2) + 2.0*lambda*defocus*k2) - phase_shift;
			let envelope = (-b_factor*k2*0.25).exp();
			(w.cos()*amplitude - amplitude_weight*w.sin())*envelope
		})
		.collect()
}


#[derive(Debug, Clone, PartialEq)]
pub struct WienerParams {
	pub angpix: f64,
	/// um, positive is underfocus
	pub defocus_um: f64,
	/// how fast the SNR falls off, usually 1.0 or 1.2
	pub snr_falloff: f64,
	/// 1 for an SNR of 1000, 0.67 for 100, ...
	pub deconv_strength: f64,
	/// fraction of Nyquist cut off at the low end
	pub hp_nyquist: f64,
	pub phase_flipped: bool,
	/// degrees
	pub phase_shift_deg: f64
}

impl Default for WienerParams {

	fn default() -> Self {
		Self {
			angpix: 1.0,
			defocus_um: 0.0,
			snr_falloff: 1.0,
			deconv_strength: 1.0,
			hp_nyquist: 0.02,
			phase_flipped: false,
			phase_shift_deg: 0.0
		}
	}
}


/// The 1D Wiener filter, `WIENER_LEN` samples from DC to Nyquist.
/// Always computed for 300 kV, Cs 2.7 mm and 7% amplitude contrast.
pub fn wiener(params: &WienerParams) -> Vec<f64> {

	let ctf = ctf1d(
		WIENER_LEN,
		params.angpix*1e-10,
		300e3,
		2.7e-3,
		-params.defocus_um*1e-6,
		0.07,
		params.phase_shift_deg/180.0*PI,
		0.0
	);

	let highpass = linspace(0.0, 1.0, WIENER_LEN)
		.into_iter()
		.map(|f| 1.0 - ((f/params.hp_nyquist).min(1.0)*PI).cos());
	let falloff = linspace(0.0, -1.0, WIENER_LEN)
		.into_iter()
		.map(|f| (f*params.snr_falloff*100.0/params.angpix).exp());
	let strength = 10f64.powf(3.0*params.deconv_strength);

	ctf.into_iter()
		.zip(highpass.zip(falloff))
		.map(|(ctf, (highpass, falloff))| {
			let ctf = if params.phase_flipped {
				ctf.abs()
			} else {
				ctf
			};
			let snr = falloff*strength*highpass;
			// zero SNR at DC means zero gain, not a division by zero
			if snr == 0.0 {
				0.0
			} else {
				ctf/(ctf.powi(2) + 1.0/snr)
			}
		})
		.collect()
}


/// `n` evenly spaced values from `start` to `stop`, both included
pub fn linspace(start: f64, stop: f64, n: usize) -> Vec<f64> {
	match n {
		0 => Vec::new(),
		1 => vec![start],
		_ => {
			let step = (stop - start)/(n - 1) as f64;
			let mut out = (0 .. n)
				.map(|i| start + i as f64*step)
				.collect::<Vec<_>>();
			out[n - 1] = stop;
			out
		}
	}
}


/// Linear interpolation in a filter sampled evenly over [0,1], clamped at both ends
pub fn interp(filter: &[f64], r: f64) -> f64 {

	let Some(&last) = filter.last() else {
		return 0.0;
	};
	if r <= 0.0 {
		return filter[0];
	}
	if r >= 1.0 {
		return last;
	}

	let pos = r*(filter.len() - 1) as f64;
	let i = pos.floor() as usize;
	let frac = pos - i as f64;
	match filter.get(i + 1) {
		Some(&next) => filter[i] + (next - filter[i])*frac,
		None => filter[i]
	}
}
