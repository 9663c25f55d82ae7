
// MRC file (from the Medical Research Council, in the UK)
// https://en.wikipedia.org/wiki/MRC_(file_format)

// format specification:
// https://www.ccpem.ac.uk/mrc_format/mrc2014.php

use std::cell::OnceCell;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Cursor, Read, Seek, SeekFrom, Write};
use std::path::Path;

use anyhow::{bail, Context, Result};
use byteorder::{ReadBytesExt, WriteBytesExt, LE};


const HEADER_SIZE: usize = 1024;
const LABEL_SIZE: usize = 80;
const NUM_LABELS: usize = 10;

// byte offsets of the header words we use, word n is at (n - 1)*4
const OFFSET_MX: u64 = 28;
const OFFSET_CELLA: u64 = 40;
const OFFSET_NSYMBT: u64 = 92;
const OFFSET_MACHST: u64 = 212;
const OFFSET_NLABL: u64 = 220;
const OFFSET_LABELS: u64 = 224;


#[derive(Debug, Clone, PartialEq)]
pub struct MrcHeader {
	pub nx: u32,
	pub ny: u32,
	pub nz: u32,
	pub mode: u32,
	pub mx: u32,
	pub my: u32,
	pub mz: u32,
	pub xlen: f32,
	pub ylen: f32,
	pub zlen: f32,
	pub nsymbt: u32,
	pub labels: Vec<String>
}

impl MrcHeader {

	pub fn read(path: impl AsRef<Path>) -> Result<Self> {

		let path = path.as_ref();
		let mut file = File::open(path)
			.context(format!("Failed to open MRC file: {}", path.to_string_lossy()))?;
		let mut buf = [0u8; HEADER_SIZE];
		file.read_exact(&mut buf)
			.context(format!("Failed to read MRC header: {}", path.to_string_lossy()))?;

		Self::from_bytes(&buf)
			.context(format!("Failed to parse MRC header: {}", path.to_string_lossy()))
	}

	pub fn from_bytes(buf: &[u8; HEADER_SIZE]) -> Result<Self> {

		// only little-endian files are supported, which is what every tool in the pipeline writes
		let machst = &buf[OFFSET_MACHST as usize .. OFFSET_MACHST as usize + 2];
		if machst == [0x11, 0x11] {
			bail!("Big-endian MRC files are not supported");
		}

		let mut cursor = Cursor::new(&buf[..]);
		let nx = cursor.read_u32::<LE>()?;
		let ny = cursor.read_u32::<LE>()?;
		let nz = cursor.read_u32::<LE>()?;
		let mode = cursor.read_u32::<LE>()?;

		cursor.seek(SeekFrom::Start(OFFSET_MX))?;
		let mx = cursor.read_u32::<LE>()?;
		let my = cursor.read_u32::<LE>()?;
		let mz = cursor.read_u32::<LE>()?;
		let xlen = cursor.read_f32::<LE>()?;
		let ylen = cursor.read_f32::<LE>()?;
		let zlen = cursor.read_f32::<LE>()?;

		cursor.seek(SeekFrom::Start(OFFSET_NSYMBT))?;
		let nsymbt = cursor.read_u32::<LE>()?;

		cursor.seek(SeekFrom::Start(OFFSET_NLABL))?;
		let nlabl = (cursor.read_u32::<LE>()? as usize).min(NUM_LABELS);
		let labels = (0 .. nlabl)
			.map(|i| {
				let start = OFFSET_LABELS as usize + i*LABEL_SIZE;
				String::from_utf8_lossy(&buf[start .. start + LABEL_SIZE])
					.trim_end_matches(|c| c == ' ' || c == '\0')
					.to_string()
			})
			.collect();

		Ok(Self {
			nx, ny, nz,
			mode,
			mx, my, mz,
			xlen, ylen, zlen,
			nsymbt,
			labels
		})
	}

	/// pixel size in Angstroms, falls back to 1 when the sampling is unset
	pub fn pixel_size(&self) -> f64 {
		if self.mx == 0 {
			return 1.0;
		}
		self.xlen as f64/self.mx as f64
	}

	pub fn dim_zyx(&self) -> [usize; 3] {
		[self.nz as usize, self.ny as usize, self.nx as usize]
	}

	/// the tilt axis angle recorded by the acquisition software in the labels, if any
	pub fn axis_angle(&self) -> Option<f64> {
		self.labels.iter()
			.find_map(|label| {
				let (_, rest) = label.split_once("Tilt axis angle =")?;
				rest.split(|c: char| c.is_whitespace() || c == ',')
					.find(|s| !s.is_empty())?
					.parse::<f64>()
					.ok()
			})
	}

	fn data_offset(&self) -> u64 {
		HEADER_SIZE as u64 + self.nsymbt as u64
	}
}


/// the header of a file, read on first use
#[derive(Debug, Clone, Default)]
pub struct LazyHeader(OnceCell<MrcHeader>);

impl LazyHeader {

	pub fn get(&self, path: &Path) -> Result<&MrcHeader> {
		if let Some(header) = self.0.get() {
			return Ok(header);
		}
		let header = MrcHeader::read(path)?;
		Ok(self.0.get_or_init(|| header))
	}
}


/// rewrites the cell lengths so the header reports the given pixel size
pub fn set_pixel_size(path: impl AsRef<Path>, angpix: f64) -> Result<()> {

	let path = path.as_ref();
	let header = MrcHeader::read(path)?;

	let mut file = OpenOptions::new()
		.write(true)
		.open(path)
		.context(format!("Failed to open MRC file for writing: {}", path.to_string_lossy()))?;

	// keep the sampling in sync with the dimensions, like the IMOD tools expect
	file.seek(SeekFrom::Start(OFFSET_MX))?;
	file.write_u32::<LE>(header.nx)?;
	file.write_u32::<LE>(header.ny)?;
	file.write_u32::<LE>(header.nz)?;

	file.seek(SeekFrom::Start(OFFSET_CELLA))?;
	file.write_f32::<LE>((angpix*header.nx as f64) as f32)?;
	file.write_f32::<LE>((angpix*header.ny as f64) as f32)?;
	file.write_f32::<LE>((angpix*header.nz as f64) as f32)?;

	Ok(())
}


/// replaces the text labels, keeping at most 10
pub fn set_labels(path: impl AsRef<Path>, labels: &[impl AsRef<str>]) -> Result<()> {

	let path = path.as_ref();
	let mut file = OpenOptions::new()
		.write(true)
		.open(path)
		.context(format!("Failed to open MRC file for writing: {}", path.to_string_lossy()))?;

	let labels = &labels[.. labels.len().min(NUM_LABELS)];

	file.seek(SeekFrom::Start(OFFSET_NLABL))?;
	file.write_u32::<LE>(labels.len() as u32)?;

	file.seek(SeekFrom::Start(OFFSET_LABELS))?;
	let mut block = [b' '; LABEL_SIZE*NUM_LABELS];
	for (i, label) in labels.iter().enumerate() {
		let bytes = label.as_ref().as_bytes();
		let n = bytes.len().min(LABEL_SIZE);
		block[i*LABEL_SIZE .. i*LABEL_SIZE + n].copy_from_slice(&bytes[.. n]);
	}
	file.write_all(&block)?;

	Ok(())
}


/// A 3D volume of floats, z(y(x)) order
#[derive(Debug, Clone, PartialEq)]
pub struct Volume {
	pub nx: usize,
	pub ny: usize,
	pub nz: usize,
	pub voxels: Vec<f32>
}

impl Volume {

	pub fn new(nx: usize, ny: usize, nz: usize) -> Self {
		Self {
			nx,
			ny,
			nz,
			voxels: vec![0f32; nx*ny*nz]
		}
	}

	pub fn index(&self, x: usize, y: usize, z: usize) -> usize {
		z*self.nx*self.ny + y*self.nx + x
	}

	pub fn get(&self, x: usize, y: usize, z: usize) -> f32 {
		self.voxels[self.index(x, y, z)]
	}

	pub fn set(&mut self, x: usize, y: usize, z: usize, val: f32) {
		let i = self.index(x, y, z);
		self.voxels[i] = val;
	}

	/// reads the voxels and the header, converting any supported mode to floats
	pub fn read(path: impl AsRef<Path>) -> Result<(Self, MrcHeader)> {

		let path = path.as_ref();
		let header = MrcHeader::read(path)?;

		let mut file = File::open(path)
			.context(format!("Failed to open MRC file: {}", path.to_string_lossy()))?;
		file.seek(SeekFrom::Start(header.data_offset()))?;
		let mut reader = BufReader::new(file);

		let (nx, ny, nz) = (header.nx as usize, header.ny as usize, header.nz as usize);
		let count = nx*ny*nz;
		let mut voxels = Vec::with_capacity(count);
		for _ in 0 .. count {
			let v = match header.mode {
				0 => reader.read_i8()? as f32,
				1 => reader.read_i16::<LE>()? as f32,
				2 => reader.read_f32::<LE>()?,
				6 => reader.read_u16::<LE>()? as f32,
				mode => bail!("Unsupported MRC mode {} in {}", mode, path.to_string_lossy())
			};
			voxels.push(v);
		}

		Ok((Self { nx, ny, nz, voxels }, header))
	}

	/// writes the volume as mode 2 (32 bit float)
	pub fn save(&self, path: impl AsRef<Path>, angpix: f64) -> Result<()> {

		let path = path.as_ref();

		let mut file = File::create(&path)
			.context(format!("Failed to open file for writing: {}", path.to_string_lossy()))?;
		let mut writer = BufWriter::new(&mut file);

		let (min, max, mean) = self.stats();

		// dimensions (words 1-3), then mode 2
		writer.write_u32::<LE>(self.nx as u32)?;
		writer.write_u32::<LE>(self.ny as u32)?;
		writer.write_u32::<LE>(self.nz as u32)?;
		writer.write_u32::<LE>(2)?;

		// nxstart, nystart, nzstart
		writer.write(&[0u8; 4*3])?;

		// sampling (words 8-10) and cell lengths (words 11-13)
		writer.write_u32::<LE>(self.nx as u32)?;
		writer.write_u32::<LE>(self.ny as u32)?;
		writer.write_u32::<LE>(self.nz as u32)?;
		writer.write_f32::<LE>((angpix*self.nx as f64) as f32)?;
		writer.write_f32::<LE>((angpix*self.ny as f64) as f32)?;
		writer.write_f32::<LE>((angpix*self.nz as f64) as f32)?;

		// cell angles (words 14-16)
		writer.write_f32::<LE>(90.0)?;
		writer.write_f32::<LE>(90.0)?;
		writer.write_f32::<LE>(90.0)?;

		// axis mapping (words 17-19)
		writer.write_u32::<LE>(1)?;
		writer.write_u32::<LE>(2)?;
		writer.write_u32::<LE>(3)?;

		// density stats (words 20-22)
		writer.write_f32::<LE>(min)?;
		writer.write_f32::<LE>(max)?;
		writer.write_f32::<LE>(mean)?;

		// we're at word 23 now: skip to word 53, nsymbt stays zero
		writer.write(&[0u8; 4*(53 - 23)])?;

		writer.write(b"MAP ")?;

		// write the machine stamp: signal little-endianess
		writer.write(&[0x44, 0x44, 0x00, 0x00])?;

		// rms, then nlabl
		writer.write_f32::<LE>(0.0)?;
		writer.write_u32::<LE>(0)?;

		// labels, to the end of the header
		writer.write(&[0u8; LABEL_SIZE*NUM_LABELS])?;

		for &v in &self.voxels {
			writer.write_f32::<LE>(v)?;
		}

		// write buffers should be flushed before dropping
		writer.flush()?;

		Ok(())
	}

	fn stats(&self) -> (f32, f32, f32) {
		if self.voxels.is_empty() {
			return (0.0, 0.0, 0.0);
		}
		let mut min = f32::INFINITY;
		let mut max = f32::NEG_INFINITY;
		let mut sum = 0f64;
		for &v in &self.voxels {
			min = min.min(v);
			max = max.max(v);
			sum += v as f64;
		}
		(min, max, (sum/self.voxels.len() as f64) as f32)
	}
}


/// writes a stack of `nz` blank images, for fixtures and placeholder outputs
pub fn write_blank(path: impl AsRef<Path>, nx: usize, ny: usize, nz: usize, angpix: f64) -> Result<()> {
	Volume::new(nx, ny, nz)
		.save(path, angpix)
}
