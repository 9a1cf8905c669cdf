//! Raw field dumps in the NumPy `.npy` v1.0 format.
//!
//! Every field is stored as little-endian `f32` with shape `(rows, cols, 2)`.
//! The last axis holds the horizontal component first, then the vertical
//! one, the usual `(u, v)` order of optical flow files.

use std::{
    fs::{self, File},
    io::{BufReader, BufWriter, Read, Write},
    path::{Path, PathBuf},
};

use anyhow::{Context, bail, ensure};

use super::FrameSink;
use crate::{
    data::{
        grid::{Grid, MotionField},
        motion::MotionVector,
    },
    project::ProjectedFrame,
};

const MAGIC: &[u8; 6] = b"\x93NUMPY";
const DESCR: &str = "<f4";
const HEADER_ALIGN: usize = 64;

/// Writes an `f32` array in `.npy` v1.0 format.
///
/// # Errors
///
/// - If `data` does not hold exactly the product of `shape` values, or the
///   writer fails.
#[inline]
pub fn write_npy_f32<W: Write>(mut writer: W, shape: &[usize], data: &[f32]) -> anyhow::Result<()> {
    ensure!(
        shape.iter().product::<usize>() == data.len(),
        "shape {:?} does not match {} values",
        shape,
        data.len()
    );

    let dims = match shape {
        [n] => format!("{n},"),
        _ => shape
            .iter()
            .map(usize::to_string)
            .collect::<Vec<_>>()
            .join(", "),
    };
    let mut header = format!("{{'descr': '{DESCR}', 'fortran_order': False, 'shape': ({dims}), }}");
    // magic, version and length prefix take 10 bytes; the header ends in '\n'
    let unpadded = MAGIC.len() + 2 + 2 + header.len() + 1;
    let padding = (HEADER_ALIGN - unpadded % HEADER_ALIGN) % HEADER_ALIGN;
    header.extend(std::iter::repeat_n(' ', padding));
    header.push('\n');
    let header_len = u16::try_from(header.len()).context("npy header too long")?;

    writer.write_all(MAGIC)?;
    writer.write_all(&[1, 0])?;
    writer.write_all(&header_len.to_le_bytes())?;
    writer.write_all(header.as_bytes())?;
    for value in data {
        writer.write_all(&value.to_le_bytes())?;
    }
    writer.flush()?;
    Ok(())
}

/// Reads an `f32` array written by [`write_npy_f32`], returning its shape
/// and values.
///
/// Versions 1.0 and 2.0 are accepted, as long as the array is little-endian
/// `f32` in C order.
///
/// # Errors
///
/// - If the data is not such an array.
#[inline]
pub fn read_npy_f32<R: Read>(mut reader: R) -> anyhow::Result<(Vec<usize>, Vec<f32>)> {
    let mut magic = [0; 8];
    reader
        .read_exact(&mut magic)
        .context("Could not read npy preamble")?;
    ensure!(&magic[..6] == MAGIC, "not an npy file");

    let header_len = match magic[6] {
        1 => {
            let mut len = [0; 2];
            reader.read_exact(&mut len)?;
            u16::from_le_bytes(len) as usize
        }
        2 => {
            let mut len = [0; 4];
            reader.read_exact(&mut len)?;
            u32::from_le_bytes(len) as usize
        }
        version => bail!("unsupported npy version {}.{}", version, magic[7]),
    };
    let mut header = vec![0; header_len];
    reader.read_exact(&mut header)?;
    let header = String::from_utf8(header).context("npy header is not text")?;

    ensure!(
        header.contains(&format!("'descr': '{DESCR}'")),
        "npy data is not little-endian f32: {}",
        header.trim()
    );
    ensure!(
        header.contains("'fortran_order': False"),
        "npy data is not in C order"
    );
    let shape = parse_shape(&header)?;

    let len = shape.iter().product::<usize>();
    let mut bytes = vec![0; len * size_of::<f32>()];
    reader
        .read_exact(&mut bytes)
        .with_context(|| format!("npy data shorter than shape {shape:?}"))?;
    let data = bytes
        .chunks_exact(size_of::<f32>())
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect();

    Ok((shape, data))
}

fn parse_shape(header: &str) -> anyhow::Result<Vec<usize>> {
    let start = header
        .find("'shape':")
        .context("npy header has no shape")?;
    let rest = &header[start..];
    let open = rest.find('(').context("malformed npy shape")?;
    let close = rest.find(')').context("malformed npy shape")?;
    rest[open + 1..close]
        .split(',')
        .map(str::trim)
        .filter(|dim| !dim.is_empty())
        .map(|dim| {
            dim.parse()
                .with_context(|| format!("malformed npy dimension {dim:?}"))
        })
        .collect()
}

/// Flattens a field to `(rows, cols, 2)` values.
#[inline]
pub fn field_to_array(field: &Grid<MotionVector>) -> ([usize; 3], Vec<f32>) {
    let data = field
        .cells()
        .iter()
        .flat_map(|mv| [mv.col, mv.row])
        .collect();
    ([field.rows, field.cols, 2], data)
}

/// Rebuilds a field from a `(rows, cols, 2)` array.
///
/// # Errors
///
/// - If the array does not have that shape.
#[inline]
pub fn field_from_array(shape: &[usize], data: &[f32]) -> anyhow::Result<Grid<MotionVector>> {
    let &[rows, cols, 2] = shape else {
        bail!("expected a (rows, cols, 2) array, got shape {shape:?}");
    };
    let cells = data
        .chunks_exact(2)
        .map(|uv| MotionVector::new(uv[1], uv[0]))
        .collect();
    Grid::from_cells(cols, rows, cells).context("npy data does not match its shape")
}

/// Writes `field` to `path`.
///
/// # Errors
///
/// - If the file cannot be written.
#[inline]
pub fn save_field<P: AsRef<Path>>(path: P, field: &MotionField) -> anyhow::Result<()> {
    let path = path.as_ref();
    let file = File::create(path).with_context(|| format!("Could not create {}", path.display()))?;
    let (shape, data) = field_to_array(field);
    write_npy_f32(BufWriter::new(file), &shape, &data)
        .with_context(|| format!("Could not write {}", path.display()))
}

/// Reads a field written by [`save_field`].
///
/// # Errors
///
/// - If the file cannot be read or does not hold a `(rows, cols, 2)` array.
#[inline]
pub fn load_field<P: AsRef<Path>>(path: P) -> anyhow::Result<MotionField> {
    let path = path.as_ref();
    let file = File::open(path).with_context(|| format!("Could not open {}", path.display()))?;
    let (shape, data) = read_npy_f32(BufReader::new(file))
        .with_context(|| format!("Could not read {}", path.display()))?;
    field_from_array(&shape, &data)
}

/// Writes `.npy` dumps of the dense field, the projected field and the
/// coded block vectors under `npy/`.
#[derive(Debug)]
pub struct RawSink {
    dir: PathBuf,
}

impl RawSink {
    /// Creates `npy/` under `root`.
    ///
    /// # Errors
    ///
    /// - If the directory cannot be created.
    #[inline]
    pub fn new<P: AsRef<Path>>(root: P) -> anyhow::Result<Self> {
        let dir = root.as_ref().join("npy");
        fs::create_dir_all(&dir).with_context(|| format!("Could not create {}", dir.display()))?;
        Ok(Self { dir })
    }

    /// Path of one dump.
    #[inline]
    pub fn path(&self, frame_number: usize, name: &str) -> PathBuf {
        self.dir.join(format!("{:06}_{}.npy", frame_number, name))
    }
}

impl FrameSink for RawSink {
    fn consume(&mut self, frame: &ProjectedFrame) -> anyhow::Result<()> {
        let n = frame.frame_number;
        save_field(self.path(n, "motion_field"), &frame.dense)?;
        save_field(self.path(n, "projected_field"), &frame.projected)?;
        save_field(self.path(n, "block_vectors"), &frame.block_vectors)?;
        Ok(())
    }
}
