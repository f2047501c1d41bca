//! `.modseam` files
//!
//! Little-endian binary layout:
//!
//! ```text
//! magic      b"LCMODSEAM"
//! version    u32
//! tolerance  f32
//! flags      u8      bit 0: translation independent
//! seams      u32     count, then per seam:
//!   vertices   u32 count, then x y z f32 each
//!   edges      u32 count, then a b u32 each
//!   names      u32 count, then u32 byte length + UTF-8 each
//!   consistent u8
//!   collapses  u32 count, then removed u32, kept u32, max_deviation f64 each
//! ```

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use lodcrate_core::{Error, Result};

use super::{ModularSeam, ModularSeams, SeamCollapse};

const MAGIC: &[u8; 9] = b"LCMODSEAM";
const VERSION: u32 = 1;

/// Upper bound on any element count, to reject corrupt headers before
/// allocating
const MAX_COUNT: u32 = 1 << 28;

/// Counts come from the file, so buffers start small and grow as elements
/// actually arrive
const PREALLOCATION_LIMIT: usize = 1024;

fn preallocated<T>(count: usize) -> Vec<T> {
    Vec::with_capacity(count.min(PREALLOCATION_LIMIT))
}

fn truncated(e: std::io::Error) -> Error {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        Error::InvalidData("modular seam file is truncated".into())
    } else {
        Error::Io(e)
    }
}

struct SeamReader<R: Read> {
    inner: R,
}

impl<R: Read> SeamReader<R> {
    fn bytes<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut buf = [0u8; N];
        self.inner.read_exact(&mut buf).map_err(truncated)?;
        Ok(buf)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.bytes::<1>()?[0])
    }

    fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.bytes()?))
    }

    fn f32(&mut self) -> Result<f32> {
        Ok(f32::from_le_bytes(self.bytes()?))
    }

    fn f64(&mut self) -> Result<f64> {
        Ok(f64::from_le_bytes(self.bytes()?))
    }

    fn count(&mut self, what: &str) -> Result<usize> {
        let n = self.u32()?;
        if n > MAX_COUNT {
            return Err(Error::InvalidData(format!("implausible {} count {}", what, n)));
        }
        Ok(n as usize)
    }

    fn string(&mut self) -> Result<String> {
        let len = self.count("name length")?;
        let mut buf = preallocated(len);
        (&mut self.inner).take(len as u64).read_to_end(&mut buf)?;
        if buf.len() != len {
            return Err(Error::InvalidData("modular seam file is truncated".into()));
        }
        String::from_utf8(buf).map_err(|_| Error::InvalidData("geometry name is not UTF-8".into()))
    }

    fn seam(&mut self) -> Result<ModularSeam> {
        let vertex_count = self.count("vertex")?;
        let mut vertices = preallocated(vertex_count);
        for _ in 0..vertex_count {
            vertices.push([self.f32()?, self.f32()?, self.f32()?]);
        }

        let edge_count = self.count("edge")?;
        let mut edges = preallocated(edge_count);
        for _ in 0..edge_count {
            let edge = [self.u32()?, self.u32()?];
            if edge.iter().any(|&v| v as usize >= vertex_count) {
                return Err(Error::InvalidData(format!("seam edge {:?} is out of range", edge)));
            }
            edges.push(edge);
        }

        let name_count = self.count("name")?;
        let mut geometry_names = preallocated(name_count);
        for _ in 0..name_count {
            geometry_names.push(self.string()?);
        }

        let consistent = match self.u8()? {
            0 => false,
            1 => true,
            other => return Err(Error::InvalidData(format!("bad consistency flag {}", other))),
        };

        let collapse_count = self.count("collapse")?;
        let mut collapses = preallocated(collapse_count);
        for _ in 0..collapse_count {
            let collapse = SeamCollapse {
                removed: self.u32()?,
                kept: self.u32()?,
                max_deviation: self.f64()?,
            };
            if collapse.removed as usize >= vertex_count || collapse.kept as usize >= vertex_count {
                return Err(Error::InvalidData("seam collapse is out of range".into()));
            }
            if !(collapse.max_deviation >= 0.0) || !collapse.max_deviation.is_finite() {
                return Err(Error::InvalidData(format!(
                    "seam collapse deviation {} is not a finite non-negative number",
                    collapse.max_deviation
                )));
            }
            collapses.push(collapse);
        }

        Ok(ModularSeam {
            vertices,
            edges,
            geometry_names,
            consistent,
            collapses,
        })
    }
}

fn write_len<W: Write>(writer: &mut W, len: usize) -> Result<()> {
    let len = u32::try_from(len).map_err(|_| Error::InvalidData(format!("{} elements do not fit a u32", len)))?;
    writer.write_all(&len.to_le_bytes())?;
    Ok(())
}

impl ModularSeams {
    /// Write in the `.modseam` binary layout
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(MAGIC)?;
        writer.write_all(&VERSION.to_le_bytes())?;
        writer.write_all(&self.tolerance.to_le_bytes())?;
        writer.write_all(&[self.is_translation_independent as u8])?;
        write_len(writer, self.seams.len())?;
        for seam in &self.seams {
            write_len(writer, seam.vertices.len())?;
            for v in &seam.vertices {
                for c in v {
                    writer.write_all(&c.to_le_bytes())?;
                }
            }
            write_len(writer, seam.edges.len())?;
            for [a, b] in &seam.edges {
                writer.write_all(&a.to_le_bytes())?;
                writer.write_all(&b.to_le_bytes())?;
            }
            write_len(writer, seam.geometry_names.len())?;
            for name in &seam.geometry_names {
                write_len(writer, name.len())?;
                writer.write_all(name.as_bytes())?;
            }
            writer.write_all(&[seam.consistent as u8])?;
            write_len(writer, seam.collapses.len())?;
            for c in &seam.collapses {
                writer.write_all(&c.removed.to_le_bytes())?;
                writer.write_all(&c.kept.to_le_bytes())?;
                writer.write_all(&c.max_deviation.to_le_bytes())?;
            }
        }
        Ok(())
    }

    /// Read the `.modseam` binary layout
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let mut reader = SeamReader { inner: reader };
        let magic: [u8; 9] = reader.bytes()?;
        if &magic != MAGIC {
            return Err(Error::InvalidData("not a modular seam file".into()));
        }
        let version = reader.u32()?;
        if version != VERSION {
            return Err(Error::InvalidData(format!("unsupported modular seam version {}", version)));
        }
        let tolerance = reader.f32()?;
        if !(tolerance >= 0.0) || !tolerance.is_finite() {
            return Err(Error::InvalidData(format!(
                "modular seam tolerance {} is not a finite non-negative number",
                tolerance
            )));
        }
        let flags = reader.u8()?;
        if flags > 1 {
            return Err(Error::InvalidData(format!("bad modular seam flags {:#x}", flags)));
        }
        let seam_count = reader.count("seam")?;
        let mut seams = preallocated(seam_count);
        for _ in 0..seam_count {
            seams.push(reader.seam()?);
        }
        let mut rest = [0u8; 1];
        if reader.inner.read(&mut rest)? != 0 {
            return Err(Error::InvalidData("trailing bytes after modular seams".into()));
        }
        Ok(Self {
            tolerance,
            is_translation_independent: flags & 1 == 1,
            seams,
        })
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        self.write_to(&mut writer)?;
        writer.flush()?;
        Ok(())
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut reader = BufReader::new(File::open(path)?);
        Self::read_from(&mut reader)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ModularSeams {
        ModularSeams {
            tolerance: 2.5e-4,
            is_translation_independent: true,
            seams: vec![ModularSeam {
                vertices: vec![[0.0, 1.0, 0.0], [0.5, 1.0, 0.25], [1.0, 1.0, 0.0]],
                edges: vec![[0, 1], [1, 2]],
                geometry_names: vec!["wall_a".into(), "wall_ö".into()],
                consistent: true,
                collapses: vec![SeamCollapse {
                    removed: 1,
                    kept: 0,
                    max_deviation: 0.25,
                }],
            }],
        }
    }

    fn encode(seams: &ModularSeams) -> Vec<u8> {
        let mut bytes = Vec::new();
        seams.write_to(&mut bytes).unwrap();
        bytes
    }

    #[test]
    fn test_layout_header() {
        let bytes = encode(&sample());
        assert_eq!(&bytes[..9], b"LCMODSEAM");
        assert_eq!(u32::from_le_bytes(bytes[9..13].try_into().unwrap()), VERSION);
        assert_eq!(f32::from_le_bytes(bytes[13..17].try_into().unwrap()), 2.5e-4);
        assert_eq!(bytes[17], 1);
    }

    #[test]
    fn test_read_back() {
        let seams = sample();
        let decoded = ModularSeams::read_from(&mut encode(&seams).as_slice()).unwrap();
        assert_eq!(decoded, seams);
    }

    #[test]
    fn test_truncated_is_invalid_data() {
        let bytes = encode(&sample());
        for len in [0, 5, 17, bytes.len() - 1] {
            let result = ModularSeams::read_from(&mut &bytes[..len]);
            assert!(matches!(result, Err(Error::InvalidData(_))), "length {}", len);
        }
    }

    #[test]
    fn test_corrupt_is_invalid_data() {
        let mut bytes = encode(&sample());
        bytes[0] = b'X';
        assert!(matches!(ModularSeams::read_from(&mut bytes.as_slice()), Err(Error::InvalidData(_))));

        let mut bytes = encode(&sample());
        // first edge index, after header, seam count and three vertices
        let edge_offset = 18 + 4 + 4 + 3 * 12 + 4;
        bytes[edge_offset..edge_offset + 4].copy_from_slice(&7u32.to_le_bytes());
        assert!(matches!(ModularSeams::read_from(&mut bytes.as_slice()), Err(Error::InvalidData(_))));

        let mut bytes = encode(&sample());
        bytes.push(0);
        assert!(matches!(ModularSeams::read_from(&mut bytes.as_slice()), Err(Error::InvalidData(_))));
    }

    #[test]
    fn test_huge_counts_fail_without_allocating() {
        // header plus one seam claiming 2^28 vertices, and nothing else
        let mut bytes = encode(&ModularSeams::default());
        bytes.truncate(18);
        bytes.extend_from_slice(&1u32.to_le_bytes());
        bytes.extend_from_slice(&MAX_COUNT.to_le_bytes());
        assert_eq!(bytes.len(), 26);
        assert!(matches!(ModularSeams::read_from(&mut bytes.as_slice()), Err(Error::InvalidData(_))));

        // a geometry name claiming 2^28 bytes
        let mut seams = sample();
        seams.seams[0].geometry_names = vec!["a".into()];
        let mut bytes = encode(&seams);
        let name_offset = 18 + 4 + 4 + 3 * 12 + 4 + 2 * 8 + 4;
        assert_eq!(u32::from_le_bytes(bytes[name_offset..name_offset + 4].try_into().unwrap()), 1);
        bytes[name_offset..name_offset + 4].copy_from_slice(&MAX_COUNT.to_le_bytes());
        assert!(matches!(ModularSeams::read_from(&mut bytes.as_slice()), Err(Error::InvalidData(_))));
    }

    #[test]
    fn test_bad_tolerance_is_invalid_data() {
        for tolerance in [f32::NAN, f32::INFINITY, -1.0] {
            let mut bytes = encode(&sample());
            bytes[13..17].copy_from_slice(&tolerance.to_le_bytes());
            let result = ModularSeams::read_from(&mut bytes.as_slice());
            assert!(matches!(result, Err(Error::InvalidData(_))), "tolerance {}", tolerance);
        }

        let mut seams = sample();
        seams.seams[0].collapses[0].max_deviation = f64::NAN;
        let result = ModularSeams::read_from(&mut encode(&seams).as_slice());
        assert!(matches!(result, Err(Error::InvalidData(_))));
    }
}
