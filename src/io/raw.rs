//! Read / write volume samples as raw little-endian binary

use std::fs::File;
use std::io::{Write, Read, BufWriter, BufReader};
use std::path::Path;

/// Sample types which can be stored in raw volume files
pub trait Sample: Copy + Send + Sync + 'static {
    const SIZE: usize;
    fn to_le(self, out: &mut Vec<u8>);
    fn from_le(bytes: &[u8]) -> Self;
}

macro_rules! sample {
    ($t:ty) => {
        impl Sample for $t {
            const SIZE: usize = std::mem::size_of::<$t>();
            fn to_le(self, out: &mut Vec<u8>) { out.extend_from_slice(&self.to_le_bytes()) }
            fn from_le(bytes: &[u8]) -> Self {
                let mut buf = [0; std::mem::size_of::<$t>()];
                buf.copy_from_slice(bytes);
                <$t>::from_le_bytes(buf)
            }
        }
    };
}

sample!(f32);
sample!(u16);

pub fn write<T: Sample>(data: impl Iterator<Item = T>, path: &Path) -> std::io::Result<()> {
    let file = File::create(path)?;
    let mut buf = BufWriter::new(file);
    let mut bytes = Vec::with_capacity(T::SIZE);
    for datum in data {
        bytes.clear();
        datum.to_le(&mut bytes);
        buf.write_all(&bytes)?;
    }
    buf.flush()
}

type IORes<T> = std::io::Result<T>;
pub fn read<'a, T: Sample>(path: &Path) -> IORes<impl Iterator<Item = IORes<T>> + 'a> {
    let file = File::open(path)?;
    let mut buf = BufReader::new(file);
    let mut buffer = vec![0; T::SIZE];

    Ok(std::iter::from_fn(move || {
        use std::io::ErrorKind::UnexpectedEof;
        match buf.read_exact(&mut buffer) {
            Ok(()) => Some(Ok(T::from_le(&buffer))),
            Err(e) if e.kind() == UnexpectedEof => None,
            Err(e) => Some(Err(e)),
        }
    }))
}
