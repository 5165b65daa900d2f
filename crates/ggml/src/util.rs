//! Utilities for reading and writing.
//!
//! All values are little-endian. The readers consume exactly the number of bytes
//! of the value they return; a stream that ends early yields an [io::Error] of kind
//! [io::ErrorKind::UnexpectedEof].

use std::io::{self, BufRead, Write};

///
/// READERS
///

/// Read a fixed-size array of bytes from a reader.
pub fn read_bytes<const N: usize>(reader: &mut dyn BufRead) -> io::Result<[u8; N]> {
    let mut bytes = [0u8; N];
    reader.read_exact(&mut bytes)?;
    Ok(bytes)
}

/// Read a `u8` from a reader.
pub fn read_u8(reader: &mut dyn BufRead) -> io::Result<u8> {
    Ok(u8::from_le_bytes(read_bytes::<1>(reader)?))
}

/// Read a `i32` from a reader.
pub fn read_i32(reader: &mut dyn BufRead) -> io::Result<i32> {
    Ok(i32::from_le_bytes(read_bytes::<4>(reader)?))
}

/// Read a `u32` from a reader.
pub fn read_u32(reader: &mut dyn BufRead) -> io::Result<u32> {
    Ok(u32::from_le_bytes(read_bytes::<4>(reader)?))
}

/// Read a `i64` from a reader.
pub fn read_i64(reader: &mut dyn BufRead) -> io::Result<i64> {
    Ok(i64::from_le_bytes(read_bytes::<8>(reader)?))
}

/// Read a `f32` from a reader.
pub fn read_f32(reader: &mut dyn BufRead) -> io::Result<f32> {
    Ok(f32::from_le_bytes(read_bytes::<4>(reader)?))
}

/// Read a `bool` represented as a single byte from a reader.
pub fn read_bool(reader: &mut dyn BufRead) -> io::Result<bool> {
    let val = read_u8(reader)?;
    match val {
        0 => Ok(false),
        1 => Ok(true),
        _ => Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Invalid byte value for bool: '{}'", val),
        )),
    }
}

/// Read a variable-length array of bytes from a reader.
pub fn read_bytes_with_len(reader: &mut dyn BufRead, len: usize) -> io::Result<Vec<u8>> {
    let mut bytes = vec![0u8; len];
    reader.read_exact(&mut bytes)?;
    Ok(bytes)
}

///
/// WRITERS
///

/// Write a `u8` to a writer.
pub fn write_u8(writer: &mut dyn Write, value: u8) -> io::Result<()> {
    writer.write_all(&value.to_le_bytes())
}

/// Write a `i32` to a writer.
pub fn write_i32(writer: &mut dyn Write, value: i32) -> io::Result<()> {
    writer.write_all(&value.to_le_bytes())
}

/// Write a `u32` to a writer.
pub fn write_u32(writer: &mut dyn Write, value: u32) -> io::Result<()> {
    writer.write_all(&value.to_le_bytes())
}

/// Write a `i64` to a writer.
pub fn write_i64(writer: &mut dyn Write, value: i64) -> io::Result<()> {
    writer.write_all(&value.to_le_bytes())
}

/// Write a `f32` to a writer.
pub fn write_f32(writer: &mut dyn Write, value: f32) -> io::Result<()> {
    writer.write_all(&value.to_le_bytes())
}

/// Write a `bool` represented as a single byte to a writer.
pub fn write_bool(writer: &mut dyn Write, value: bool) -> io::Result<()> {
    write_u8(writer, u8::from(value))
}

/// Write a string prefixed with its `u32` byte length to a writer.
pub fn write_string(writer: &mut dyn Write, value: &str) -> io::Result<()> {
    let len = u32::try_from(value.len())
        .map_err(|err| io::Error::new(io::ErrorKind::InvalidInput, err))?;
    write_u32(writer, len)?;
    writer.write_all(value.as_bytes())
}

// NOTE: Implementation from #![feature(buf_read_has_data_left)]
/// Check if there is any data left in the reader.
pub fn has_data_left(reader: &mut dyn BufRead) -> io::Result<bool> {
    reader.fill_buf().map(|b| !b.is_empty())
}
