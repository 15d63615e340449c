//! Little-endian field readers over a borrowed buffer.
//!
//! Each reader takes `(buffer, cursor)` and returns `(value, next_cursor)`, or `None`
//! when the buffer is too short. Nothing here mutates shared state, so a parse can be
//! restarted from any earlier cursor.

pub(crate) fn read_bytes(buf: &[u8], pos: usize, len: usize) -> Option<(&[u8], usize)> {
    let end = pos.checked_add(len)?;
    buf.get(pos..end).map(|bytes| (bytes, end))
}

fn read_array<const N: usize>(buf: &[u8], pos: usize) -> Option<([u8; N], usize)> {
    let (bytes, next) = read_bytes(buf, pos, N)?;
    let mut array = [0u8; N];
    array.copy_from_slice(bytes);
    Some((array, next))
}

pub(crate) fn read_u16(buf: &[u8], pos: usize) -> Option<(u16, usize)> {
    read_array(buf, pos).map(|(b, next)| (u16::from_le_bytes(b), next))
}

pub(crate) fn read_i32(buf: &[u8], pos: usize) -> Option<(i32, usize)> {
    read_array(buf, pos).map(|(b, next)| (i32::from_le_bytes(b), next))
}

pub(crate) fn read_u32(buf: &[u8], pos: usize) -> Option<(u32, usize)> {
    read_array(buf, pos).map(|(b, next)| (u32::from_le_bytes(b), next))
}

pub(crate) fn read_u64(buf: &[u8], pos: usize) -> Option<(u64, usize)> {
    read_array(buf, pos).map(|(b, next)| (u64::from_le_bytes(b), next))
}
