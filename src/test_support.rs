//! Synthetic BAM records for unit tests.

/// Record with an empty sequence and no CIGAR.
pub(crate) fn record(name: &str, flag: u16, ref_id: i32, pos: i32) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(&ref_id.to_le_bytes());
    body.extend_from_slice(&pos.to_le_bytes());
    body.push((name.len() + 1) as u8); // l_read_name
    body.push(if ref_id < 0 { 0 } else { 60 }); // mapq
    body.extend_from_slice(&4680u16.to_le_bytes()); // bin
    body.extend_from_slice(&0u16.to_le_bytes()); // n_cigar_op
    body.extend_from_slice(&flag.to_le_bytes());
    body.extend_from_slice(&0u32.to_le_bytes()); // l_seq
    body.extend_from_slice(&(-1i32).to_le_bytes()); // next_refID
    body.extend_from_slice(&(-1i32).to_le_bytes()); // next_pos
    body.extend_from_slice(&0i32.to_le_bytes()); // tlen
    body.extend_from_slice(name.as_bytes());
    body.push(0);

    let mut record = (body.len() as i32).to_le_bytes().to_vec();
    record.extend(body);
    record
}

/// Unplaced record, as found after the last indexed chunk.
pub(crate) fn unplaced(name: &str, flag: u16) -> Vec<u8> {
    record(name, flag, -1, -1)
}

/// One record per flag, named `read0`, `read1`, ...; unmapped flags are unplaced.
pub(crate) fn records_with_flags(flags: &[u16]) -> Vec<Vec<u8>> {
    flags
        .iter()
        .enumerate()
        .map(|(i, &flag)| {
            let name = format!("read{i}");
            if flag & crate::record::flags::UNMAPPED != 0 {
                unplaced(&name, flag)
            } else {
                record(&name, flag, 0, 100 * i as i32)
            }
        })
        .collect()
}
