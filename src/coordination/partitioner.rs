//! Splits the table's data lines into fixed-size, contiguous chunks.

use crate::config::FIRST_DATA_LINE;
use crate::error::{Error, Result};
use crate::formats::Chunk;

/// Partition lines `[2, total_lines + 1)` into chunks of `chunk_size` lines
///
/// `total_lines` counts the header, so a table with a single data row has
/// `total_lines == 2`. The last chunk is clipped to the exact upper bound.
pub fn partition(total_lines: u64, chunk_size: u64) -> Result<Vec<Chunk>> {
    if total_lines <= 1 {
        return Err(Error::invalid_input(format!(
            "total lines must be greater than 1 including the header, got {total_lines}"
        )));
    }
    if chunk_size == 0 {
        return Err(Error::invalid_input("chunk size must be at least 1"));
    }

    let upper = total_lines + 1;
    let chunk_count = (upper - FIRST_DATA_LINE).div_ceil(chunk_size);
    let chunk_count = u32::try_from(chunk_count).map_err(|_| {
        Error::invalid_input(format!(
            "{total_lines} lines in chunks of {chunk_size} exceeds the maximum chunk count"
        ))
    })?;

    let chunks = (0..chunk_count)
        .map(|chunk_id| {
            let start_pos = FIRST_DATA_LINE + chunk_id as u64 * chunk_size;
            Chunk {
                chunk_id,
                start_pos,
                end_pos: (start_pos + chunk_size).min(upper),
            }
        })
        .collect();

    Ok(chunks)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bounds(chunks: &[Chunk]) -> Vec<(u64, u64)> {
        chunks.iter().map(|c| (c.start_pos, c.end_pos)).collect()
    }

    #[test]
    fn test_single_data_row() {
        let chunks = partition(2, 2).unwrap();
        assert_eq!(bounds(&chunks), vec![(2, 3)]);
        assert_eq!(chunks[0].chunk_id, 0);
    }

    #[test]
    fn test_last_chunk_is_clipped() {
        // Header plus 5 data rows on lines 2..=6
        let chunks = partition(6, 2).unwrap();
        assert_eq!(bounds(&chunks), vec![(2, 4), (4, 6), (6, 7)]);
    }

    #[test]
    fn test_exact_multiple() {
        let chunks = partition(5, 2).unwrap();
        assert_eq!(bounds(&chunks), vec![(2, 4), (4, 6)]);
    }

    #[test]
    fn test_chunks_are_contiguous_and_cover_all_rows() {
        for total in 2..40u64 {
            for size in 1..7u64 {
                let chunks = partition(total, size).unwrap();
                assert_eq!(chunks.first().unwrap().start_pos, 2);
                assert_eq!(chunks.last().unwrap().end_pos, total + 1);
                for pair in chunks.windows(2) {
                    assert_eq!(pair[0].end_pos, pair[1].start_pos);
                    assert_eq!(pair[0].chunk_id + 1, pair[1].chunk_id);
                }
                assert!(chunks.iter().all(|c| !c.is_empty() && c.len() <= size));
            }
        }
    }

    #[test]
    fn test_rejects_degenerate_input() {
        assert!(matches!(partition(1, 2), Err(Error::InvalidInput { .. })));
        assert!(matches!(partition(0, 2), Err(Error::InvalidInput { .. })));
        assert!(matches!(partition(10, 0), Err(Error::InvalidInput { .. })));
    }
}
