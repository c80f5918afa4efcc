//! Contiguous partitioning of record slices.

use crate::error::{BulkError, WriteResult};

/// Effective chunk size for `len` items.
///
/// With a positive `max_chunks` the size grows to
/// `max(max_chunks, len / size + 1)`. The arithmetic is kept as inherited
/// from earlier releases; it does not strictly bound the chunk count.
pub fn effective_chunk_size(
    len: usize,
    size: Option<usize>,
    max_chunks: Option<usize>,
) -> WriteResult<Option<usize>> {
    let Some(size) = size else {
        return Ok(None);
    };

    if size == 0 {
        return Err(BulkError::invalid(format!(
            "chunk size must be a positive value, received {size}"
        )));
    }

    match max_chunks {
        Some(max_chunks) if max_chunks > 0 => Ok(Some(max_chunks.max(len / size + 1))),
        _ => Ok(Some(size)),
    }
}

/// Splits `items` into ordered chunks of at most `size` items.
///
/// `size = None` returns the whole input as one chunk (possibly empty);
/// an empty input with a size yields no chunks.
pub fn chunk<T>(items: &[T], size: Option<usize>, max_chunks: Option<usize>) -> WriteResult<Vec<&[T]>> {
    match effective_chunk_size(items.len(), size, max_chunks)? {
        None => Ok(vec![items]),
        Some(size) => Ok(items.chunks(size).collect()),
    }
}

/// Start offset of every chunk within the slice it was cut from.
pub fn chunk_offsets<T>(chunks: &[&[T]]) -> Vec<usize> {
    let mut offset = 0;
    chunks
        .iter()
        .map(|chunk| {
            let start = offset;
            offset += chunk.len();
            start
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_concatenation_reproduces_input() {
        let items: Vec<u32> = (0..23).collect();
        for size in 1..=25 {
            let chunks = chunk(&items, Some(size), None).unwrap();
            let joined: Vec<u32> = chunks.concat();
            assert_eq!(joined, items, "size {size}");
            assert_eq!(chunks.len(), items.len().div_ceil(size), "size {size}");
            assert!(chunks.iter().all(|c| !c.is_empty() && c.len() <= size));
        }
    }

    #[test]
    fn test_unbounded_returns_single_chunk() {
        let items = vec!['a', 'b', 'c'];
        let chunks = chunk(&items, None, Some(4)).unwrap();
        assert_eq!(chunks, vec![&items[..]]);

        let empty: Vec<char> = Vec::new();
        let chunks = chunk(&empty, None, None).unwrap();
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].is_empty());
    }

    #[test]
    fn test_zero_size_is_rejected() {
        let items = vec![1, 2, 3];
        assert!(matches!(
            chunk(&items, Some(0), None),
            Err(BulkError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_empty_input_yields_no_chunks() {
        let empty: Vec<u8> = Vec::new();
        assert!(chunk(&empty, Some(10), None).unwrap().is_empty());
        assert!(chunk(&empty, Some(10), Some(5)).unwrap().is_empty());
    }

    #[test]
    fn test_max_chunks_grows_chunk_size() {
        let items: Vec<u32> = (0..100).collect();

        // max(5, 100 / 10 + 1) = 11
        assert_eq!(effective_chunk_size(100, Some(10), Some(5)).unwrap(), Some(11));
        assert_eq!(chunk(&items, Some(10), Some(5)).unwrap().len(), 10);

        // max(30, 11) = 30 -> 4 chunks
        let chunks = chunk(&items, Some(10), Some(30)).unwrap();
        assert_eq!(chunks.len(), 4);
        assert_eq!(chunks.concat(), items);

        // non-positive cap is ignored
        assert_eq!(effective_chunk_size(100, Some(10), Some(0)).unwrap(), Some(10));
    }

    #[test]
    fn test_chunk_offsets() {
        let items: Vec<u32> = (0..7).collect();
        let chunks = chunk(&items, Some(3), None).unwrap();
        assert_eq!(chunk_offsets(&chunks), vec![0, 3, 6]);
    }
}
