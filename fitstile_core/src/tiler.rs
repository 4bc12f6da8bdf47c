use crate::error::{CodecError, Result};

/// One tile of a partitioned array.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tile {
    /// Position in row-major tile order; also the row of the tile table.
    pub index: usize,
    /// Tile coordinate along each axis.
    pub coords: Vec<usize>,
    /// Array coordinate of the tile's first sample.
    pub offset: Vec<usize>,
    /// Effective extent per axis, truncated at the array boundary.
    pub shape: Vec<usize>,
}

/// A contiguous run of samples belonging to one tile row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowSpan {
    /// Flat sample index in the array.
    pub start: usize,
    /// Number of samples.
    pub len: usize,
}

impl Tile {
    /// Number of samples in the tile.
    pub fn len(&self) -> usize {
        self.shape.iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Rows of this tile as spans of the flattened array, in row-major order.
    pub fn row_spans(&self, array_shape: &[usize]) -> Vec<RowSpan> {
        let ndim = array_shape.len();
        if ndim == 0 || self.is_empty() {
            return Vec::new();
        }
        let strides = strides(array_shape);
        let row_len = self.shape[ndim - 1];
        let outer = &self.shape[..ndim - 1];
        let rows: usize = outer.iter().product();

        let mut spans = Vec::with_capacity(rows);
        let mut local = vec![0usize; ndim - 1];
        for _ in 0..rows {
            let start = (0..ndim - 1)
                .map(|d| (self.offset[d] + local[d]) * strides[d])
                .sum::<usize>()
                + self.offset[ndim - 1];
            spans.push(RowSpan { start, len: row_len });

            // odometer increment over the outer axes
            for d in (0..ndim - 1).rev() {
                local[d] += 1;
                if local[d] < outer[d] {
                    break;
                }
                local[d] = 0;
            }
        }
        spans
    }
}

/// Partition of an n-d array into rectangular tiles.
///
/// Tiles are enumerated row-major over their tile coordinates, matching the
/// order of rows in the container's tile table. The last tile along an axis
/// is truncated rather than padded when the extent is not a multiple of the
/// tile size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileGrid {
    array_shape: Vec<usize>,
    tile_shape: Vec<usize>,
    grid_shape: Vec<usize>,
}

impl TileGrid {
    pub fn new(array_shape: &[usize], tile_shape: &[usize]) -> Result<Self> {
        if array_shape.is_empty() {
            return Err(CodecError::InvalidTileShape(
                "array must have at least one axis".into(),
            ));
        }
        if tile_shape.len() != array_shape.len() {
            return Err(CodecError::InvalidTileShape(format!(
                "tile shape {:?} has rank {} but array shape {:?} has rank {}",
                tile_shape,
                tile_shape.len(),
                array_shape,
                array_shape.len()
            )));
        }
        let empty = array_shape.contains(&0);
        for (axis, (&t, &a)) in tile_shape.iter().zip(array_shape).enumerate() {
            if t == 0 {
                return Err(CodecError::InvalidTileShape(format!(
                    "tile extent along axis {axis} is zero"
                )));
            }
            if !empty && t > a {
                return Err(CodecError::InvalidTileShape(format!(
                    "tile extent {t} along axis {axis} exceeds array extent {a}"
                )));
            }
        }
        let grid_shape = array_shape
            .iter()
            .zip(tile_shape)
            .map(|(&a, &t)| a.div_ceil(t))
            .collect();
        Ok(Self {
            array_shape: array_shape.to_vec(),
            tile_shape: tile_shape.to_vec(),
            grid_shape,
        })
    }

    pub fn array_shape(&self) -> &[usize] {
        &self.array_shape
    }

    /// Nominal tile shape.
    pub fn tile_shape(&self) -> &[usize] {
        &self.tile_shape
    }

    /// Number of tiles along each axis.
    pub fn grid_shape(&self) -> &[usize] {
        &self.grid_shape
    }

    pub fn tile_count(&self) -> usize {
        self.grid_shape.iter().product()
    }

    /// Tile at row-major position `index`.
    pub fn tile(&self, index: usize) -> Option<Tile> {
        if index >= self.tile_count() {
            return None;
        }
        let ndim = self.grid_shape.len();
        let mut coords = vec![0usize; ndim];
        let mut rem = index;
        for d in (0..ndim).rev() {
            coords[d] = rem % self.grid_shape[d];
            rem /= self.grid_shape[d];
        }
        let offset: Vec<usize> = coords
            .iter()
            .zip(&self.tile_shape)
            .map(|(&c, &t)| c * t)
            .collect();
        let shape = offset
            .iter()
            .zip(&self.tile_shape)
            .zip(&self.array_shape)
            .map(|((&o, &t), &a)| t.min(a - o))
            .collect();
        Some(Tile {
            index,
            coords,
            offset,
            shape,
        })
    }

    /// All tiles in row-major order.
    pub fn tiles(&self) -> impl Iterator<Item = Tile> + '_ {
        (0..self.tile_count()).filter_map(move |i| self.tile(i))
    }
}

/// Row-major element strides of `shape`.
pub fn strides(shape: &[usize]) -> Vec<usize> {
    let mut strides = vec![1usize; shape.len()];
    for d in (0..shape.len().saturating_sub(1)).rev() {
        strides[d] = strides[d + 1] * shape[d + 1];
    }
    strides
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coverage(array_shape: &[usize], tile_shape: &[usize]) -> Vec<u32> {
        let grid = TileGrid::new(array_shape, tile_shape).unwrap();
        let mut hits = vec![0u32; array_shape.iter().product()];
        for tile in grid.tiles() {
            let spans = tile.row_spans(array_shape);
            assert_eq!(spans.iter().map(|s| s.len).sum::<usize>(), tile.len());
            for span in spans {
                for h in &mut hits[span.start..span.start + span.len] {
                    *h += 1;
                }
            }
        }
        hits
    }

    #[test]
    fn test_exact_partition() {
        let grid = TileGrid::new(&[12, 12], &[4, 4]).unwrap();
        assert_eq!(grid.grid_shape(), &[3, 3]);
        assert_eq!(grid.tile_count(), 9);
        assert!(grid.tiles().all(|t| t.shape == vec![4, 4]));
        let t = grid.tile(5).unwrap();
        assert_eq!(t.coords, vec![1, 2]);
        assert_eq!(t.offset, vec![4, 8]);
    }

    #[test]
    fn test_boundary_tiles_are_truncated() {
        let grid = TileGrid::new(&[15, 15, 15], &[5, 7, 1]).unwrap();
        assert_eq!(grid.grid_shape(), &[3, 3, 15]);
        let last = grid.tile(grid.tile_count() - 1).unwrap();
        assert_eq!(last.offset, vec![10, 14, 14]);
        assert_eq!(last.shape, vec![5, 1, 1]);

        // effective extents along each axis sum to the array extent
        let axis1: usize = (0..3)
            .map(|c| grid.tile(c * 15).unwrap().shape[1])
            .sum();
        assert_eq!(axis1, 15);
    }

    #[test]
    fn test_every_coordinate_covered_once() {
        for (shape, tile) in [
            (vec![10], vec![3]),
            (vec![12, 12], vec![4, 5]),
            (vec![15, 15], vec![5, 1]),
            (vec![15, 15, 15], vec![1, 5, 4]),
            (vec![7, 9], vec![7, 9]),
        ] {
            let hits = coverage(&shape, &tile);
            assert!(hits.iter().all(|&h| h == 1), "{shape:?} / {tile:?}");
        }
    }

    #[test]
    fn test_row_spans_order() {
        let grid = TileGrid::new(&[4, 6], &[2, 4]).unwrap();
        let t = grid.tile(1).unwrap();
        assert_eq!(t.shape, vec![2, 2]);
        assert_eq!(
            t.row_spans(grid.array_shape()),
            vec![RowSpan { start: 4, len: 2 }, RowSpan { start: 10, len: 2 }]
        );
    }

    #[test]
    fn test_invalid_tile_shapes() {
        for (shape, tile) in [
            (vec![12, 12], vec![0, 4]),
            (vec![12, 12], vec![4]),
            (vec![12, 12], vec![13, 4]),
            (vec![], vec![]),
        ] {
            let err = TileGrid::new(&shape, &tile).unwrap_err();
            assert!(matches!(err, CodecError::InvalidTileShape(_)), "{shape:?}/{tile:?}");
        }
    }

    #[test]
    fn test_empty_array_has_no_tiles() {
        let grid = TileGrid::new(&[0, 5], &[4, 5]).unwrap();
        assert_eq!(grid.tile_count(), 0);
        assert_eq!(grid.tiles().count(), 0);
    }

    #[test]
    fn test_strides() {
        assert_eq!(strides(&[3, 4, 5]), vec![20, 5, 1]);
        assert_eq!(strides(&[7]), vec![1]);
    }
}
