use async_trait::async_trait;
use futures::{AsyncRead, AsyncWrite};

use crate::{
    dtype::PrimitiveType,
    errors::{Error, Result},
    extio::{ExtendedAsyncRead, ExtendedAsyncWrite, Serialize},
    geom::Bounds,
};

/// The shape and element type of a dataset, or of a region (hyperslab) within one.
///
/// A dataspace is only checked against a dataset's extent when it is used in a write or read,
/// so a hyperslab can be built before the dataset it addresses exists.
///
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Dataspace {
    extent: Vec<u64>,
    offset: Vec<i64>,
    dtype: PrimitiveType,
}

impl Dataspace {
    /// A dataspace covering `dims` from the origin.
    ///
    pub fn simple(dims: &[u64], dtype: PrimitiveType) -> Result<Self> {
        Self::sub(&vec![0; dims.len()], dims, dtype)
    }

    /// A hyperslab of `extents` starting at `offsets`.
    ///
    pub fn sub(offsets: &[i64], extents: &[u64], dtype: PrimitiveType) -> Result<Self> {
        if extents.is_empty() {
            return Err(Error::InvalidShape(String::from(
                "a dataspace needs at least one dimension",
            )));
        }
        if offsets.len() != extents.len() {
            return Err(Error::InvalidShape(format!(
                "{} offsets given for {} dimensions",
                offsets.len(),
                extents.len()
            )));
        }
        if let Some(axis) = extents.iter().position(|&extent| extent == 0) {
            return Err(Error::InvalidShape(format!("dimension {axis} has zero extent")));
        }

        let dataspace = Self {
            extent: extents.to_vec(),
            offset: offsets.to_vec(),
            dtype,
        };

        // Element count and byte size are derived on demand, but must be representable
        dataspace.checked_byte_size().ok_or_else(|| {
            Error::InvalidShape(format!("dataspace {extents:?} is too large to address"))
        })?;

        Ok(dataspace)
    }

    pub fn simple_2d(rows: u64, cols: u64, dtype: PrimitiveType) -> Result<Self> {
        Self::simple(&[rows, cols], dtype)
    }

    pub fn sub_2d(
        row_offset: i64,
        rows: u64,
        col_offset: i64,
        cols: u64,
        dtype: PrimitiveType,
    ) -> Result<Self> {
        Self::sub(&[row_offset, col_offset], &[rows, cols], dtype)
    }

    pub fn dimension_count(&self) -> usize {
        self.extent.len()
    }

    pub fn extent(&self) -> &[u64] {
        &self.extent
    }

    pub fn offset(&self) -> &[i64] {
        &self.offset
    }

    pub fn element_type(&self) -> PrimitiveType {
        self.dtype
    }

    pub fn element_count(&self) -> u64 {
        self.extent.iter().product()
    }

    pub fn byte_size(&self) -> usize {
        self.element_count() as usize * self.dtype.size()
    }

    fn checked_byte_size(&self) -> Option<usize> {
        let mut count = 1_u64;
        for &extent in &self.extent {
            count = count.checked_mul(extent)?;
        }

        usize::try_from(count).ok()?.checked_mul(self.dtype.size())
    }

    /// Whether this dataspace starts at the origin.
    pub fn is_full(&self) -> bool {
        self.offset.iter().all(|&offset| offset == 0)
    }

    /// Check that this dataspace, taken as a hyperslab, lies inside a dataset of shape
    /// `parent`.
    ///
    pub fn check_within(&self, parent: &Dataspace) -> Result<()> {
        if self.dimension_count() != parent.dimension_count() {
            return Err(Error::OutOfBounds(format!(
                "region has {} dimensions, dataset has {}",
                self.dimension_count(),
                parent.dimension_count()
            )));
        }
        for axis in 0..self.dimension_count() {
            let offset = self.offset[axis];
            let extent = self.extent[axis];
            let limit = parent.extent[axis];
            let fits = offset >= 0
                && (offset as u64)
                    .checked_add(extent)
                    .map_or(false, |end| end <= limit);
            if !fits {
                return Err(Error::OutOfBounds(format!(
                    "axis {axis}: offset {offset} + extent {extent} exceeds 0..{limit}"
                )));
            }
        }

        Ok(())
    }

    /// The element addresses covered by this dataspace.
    ///
    /// Only meaningful once `check_within` has passed, so every offset is non-negative.
    ///
    pub(crate) fn bounds(&self) -> Bounds {
        let start = self.offset.iter().map(|&offset| offset as u64).collect::<Vec<_>>();
        let end = start
            .iter()
            .zip(&self.extent)
            .map(|(start, extent)| start + extent)
            .collect();

        Bounds::new(start, end)
    }
}

#[async_trait]
impl Serialize for Dataspace {
    async fn write_to(&self, stream: &mut (impl AsyncWrite + Unpin + Send)) -> Result<()> {
        stream.write_byte(self.dtype.code()).await?;
        stream.write_u32(self.extent.len() as u32).await?;
        for (extent, offset) in self.extent.iter().zip(&self.offset) {
            stream.write_u64(*extent).await?;
            stream.write_i64(*offset).await?;
        }

        Ok(())
    }

    async fn read_from(stream: &mut (impl AsyncRead + Unpin + Send)) -> Result<Self> {
        let dtype = PrimitiveType::from_code(stream.read_byte().await?)?;
        let rank = stream.read_u32().await? as usize;
        let mut extent = Vec::new();
        let mut offset = Vec::new();
        for _ in 0..rank {
            extent.push(stream.read_u64().await?);
            offset.push(stream.read_i64().await?);
        }

        Self::sub(&offset, &extent, dtype)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use futures::io::Cursor;

    #[test]
    fn test_simple() -> Result<()> {
        for dims in [vec![7], vec![32, 150], vec![2, 3, 4, 5]] {
            let space = Dataspace::simple(&dims, PrimitiveType::Float32)?;
            assert_eq!(space.dimension_count(), dims.len());
            assert_eq!(space.extent(), &dims[..]);
            assert!(space.is_full());
        }

        let space = Dataspace::simple_2d(32, 150, PrimitiveType::Float32)?;
        assert_eq!(space.element_count(), 4800);
        assert_eq!(space.byte_size(), 19200);
        assert_eq!(space.offset(), &[0, 0]);
        assert_eq!(space.element_type(), PrimitiveType::Float32);

        Ok(())
    }

    #[test]
    fn test_invalid_shapes() {
        assert!(matches!(
            Dataspace::simple(&[4, 0], PrimitiveType::Int32),
            Err(Error::InvalidShape(_))
        ));
        assert!(matches!(
            Dataspace::simple(&[], PrimitiveType::Int32),
            Err(Error::InvalidShape(_))
        ));
        assert!(matches!(
            Dataspace::sub(&[0], &[4, 4], PrimitiveType::Int32),
            Err(Error::InvalidShape(_))
        ));
        assert!(matches!(
            Dataspace::simple(&[u64::MAX, 2], PrimitiveType::Int32),
            Err(Error::InvalidShape(_))
        ));
    }

    #[test]
    fn test_check_within() -> Result<()> {
        let parent = Dataspace::simple_2d(32, 150, PrimitiveType::Float32)?;

        let column = Dataspace::sub_2d(0, 32, 149, 1, PrimitiveType::Float32)?;
        column.check_within(&parent)?;
        assert!(!column.is_full());

        let past_end = Dataspace::sub_2d(0, 32, 150, 1, PrimitiveType::Float32)?;
        assert!(matches!(
            past_end.check_within(&parent),
            Err(Error::OutOfBounds(_))
        ));

        let negative = Dataspace::sub_2d(-1, 2, 0, 1, PrimitiveType::Float32)?;
        assert!(matches!(
            negative.check_within(&parent),
            Err(Error::OutOfBounds(_))
        ));

        let wrong_rank = Dataspace::sub(&[0], &[1], PrimitiveType::Float32)?;
        assert!(matches!(
            wrong_rank.check_within(&parent),
            Err(Error::OutOfBounds(_))
        ));

        let huge = Dataspace::sub(&[i64::MAX, 0], &[u64::MAX / 8, 1], PrimitiveType::UInt8);
        if let Ok(huge) = huge {
            assert!(matches!(huge.check_within(&parent), Err(Error::OutOfBounds(_))));
        }

        Ok(())
    }

    #[test]
    fn test_bounds() -> Result<()> {
        let space = Dataspace::sub_2d(2, 3, 5, 1, PrimitiveType::Int8)?;
        let bounds = space.bounds();
        assert_eq!(bounds.start, vec![2, 5]);
        assert_eq!(bounds.end, vec![5, 6]);

        Ok(())
    }

    #[tokio::test]
    async fn test_serialize() -> Result<()> {
        let space = Dataspace::sub(&[1, 0, 4], &[2, 3, 4], PrimitiveType::UInt16)?;
        let mut buffer: Vec<u8> = Vec::new();
        space.write_to(&mut buffer).await?;

        let mut buffer = Cursor::new(buffer);
        assert_eq!(Dataspace::read_from(&mut buffer).await?, space);

        Ok(())
    }
}
