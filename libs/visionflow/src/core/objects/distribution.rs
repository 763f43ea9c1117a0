use crate::core::context::Context;
use crate::core::error::{Result, VxError};
use crate::core::handles::object_handle;
use crate::core::memory::{Memory, Plane};
use crate::core::reference::{RefHeader, RefId, Scope, VxObject};
use crate::core::types::RefKind;

/// Histogram over `[offset, offset + range)` with equal-width bins.
pub(crate) struct DistributionState {
    pub bins: usize,
    pub offset: i32,
    pub range: u32,
    pub memory: Memory,
}

impl DistributionState {
    pub fn new(bins: usize, offset: i32, range: u32) -> Self {
        let memory = Memory::new(vec![Plane::new(4, &[bins])]);
        Self { bins, offset, range, memory }
    }
}

object_handle! {
    /// Handle to a histogram object.
    Distribution, Distribution
}

impl Distribution {
    pub fn bins(&self) -> Result<usize> {
        self.ctx.with_distribution(self.id, |d| Ok(d.bins))
    }

    pub fn offset(&self) -> Result<i32> {
        self.ctx.with_distribution(self.id, |d| Ok(d.offset))
    }

    pub fn range(&self) -> Result<u32> {
        self.ctx.with_distribution(self.id, |d| Ok(d.range))
    }

    /// Input values spanned by one bin.
    pub fn window(&self) -> Result<u32> {
        self.ctx.with_distribution(self.id, |d| Ok(d.range / d.bins as u32))
    }

    pub fn read_frequencies(&self) -> Result<Vec<u32>> {
        self.ctx.with_distribution_mut(self.id, |d, header| {
            d.memory.allocate()?;
            header.read_count += 1;
            Ok(d.memory
                .data(0)?
                .chunks_exact(4)
                .map(|c| u32::from_ne_bytes([c[0], c[1], c[2], c[3]]))
                .collect())
        })
    }

    pub fn write_frequencies(&self, freqs: &[u32]) -> Result<()> {
        self.ctx.with_distribution_mut(self.id, |d, header| {
            if freqs.len() != d.bins {
                return Err(VxError::InvalidParameters(format!(
                    "{} frequencies for {} bins",
                    freqs.len(),
                    d.bins
                )));
            }
            d.memory.allocate()?;
            let dst = d.memory.data_mut(0)?;
            for (i, v) in freqs.iter().enumerate() {
                dst[i * 4..i * 4 + 4].copy_from_slice(&v.to_ne_bytes());
            }
            header.write_count += 1;
            Ok(())
        })?;
        self.ctx.contaminate(self.id);
        Ok(())
    }
}

impl Context {
    pub fn create_distribution(&self, bins: usize, offset: i32, range: u32) -> Result<Distribution> {
        if bins == 0 || range == 0 {
            return Err(VxError::InvalidParameters(format!(
                "distribution with {bins} bins over range {range}"
            )));
        }
        if range as usize % bins != 0 {
            return Err(VxError::InvalidParameters(format!(
                "range {range} does not divide into {bins} bins"
            )));
        }
        let id = self.insert_object(
            RefHeader::new(RefKind::Distribution, Scope::Context),
            VxObject::Distribution(DistributionState::new(bins, offset, range)),
        );
        Ok(Distribution::from_parts(self.clone(), id))
    }

    pub(crate) fn with_distribution<T>(
        &self,
        id: RefId,
        f: impl FnOnce(&DistributionState) -> Result<T>,
    ) -> Result<T> {
        let refs = self.refs();
        f(refs.get(id)?.object.as_distribution()?)
    }

    pub(crate) fn with_distribution_mut<T>(
        &self,
        id: RefId,
        f: impl FnOnce(&mut DistributionState, &mut RefHeader) -> Result<T>,
    ) -> Result<T> {
        let mut refs = self.refs();
        let crate::core::reference::Entry { header, object } = refs.get_mut(id)?;
        f(object.as_distribution_mut()?, header)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_and_round_trip() {
        let ctx = Context::new().unwrap();
        let d = ctx.create_distribution(16, 0, 256).unwrap();
        assert_eq!(d.window().unwrap(), 16);

        let freqs: Vec<u32> = (0..16).collect();
        d.write_frequencies(&freqs).unwrap();
        assert_eq!(d.read_frequencies().unwrap(), freqs);
    }

    #[test]
    fn rejects_nondividing_range() {
        let ctx = Context::new().unwrap();
        assert!(matches!(
            ctx.create_distribution(10, 0, 256),
            Err(VxError::InvalidParameters(_))
        ));
        assert!(matches!(ctx.create_distribution(0, 0, 256), Err(VxError::InvalidParameters(_))));
    }
}
