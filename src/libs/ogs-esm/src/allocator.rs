//! PTI / EBI allocation
//!
//! Identifiers are scoped to one session and handed out smallest-first.
//! A bound identifier is never returned again until it is released.

use std::collections::BTreeSet;

use crate::config::EbiRange;
use crate::error::{EsmError, EsmResult, IdKind, Target};
use crate::types::{Ebi, Pti};

/// Per-session identifier allocator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdAllocator {
    pti: BTreeSet<Pti>,
    ebi: BTreeSet<Ebi>,
    default_range: EbiRange,
}

impl Default for IdAllocator {
    fn default() -> Self {
        Self::new(EbiRange::default())
    }
}

impl IdAllocator {
    /// Create an allocator preferring `default_range` for default bearers.
    ///
    /// The range is clipped to the valid EBI values; a range with nothing
    /// left after clipping is replaced by the default one.
    pub fn new(default_range: EbiRange) -> Self {
        let clipped = EbiRange {
            first: default_range.first.max(Ebi::MIN),
            last: default_range.last.min(Ebi::MAX),
        };
        let default_range = if clipped.first > clipped.last {
            log::error!(
                "Default bearer EBI range {}..={} unusable, using {}..={}",
                default_range.first,
                default_range.last,
                EbiRange::default().first,
                EbiRange::default().last
            );
            EbiRange::default()
        } else {
            clipped
        };
        Self {
            pti: BTreeSet::new(),
            ebi: BTreeSet::new(),
            default_range,
        }
    }

    /// EBIs preferred for default bearers
    pub fn default_range(&self) -> EbiRange {
        self.default_range
    }

    /// Allocate the smallest free PTI
    pub fn allocate_pti(&mut self) -> EsmResult<Pti> {
        let pti = (Pti::MIN..=Pti::MAX)
            .map(Pti)
            .find(|pti| !self.pti.contains(pti))
            .ok_or(EsmError::Exhausted(IdKind::Pti))?;
        self.pti.insert(pti);
        Ok(pti)
    }

    /// Bind a PTI chosen by the UE
    pub fn reserve_pti(&mut self, pti: Pti) -> EsmResult<()> {
        if !pti.is_assignable() {
            return Err(EsmError::NotFound(Target::Pti(pti)));
        }
        if !self.pti.insert(pti) {
            return Err(EsmError::Duplicate(Target::Pti(pti)));
        }
        Ok(())
    }

    /// Release a bound PTI
    pub fn release_pti(&mut self, pti: Pti) -> EsmResult<()> {
        if self.pti.remove(&pti) {
            Ok(())
        } else {
            log::error!("Release of unbound {}", pti);
            Err(EsmError::NotFound(Target::Pti(pti)))
        }
    }

    /// Allocate an EBI from the full range, preferring `preferred` when free
    pub fn allocate_ebi(&mut self, preferred: Option<Ebi>) -> EsmResult<Ebi> {
        self.allocate_ebi_in(EbiRange::FULL, preferred)
            .ok_or(EsmError::Exhausted(IdKind::Ebi))
    }

    /// Allocate an EBI for a default bearer.
    ///
    /// The default-bearer range is tried first. Once dedicated bearers have
    /// taken it, any free EBI of the full range is used.
    pub fn allocate_default_ebi(&mut self, preferred: Option<Ebi>) -> EsmResult<Ebi> {
        if let Some(ebi) = self.allocate_ebi_in(self.default_range, preferred) {
            return Ok(ebi);
        }
        let ebi = self
            .allocate_ebi_in(EbiRange::FULL, preferred)
            .ok_or(EsmError::Exhausted(IdKind::DefaultEbi))?;
        log::debug!(
            "Default bearer range {}..={} taken, {} used",
            self.default_range.first,
            self.default_range.last,
            ebi
        );
        Ok(ebi)
    }

    fn allocate_ebi_in(&mut self, range: EbiRange, preferred: Option<Ebi>) -> Option<Ebi> {
        let free = |ebi: &Ebi| !self.ebi.contains(ebi);
        let ebi = preferred
            .filter(|ebi| range.contains(*ebi) && free(ebi))
            .or_else(|| (range.first..=range.last).map(Ebi).find(free))?;
        self.ebi.insert(ebi);
        Some(ebi)
    }

    /// Release a bound EBI
    pub fn release_ebi(&mut self, ebi: Ebi) -> EsmResult<()> {
        if self.ebi.remove(&ebi) {
            Ok(())
        } else {
            log::error!("Release of unbound {}", ebi);
            Err(EsmError::NotFound(Target::Ebi(ebi)))
        }
    }

    /// True if the PTI is bound
    pub fn pti_in_use(&self, pti: Pti) -> bool {
        self.pti.contains(&pti)
    }

    /// True if the EBI is bound
    pub fn ebi_in_use(&self, ebi: Ebi) -> bool {
        self.ebi.contains(&ebi)
    }

    /// Bound PTIs in ascending order
    pub fn ptis(&self) -> impl Iterator<Item = Pti> + '_ {
        self.pti.iter().copied()
    }

    /// Bound EBIs in ascending order
    pub fn ebis(&self) -> impl Iterator<Item = Ebi> + '_ {
        self.ebi.iter().copied()
    }

    /// True if nothing is bound
    pub fn is_empty(&self) -> bool {
        self.pti.is_empty() && self.ebi.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pti_smallest_first() {
        let mut alloc = IdAllocator::default();
        assert_eq!(alloc.allocate_pti().unwrap(), Pti(1));
        assert_eq!(alloc.allocate_pti().unwrap(), Pti(2));
        alloc.release_pti(Pti(1)).unwrap();
        assert_eq!(alloc.allocate_pti().unwrap(), Pti(1));
        assert_eq!(alloc.allocate_pti().unwrap(), Pti(3));
    }

    #[test]
    fn test_pti_exhaustion_never_wraps() {
        let mut alloc = IdAllocator::default();
        for expected in Pti::MIN..=Pti::MAX {
            assert_eq!(alloc.allocate_pti().unwrap(), Pti(expected));
        }
        assert_eq!(alloc.allocate_pti(), Err(EsmError::Exhausted(IdKind::Pti)));
        assert!(!alloc.pti_in_use(Pti::UNASSIGNED));
    }

    #[test]
    fn test_reserve_pti() {
        let mut alloc = IdAllocator::default();
        alloc.reserve_pti(Pti(7)).unwrap();
        assert_eq!(alloc.reserve_pti(Pti(7)), Err(EsmError::Duplicate(Target::Pti(Pti(7)))));
        assert_eq!(alloc.reserve_pti(Pti(0)), Err(EsmError::NotFound(Target::Pti(Pti(0)))));
        assert_eq!(alloc.reserve_pti(Pti(255)), Err(EsmError::NotFound(Target::Pti(Pti(255)))));
        assert_eq!(alloc.allocate_pti().unwrap(), Pti(1));
    }

    #[test]
    fn test_release_unbound_is_reported() {
        let mut alloc = IdAllocator::default();
        assert_eq!(alloc.release_pti(Pti(9)), Err(EsmError::NotFound(Target::Pti(Pti(9)))));
        assert_eq!(alloc.release_ebi(Ebi(9)), Err(EsmError::NotFound(Target::Ebi(Ebi(9)))));
        assert!(alloc.is_empty());
    }

    #[test]
    fn test_ebi_preferred() {
        let mut alloc = IdAllocator::default();
        assert_eq!(alloc.allocate_ebi(Some(Ebi(9))).unwrap(), Ebi(9));
        // Taken: falls back to the smallest free value
        assert_eq!(alloc.allocate_ebi(Some(Ebi(9))).unwrap(), Ebi(5));
        // Out of range preference is ignored
        assert_eq!(alloc.allocate_ebi(Some(Ebi(3))).unwrap(), Ebi(6));
    }

    #[test]
    fn test_ebi_exhaustion() {
        let mut alloc = IdAllocator::default();
        for expected in Ebi::MIN..=Ebi::MAX {
            assert_eq!(alloc.allocate_ebi(None).unwrap(), Ebi(expected));
        }
        assert_eq!(alloc.allocate_ebi(None), Err(EsmError::Exhausted(IdKind::Ebi)));
        alloc.release_ebi(Ebi(11)).unwrap();
        assert_eq!(alloc.allocate_ebi(None).unwrap(), Ebi(11));
    }

    #[test]
    fn test_default_ebi_range() {
        let mut alloc = IdAllocator::new(EbiRange { first: 5, last: 6 });
        assert_eq!(alloc.allocate_default_ebi(None).unwrap(), Ebi(5));
        assert_eq!(alloc.allocate_ebi(None).unwrap(), Ebi(6));
        // Range taken by a dedicated bearer: the full range is used
        assert_eq!(alloc.allocate_default_ebi(None).unwrap(), Ebi(7));
        assert_eq!(alloc.allocate_ebi(None).unwrap(), Ebi(8));
        alloc.release_ebi(Ebi(5)).unwrap();
        assert_eq!(alloc.allocate_default_ebi(Some(Ebi(12))).unwrap(), Ebi(5));
    }

    #[test]
    fn test_default_ebi_exhaustion() {
        let mut alloc = IdAllocator::default();
        for _ in Ebi::MIN..=Ebi::MAX {
            alloc.allocate_ebi(None).unwrap();
        }
        assert_eq!(
            alloc.allocate_default_ebi(None),
            Err(EsmError::Exhausted(IdKind::DefaultEbi))
        );
    }

    #[test]
    fn test_unusable_default_range_is_clipped() {
        let alloc = IdAllocator::new(EbiRange { first: 1, last: 6 });
        assert_eq!(alloc.default_range(), EbiRange { first: 5, last: 6 });

        let mut alloc = IdAllocator::new(EbiRange { first: 1, last: 3 });
        assert_eq!(alloc.default_range(), EbiRange::default());
        assert_eq!(alloc.allocate_default_ebi(None).unwrap(), Ebi(5));
        assert!(alloc.ebis().all(|ebi| ebi.is_valid()));
    }
}
