use std::collections::{BTreeMap, HashMap};
use std::sync::LazyLock;

use tracing::debug;

use super::{regions, Band, PhyVersion};
use crate::core::{Error, Result};

/// Revision returned by [`get_latest`]
pub const LATEST_SUPPORTED_VERSION: PhyVersion = PhyVersion::Rp001V1_1RevB;

static REGISTRY: LazyLock<BandRegistry> = LazyLock::new(BandRegistry::build);

/// Catalogue of every band keyed by region id and revision
#[derive(Debug)]
pub struct BandRegistry {
    bands: HashMap<&'static str, BTreeMap<PhyVersion, Band>>,
}

impl BandRegistry {
    /// Returns the process-wide registry, building it on first use
    pub fn global() -> &'static BandRegistry {
        &REGISTRY
    }

    fn build() -> Self {
        let mut bands: HashMap<&'static str, BTreeMap<PhyVersion, Band>> = HashMap::new();
        for band in regions::all() {
            bands.entry(band.id).or_default().insert(band.version, band);
        }
        debug!(regions = bands.len(), "Band registry built");
        BandRegistry { bands }
    }

    /// Looks up a band by region id and revision
    pub fn get(&self, region: &str, version: PhyVersion) -> Result<&Band> {
        self.bands
            .get(region)
            .and_then(|versions| versions.get(&version))
            .ok_or_else(|| Error::band_not_found(region, version))
    }

    /// Looks up a band at [`LATEST_SUPPORTED_VERSION`]
    pub fn get_latest(&self, region: &str) -> Result<&Band> {
        self.get(region, LATEST_SUPPORTED_VERSION)
    }

    /// Region ids in the catalogue, sorted
    pub fn regions(&self) -> Vec<&'static str> {
        let mut regions: Vec<_> = self.bands.keys().copied().collect();
        regions.sort_unstable();
        regions
    }

    /// Revisions a region is defined for, ascending
    pub fn versions(&self, region: &str) -> Vec<PhyVersion> {
        self.bands
            .get(region)
            .map(|versions| versions.keys().copied().collect())
            .unwrap_or_default()
    }
}

/// Looks up a band in the global registry
pub fn get(region: &str, version: PhyVersion) -> Result<&'static Band> {
    BandRegistry::global().get(region, version)
}

/// Looks up a band at the latest supported revision in the global registry
pub fn get_latest(region: &str) -> Result<&'static Band> {
    BandRegistry::global().get_latest(region)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::band::{AS_923_2, CN_470_510_26_A, EU_863_870, US_902_928};

    #[test]
    fn test_get_existing() {
        let band = get(EU_863_870, PhyVersion::Rp001V1_0_2RevB).unwrap();
        assert_eq!(band.id, EU_863_870);
        assert_eq!(band.version, PhyVersion::Rp001V1_0_2RevB);
    }

    #[test]
    fn test_get_latest() {
        let band = get_latest(US_902_928).unwrap();
        assert_eq!(band.version, LATEST_SUPPORTED_VERSION);
    }

    #[test]
    fn test_not_found() {
        assert!(matches!(
            get("XX_000_000", PhyVersion::Rp002V1_0_0),
            Err(Error::BandNotFound { .. })
        ));
        assert!(matches!(
            get(AS_923_2, PhyVersion::Rp001V1_0_2),
            Err(Error::BandNotFound { .. })
        ));
        // only defined at RP002
        assert!(matches!(
            get_latest(CN_470_510_26_A),
            Err(Error::BandNotFound { .. })
        ));
    }

    #[test]
    fn test_catalogue() {
        let registry = BandRegistry::global();
        let regions = registry.regions();
        assert_eq!(regions.len(), 11);
        assert!(regions.contains(&"KR_920_923"));
        assert_eq!(registry.versions(EU_863_870).len(), PhyVersion::ALL.len());
        assert_eq!(registry.versions(CN_470_510_26_A), vec![PhyVersion::Rp002V1_0_0]);
        assert!(registry.versions("XX").is_empty());
    }

    #[test]
    fn test_same_instance() {
        let a = get_latest(EU_863_870).unwrap();
        let b = get_latest(EU_863_870).unwrap();
        assert!(std::ptr::eq(a, b));
    }
}
