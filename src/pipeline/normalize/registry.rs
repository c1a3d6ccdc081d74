use super::zone::ZoneSpec;
use crate::common::error::{PipelineError, Result};
use crate::config::LocationConfig;
use std::collections::HashMap;

/// A canonical location with the zone its providers' naive local times are in.
#[derive(Debug, Clone)]
pub struct Site {
    pub key: String,
    pub zone: Option<ZoneSpec>,
}

/// Maps every provider-specific location id to one canonical location key,
/// so tide and astronomical records for the same place can be joined.
#[derive(Debug, Clone, Default)]
pub struct LocationRegistry {
    sites: Vec<Site>,
    aliases: HashMap<String, usize>,
}

impl LocationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_locations(locations: &[LocationConfig]) -> Result<Self> {
        let mut registry = Self::new();
        for loc in locations {
            let zone = match loc.timezone.as_deref() {
                Some(tz) => Some(ZoneSpec::parse(tz).ok_or_else(|| {
                    PipelineError::Config(format!(
                        "location '{}' has unknown timezone '{}'",
                        loc.key, tz
                    ))
                })?),
                None => None,
            };
            let mut aliases = vec![loc.key.as_str()];
            aliases.extend(loc.tide_station.as_deref());
            aliases.extend(loc.almanac_id.as_deref());
            registry.add_site(&loc.key, zone, &aliases)?;
        }
        Ok(registry)
    }

    /// Register a site under its key and any provider ids.
    pub fn add_site(&mut self, key: &str, zone: Option<ZoneSpec>, aliases: &[&str]) -> Result<()> {
        let key = key.trim();
        let index = self.sites.len();
        for alias in aliases.iter().map(|a| a.trim()).chain(std::iter::once(key)) {
            if let Some(existing) = self.aliases.get(alias) {
                if *existing != index {
                    return Err(PipelineError::Config(format!(
                        "location id '{}' maps to both '{}' and '{}'",
                        alias, self.sites[*existing].key, key
                    )));
                }
            }
            self.aliases.insert(alias.to_string(), index);
        }
        self.sites.push(Site {
            key: key.to_string(),
            zone,
        });
        Ok(())
    }

    /// Canonical site for a provider id. Unknown ids map to their trimmed text with no zone.
    pub fn resolve(&self, provider_id: &str) -> Site {
        let id = provider_id.trim();
        match self.aliases.get(id) {
            Some(index) => self.sites[*index].clone(),
            None => Site {
                key: id.to_string(),
                zone: None,
            },
        }
    }

    pub fn site(&self, key: &str) -> Option<&Site> {
        self.aliases.get(key.trim()).map(|index| &self.sites[*index])
    }

    pub fn sites(&self) -> &[Site] {
        &self.sites
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn location(key: &str, tide: Option<&str>, almanac: Option<&str>, tz: Option<&str>) -> LocationConfig {
        LocationConfig {
            key: key.to_string(),
            tide_station: tide.map(String::from),
            almanac_id: almanac.map(String::from),
            latitude: None,
            longitude: None,
            timezone: tz.map(String::from),
        }
    }

    #[test]
    fn test_provider_ids_share_one_key() {
        let registry = LocationRegistry::from_locations(&[location(
            "phoenix",
            Some("9414290"),
            Some("PHX"),
            Some("US/Arizona"),
        )])
        .unwrap();
        assert_eq!(registry.resolve("9414290").key, "phoenix");
        assert_eq!(registry.resolve(" PHX ").key, "phoenix");
        assert_eq!(registry.resolve("phoenix").key, "phoenix");
        assert!(registry.resolve("PHX").zone.is_some());
    }

    #[test]
    fn test_unknown_id_passes_through() {
        let registry = LocationRegistry::new();
        let site = registry.resolve(" StationA ");
        assert_eq!(site.key, "StationA");
        assert!(site.zone.is_none());
    }

    #[test]
    fn test_conflicting_alias_is_rejected() {
        let err = LocationRegistry::from_locations(&[
            location("a", Some("shared"), None, None),
            location("b", Some("shared"), None, None),
        ])
        .unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));
    }

    #[test]
    fn test_bad_timezone_is_config_error() {
        let err = LocationRegistry::from_locations(&[location("a", None, None, Some("Nowhere/Land"))])
            .unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));
    }
}
