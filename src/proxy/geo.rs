//! Area lookup for proxy addresses using a MaxMind database

use crate::error::{HarvestError, Result};
use maxminddb::{geoip2, Reader};
use std::net::IpAddr;
use std::path::Path;
use std::sync::Arc;

/// Place an address resolves to
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GeoLocation {
    /// ISO 3166-1 alpha-2 country code (e.g., "US", "CN")
    pub country_code: Option<String>,
    pub country_name: Option<String>,
    pub city_name: Option<String>,
}

impl GeoLocation {
    /// The area label stored on catalog entries, `None` when nothing is known.
    pub fn area(&self) -> Option<String> {
        match (&self.city_name, &self.country_name, &self.country_code) {
            (Some(city), Some(country), _) => Some(format!("{}, {}", city, country)),
            (None, Some(country), _) => Some(country.clone()),
            (Some(city), None, Some(cc)) => Some(format!("{}, {}", city, cc)),
            (None, None, Some(cc)) => Some(cc.clone()),
            (Some(city), None, None) => Some(city.clone()),
            (None, None, None) => None,
        }
    }
}

/// Shared handle onto an opened MMDB file
#[derive(Clone)]
pub struct GeoLocator {
    reader: Arc<Reader<Vec<u8>>>,
}

impl GeoLocator {
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let reader = Reader::open_readfile(path).map_err(|e| {
            HarvestError::configuration(format!("cannot open MMDB file {}: {}", path.display(), e))
        })?;
        Ok(Self {
            reader: Arc::new(reader),
        })
    }

    /// Area for an address string. Host names and unknown addresses yield `None`.
    pub fn area(&self, address: &str) -> Option<String> {
        let ip: IpAddr = address.parse().ok()?;
        match self.lookup_ip(ip) {
            Ok(location) => location.area(),
            Err(e) => {
                tracing::debug!(address, error = %e, "geo lookup failed");
                None
            }
        }
    }

    fn lookup_ip(&self, ip: IpAddr) -> Result<GeoLocation> {
        let lookup_result = self
            .reader
            .lookup(ip)
            .map_err(|e| HarvestError::Probe(e.to_string()))?;
        let city: Option<geoip2::City> = lookup_result
            .decode()
            .map_err(|e| HarvestError::Probe(e.to_string()))?;

        let Some(city) = city else {
            return Ok(GeoLocation::default());
        };

        Ok(GeoLocation {
            country_code: city.country.iso_code.map(String::from),
            country_name: city.country.names.english.map(String::from),
            city_name: city.city.names.english.map(String::from),
        })
    }
}
