use std::net::IpAddr;
use std::path::Path;

use maxminddb::geoip2;

/// Wraps a MaxMind GeoLite2-Country reader. The source embeds this
/// database into the binary via `//go:embed` and soft-fails to a disabled
/// lookup (`db == nil`) if the asset can't be parsed; this implementation
/// loads it from a configurable path at startup for the same reason and
/// with the same soft-fail behavior — see DESIGN.md for why it isn't
/// compiled in.
pub struct GeoIpDb {
    reader: maxminddb::Reader<Vec<u8>>,
}

impl GeoIpDb {
    /// Attempt to load the database at `path`. Returns `None` (rather than
    /// an error) on any failure, matching the source's `if err == nil { r.db
    /// = db }` pattern — a missing or unreadable GeoIP file simply disables
    /// `geoip:XX` rules instead of failing startup.
    pub fn open(path: impl AsRef<Path>) -> Option<Self> {
        let reader = maxminddb::Reader::open_readfile(path).ok()?;
        Some(Self { reader })
    }

    /// Lowercase ISO-3166-1 alpha-2 country code for `ip`, if the database
    /// has an entry.
    pub fn lookup_country(&self, ip: IpAddr) -> Option<String> {
        let country: geoip2::Country = self.reader.lookup(ip).ok()?;
        let code = country.country?.iso_code?;
        Some(code.to_lowercase())
    }
}
