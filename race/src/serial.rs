use regex::Regex;

/// Marker a patched bootrom appends to its serial number
pub const EXPLOITED_MARKER: &str = "PWND:[";

/// Fields of a DFU-mode serial number string
///
/// The string is a space separated list of `KEY:VALUE` pairs, e.g.
/// `CPID:8010 CPRV:11 ECID:001A2B3C4D5E6F70 SRTG:[iBoot-2696.0.0.1.33]`.
/// Bracketed values may contain spaces; brackets are stripped.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct SerialInfo {
    fields: Vec<(String, String)>,
}

impl SerialInfo {
    pub fn parse(serial: &str) -> Option<Self> {
        let r = Regex::new(r"([A-Z]+):(?:\[([^\]]*)\]|(\S+))").ok()?;
        let fields: Vec<(String, String)> = r
            .captures_iter(serial)
            .filter_map(|c| {
                let value = c.get(2).or_else(|| c.get(3))?;
                Some((c[1].to_string(), value.as_str().to_string()))
            })
            .collect();

        if fields.is_empty() {
            None
        } else {
            Some(SerialInfo { fields })
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn fields(&self) -> &[(String, String)] {
        &self.fields
    }

    /// Chip ID (`CPID`)
    #[doc(alias = "CPID")]
    pub fn cpid(&self) -> Option<u32> {
        u32::from_str_radix(self.get("CPID")?, 16).ok()
    }

    /// Exploit identifier (`PWND`), if the device reports one
    #[doc(alias = "PWND")]
    pub fn pwned(&self) -> Option<&str> {
        self.get("PWND")
    }
}

pub fn is_exploited(serial: &str) -> bool {
    serial.contains(EXPLOITED_MARKER)
}
