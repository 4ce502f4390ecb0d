//! Postcode to service-area matching.
//!
//! Matching is deliberately permissive: a job with no postcode, or with a postcode whose
//! prefix is not in the table, matches every provider. Callers depend on [`AreaMatcher`]
//! only, so a stricter policy can replace [`PostcodeAreaMatcher`] without touching the
//! eligibility evaluator.

use std::collections::BTreeMap;

/// Declared area that covers every postcode.
pub const CATCH_ALL_AREA: &str = "Other";

/// Policy deciding whether a provider's declared areas cover a job's postcode.
pub trait AreaMatcher: Send + Sync {
    /// Short geographic code extracted from the postcode, if any.
    fn area_code(&self, postcode: &str) -> Option<String>;

    fn matches(&self, postcode: Option<&str>, service_areas: &[String]) -> bool;
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum AreaTableError {
    #[error("area table entry '{0}' must look like PREFIX=Area|Area")]
    MalformedEntry(String),
    #[error("area table prefix '{0}' must be one or two letters")]
    InvalidPrefix(String),
}

/// Deployment-time mapping of postcode prefixes to canonical area names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AreaTable {
    entries: BTreeMap<String, Vec<String>>,
}

impl AreaTable {
    pub fn empty() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    pub fn with_entry<I, S>(mut self, prefix: &str, areas: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.entries.insert(
            prefix.trim().to_ascii_uppercase(),
            areas.into_iter().map(Into::into).collect(),
        );
        self
    }

    pub fn areas_for(&self, prefix: &str) -> Option<&[String]> {
        self.entries
            .get(&prefix.to_ascii_uppercase())
            .map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Parse `LN=Lincoln|Gainsborough;DN=Grimsby` style overrides.
    pub fn parse(raw: &str) -> Result<Self, AreaTableError> {
        let mut table = Self::empty();
        for entry in raw.split(';').map(str::trim).filter(|entry| !entry.is_empty()) {
            let (prefix, areas) = entry
                .split_once('=')
                .ok_or_else(|| AreaTableError::MalformedEntry(entry.to_string()))?;
            let prefix = prefix.trim();
            if prefix.is_empty()
                || prefix.len() > 2
                || !prefix.chars().all(|c| c.is_ascii_alphabetic())
            {
                return Err(AreaTableError::InvalidPrefix(prefix.to_string()));
            }

            let areas: Vec<String> = areas
                .split('|')
                .map(str::trim)
                .filter(|area| !area.is_empty())
                .map(str::to_string)
                .collect();
            if areas.is_empty() {
                return Err(AreaTableError::MalformedEntry(entry.to_string()));
            }

            table = table.with_entry(prefix, areas);
        }
        Ok(table)
    }

    /// Lincolnshire and the surrounding postcode areas.
    pub fn lincolnshire() -> Self {
        Self::empty()
            .with_entry(
                "LN",
                [
                    "Lincoln",
                    "Gainsborough",
                    "Market Rasen",
                    "Horncastle",
                    "Louth",
                    "Sleaford",
                    "Woodhall Spa",
                    "Mablethorpe",
                ],
            )
            .with_entry(
                "DN",
                [
                    "Grimsby",
                    "Cleethorpes",
                    "Scunthorpe",
                    "Immingham",
                    "Brigg",
                    "Barton-upon-Humber",
                    "Doncaster",
                ],
            )
            .with_entry(
                "PE",
                [
                    "Boston",
                    "Spalding",
                    "Skegness",
                    "Stamford",
                    "Bourne",
                    "Holbeach",
                    "Peterborough",
                ],
            )
            .with_entry("NG", ["Grantham", "Newark", "Nottingham"])
            .with_entry("HU", ["Hull", "Beverley"])
            .with_entry("S", ["Sheffield", "Rotherham", "Worksop"])
            .with_entry("YO", ["York", "Scarborough", "Selby"])
            .with_entry("LE", ["Leicester", "Melton Mowbray"])
            .with_entry("NN", ["Northampton", "Corby", "Kettering"])
    }
}

impl Default for AreaTable {
    fn default() -> Self {
        Self::lincolnshire()
    }
}

/// Fail-open matcher driven by an [`AreaTable`].
#[derive(Debug, Clone, Default)]
pub struct PostcodeAreaMatcher {
    table: AreaTable,
}

impl PostcodeAreaMatcher {
    pub fn new(table: AreaTable) -> Self {
        Self { table }
    }

    pub fn table(&self) -> &AreaTable {
        &self.table
    }
}

impl AreaMatcher for PostcodeAreaMatcher {
    /// Leading run of at most two letters, upper-cased. `SW1A` yields `SW`, never `S`.
    fn area_code(&self, postcode: &str) -> Option<String> {
        let code: String = postcode
            .trim_start()
            .chars()
            .take_while(|c| c.is_ascii_alphabetic())
            .take(2)
            .map(|c| c.to_ascii_uppercase())
            .collect();

        if code.is_empty() {
            None
        } else {
            Some(code)
        }
    }

    fn matches(&self, postcode: Option<&str>, service_areas: &[String]) -> bool {
        let Some(postcode) = postcode.filter(|value| !value.trim().is_empty()) else {
            return true;
        };
        let Some(code) = self.area_code(postcode) else {
            return true;
        };
        let Some(canonical) = self.table.areas_for(&code) else {
            return true;
        };

        service_areas.iter().any(|declared| {
            let declared = declared.trim().to_lowercase();
            if declared == CATCH_ALL_AREA.to_lowercase() {
                return true;
            }
            canonical.iter().any(|name| {
                let name = name.to_lowercase();
                declared == name || declared.contains(&name)
            })
        })
    }
}
