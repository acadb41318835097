//! Core domain model, normalization utilities, and the corporate-entity classifier.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

pub const CRATE_NAME: &str = "fliptrack-core";

/// Derived lifecycle status for a corporately held property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PropertyStatus {
    Sold,
    OnMarket,
    InRenovation,
}

impl PropertyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PropertyStatus::Sold => "sold",
            PropertyStatus::OnMarket => "on-market",
            PropertyStatus::InRenovation => "in-renovation",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "sold" => Some(PropertyStatus::Sold),
            "on-market" => Some(PropertyStatus::OnMarket),
            "in-renovation" => Some(PropertyStatus::InRenovation),
            _ => None,
        }
    }
}

/// One deed/recording event classified by which side was corporate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransactionKind {
    Acquisition,
    Sale,
    CompanyToCompany,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Acquisition => "acquisition",
            TransactionKind::Sale => "sale",
            TransactionKind::CompanyToCompany => "company-to-company",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "acquisition" => Some(TransactionKind::Acquisition),
            "sale" => Some(TransactionKind::Sale),
            "company-to-company" => Some(TransactionKind::CompanyToCompany),
            _ => None,
        }
    }
}

/// Sibling-table bucket for the loosely structured detail payloads that ride
/// along with a property (assessments, structures, valuations).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FactKind {
    Assessment,
    Structure,
    Valuation,
}

impl FactKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FactKind::Assessment => "assessment",
            FactKind::Structure => "structure",
            FactKind::Valuation => "valuation",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "assessment" => Some(FactKind::Assessment),
            "structure" => Some(FactKind::Structure),
            "valuation" => Some(FactKind::Valuation),
            _ => None,
        }
    }
}

/// One opaque detail payload destined for a property's sibling fact table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyFact {
    pub kind: FactKind,
    pub payload: serde_json::Value,
}

/// Display/storage form of a company name: punctuation normalized away,
/// whitespace collapsed.
pub fn canonical_company_name(raw: &str) -> String {
    raw.chars()
        .map(|c| if matches!(c, '.' | ',' | ';') { ' ' } else { c })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Equality/dedup key for a company name: case-folded, punctuation stripped,
/// whitespace collapsed. Two names folding to the same key are the same
/// company. Punctuation is removed, not turned into spaces, so "L.L.C." and
/// "LLC" fold to the same token.
pub fn company_comparison_key(raw: &str) -> String {
    raw.to_ascii_lowercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || c.is_whitespace())
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Trims, collapses whitespace, and strips a trailing "County" token.
pub fn normalize_county(raw: &str) -> String {
    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    let lower = collapsed.to_ascii_lowercase();
    if let Some(stripped_len) = lower
        .strip_suffix("county")
        .map(|prefix| prefix.trim_end().len())
    {
        collapsed[..stripped_len].trim_end().to_string()
    } else {
        collapsed
    }
}

/// Case-insensitive county equality after normalization.
pub fn same_county(a: &str, b: &str) -> bool {
    normalize_county(a).eq_ignore_ascii_case(&normalize_county(b))
}

/// Maps the feed's property-type variants onto canonical labels. Unknown
/// values pass through trimmed so new upstream types are not silently lost.
pub fn normalize_property_type(raw: &str) -> String {
    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    match collapsed.to_ascii_lowercase().as_str() {
        "sfr" | "single family" | "single-family" | "single family residence"
        | "single family residential" => "Single Family".to_string(),
        "condo" | "condominium" => "Condo".to_string(),
        "townhouse" | "townhome" | "town home" => "Townhouse".to_string(),
        "mfr" | "duplex" | "multi family" | "multi-family" | "multifamily" => {
            "Multi Family".to_string()
        }
        "land" | "lot" | "vacant land" => "Land".to_string(),
        "mobile" | "mobile home" | "manufactured" => "Mobile Home".to_string(),
        _ => collapsed,
    }
}

/// Parses the date shapes the upstream feed emits: date-only, RFC 3339, and
/// US-style slashed dates. Anything else is rejected at the boundary.
pub fn parse_feed_date(raw: &str) -> Option<NaiveDate> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        return Some(date);
    }
    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%m/%d/%Y") {
        return Some(date);
    }
    chrono::DateTime::parse_from_rfc3339(trimmed)
        .ok()
        .map(|dt| dt.date_naive())
}

const TRUST_OWNERSHIP_CODES: &[&str] = &["TR", "TRUST", "FT", "LT", "RT", "IT"];

const TRUST_PATTERNS: &[&str] = &[
    "TRUST",
    "LIVING TRUST",
    "FAMILY TRUST",
    "REVOCABLE TRUST",
    "IRREVOCABLE TRUST",
    "SPOUSAL TRUST",
];

const CORPORATE_PATTERNS: &[&str] = &[
    "LLC",
    "INC",
    "CORP",
    "LTD",
    "LP",
    "PROPERTIES",
    "INVESTMENT",
    "INVESTMENTS",
    "CAPITAL",
    "VENTURE",
    "VENTURES",
    "HOLDING",
    "HOLDINGS",
    "REALTY",
];

// Punctuation inside a token is dropped rather than split on, so "L.L.C."
// tokenizes as "LLC" and matches the corporate patterns.
fn name_tokens(text: &str) -> Vec<String> {
    text.to_ascii_uppercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || c.is_whitespace())
        .collect::<String>()
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

/// Word-boundary phrase match: the pattern's tokens must appear as a
/// consecutive run of whole tokens in the name. "TRUSTWORTHY" never matches
/// "TRUST".
fn contains_phrase(tokens: &[String], phrase: &str) -> bool {
    let needle = name_tokens(phrase);
    if needle.is_empty() || needle.len() > tokens.len() {
        return false;
    }
    tokens.windows(needle.len()).any(|window| window == needle)
}

/// True when the ownership code is a known trust code or the name carries a
/// trust-indicating pattern.
pub fn is_trust(name: &str, ownership_code: Option<&str>) -> bool {
    if let Some(code) = ownership_code {
        let code = code.trim().to_ascii_uppercase();
        if TRUST_OWNERSHIP_CODES.contains(&code.as_str()) {
            return true;
        }
    }
    let tokens = name_tokens(name);
    TRUST_PATTERNS
        .iter()
        .any(|pattern| contains_phrase(&tokens, pattern))
}

/// True for corporate (non-trust) entities whose names carry at least one
/// corporate pattern. Individuals match neither this nor [`is_trust`].
pub fn is_flipping_company(name: &str, ownership_code: Option<&str>) -> bool {
    if name.trim().is_empty() || is_trust(name, ownership_code) {
        return false;
    }
    let tokens = name_tokens(name);
    CORPORATE_PATTERNS
        .iter()
        .any(|pattern| contains_phrase(&tokens, pattern))
}

/// True when an external listing-status string indicates the property is
/// actively listed.
pub fn listing_indicates_on_market(listing_status: Option<&str>) -> bool {
    let Some(status) = listing_status else {
        return false;
    };
    // Whole-token matching keeps "Inactive" and "Delisted" from reading as
    // on-market.
    let tokens = name_tokens(status);
    ["FOR SALE", "ON MARKET", "ACTIVE", "LISTED"]
        .iter()
        .any(|phrase| contains_phrase(&tokens, phrase))
}

/// Status derivation, first match wins: a company exiting to a non-corporate
/// buyer means sold; an active listing means on-market; otherwise the
/// property is corporately held and presumed mid-renovation.
pub fn derive_status(
    buyer_is_company: bool,
    seller_is_company: bool,
    listing_status: Option<&str>,
) -> PropertyStatus {
    if seller_is_company && !buyer_is_company {
        PropertyStatus::Sold
    } else if listing_indicates_on_market(listing_status) {
        PropertyStatus::OnMarket
    } else {
        PropertyStatus::InRenovation
    }
}

/// Transaction-kind derivation from the per-record classification of each
/// side. Returns `None` when neither side is corporate; callers upstream
/// should already have filtered those out, but the engine re-validates.
pub fn derive_transaction_kind(
    buyer_is_company: bool,
    seller_is_company: bool,
) -> Option<TransactionKind> {
    match (buyer_is_company, seller_is_company) {
        (true, false) => Some(TransactionKind::Acquisition),
        (false, true) => Some(TransactionKind::Sale),
        (true, true) => Some(TransactionKind::CompanyToCompany),
        (false, false) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn comparison_key_folds_case_punctuation_and_whitespace() {
        let a = company_comparison_key("Blue Door Capital, LLC");
        let b = company_comparison_key("  BLUE   DOOR CAPITAL L.L.C. ");
        assert_eq!(a, "blue door capital llc");
        assert_eq!(a, b);
    }

    #[test]
    fn punctuation_only_variants_fold_to_one_key() {
        let variants = [
            "Blue Door Capital LLC",
            "Blue Door Capital, L.L.C.",
            "BLUE DOOR CAPITAL LLC.",
        ];
        let keys: Vec<String> = variants.iter().map(|v| company_comparison_key(v)).collect();
        assert!(keys.iter().all(|k| *k == keys[0]), "{keys:?}");
    }

    #[test]
    fn dotted_suffix_still_classifies_as_corporate() {
        assert!(is_flipping_company("Blue Door Capital L.L.C.", None));
        assert!(is_flipping_company("ACME HOMES, INC.", None));
    }

    #[test]
    fn canonical_name_collapses_but_keeps_case() {
        assert_eq!(
            canonical_company_name("  Blue Door  Capital, LLC. "),
            "Blue Door Capital LLC"
        );
    }

    #[test]
    fn county_normalization_strips_suffix_token() {
        assert_eq!(normalize_county("Maricopa County"), "Maricopa");
        assert_eq!(normalize_county("  maricopa  "), "maricopa");
        assert!(same_county("MARICOPA", "Maricopa County"));
        assert!(!same_county("Pima", "Maricopa"));
    }

    #[test]
    fn property_type_maps_known_variants() {
        assert_eq!(normalize_property_type("SFR"), "Single Family");
        assert_eq!(normalize_property_type("single  family"), "Single Family");
        assert_eq!(normalize_property_type("Condominium"), "Condo");
        assert_eq!(normalize_property_type("Quadplex"), "Quadplex");
    }

    #[test]
    fn feed_dates_accept_plain_slashed_and_rfc3339() {
        let expected = NaiveDate::from_ymd_opt(2026, 1, 20).unwrap();
        assert_eq!(parse_feed_date("2026-01-20"), Some(expected));
        assert_eq!(parse_feed_date("01/20/2026"), Some(expected));
        assert_eq!(parse_feed_date("2026-01-20T08:30:00Z"), Some(expected));
        assert_eq!(parse_feed_date("January 20"), None);
        assert_eq!(parse_feed_date(""), None);
    }

    #[test]
    fn trusts_match_by_code_or_pattern() {
        assert!(is_trust("SMITH FAMILY TRUST", None));
        assert!(is_trust("JOHN SMITH", Some("TR")));
        assert!(is_trust("DOE REVOCABLE TRUST", Some("CO")));
        assert!(!is_trust("JOHN SMITH", Some("CO")));
    }

    #[test]
    fn word_boundary_keeps_trustworthy_out_of_trusts() {
        assert!(!is_trust("TRUSTWORTHY HOMES LLC", None));
        assert!(is_flipping_company("TRUSTWORTHY HOMES LLC", None));
    }

    #[test]
    fn flipping_companies_match_corporate_patterns() {
        assert!(is_flipping_company("Blue Door Capital LLC", None));
        assert!(is_flipping_company("SUNRISE PROPERTIES", None));
        assert!(is_flipping_company("ACME HOLDINGS", None));
        assert!(!is_flipping_company("JANE DOE", None));
        assert!(!is_flipping_company("", None));
    }

    #[test]
    fn trust_is_never_a_flipping_company() {
        let names = [
            "SMITH FAMILY TRUST",
            "DOE LIVING TRUST LLC",
            "ACME IRREVOCABLE TRUST",
        ];
        for name in names {
            assert!(is_trust(name, None), "{name} should be a trust");
            assert!(
                !is_flipping_company(name, None),
                "{name} must not classify as a flipping company"
            );
        }
    }

    #[test]
    fn status_priority_sold_then_listing_then_renovation() {
        assert_eq!(derive_status(false, true, Some("Active")), PropertyStatus::Sold);
        assert_eq!(
            derive_status(true, false, Some("For Sale")),
            PropertyStatus::OnMarket
        );
        assert_eq!(derive_status(true, false, None), PropertyStatus::InRenovation);
        assert_eq!(
            derive_status(true, true, Some("off market")),
            PropertyStatus::InRenovation
        );
    }

    #[test]
    fn inactive_listing_does_not_read_as_on_market() {
        assert!(listing_indicates_on_market(Some("Active")));
        assert!(listing_indicates_on_market(Some("Listed for sale")));
        assert!(!listing_indicates_on_market(Some("Inactive")));
        assert!(!listing_indicates_on_market(Some("Delisted")));
        assert!(!listing_indicates_on_market(None));
        assert_eq!(
            derive_status(true, false, Some("Inactive")),
            PropertyStatus::InRenovation
        );
    }

    #[test]
    fn transaction_kind_covers_all_side_combinations() {
        assert_eq!(
            derive_transaction_kind(true, false),
            Some(TransactionKind::Acquisition)
        );
        assert_eq!(derive_transaction_kind(false, true), Some(TransactionKind::Sale));
        assert_eq!(
            derive_transaction_kind(true, true),
            Some(TransactionKind::CompanyToCompany)
        );
        assert_eq!(derive_transaction_kind(false, false), None);
    }

    #[test]
    fn status_and_kind_strings_round_trip() {
        for status in [
            PropertyStatus::Sold,
            PropertyStatus::OnMarket,
            PropertyStatus::InRenovation,
        ] {
            assert_eq!(PropertyStatus::parse(status.as_str()), Some(status));
        }
        for kind in [
            TransactionKind::Acquisition,
            TransactionKind::Sale,
            TransactionKind::CompanyToCompany,
        ] {
            assert_eq!(TransactionKind::parse(kind.as_str()), Some(kind));
        }
    }
}
