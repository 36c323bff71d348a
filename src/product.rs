/// Producer products and the subcommand shape each one is invoked with.
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

/// EAA feed that reports connector health instead of streaming a log.
pub const CONNECTOR_HEALTH_FEED: &str = "CONHEALTH";

/// The fixed set of products a producer can be launched for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Product {
    Eaa,
    Etp,
    Mfa,
}

impl Product {
    pub const ALL: [Product; 3] = [Product::Eaa, Product::Etp, Product::Mfa];

    /// Identifier as used on the command line and in the user-agent tag.
    pub fn as_str(&self) -> &'static str {
        match self {
            Product::Eaa => "EAA",
            Product::Etp => "ETP",
            Product::Mfa => "MFA",
        }
    }

    /// Subcommand tokens for streaming `feed` (already resolved) in `format`.
    ///
    /// `format` is only consulted for EAA log feeds; the connector health
    /// feed has its own shape and ignores it.
    pub fn subcommand(&self, feed: &str, format: &str) -> Vec<String> {
        match self {
            Product::Eaa if feed == CONNECTOR_HEALTH_FEED => {
                vec!["connector", "list", "--perf", "--tail"]
                    .into_iter()
                    .map(String::from)
                    .collect()
            }
            Product::Eaa => {
                let mut args = vec!["log".to_string(), feed.to_lowercase(), "-f".to_string()];
                if format == "JSON" {
                    args.push("--json".to_string());
                }
                args
            }
            Product::Etp | Product::Mfa => {
                vec!["event".to_string(), feed.to_lowercase(), "-f".to_string()]
            }
        }
    }

    /// Whether the subcommand for `feed` takes a resolved output format.
    pub fn uses_format(&self, feed: &str) -> bool {
        matches!(self, Product::Eaa) && feed != CONNECTOR_HEALTH_FEED
    }
}

impl fmt::Display for Product {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a product identifier is not one of `EAA`, `ETP`, `MFA`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("no valid product selected (--input={0})")]
pub struct UnknownProduct(pub String);

impl FromStr for Product {
    type Err = UnknownProduct;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "EAA" => Ok(Product::Eaa),
            "ETP" => Ok(Product::Etp),
            "MFA" => Ok(Product::Mfa),
            other => Err(UnknownProduct(other.to_string())),
        }
    }
}

/// Static description of one product's producer binary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductSpec {
    pub product: Product,
    pub binary: PathBuf,
    /// Valid feeds; the first entry is the default.
    pub feeds: Vec<String>,
}

impl ProductSpec {
    pub fn new(product: Product, binary: impl Into<PathBuf>, feeds: Vec<String>) -> Self {
        Self {
            product,
            binary: binary.into(),
            feeds,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_known_products() {
        assert_eq!("EAA".parse::<Product>().unwrap(), Product::Eaa);
        assert_eq!("ETP".parse::<Product>().unwrap(), Product::Etp);
        assert_eq!("MFA".parse::<Product>().unwrap(), Product::Mfa);
    }

    #[test]
    fn test_parse_is_case_sensitive() {
        let err = "eaa".parse::<Product>().unwrap_err();
        assert_eq!(err, UnknownProduct("eaa".to_string()));
    }

    #[test]
    fn test_parse_unknown_product() {
        let err = "XYZ".parse::<Product>().unwrap_err();
        assert!(err.to_string().contains("--input=XYZ"));
    }

    #[test]
    fn test_display_roundtrips_identifier() {
        for product in Product::ALL {
            assert_eq!(product.to_string().parse::<Product>().unwrap(), product);
        }
    }

    #[test]
    fn test_eaa_log_subcommand_with_json() {
        assert_eq!(
            Product::Eaa.subcommand("AUDIT", "JSON"),
            vec!["log", "audit", "-f", "--json"]
        );
    }

    #[test]
    fn test_eaa_log_subcommand_text_has_no_json_flag() {
        assert_eq!(
            Product::Eaa.subcommand("ACCESS", "TEXT"),
            vec!["log", "access", "-f"]
        );
    }

    #[test]
    fn test_eaa_connector_health_subcommand() {
        assert_eq!(
            Product::Eaa.subcommand("CONHEALTH", "JSON"),
            vec!["connector", "list", "--perf", "--tail"]
        );
        assert!(!Product::Eaa.uses_format("CONHEALTH"));
    }

    #[test]
    fn test_etp_and_mfa_event_subcommand() {
        assert_eq!(
            Product::Etp.subcommand("THREAT", "JSON"),
            vec!["event", "threat", "-f"]
        );
        assert_eq!(
            Product::Mfa.subcommand("AUTH", "TEXT"),
            vec!["event", "auth", "-f"]
        );
        assert!(!Product::Etp.uses_format("THREAT"));
    }

    #[test]
    fn test_conhealth_is_only_special_for_eaa() {
        assert_eq!(
            Product::Etp.subcommand("CONHEALTH", "JSON"),
            vec!["event", "conhealth", "-f"]
        );
    }

    #[test]
    fn test_spec_keeps_feed_order() {
        let spec = ProductSpec::new(
            Product::Eaa,
            "/bin/eaa",
            vec!["AUDIT".to_string(), "CONHEALTH".to_string()],
        );
        assert_eq!(spec.feeds, vec!["AUDIT", "CONHEALTH"]);
        assert_eq!(spec.binary, std::path::PathBuf::from("/bin/eaa"));
    }
}
