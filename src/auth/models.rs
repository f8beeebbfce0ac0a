//! Authentication Models
//! Mission: Define the service-principal claims carried on inbound requests

use serde::{Deserialize, Serialize};

/// JWT claims for a calling service principal.
///
/// Tokens are issued by an external identity provider; this core only
/// validates and reads them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Claims {
    pub sub: String, // calling service/principal id
    pub exp: usize,  // expiration timestamp
    #[serde(default)]
    pub scope: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claims_roundtrip() {
        let claims = Claims {
            sub: "payment-executor".to_string(),
            exp: 9_999_999_999,
            scope: Some("assess:write".to_string()),
        };
        let json = serde_json::to_string(&claims).unwrap();
        let back: Claims = serde_json::from_str(&json).unwrap();
        assert_eq!(claims, back);
    }
}
