use crate::error::{ModelError, Result};

/// Strongly typed identifier for a release (the indexer's stable guid).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct ReleaseId(pub String);

impl ReleaseId {
    pub fn new(id: impl Into<String>) -> Self {
        ReleaseId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ReleaseId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Strongly typed identifier for an account subscribed to the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct AccountId(pub String);

impl AccountId {
    pub fn new(id: impl Into<String>) -> Self {
        AccountId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for AccountId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// External content identifier in IMDb form (`tt` followed by digits).
///
/// Stable across releases of the same title, which is what the dedup and
/// reconciliation logic keys on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct ImdbId(String);

impl ImdbId {
    /// Validates the `tt<digits>` shape.
    pub fn parse(raw: impl Into<String>) -> Result<Self> {
        let raw = raw.into();
        let digits = raw
            .strip_prefix("tt")
            .ok_or_else(|| ModelError::InvalidId(format!("missing tt prefix: {raw}")))?;
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ModelError::InvalidId(format!("not an imdb id: {raw}")));
        }
        Ok(ImdbId(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ImdbId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn imdb_id_accepts_canonical_form() {
        assert!(ImdbId::parse("tt0133093").is_ok());
        assert!(ImdbId::parse("tt1877830").is_ok());
    }

    #[test]
    fn imdb_id_rejects_garbage() {
        assert!(ImdbId::parse("0133093").is_err());
        assert!(ImdbId::parse("tt").is_err());
        assert!(ImdbId::parse("ttabc").is_err());
        assert!(ImdbId::parse("no_match").is_err());
    }
}
