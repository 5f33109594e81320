//! Deterministic cache keys for requests.

use std::fmt;

/// A cache key built from an endpoint and its query parameters.
///
/// Parameters are kept sorted by name (then value), so two requests that
/// differ only in parameter order map to the same key.
///
/// ```
/// use fibre_swr::key::RequestKey;
///
/// let a = RequestKey::new("/odds").param("sport", "nba").param("date", "2024-01-01");
/// let b = RequestKey::new("/odds").param("date", "2024-01-01").param("sport", "nba");
/// assert_eq!(a, b);
/// assert_eq!(a.to_string(), "/odds?date=2024-01-01&sport=nba");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestKey {
  endpoint: String,
  params: Vec<(String, String)>,
}

impl RequestKey {
  pub fn new(endpoint: impl Into<String>) -> Self {
    Self {
      endpoint: endpoint.into(),
      params: Vec::new(),
    }
  }

  /// Adds a query parameter, keeping the parameter list normalized.
  pub fn param(mut self, name: impl Into<String>, value: impl fmt::Display) -> Self {
    let pair = (name.into(), value.to_string());
    let at = self.params.partition_point(|p| *p <= pair);
    self.params.insert(at, pair);
    self
  }

  /// Adds every parameter from `params`.
  pub fn params<I, N, D>(self, params: I) -> Self
  where
    I: IntoIterator<Item = (N, D)>,
    N: Into<String>,
    D: fmt::Display,
  {
    params
      .into_iter()
      .fold(self, |key, (name, value)| key.param(name, value))
  }

  pub fn endpoint(&self) -> &str {
    &self.endpoint
  }

  pub fn query(&self) -> impl Iterator<Item = (&str, &str)> {
    self.params.iter().map(|(n, v)| (n.as_str(), v.as_str()))
  }
}

impl fmt::Display for RequestKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.endpoint)?;
    for (i, (name, value)) in self.params.iter().enumerate() {
      let sep = if i == 0 { '?' } else { '&' };
      write!(f, "{sep}{name}={value}")?;
    }
    Ok(())
  }
}
