//! Mapping of `(host, metric name)` pairs onto OpenTSDB metric identifiers.

/// Produces the wire-format metric identifier for a reading.
///
/// Implementations must be pure: the same inputs always yield the same
/// statname, and no valid input may fail.
pub trait StatNamer: Send {
    /// Return the statname for `name` reported by `host`.
    fn statname(&self, host: &str, name: &str) -> String;
}

impl<F> StatNamer for F
where
    F: Fn(&str, &str) -> String + Send,
{
    fn statname(&self, host: &str, name: &str) -> String {
        self(host, name)
    }
}

/// Default namer joining a sanitised host with the metric name.
///
/// Dots in the host are replaced so that `web01.example.com` and metric
/// `cpu.idle` become `web01_example_com.cpu.idle`. Trailing domains listed
/// in `host_trim` are removed from the host first.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HostNamer {
    prefix: Option<String>,
    postfix: Option<String>,
    host_trim: Vec<String>,
}

impl HostNamer {
    /// Create a namer with no prefix, postfix, or trimmed domains.
    pub fn new() -> Self {
        Self::default()
    }

    /// Prepend `prefix` to every statname.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into()).filter(|p: &String| !p.is_empty());
        self
    }

    /// Append `postfix` to every statname.
    pub fn with_postfix(mut self, postfix: impl Into<String>) -> Self {
        self.postfix = Some(postfix.into()).filter(|p: &String| !p.is_empty());
        self
    }

    /// Strip any of `domains` from the end of the host before joining.
    pub fn with_host_trim<I, S>(mut self, domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.host_trim = domains
            .into_iter()
            .map(Into::into)
            .map(|d: String| d.trim_start_matches('.').to_owned())
            .filter(|d| !d.is_empty())
            .collect();
        self
    }

    fn trimmed_host<'a>(&self, host: &'a str) -> &'a str {
        for domain in &self.host_trim {
            if let Some(stripped) = host.strip_suffix(domain.as_str())
                && let Some(stripped) = stripped.strip_suffix('.')
            {
                return stripped;
            }
        }
        host
    }
}

impl StatNamer for HostNamer {
    fn statname(&self, host: &str, name: &str) -> String {
        let host = self.trimmed_host(host).replace('.', "_");
        [
            self.prefix.as_deref(),
            Some(host.as_str()),
            Some(name),
            self.postfix.as_deref(),
        ]
        .into_iter()
        .flatten()
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(".")
    }
}
