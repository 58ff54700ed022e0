use url::Url;

/// Domains the agent may act on. Matching is a case-insensitive suffix match
/// on the host with any leading `www.` removed from both sides.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DomainAllowList {
    domains: Vec<String>,
}

impl DomainAllowList {
    pub fn new<I, S>(domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut normalized: Vec<String> = Vec::new();
        for domain in domains {
            let d = normalize(domain.as_ref());
            if !d.is_empty() && !normalized.contains(&d) {
                normalized.push(d);
            }
        }
        Self { domains: normalized }
    }

    pub fn is_empty(&self) -> bool {
        self.domains.is_empty()
    }

    pub fn domains(&self) -> &[String] {
        &self.domains
    }

    /// An empty list permits any URL. A URL without a host never matches a
    /// non-empty list.
    pub fn permits(&self, url: &str) -> bool {
        if self.domains.is_empty() {
            return true;
        }
        match host_of(url) {
            Some(host) => self.domains.iter().any(|d| host.ends_with(d.as_str())),
            None => false,
        }
    }
}

fn normalize(value: &str) -> String {
    let lower = value.trim().to_ascii_lowercase();
    lower.strip_prefix("www.").unwrap_or(&lower).to_string()
}

fn host_of(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let host = parsed.host_str()?;
    if host.is_empty() {
        return None;
    }
    Some(normalize(host))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_list_allows_everything() {
        let list = DomainAllowList::new(Vec::<String>::new());
        assert!(list.permits("https://evil.example/path"));
        assert!(list.permits("about:blank"));
    }

    #[test]
    fn normalizes_entries() {
        let list = DomainAllowList::new(["  WWW.Amazon.com ", "", "amazon.com", "bestbuy.com"]);
        assert_eq!(list.domains(), ["amazon.com", "bestbuy.com"]);
    }

    #[test]
    fn suffix_match_ignores_www_and_case() {
        let list = DomainAllowList::new(["amazon.com"]);
        assert!(list.permits("https://www.amazon.com/dp/B0001"));
        assert!(list.permits("https://SMILE.Amazon.COM/"));
        assert!(list.permits("https://amazon.com:8443/cart"));
        assert!(!list.permits("https://bing.com/search?q=mouse"));
        assert!(!list.permits("https://amazon.com.evil.example/"));
    }

    #[test]
    fn hostless_urls_are_not_permitted() {
        let list = DomainAllowList::new(["amazon.com"]);
        assert!(!list.permits("about:blank"));
        assert!(!list.permits("not a url"));
    }
}
