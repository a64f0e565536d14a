//! Referrer classification

use url::Url;

use crate::store::DIRECT_REFERRER;

/// Host patterns mapped to a canonical label, checked in order.
///
/// A pattern ending in `.` names a site under any TLD (`google.` matches
/// `www.google.com.br`); any other pattern is a domain matched on itself
/// and its subdomains.
const KNOWN_SOURCES: &[(&str, &str)] = &[
    ("google.", "google.com"),
    ("instagram.", "instagram.com"),
    ("facebook.", "facebook.com"),
    ("youtube.", "youtube.com"),
    ("tiktok.", "tiktok.com"),
    ("linkedin.", "linkedin.com"),
    ("twitter.", "twitter.com"),
    ("x.com", "twitter.com"),
    ("whatsapp.", "whatsapp.com"),
];

fn host_matches(host: &str, pattern: &str) -> bool {
    match pattern.strip_suffix('.') {
        // Whole label before the TLD, so `notgoogle.example` does not match
        Some(site) => {
            let mut labels: Vec<&str> = host.split('.').collect();
            labels.pop();
            labels.contains(&site)
        }
        None => {
            host == pattern
                || host
                    .strip_suffix(pattern)
                    .is_some_and(|prefix| prefix.ends_with('.'))
        }
    }
}

/// Classify a referring URL into an origin label.
///
/// Known search engines, social networks and messaging apps collapse to a
/// canonical label, other hosts pass through without a leading `www.`, and
/// an absent or unparsable referrer is `direct`.
pub fn classify(referring_url: Option<&str>) -> String {
    let Some(raw) = referring_url.map(str::trim).filter(|r| !r.is_empty()) else {
        return DIRECT_REFERRER.to_string();
    };

    let host = match Url::parse(raw) {
        Ok(url) => match url.host_str() {
            Some(host) => host.to_ascii_lowercase(),
            None => return DIRECT_REFERRER.to_string(),
        },
        Err(e) => {
            tracing::debug!(referrer = raw, error = %e, "unparsable referrer");
            return DIRECT_REFERRER.to_string();
        }
    };

    for (pattern, label) in KNOWN_SOURCES {
        if host_matches(&host, pattern) {
            return (*label).to_string();
        }
    }

    host.strip_prefix("www.").unwrap_or(&host).to_string()
}

/// Normalize a referrer label received from a client
pub fn sanitize_label(label: Option<&str>) -> String {
    match label.map(str::trim) {
        Some(label) if !label.is_empty() => label.to_ascii_lowercase(),
        _ => DIRECT_REFERRER.to_string(),
    }
}
