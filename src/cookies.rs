//! Harvest identity-provider cookies from the browser jar and build the Cookie header.

use std::cmp::Ordering;

/// Cookie names whose presence is reported explicitly (substring match).
pub const SIDCC_FAMILY: [&str; 3] = ["SIDCC", "__Secure-1PSIDCC", "__Secure-3PSIDCC"];

/// Cookies printed for the operator to eyeball (exact match).
pub const CRITICAL_COOKIES: [&str; 8] = [
    "SIDCC",
    "__Secure-1PSIDCC",
    "__Secure-3PSIDCC",
    "SID",
    "HSID",
    "SSID",
    "APISID",
    "SAPISID",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrowserCookie {
    pub name: String,
    pub value: String,
    pub domain: String,
}

impl BrowserCookie {
    pub fn new(name: impl Into<String>, value: impl Into<String>, domain: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            domain: domain.into(),
        }
    }

    pub fn pair(&self) -> String {
        format!("{}={}", self.name, self.value)
    }
}

/// Keep cookies whose domain contains `domain_marker`, sorted by name in
/// [`collate`] order.
pub fn select_domain(cookies: Vec<BrowserCookie>, domain_marker: &str) -> Vec<BrowserCookie> {
    let mut selected: Vec<_> = cookies
        .into_iter()
        .filter(|c| c.domain.contains(domain_marker))
        .collect();
    selected.sort_by(|a, b| collate(&a.name, &b.name));
    selected
}

/// ASCII punctuation and symbols in root-locale collation order.
const PUNCTUATION_ORDER: &str = "_-,;:!?.'\"()[]{}@*/\\&#%`^+<=>|~$";

/// Primary weight: whitespace < punctuation < digits < letters (case-folded) < the rest.
fn primary_weight(c: char) -> u32 {
    if c.is_whitespace() {
        return 0;
    }
    if let Some(i) = PUNCTUATION_ORDER.find(c) {
        return 1 + i as u32;
    }
    if let Some(d) = c.to_digit(10) {
        return 100 + d;
    }
    if c.is_ascii_alphabetic() {
        return 200 + (c.to_ascii_lowercase() as u32 - 'a' as u32);
    }
    1000 + c as u32
}

/// Root-locale style name ordering: compare primary weights over the whole
/// string first, then lowercase before uppercase, then raw bytes.
pub fn collate(a: &str, b: &str) -> Ordering {
    a.chars()
        .map(primary_weight)
        .cmp(b.chars().map(primary_weight))
        .then_with(|| {
            a.chars()
                .map(|c| c.is_uppercase())
                .cmp(b.chars().map(|c| c.is_uppercase()))
        })
        .then_with(|| a.cmp(b))
}

/// `name=value` pairs joined with "; ". None when there is nothing to send.
pub fn cookie_header(cookies: &[BrowserCookie]) -> Option<String> {
    if cookies.is_empty() {
        return None;
    }
    Some(
        cookies
            .iter()
            .map(BrowserCookie::pair)
            .collect::<Vec<_>>()
            .join("; "),
    )
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CookieReport {
    pub count: usize,
    /// (name, present) for each of [`SIDCC_FAMILY`].
    pub sidcc: Vec<(&'static str, bool)>,
    pub critical: Vec<BrowserCookie>,
}

impl CookieReport {
    pub fn new(cookies: &[BrowserCookie]) -> Self {
        let sidcc = SIDCC_FAMILY
            .iter()
            .map(|name| (*name, cookies.iter().any(|c| c.name.contains(name))))
            .collect();
        let critical = cookies
            .iter()
            .filter(|c| CRITICAL_COOKIES.contains(&c.name.as_str()))
            .cloned()
            .collect();
        Self {
            count: cookies.len(),
            sidcc,
            critical,
        }
    }
}

/// First `n` characters of `s` (never splits a code point).
pub fn preview(s: &str, n: usize) -> &str {
    match s.char_indices().nth(n) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jar() -> Vec<BrowserCookie> {
        vec![
            BrowserCookie::new("SSID", "s1", ".google.com"),
            BrowserCookie::new("nest_session", "n1", "home.nest.com"),
            BrowserCookie::new("__Secure-3PSIDCC", "c3", ".google.com"),
            BrowserCookie::new("APISID", "a1", ".google.com"),
            BrowserCookie::new("NID", "x", ".google.com"),
            BrowserCookie::new("LSID", "l1", "accounts.google.com"),
            BrowserCookie::new("OTZ", "o", "google.com"),
            BrowserCookie::new("SIDCC", "c", ".google.com"),
        ]
    }

    #[test]
    fn test_select_domain_filters_and_sorts() {
        let selected = select_domain(jar(), ".google.com");
        let names: Vec<_> = selected.iter().map(|c| c.name.as_str()).collect();
        // host-only "google.com" has no leading dot and is left out
        assert_eq!(
            names,
            vec!["__Secure-3PSIDCC", "APISID", "LSID", "NID", "SIDCC", "SSID"]
        );
    }

    #[test]
    fn test_cookie_header_format() {
        let selected = select_domain(jar(), ".google.com");
        assert_eq!(
            cookie_header(&selected).as_deref(),
            Some("__Secure-3PSIDCC=c3; APISID=a1; LSID=l1; NID=x; SIDCC=c; SSID=s1")
        );
        assert_eq!(cookie_header(&[]), None);
    }

    #[test]
    fn test_report() {
        let selected = select_domain(jar(), ".google.com");
        let report = CookieReport::new(&selected);
        assert_eq!(report.count, 6);
        assert_eq!(
            report.sidcc,
            vec![
                ("SIDCC", true),
                ("__Secure-1PSIDCC", false),
                ("__Secure-3PSIDCC", true)
            ]
        );
        let critical: Vec<_> = report.critical.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(critical, vec!["__Secure-3PSIDCC", "APISID", "SIDCC", "SSID"]);
    }

    #[test]
    fn test_sidcc_presence_is_substring_match() {
        // __Secure-1PSIDCC contains "SIDCC", so SIDCC counts as present
        let only = vec![BrowserCookie::new("__Secure-1PSIDCC", "v", ".google.com")];
        let report = CookieReport::new(&only);
        assert_eq!(report.sidcc[0], ("SIDCC", true));
        assert!(report.critical.iter().all(|c| c.name != "SIDCC"));
    }

    #[test]
    fn test_collate_matches_browser_locale_order() {
        let mut names = vec!["SID", "__Secure-1PSID", "APISID", "NID", "1P_JAR", "aec"];
        names.sort_by(|a, b| collate(a, b));
        assert_eq!(names, vec!["__Secure-1PSID", "1P_JAR", "aec", "APISID", "NID", "SID"]);
    }

    #[test]
    fn test_collate_case_and_prefix() {
        assert_eq!(collate("sid", "SID"), Ordering::Less);
        assert_eq!(collate("SID", "SIDCC"), Ordering::Less);
        assert_eq!(collate("SIDCC", "SSID"), Ordering::Less);
        assert_eq!(collate("__Secure-3PSIDCC", "__Secure-1PSID"), Ordering::Greater);
        assert_eq!(collate("NID", "NID"), Ordering::Equal);
    }

    #[test]
    fn test_preview_char_boundary() {
        assert_eq!(preview("abcdef", 3), "abc");
        assert_eq!(preview("ab", 50), "ab");
        assert_eq!(preview("ééé", 2), "éé");
    }
}
