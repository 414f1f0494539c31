use crate::db::WebsiteFilter;

/// Websites that are never an organization's own site.
pub const DENIED_WEBSITES: &[&str] = &[
    "http://gmail.com/",
    "http://blogspot.com/",
    "http://prvv.org.br/features/igrejas",
];

/// Social networks: a profile page is not a website.
pub const SOCIAL_PATTERNS: &[&str] = &["facebook", "youtube", "fb.com", "instagram"];

/// Free site builders / hosted blogs (status 3).
pub const HOSTED_PLATFORM_PATTERNS: &[&str] = &["wixsite", "webnode", "blogspot"];

/// Link-in-bio pages that only redirect elsewhere (status 4).
pub const REDIRECTOR_PATTERNS: &[&str] = &["apptuts.bio", "linkr.bio", "linktr.ee"];

/// A third-party CMS recognised by a marker in the page body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VendorSignature {
    pub vendor: &'static str,
    /// Lowercase substring searched for in the body.
    pub marker: &'static str,
    pub scope: WebsiteFilter,
}

impl VendorSignature {
    pub fn matches(&self, body: &str) -> bool {
        contains_ignore_case(body, self.marker)
    }
}

const INOVAKI: VendorSignature = VendorSignature {
    vendor: "Inovaki",
    marker: "inovaki",
    scope: WebsiteFilter::ReachableOrVendor,
};

const INCHURCH: VendorSignature = VendorSignature {
    vendor: "inchurch",
    marker: "inradar",
    scope: WebsiteFilter::Reachable,
};

/// Vendor passes in the order they run.
///
/// With `legacy` set, "sistema prover" and "eklesia" look for `inradar`
/// like older databases were classified.
pub fn vendor_signatures(legacy: bool) -> Vec<VendorSignature> {
    let (prover, eklesia) = if legacy {
        ("inradar", "inradar")
    } else {
        ("siteprover", "eklesia")
    };
    vec![
        INOVAKI,
        VendorSignature {
            vendor: "sistema prover",
            marker: prover,
            scope: WebsiteFilter::ReachableUntagged,
        },
        INCHURCH,
        VendorSignature {
            vendor: "eklesia",
            marker: eklesia,
            scope: WebsiteFilter::ReachableUntagged,
        },
    ]
}

fn contains_ignore_case(haystack: &str, needle: &str) -> bool {
    if needle.is_empty() {
        return false;
    }
    haystack.to_lowercase().contains(&needle.to_lowercase())
}
