use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Selector};
use url::Url;

use super::{clean_phone, decode_entities, element_text, non_empty};
use crate::db::OrganizationRow;

/// Exact style of the organization sub-block.
const ORGANIZATION_STYLE: &str = "padding: 15px;";

/// Placeholder URLs that appear in the directory instead of a real website.
pub const PLACEHOLDER_WEBSITES: &[&str] = &[
    "http://yahoo.com.br/",
    "http://xn--nopossui-rza/",
    "http://gmail.com/",
];

static NAME_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("big > b").unwrap());
static BOLD_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("b").unwrap());
static ANCHOR_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("a[href]").unwrap());

static ADDRESS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<br><br>(?P<address>[^<]+)<br>").unwrap());
static CITY_REGION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m) (?P<city>[^-/\n]+)\s*/\s*(?P<region>[A-Z]{2})$").unwrap()
});
static POSTAL_CODE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<br>CEP: (?P<cep>[\d.-]*)<br>").unwrap());

pub fn extract(divs: &[ElementRef]) -> OrganizationRow {
    let Some(block) = divs
        .iter()
        .find(|d| d.value().attr("style") == Some(ORGANIZATION_STYLE))
    else {
        return OrganizationRow::default();
    };

    let mut row = OrganizationRow {
        name: block.select(&NAME_SEL).next().map(element_text).unwrap_or_default(),
        // Second bold element; the first one is the name.
        district: block.select(&BOLD_SEL).nth(1).map(element_text).and_then(non_empty),
        ..Default::default()
    };

    let html = block.inner_html();
    if let Some(caps) = ADDRESS_RE.captures(&html) {
        let address = decode_entities(caps["address"].trim());
        let (address, city, region) = split_city_region(&address);
        row.address = non_empty(address);
        row.city = city;
        row.region = region;
    }
    if let Some(caps) = POSTAL_CODE_RE.captures(&html) {
        row.postal_code = non_empty(caps["cep"].to_string());
    }

    for anchor in block.select(&ANCHOR_SEL) {
        let Some(href) = anchor.value().attr("href") else {
            continue;
        };
        if let Some(tel) = href.strip_prefix("tel:") {
            row.phone = non_empty(clean_phone(tel.trim()));
        } else if let Some(mail) = href.strip_prefix("mailto:") {
            row.email = non_empty(mail.trim().to_string());
        } else if href.starts_with("http") || href.starts_with("www") {
            let candidate = href.trim().to_string();
            if is_valid_website(&candidate) {
                row.website = Some(candidate.clone());
            }
            row.website_original = Some(candidate);
        }
    }

    row
}

/// Split a trailing ` City / UF` off an address line.
/// Returns the remaining street address plus city and region when present.
pub fn split_city_region(address: &str) -> (String, Option<String>, Option<String>) {
    let Some(caps) = CITY_REGION_RE.captures(address) else {
        return (address.trim().to_string(), None, None);
    };
    let whole = caps.get(0).map_or(0..0, |m| m.range());
    let city = non_empty(caps["city"].to_string());
    let region = Some(caps["region"].to_string());

    let mut street = String::with_capacity(address.len());
    street.push_str(&address[..whole.start]);
    street.push_str(&address[whole.end..]);
    let street = street
        .trim()
        .trim_end_matches(|c: char| c.is_whitespace() || c == '-' || c == '/')
        .to_string();
    (street, city, region)
}

/// A website counts as valid when it parses as an absolute URL with a host
/// and is not one of the known placeholders.
pub fn is_valid_website(candidate: &str) -> bool {
    if PLACEHOLDER_WEBSITES.contains(&candidate) {
        return false;
    }
    Url::parse(candidate)
        .map(|u| u.host_str().is_some_and(|h| !h.is_empty()))
        .unwrap_or(false)
}
