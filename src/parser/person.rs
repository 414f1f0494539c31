use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Selector};

use super::{clean_phone, decode_entities, element_text, non_empty};
use crate::db::PersonRow;

/// Style fragment carried by the pastor container.
const PERSON_STYLE_MARKER: &str = "background-color: rgba(0,0,0,0.05);";

static NAME_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("b > small").unwrap());

static PHONE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"Tel: <a href="tel:(?P<v>[^"]+)""#).unwrap());
static MOBILE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"Cel: <a href="tel:(?P<v>[^"]+)""#).unwrap());
static EMAIL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"Email: <a href="mailto:(?P<v>[^"]+)""#).unwrap());

/// Extract the pastor listed in a block, if any.
pub fn extract(divs: &[ElementRef]) -> Option<PersonRow> {
    let block = divs.iter().find(|d| {
        d.value()
            .attr("style")
            .is_some_and(|s| s.contains(PERSON_STYLE_MARKER))
    })?;

    let name = block.select(&NAME_SEL).next().map(element_text)?;
    if name.is_empty() {
        return None;
    }

    let html = block.inner_html();
    Some(PersonRow {
        name,
        phone: capture(&PHONE_RE, &html).and_then(|v| non_empty(clean_phone(&v))),
        mobile: capture(&MOBILE_RE, &html).and_then(|v| non_empty(clean_phone(&v))),
        email: capture(&EMAIL_RE, &html).and_then(non_empty),
    })
}

fn capture(re: &Regex, html: &str) -> Option<String> {
    re.captures(html).map(|c| decode_entities(&c["v"]))
}
