pub mod organization;
pub mod person;

use std::sync::LazyLock;

use scraper::{ElementRef, Html, Selector};

use crate::db::{OrganizationRow, PersonRow};

/// Container wrapping one directory entry (an organization plus optional pastor).
pub const BLOCK_STYLE_PREFIX: &str = "font-family: Helvetica, Arial; background-color: rgba(0,0,0,0.05);";

static BLOCK_SEL: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse(&format!(r#"div[style^="{}"]"#, BLOCK_STYLE_PREFIX)).unwrap()
});
static DIV_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("div").unwrap());

/// Result of parsing one directory block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedBlock {
    pub organization: OrganizationRow,
    pub person: Option<PersonRow>,
}

/// Split the directory page into the outer HTML of each entry block, in source order.
pub fn split_blocks(html: &str) -> Vec<String> {
    let document = Html::parse_document(html);
    document.select(&BLOCK_SEL).map(|b| b.html()).collect()
}

/// Parse one block produced by [`split_blocks`]. Returns `None` when the
/// fragment holds no nested `div` at all, or no organization name.
pub fn parse_block(fragment: &str) -> Option<ParsedBlock> {
    let document = Html::parse_fragment(fragment);
    let block = document
        .select(&BLOCK_SEL)
        .next()
        .unwrap_or_else(|| document.root_element());

    let divs: Vec<ElementRef> = block
        .select(&DIV_SEL)
        .filter(|d| *d != block)
        .collect();
    if divs.is_empty() {
        return None;
    }

    let organization = organization::extract(&divs);
    if organization.name.is_empty() {
        return None;
    }
    let person = person::extract(&divs);
    Some(ParsedBlock { organization, person })
}

// ── Shared helpers ──

/// Collapsed, trimmed text content of an element.
pub(crate) fn element_text(el: ElementRef) -> String {
    el.text()
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

pub(crate) fn non_empty(s: String) -> Option<String> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        None
    } else if trimmed.len() == s.len() {
        Some(s)
    } else {
        Some(trimmed.to_string())
    }
}

/// Decode the entities html5ever emits when re-serializing text.
pub(crate) fn decode_entities(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&amp;", "&")
}

/// Normalize a `tel:` value: `%20` becomes a space and anything other than
/// digits, whitespace, `+`, `-` and parentheses is dropped.
pub(crate) fn clean_phone(raw: &str) -> String {
    raw.replace("%20", " ")
        .chars()
        .filter(|c| c.is_ascii_digit() || c.is_whitespace() || matches!(c, '+' | '-' | '(' | ')'))
        .collect::<String>()
        .trim()
        .to_string()
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture(name: &str) -> String {
        std::fs::read_to_string(format!("tests/fixtures/{}.html", name)).unwrap()
    }

    #[test]
    fn phone_cleanup() {
        assert_eq!(clean_phone("%20(11)%209999-8888"), "(11) 9999-8888");
        assert_eq!(clean_phone("+55%2011%203333.4444"), "+55 11 33334444");
        assert_eq!(clean_phone(""), "");
    }

    #[test]
    fn entities() {
        assert_eq!(decode_entities("Rua A &amp; B&nbsp;10"), "Rua A & B 10");
        assert_eq!(decode_entities("&amp;lt;"), "&lt;");
    }

    #[test]
    fn splits_directory_page() {
        let blocks = split_blocks(&fixture("anuario"));
        assert_eq!(blocks.len(), 3);
        assert!(blocks.iter().all(|b| b.contains("padding: 15px;")));
    }

    #[test]
    fn parses_directory_page() {
        let parsed: Vec<ParsedBlock> = split_blocks(&fixture("anuario"))
            .iter()
            .filter_map(|b| parse_block(b))
            .collect();
        assert_eq!(parsed.len(), 3);

        let central = &parsed[0].organization;
        assert_eq!(central.name, "Igreja Presbiteriana Central");
        assert_eq!(central.district.as_deref(), Some("Presbitério Paulistano"));
        assert_eq!(central.address.as_deref(), Some("Rua das Flores 10 - Centro"));
        assert_eq!(central.city.as_deref(), Some("São Paulo"));
        assert_eq!(central.region.as_deref(), Some("SP"));
        assert_eq!(central.postal_code.as_deref(), Some("01001-000"));
        assert_eq!(central.phone.as_deref(), Some("(11) 9999-8888"));
        assert_eq!(central.email.as_deref(), Some("contato@ipcentral.org.br"));
        assert_eq!(central.website.as_deref(), Some("https://www.ipcentral.org.br/"));

        let pastor = parsed[0].person.as_ref().unwrap();
        assert_eq!(pastor.name, "Rev. João da Silva");
        assert_eq!(pastor.phone.as_deref(), Some("(11) 3222-1111"));
        assert_eq!(pastor.mobile.as_deref(), Some("(11) 98888-7777"));
        assert_eq!(pastor.email.as_deref(), Some("joao@ipcentral.org.br"));

        // Second block lists no pastor.
        assert!(parsed[1].person.is_none());
        assert_eq!(parsed[1].organization.website, None);
        assert_eq!(
            parsed[1].organization.website_original.as_deref(),
            Some("http://gmail.com/")
        );

        // Third block has a bare address without city/region.
        let rural = &parsed[2].organization;
        assert_eq!(rural.address.as_deref(), Some("Estrada Velha, km 4 & Sítio"));
        assert_eq!(rural.city, None);
        assert_eq!(rural.region, None);
        assert_eq!(rural.postal_code, None);
    }

    #[test]
    fn empty_block_is_skipped() {
        let html = format!(r#"<div style="{}">nothing here</div>"#, BLOCK_STYLE_PREFIX);
        assert!(parse_block(&html).is_none());
    }
}
