//! HTML marker probes for profile pages
//!
//! Classification is by element presence, stable against whitespace and
//! attribute reordering. Priority: ban > private > public > unexpected.

use std::sync::LazyLock;

use scraper::{Html, Selector};

static BAN_MARKER: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("span.profile_ban_info").expect("valid selector"));
static PRIVATE_MARKER: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("div.profile_private_info").expect("valid selector"));
static PUBLIC_MARKER: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse("div.profile_header_centered_persona").expect("valid selector")
});

/// What a fetched profile page says about the account
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageVerdict {
    /// Ban marker present; carries its trimmed inner text
    Banned(String),
    Private,
    Public,
    Unexpected,
}

/// Classify a profile page body by its markers.
pub fn classify_profile_page(body: &str) -> PageVerdict {
    let document = Html::parse_document(body);

    if let Some(element) = document.select(&BAN_MARKER).next() {
        let text = element
            .text()
            .collect::<Vec<_>>()
            .join(" ")
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ");
        return PageVerdict::Banned(text);
    }

    if document.select(&PRIVATE_MARKER).next().is_some() {
        return PageVerdict::Private;
    }

    if document.select(&PUBLIC_MARKER).next().is_some() {
        return PageVerdict::Public;
    }

    PageVerdict::Unexpected
}
