//! Small DOM helpers shared by the page parsers.

use scraper::{ElementRef, Html, Selector};

use super::form::FormError;

/// Compile a CSS selector coming from configuration.
pub fn compile_selector(css: &str) -> Result<Selector, FormError> {
    Selector::parse(css).map_err(|err| FormError::InvalidSelector {
        selector: css.to_string(),
        reason: err.to_string(),
    })
}

/// Concatenated text content of an element.
pub fn text_of(element: ElementRef<'_>) -> String {
    element.text().collect()
}

/// Text content with every whitespace character removed.
pub fn squeezed_text(element: ElementRef<'_>) -> String {
    element.text().flat_map(str::chars).filter(|c| !c.is_whitespace()).collect()
}

/// Trimmed text of every element matching `css`, in document order.
pub fn texts_matching(document: &Html, css: &str) -> Result<Vec<String>, FormError> {
    let selector = compile_selector(css)?;
    Ok(document
        .select(&selector)
        .map(|el| text_of(el).trim().to_string())
        .collect())
}
