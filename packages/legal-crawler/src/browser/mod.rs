//! Browser backends.
//!
//! DOM interaction goes through small page scripts built here, so the same
//! semantics (forced clicks, filled inputs, globals read as strings) hold for
//! any engine that can evaluate JavaScript.

mod chromium;

pub use chromium::{ChromiumPage, ChromiumProvider};

/// Quote `value` as a JavaScript string literal.
fn js_string(value: &str) -> String {
    serde_json::Value::String(value.to_string()).to_string()
}

pub(crate) fn exists_script(selector: &str) -> String {
    format!("document.querySelector({}) !== null", js_string(selector))
}

/// Clicks the first match, skipping visibility checks. Evaluates to `false`
/// when nothing matched.
pub(crate) fn click_script(selector: &str) -> String {
    format!(
        "(() => {{ const el = document.querySelector({}); if (!el) return false; el.click(); return true; }})()",
        js_string(selector)
    )
}

pub(crate) fn click_with_text_script(selector: &str, text: &str) -> String {
    format!(
        "(() => {{ const el = Array.from(document.querySelectorAll({})).find(e => (e.textContent || '').includes({})); if (!el) return false; el.click(); return true; }})()",
        js_string(selector),
        js_string(text)
    )
}

pub(crate) fn fill_script(selector: &str, value: &str) -> String {
    format!(
        "(() => {{ const el = document.querySelector({}); if (!el) return false; el.focus(); el.value = {}; el.dispatchEvent(new Event('input', {{ bubbles: true }})); el.dispatchEvent(new Event('change', {{ bubbles: true }})); return true; }})()",
        js_string(selector),
        js_string(value)
    )
}

pub(crate) fn inner_html_script(selector: &str) -> String {
    format!(
        "(() => {{ const el = document.querySelector({}); return el ? el.innerHTML : null; }})()",
        js_string(selector)
    )
}

pub(crate) fn inner_text_script(selector: &str) -> String {
    format!(
        "(() => {{ const el = document.querySelector({}); return el ? el.innerText : null; }})()",
        js_string(selector)
    )
}

pub(crate) fn attribute_script(selector: &str, name: &str) -> String {
    format!(
        "(() => {{ const el = document.querySelector({}); return el ? el.getAttribute({}) : null; }})()",
        js_string(selector),
        js_string(name)
    )
}

/// `null` when the global is undefined or null, its string form otherwise.
pub(crate) fn global_script(name: &str) -> String {
    format!(
        "(() => {{ const v = window[{}]; return (v === undefined || v === null) ? null : String(v); }})()",
        js_string(name)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selectors_are_quoted() {
        let script = exists_script(r#"div[aria-labelledby="ui-dialog-title-logoutfrom"] button"#);
        assert_eq!(
            script,
            r#"document.querySelector("div[aria-labelledby=\"ui-dialog-title-logoutfrom\"] button") !== null"#
        );
    }

    #[test]
    fn test_fill_value_is_escaped() {
        let script = fill_script("#pw", "a\"b'c\\");
        assert!(script.contains(r#"el.value = "a\"b'c\\";"#));
    }

    #[test]
    fn test_click_with_text_embeds_both_literals() {
        let script = click_with_text_script("button.ui-button", "Đồng ý");
        assert!(script.contains(r#"querySelectorAll("button.ui-button")"#));
        assert!(script.contains(r#"includes("Đồng ý")"#));
    }

    #[test]
    fn test_global_script() {
        assert!(global_script("MemberGA").contains(r#"window["MemberGA"]"#));
    }
}
