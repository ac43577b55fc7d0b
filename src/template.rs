//! `{{token}}` substitution for the scripts setup writes into repositories

use anyhow::{bail, Result};
use regex::Regex;
use std::sync::OnceLock;

static TOKEN: OnceLock<Regex> = OnceLock::new();

/// Supplies token values; each context decides how its values are quoted
pub trait TemplateContext {
    fn value(&self, key: &str) -> Option<String>;
}

pub fn render(template: &str, context: &dyn TemplateContext) -> Result<String> {
    let token = TOKEN
        .get_or_init(|| Regex::new(r"\{\{\s*([a-z_]+)\s*\}\}").expect("template token regex"));

    let mut output = String::with_capacity(template.len());
    let mut last = 0;

    for captures in token.captures_iter(template) {
        let (Some(whole), Some(key)) = (captures.get(0), captures.get(1)) else {
            continue;
        };

        let Some(value) = context.value(key.as_str()) else {
            bail!("Unknown template token '{}'", key.as_str());
        };

        output.push_str(&template[last..whole.start()]);
        output.push_str(&value);
        last = whole.end();
    }

    output.push_str(&template[last..]);
    Ok(output)
}
